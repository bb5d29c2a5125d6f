//! Centralized error handling for binweave.
//!
//! Failures are split in two families:
//!
//! 1. **Fatal errors** ([`BinError`]): the data (or the format author's code) cannot be
//!    traversed any further. They unwind synchronously to the caller through `Result`.
//! 2. **Warnings** ([`Warning`]): benign deviations that reverse-engineered formats
//!    routinely contain (a checksum that does not match, a boolean byte that is
//!    neither 0 nor 1, ...). They are logged, recorded in the session diagnostics and
//!    traversal continues, unless the session escalates warnings to errors.
//!
//! ## Error Categories
//!
//! - **Pointer Errors** ([`BinError::Pointer`]): a raw value that resolves to no file.
//! - **Context Errors** ([`BinError::Context`]): session misuse (duplicate paths,
//!   missing settings bags, unknown pre-defined pointers, dangling file references).
//! - **Unsupported Types** ([`BinError::UnsupportedType`]): a bug in format code.
//! - **Codec Errors** ([`BinError::Codec`]): a corrupt compressed stream.
//! - **Format Errors** ([`BinError::Format`]): truncated data, bit-field overflow,
//!   escalated warnings.
//!
//! ```rust
//! use binweave::{BinError, Context};
//!
//! let ctx = Context::new("data");
//! match ctx.pre_defined_pointer("missing") {
//!     Err(BinError::Context(msg)) => assert!(msg.contains("missing")),
//!     other => panic!("unexpected: {other:?}"),
//! }
//! ```

use std::fmt;
use std::io;
use std::sync::Arc;

/// A specialized `Result` type for binweave operations.
pub type Result<T> = std::result::Result<T, BinError>;

/// The master error enum covering all fatal failure domains.
///
/// This type is `Clone`; I/O errors are wrapped in `Arc` for that purpose.
#[derive(Debug, Clone)]
pub enum BinError {
    /// Low-level I/O failure reported by the file system collaborator.
    Io(Arc<io::Error>),

    /// A raw pointer value that resolves to no file and is not allow-listed.
    Pointer {
        /// Name of the file the pointer was read from.
        file: String,
        /// Offset (within that file) of the pointer field.
        offset: i64,
        /// The raw serialized value.
        value: i64,
    },

    /// Session-level misuse.
    Context(String),

    /// A value type outside the closed primitive set, or a primitive that does not
    /// match the requested kind. Always a bug in format code, never bad data.
    UnsupportedType(String),

    /// Corruption inside a block encoder's stream.
    Codec {
        /// Name of the encoder.
        codec: String,
        /// Byte position inside the encoded stream where decoding failed.
        position: u64,
        /// Description of the violation.
        message: String,
    },

    /// Data that cannot be traversed: truncated files, bit-field overflow, or a
    /// warning escalated by the session settings.
    Format(String),

    /// Logic error inside the engine. Should not occur; please report it.
    Internal(String),
}

impl fmt::Display for BinError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O Error: {e}"),
            Self::Pointer {
                file,
                offset,
                value,
            } => write!(
                f,
                "Pointer Error: value 0x{value:X} at {file}|0x{offset:08X} resolves to no file"
            ),
            Self::Context(s) => write!(f, "Context Error: {s}"),
            Self::UnsupportedType(s) => write!(f, "Unsupported Type: {s}"),
            Self::Codec {
                codec,
                position,
                message,
            } => write!(f, "Codec Error ({codec} @ {position}): {message}"),
            Self::Format(s) => write!(f, "Format Error: {s}"),
            Self::Internal(s) => write!(f, "Internal Logic Error: {s}"),
        }
    }
}

impl std::error::Error for BinError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for BinError {
    fn from(err: io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

/// A recoverable deviation from the expected format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Warning {
    /// A stored checksum (or other calculated value) differs from the computed one.
    ChecksumMismatch {
        /// Processor that computed the value.
        processor: String,
        /// Where the stored value lives.
        location: String,
        /// Value found in the stream.
        stored: String,
        /// Value computed over the processed region.
        calculated: String,
    },
    /// A boolean byte that is neither 0 nor 1.
    MalformedBool {
        /// Where the byte lives.
        location: String,
        /// The raw byte.
        value: u8,
    },
    /// An encoded block whose traversal did not consume exactly the decoded length.
    EncodedLengthMismatch {
        /// Encoder name.
        encoder: String,
        /// Start of the encoded block in its source file.
        location: String,
        /// Decoded length of the block.
        expected: i64,
        /// Bytes actually consumed by the traversal.
        consumed: i64,
    },
    /// Unused bits of a bit-field container (or padding) that are not zero.
    NonZeroPadding {
        /// Where the container lives.
        location: String,
        /// The non-zero remainder.
        value: u64,
    },
    /// A string longer than its fixed-size field on encode.
    StringTruncated {
        /// Where the field lives.
        location: String,
        /// Encoded string length.
        length: usize,
        /// Field capacity.
        capacity: usize,
    },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ChecksumMismatch {
                processor,
                location,
                stored,
                calculated,
            } => write!(
                f,
                "{processor} mismatch at {location}: stored {stored}, calculated {calculated}"
            ),
            Self::MalformedBool { location, value } => {
                write!(f, "malformed boolean byte 0x{value:02X} at {location}")
            }
            Self::EncodedLengthMismatch {
                encoder,
                location,
                expected,
                consumed,
            } => write!(
                f,
                "{encoder} block at {location}: decoded {expected} bytes but traversal consumed {consumed}"
            ),
            Self::NonZeroPadding { location, value } => {
                write!(f, "non-zero padding 0x{value:X} at {location}")
            }
            Self::StringTruncated {
                location,
                length,
                capacity,
            } => write!(
                f,
                "string of {length} bytes truncated to {capacity} at {location}"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn pointer_error_names_file_offset_and_value() {
        let err = BinError::Pointer {
            file: "level.bin".into(),
            offset: 0x40,
            value: 0xDEAD,
        };
        let text = err.to_string();
        assert!(text.contains("level.bin|0x00000040"));
        assert!(text.contains("0xDEAD"));
    }

    #[test]
    fn io_errors_keep_their_source() {
        let err: BinError = io::Error::new(io::ErrorKind::NotFound, "gone").into();
        assert!(err.source().is_some());
        let cloned = err.clone();
        assert!(matches!(cloned, BinError::Io(_)));
    }
}
