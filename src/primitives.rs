//! The closed set of wire primitives.
//!
//! Every value the engine can read or write directly is one of the variants of
//! [`Primitive`]. Format code works with plain Rust types (`u32`, `bool`, [`U24`], ...)
//! through the sealed [`PrimitiveValue`] trait; the engines only ever see the sum type
//! and match on it exhaustively.

use crate::error::{BinError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Byte order of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Endian {
    /// Least significant byte first.
    #[default]
    Little,
    /// Most significant byte first.
    Big,
}

/// Character encoding used for string fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StringEncoding {
    /// One byte per character, code points U+0000..=U+00FF. Any byte sequence round-trips.
    #[default]
    Latin1,
    /// UTF-8; invalid sequences decode lossily.
    Utf8,
}

impl StringEncoding {
    /// Decodes raw bytes (without terminator) into a string.
    pub fn decode(self, bytes: &[u8]) -> String {
        match self {
            Self::Latin1 => bytes.iter().map(|&b| char::from(b)).collect(),
            Self::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
        }
    }

    /// Encodes a string into raw bytes (without terminator).
    pub fn encode(self, value: &str) -> Vec<u8> {
        match self {
            Self::Latin1 => value
                .chars()
                .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
                .collect(),
            Self::Utf8 => value.as_bytes().to_vec(),
        }
    }
}

/// A 24-bit unsigned integer, stored in three bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct U24(u32);

impl U24 {
    /// Largest representable value.
    pub const MAX: u32 = 0x00FF_FFFF;

    /// Creates a value, rejecting anything wider than 24 bits.
    pub fn new(value: u32) -> Option<Self> {
        (value <= Self::MAX).then_some(Self(value))
    }

    /// Creates a value, discarding the top byte.
    pub fn truncating(value: u32) -> Self {
        Self(value & Self::MAX)
    }

    /// Returns the numeric value.
    pub fn value(self) -> u32 {
        self.0
    }
}

impl fmt::Display for U24 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Discriminant of [`Primitive`], used to know what to read in decode mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    /// One byte, 0 or 1.
    Bool,
    /// Signed byte.
    I8,
    /// Unsigned byte.
    U8,
    /// Signed 16-bit integer.
    I16,
    /// Unsigned 16-bit integer.
    U16,
    /// Unsigned 24-bit integer.
    U24,
    /// Signed 32-bit integer.
    I32,
    /// Unsigned 32-bit integer.
    U32,
    /// Signed 64-bit integer.
    I64,
    /// Unsigned 64-bit integer.
    U64,
    /// IEEE 754 single precision.
    F32,
    /// IEEE 754 double precision.
    F64,
    /// One byte where `0xFF` encodes "no value".
    NullableU8,
}

impl PrimitiveKind {
    /// Size of the primitive on the wire, in bytes.
    pub const fn size(self) -> usize {
        match self {
            Self::Bool | Self::I8 | Self::U8 | Self::NullableU8 => 1,
            Self::I16 | Self::U16 => 2,
            Self::U24 => 3,
            Self::I32 | Self::U32 | Self::F32 => 4,
            Self::I64 | Self::U64 | Self::F64 => 8,
        }
    }
}

/// A single wire value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Primitive {
    /// See [`PrimitiveKind::Bool`].
    Bool(bool),
    /// See [`PrimitiveKind::I8`].
    I8(i8),
    /// See [`PrimitiveKind::U8`].
    U8(u8),
    /// See [`PrimitiveKind::I16`].
    I16(i16),
    /// See [`PrimitiveKind::U16`].
    U16(u16),
    /// See [`PrimitiveKind::U24`].
    U24(U24),
    /// See [`PrimitiveKind::I32`].
    I32(i32),
    /// See [`PrimitiveKind::U32`].
    U32(u32),
    /// See [`PrimitiveKind::I64`].
    I64(i64),
    /// See [`PrimitiveKind::U64`].
    U64(u64),
    /// See [`PrimitiveKind::F32`].
    F32(f32),
    /// See [`PrimitiveKind::F64`].
    F64(f64),
    /// See [`PrimitiveKind::NullableU8`].
    NullableU8(Option<u8>),
}

/// Sentinel byte for an absent [`PrimitiveKind::NullableU8`].
pub const NULLABLE_U8_NONE: u8 = 0xFF;

macro_rules! endian_bytes {
    ($v:expr, $endian:expr) => {
        match $endian {
            Endian::Little => $v.to_le_bytes().to_vec(),
            Endian::Big => $v.to_be_bytes().to_vec(),
        }
    };
}

macro_rules! endian_read {
    ($t:ty, $bytes:expr, $endian:expr) => {{
        let mut raw = [0u8; std::mem::size_of::<$t>()];
        raw.copy_from_slice($bytes);
        match $endian {
            Endian::Little => <$t>::from_le_bytes(raw),
            Endian::Big => <$t>::from_be_bytes(raw),
        }
    }};
}

impl Primitive {
    /// Returns the discriminant.
    pub const fn kind(&self) -> PrimitiveKind {
        match self {
            Self::Bool(_) => PrimitiveKind::Bool,
            Self::I8(_) => PrimitiveKind::I8,
            Self::U8(_) => PrimitiveKind::U8,
            Self::I16(_) => PrimitiveKind::I16,
            Self::U16(_) => PrimitiveKind::U16,
            Self::U24(_) => PrimitiveKind::U24,
            Self::I32(_) => PrimitiveKind::I32,
            Self::U32(_) => PrimitiveKind::U32,
            Self::I64(_) => PrimitiveKind::I64,
            Self::U64(_) => PrimitiveKind::U64,
            Self::F32(_) => PrimitiveKind::F32,
            Self::F64(_) => PrimitiveKind::F64,
            Self::NullableU8(_) => PrimitiveKind::NullableU8,
        }
    }

    /// Byte representation honoring `endian`.
    pub fn to_bytes(&self, endian: Endian) -> Vec<u8> {
        match *self {
            Self::Bool(v) => vec![u8::from(v)],
            Self::I8(v) => v.to_le_bytes().to_vec(),
            Self::U8(v) => vec![v],
            Self::I16(v) => endian_bytes!(v, endian),
            Self::U16(v) => endian_bytes!(v, endian),
            Self::U24(v) => {
                let le = v.value().to_le_bytes();
                match endian {
                    Endian::Little => vec![le[0], le[1], le[2]],
                    Endian::Big => vec![le[2], le[1], le[0]],
                }
            }
            Self::I32(v) => endian_bytes!(v, endian),
            Self::U32(v) => endian_bytes!(v, endian),
            Self::I64(v) => endian_bytes!(v, endian),
            Self::U64(v) => endian_bytes!(v, endian),
            Self::F32(v) => endian_bytes!(v, endian),
            Self::F64(v) => endian_bytes!(v, endian),
            Self::NullableU8(v) => vec![v.unwrap_or(NULLABLE_U8_NONE)],
        }
    }

    /// Parses `bytes` (exactly `kind.size()` long) as a value of `kind`.
    pub fn from_bytes(kind: PrimitiveKind, bytes: &[u8], endian: Endian) -> Result<Self> {
        if bytes.len() != kind.size() {
            return Err(BinError::Internal(format!(
                "{kind:?} needs {} bytes, got {}",
                kind.size(),
                bytes.len()
            )));
        }
        Ok(match kind {
            PrimitiveKind::Bool => Self::Bool(bytes[0] != 0),
            PrimitiveKind::I8 => Self::I8(i8::from_le_bytes([bytes[0]])),
            PrimitiveKind::U8 => Self::U8(bytes[0]),
            PrimitiveKind::I16 => Self::I16(endian_read!(i16, bytes, endian)),
            PrimitiveKind::U16 => Self::U16(endian_read!(u16, bytes, endian)),
            PrimitiveKind::U24 => {
                let value = match endian {
                    Endian::Little => u32::from_le_bytes([bytes[0], bytes[1], bytes[2], 0]),
                    Endian::Big => u32::from_be_bytes([0, bytes[0], bytes[1], bytes[2]]),
                };
                Self::U24(U24::truncating(value))
            }
            PrimitiveKind::I32 => Self::I32(endian_read!(i32, bytes, endian)),
            PrimitiveKind::U32 => Self::U32(endian_read!(u32, bytes, endian)),
            PrimitiveKind::I64 => Self::I64(endian_read!(i64, bytes, endian)),
            PrimitiveKind::U64 => Self::U64(endian_read!(u64, bytes, endian)),
            PrimitiveKind::F32 => Self::F32(endian_read!(f32, bytes, endian)),
            PrimitiveKind::F64 => Self::F64(endian_read!(f64, bytes, endian)),
            PrimitiveKind::NullableU8 => {
                Self::NullableU8((bytes[0] != NULLABLE_U8_NONE).then_some(bytes[0]))
            }
        })
    }

    /// Integer view used for pointer and bit-field arithmetic. Floats have none.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Self::Bool(v) => Some(i64::from(v)),
            Self::I8(v) => Some(i64::from(v)),
            Self::U8(v) => Some(i64::from(v)),
            Self::I16(v) => Some(i64::from(v)),
            Self::U16(v) => Some(i64::from(v)),
            Self::U24(v) => Some(i64::from(v.value())),
            Self::I32(v) => Some(i64::from(v)),
            Self::U32(v) => Some(i64::from(v)),
            Self::I64(v) => Some(v),
            Self::U64(v) => Some(v as i64),
            Self::NullableU8(v) => Some(i64::from(v.unwrap_or(NULLABLE_U8_NONE))),
            Self::F32(_) | Self::F64(_) => None,
        }
    }
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::I8(v) => write!(f, "{v}"),
            Self::U8(v) => write!(f, "0x{v:02X}"),
            Self::I16(v) => write!(f, "{v}"),
            Self::U16(v) => write!(f, "0x{v:04X}"),
            Self::U24(v) => write!(f, "0x{:06X}", v.value()),
            Self::I32(v) => write!(f, "{v}"),
            Self::U32(v) => write!(f, "0x{v:08X}"),
            Self::I64(v) => write!(f, "{v}"),
            Self::U64(v) => write!(f, "0x{v:016X}"),
            Self::F32(v) => write!(f, "{v}"),
            Self::F64(v) => write!(f, "{v}"),
            Self::NullableU8(Some(v)) => write!(f, "0x{v:02X}"),
            Self::NullableU8(None) => write!(f, "null"),
        }
    }
}

mod sealed {
    pub trait Sealed {}
}

/// A Rust type with a direct wire representation.
///
/// Sealed: the primitive set is closed.
pub trait PrimitiveValue:
    Copy + Default + fmt::Debug + PartialEq + Send + Sync + 'static + sealed::Sealed
{
    /// Wire kind of this type.
    const KIND: PrimitiveKind;

    /// Wraps the value.
    fn into_primitive(self) -> Primitive;

    /// Unwraps a value of the matching kind.
    fn from_primitive(value: Primitive) -> Result<Self>;
}

macro_rules! impl_primitive_value {
    ($($t:ty => $variant:ident),* $(,)?) => {
        $(
            impl sealed::Sealed for $t {}

            impl PrimitiveValue for $t {
                const KIND: PrimitiveKind = PrimitiveKind::$variant;

                fn into_primitive(self) -> Primitive {
                    Primitive::$variant(self)
                }

                fn from_primitive(value: Primitive) -> Result<Self> {
                    match value {
                        Primitive::$variant(v) => Ok(v),
                        other => Err(BinError::UnsupportedType(format!(
                            "expected {:?}, got {:?}",
                            PrimitiveKind::$variant,
                            other.kind()
                        ))),
                    }
                }
            }
        )*
    };
}

impl_primitive_value!(
    bool => Bool,
    i8 => I8,
    u8 => U8,
    i16 => I16,
    u16 => U16,
    U24 => U24,
    i32 => I32,
    u32 => U32,
    i64 => I64,
    u64 => U64,
    f32 => F32,
    f64 => F64,
    Option<u8> => NullableU8,
);
