//! Block encoders.
//!
//! An encoder turns a region of the source stream into the bytes of a virtual file.
//! While the block is being traversed, pointers that resolve locally target the decoded
//! bytes instead of the physical file. See
//! [`do_encoded`](crate::serializer::SerializerObject) for the traversal side.
//!
//! Encoders read exactly their own block from the input. The engine measures how many
//! source bytes were consumed and advances past them.

use crate::error::{BinError, Result};
use std::fmt;
use std::io::{self, Read};

/// Interface for block codecs.
pub trait BinaryEncoder: Send + Sync + fmt::Debug {
    /// Name used in logs, codec errors and virtual file kinds.
    fn name(&self) -> &str;

    /// Reads one encoded block from `input` and returns its decoded bytes.
    ///
    /// # Errors
    /// Returns [`BinError::Codec`] if the stream is corrupt or ends early.
    fn decode(&self, input: &mut dyn Read) -> Result<Vec<u8>>;

    /// Encodes `data` into one self-delimiting block.
    fn encode(&self, data: &[u8]) -> Result<Vec<u8>>;
}

/// Reader wrapper tracking the stream position for codec diagnostics.
struct CodecInput<'a> {
    inner: &'a mut dyn Read,
    position: u64,
    codec: &'static str,
}

impl<'a> CodecInput<'a> {
    /// Upper bound on what a length header alone may preallocate.
    const INITIAL_CAPACITY: usize = 64 * 1024;

    fn new(inner: &'a mut dyn Read, codec: &'static str) -> Self {
        Self {
            inner,
            position: 0,
            codec,
        }
    }

    fn error(&self, message: impl Into<String>) -> BinError {
        BinError::Codec {
            codec: self.codec.to_string(),
            position: self.position,
            message: message.into(),
        }
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        match self.inner.read_exact(buf) {
            Ok(()) => {
                self.position += buf.len() as u64;
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                Err(self.error(format!("stream ended early, {} more bytes expected", buf.len())))
            }
            Err(e) => Err(unwrap_io(e)),
        }
    }

    /// Reads `len` bytes, growing the buffer only as bytes actually arrive.
    fn read_block(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut block = Vec::with_capacity(len.min(Self::INITIAL_CAPACITY));
        (&mut *self.inner)
            .take(len as u64)
            .read_to_end(&mut block)
            .map_err(unwrap_io)?;
        self.position += block.len() as u64;
        if block.len() < len {
            return Err(self.error(format!(
                "stream ended early, {} more bytes expected",
                len - block.len()
            )));
        }
        Ok(block)
    }

    fn read_u8(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    fn read_u32_le(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }
}

/// Recovers an engine error tunneled through `io::Error`.
pub(crate) fn unwrap_io(err: io::Error) -> BinError {
    if err.get_ref().is_some_and(|inner| inner.is::<BinError>()) {
        if let Some(inner) = err.into_inner() {
            return match inner.downcast::<BinError>() {
                Ok(bin) => *bin,
                Err(other) => BinError::Io(std::sync::Arc::new(io::Error::other(other))),
            };
        }
        return BinError::Internal("io error lost its payload".into());
    }
    err.into()
}

fn header_len(len: usize, codec: &'static str) -> Result<u32> {
    u32::try_from(len).map_err(|_| BinError::Codec {
        codec: codec.to_string(),
        position: 0,
        message: format!("block of {len} bytes exceeds the 32-bit length header"),
    })
}

// --- LZ4 Implementation ---

#[cfg(feature = "lz4_flex")]
/// LZ4 block codec.
///
/// Layout: `[u32 LE decoded length][u32 LE encoded length][LZ4 block]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Lz4Encoder;

#[cfg(feature = "lz4_flex")]
impl Lz4Encoder {
    /// LZ4 expands one input byte into at most 255 output bytes.
    const MAX_RATIO: usize = 255;
}

#[cfg(feature = "lz4_flex")]
impl BinaryEncoder for Lz4Encoder {
    fn name(&self) -> &str {
        "LZ4"
    }

    fn decode(&self, input: &mut dyn Read) -> Result<Vec<u8>> {
        let mut input = CodecInput::new(input, "LZ4");
        let decoded_len = input.read_u32_le()? as usize;
        let encoded_len = input.read_u32_le()? as usize;

        let block = input.read_block(encoded_len)?;
        if decoded_len > block.len().saturating_mul(Self::MAX_RATIO) + Self::MAX_RATIO {
            return Err(input.error(format!(
                "declared length {decoded_len} cannot come from a {} byte block",
                block.len()
            )));
        }

        let decoded = lz4_flex::block::decompress(&block, decoded_len)
            .map_err(|e| input.error(e.to_string()))?;
        if decoded.len() != decoded_len {
            return Err(input.error(format!(
                "output length {} does not reach the declared {decoded_len}",
                decoded.len()
            )));
        }
        Ok(decoded)
    }

    fn encode(&self, data: &[u8]) -> Result<Vec<u8>> {
        let block = lz4_flex::block::compress(data);
        let mut out = Vec::with_capacity(block.len() + 8);
        out.extend_from_slice(&header_len(data.len(), "LZ4")?.to_le_bytes());
        out.extend_from_slice(&header_len(block.len(), "LZ4")?.to_le_bytes());
        out.extend_from_slice(&block);
        Ok(out)
    }
}

// --- Run-Length Encoding ---

/// Byte-oriented run-length codec.
///
/// Layout: `[u32 LE decoded length]` then packets. A control byte `c < 0x80` is
/// followed by `c + 1` literal bytes. A control byte `c >= 0x80` is followed by one
/// byte repeated `(c & 0x7F) + 1` times.
#[derive(Debug, Clone, Copy, Default)]
pub struct RleEncoder;

impl RleEncoder {
    const MAX_PACKET: usize = 0x80;
    const MIN_RUN: usize = 3;

    fn flush_literals(out: &mut Vec<u8>, literals: &mut Vec<u8>) {
        for chunk in literals.chunks(Self::MAX_PACKET) {
            out.push((chunk.len() - 1) as u8);
            out.extend_from_slice(chunk);
        }
        literals.clear();
    }
}

impl BinaryEncoder for RleEncoder {
    fn name(&self) -> &str {
        "RLE"
    }

    fn decode(&self, input: &mut dyn Read) -> Result<Vec<u8>> {
        let mut input = CodecInput::new(input, "RLE");
        let decoded_len = input.read_u32_le()? as usize;
        // Packets are validated as they arrive, so the header alone reserves little.
        let mut out = Vec::with_capacity(decoded_len.min(CodecInput::INITIAL_CAPACITY));

        while out.len() < decoded_len {
            let control = input.read_u8()?;
            let count = usize::from(control & 0x7F) + 1;
            if out.len() + count > decoded_len {
                return Err(input.error(format!(
                    "packet of {count} bytes overruns the decoded length {decoded_len}"
                )));
            }
            if control < 0x80 {
                let start = out.len();
                out.resize(start + count, 0);
                input.read_exact(&mut out[start..])?;
            } else {
                let value = input.read_u8()?;
                out.resize(out.len() + count, value);
            }
        }
        Ok(out)
    }

    fn encode(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(data.len() / 2 + 8);
        out.extend_from_slice(&header_len(data.len(), "RLE")?.to_le_bytes());

        let mut literals = Vec::new();
        let mut i = 0;
        while i < data.len() {
            let value = data[i];
            let run = data[i..]
                .iter()
                .take(Self::MAX_PACKET)
                .take_while(|&&b| b == value)
                .count();
            if run >= Self::MIN_RUN {
                Self::flush_literals(&mut out, &mut literals);
                out.push(0x80 | (run - 1) as u8);
                out.push(value);
                i += run;
            } else {
                literals.push(value);
                i += 1;
            }
        }
        Self::flush_literals(&mut out, &mut literals);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn rle_decodes_literal_and_repeat_packets() -> Result<()> {
        let stream = [5, 0, 0, 0, 0x01, b'a', b'b', 0x82, b'z', 0xEE];
        let mut cursor = Cursor::new(&stream[..]);
        let decoded = RleEncoder.decode(&mut cursor)?;
        assert_eq!(decoded, b"abzzz".to_vec());
        // Trailing bytes belong to the next field.
        assert_eq!(cursor.position(), 9);
        Ok(())
    }

    #[test]
    fn rle_round_trip_mixed_runs() -> Result<()> {
        let mut data = vec![1, 2, 3];
        data.extend(std::iter::repeat_n(7u8, 300));
        data.extend(0..=255u8);
        let encoded = RleEncoder.encode(&data)?;
        assert!(encoded.len() < data.len());
        assert_eq!(RleEncoder.decode(&mut Cursor::new(encoded))?, data);
        Ok(())
    }

    #[test]
    fn rle_overrun_is_a_codec_error() {
        let stream = [2, 0, 0, 0, 0x83, 0x00];
        let err = RleEncoder.decode(&mut Cursor::new(&stream[..])).unwrap_err();
        match err {
            BinError::Codec { codec, position, .. } => {
                assert_eq!(codec, "RLE");
                assert_eq!(position, 5);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn rle_truncated_stream_is_a_codec_error() {
        let stream = [4, 0, 0, 0, 0x03, b'a'];
        let err = RleEncoder.decode(&mut Cursor::new(&stream[..])).unwrap_err();
        assert!(matches!(err, BinError::Codec { .. }));
    }

    #[test]
    fn rle_huge_header_on_short_input_fails() {
        let stream = [0xFF, 0xFF, 0xFF, 0xFF, 0x81, 0x00];
        let err = RleEncoder.decode(&mut Cursor::new(&stream[..])).unwrap_err();
        assert!(matches!(err, BinError::Codec { position: 6, .. }));
    }

    #[cfg(feature = "lz4_flex")]
    #[test]
    fn lz4_huge_headers_on_short_input_fail() {
        let mut stream = Vec::new();
        stream.extend_from_slice(&16u32.to_le_bytes());
        stream.extend_from_slice(&u32::MAX.to_le_bytes());
        stream.extend_from_slice(&[0x10, b'a']);
        let err = Lz4Encoder.decode(&mut Cursor::new(stream)).unwrap_err();
        assert!(matches!(err, BinError::Codec { position: 10, .. }));

        let mut stream = Vec::new();
        stream.extend_from_slice(&u32::MAX.to_le_bytes());
        stream.extend_from_slice(&2u32.to_le_bytes());
        stream.extend_from_slice(&[0x10, b'a']);
        let err = Lz4Encoder.decode(&mut Cursor::new(stream)).unwrap_err();
        assert!(matches!(err, BinError::Codec { .. }));
    }

    #[cfg(feature = "lz4_flex")]
    #[test]
    fn lz4_round_trip_and_header() -> Result<()> {
        let data: Vec<u8> = b"binweave ".iter().copied().cycle().take(512).collect();
        let encoded = Lz4Encoder.encode(&data)?;
        assert_eq!(&encoded[0..4], &512u32.to_le_bytes());
        let block_len = u32::from_le_bytes([encoded[4], encoded[5], encoded[6], encoded[7]]);
        assert_eq!(block_len as usize, encoded.len() - 8);
        assert_eq!(Lz4Encoder.decode(&mut Cursor::new(encoded))?, data);
        Ok(())
    }

    #[cfg(feature = "lz4_flex")]
    #[test]
    fn lz4_corrupt_block_is_a_codec_error() {
        let mut stream = Vec::new();
        stream.extend_from_slice(&64u32.to_le_bytes());
        stream.extend_from_slice(&3u32.to_le_bytes());
        stream.extend_from_slice(&[0xF0, 0xFF, 0xFF]);
        let err = Lz4Encoder.decode(&mut Cursor::new(stream)).unwrap_err();
        assert!(matches!(err, BinError::Codec { ref codec, .. } if codec == "LZ4"));
    }
}
