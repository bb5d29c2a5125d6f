//! Byte-level processors.
//!
//! A processor is installed around a region of traversal. Every byte read or written
//! while it is active passes through [`BinaryProcessor::process_bytes`]. Ciphers
//! transform the bytes in flight, and checksums only observe them.
//!
//! Processors see bytes as they are on disk. On decode, processors run in activation
//! order (outermost first). On encode they run in reverse order, so an outer checksum
//! around an inner cipher hashes the ciphertext in both directions.
//!
//! Processors implementing [`CalculatedValue`] can also produce a value that is stored in
//! the stream, such as a trailing checksum field. See
//! [`serialize_calculated`](crate::serializer::SerializerObject) for the two-phase
//! encode (reserve, traverse, backfill).

use crate::primitives::PrimitiveValue;
use crate::serializer::Mode;
use std::any::Any;
use std::fmt;
use std::hash::Hasher;
use twox_hash::XxHash64;

/// A byte interceptor active during a bracketed traversal region.
pub trait BinaryProcessor: Send + fmt::Debug + Any {
    /// Name used in logs and warnings.
    fn name(&self) -> &str;

    /// Observes or transforms `buffer`. On decode the buffer holds bytes just read,
    /// on encode it holds bytes about to be written.
    fn process_bytes(&mut self, buffer: &mut [u8], mode: Mode);

    /// Converts the boxed processor back into `Any` for downcasting.
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

/// A processor whose accumulated state is stored in the stream.
pub trait CalculatedValue: BinaryProcessor {
    /// Wire type of the stored value.
    type Value: PrimitiveValue;

    /// Value computed over the bytes processed so far.
    fn calculated_value(&self) -> Self::Value;
}

/// Where a calculated value is stored relative to the region it covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValuePlacement {
    /// A leading field. Encode reserves it and backfills after the region.
    Before,
    /// A trailing field, written once the region ends.
    After,
}

// --- Checksums ---

/// Additive 8-bit checksum: `sum(bytes) mod 256`.
#[derive(Debug, Clone, Default)]
pub struct Checksum8 {
    sum: u8,
}

impl Checksum8 {
    /// Creates a checksum starting at 0.
    pub fn new() -> Self {
        Self::default()
    }
}

impl BinaryProcessor for Checksum8 {
    fn name(&self) -> &str {
        "Checksum8"
    }

    fn process_bytes(&mut self, buffer: &mut [u8], _mode: Mode) {
        self.sum = buffer.iter().fold(self.sum, |acc, &b| acc.wrapping_add(b));
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

impl CalculatedValue for Checksum8 {
    type Value = u8;

    fn calculated_value(&self) -> u8 {
        self.sum
    }
}

/// Additive 16-bit checksum: `sum(bytes) mod 65536`.
#[derive(Debug, Clone, Default)]
pub struct Checksum16 {
    sum: u16,
}

impl Checksum16 {
    /// Creates a checksum starting at 0.
    pub fn new() -> Self {
        Self::default()
    }
}

impl BinaryProcessor for Checksum16 {
    fn name(&self) -> &str {
        "Checksum16"
    }

    fn process_bytes(&mut self, buffer: &mut [u8], _mode: Mode) {
        self.sum = buffer
            .iter()
            .fold(self.sum, |acc, &b| acc.wrapping_add(u16::from(b)));
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

impl CalculatedValue for Checksum16 {
    type Value = u16;

    fn calculated_value(&self) -> u16 {
        self.sum
    }
}

/// XOR of all bytes.
#[derive(Debug, Clone, Default)]
pub struct XorChecksum8 {
    value: u8,
}

impl XorChecksum8 {
    /// Creates a checksum starting at 0.
    pub fn new() -> Self {
        Self::default()
    }
}

impl BinaryProcessor for XorChecksum8 {
    fn name(&self) -> &str {
        "XorChecksum8"
    }

    fn process_bytes(&mut self, buffer: &mut [u8], _mode: Mode) {
        self.value = buffer.iter().fold(self.value, |acc, &b| acc ^ b);
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

impl CalculatedValue for XorChecksum8 {
    type Value = u8;

    fn calculated_value(&self) -> u8 {
        self.value
    }
}

/// 64-bit xxHash of the processed bytes.
pub struct XxHash64Checksum {
    seed: u64,
    hasher: XxHash64,
}

impl XxHash64Checksum {
    /// Creates a hasher with the given seed.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            seed,
            hasher: XxHash64::with_seed(seed),
        }
    }
}

impl Default for XxHash64Checksum {
    fn default() -> Self {
        Self::with_seed(0)
    }
}

impl fmt::Debug for XxHash64Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("XxHash64Checksum")
            .field("seed", &self.seed)
            .field("current", &self.hasher.finish())
            .finish()
    }
}

impl BinaryProcessor for XxHash64Checksum {
    fn name(&self) -> &str {
        "XxHash64"
    }

    fn process_bytes(&mut self, buffer: &mut [u8], _mode: Mode) {
        self.hasher.write(buffer);
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

impl CalculatedValue for XxHash64Checksum {
    type Value = u64;

    fn calculated_value(&self) -> u64 {
        self.hasher.finish()
    }
}

// --- Ciphers ---

/// Single-byte XOR cipher.
#[derive(Debug, Clone, Copy)]
pub struct Xor8 {
    key: u8,
}

impl Xor8 {
    /// Creates a cipher with `key`.
    pub fn new(key: u8) -> Self {
        Self { key }
    }
}

impl BinaryProcessor for Xor8 {
    fn name(&self) -> &str {
        "Xor8"
    }

    fn process_bytes(&mut self, buffer: &mut [u8], _mode: Mode) {
        for b in buffer.iter_mut() {
            *b ^= self.key;
        }
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

/// XOR cipher with a repeating multi-byte key. The key position carries across calls.
#[derive(Debug, Clone)]
pub struct XorArray {
    key: Vec<u8>,
    position: usize,
}

impl XorArray {
    /// Creates a cipher with `key`. An empty key leaves bytes untouched.
    pub fn new(key: Vec<u8>) -> Self {
        Self { key, position: 0 }
    }
}

impl BinaryProcessor for XorArray {
    fn name(&self) -> &str {
        "XorArray"
    }

    fn process_bytes(&mut self, buffer: &mut [u8], _mode: Mode) {
        if self.key.is_empty() {
            return;
        }
        for b in buffer.iter_mut() {
            *b ^= self.key[self.position % self.key.len()];
            self.position = (self.position + 1) % self.key.len();
        }
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}
