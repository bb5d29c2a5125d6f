//! Bit-packing sub-protocol.
//!
//! A bit-field group is a fixed-width container (8, 16, 24, 32 or 64 bits) holding a
//! sequence of sub-byte fields. Decode reads the container once and extracts each field.
//! Encode merges each field into an accumulator and writes the container once at the end.
//! Both directions run the same closure, so the field list cannot drift between them.
//!
//! ```rust
//! use binweave::bits::{BitOrder, BitSerializer};
//! use binweave::serializer::Mode;
//!
//! let mut bits = BitSerializer::new(Mode::Decode, BitOrder::MsbFirst, 8, 0b1011_0001, "doc");
//! assert_eq!(bits.serialize_bits(0u8, 3, "kind").unwrap(), 0b101);
//! assert!(bits.serialize_bool(false, "flag").unwrap());
//! assert_eq!(bits.serialize_bits(0u8, 4, "level").unwrap(), 0b0001);
//! ```

use crate::error::{BinError, Result};
use crate::primitives::{PrimitiveValue, U24};
use crate::serializer::Mode;
use serde::{Deserialize, Serialize};

/// Order in which fields are allocated inside the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BitOrder {
    /// The first field occupies the most significant bits.
    #[default]
    MsbFirst,
    /// The first field occupies the least significant bits.
    LsbFirst,
}

/// A primitive usable as a bit-field container.
pub trait BitContainer: PrimitiveValue {
    /// Container width in bits.
    const BITS: u32;

    /// Widens the container to 64 bits.
    fn to_bits(self) -> u64;

    /// Narrows 64 bits to the container (upper bits are dropped).
    fn from_bits(bits: u64) -> Self;
}

macro_rules! impl_bit_container {
    ($($t:ty),*) => {
        $(
            impl BitContainer for $t {
                const BITS: u32 = <$t>::BITS;

                fn to_bits(self) -> u64 {
                    u64::from(self)
                }

                fn from_bits(bits: u64) -> Self {
                    bits as $t
                }
            }
        )*
    };
}

impl_bit_container!(u8, u16, u32, u64);

impl BitContainer for U24 {
    const BITS: u32 = 24;

    fn to_bits(self) -> u64 {
        u64::from(self.value())
    }

    fn from_bits(bits: u64) -> Self {
        U24::truncating(bits as u32)
    }
}

/// A Rust type a bit field can be decoded into.
pub trait BitValue: Copy {
    /// Raw bits of the value.
    fn to_raw(self) -> u64;

    /// Builds the value from extracted bits.
    fn from_raw(raw: u64) -> Self;
}

impl BitValue for bool {
    fn to_raw(self) -> u64 {
        u64::from(self)
    }

    fn from_raw(raw: u64) -> Self {
        raw != 0
    }
}

macro_rules! impl_bit_value {
    ($($t:ty),*) => {
        $(
            impl BitValue for $t {
                fn to_raw(self) -> u64 {
                    u64::from(self)
                }

                fn from_raw(raw: u64) -> Self {
                    raw as $t
                }
            }
        )*
    };
}

impl_bit_value!(u8, u16, u32, u64);

fn mask(length: u32) -> u64 {
    if length >= 64 {
        u64::MAX
    } else {
        (1u64 << length) - 1
    }
}

/// Field cursor over one container value.
#[derive(Debug)]
pub struct BitSerializer {
    mode: Mode,
    order: BitOrder,
    width: u32,
    value: u64,
    position: u32,
    location: String,
    log_fields: bool,
}

impl BitSerializer {
    /// Starts a group over a container of `width` bits. `value` is the container read in
    /// decode mode and ignored otherwise.
    pub fn new(
        mode: Mode,
        order: BitOrder,
        width: u32,
        value: u64,
        location: impl Into<String>,
    ) -> Self {
        let value = match mode {
            Mode::Decode => value & mask(width),
            Mode::Encode | Mode::Size => 0,
        };
        Self {
            mode,
            order,
            width,
            value,
            position: 0,
            location: location.into(),
            log_fields: false,
        }
    }

    pub(crate) fn with_field_logging(mut self, enabled: bool) -> Self {
        self.log_fields = enabled;
        self
    }

    /// Bits consumed so far.
    pub fn position(&self) -> u32 {
        self.position
    }

    /// Bits left in the container.
    pub fn remaining(&self) -> u32 {
        self.width - self.position
    }

    /// Accumulated container value.
    pub fn value(&self) -> u64 {
        self.value
    }

    fn shift_for(&self, length: u32) -> u32 {
        match self.order {
            BitOrder::MsbFirst => self.width - self.position - length,
            BitOrder::LsbFirst => self.position,
        }
    }

    /// Reads or writes a `length`-bit field.
    ///
    /// Decode returns the extracted bits and ignores `value`. Encode merges `value` and
    /// returns it. A field that does not fit in the remaining bits, or an encoded value
    /// wider than `length`, is a format error.
    pub fn serialize_bits<T: BitValue>(&mut self, value: T, length: u32, name: &str) -> Result<T> {
        if length == 0 || length > self.remaining() {
            return Err(BinError::Format(format!(
                "bit field '{name}' of {length} bits at bit {} overflows the {}-bit container at {}",
                self.position, self.width, self.location
            )));
        }
        let shift = self.shift_for(length);
        let field_mask = mask(length);

        let result = match self.mode {
            Mode::Decode => T::from_raw((self.value >> shift) & field_mask),
            Mode::Encode => {
                let raw = value.to_raw();
                if raw & !field_mask != 0 {
                    return Err(BinError::Format(format!(
                        "value 0x{raw:X} of bit field '{name}' does not fit in {length} bits at {}",
                        self.location
                    )));
                }
                self.value |= raw << shift;
                value
            }
            Mode::Size => value,
        };

        if self.log_fields {
            tracing::trace!(
                location = %self.location,
                bit = self.position,
                length,
                field = name,
                raw = (result.to_raw()),
                "bits"
            );
        }
        self.position += length;
        Ok(result)
    }

    /// Reads or writes a one-bit flag.
    pub fn serialize_bool(&mut self, value: bool, name: &str) -> Result<bool> {
        self.serialize_bits(value, 1, name)
    }

    /// Skips `length` reserved bits. They are written as zero.
    pub fn padding(&mut self, length: u32) -> Result<()> {
        self.serialize_bits(0u64, length, "padding").map(|_| ())
    }

    /// Non-zero bits the traversal never consumed, if any (decode only).
    pub fn unconsumed(&self) -> Option<u64> {
        if self.mode != Mode::Decode || self.remaining() == 0 {
            return None;
        }
        let rest = match self.order {
            BitOrder::MsbFirst => self.value & mask(self.remaining()),
            BitOrder::LsbFirst => self.value >> self.position,
        };
        (rest != 0).then_some(rest)
    }

    pub(crate) fn location(&self) -> &str {
        &self.location
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pack(order: BitOrder, fields: &[(u64, u32)]) -> Result<u64> {
        let mut bits = BitSerializer::new(Mode::Encode, order, 32, 0, "test");
        for (i, &(value, length)) in fields.iter().enumerate() {
            bits.serialize_bits(value, length, &format!("f{i}"))?;
        }
        Ok(bits.value())
    }

    fn unpack(order: BitOrder, container: u64, lengths: &[u32]) -> Result<Vec<u64>> {
        let mut bits = BitSerializer::new(Mode::Decode, order, 32, container, "test");
        lengths
            .iter()
            .map(|&length| bits.serialize_bits(0u64, length, "f"))
            .collect()
    }

    #[test]
    fn msb_first_layout() -> Result<()> {
        let packed = pack(BitOrder::MsbFirst, &[(0b1, 1), (0x7F, 7), (0xABCD, 16)])?;
        assert_eq!(packed, 0xFFAB_CD00);
        Ok(())
    }

    #[test]
    fn lsb_first_layout() -> Result<()> {
        let packed = pack(BitOrder::LsbFirst, &[(0b1, 1), (0x3, 2)])?;
        assert_eq!(packed, 0b111);
        Ok(())
    }

    #[test]
    fn boundary_values_round_trip() -> Result<()> {
        let lengths = [1, 5, 10, 16];
        for order in [BitOrder::MsbFirst, BitOrder::LsbFirst] {
            for fill_max in [false, true] {
                let values: Vec<(u64, u32)> = lengths
                    .iter()
                    .map(|&l| (if fill_max { mask(l) } else { 0 }, l))
                    .collect();
                let packed = pack(order, &values)?;
                let unpacked = unpack(order, packed, &lengths)?;
                let expected: Vec<u64> = values.iter().map(|&(v, _)| v).collect();
                assert_eq!(unpacked, expected, "{order:?} max={fill_max}");
            }
        }
        Ok(())
    }

    #[test]
    fn overflowing_the_container_fails() {
        let mut bits = BitSerializer::new(Mode::Decode, BitOrder::MsbFirst, 8, 0, "test");
        assert!(bits.serialize_bits(0u8, 6, "a").is_ok());
        assert!(matches!(
            bits.serialize_bits(0u8, 3, "b"),
            Err(BinError::Format(_))
        ));
    }

    #[test]
    fn value_wider_than_field_fails_on_encode() {
        let mut bits = BitSerializer::new(Mode::Encode, BitOrder::MsbFirst, 8, 0, "test");
        assert!(matches!(
            bits.serialize_bits(0b100u8, 2, "narrow"),
            Err(BinError::Format(_))
        ));
    }

    #[test]
    fn unconsumed_bits_are_reported() -> Result<()> {
        let mut bits = BitSerializer::new(Mode::Decode, BitOrder::MsbFirst, 8, 0b1000_0001, "test");
        bits.serialize_bool(false, "flag")?;
        assert_eq!(bits.unconsumed(), Some(1));

        let mut clean = BitSerializer::new(Mode::Decode, BitOrder::MsbFirst, 8, 0b1000_0000, "test");
        clean.serialize_bool(false, "flag")?;
        assert_eq!(clean.unconsumed(), None);
        Ok(())
    }
}
