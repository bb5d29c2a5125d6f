//! Runtime support for `#[derive(BinaryObject)]`.
//!
//! Derived traversals call [`Field::serialize_field`] on every field in declaration
//! order. Implement it for your own field types to use them in derived structures.

use crate::cache::ObjRef;
use crate::error::Result;
use crate::object::{BinarySerializable, Ptr};
use crate::pointer::{Pointer, PointerOptions};
use crate::primitives::U24;
use crate::serializer::SerializerObject;

/// A value that knows how to traverse itself as one field of a structure.
pub trait Field {
    /// Reads, writes or skips the field.
    fn serialize_field(&mut self, s: &mut dyn SerializerObject, name: &str) -> Result<()>;
}

macro_rules! impl_primitive_field {
    ($($t:ty),*) => {
        $(
            impl Field for $t {
                fn serialize_field(&mut self, s: &mut dyn SerializerObject, name: &str) -> Result<()> {
                    *self = s.serialize(*self, name)?;
                    Ok(())
                }
            }
        )*
    };
}

impl_primitive_field!(bool, i8, u8, i16, u16, U24, i32, u32, i64, u64, f32, f64, Option<u8>);

impl<T: Field, const N: usize> Field for [T; N] {
    fn serialize_field(&mut self, s: &mut dyn SerializerObject, name: &str) -> Result<()> {
        for item in self.iter_mut() {
            item.serialize_field(s, name)?;
        }
        Ok(())
    }
}

/// A 32-bit absolute pointer.
impl Field for Option<Pointer> {
    fn serialize_field(&mut self, s: &mut dyn SerializerObject, name: &str) -> Result<()> {
        *self = s.serialize_pointer(self.as_ref(), &PointerOptions::default(), name)?;
        Ok(())
    }
}

/// A 32-bit absolute pointer, followed immediately to its target.
impl<T: BinarySerializable> Field for Ptr<T> {
    fn serialize_field(&mut self, s: &mut dyn SerializerObject, name: &str) -> Result<()> {
        self.serialize(s, &PointerOptions::default(), name)?;
        self.resolve(s, name)?;
        Ok(())
    }
}

/// A cached structure embedded at the cursor.
impl<T: BinarySerializable> Field for Option<ObjRef<T>> {
    fn serialize_field(&mut self, s: &mut dyn SerializerObject, name: &str) -> Result<()> {
        *self = Some(s.serialize_object(*self, name)?);
        Ok(())
    }
}
