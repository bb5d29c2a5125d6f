//! Self-describing structures.
//!
//! A structure type supplies exactly one method, [`BinarySerializable::serialize_impl`],
//! that performs its ordered field operations on the engine. The method is symmetric
//! across decode, encode and size passes by construction.
//!
//! ```rust
//! use binweave::{BinarySerializable, Result, SerializerObject};
//!
//! #[derive(Debug, Default)]
//! struct Header {
//!     magic: u32,
//!     count: u16,
//!     entries: Vec<u16>,
//! }
//!
//! impl BinarySerializable for Header {
//!     fn serialize_impl(&mut self, s: &mut dyn SerializerObject) -> Result<()> {
//!         self.magic = s.serialize(self.magic, "magic")?;
//!         self.count = s.serialize(self.count, "count")?;
//!         s.serialize_array(&mut self.entries, usize::from(self.count), "entries")
//!     }
//! }
//! ```

use crate::cache::ObjRef;
use crate::error::Result;
use crate::pointer::{Pointer, PointerOptions};
use crate::serializer::{Mode, SerializerObject};
use std::any::Any;
use std::fmt;

/// A structure with an explicitly declared byte layout.
pub trait BinarySerializable: Any + Send + Default {
    /// Performs the structure's field operations in wire order.
    fn serialize_impl(&mut self, s: &mut dyn SerializerObject) -> Result<()>;
}

/// A pointer field together with the structure it targets.
pub struct Ptr<T> {
    /// The pointer as read (decode) or to be written (encode).
    pub pointer: Option<Pointer>,
    /// The target structure once resolved.
    pub value: Option<ObjRef<T>>,
}

impl<T> Default for Ptr<T> {
    fn default() -> Self {
        Self {
            pointer: None,
            value: None,
        }
    }
}

impl<T> Clone for Ptr<T> {
    fn clone(&self) -> Self {
        Self {
            pointer: self.pointer.clone(),
            value: self.value,
        }
    }
}

impl<T> fmt::Debug for Ptr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ptr")
            .field("pointer", &self.pointer)
            .field("value", &self.value)
            .finish()
    }
}

impl<T> PartialEq for Ptr<T> {
    fn eq(&self, other: &Self) -> bool {
        self.pointer == other.pointer && self.value == other.value
    }
}

impl<T: BinarySerializable> Ptr<T> {
    /// A typed pointer to `pointer`, unresolved.
    pub fn new(pointer: Option<Pointer>) -> Self {
        Self {
            pointer,
            value: None,
        }
    }

    /// Reads or writes the pointer field.
    ///
    /// On encode, a resolved target that has already been laid out in the session is
    /// addressed at its current offset instead of the stored pointer.
    pub fn serialize(
        &mut self,
        s: &mut dyn SerializerObject,
        options: &PointerOptions,
        name: &str,
    ) -> Result<()> {
        let target = match (s.mode(), self.value) {
            (Mode::Encode, Some(obj)) => s
                .context()
                .cache()
                .offset(obj)
                .cloned()
                .or_else(|| self.pointer.clone()),
            _ => self.pointer.clone(),
        };
        self.pointer = s.serialize_pointer(target.as_ref(), options, name)?;
        Ok(())
    }

    /// Materializes (decode) or writes (encode) the target at the pointer. The cursor is
    /// left where it was. Size passes do not follow pointers.
    pub fn resolve(&mut self, s: &mut dyn SerializerObject, name: &str) -> Result<Option<ObjRef<T>>> {
        if s.mode() == Mode::Size {
            return Ok(self.value);
        }
        let Some(pointer) = self.pointer.clone() else {
            if s.mode() == Mode::Decode {
                self.value = None;
            }
            return Ok(self.value);
        };
        let current = self.value;
        if s.mode() == Mode::Encode && current.is_none() {
            return Ok(None);
        }
        self.value = s.do_at(Some(&pointer), |s| s.serialize_object::<T>(current, name))?;
        Ok(self.value)
    }
}
