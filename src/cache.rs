//! The object identity cache.
//!
//! Acts as an arena for every structure instance materialized by a session. Instances
//! are addressed by typed [`ObjRef`] handles instead of references, so a partially
//! decoded instance can be handed out (and compared for identity) while its own
//! traversal is still running. That is what makes cyclic pointer graphs terminate.
//!
//! Decode consults the `(type, pointer)` index before materializing anything. Encode
//! tracks which handles were already written during the current pass.

use crate::error::{BinError, Result};
use crate::pointer::{FileId, Pointer};
use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

/// Typed handle to a structure instance owned by a session.
///
/// Two handles are equal iff they name the same instance.
pub struct ObjRef<T> {
    index: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ObjRef<T> {
    fn new(index: u32) -> Self {
        Self {
            index,
            _marker: PhantomData,
        }
    }

    /// Returns the arena slot index.
    pub fn index(&self) -> u32 {
        self.index
    }
}

impl<T> Clone for ObjRef<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ObjRef<T> {}

impl<T> PartialEq for ObjRef<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl<T> Eq for ObjRef<T> {}

impl<T> Hash for ObjRef<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
    }
}

impl<T> fmt::Debug for ObjRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjRef<{}>({})", short_type_name::<T>(), self.index)
    }
}

fn short_type_name<T>() -> &'static str {
    let full = std::any::type_name::<T>();
    full.rsplit("::").next().unwrap_or(full)
}

struct Slot {
    /// `None` while the instance is out for traversal.
    value: Option<Box<dyn Any + Send>>,
    type_name: &'static str,
    offset: Option<Pointer>,
    size: Option<i64>,
}

/// Arena of structure instances plus the `(type, pointer)` identity index.
#[derive(Default)]
pub struct ObjectCache {
    slots: Vec<Slot>,
    by_pointer: HashMap<(TypeId, Pointer), u32>,
    written: HashSet<u32>,
}

impl fmt::Debug for ObjectCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectCache")
            .field("objects", &self.slots.len())
            .field("indexed", &self.by_pointer.len())
            .finish()
    }
}

impl ObjectCache {
    /// Stores a new instance. With an offset, it is also indexed for identity lookup.
    pub fn insert<T: Any + Send>(&mut self, value: T, offset: Option<Pointer>) -> ObjRef<T> {
        let index = u32::try_from(self.slots.len()).unwrap_or(u32::MAX);
        if let Some(ptr) = &offset {
            self.by_pointer.insert((TypeId::of::<T>(), ptr.clone()), index);
        }
        self.slots.push(Slot {
            value: Some(Box::new(value)),
            type_name: std::any::type_name::<T>(),
            offset,
            size: None,
        });
        ObjRef::new(index)
    }

    /// Finds the instance of type `T` materialized at `pointer`.
    pub fn lookup<T: Any>(&self, pointer: &Pointer) -> Option<ObjRef<T>> {
        self.by_pointer
            .get(&(TypeId::of::<T>(), pointer.clone()))
            .map(|&index| ObjRef::new(index))
    }

    /// Borrows an instance. `None` while the instance is being traversed.
    pub fn get<T: Any>(&self, obj: ObjRef<T>) -> Option<&T> {
        self.slot(obj.index)
            .and_then(|s| s.value.as_ref())
            .and_then(|v| v.downcast_ref::<T>())
    }

    /// Mutably borrows an instance.
    pub fn get_mut<T: Any>(&mut self, obj: ObjRef<T>) -> Option<&mut T> {
        self.slots
            .get_mut(obj.index as usize)
            .and_then(|s| s.value.as_mut())
            .and_then(|v| v.downcast_mut::<T>())
    }

    /// Offset the instance was last decoded from or encoded to.
    pub fn offset<T>(&self, obj: ObjRef<T>) -> Option<&Pointer> {
        self.slot(obj.index).and_then(|s| s.offset.as_ref())
    }

    /// Byte size measured by the instance's last complete traversal.
    pub fn size<T>(&self, obj: ObjRef<T>) -> Option<i64> {
        self.slot(obj.index).and_then(|s| s.size)
    }

    /// Number of instances ever allocated.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// True if nothing was allocated.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Instance counts per type name.
    pub fn type_summary(&self) -> BTreeMap<&'static str, usize> {
        let mut summary = BTreeMap::new();
        for slot in &self.slots {
            *summary.entry(slot.type_name).or_insert(0) += 1;
        }
        summary
    }

    fn slot(&self, index: u32) -> Option<&Slot> {
        self.slots.get(index as usize)
    }

    fn slot_mut(&mut self, index: u32) -> Result<&mut Slot> {
        self.slots
            .get_mut(index as usize)
            .ok_or_else(|| BinError::Internal(format!("object slot {index} out of bounds")))
    }

    /// Records where the instance now lives and re-indexes it there.
    pub(crate) fn set_offset<T: Any>(&mut self, obj: ObjRef<T>, offset: Pointer) -> Result<()> {
        self.unindex(obj);
        self.slot_mut(obj.index)?.offset = Some(offset.clone());
        self.by_pointer.insert((TypeId::of::<T>(), offset), obj.index);
        Ok(())
    }

    pub(crate) fn set_size<T>(&mut self, obj: ObjRef<T>, size: i64) -> Result<()> {
        self.slot_mut(obj.index)?.size = Some(size);
        Ok(())
    }

    /// Moves the instance out of its slot for traversal.
    pub(crate) fn take<T: Any>(&mut self, obj: ObjRef<T>) -> Result<Box<dyn Any + Send>> {
        let slot = self.slot_mut(obj.index)?;
        slot.value.take().ok_or_else(|| {
            BinError::Internal(format!(
                "{} #{} is already being traversed",
                slot.type_name, obj.index
            ))
        })
    }

    pub(crate) fn restore<T>(&mut self, obj: ObjRef<T>, value: Box<dyn Any + Send>) -> Result<()> {
        self.slot_mut(obj.index)?.value = Some(value);
        Ok(())
    }

    pub(crate) fn begin_encode_pass(&mut self) {
        self.written.clear();
    }

    pub(crate) fn mark_written<T>(&mut self, obj: ObjRef<T>) {
        self.written.insert(obj.index);
    }

    pub(crate) fn is_written<T>(&self, obj: ObjRef<T>) -> bool {
        self.written.contains(&obj.index)
    }

    /// Drops the identity entry of an instance whose decode failed. The slot stays
    /// allocated so outstanding handles remain valid.
    pub(crate) fn unindex<T: Any>(&mut self, obj: ObjRef<T>) {
        if let Some(ptr) = self.slot(obj.index).and_then(|s| s.offset.clone()) {
            let key = (TypeId::of::<T>(), ptr);
            if self.by_pointer.get(&key) == Some(&obj.index) {
                self.by_pointer.remove(&key);
            }
        }
    }

    /// Drops identity entries for instances decoded from `file`.
    pub(crate) fn evict_file(&mut self, file: FileId) -> usize {
        let before = self.by_pointer.len();
        self.by_pointer.retain(|(_, ptr), _| ptr.file() != file);
        before - self.by_pointer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn ptr(file: u32, offset: i64) -> Pointer {
        Pointer::new(FileId::new(file), Arc::from("f"), 0, offset)
    }

    #[derive(Debug, Default, PartialEq)]
    struct Header(u32);

    #[derive(Debug, Default)]
    struct Other;

    #[test]
    fn identity_is_per_type_and_pointer() {
        let mut cache = ObjectCache::default();
        let a = cache.insert(Header(1), Some(ptr(0, 0x10)));

        assert_eq!(cache.lookup::<Header>(&ptr(0, 0x10)), Some(a));
        assert!(cache.lookup::<Other>(&ptr(0, 0x10)).is_none());
        assert!(cache.lookup::<Header>(&ptr(0, 0x14)).is_none());
        assert_eq!(cache.get(a), Some(&Header(1)));
    }

    #[test]
    fn taken_instances_are_invisible_until_restored() -> Result<()> {
        let mut cache = ObjectCache::default();
        let a = cache.insert(Header(7), None);
        let boxed = cache.take(a)?;
        assert!(cache.get(a).is_none());
        assert!(cache.take(a).is_err());
        cache.restore(a, boxed)?;
        assert_eq!(cache.get(a), Some(&Header(7)));
        Ok(())
    }

    #[test]
    fn evicting_a_file_keeps_instances_alive() {
        let mut cache = ObjectCache::default();
        let a = cache.insert(Header(1), Some(ptr(3, 0)));
        let b = cache.insert(Header(2), Some(ptr(4, 0)));
        assert_eq!(cache.evict_file(FileId::new(3)), 1);
        assert!(cache.lookup::<Header>(&ptr(3, 0)).is_none());
        assert_eq!(cache.lookup::<Header>(&ptr(4, 0)), Some(b));
        assert_eq!(cache.get(a), Some(&Header(1)));
    }
}
