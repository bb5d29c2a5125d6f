//! Resolved addresses.
//!
//! A [`Pointer`] names an absolute byte position inside one specific
//! [`BinaryFile`](crate::file::BinaryFile). For memory-mapped files the absolute offset
//! lives in the shared address space (`base_address + local offset`); for every other
//! file kind the absolute offset equals the local file offset.
//!
//! Pointers are immutable: arithmetic produces new pointers.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Add;
use std::sync::Arc;

/// A strong type identifying a file within one session.
///
/// Ids are never reused, so a pointer into a removed file can be detected.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(u32);

impl FileId {
    pub(crate) fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw numeric value.
    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Debug for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileId({})", self.0)
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Width of a serialized pointer field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PointerWidth {
    /// 16-bit pointer.
    U16,
    /// 32-bit pointer.
    #[default]
    U32,
    /// 64-bit pointer.
    U64,
}

impl PointerWidth {
    /// Size of the field in bytes.
    pub const fn bytes(self) -> usize {
        match self {
            Self::U16 => 2,
            Self::U32 => 4,
            Self::U64 => 8,
        }
    }
}

/// How a pointer field is laid out and validated.
#[derive(Debug, Clone, Default)]
pub struct PointerOptions {
    /// Field width.
    pub width: PointerWidth,
    /// Base the serialized value is relative to. `None` means absolute.
    pub anchor: Option<Pointer>,
    /// Unresolvable values decode to `None` instead of failing.
    pub allow_invalid: bool,
    /// Explicit sentinel for absent pointers. Without one, an absent pointer is written
    /// as `0` and a zero that resolves to no file decodes as absent.
    pub null_value: Option<i64>,
}

impl PointerOptions {
    /// Options for a field of the given width.
    pub fn width(width: PointerWidth) -> Self {
        Self {
            width,
            ..Self::default()
        }
    }

    /// Sets the anchor.
    pub fn anchored(mut self, anchor: Pointer) -> Self {
        self.anchor = Some(anchor);
        self
    }

    /// Allows unresolvable values.
    pub fn allow_invalid(mut self) -> Self {
        self.allow_invalid = true;
        self
    }

    /// Sets the raw value used for absent pointers.
    pub fn null_value(mut self, value: i64) -> Self {
        self.null_value = Some(value);
        self
    }
}

/// A typed, resolved reference to an absolute byte position within a file.
///
/// Equality and hashing use only the file identity and the absolute offset; the anchor
/// and width describe how the pointer was serialized, not where it points.
#[derive(Clone)]
pub struct Pointer {
    absolute_offset: i64,
    file: FileId,
    file_name: Arc<str>,
    base_address: i64,
    anchor: Option<Arc<Pointer>>,
    width: PointerWidth,
}

impl Pointer {
    pub(crate) fn new(
        file: FileId,
        file_name: Arc<str>,
        base_address: i64,
        absolute_offset: i64,
    ) -> Self {
        Self {
            absolute_offset,
            file,
            file_name,
            base_address,
            anchor: None,
            width: PointerWidth::default(),
        }
    }

    /// Absolute offset (address for memory-mapped files).
    pub fn absolute_offset(&self) -> i64 {
        self.absolute_offset
    }

    /// Offset relative to the start of the file.
    pub fn file_offset(&self) -> i64 {
        self.absolute_offset - self.base_address
    }

    /// The file this pointer targets.
    pub fn file(&self) -> FileId {
        self.file
    }

    /// Display name of the target file.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Base address of the target file.
    pub fn base_address(&self) -> i64 {
        self.base_address
    }

    /// Anchor the serialized value is relative to.
    pub fn anchor(&self) -> Option<&Pointer> {
        self.anchor.as_deref()
    }

    /// Width of the field this pointer was read from (or will be written to).
    pub fn width(&self) -> PointerWidth {
        self.width
    }

    /// The value as it appears on disk: absolute offset minus the anchor's.
    pub fn serialized_offset(&self) -> i64 {
        match &self.anchor {
            Some(anchor) => self.absolute_offset - anchor.absolute_offset,
            None => self.absolute_offset,
        }
    }

    /// Returns a copy with the given anchor.
    pub fn with_anchor(&self, anchor: Option<Pointer>) -> Self {
        Self {
            anchor: anchor.map(Arc::new),
            ..self.clone()
        }
    }

    /// Returns a copy with the given width.
    pub fn with_width(&self, width: PointerWidth) -> Self {
        Self {
            width,
            ..self.clone()
        }
    }

    /// Byte distance `self - origin`, if both point into the same file.
    pub fn offset_from(&self, origin: &Pointer) -> Option<i64> {
        (self.file == origin.file).then(|| self.absolute_offset - origin.absolute_offset)
    }

    /// Returns the same location re-expressed in another file, keeping the file offset.
    pub(crate) fn rebased(&self, file: FileId, file_name: Arc<str>, base_address: i64) -> Self {
        Self {
            absolute_offset: base_address + self.file_offset(),
            file,
            file_name,
            base_address,
            anchor: self.anchor.clone(),
            width: self.width,
        }
    }
}

impl Add<i64> for &Pointer {
    type Output = Pointer;

    fn add(self, rhs: i64) -> Pointer {
        Pointer {
            absolute_offset: self.absolute_offset + rhs,
            ..self.clone()
        }
    }
}

impl Add<i64> for Pointer {
    type Output = Pointer;

    fn add(mut self, rhs: i64) -> Pointer {
        self.absolute_offset += rhs;
        self
    }
}

impl PartialEq for Pointer {
    fn eq(&self, other: &Self) -> bool {
        self.file == other.file && self.absolute_offset == other.absolute_offset
    }
}

impl Eq for Pointer {}

impl Hash for Pointer {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.file.hash(state);
        self.absolute_offset.hash(state);
    }
}

impl PartialOrd for Pointer {
    /// Pointers into different files are unordered.
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        (self.file == other.file).then(|| self.absolute_offset.cmp(&other.absolute_offset))
    }
}

impl fmt::Display for Pointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|0x{:08X}", self.file_name, self.absolute_offset)?;
        if let Some(anchor) = &self.anchor {
            write!(f, "(0x{:08X} from 0x{:08X})", self.serialized_offset(), anchor.absolute_offset)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Pointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pointer({self})")
    }
}
