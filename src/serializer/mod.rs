//! The dual-mode serialization engine.
//!
//! A format author describes a structure once, as an ordered sequence of calls on a
//! [`SerializerObject`]. The same sequence decodes, encodes or measures the structure
//! depending on the engine's [`Mode`]:
//!
//! * **Decode** reads bytes at the cursor and returns the parsed value. The input value
//!   is ignored.
//! * **Encode** writes the input value at the cursor and returns it unchanged.
//! * **Size** advances the cursor without touching any storage.
//!
//! The trait itself is object safe and only carries the primitive operations. Typed
//! helpers (objects, arrays, strings, bit fields, processors, encoded blocks) are
//! inherent methods on `dyn SerializerObject`, so structure code always works with a
//! `&mut dyn SerializerObject`.

mod engine;
mod helpers;

pub use engine::Engine;

use crate::context::Context;
use crate::encoder::BinaryEncoder;
use crate::error::{Result, Warning};
use crate::pointer::{Pointer, PointerOptions};
use crate::primitives::Primitive;
use crate::processor::BinaryProcessor;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Direction of a traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mode {
    /// Bytes to objects.
    Decode,
    /// Objects to bytes.
    Encode,
    /// Cursor arithmetic only.
    Size,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Decode => f.write_str("decode"),
            Self::Encode => f.write_str("encode"),
            Self::Size => f.write_str("size"),
        }
    }
}

/// The engine interface structure traversals are written against.
pub trait SerializerObject {
    /// Direction of this engine.
    fn mode(&self) -> Mode;

    /// The owning session.
    fn context(&self) -> &Context;

    /// The owning session, mutably.
    fn context_mut(&mut self) -> &mut Context;

    /// Pointer at the cursor of the current file.
    ///
    /// # Errors
    /// Returns a context error before the first [`goto`](Self::goto).
    fn current_pointer(&self) -> Result<Pointer>;

    /// Makes `pointer`'s file current and moves its cursor to `pointer`.
    fn goto(&mut self, pointer: &Pointer) -> Result<()>;

    /// Moves the cursor of the current file by `count` bytes.
    fn skip(&mut self, count: i64) -> Result<()>;

    /// Nesting depth of the traversal, for logging.
    fn depth(&self) -> usize;

    /// Enters a nested structure.
    fn begin_scope(&mut self, name: &str);

    /// Leaves the innermost structure.
    fn end_scope(&mut self);

    /// Reads, writes or skips one primitive.
    fn serialize_primitive(&mut self, value: Primitive, name: &str) -> Result<Primitive>;

    /// Reads, writes or skips `count` raw bytes. `bytes` is resized to `count`.
    fn serialize_raw(&mut self, bytes: &mut Vec<u8>, count: usize, name: &str) -> Result<()>;

    /// Reads, writes or skips one pointer field.
    fn serialize_pointer(
        &mut self,
        value: Option<&Pointer>,
        options: &PointerOptions,
        name: &str,
    ) -> Result<Option<Pointer>>;

    /// Activates a processor. Every byte transferred until the matching
    /// [`end_processor`](Self::end_processor) passes through it.
    fn begin_processor(&mut self, processor: Box<dyn BinaryProcessor>);

    /// Deactivates the innermost processor and returns it.
    fn end_processor(&mut self) -> Result<Box<dyn BinaryProcessor>>;

    /// Holds back every byte written from now on from the active processors, which are
    /// suspended until [`end_deferred_writes`](Self::end_deferred_writes).
    ///
    /// Used on encode when a field must be patched before the processors may see it.
    fn begin_deferred_writes(&mut self);

    /// Restores the suspended processors. With `commit`, the held writes are passed
    /// through them in the order they were made and written again.
    fn end_deferred_writes(&mut self, commit: bool) -> Result<()>;

    /// Opens a virtual file for an encoded block starting at the cursor and moves into it.
    /// Returns the start of the virtual file.
    fn begin_encoded(&mut self, encoder: Arc<dyn BinaryEncoder>) -> Result<Pointer>;

    /// Closes the block opened at `start` and continues after it in the source file.
    fn end_encoded(&mut self, start: &Pointer) -> Result<()>;

    /// Discards the block opened at `start` after a failed traversal. Cache entries
    /// pointing into the block are evicted.
    fn abort_encoded(&mut self, start: &Pointer);

    /// Records a format warning. Fails if the session escalates warnings.
    fn warn(&mut self, warning: Warning) -> Result<()> {
        self.context_mut().warn(warning)
    }
}
