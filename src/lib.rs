//! # Binweave
//!
//! A framework for declaratively describing, reading and writing arbitrary binary file
//! formats, aimed at reverse-engineering and modding work on game data and similar
//! undocumented formats.
//!
//! ## Overview
//!
//! A structure type describes its own byte layout exactly once, in a single
//! [`BinarySerializable::serialize_impl`] method. The same method runs under three
//! engines that share one interface:
//!
//! *   **Decode:** reads bytes from a file and fills the structure.
//! *   **Encode:** writes the structure back, byte-identical when unmodified.
//! *   **Size:** walks the layout without I/O to measure it.
//!
//! Because the description is executed rather than declared, layouts can branch on
//! already-read fields, follow pointers into other files, wrap regions in checksums or
//! XOR ciphers, and step into compressed blocks, all in the same linear code.
//!
//! ## Core Concepts
//!
//! ### Sessions
//!
//! A [`Context`] holds the files of one session, the shared address space of
//! memory-mapped files, the [`ObjectCache`] of materialized structures, typed settings
//! and the [`Warning`] diagnostics. Structures are referenced through [`ObjRef`] handles
//! into the cache, so cyclic or shared pointer graphs resolve to a single instance.
//!
//! ### Pointers
//!
//! A [`Pointer`] names an absolute address and the file it lies in. Raw pointer values
//! read from linear files are file offsets; values read from memory-mapped files are
//! resolved against every mapped file, the highest base address winning.
//!
//! ### Processors and Encoders
//!
//! A [`BinaryProcessor`] observes or transforms every byte of a region (checksums,
//! XOR). A [`BinaryEncoder`] turns a compressed region into a virtual file that is
//! traversed like any other ([`Lz4Encoder`], [`RleEncoder`]).
//!
//! ## Usage
//!
//! ```rust
//! use binweave::{BinaryFile, BinaryObject, Context, MemoryFileSystem};
//! use std::sync::Arc;
//!
//! #[derive(Debug, Default, BinaryObject)]
//! struct Header {
//!     magic: u32,
//!     version: u16,
//!     flags: u16,
//! }
//!
//! let mut ctx = Context::builder("").file_system(Arc::new(MemoryFileSystem::new())).build();
//! let file = ctx
//!     .add_file(BinaryFile::stream("save", vec![0x53, 0x41, 0x56, 0x45, 2, 0, 0, 0]))
//!     .unwrap();
//!
//! let header = ctx.read_root::<Header>(file).unwrap();
//! assert_eq!(ctx.get(header).unwrap().version, 2);
//!
//! ctx.get_mut(header).unwrap().flags = 1;
//! ctx.write_root(header).unwrap();
//! assert_eq!(ctx.file(file).unwrap().bytes().unwrap()[6], 1);
//! ```
//!
//! ## Safety and Error Handling
//!
//! * **No Unsafe:** the crate forbids `unsafe` code outside the memory map in [`fs`].
//! * **No Panics:** no `unwrap()` or `panic!()` in the library (enforced by clippy lints).
//! * **Errors and Warnings:** hard failures are [`BinError`]s; recoverable format
//!   violations are [`Warning`]s, logged and recorded, or escalated on request.

#![deny(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]
#![warn(missing_docs)]

extern crate self as binweave;

// --- PUBLIC API MODULES ---
pub mod bits;
pub mod cache;
pub mod context;
pub mod encoder;
pub mod error;
pub mod file;
pub mod fs;
pub mod inspector;
pub mod object;
pub mod pointer;
pub mod primitives;
pub mod processor;
pub mod region;
pub mod serializer;

// --- MACRO SUPPORT MODULES ---

/// Runtime utilities used by the derived code.
#[doc(hidden)]
pub mod rt;

// --- RE-EXPORTS ---

pub use bits::{BitContainer, BitOrder, BitSerializer, BitValue};
pub use cache::{ObjRef, ObjectCache};
pub use context::{Context, ContextBuilder, ContextSettings};
#[cfg(feature = "lz4_flex")]
pub use encoder::Lz4Encoder;
pub use encoder::{BinaryEncoder, RleEncoder};
pub use error::{BinError, Result, Warning};
pub use file::{BinaryFile, FileKind, PointerRedirect};
pub use fs::{FileSystem, MemoryFileSystem, StdFileSystem};
pub use inspector::{SessionInspector, SessionReport};
pub use object::{BinarySerializable, Ptr};
pub use pointer::{FileId, Pointer, PointerOptions, PointerWidth};
pub use primitives::{Endian, NULLABLE_U8_NONE, Primitive, PrimitiveKind, PrimitiveValue, StringEncoding, U24};
pub use processor::{
    BinaryProcessor, CalculatedValue, Checksum8, Checksum16, ValuePlacement, Xor8, XorArray,
    XorChecksum8, XxHash64Checksum,
};
pub use region::{Region, RegionMap};
pub use serializer::{Engine, Mode, SerializerObject};

/// Derives [`BinarySerializable`] for a struct whose fields are traversed in
/// declaration order. Fields marked `#[bin(skip)]` are left untouched.
pub use binweave_derive::BinaryObject;
