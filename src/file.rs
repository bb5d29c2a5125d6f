//! Addressable files.
//!
//! A [`BinaryFile`] is one independently addressed region of bytes: a physical file on
//! disk, a fixed-address memory dump, an in-memory buffer, or a virtual file holding the
//! decoded form of a compressed block. Files are created by the caller, then owned by
//! the [`Context`](crate::Context) once added.

use crate::pointer::{FileId, Pointer};
use crate::primitives::Endian;
use crate::region::{Region, RegionMap};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

/// The address-space behaviour of a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum FileKind {
    /// A physical file. Raw pointer values are local file offsets.
    Linear,
    /// A memory dump occupying `[base_address, base_address + length)` in the shared
    /// address space. Raw pointer values are absolute addresses.
    MemoryMapped,
    /// An in-memory buffer.
    Stream,
    /// The decoded form of an encoded block.
    Encoded {
        /// Encoder that produced the bytes.
        encoder: String,
    },
}

/// What the encoder does with a pointer whose target file left the session.
///
/// This is a property of the file the pointer is written *into*.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub enum PointerRedirect {
    /// Fail with a context error.
    #[default]
    Error,
    /// Re-express the target's file offset in the file being written.
    CurrentFile,
    /// Re-express the target's file offset in the named fallback file.
    File(String),
}

#[derive(Debug, Clone)]
pub(crate) enum Backing {
    /// Streams are acquired from the file system on first use.
    Path,
    /// Bytes owned by the file itself.
    Memory(Vec<u8>),
}

/// One addressable file of a session.
#[derive(Debug, Clone)]
pub struct BinaryFile {
    pub(crate) id: FileId,
    path: String,
    name: Arc<str>,
    kind: FileKind,
    base_address: i64,
    pub(crate) length: Option<i64>,
    endian: Endian,
    regions: RegionMap,
    allow_local_pointers: bool,
    invalid_values: Vec<i64>,
    redirect: PointerRedirect,
    recreate_on_write: bool,
    pub(crate) backing: Backing,
}

impl BinaryFile {
    fn with_kind(path: String, kind: FileKind, base_address: i64, backing: Backing) -> Self {
        let length = match &backing {
            Backing::Memory(bytes) => Some(bytes.len() as i64),
            Backing::Path => None,
        };
        Self {
            id: FileId::new(u32::MAX),
            name: Arc::from(path.as_str()),
            path,
            allow_local_pointers: !matches!(kind, FileKind::MemoryMapped),
            kind,
            base_address,
            length,
            endian: Endian::default(),
            regions: RegionMap::default(),
            invalid_values: Vec::new(),
            redirect: PointerRedirect::default(),
            recreate_on_write: false,
            backing,
        }
    }

    /// A physical file at `path`, relative to the session base path.
    pub fn linear(path: impl Into<String>) -> Self {
        Self::with_kind(path.into(), FileKind::Linear, 0, Backing::Path)
    }

    /// A memory dump at `path` mapped at `base_address`.
    pub fn memory_mapped(path: impl Into<String>, base_address: i64) -> Self {
        Self::with_kind(path.into(), FileKind::MemoryMapped, base_address, Backing::Path)
    }

    /// An in-memory buffer registered under `name`.
    pub fn stream(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self::with_kind(name.into(), FileKind::Stream, 0, Backing::Memory(bytes))
    }

    pub(crate) fn encoded(name: String, encoder: &str, bytes: Vec<u8>) -> Self {
        Self::with_kind(
            name,
            FileKind::Encoded {
                encoder: encoder.to_string(),
            },
            0,
            Backing::Memory(bytes),
        )
    }

    /// Replaces the backing with an in-memory buffer, keeping the kind.
    pub fn with_bytes(mut self, bytes: Vec<u8>) -> Self {
        self.length = Some(bytes.len() as i64);
        self.backing = Backing::Memory(bytes);
        self
    }

    /// Sets the byte order.
    pub fn with_endian(mut self, endian: Endian) -> Self {
        self.endian = endian;
        self
    }

    /// Fixes the length instead of probing the backing stream.
    pub fn with_length(mut self, length: i64) -> Self {
        self.length = Some(length);
        self
    }

    /// Controls whether raw pointers read from a stream or encoded file target the file
    /// itself instead of the shared address space.
    pub fn allow_local_pointers(mut self, allow: bool) -> Self {
        self.allow_local_pointers = allow;
        self
    }

    /// Accepts `value` as a known-invalid raw pointer that decodes to `None`.
    pub fn allow_invalid_value(mut self, value: i64) -> Self {
        self.invalid_values.push(value);
        self
    }

    /// Sets the redirect policy for pointers into removed files.
    pub fn with_redirect(mut self, redirect: PointerRedirect) -> Self {
        self.redirect = redirect;
        self
    }

    /// Truncate the backing file the first time it is opened for writing.
    pub fn recreate_on_write(mut self, recreate: bool) -> Self {
        self.recreate_on_write = recreate;
        self
    }

    /// Adds a diagnostic region. Overlapping regions are ignored with a log entry.
    pub fn with_region(mut self, region: Region) -> Self {
        if let Err(e) = self.regions.add(region) {
            tracing::debug!(file = %self.name, error = %e, "region rejected");
        }
        self
    }

    /// Session id (assigned when added to a context).
    pub fn id(&self) -> FileId {
        self.id
    }

    /// Path (or alias) of the file.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Display name shared with pointers into this file.
    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    /// Address-space behaviour.
    pub fn kind(&self) -> &FileKind {
        &self.kind
    }

    /// Base address (0 except for memory-mapped files).
    pub fn base_address(&self) -> i64 {
        self.base_address
    }

    /// Length in bytes, 0 if unknown.
    pub fn length(&self) -> i64 {
        self.length.unwrap_or(0)
    }

    /// Byte order.
    pub fn endian(&self) -> Endian {
        self.endian
    }

    /// Diagnostic regions.
    pub fn regions(&self) -> &RegionMap {
        &self.regions
    }

    /// Region containing a file offset.
    pub fn region_at(&self, file_offset: i64) -> Option<&Region> {
        self.regions.find(file_offset)
    }

    /// True if raw pointers read from this file resolve into the file itself.
    /// Linear files always resolve locally, memory-mapped files never do.
    pub fn allows_local_pointers(&self) -> bool {
        match self.kind {
            FileKind::Linear => true,
            FileKind::MemoryMapped => false,
            FileKind::Stream | FileKind::Encoded { .. } => self.allow_local_pointers,
        }
    }

    /// True if `raw` is an allow-listed invalid pointer value.
    pub fn allows_invalid(&self, raw: i64) -> bool {
        self.invalid_values.contains(&raw)
    }

    /// Redirect policy for pointers into removed files.
    pub fn redirect(&self) -> &PointerRedirect {
        &self.redirect
    }

    pub(crate) fn truncates_on_write(&self) -> bool {
        self.recreate_on_write
    }

    /// In-memory contents, if the file is buffer-backed.
    pub fn bytes(&self) -> Option<&[u8]> {
        match &self.backing {
            Backing::Memory(bytes) => Some(bytes),
            Backing::Path => None,
        }
    }

    pub(crate) fn take_bytes(&mut self) -> Vec<u8> {
        match &mut self.backing {
            Backing::Memory(bytes) => std::mem::take(bytes),
            Backing::Path => Vec::new(),
        }
    }

    pub(crate) fn physical_path(&self, base: &std::path::Path, separator: char) -> PathBuf {
        if separator == std::path::MAIN_SEPARATOR {
            base.join(&self.path)
        } else {
            let joined = format!("{}{separator}{}", base.display(), self.path);
            PathBuf::from(joined.trim_start_matches(separator))
        }
    }

    /// Pointer to `file_offset` within this file.
    pub fn pointer_at(&self, file_offset: i64) -> Pointer {
        Pointer::new(
            self.id,
            self.name.clone(),
            self.base_address,
            self.base_address + file_offset,
        )
    }

    /// Pointer to the first byte.
    pub fn start_pointer(&self) -> Pointer {
        self.pointer_at(0)
    }

    /// Pointer for an absolute offset, if the file contains it.
    ///
    /// Memory-mapped files own the half-open range `[base, base + length)`. Other files
    /// also accept their end offset so that pointers past the last element resolve.
    pub fn local_pointer(&self, absolute: i64) -> Option<Pointer> {
        let start = self.base_address;
        let end = start + self.length();
        let inside = match self.kind {
            FileKind::MemoryMapped => absolute >= start && absolute < end,
            _ => absolute >= start && absolute <= end,
        };
        inside.then(|| {
            Pointer::new(self.id, self.name.clone(), self.base_address, absolute)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_mapped_range_is_half_open() {
        let file = BinaryFile::memory_mapped("ram", 0x1000).with_bytes(vec![0; 0x100]);
        assert!(file.local_pointer(0x0FFF).is_none());
        assert_eq!(file.local_pointer(0x1000).map(|p| p.file_offset()), Some(0));
        assert!(file.local_pointer(0x10FF).is_some());
        assert!(file.local_pointer(0x1100).is_none());
    }

    #[test]
    fn linear_files_accept_end_pointer() {
        let file = BinaryFile::stream("buf", vec![0; 8]);
        assert!(file.local_pointer(8).is_some());
        assert!(file.local_pointer(9).is_none());
        assert!(file.allows_local_pointers());
    }

    #[test]
    fn local_pointer_policy_per_kind() {
        assert!(!BinaryFile::memory_mapped("ram", 0).allows_local_pointers());
        let stream = BinaryFile::stream("buf", Vec::new()).allow_local_pointers(false);
        assert!(!stream.allows_local_pointers());
        assert!(BinaryFile::linear("a.bin").allow_local_pointers(false).allows_local_pointers());
    }
}
