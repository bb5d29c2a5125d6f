//! The session.
//!
//! A [`Context`] owns everything one traversal session touches: the addressable files
//! and their streams, the shared address map, the object cache, typed settings bags,
//! pre-defined pointers and the warning diagnostics. It is passed explicitly (as the
//! engine's `&mut` borrow) into every operation. There is no global state.
//!
//! ```rust
//! use binweave::{BinaryFile, Context, MemoryFileSystem, Pointer};
//! use std::sync::Arc;
//!
//! let mut ctx = Context::builder("")
//!     .file_system(Arc::new(MemoryFileSystem::new()))
//!     .build();
//! let low = ctx.add_file(BinaryFile::memory_mapped("low", 0x1000).with_bytes(vec![0; 0x100])).unwrap();
//! let high = ctx.add_file(BinaryFile::memory_mapped("high", 0x2000).with_bytes(vec![0; 0x100])).unwrap();
//!
//! let p = ctx.resolve_pointer(0x2050, low, None).unwrap();
//! assert_eq!(p.file(), high);
//! assert_eq!(p.file_offset(), 0x50);
//! ```

use crate::cache::{ObjRef, ObjectCache};
use crate::bits::BitOrder;
use crate::error::{BinError, Result, Warning};
use crate::file::{Backing, BinaryFile, FileKind};
use crate::fs::{FileSystem, ReadStream, StdFileSystem, WriteStream};
use crate::object::BinarySerializable;
use crate::pointer::{FileId, Pointer};
use crate::primitives::StringEncoding;
use crate::serializer::{Engine, Mode, SerializerObject};
use serde::{Deserialize, Serialize};
use std::any::{Any, TypeId};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Session-wide behaviour switches.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextSettings {
    /// Turn every format warning into [`BinError::Format`].
    pub escalate_warnings: bool,
    /// Emit a `trace` event per field.
    pub log_fields: bool,
    /// Record which bytes of each file were read during decode.
    pub track_reads: bool,
    /// Encoding of string fields.
    pub string_encoding: StringEncoding,
    /// Allocation order of bit fields.
    pub bit_order: BitOrder,
}

/// Builder for [`Context`].
#[derive(Debug)]
pub struct ContextBuilder {
    base_path: PathBuf,
    fs: Arc<dyn FileSystem>,
    settings: ContextSettings,
}

impl ContextBuilder {
    /// Uses `fs` for all file access. Defaults to [`StdFileSystem`].
    pub fn file_system(mut self, fs: Arc<dyn FileSystem>) -> Self {
        self.fs = fs;
        self
    }

    /// Replaces all settings.
    pub fn settings(mut self, settings: ContextSettings) -> Self {
        self.settings = settings;
        self
    }

    /// See [`ContextSettings::escalate_warnings`].
    pub fn escalate_warnings(mut self, enabled: bool) -> Self {
        self.settings.escalate_warnings = enabled;
        self
    }

    /// See [`ContextSettings::track_reads`].
    pub fn track_reads(mut self, enabled: bool) -> Self {
        self.settings.track_reads = enabled;
        self
    }

    /// See [`ContextSettings::log_fields`].
    pub fn log_fields(mut self, enabled: bool) -> Self {
        self.settings.log_fields = enabled;
        self
    }

    /// See [`ContextSettings::string_encoding`].
    pub fn string_encoding(mut self, encoding: StringEncoding) -> Self {
        self.settings.string_encoding = encoding;
        self
    }

    /// See [`ContextSettings::bit_order`].
    pub fn bit_order(mut self, order: BitOrder) -> Self {
        self.settings.bit_order = order;
        self
    }

    /// Creates the session.
    pub fn build(self) -> Context {
        tracing::debug!(base = %self.base_path.display(), fs = ?self.fs, "session opened");
        Context {
            base_path: self.base_path,
            fs: self.fs,
            settings: self.settings,
            files: Vec::new(),
            streams: HashMap::new(),
            recreated: HashSet::new(),
            active: None,
            cache: ObjectCache::default(),
            settings_bags: HashMap::new(),
            pre_defined: HashMap::new(),
            warnings: Vec::new(),
            read_maps: HashMap::new(),
            encoded_extents: HashMap::new(),
        }
    }
}

#[derive(Default)]
struct FileStreams {
    reader: Option<Box<dyn ReadStream>>,
    writer: Option<Box<dyn WriteStream>>,
}

/// A traversal session.
pub struct Context {
    base_path: PathBuf,
    fs: Arc<dyn FileSystem>,
    settings: ContextSettings,
    /// Indexed by `FileId`. Removed files leave a hole so ids are never reused.
    files: Vec<Option<BinaryFile>>,
    streams: HashMap<FileId, FileStreams>,
    recreated: HashSet<FileId>,
    /// Direction whose stream handles are currently open.
    active: Option<Mode>,
    cache: ObjectCache,
    settings_bags: HashMap<TypeId, Box<dyn Any + Send>>,
    pre_defined: HashMap<String, Pointer>,
    warnings: Vec<Warning>,
    read_maps: HashMap<FileId, Vec<bool>>,
    encoded_extents: HashMap<Pointer, i64>,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("base_path", &self.base_path)
            .field("settings", &self.settings)
            .field("files", &self.files().map(BinaryFile::path).collect::<Vec<_>>())
            .field("cache", &self.cache)
            .field("warnings", &self.warnings.len())
            .finish()
    }
}

fn short_type_name<T>() -> &'static str {
    let full = std::any::type_name::<T>();
    full.rsplit("::").next().unwrap_or(full)
}

impl Context {
    /// A session rooted at `base_path` using the real file system.
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self::builder(base_path).build()
    }

    /// Starts configuring a session rooted at `base_path`.
    pub fn builder(base_path: impl Into<PathBuf>) -> ContextBuilder {
        ContextBuilder {
            base_path: base_path.into(),
            fs: Arc::new(StdFileSystem),
            settings: ContextSettings::default(),
        }
    }

    /// Root directory file paths are relative to.
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Session settings.
    pub fn settings(&self) -> &ContextSettings {
        &self.settings
    }

    /// Session settings, mutably.
    pub fn settings_mut(&mut self) -> &mut ContextSettings {
        &mut self.settings
    }

    /// The file system collaborator.
    pub fn file_system(&self) -> &Arc<dyn FileSystem> {
        &self.fs
    }

    // --- Files ---

    /// Adds a file and returns its session id.
    ///
    /// # Errors
    /// Returns a context error if a file with the same path is already present.
    pub fn add_file(&mut self, mut file: BinaryFile) -> Result<FileId> {
        if self.file_by_path(file.path()).is_some() {
            return Err(BinError::Context(format!(
                "a file with path '{}' is already part of the session",
                file.path()
            )));
        }
        let id = FileId::new(u32::try_from(self.files.len()).map_err(|_| {
            BinError::Context("too many files added to one session".into())
        })?);
        file.id = id;

        if matches!(file.backing, Backing::Path) && file.length.is_none() {
            let path = self.physical_path(&file);
            let length = if self.fs.exists(&path) {
                let mut stream = self.fs.open_read(&path)?;
                let end = stream.seek(SeekFrom::End(0))?;
                self.streams.entry(id).or_default().reader = Some(stream);
                end as i64
            } else {
                0
            };
            file.length = Some(length);
        }

        tracing::debug!(
            id = %id,
            path = file.path(),
            kind = ?file.kind(),
            base = file.base_address(),
            length = file.length(),
            "file added"
        );
        self.files.push(Some(file));
        Ok(id)
    }

    /// Removes a file, closing its streams. Pointers into it stay comparable but no
    /// longer resolve.
    pub fn remove_file(&mut self, id: FileId) -> Result<BinaryFile> {
        let file = self
            .files
            .get_mut(id.as_u32() as usize)
            .and_then(Option::take)
            .ok_or_else(|| BinError::Context(format!("file {id} is not part of the session")))?;
        if let Some(mut streams) = self.streams.remove(&id)
            && let Some(writer) = streams.writer.as_mut()
        {
            writer.flush()?;
        }
        self.read_maps.remove(&id);
        tracing::debug!(id = %id, path = file.path(), "file removed");
        Ok(file)
    }

    /// Adds `file`, runs `f`, and removes the file again, also when `f` fails. On
    /// failure, cache entries pointing into the file are evicted.
    pub fn with_temporary_file<R>(
        &mut self,
        file: BinaryFile,
        f: impl FnOnce(&mut Self, FileId) -> Result<R>,
    ) -> Result<R> {
        let id = self.add_file(file)?;
        let result = f(self, id);
        if result.is_err() {
            let evicted = self.cache.evict_file(id);
            tracing::debug!(id = %id, evicted, "temporary file aborted");
        }
        let removed = self.remove_file(id);
        let value = result?;
        removed?;
        Ok(value)
    }

    /// A file by id.
    pub fn file(&self, id: FileId) -> Option<&BinaryFile> {
        self.files.get(id.as_u32() as usize).and_then(Option::as_ref)
    }

    pub(crate) fn file_mut(&mut self, id: FileId) -> Option<&mut BinaryFile> {
        self.files.get_mut(id.as_u32() as usize).and_then(Option::as_mut)
    }

    /// A file by path.
    pub fn file_by_path(&self, path: &str) -> Option<&BinaryFile> {
        self.files().find(|f| f.path() == path)
    }

    /// All live files in insertion order.
    pub fn files(&self) -> impl Iterator<Item = &BinaryFile> {
        self.files.iter().flatten()
    }

    /// Pointer to `file_offset` within a file.
    pub fn pointer(&self, file: FileId, file_offset: i64) -> Result<Pointer> {
        self.file(file)
            .map(|f| f.pointer_at(file_offset))
            .ok_or_else(|| BinError::Context(format!("file {file} is not part of the session")))
    }

    fn physical_path(&self, file: &BinaryFile) -> PathBuf {
        file.physical_path(&self.base_path, self.fs.path_separator())
    }

    // --- Address space ---

    /// Resolves a raw pointer value read from `current`.
    ///
    /// The value is offset by the anchor, if any. Files that allow local pointers
    /// (linear files always do) interpret it within the anchor's file, or `current`
    /// without an anchor. Otherwise the value is an absolute address and the
    /// memory-mapped file with the highest base address containing it wins.
    pub fn resolve_pointer(
        &self,
        raw: i64,
        current: FileId,
        anchor: Option<&Pointer>,
    ) -> Option<Pointer> {
        let target = raw + anchor.map_or(0, Pointer::absolute_offset);
        let local = anchor.map_or(current, Pointer::file);
        if let Some(file) = self.file(local)
            && file.allows_local_pointers()
        {
            return file.local_pointer(target);
        }

        let mut mapped: Vec<&BinaryFile> = self
            .files()
            .filter(|f| *f.kind() == FileKind::MemoryMapped)
            .collect();
        // Stable: files sharing a base address keep insertion order.
        mapped.sort_by(|a, b| b.base_address().cmp(&a.base_address()));
        mapped.into_iter().find_map(|f| f.local_pointer(target))
    }

    // --- Engines ---

    /// A decode engine. Write handles of a previous encode engine are flushed and closed.
    pub fn deserializer(&mut self) -> Result<Engine<'_>> {
        Engine::new(self, Mode::Decode)
    }

    /// An encode engine. Read handles of a previous decode engine are closed.
    pub fn serializer(&mut self) -> Result<Engine<'_>> {
        Engine::new(self, Mode::Encode)
    }

    /// A size-only engine. No stream is touched.
    pub fn size_calculator(&mut self) -> Result<Engine<'_>> {
        Engine::new(self, Mode::Size)
    }

    pub(crate) fn activate(&mut self, mode: Mode) -> Result<()> {
        if mode == Mode::Size || self.active == Some(mode) {
            return Ok(());
        }
        match mode {
            Mode::Decode => {
                for streams in self.streams.values_mut() {
                    if let Some(mut writer) = streams.writer.take() {
                        writer.flush()?;
                    }
                }
            }
            Mode::Encode => {
                for streams in self.streams.values_mut() {
                    streams.reader = None;
                }
            }
            Mode::Size => {}
        }
        tracing::debug!(mode = %mode, "engine direction switched");
        self.active = Some(mode);
        Ok(())
    }

    pub(crate) fn read_raw(&mut self, id: FileId, offset: i64, buf: &mut [u8]) -> Result<()> {
        let file = self
            .files
            .get(id.as_u32() as usize)
            .and_then(Option::as_ref)
            .ok_or_else(|| BinError::Context(format!("file {id} is not part of the session")))?;
        let end = offset + buf.len() as i64;
        if offset < 0 || end > file.length() {
            return Err(BinError::Format(format!(
                "read of {} bytes at {}|0x{offset:08X} is past the end of the file (length 0x{:X})",
                buf.len(),
                file.name(),
                file.length()
            )));
        }

        match &file.backing {
            Backing::Memory(bytes) => {
                let start = offset as usize;
                let src = bytes.get(start..start + buf.len()).ok_or_else(|| {
                    BinError::Format(format!(
                        "read of {} bytes at {}|0x{offset:08X} is past the end of its buffer (0x{:X} bytes)",
                        buf.len(),
                        file.name(),
                        bytes.len()
                    ))
                })?;
                buf.copy_from_slice(src);
            }
            Backing::Path => {
                let streams = self.streams.entry(id).or_default();
                if streams.reader.is_none() {
                    let path = file.physical_path(&self.base_path, self.fs.path_separator());
                    self.fs.prefetch(&path, offset as u64, buf.len() as u64);
                    streams.reader = Some(self.fs.open_read(&path)?);
                    tracing::debug!(path = %path.display(), "read stream opened");
                }
                if let Some(reader) = streams.reader.as_mut() {
                    reader.seek(SeekFrom::Start(offset as u64))?;
                    reader.read_exact(buf)?;
                }
            }
        }
        Ok(())
    }

    pub(crate) fn write_raw(&mut self, id: FileId, offset: i64, data: &[u8]) -> Result<()> {
        let file = self
            .files
            .get_mut(id.as_u32() as usize)
            .and_then(Option::as_mut)
            .ok_or_else(|| BinError::Context(format!("file {id} is not part of the session")))?;
        if offset < 0 {
            return Err(BinError::Format(format!(
                "write at negative offset {offset} of {}",
                file.name()
            )));
        }
        let end = offset + data.len() as i64;

        match file.backing {
            Backing::Memory(ref mut bytes) => {
                let start = offset as usize;
                let stop = start + data.len();
                if bytes.len() < stop {
                    bytes.resize(stop, 0);
                }
                bytes[start..stop].copy_from_slice(data);
            }
            Backing::Path => {
                let streams = self.streams.entry(id).or_default();
                if streams.writer.is_none() {
                    let path = file.physical_path(&self.base_path, self.fs.path_separator());
                    let truncate = file.truncates_on_write() && self.recreated.insert(id);
                    streams.writer = Some(self.fs.open_write(&path, truncate)?);
                    if truncate {
                        file.length = Some(0);
                    }
                    tracing::debug!(path = %path.display(), truncate, "write stream opened");
                }
                if let Some(writer) = streams.writer.as_mut() {
                    writer.seek(SeekFrom::Start(offset as u64))?;
                    writer.write_all(data)?;
                }
            }
        }
        file.length = Some(file.length().max(end));
        Ok(())
    }

    pub(crate) fn mark_read(&mut self, id: FileId, offset: i64, len: usize) {
        let Some(length) = self.file(id).map(BinaryFile::length) else {
            return;
        };
        let map = self
            .read_maps
            .entry(id)
            .or_insert_with(|| vec![false; length.max(0) as usize]);
        let start = offset.max(0) as usize;
        let stop = start + len;
        if map.len() < stop {
            map.resize(stop, false);
        }
        map[start..stop].fill(true);
    }

    /// Number of distinct bytes of `file` read so far, if reads are tracked.
    pub fn bytes_read(&self, file: FileId) -> Option<usize> {
        if !self.settings.track_reads {
            return None;
        }
        Some(
            self.read_maps
                .get(&file)
                .map_or(0, |map| map.iter().filter(|&&b| b).count()),
        )
    }

    /// Writes the read map of `file` to `path` (relative to the base path): one byte per
    /// file byte, `0xFF` if it was read and `0x00` otherwise.
    pub fn export_read_map(&self, file: FileId, path: &str) -> Result<()> {
        let length = self
            .file(file)
            .map(BinaryFile::length)
            .ok_or_else(|| BinError::Context(format!("file {file} is not part of the session")))?;
        let map = self.read_maps.get(&file);
        let bytes: Vec<u8> = (0..length.max(0) as usize)
            .map(|i| match map.and_then(|m| m.get(i)) {
                Some(true) => 0xFF,
                _ => 0x00,
            })
            .collect();

        let target = self.base_path.join(path);
        let mut stream = self.fs.open_write(&target, true)?;
        stream.write_all(&bytes)?;
        stream.flush()?;
        tracing::debug!(file = %file, path = %target.display(), bytes = bytes.len(), "read map exported");
        Ok(())
    }

    pub(crate) fn record_encoded_extent(&mut self, source: Pointer, length: i64) {
        self.encoded_extents.insert(source, length);
    }

    pub(crate) fn encoded_extent(&self, source: &Pointer) -> Option<i64> {
        self.encoded_extents.get(source).copied()
    }

    // --- Objects ---

    /// The object cache.
    pub fn cache(&self) -> &ObjectCache {
        &self.cache
    }

    pub(crate) fn cache_mut(&mut self) -> &mut ObjectCache {
        &mut self.cache
    }

    /// Stores a new, unplaced structure instance (for encoding from scratch).
    pub fn alloc<T: BinarySerializable>(&mut self, value: T) -> ObjRef<T> {
        self.cache.insert(value, None)
    }

    /// Borrows a structure instance.
    pub fn get<T: BinarySerializable>(&self, obj: ObjRef<T>) -> Option<&T> {
        self.cache.get(obj)
    }

    /// Mutably borrows a structure instance.
    pub fn get_mut<T: BinarySerializable>(&mut self, obj: ObjRef<T>) -> Option<&mut T> {
        self.cache.get_mut(obj)
    }

    /// Where the instance was last read from or written to.
    pub fn object_offset<T>(&self, obj: ObjRef<T>) -> Option<&Pointer> {
        self.cache.offset(obj)
    }

    /// Byte size measured by the instance's last traversal.
    pub fn object_size<T>(&self, obj: ObjRef<T>) -> Option<i64> {
        self.cache.size(obj)
    }

    /// Decodes a `T` at the start of `file`.
    pub fn read_root<T: BinarySerializable>(&mut self, file: FileId) -> Result<ObjRef<T>> {
        let start = self.pointer(file, 0)?;
        self.read_at(&start)
    }

    /// Decodes a `T` at the start of the file registered under `path`.
    pub fn read_path<T: BinarySerializable>(&mut self, path: &str) -> Result<ObjRef<T>> {
        let file = self
            .file_by_path(path)
            .map(BinaryFile::id)
            .ok_or_else(|| BinError::Context(format!("no file with path '{path}'")))?;
        self.read_root(file)
    }

    /// Decodes a `T` at `pointer`, or returns the instance already materialized there.
    pub fn read_at<T: BinarySerializable>(&mut self, pointer: &Pointer) -> Result<ObjRef<T>> {
        if let Some(cached) = self.cache.lookup::<T>(pointer) {
            return Ok(cached);
        }
        let mut engine = self.deserializer()?;
        engine.goto(pointer)?;
        engine
            .as_object()
            .serialize_object::<T>(None, short_type_name::<T>())
    }

    /// Encodes `obj` at the offset it was read from (or last written to).
    pub fn write_root<T: BinarySerializable>(&mut self, obj: ObjRef<T>) -> Result<()> {
        let target = self.cache.offset(obj).cloned().ok_or_else(|| {
            BinError::Context(format!(
                "{} #{} has no offset; use write_at",
                short_type_name::<T>(),
                obj.index()
            ))
        })?;
        self.write_at(obj, &target)
    }

    /// Encodes `obj` at `pointer` as a new encode pass and flushes the written files.
    pub fn write_at<T: BinarySerializable>(&mut self, obj: ObjRef<T>, pointer: &Pointer) -> Result<()> {
        self.cache.begin_encode_pass();
        {
            let mut engine = self.serializer()?;
            engine.goto(pointer)?;
            engine
                .as_object()
                .serialize_object(Some(obj), short_type_name::<T>())?;
        }
        self.flush()
    }

    /// Measures `obj` with a size-only pass from its offset.
    ///
    /// The exclusive borrow keeps any other traversal from moving cursors meanwhile.
    pub fn calculate_size<T: BinarySerializable>(&mut self, obj: ObjRef<T>) -> Result<i64> {
        let start = self.cache.offset(obj).cloned().ok_or_else(|| {
            BinError::Context(format!(
                "{} #{} has no offset to measure from",
                short_type_name::<T>(),
                obj.index()
            ))
        })?;
        let mut engine = self.size_calculator()?;
        engine.goto(&start)?;
        let s = engine.as_object();
        s.serialize_object(Some(obj), short_type_name::<T>())?;
        let end = s.current_pointer()?;
        end.offset_from(&start)
            .ok_or_else(|| BinError::Internal(format!("size pass started at {start} ended at {end}")))
    }

    // --- Streams ---

    /// Flushes all open write streams.
    pub fn flush(&mut self) -> Result<()> {
        for streams in self.streams.values_mut() {
            if let Some(writer) = streams.writer.as_mut() {
                writer.flush()?;
            }
        }
        Ok(())
    }

    /// Flushes and closes every stream. Files stay in the session and reopen lazily.
    pub fn close(&mut self) -> Result<()> {
        self.flush()?;
        self.streams.clear();
        self.active = None;
        tracing::debug!(base = %self.base_path.display(), "session streams closed");
        Ok(())
    }

    // --- Settings bags and pre-defined pointers ---

    /// Attaches a typed settings bag, replacing any previous bag of the same type.
    pub fn add_settings<T: Any + Send>(&mut self, settings: T) {
        self.settings_bags.insert(TypeId::of::<T>(), Box::new(settings));
    }

    /// The settings bag of type `T`.
    ///
    /// # Errors
    /// Returns a context error if no such bag was added.
    pub fn settings_bag<T: Any + Send>(&self) -> Result<&T> {
        self.settings_bags
            .get(&TypeId::of::<T>())
            .and_then(|b| b.downcast_ref::<T>())
            .ok_or_else(|| {
                BinError::Context(format!(
                    "no settings of type {} in the session",
                    std::any::type_name::<T>()
                ))
            })
    }

    /// Registers a named pointer at `address` of `file` (an absolute address for
    /// memory-mapped files, a file offset otherwise).
    pub fn add_pre_defined_pointer(
        &mut self,
        key: impl Into<String>,
        file: FileId,
        address: i64,
    ) -> Result<()> {
        let key = key.into();
        let pointer = self
            .file(file)
            .ok_or_else(|| BinError::Context(format!("file {file} is not part of the session")))?
            .local_pointer(address)
            .ok_or_else(|| {
                BinError::Context(format!(
                    "pre-defined pointer '{key}' at 0x{address:X} lies outside file {file}"
                ))
            })?;
        self.pre_defined.insert(key, pointer);
        Ok(())
    }

    /// A named pointer.
    ///
    /// # Errors
    /// Returns a context error for unknown keys.
    pub fn pre_defined_pointer(&self, key: &str) -> Result<Pointer> {
        self.pre_defined
            .get(key)
            .cloned()
            .ok_or_else(|| BinError::Context(format!("pre-defined pointer '{key}' is not defined")))
    }

    // --- Diagnostics ---

    /// Warnings recorded so far.
    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    /// Drains the recorded warnings.
    pub fn take_warnings(&mut self) -> Vec<Warning> {
        std::mem::take(&mut self.warnings)
    }

    pub(crate) fn warn(&mut self, warning: Warning) -> Result<()> {
        tracing::warn!(%warning, "format warning");
        let escalate = self.settings.escalate_warnings;
        let message = warning.to_string();
        self.warnings.push(warning);
        if escalate {
            return Err(BinError::Format(message));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MemoryFileSystem;

    fn memory_context() -> (Context, MemoryFileSystem) {
        let fs = MemoryFileSystem::new();
        let ctx = Context::builder("root").file_system(Arc::new(fs.clone())).build();
        (ctx, fs)
    }

    #[test]
    fn duplicate_paths_are_rejected() -> Result<()> {
        let (mut ctx, _) = memory_context();
        ctx.add_file(BinaryFile::stream("a", vec![1]))?;
        let err = ctx.add_file(BinaryFile::stream("a", vec![2])).unwrap_err();
        assert!(matches!(err, BinError::Context(_)));
        Ok(())
    }

    #[test]
    fn declared_length_past_buffer_fails_cleanly() -> Result<()> {
        let (mut ctx, _) = memory_context();
        let id = ctx.add_file(
            BinaryFile::memory_mapped("ram", 0x1000)
                .with_bytes(vec![0; 4])
                .with_length(0x100),
        )?;
        let mut buf = [0u8; 4];
        assert!(matches!(ctx.read_raw(id, 0x10, &mut buf), Err(BinError::Format(_))));
        assert!(matches!(ctx.read_raw(id, 2, &mut buf), Err(BinError::Format(_))));
        ctx.read_raw(id, 0, &mut buf)?;
        Ok(())
    }

    #[test]
    fn path_backed_length_is_probed() -> Result<()> {
        let (mut ctx, fs) = memory_context();
        fs.insert("root/data.bin", vec![0; 12]);
        let id = ctx.add_file(BinaryFile::linear("data.bin"))?;
        assert_eq!(ctx.file(id).map(BinaryFile::length), Some(12));

        let missing = ctx.add_file(BinaryFile::linear("new.bin"))?;
        assert_eq!(ctx.file(missing).map(BinaryFile::length), Some(0));
        Ok(())
    }

    #[test]
    fn removed_file_ids_are_not_reused() -> Result<()> {
        let (mut ctx, _) = memory_context();
        let a = ctx.add_file(BinaryFile::stream("a", vec![]))?;
        ctx.remove_file(a)?;
        let b = ctx.add_file(BinaryFile::stream("a", vec![]))?;
        assert_ne!(a, b);
        assert!(ctx.file(a).is_none());
        Ok(())
    }

    #[test]
    fn linear_files_resolve_locally() -> Result<()> {
        let (mut ctx, _) = memory_context();
        let id = ctx.add_file(BinaryFile::stream("a", vec![0; 0x40]))?;
        ctx.add_file(BinaryFile::memory_mapped("ram", 0).with_bytes(vec![0; 0x100]))?;
        let p = ctx.resolve_pointer(0x20, id, None);
        assert_eq!(p.map(|p| p.file()), Some(id));
        assert!(ctx.resolve_pointer(0x41, id, None).is_none());
        Ok(())
    }

    #[test]
    fn anchored_pointers_resolve_relative_to_anchor() -> Result<()> {
        let (mut ctx, _) = memory_context();
        let id = ctx.add_file(BinaryFile::stream("a", vec![0; 0x40]))?;
        let anchor = ctx.pointer(id, 0x10)?;
        let p = ctx.resolve_pointer(0x08, id, Some(&anchor));
        assert_eq!(p.map(|p| p.file_offset()), Some(0x18));
        Ok(())
    }

    #[test]
    fn settings_bags_and_pre_defined_pointers() -> Result<()> {
        #[derive(Debug, PartialEq)]
        struct GameSettings {
            version: u32,
        }

        let (mut ctx, _) = memory_context();
        assert!(matches!(ctx.settings_bag::<GameSettings>(), Err(BinError::Context(_))));
        ctx.add_settings(GameSettings { version: 3 });
        assert_eq!(ctx.settings_bag::<GameSettings>()?.version, 3);

        let ram = ctx.add_file(BinaryFile::memory_mapped("ram", 0x8000).with_bytes(vec![0; 0x10]))?;
        ctx.add_pre_defined_pointer("entry", ram, 0x8004)?;
        assert_eq!(ctx.pre_defined_pointer("entry")?.file_offset(), 4);
        assert!(ctx.add_pre_defined_pointer("bad", ram, 0x10).is_err());
        Ok(())
    }

    #[test]
    fn escalated_warnings_become_errors() {
        let (mut ctx, _) = memory_context();
        let warning = Warning::MalformedBool {
            location: "x".into(),
            value: 2,
        };
        assert!(ctx.warn(warning.clone()).is_ok());
        ctx.settings_mut().escalate_warnings = true;
        assert!(matches!(ctx.warn(warning), Err(BinError::Format(_))));
        assert_eq!(ctx.take_warnings().len(), 2);
        assert!(ctx.warnings().is_empty());
    }

    #[test]
    fn settings_deserialize_with_defaults() {
        let settings = ContextSettings::default();
        assert_eq!(settings.string_encoding, StringEncoding::Latin1);
        assert_eq!(settings.bit_order, BitOrder::MsbFirst);
        assert!(!settings.escalate_warnings);
    }
}
