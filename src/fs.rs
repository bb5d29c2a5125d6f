//! File access collaborator.
//!
//! The engine never touches the file system directly. Every stream is acquired through
//! a [`FileSystem`], so sessions can run against real files ([`StdFileSystem`]) or
//! against an in-memory store ([`MemoryFileSystem`]) for tests and virtualized backends.

use std::collections::HashMap;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use memmap2::Mmap;

/// A readable, seekable byte stream.
pub trait ReadStream: Read + Seek + Send {}

impl<T: Read + Seek + Send> ReadStream for T {}

/// A writable, seekable byte stream.
pub trait WriteStream: Write + Seek + Send {}

impl<T: Write + Seek + Send> WriteStream for T {}

/// Interface to the storage backing a session.
pub trait FileSystem: Send + Sync + fmt::Debug {
    /// Returns true if `path` exists.
    fn exists(&self, path: &Path) -> bool;

    /// Opens `path` for reading.
    fn open_read(&self, path: &Path) -> io::Result<Box<dyn ReadStream>>;

    /// Opens `path` for writing, creating it if needed.
    /// With `truncate`, existing contents are discarded.
    fn open_write(&self, path: &Path, truncate: bool) -> io::Result<Box<dyn WriteStream>>;

    /// Separator used when joining the session base path with file paths.
    fn path_separator(&self) -> char {
        std::path::MAIN_SEPARATOR
    }

    /// Hint that `length` bytes at `offset` of `path` will be read soon.
    fn prefetch(&self, _path: &Path, _offset: u64, _length: u64) {}
}

// --- Standard (OS) File System ---

/// Real file system. Reads go through a memory map.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdFileSystem;

impl FileSystem for StdFileSystem {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn open_read(&self, path: &Path) -> io::Result<Box<dyn ReadStream>> {
        let file = File::open(path)?;
        if file.metadata()?.len() == 0 {
            // Empty files cannot be mapped on every platform.
            return Ok(Box::new(Cursor::new(Vec::new())));
        }

        // Safety: the map is only read. External modification of the file while a
        // session holds it open is outside the engine's control.
        #[allow(unsafe_code)]
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Box::new(Cursor::new(mmap)))
    }

    fn open_write(&self, path: &Path, truncate: bool) -> io::Result<Box<dyn WriteStream>> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(truncate)
            .open(path)?;
        Ok(Box::new(BufWriter::new(file)))
    }
}

// --- In-Memory File System ---

type SharedBuffer = Arc<Mutex<Vec<u8>>>;

/// An in-memory file system. Clones share the same storage.
#[derive(Debug, Clone, Default)]
pub struct MemoryFileSystem {
    files: Arc<Mutex<HashMap<PathBuf, SharedBuffer>>>,
}

impl MemoryFileSystem {
    /// Creates an empty file system.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates or replaces a file.
    pub fn insert(&self, path: impl AsRef<Path>, contents: impl Into<Vec<u8>>) {
        let mut files = self.files.lock().unwrap_or_else(|p| p.into_inner());
        files.insert(
            path.as_ref().to_path_buf(),
            Arc::new(Mutex::new(contents.into())),
        );
    }

    /// Returns a copy of a file's contents.
    pub fn get(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        let files = self.files.lock().unwrap_or_else(|p| p.into_inner());
        files
            .get(path.as_ref())
            .map(|buf| buf.lock().unwrap_or_else(|p| p.into_inner()).clone())
    }

    fn entry(&self, path: &Path) -> Option<SharedBuffer> {
        let files = self.files.lock().unwrap_or_else(|p| p.into_inner());
        files.get(path).cloned()
    }
}

impl FileSystem for MemoryFileSystem {
    fn exists(&self, path: &Path) -> bool {
        self.entry(path).is_some()
    }

    fn open_read(&self, path: &Path) -> io::Result<Box<dyn ReadStream>> {
        let buffer = self.entry(path).ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("{}", path.display()))
        })?;
        let snapshot = buffer
            .lock()
            .map_err(|_| io::Error::other("memory file mutex poisoned"))?
            .clone();
        Ok(Box::new(Cursor::new(snapshot)))
    }

    fn open_write(&self, path: &Path, truncate: bool) -> io::Result<Box<dyn WriteStream>> {
        let buffer = {
            let mut files = self.files.lock().unwrap_or_else(|p| p.into_inner());
            files.entry(path.to_path_buf()).or_default().clone()
        };
        if truncate {
            buffer
                .lock()
                .map_err(|_| io::Error::other("memory file mutex poisoned"))?
                .clear();
        }
        Ok(Box::new(MemoryWriteStream {
            buffer,
            position: 0,
        }))
    }

    fn path_separator(&self) -> char {
        '/'
    }
}

/// Write stream that writes through to a shared in-memory buffer.
#[derive(Debug)]
struct MemoryWriteStream {
    buffer: SharedBuffer,
    position: u64,
}

impl Write for MemoryWriteStream {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut buffer = self
            .buffer
            .lock()
            .map_err(|_| io::Error::other("memory file mutex poisoned"))?;
        let start = usize::try_from(self.position).map_err(io::Error::other)?;
        let end = start + data.len();
        if buffer.len() < end {
            buffer.resize(end, 0);
        }
        buffer[start..end].copy_from_slice(data);
        self.position = end as u64;
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for MemoryWriteStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let len = self
            .buffer
            .lock()
            .map_err(|_| io::Error::other("memory file mutex poisoned"))?
            .len() as i64;
        let target = match pos {
            SeekFrom::Start(p) => p as i64,
            SeekFrom::End(delta) => len + delta,
            SeekFrom::Current(delta) => self.position as i64 + delta,
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of file",
            ));
        }
        self.position = target as u64;
        Ok(self.position)
    }
}
