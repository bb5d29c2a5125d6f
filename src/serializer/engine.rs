use super::{Mode, SerializerObject};
use crate::context::Context;
use crate::encoder::BinaryEncoder;
use crate::error::{BinError, Result, Warning};
use crate::file::{BinaryFile, PointerRedirect};
use crate::pointer::{FileId, Pointer, PointerOptions, PointerWidth};
use crate::primitives::{Primitive, PrimitiveKind};
use crate::processor::BinaryProcessor;
use std::collections::HashMap;
use std::fmt;
use std::io::{self, Read};
use std::sync::Arc;

/// An encoded block whose virtual file is currently open.
struct EncodedBlock {
    file: FileId,
    source: Pointer,
    /// Source bytes the encoded form occupies (known on decode).
    source_len: i64,
    decoded_len: i64,
    encoder: Arc<dyn BinaryEncoder>,
    /// Processors active around the block. Bytes inside the virtual file bypass them.
    outer_processors: Vec<Box<dyn BinaryProcessor>>,
}

/// Writes held back from the processors active when the frame opened.
///
/// A write that lands exactly on an earlier one replaces it in place, so a patched
/// field keeps the position its placeholder had.
struct DeferredWrites {
    outer_processors: Vec<Box<dyn BinaryProcessor>>,
    /// Encoded blocks open at creation. Writes into newer virtual files are not held.
    blocks: usize,
    writes: Vec<(FileId, i64, Vec<u8>)>,
}

impl DeferredWrites {
    fn record(&mut self, file: FileId, offset: i64, bytes: Vec<u8>) {
        let earlier = self
            .writes
            .iter_mut()
            .find(|(f, o, b)| *f == file && *o == offset && b.len() == bytes.len());
        match earlier {
            Some((_, _, slot)) => *slot = bytes,
            None => self.writes.push((file, offset, bytes)),
        }
    }
}

/// One traversal engine bound to a session.
///
/// The engine keeps a cursor per file, so jumping between files and back is cheap. Its
/// [`Mode`] is fixed at creation. Creating an engine of the opposite direction releases
/// the stream handles of the previous one (see [`Context::deserializer`]).
pub struct Engine<'c> {
    ctx: &'c mut Context,
    mode: Mode,
    current: Option<FileId>,
    cursors: HashMap<FileId, i64>,
    depth: usize,
    processors: Vec<Box<dyn BinaryProcessor>>,
    blocks: Vec<EncodedBlock>,
    deferred: Vec<DeferredWrites>,
}

impl fmt::Debug for Engine<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("mode", &self.mode)
            .field("current", &self.current)
            .field("depth", &self.depth)
            .field("processors", &self.processors.len())
            .field("open_blocks", &self.blocks.len())
            .field("deferred", &self.deferred.len())
            .finish()
    }
}

impl<'c> Engine<'c> {
    pub(crate) fn new(ctx: &'c mut Context, mode: Mode) -> Result<Self> {
        ctx.activate(mode)?;
        Ok(Self {
            ctx,
            mode,
            current: None,
            cursors: HashMap::new(),
            depth: 0,
            processors: Vec::new(),
            blocks: Vec::new(),
            deferred: Vec::new(),
        })
    }

    /// Reborrows the engine as the trait object structure code expects.
    pub fn as_object(&mut self) -> &mut (dyn SerializerObject + 'c) {
        self
    }

    fn file(&self, id: FileId) -> Result<&BinaryFile> {
        self.ctx.file(id).ok_or_else(|| {
            BinError::Context(format!("file {id} is no longer part of the session"))
        })
    }

    fn cursor(&self) -> Result<(FileId, i64)> {
        let file = self
            .current
            .ok_or_else(|| BinError::Context("the engine has no current file".into()))?;
        Ok((file, self.cursors.get(&file).copied().unwrap_or(0)))
    }

    fn advance(&mut self, count: i64) -> Result<()> {
        let (file, offset) = self.cursor()?;
        self.cursors.insert(file, offset + count);
        Ok(())
    }

    fn read_bytes(&mut self, file: FileId, offset: i64, buf: &mut [u8]) -> Result<()> {
        self.ctx.read_raw(file, offset, buf)?;
        if self.ctx.settings().track_reads {
            self.ctx.mark_read(file, offset, buf.len());
        }
        for processor in self.processors.iter_mut() {
            processor.process_bytes(buf, Mode::Decode);
        }
        Ok(())
    }

    fn write_bytes(&mut self, file: FileId, offset: i64, data: &[u8]) -> Result<()> {
        let mut buf = data.to_vec();
        for processor in self.processors.iter_mut().rev() {
            processor.process_bytes(&mut buf, Mode::Encode);
        }
        self.ctx.write_raw(file, offset, &buf)?;
        let open_blocks = self.blocks.len();
        if let Some(frame) = self.deferred.last_mut()
            && frame.blocks == open_blocks
        {
            frame.record(file, offset, buf);
        }
        Ok(())
    }

    /// Moves `buf` across the cursor in the engine's direction and advances.
    fn transfer(&mut self, buf: &mut [u8]) -> Result<()> {
        let (file, offset) = self.cursor()?;
        match self.mode {
            Mode::Decode => self.read_bytes(file, offset, buf)?,
            Mode::Encode => self.write_bytes(file, offset, buf)?,
            Mode::Size => {}
        }
        self.advance(buf.len() as i64)
    }

    fn log_field(&self, at: &Pointer, name: &str, value: &dyn fmt::Display) {
        if self.ctx.settings().log_fields {
            tracing::trace!(depth = self.depth, mode = %self.mode, "{at} {name} = {value}");
        }
    }

    /// Applies the writing file's redirect policy to a pointer whose target left the session.
    fn redirect(&self, target: &Pointer, source: FileId) -> Result<Pointer> {
        if self.ctx.file(target.file()).is_some() {
            return Ok(target.clone());
        }
        let source = self.file(source)?;
        let fallback = match source.redirect() {
            PointerRedirect::Error => {
                return Err(BinError::Context(format!(
                    "pointer to {target} written into '{}' targets a file that left the session",
                    source.name()
                )));
            }
            PointerRedirect::CurrentFile => source,
            PointerRedirect::File(path) => self.ctx.file_by_path(path).ok_or_else(|| {
                BinError::Context(format!("redirect target '{path}' is not part of the session"))
            })?,
        };
        tracing::debug!(from = %target, to = fallback.name().as_ref(), "redirected pointer");
        Ok(target.rebased(fallback.id(), fallback.name().clone(), fallback.base_address()))
    }

    fn pointer_primitive(raw: i64, width: PointerWidth, name: &str) -> Result<Primitive> {
        let overflow = || {
            BinError::Format(format!(
                "pointer value 0x{raw:X} of '{name}' does not fit in {} bytes",
                width.bytes()
            ))
        };
        Ok(match width {
            PointerWidth::U16 => Primitive::U16(
                u16::try_from(raw)
                    .or_else(|_| i16::try_from(raw).map(|v| v as u16))
                    .map_err(|_| overflow())?,
            ),
            PointerWidth::U32 => Primitive::U32(
                u32::try_from(raw)
                    .or_else(|_| i32::try_from(raw).map(|v| v as u32))
                    .map_err(|_| overflow())?,
            ),
            PointerWidth::U64 => Primitive::U64(raw as u64),
        })
    }

    fn pointer_kind(width: PointerWidth) -> PrimitiveKind {
        match width {
            PointerWidth::U16 => PrimitiveKind::U16,
            PointerWidth::U32 => PrimitiveKind::U32,
            PointerWidth::U64 => PrimitiveKind::U64,
        }
    }

    fn remove_block_file(&mut self, block: &mut EncodedBlock) {
        if !self.processors.is_empty() {
            tracing::debug!(
                count = self.processors.len(),
                "processors left active inside an encoded block were dropped"
            );
        }
        self.processors = std::mem::take(&mut block.outer_processors);
        self.cursors.remove(&block.file);
        if let Err(e) = self.ctx.remove_file(block.file) {
            tracing::debug!(error = %e, "encoded block file already removed");
        }
    }

    fn pop_block(&mut self, start: &Pointer) -> Result<EncodedBlock> {
        match self.blocks.pop() {
            Some(block) if block.file == start.file() => Ok(block),
            Some(block) => {
                let file = block.file;
                self.blocks.push(block);
                Err(BinError::Internal(format!(
                    "encoded block {start} closed while block in file {file} is still open"
                )))
            }
            None => Err(BinError::Internal(format!(
                "no encoded block is open at {start}"
            ))),
        }
    }

    fn finish_block(&mut self, block: &mut EncodedBlock) -> Result<i64> {
        match self.mode {
            Mode::Decode => {
                let consumed = self.cursors.get(&block.file).copied().unwrap_or(0);
                self.remove_block_file(block);
                if consumed != block.decoded_len {
                    self.ctx.warn(Warning::EncodedLengthMismatch {
                        encoder: block.encoder.name().to_string(),
                        location: block.source.to_string(),
                        expected: block.decoded_len,
                        consumed,
                    })?;
                }
                Ok(block.source_len)
            }
            Mode::Encode => {
                let bytes = self
                    .ctx
                    .file_mut(block.file)
                    .map(BinaryFile::take_bytes)
                    .unwrap_or_default();
                self.remove_block_file(block);
                let encoded = block.encoder.encode(&bytes)?;
                self.write_bytes(
                    block.source.file(),
                    block.source.file_offset(),
                    &encoded,
                )?;
                tracing::debug!(
                    encoder = block.encoder.name(),
                    at = %block.source,
                    decoded = bytes.len(),
                    encoded = encoded.len(),
                    "encoded block written"
                );
                Ok(encoded.len() as i64)
            }
            Mode::Size => {
                self.remove_block_file(block);
                self.ctx.encoded_extent(&block.source).ok_or_else(|| {
                    BinError::Format(format!(
                        "size of the {} block at {} is unknown until it is decoded or encoded",
                        block.encoder.name(),
                        block.source
                    ))
                })
            }
        }
    }
}

/// Reads an encoded block straight from the source file, through active processors.
struct BlockReader<'e, 'c> {
    engine: &'e mut Engine<'c>,
    file: FileId,
    position: i64,
}

impl Read for BlockReader<'_, '_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let length = self.engine.file(self.file).map_err(io::Error::other)?.length();
        let available = usize::try_from((length - self.position).max(0)).unwrap_or(0);
        let count = buf.len().min(available);
        if count == 0 {
            return Ok(0);
        }
        self.engine
            .read_bytes(self.file, self.position, &mut buf[..count])
            .map_err(io::Error::other)?;
        self.position += count as i64;
        Ok(count)
    }
}

impl SerializerObject for Engine<'_> {
    fn mode(&self) -> Mode {
        self.mode
    }

    fn context(&self) -> &Context {
        self.ctx
    }

    fn context_mut(&mut self) -> &mut Context {
        self.ctx
    }

    fn current_pointer(&self) -> Result<Pointer> {
        let (file, offset) = self.cursor()?;
        Ok(self.file(file)?.pointer_at(offset))
    }

    fn goto(&mut self, pointer: &Pointer) -> Result<()> {
        self.file(pointer.file())?;
        self.current = Some(pointer.file());
        self.cursors.insert(pointer.file(), pointer.file_offset());
        Ok(())
    }

    fn skip(&mut self, count: i64) -> Result<()> {
        self.advance(count)
    }

    fn depth(&self) -> usize {
        self.depth
    }

    fn begin_scope(&mut self, name: &str) {
        if self.ctx.settings().log_fields {
            tracing::trace!(depth = self.depth, "enter {name}");
        }
        self.depth += 1;
    }

    fn end_scope(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    fn serialize_primitive(&mut self, value: Primitive, name: &str) -> Result<Primitive> {
        let (file, offset) = self.cursor()?;
        let at = self.file(file)?.pointer_at(offset);
        let endian = self.file(file)?.endian();
        let kind = value.kind();

        let mut buf = [0u8; 8];
        let bytes = &mut buf[..kind.size()];
        let result = match self.mode {
            Mode::Decode => {
                self.read_bytes(file, offset, bytes)?;
                let parsed = Primitive::from_bytes(kind, bytes, endian)?;
                if kind == PrimitiveKind::Bool && bytes[0] > 1 {
                    self.ctx.warn(Warning::MalformedBool {
                        location: at.to_string(),
                        value: bytes[0],
                    })?;
                }
                parsed
            }
            Mode::Encode => {
                self.write_bytes(file, offset, &value.to_bytes(endian))?;
                value
            }
            Mode::Size => value,
        };
        self.advance(kind.size() as i64)?;
        self.log_field(&at, name, &result);
        Ok(result)
    }

    fn serialize_raw(&mut self, bytes: &mut Vec<u8>, count: usize, name: &str) -> Result<()> {
        let at = self.current_pointer()?;
        bytes.resize(count, 0);
        self.transfer(bytes)?;
        if self.ctx.settings().log_fields {
            tracing::trace!(depth = self.depth, mode = %self.mode, "{at} {name} = [{count} bytes]");
        }
        Ok(())
    }

    fn serialize_pointer(
        &mut self,
        value: Option<&Pointer>,
        options: &PointerOptions,
        name: &str,
    ) -> Result<Option<Pointer>> {
        let (file, offset) = self.cursor()?;
        let at = self.file(file)?.pointer_at(offset);
        let endian = self.file(file)?.endian();
        let width = options.width;

        let result = match self.mode {
            Mode::Decode => {
                let mut buf = [0u8; 8];
                let bytes = &mut buf[..width.bytes()];
                self.read_bytes(file, offset, bytes)?;
                let raw = Primitive::from_bytes(Self::pointer_kind(width), bytes, endian)?
                    .as_i64()
                    .ok_or_else(|| BinError::Internal("pointer field is not an integer".into()))?;

                if options.null_value == Some(raw) {
                    None
                } else if let Some(resolved) =
                    self.ctx.resolve_pointer(raw, file, options.anchor.as_ref())
                {
                    Some(resolved.with_anchor(options.anchor.clone()).with_width(width))
                } else if raw == 0
                    || options.allow_invalid
                    || self.file(file)?.allows_invalid(raw)
                {
                    None
                } else {
                    return Err(BinError::Pointer {
                        file: self.file(file)?.name().to_string(),
                        offset: at.file_offset(),
                        value: raw,
                    });
                }
            }
            Mode::Encode => {
                let target = value
                    .map(|target| self.redirect(target, file))
                    .transpose()?
                    .map(|target| target.with_anchor(options.anchor.clone()).with_width(width));
                let raw = target
                    .as_ref()
                    .map_or(options.null_value.unwrap_or(0), Pointer::serialized_offset);
                let bytes = Self::pointer_primitive(raw, width, name)?.to_bytes(endian);
                self.write_bytes(file, offset, &bytes)?;
                target
            }
            Mode::Size => value.cloned(),
        };

        self.advance(width.bytes() as i64)?;
        if self.ctx.settings().log_fields {
            match &result {
                Some(p) => self.log_field(&at, name, p),
                None => self.log_field(&at, name, &"null"),
            }
        }
        Ok(result)
    }

    fn begin_processor(&mut self, processor: Box<dyn BinaryProcessor>) {
        tracing::debug!(processor = processor.name(), depth = self.depth, "processor activated");
        self.processors.push(processor);
    }

    fn end_processor(&mut self) -> Result<Box<dyn BinaryProcessor>> {
        self.processors
            .pop()
            .ok_or_else(|| BinError::Internal("no processor is active".into()))
    }

    fn begin_deferred_writes(&mut self) {
        self.deferred.push(DeferredWrites {
            outer_processors: std::mem::take(&mut self.processors),
            blocks: self.blocks.len(),
            writes: Vec::new(),
        });
    }

    fn end_deferred_writes(&mut self, commit: bool) -> Result<()> {
        let frame = self
            .deferred
            .pop()
            .ok_or_else(|| BinError::Internal("no deferred writes are pending".into()))?;
        if !self.processors.is_empty() {
            tracing::debug!(
                count = self.processors.len(),
                "processors left active inside deferred writes were dropped"
            );
        }
        self.processors = frame.outer_processors;
        if !commit {
            return Ok(());
        }
        tracing::debug!(
            writes = frame.writes.len(),
            processors = self.processors.len(),
            "replaying deferred writes"
        );
        for (file, offset, bytes) in frame.writes {
            self.write_bytes(file, offset, &bytes)?;
        }
        Ok(())
    }

    fn begin_encoded(&mut self, encoder: Arc<dyn BinaryEncoder>) -> Result<Pointer> {
        let source = self.current_pointer()?;
        let parent = self.file(source.file())?;
        let name = format!("{}_{:X}", parent.name(), source.file_offset());
        let endian = parent.endian();

        let (bytes, source_len) = match self.mode {
            Mode::Decode => {
                let mut reader = BlockReader {
                    engine: self,
                    file: source.file(),
                    position: source.file_offset(),
                };
                let decoded = encoder.decode(&mut reader)?;
                let consumed = reader.position - source.file_offset();
                (decoded, consumed)
            }
            Mode::Encode | Mode::Size => (Vec::new(), 0),
        };

        let decoded_len = bytes.len() as i64;
        let file = BinaryFile::encoded(name, encoder.name(), bytes)
            .with_endian(endian)
            .allow_local_pointers(true)
            .with_redirect(PointerRedirect::CurrentFile);
        let id = self.ctx.add_file(file)?;
        if self.mode == Mode::Decode {
            self.ctx.record_encoded_extent(source.clone(), source_len);
        }
        tracing::debug!(
            encoder = encoder.name(),
            at = %source,
            source_len,
            decoded_len,
            mode = %self.mode,
            "encoded block opened"
        );

        self.blocks.push(EncodedBlock {
            file: id,
            source,
            source_len,
            decoded_len,
            encoder,
            outer_processors: std::mem::take(&mut self.processors),
        });
        let start = self.file(id)?.start_pointer();
        self.goto(&start)?;
        Ok(start)
    }

    fn end_encoded(&mut self, start: &Pointer) -> Result<()> {
        let mut block = self.pop_block(start)?;
        let source = block.source.clone();
        // Leave the virtual file before it disappears, so a failure below still
        // finds the cursor in a live file.
        self.goto(&source)?;
        let length = self.finish_block(&mut block)?;
        if self.mode == Mode::Encode {
            self.ctx.record_encoded_extent(source.clone(), length);
        }
        self.goto(&(&source + length))
    }

    fn abort_encoded(&mut self, start: &Pointer) {
        let Ok(mut block) = self.pop_block(start) else {
            return;
        };
        self.remove_block_file(&mut block);
        let evicted = self.ctx.cache_mut().evict_file(block.file);
        tracing::debug!(at = %block.source, evicted, "encoded block aborted");
        self.current = Some(block.source.file());
        self.cursors
            .insert(block.source.file(), block.source.file_offset());
    }
}
