//! Typed traversal helpers built on the primitive engine operations.

use super::{Mode, SerializerObject};
use crate::bits::{BitContainer, BitSerializer};
use crate::cache::ObjRef;
use crate::encoder::BinaryEncoder;
use crate::error::{BinError, Result, Warning};
use crate::object::BinarySerializable;
use crate::pointer::{Pointer, PointerOptions};
use crate::primitives::{Primitive, PrimitiveKind, PrimitiveValue};
use crate::processor::{BinaryProcessor, CalculatedValue, ValuePlacement};
use std::sync::Arc;

fn short_type_name<T>() -> &'static str {
    let full = std::any::type_name::<T>();
    full.rsplit("::").next().unwrap_or(full)
}

impl dyn SerializerObject + '_ {
    // --- Primitives ---

    /// Reads, writes or skips one value of a wire primitive type.
    ///
    /// ```rust
    /// use binweave::{BinaryFile, Context, MemoryFileSystem, SerializerObject};
    /// use std::sync::Arc;
    ///
    /// let mut ctx = Context::builder("").file_system(Arc::new(MemoryFileSystem::new())).build();
    /// let id = ctx.add_file(BinaryFile::stream("mem", vec![0x78, 0x56, 0x34, 0x12])).unwrap();
    /// let start = ctx.file(id).unwrap().start_pointer();
    ///
    /// let mut engine = ctx.deserializer().unwrap();
    /// engine.goto(&start).unwrap();
    /// let s: &mut dyn SerializerObject = &mut engine;
    /// assert_eq!(s.serialize(0u32, "magic").unwrap(), 0x1234_5678);
    /// ```
    pub fn serialize<T: PrimitiveValue>(&mut self, value: T, name: &str) -> Result<T> {
        T::from_primitive(self.serialize_primitive(value.into_primitive(), name)?)
    }

    /// Reads, writes or skips `count` primitives. `values` is resized to `count`.
    ///
    /// Byte arrays are transferred in a single call.
    pub fn serialize_array<T: PrimitiveValue>(
        &mut self,
        values: &mut Vec<T>,
        count: usize,
        name: &str,
    ) -> Result<()> {
        values.resize(count, T::default());
        if T::KIND == PrimitiveKind::U8 {
            let mut bytes = values
                .iter()
                .map(|v| match v.into_primitive() {
                    Primitive::U8(b) => b,
                    _ => 0,
                })
                .collect::<Vec<u8>>();
            self.serialize_raw(&mut bytes, count, name)?;
            for (slot, byte) in values.iter_mut().zip(bytes) {
                *slot = T::from_primitive(Primitive::U8(byte))?;
            }
            return Ok(());
        }
        for value in values.iter_mut() {
            *value = self.serialize(*value, name)?;
        }
        Ok(())
    }

    /// Reads, writes or skips `count` raw bytes.
    pub fn serialize_bytes(&mut self, bytes: &mut Vec<u8>, count: usize, name: &str) -> Result<()> {
        self.serialize_raw(bytes, count, name)
    }

    /// Skips `count` bytes of padding, written as zeros. Non-zero padding read back
    /// is reported as a warning.
    pub fn serialize_padding(&mut self, count: usize, name: &str) -> Result<()> {
        let location = self.current_pointer()?;
        let mut bytes = Vec::new();
        self.serialize_raw(&mut bytes, count, name)?;
        if self.mode() == Mode::Decode
            && let Some(&value) = bytes.iter().find(|&&b| b != 0)
        {
            self.warn(Warning::NonZeroPadding {
                location: location.to_string(),
                value: u64::from(value),
            })?;
        }
        Ok(())
    }

    // --- Strings ---

    /// Reads, writes or skips a string in the session's string encoding.
    ///
    /// With `length`, the field is fixed-size: decode stops at the first NUL, encode pads
    /// with zeros and truncates (with a warning) strings that do not fit. Without it, the
    /// string is NUL-terminated.
    pub fn serialize_string(
        &mut self,
        value: &str,
        length: Option<usize>,
        name: &str,
    ) -> Result<String> {
        let encoding = self.context().settings().string_encoding;
        let location = self.current_pointer()?;

        match (self.mode(), length) {
            (Mode::Decode, Some(length)) => {
                let mut bytes = Vec::new();
                self.serialize_raw(&mut bytes, length, name)?;
                let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
                Ok(encoding.decode(&bytes[..end]))
            }
            (Mode::Decode, None) => {
                let mut bytes = Vec::new();
                loop {
                    let byte = self.serialize(0u8, name)?;
                    if byte == 0 {
                        break;
                    }
                    bytes.push(byte);
                }
                Ok(encoding.decode(&bytes))
            }
            (_, Some(length)) => {
                let mut bytes = encoding.encode(value);
                if bytes.len() > length {
                    if self.mode() == Mode::Encode {
                        self.warn(Warning::StringTruncated {
                            location: location.to_string(),
                            length: bytes.len(),
                            capacity: length,
                        })?;
                    }
                    bytes.truncate(length);
                }
                self.serialize_raw(&mut bytes, length, name)?;
                Ok(value.to_string())
            }
            (_, None) => {
                let mut bytes = encoding.encode(value);
                bytes.push(0);
                let count = bytes.len();
                self.serialize_raw(&mut bytes, count, name)?;
                Ok(value.to_string())
            }
        }
    }

    // --- Pointers ---

    /// Reads, writes or skips `count` pointer fields. `values` is resized to `count`.
    pub fn serialize_pointer_array(
        &mut self,
        values: &mut Vec<Option<Pointer>>,
        count: usize,
        options: &PointerOptions,
        name: &str,
    ) -> Result<()> {
        values.resize(count, None);
        for value in values.iter_mut() {
            *value = self.serialize_pointer(value.as_ref(), options, name)?;
        }
        Ok(())
    }

    /// Runs `f` with the cursor at `pointer`, then restores the cursor, also when `f`
    /// fails. An absent pointer skips `f`.
    pub fn do_at<R>(
        &mut self,
        pointer: Option<&Pointer>,
        f: impl FnOnce(&mut Self) -> Result<R>,
    ) -> Result<Option<R>> {
        let Some(pointer) = pointer else {
            return Ok(None);
        };
        let saved = self.current_pointer()?;
        self.goto(pointer)?;
        let result = f(self);
        let restored = self.goto(&saved);
        let value = result?;
        restored?;
        Ok(Some(value))
    }

    // --- Objects ---

    /// Materializes (decode), writes (encode) or measures (size) a cached structure at
    /// the cursor. See [`serialize_object_with`](Self::serialize_object_with).
    pub fn serialize_object<T: BinarySerializable>(
        &mut self,
        value: Option<ObjRef<T>>,
        name: &str,
    ) -> Result<ObjRef<T>> {
        self.serialize_object_with(value, |_| {}, name)
    }

    /// Object traversal with an initialization hook.
    ///
    /// * Decode ignores `value`. A structure of type `T` already materialized at the
    ///   cursor is returned as is and its bytes are skipped. Otherwise a new instance is
    ///   cached before its body is traversed, `on_pre_init` runs, and the body is read.
    ///   If reading fails, the instance is no longer found at the cursor.
    /// * Encode writes the instance named by `value`. Instances already written in this
    ///   pass are skipped.
    /// * Size traverses the instance named by `value` without touching the cache index.
    pub fn serialize_object_with<T: BinarySerializable>(
        &mut self,
        value: Option<ObjRef<T>>,
        on_pre_init: impl FnOnce(&mut T),
        name: &str,
    ) -> Result<ObjRef<T>> {
        let start = self.current_pointer()?;
        match self.mode() {
            Mode::Decode => {
                if let Some(cached) = self.context().cache().lookup::<T>(&start) {
                    let size = self.context().cache().size(cached).unwrap_or(0);
                    tracing::debug!(at = %start, field = name, ty = short_type_name::<T>(), "cache hit");
                    self.skip(size)?;
                    return Ok(cached);
                }
                let obj = self
                    .context_mut()
                    .cache_mut()
                    .insert(T::default(), Some(start.clone()));
                if let Err(e) = self.traverse_object(obj, Some(on_pre_init), &start, name) {
                    self.context_mut().cache_mut().unindex(obj);
                    return Err(e);
                }
                Ok(obj)
            }
            Mode::Encode => {
                let obj = value.ok_or_else(|| {
                    BinError::Context(format!(
                        "cannot write absent {} '{name}' at {start}",
                        short_type_name::<T>()
                    ))
                })?;
                let cache = self.context_mut().cache_mut();
                if cache.is_written(obj) {
                    let size = cache.size(obj).unwrap_or(0);
                    self.skip(size)?;
                    return Ok(obj);
                }
                cache.set_offset(obj, start.clone())?;
                cache.mark_written(obj);
                self.traverse_object(obj, None::<fn(&mut T)>, &start, name)?;
                Ok(obj)
            }
            Mode::Size => {
                let obj = value.ok_or_else(|| {
                    BinError::Context(format!(
                        "cannot measure absent {} '{name}' at {start}",
                        short_type_name::<T>()
                    ))
                })?;
                self.traverse_object(obj, None::<fn(&mut T)>, &start, name)?;
                Ok(obj)
            }
        }
    }

    fn traverse_object<T: BinarySerializable>(
        &mut self,
        obj: ObjRef<T>,
        on_pre_init: Option<impl FnOnce(&mut T)>,
        start: &Pointer,
        name: &str,
    ) -> Result<()> {
        let mut boxed = self.context_mut().cache_mut().take(obj)?;
        let result = match boxed.downcast_mut::<T>() {
            Some(instance) => {
                if let Some(init) = on_pre_init {
                    init(instance);
                }
                self.begin_scope(name);
                let result = instance.serialize_impl(self);
                self.end_scope();
                result
            }
            None => Err(BinError::Internal(format!(
                "object #{} is not a {}",
                obj.index(),
                short_type_name::<T>()
            ))),
        };
        self.context_mut().cache_mut().restore(obj, boxed)?;
        result?;

        let end = self.current_pointer()?;
        let size = end.offset_from(start).ok_or_else(|| {
            BinError::Internal(format!("{name} started at {start} but ended at {end}"))
        })?;
        self.context_mut().cache_mut().set_size(obj, size)
    }

    /// Reads, writes or measures `count` cached structures laid out back to back.
    /// `values` is resized to `count`. Missing handles are filled with fresh instances.
    pub fn serialize_object_array<T: BinarySerializable>(
        &mut self,
        values: &mut Vec<ObjRef<T>>,
        count: usize,
        name: &str,
    ) -> Result<()> {
        values.truncate(count);
        if self.mode() == Mode::Decode {
            values.clear();
            for _ in 0..count {
                let obj = self.serialize_object::<T>(None, name)?;
                values.push(obj);
            }
            return Ok(());
        }
        while values.len() < count {
            let obj = self.context_mut().cache_mut().insert(T::default(), None);
            values.push(obj);
        }
        for value in values.iter() {
            self.serialize_object(Some(*value), name)?;
        }
        Ok(())
    }

    /// Traverses a structure embedded by value. No identity caching applies.
    pub fn serialize_inline<T: BinarySerializable>(&mut self, value: &mut T, name: &str) -> Result<()> {
        self.begin_scope(name);
        let result = value.serialize_impl(self);
        self.end_scope();
        result
    }

    /// Traverses `count` embedded structures. `values` is resized to `count`.
    pub fn serialize_inline_array<T: BinarySerializable>(
        &mut self,
        values: &mut Vec<T>,
        count: usize,
        name: &str,
    ) -> Result<()> {
        values.resize_with(count, T::default);
        for value in values.iter_mut() {
            self.serialize_inline(value, name)?;
        }
        Ok(())
    }

    // --- Bit fields ---

    /// Reads or writes a bit-field group held in one container of type `C`.
    ///
    /// Decode reads the container before `f` runs. Encode writes it after `f` returns.
    pub fn serialize_bit_values<C: BitContainer>(
        &mut self,
        name: &str,
        f: impl FnOnce(&mut BitSerializer) -> Result<()>,
    ) -> Result<()> {
        let location = self.current_pointer()?.to_string();
        let settings = self.context().settings();
        let (order, log_fields) = (settings.bit_order, settings.log_fields);
        let mode = self.mode();

        let container = match mode {
            Mode::Decode => self.serialize(C::default(), name)?.to_bits(),
            Mode::Encode | Mode::Size => 0,
        };
        let mut bits = BitSerializer::new(mode, order, C::BITS, container, location)
            .with_field_logging(log_fields);
        f(&mut bits)?;

        match mode {
            Mode::Decode => {
                if let Some(value) = bits.unconsumed() {
                    self.warn(Warning::NonZeroPadding {
                        location: bits.location().to_string(),
                        value,
                    })?;
                }
            }
            Mode::Encode | Mode::Size => {
                self.serialize(C::from_bits(bits.value()), name)?;
            }
        }
        Ok(())
    }

    // --- Processors ---

    /// Runs `f` with `processor` active and returns the processor with its final state.
    pub fn do_processed<P: BinaryProcessor, R>(
        &mut self,
        processor: P,
        f: impl FnOnce(&mut Self) -> Result<R>,
    ) -> Result<(R, P)> {
        self.begin_processor(Box::new(processor));
        let result = f(self);
        let popped = self.end_processor();
        let value = result?;
        let processor = popped?
            .into_any()
            .downcast::<P>()
            .map_err(|_| BinError::Internal("processor stack out of balance".into()))?;
        Ok((value, *processor))
    }

    /// Traverses a region covered by a calculated value (such as a checksum) stored
    /// before or after it.
    ///
    /// Decode compares the stored value with the computed one and records a
    /// [`Warning::ChecksumMismatch`] on difference. Encode writes the computed value;
    /// with [`ValuePlacement::Before`] the field is reserved first and patched once the
    /// region is complete.
    pub fn serialize_calculated<P: CalculatedValue, R>(
        &mut self,
        processor: P,
        placement: ValuePlacement,
        name: &str,
        f: impl FnOnce(&mut Self) -> Result<R>,
    ) -> Result<R> {
        let placeholder = P::Value::default();
        match (self.mode(), placement) {
            (Mode::Decode, ValuePlacement::Before) => {
                let location = self.current_pointer()?;
                let stored = self.serialize(placeholder, name)?;
                let (value, processor) = self.do_processed(processor, f)?;
                self.check_calculated(&processor, stored, &location)?;
                Ok(value)
            }
            (Mode::Decode, ValuePlacement::After) => {
                let (value, processor) = self.do_processed(processor, f)?;
                let location = self.current_pointer()?;
                let stored = self.serialize(placeholder, name)?;
                self.check_calculated(&processor, stored, &location)?;
                Ok(value)
            }
            (Mode::Encode, ValuePlacement::Before) => {
                // Outer processors must see the final value ahead of the region.
                self.begin_deferred_writes();
                let result = self.reserve_and_patch(processor, placeholder, name, f);
                let replayed = self.end_deferred_writes(result.is_ok());
                let value = result?;
                replayed?;
                Ok(value)
            }
            (Mode::Encode, ValuePlacement::After) => {
                let (value, processor) = self.do_processed(processor, f)?;
                self.serialize(processor.calculated_value(), name)?;
                Ok(value)
            }
            (Mode::Size, ValuePlacement::Before) => {
                self.serialize(placeholder, name)?;
                f(self)
            }
            (Mode::Size, ValuePlacement::After) => {
                let value = f(self)?;
                self.serialize(placeholder, name)?;
                Ok(value)
            }
        }
    }

    fn reserve_and_patch<P: CalculatedValue, R>(
        &mut self,
        processor: P,
        placeholder: P::Value,
        name: &str,
        f: impl FnOnce(&mut Self) -> Result<R>,
    ) -> Result<R> {
        let reserved = self.current_pointer()?;
        self.serialize(placeholder, name)?;
        let (value, processor) = self.do_processed(processor, f)?;
        let end = self.current_pointer()?;
        self.goto(&reserved)?;
        self.serialize(processor.calculated_value(), name)?;
        self.goto(&end)?;
        Ok(value)
    }

    fn check_calculated<P: CalculatedValue>(
        &mut self,
        processor: &P,
        stored: P::Value,
        location: &Pointer,
    ) -> Result<()> {
        let calculated = processor.calculated_value();
        if stored == calculated {
            return Ok(());
        }
        self.warn(Warning::ChecksumMismatch {
            processor: processor.name().to_string(),
            location: location.to_string(),
            stored: stored.into_primitive().to_string(),
            calculated: calculated.into_primitive().to_string(),
        })
    }

    // --- Encoded blocks ---

    /// Runs `f` inside the virtual file of an encoded block starting at the cursor.
    ///
    /// The virtual file is removed when `f` returns, whether it succeeded or not. On
    /// failure, cache entries pointing into it are evicted as well.
    pub fn do_encoded<R>(
        &mut self,
        encoder: Arc<dyn BinaryEncoder>,
        f: impl FnOnce(&mut Self) -> Result<R>,
    ) -> Result<R> {
        let start = self.begin_encoded(encoder)?;
        match f(self) {
            Ok(value) => {
                self.end_encoded(&start)?;
                Ok(value)
            }
            Err(e) => {
                self.abort_encoded(&start);
                Err(e)
            }
        }
    }
}
