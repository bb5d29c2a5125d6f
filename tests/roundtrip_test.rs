#![allow(missing_docs)]

use binweave::{
    BinaryFile, BinaryObject, BinarySerializable, Context, Endian, MemoryFileSystem,
    SerializerObject, U24, Warning,
};
use std::sync::Arc;

#[derive(Debug, Default, Clone, PartialEq, BinaryObject)]
struct Header {
    magic: u32,
    version: u16,
    flags: u16,
}

#[derive(Debug, Default, PartialEq)]
struct Table {
    count: u16,
    entries: Vec<u32>,
    name: String,
}

impl BinarySerializable for Table {
    fn serialize_impl(&mut self, s: &mut dyn SerializerObject) -> binweave::Result<()> {
        self.count = s.serialize(self.count, "count")?;
        s.serialize_array(&mut self.entries, usize::from(self.count), "entries")?;
        self.name = s.serialize_string(&self.name, Some(8), "name")?;
        Ok(())
    }
}

#[derive(Debug, Default, PartialEq, BinaryObject)]
struct Record {
    id: U24,
    header: Header,
    #[bin(skip)]
    note: String,
    tail: [u8; 2],
}

fn memory_context() -> Context {
    Context::builder("")
        .file_system(Arc::new(MemoryFileSystem::new()))
        .build()
}

// --- TESTS ---

/// A little-endian u32 reads back as its numeric value and writes back unchanged.
#[test]
fn test_linear_round_trip() -> binweave::Result<()> {
    let mut ctx = memory_context();
    let bytes = vec![0x78, 0x56, 0x34, 0x12, 0x02, 0x00, 0x00, 0x00];
    let file = ctx.add_file(BinaryFile::stream("save", bytes.clone()))?;

    let header = ctx.read_root::<Header>(file)?;
    assert_eq!(
        ctx.get(header),
        Some(&Header {
            magic: 0x1234_5678,
            version: 2,
            flags: 0
        })
    );

    ctx.write_root(header)?;
    assert_eq!(ctx.file(file).and_then(BinaryFile::bytes), Some(&bytes[..]));
    Ok(())
}

#[test]
fn test_big_endian_file() -> binweave::Result<()> {
    let mut ctx = memory_context();
    let file = ctx.add_file(
        BinaryFile::stream("be", vec![0x12, 0x34, 0x56, 0x78, 0x00, 0x01, 0x80, 0x00])
            .with_endian(Endian::Big),
    )?;
    let header = ctx.read_root::<Header>(file)?;
    let header = ctx.get(header).cloned().expect("header is cached");
    assert_eq!(header.magic, 0x1234_5678);
    assert_eq!(header.version, 1);
    assert_eq!(header.flags, 0x8000);
    Ok(())
}

/// Modifying a field and writing back changes exactly that field's bytes.
#[test]
fn test_modify_and_write_back() -> binweave::Result<()> {
    let mut ctx = memory_context();
    let file = ctx.add_file(BinaryFile::stream("save", vec![0; 8]))?;
    let header = ctx.read_root::<Header>(file)?;

    if let Some(h) = ctx.get_mut(header) {
        h.flags = 0xBEEF;
    }
    ctx.write_root(header)?;
    assert_eq!(
        ctx.file(file).and_then(BinaryFile::bytes),
        Some(&[0, 0, 0, 0, 0, 0, 0xEF, 0xBE][..])
    );
    Ok(())
}

/// Reading twice at the same offset yields the same instance.
#[test]
fn test_idempotent_reread() -> binweave::Result<()> {
    let mut ctx = memory_context();
    let file = ctx.add_file(BinaryFile::stream("save", vec![1; 8]))?;
    let first = ctx.read_root::<Header>(file)?;
    let objects = ctx.cache().len();
    let second = ctx.read_root::<Header>(file)?;
    assert_eq!(first, second);
    assert_eq!(ctx.cache().len(), objects);
    Ok(())
}

/// A structure written from scratch decodes to an equal structure, and all three
/// passes agree on its size.
#[test]
fn test_write_from_scratch_and_size() -> binweave::Result<()> {
    let mut ctx = memory_context();
    let out = ctx.add_file(BinaryFile::stream("out", Vec::new()))?;
    let table = ctx.alloc(Table {
        count: 2,
        entries: vec![0xAABB_CCDD, 7],
        name: "abc".into(),
    });
    let start = ctx.pointer(out, 0)?;
    ctx.write_at(table, &start)?;

    let bytes = ctx
        .file(out)
        .and_then(BinaryFile::bytes)
        .map(<[u8]>::to_vec)
        .unwrap_or_default();
    assert_eq!(bytes.len(), 2 + 8 + 8);
    assert_eq!(&bytes[10..14], b"abc\0");
    assert_eq!(ctx.calculate_size(table)?, 18);
    assert_eq!(ctx.object_size(table), Some(18));

    let mut fresh = memory_context();
    let file = fresh.add_file(BinaryFile::stream("in", bytes))?;
    let decoded = fresh.read_root::<Table>(file)?;
    assert_eq!(fresh.get(decoded), ctx.get(table));
    assert_eq!(fresh.object_size(decoded), Some(18));
    Ok(())
}

/// Strings longer than their fixed field are truncated with a warning.
#[test]
fn test_string_truncation_warns() -> binweave::Result<()> {
    let mut ctx = memory_context();
    let out = ctx.add_file(BinaryFile::stream("out", Vec::new()))?;
    let table = ctx.alloc(Table {
        count: 0,
        entries: Vec::new(),
        name: "much too long".into(),
    });
    let start = ctx.pointer(out, 0)?;
    ctx.write_at(table, &start)?;

    assert_eq!(ctx.file(out).map(BinaryFile::length), Some(10));
    assert!(matches!(
        ctx.warnings(),
        [Warning::StringTruncated {
            length: 13,
            capacity: 8,
            ..
        }]
    ));
    Ok(())
}

/// Derived structures embed other derived structures inline and honour `#[bin(skip)]`.
#[test]
fn test_derived_nested_record() -> binweave::Result<()> {
    let mut ctx = memory_context();
    let mut bytes = vec![0x01, 0x02, 0x03];
    bytes.extend([0x44, 0x33, 0x22, 0x11, 0x05, 0x00, 0x06, 0x00]);
    bytes.extend([0xFE, 0xFF]);
    let file = ctx.add_file(BinaryFile::stream("rec", bytes))?;

    let record = ctx.read_root::<Record>(file)?;
    let r = ctx.get(record).expect("record is cached");
    assert_eq!(r.id.value(), 0x03_0201);
    assert_eq!(r.header.magic, 0x1122_3344);
    assert_eq!(r.header.flags, 6);
    assert!(r.note.is_empty());
    assert_eq!(r.tail, [0xFE, 0xFF]);
    assert_eq!(ctx.calculate_size(record)?, 13);
    Ok(())
}

/// Reading past the end of a file is a format error, not a panic.
#[test]
fn test_truncated_file_fails() {
    let mut ctx = memory_context();
    let file = ctx
        .add_file(BinaryFile::stream("short", vec![1, 2, 3]))
        .expect("file is added");
    let err = ctx.read_root::<Header>(file).unwrap_err();
    assert!(matches!(err, binweave::BinError::Format(_)));

    // The half-read instance is not returned by a later read.
    assert!(ctx.read_root::<Header>(file).is_err());
}
