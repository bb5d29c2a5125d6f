#![allow(missing_docs)]

use binweave::{
    BinError, BinaryFile, BinaryObject, Context, FileId, MemoryFileSystem, PointerOptions,
    PointerRedirect, PointerWidth, Ptr, SerializerObject,
};
use std::sync::Arc;

#[derive(Debug, Default, BinaryObject)]
struct Node {
    value: u32,
    next: Ptr<Node>,
}

fn memory_context() -> Context {
    Context::builder("")
        .file_system(Arc::new(MemoryFileSystem::new()))
        .build()
}

fn le(value: u32) -> [u8; 4] {
    value.to_le_bytes()
}

/// A mapped dump at 0x8000 holding two nodes that point at each other.
fn cyclic_dump() -> Vec<u8> {
    let mut bytes = vec![0u8; 0x30];
    bytes[0x10..0x14].copy_from_slice(&le(1));
    bytes[0x14..0x18].copy_from_slice(&le(0x8020));
    bytes[0x20..0x24].copy_from_slice(&le(2));
    bytes[0x24..0x28].copy_from_slice(&le(0x8010));
    bytes
}

// --- ADDRESS SPACE ---

#[test]
fn test_highest_base_wins() -> binweave::Result<()> {
    for reversed in [false, true] {
        let mut ctx = memory_context();
        let wide = BinaryFile::memory_mapped("wide", 0x1000).with_bytes(vec![0; 0x2000]);
        let narrow = BinaryFile::memory_mapped("narrow", 0x2000).with_bytes(vec![0; 0x100]);
        let (wide, narrow) = if reversed {
            let n = ctx.add_file(narrow)?;
            (ctx.add_file(wide)?, n)
        } else {
            let w = ctx.add_file(wide)?;
            (w, ctx.add_file(narrow)?)
        };

        let p = ctx.resolve_pointer(0x2050, wide, None).expect("0x2050 is mapped");
        assert_eq!(p.file(), narrow);
        assert_eq!(p.file_offset(), 0x50);

        let low = ctx.resolve_pointer(0x1050, narrow, None).expect("0x1050 is mapped");
        assert_eq!(low.file(), wide);
        assert_eq!(low.file_offset(), 0x50);

        assert!(ctx.resolve_pointer(0x3000, wide, None).is_none());
    }
    Ok(())
}

#[test]
fn test_disjoint_mapped_files() -> binweave::Result<()> {
    let mut ctx = memory_context();
    let low = ctx.add_file(BinaryFile::memory_mapped("low", 0x1000).with_bytes(vec![0; 0x100]))?;
    let high = ctx.add_file(BinaryFile::memory_mapped("high", 0x2000).with_bytes(vec![0; 0x100]))?;

    let p = ctx.resolve_pointer(0x2050, low, None).expect("0x2050 is mapped");
    assert_eq!(p.file(), high);
    assert_eq!(p.file_offset(), 0x50);
    assert!(ctx.resolve_pointer(0x1800, low, None).is_none());
    Ok(())
}

/// Files sharing a base address resolve to the one added first.
#[test]
fn test_equal_base_prefers_first_added() -> binweave::Result<()> {
    let mut ctx = memory_context();
    let first = ctx.add_file(BinaryFile::memory_mapped("a", 0x4000).with_bytes(vec![0; 0x10]))?;
    let _second = ctx.add_file(BinaryFile::memory_mapped("b", 0x4000).with_bytes(vec![0; 0x10]))?;
    let p = ctx.resolve_pointer(0x4004, first, None).expect("mapped");
    assert_eq!(p.file(), first);
    Ok(())
}

// --- OBJECT GRAPHS ---

#[test]
fn test_cyclic_pointers_share_instances() -> binweave::Result<()> {
    let mut ctx = memory_context();
    let ram = ctx.add_file(BinaryFile::memory_mapped("ram", 0x8000).with_bytes(cyclic_dump()))?;

    let start = ctx.pointer(ram, 0x10)?;
    let a = ctx.read_at::<Node>(&start)?;
    let b = ctx.get(a).and_then(|n| n.next.value).expect("a.next resolved");
    let back = ctx.get(b).and_then(|n| n.next.value).expect("b.next resolved");

    assert_eq!(back, a);
    assert_eq!(ctx.get(b).map(|n| n.value), Some(2));
    assert_eq!(ctx.cache().len(), 2);

    // Reading B directly returns the instance reached through A.
    let b_ptr = ctx.pointer(ram, 0x20)?;
    assert_eq!(ctx.read_at::<Node>(&b_ptr)?, b);
    Ok(())
}

#[test]
fn test_cyclic_graph_writes_back_unchanged() -> binweave::Result<()> {
    let mut ctx = memory_context();
    let ram = ctx.add_file(BinaryFile::memory_mapped("ram", 0x8000).with_bytes(cyclic_dump()))?;
    let a = ctx.read_at::<Node>(&ctx.pointer(ram, 0x10)?)?;

    ctx.write_root(a)?;
    assert_eq!(
        ctx.file(ram).and_then(BinaryFile::bytes).map(<[u8]>::to_vec),
        Some(cyclic_dump())
    );
    assert_eq!(ctx.calculate_size(a)?, 8);
    Ok(())
}

/// Moving a target moves every pointer to it on the next write.
#[test]
fn test_pointer_follows_moved_target() -> binweave::Result<()> {
    let mut ctx = memory_context();
    let ram = ctx.add_file(BinaryFile::memory_mapped("ram", 0x8000).with_bytes(cyclic_dump()))?;
    let a = ctx.read_at::<Node>(&ctx.pointer(ram, 0x10)?)?;
    let b = ctx.get(a).and_then(|n| n.next.value).expect("resolved");

    ctx.write_at(b, &ctx.pointer(ram, 0x28)?)?;
    ctx.write_root(a)?;

    let bytes = ctx.file(ram).and_then(BinaryFile::bytes).map(<[u8]>::to_vec).unwrap_or_default();
    assert_eq!(&bytes[0x14..0x18], &le(0x8028));
    assert_eq!(&bytes[0x28..0x2C], &le(2));
    Ok(())
}

#[test]
fn test_null_pointer_is_absent() -> binweave::Result<()> {
    let mut ctx = memory_context();
    let mut bytes = vec![0u8; 8];
    bytes[0] = 9;
    let ram = ctx.add_file(BinaryFile::memory_mapped("ram", 0x100).with_bytes(bytes))?;
    let node = ctx.read_at::<Node>(&ctx.pointer(ram, 0)?)?;
    let n = ctx.get(node).expect("cached");
    assert_eq!(n.value, 9);
    assert_eq!(n.next, Ptr::default());
    Ok(())
}

#[derive(Debug, Default, BinaryObject)]
struct Leaf {
    value: u32,
}

#[derive(Debug, Default, BinaryObject)]
struct Root {
    tag: u32,
    target: Ptr<Leaf>,
}

/// Zero is a real pointer when it lands in a file.
#[test]
fn test_zero_pointer_to_file_start() -> binweave::Result<()> {
    let bytes = vec![0xAA, 0, 0, 0, 0x01, 0, 0, 0, 0, 0, 0, 0];
    let mut ctx = memory_context();
    let file = ctx.add_file(BinaryFile::stream("buf", bytes.clone()))?;
    let root = ctx.read_at::<Root>(&ctx.pointer(file, 4)?)?;

    let leaf = ctx.get(root).and_then(|r| r.target.value).expect("offset 0 resolves");
    assert_eq!(ctx.get(leaf).map(|l| l.value), Some(0xAA));
    assert_eq!(
        ctx.get(root).and_then(|r| r.target.pointer.as_ref()).map(|p| p.file_offset()),
        Some(0)
    );

    ctx.write_root(root)?;
    assert_eq!(ctx.file(file).and_then(BinaryFile::bytes), Some(&bytes[..]));

    let mut mapped = memory_context();
    let ram = mapped.add_file(BinaryFile::memory_mapped("ram", 0).with_bytes(bytes))?;
    let root = mapped.read_at::<Root>(&mapped.pointer(ram, 4)?)?;
    let leaf = mapped.get(root).and_then(|r| r.target.value).expect("address 0 is mapped");
    assert_eq!(mapped.get(leaf).map(|l| l.value), Some(0xAA));
    Ok(())
}

#[test]
fn test_invalid_pointer_policies() -> binweave::Result<()> {
    let mut bytes = vec![0u8; 8];
    bytes[4..8].copy_from_slice(&le(0xDEAD_0000));

    let mut ctx = memory_context();
    let ram = ctx.add_file(BinaryFile::memory_mapped("ram", 0x100).with_bytes(bytes.clone()))?;
    let err = ctx.read_at::<Node>(&ctx.pointer(ram, 0)?).unwrap_err();
    match err {
        BinError::Pointer { offset, value, .. } => {
            assert_eq!(offset, 4);
            assert_eq!(value, 0xDEAD_0000);
        }
        other => panic!("unexpected error: {other}"),
    }

    let mut lenient = memory_context();
    let ram = lenient.add_file(
        BinaryFile::memory_mapped("ram", 0x100)
            .with_bytes(bytes)
            .allow_invalid_value(0xDEAD_0000),
    )?;
    let node = lenient.read_at::<Node>(&lenient.pointer(ram, 0)?)?;
    assert!(lenient.get(node).is_some_and(|n| n.next.pointer.is_none()));
    Ok(())
}

// --- FIELD OPTIONS ---

fn read_pointer(
    ctx: &mut Context,
    file: FileId,
    offset: i64,
    options: &PointerOptions,
) -> binweave::Result<Option<binweave::Pointer>> {
    let at = ctx.pointer(file, offset)?;
    let mut engine = ctx.deserializer()?;
    engine.goto(&at)?;
    engine.as_object().serialize_pointer(None, options, "ptr")
}

#[test]
fn test_anchored_and_narrow_pointers() -> binweave::Result<()> {
    let mut ctx = memory_context();
    let file = ctx.add_file(BinaryFile::stream("pak", vec![0x04, 0x00, 0xFF, 0xFF, 0, 0, 0, 0]))?;
    let anchor = ctx.pointer(file, 2)?;

    let options = PointerOptions::width(PointerWidth::U16).anchored(anchor.clone());
    let p = read_pointer(&mut ctx, file, 0, &options)?.expect("resolves");
    assert_eq!(p.file_offset(), 6);
    assert_eq!(p.serialized_offset(), 4);
    assert_eq!(p.anchor(), Some(&anchor));

    let nullable = PointerOptions::width(PointerWidth::U16).null_value(0xFFFF);
    assert_eq!(read_pointer(&mut ctx, file, 2, &nullable)?, None);

    let lenient = PointerOptions::width(PointerWidth::U16).allow_invalid();
    assert_eq!(read_pointer(&mut ctx, file, 2, &lenient)?, None);
    Ok(())
}

#[test]
fn test_redirect_after_target_file_left() -> binweave::Result<()> {
    let mut ctx = memory_context();
    let main = ctx.add_file(
        BinaryFile::stream("main", vec![0; 4])
            .with_redirect(PointerRedirect::File("fallback".into())),
    )?;
    let strict = ctx.add_file(BinaryFile::stream("strict", vec![0; 4]))?;
    let old = ctx.add_file(BinaryFile::stream("old", vec![0; 16]))?;
    let fallback = ctx.add_file(BinaryFile::stream("fallback", vec![0; 16]))?;

    let target = ctx.pointer(old, 12)?;
    ctx.remove_file(old)?;

    let start = ctx.pointer(main, 0)?;
    let strict_start = ctx.pointer(strict, 0)?;
    {
        let mut engine = ctx.serializer()?;
        let s = engine.as_object();
        s.goto(&start)?;
        let written = s
            .serialize_pointer(Some(&target), &PointerOptions::default(), "ref")?
            .expect("present");
        assert_eq!(written.file(), fallback);
        assert_eq!(written.file_offset(), 12);

        s.goto(&strict_start)?;
        let err = s
            .serialize_pointer(Some(&target), &PointerOptions::default(), "ref")
            .unwrap_err();
        assert!(matches!(err, BinError::Context(_)));
    }
    assert_eq!(ctx.file(main).and_then(BinaryFile::bytes), Some(&le(12)[..]));
    Ok(())
}

#[test]
fn test_do_at_restores_cursor() -> binweave::Result<()> {
    let mut ctx = memory_context();
    let file = ctx.add_file(BinaryFile::stream("f", vec![1, 2, 3, 4]))?;
    let start = ctx.pointer(file, 1)?;
    let target = ctx.pointer(file, 3)?;

    let mut engine = ctx.deserializer()?;
    let s = engine.as_object();
    s.goto(&start)?;
    assert_eq!(s.do_at(Some(&target), |s| s.serialize(0u8, "b"))?, Some(4));
    assert_eq!(s.current_pointer()?, start);

    let failed = s.do_at(Some(&target), |s| s.serialize(0u32, "overrun"));
    assert!(failed.is_err());
    assert_eq!(s.current_pointer()?, start);
    assert_eq!(s.do_at(None, |s| s.serialize(0u8, "x"))?, None);
    Ok(())
}
