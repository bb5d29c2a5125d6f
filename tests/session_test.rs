#![allow(missing_docs)]

use binweave::{
    BinError, BinaryFile, BinaryObject, Context, MemoryFileSystem, Region, SessionInspector,
};
use std::sync::Arc;

#[derive(Debug, Default, Clone, PartialEq, BinaryObject)]
struct Entry {
    id: u16,
    value: u32,
}

#[derive(Debug, PartialEq)]
struct GameSettings {
    region: &'static str,
}

/// Standard file IO through memory-mapped reads and buffered writes.
#[test]
#[cfg(not(target_arch = "wasm32"))]
fn test_standard_file_io() -> binweave::Result<()> {
    let dir = tempfile::tempdir()?;
    std::fs::write(dir.path().join("entry.bin"), [0x07, 0x00, 0x01, 0x00, 0x00, 0x00])?;

    let mut ctx = Context::new(dir.path());
    let file = ctx.add_file(BinaryFile::linear("entry.bin"))?;
    assert_eq!(ctx.file(file).map(BinaryFile::length), Some(6));

    let entry = ctx.read_path::<Entry>("entry.bin")?;
    assert_eq!(ctx.get(entry).map(|e| (e.id, e.value)), Some((7, 1)));

    if let Some(e) = ctx.get_mut(entry) {
        e.value = 0x0102_0304;
    }
    ctx.write_root(entry)?;
    ctx.close()?;
    assert_eq!(
        std::fs::read(dir.path().join("entry.bin"))?,
        vec![0x07, 0x00, 0x04, 0x03, 0x02, 0x01]
    );

    // Reading after writing reopens the file.
    let mut reread = Context::new(dir.path());
    let file = reread.add_file(BinaryFile::linear("entry.bin"))?;
    let entry = reread.read_root::<Entry>(file)?;
    assert_eq!(reread.get(entry).map(|e| e.value), Some(0x0102_0304));
    Ok(())
}

/// A file marked for recreation is truncated by its first write.
#[test]
fn test_recreate_on_write() -> binweave::Result<()> {
    let fs = MemoryFileSystem::new();
    fs.insert("out/new.bin", vec![0xFF; 32]);
    let mut ctx = Context::builder("out").file_system(Arc::new(fs.clone())).build();
    let file = ctx.add_file(BinaryFile::linear("new.bin").recreate_on_write(true))?;

    let entry = ctx.alloc(Entry { id: 1, value: 2 });
    ctx.write_at(entry, &ctx.pointer(file, 0)?)?;
    assert_eq!(fs.get("out/new.bin"), Some(vec![1, 0, 2, 0, 0, 0]));
    assert_eq!(ctx.file(file).map(BinaryFile::length), Some(6));
    Ok(())
}

#[test]
fn test_read_map_export() -> binweave::Result<()> {
    let fs = MemoryFileSystem::new();
    fs.insert("data/save.bin", vec![0; 10]);
    let mut ctx = Context::builder("data")
        .file_system(Arc::new(fs.clone()))
        .track_reads(true)
        .build();
    let file = ctx.add_file(BinaryFile::linear("save.bin"))?;
    let start = ctx.pointer(file, 2)?;
    ctx.read_at::<Entry>(&start)?;

    assert_eq!(ctx.bytes_read(file), Some(6));
    ctx.export_read_map(file, "save.map")?;
    assert_eq!(
        fs.get("data/save.map"),
        Some(vec![0, 0, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0, 0])
    );
    Ok(())
}

#[test]
fn test_settings_bags_and_pre_defined_pointers() -> binweave::Result<()> {
    let mut ctx = Context::builder("")
        .file_system(Arc::new(MemoryFileSystem::new()))
        .build();

    let missing = ctx.settings_bag::<GameSettings>().unwrap_err();
    assert!(matches!(missing, BinError::Context(_)));
    ctx.add_settings(GameSettings { region: "PAL" });
    assert_eq!(ctx.settings_bag::<GameSettings>()?, &GameSettings { region: "PAL" });

    let ram = ctx.add_file(BinaryFile::memory_mapped("ram", 0x8000_0000).with_bytes(vec![0; 0x100]))?;
    ctx.add_pre_defined_pointer("entries", ram, 0x8000_0040)?;
    let p = ctx.pre_defined_pointer("entries")?;
    assert_eq!(p.file(), ram);
    assert_eq!(p.file_offset(), 0x40);

    match ctx.pre_defined_pointer("missing") {
        Err(BinError::Context(msg)) => assert!(msg.contains("missing")),
        other => panic!("unexpected result: {other:?}"),
    }
    Ok(())
}

#[test]
fn test_temporary_file_is_removed() -> binweave::Result<()> {
    let mut ctx = Context::builder("")
        .file_system(Arc::new(MemoryFileSystem::new()))
        .build();
    let value = ctx.with_temporary_file(BinaryFile::stream("tmp", vec![3, 0, 9, 0, 0, 0]), |ctx, id| {
        let entry = ctx.read_root::<Entry>(id)?;
        Ok(ctx.get(entry).cloned())
    })?;
    assert_eq!(value, Some(Entry { id: 3, value: 9 }));
    assert_eq!(ctx.files().count(), 0);

    let failed = ctx.with_temporary_file(BinaryFile::stream("tmp", vec![1]), |ctx, id| {
        ctx.read_root::<Entry>(id)
    });
    assert!(failed.is_err());
    assert!(ctx.file_by_path("tmp").is_none());
    Ok(())
}

#[test]
fn test_inspector_report() -> binweave::Result<()> {
    let mut ctx = Context::builder("")
        .file_system(Arc::new(MemoryFileSystem::new()))
        .track_reads(true)
        .build();
    let file = ctx.add_file(
        BinaryFile::stream("save", vec![1, 0, 2, 0, 0, 0, 0xAA])
            .with_region(Region::new("entry", 0, 6)),
    )?;
    ctx.read_root::<Entry>(file)?;

    let report = SessionInspector::inspect(&ctx);
    assert_eq!(report.files.len(), 1);
    assert_eq!(report.files[0].bytes_read, Some(6));
    assert_eq!(report.objects.values().sum::<usize>(), 1);
    assert!(report.to_string().contains("entry 0x0..0x6"));
    assert_eq!(
        ctx.file(file).and_then(|f| f.region_at(3)).map(|r| r.name.as_str()),
        Some("entry")
    );
    Ok(())
}
