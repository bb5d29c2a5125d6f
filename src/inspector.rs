//! Tools for inspecting a session: its files, address map, cached objects and warnings.
//! Useful when reverse-engineering a format.

use crate::context::Context;
use crate::file::FileKind;
use crate::primitives::Endian;
use crate::region::Region;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// A structural report of a session.
#[derive(Debug, Serialize)]
pub struct SessionReport {
    /// Root directory of the session.
    pub base_path: String,
    /// Live files in insertion order.
    pub files: Vec<FileReport>,
    /// Cached structure instances per type.
    pub objects: BTreeMap<String, usize>,
    /// Recorded warnings, rendered.
    pub warnings: Vec<String>,
}

/// One file of a session.
#[derive(Debug, Serialize)]
pub struct FileReport {
    /// Session file id.
    pub id: u32,
    /// Path relative to the base path.
    pub path: String,
    /// Address-space behaviour.
    pub kind: FileKind,
    /// Base address (memory-mapped files) or 0.
    pub base_address: i64,
    /// Current length in bytes.
    pub length: i64,
    /// Byte order.
    pub endian: Endian,
    /// Named regions.
    pub regions: Vec<Region>,
    /// Distinct bytes read so far, if reads are tracked.
    pub bytes_read: Option<usize>,
}

/// The session inspector.
#[derive(Debug)]
pub struct SessionInspector;

impl SessionInspector {
    /// Takes a snapshot of `ctx`.
    pub fn inspect(ctx: &Context) -> SessionReport {
        let files = ctx
            .files()
            .map(|file| FileReport {
                id: file.id().as_u32(),
                path: file.path().to_string(),
                kind: file.kind().clone(),
                base_address: file.base_address(),
                length: file.length(),
                endian: file.endian(),
                regions: file.regions().iter().cloned().collect(),
                bytes_read: ctx.bytes_read(file.id()),
            })
            .collect();

        SessionReport {
            base_path: ctx.base_path().display().to_string(),
            files,
            objects: ctx
                .cache()
                .type_summary()
                .into_iter()
                .map(|(ty, count)| (ty.to_string(), count))
                .collect(),
            warnings: ctx.warnings().iter().map(ToString::to_string).collect(),
        }
    }
}

impl fmt::Display for SessionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== SESSION REPORT ===")?;
        writeln!(f, "Base Path:      {}", self.base_path)?;
        writeln!(f, "\n[FILES]")?;
        for (i, file) in self.files.iter().enumerate() {
            file.fmt_tree(f, i + 1 == self.files.len())?;
        }
        writeln!(f, "\n[OBJECTS]")?;
        for (ty, count) in &self.objects {
            writeln!(f, "{count:>8} x {ty}")?;
        }
        if !self.warnings.is_empty() {
            writeln!(f, "\n[WARNINGS]")?;
            for warning in &self.warnings {
                writeln!(f, "- {warning}")?;
            }
        }
        Ok(())
    }
}

impl FileReport {
    fn fmt_tree(&self, f: &mut fmt::Formatter<'_>, is_last: bool) -> fmt::Result {
        let connector = if is_last { "└── " } else { "├── " };
        let child_prefix = if is_last { "    " } else { "│   " };
        let kind = match &self.kind {
            FileKind::Linear => "Linear".to_string(),
            FileKind::MemoryMapped => format!("Mapped @0x{:08X}", self.base_address),
            FileKind::Stream => "Stream".to_string(),
            FileKind::Encoded { encoder } => format!("Encoded ({encoder})"),
        };
        let read = self
            .bytes_read
            .map(|n| format!(" | Read: {n}b"))
            .unwrap_or_default();

        writeln!(
            f,
            "{connector}#{} {} [{kind}] Size: {}b | {:?}{read}",
            self.id, self.path, self.length, self.endian
        )?;
        for (i, region) in self.regions.iter().enumerate() {
            let connector = if i + 1 == self.regions.len() { "└── " } else { "├── " };
            writeln!(
                f,
                "{child_prefix}{connector}{} 0x{:X}..0x{:X}",
                region.name,
                region.offset,
                region.end()
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::BinaryFile;
    use crate::fs::MemoryFileSystem;
    use std::sync::Arc;

    #[test]
    fn report_lists_files_and_regions() -> crate::Result<()> {
        let mut ctx = Context::builder("")
            .file_system(Arc::new(MemoryFileSystem::new()))
            .build();
        ctx.add_file(
            BinaryFile::memory_mapped("ram.bin", 0x8000)
                .with_bytes(vec![0; 0x40])
                .with_region(Region::new("header", 0, 0x10)),
        )?;
        ctx.add_file(BinaryFile::stream("scratch", vec![1, 2, 3]))?;

        let report = SessionInspector::inspect(&ctx);
        assert_eq!(report.files.len(), 2);
        assert_eq!(report.files[0].regions.len(), 1);
        assert_eq!(report.files[1].length, 3);

        let text = report.to_string();
        assert!(text.contains("Mapped @0x00008000"));
        assert!(text.contains("header 0x0..0x10"));
        Ok(())
    }
}
