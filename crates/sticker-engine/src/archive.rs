use std::io::{Cursor, Write};
use std::path::Path;

use anyhow::{Context, Result};
use sticker_contracts::grid::{SlicedCell, ARCHIVE_FOLDER};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::slicer::CellSink;

/// A finalized zip archive held in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Archive {
    bytes: Vec<u8>,
    entries: Vec<String>,
}

impl Archive {
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Entry paths in insertion order, folder prefix included.
    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, &self.bytes)
            .with_context(|| format!("failed writing archive {}", path.display()))
    }
}

/// Collects named blobs under one folder and produces the archive once.
pub struct ArchivePackager {
    writer: ZipWriter<Cursor<Vec<u8>>>,
    folder: String,
    options: SimpleFileOptions,
    entries: Vec<String>,
}

impl ArchivePackager {
    pub fn new() -> Result<Self> {
        Self::with_folder(ARCHIVE_FOLDER)
    }

    pub fn with_folder(folder: &str) -> Result<Self> {
        let folder = folder.trim_matches('/').to_string();
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        writer
            .add_directory(format!("{folder}/"), options)
            .with_context(|| format!("failed creating archive folder {folder}"))?;
        Ok(Self {
            writer,
            folder,
            options,
            entries: Vec::new(),
        })
    }

    pub fn add(&mut self, name: &str, bytes: &[u8]) -> Result<()> {
        let path = format!("{}/{}", self.folder, name.trim_start_matches('/'));
        self.writer
            .start_file(path.clone(), self.options)
            .with_context(|| format!("failed starting archive entry {path}"))?;
        self.writer
            .write_all(bytes)
            .with_context(|| format!("failed writing archive entry {path}"))?;
        self.entries.push(path);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn finish(self) -> Result<Archive> {
        let Self {
            writer, entries, ..
        } = self;
        let cursor = writer.finish().context("failed finalizing archive")?;
        Ok(Archive {
            bytes: cursor.into_inner(),
            entries,
        })
    }
}

impl CellSink for ArchivePackager {
    fn accept(&mut self, cell: SlicedCell) -> Result<()> {
        self.add(&cell.file_name(), &cell.bytes)
    }
}
