pub mod archive;
pub mod completion;
pub mod endpoint;
pub mod extract;
pub mod fetch;
pub mod slicer;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client as HttpClient;
use serde_json::json;
use sticker_contracts::config::ApiConfig;
use sticker_contracts::events::{now_utc_iso, EventWriter};
use sticker_contracts::grid::GridSpec;
use sticker_contracts::reference::{ImageBytes, ImageReference, SourceImage};
use sticker_contracts::runs::summary::{write_summary, RunSummary};

use crate::archive::{Archive, ArchivePackager};
use crate::completion::{CompletionClient, DEFAULT_PROMPT};
use crate::extract::extract_image_reference;
use crate::fetch::{ResilientFetcher, SaveOutcome};
use crate::slicer::{slice_grid, SliceReport};

pub const ARCHIVE_FILE_NAME: &str = "stickers.zip";

/// Blocking HTTP client without an overall deadline: a stalled completion
/// stream keeps the call waiting until the server closes it.
pub fn http_client() -> Result<HttpClient> {
    HttpClient::builder()
        .timeout(None::<Duration>)
        .build()
        .context("failed building HTTP client")
}

#[derive(Debug, Clone)]
pub struct RunOutput {
    pub reference: ImageReference,
    pub sheet_path: PathBuf,
    pub archive_path: PathBuf,
    pub report: SliceReport,
}

pub struct StickerEngine {
    run_dir: PathBuf,
    events: EventWriter,
    completions: CompletionClient,
    fetcher: ResilientFetcher,
    prompt: String,
    summary: RunSummary,
    summary_path: PathBuf,
}

impl StickerEngine {
    pub fn new(run_dir: impl Into<PathBuf>, events_path: impl Into<PathBuf>) -> Result<Self> {
        let run_dir = run_dir.into();
        std::fs::create_dir_all(&run_dir)
            .with_context(|| format!("failed creating run directory {}", run_dir.display()))?;
        let run_id = run_dir
            .file_name()
            .and_then(|value| value.to_str())
            .filter(|value| !value.is_empty())
            .unwrap_or("sticker-run")
            .to_string();
        let events = EventWriter::new(events_path.into(), run_id.clone());
        let http = http_client()?;

        events.emit(
            "run_started",
            json!({ "out_dir": run_dir.to_string_lossy() }),
        )?;

        Ok(Self {
            summary_path: run_dir.join("summary.json"),
            summary: RunSummary::new(run_id, now_utc_iso()),
            completions: CompletionClient::new(http.clone()),
            fetcher: ResilientFetcher::new(http, events.clone()),
            prompt: DEFAULT_PROMPT.to_string(),
            events,
            run_dir,
        })
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    pub fn with_proxy_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.fetcher = self.fetcher.with_proxy_prefix(prefix);
        self
    }

    /// Asks the completion endpoint for a sticker sheet and returns where it lives.
    pub fn generate_sheet(
        &mut self,
        image: &SourceImage,
        config: &ApiConfig,
    ) -> Result<ImageReference> {
        self.events.emit(
            "generation_started",
            json!({
                "model": config.model,
                "source_mime_type": image.mime_type,
                "source_bytes": image.bytes.len(),
            }),
        )?;

        let completion = self
            .completions
            .complete(config, image, &self.prompt)
            .context("sticker sheet generation failed")?;
        self.events.emit(
            "generation_completed",
            json!({
                "endpoint": completion.endpoint,
                "branch": completion.branch.as_str(),
                "content_chars": completion.content.chars().count(),
                "skipped_chunks": completion.skipped_chunks,
                "finished_cleanly": completion.finished_cleanly,
            }),
        )?;

        let reference = extract_image_reference(&completion.content)
            .context("sticker sheet generation failed")?;
        self.events.emit(
            "reference_extracted",
            json!({
                "reference": reference.abbreviated(),
                "data_uri": reference.is_data_uri(),
            }),
        )?;
        self.summary.reference = Some(reference.abbreviated());
        Ok(reference)
    }

    pub fn fetch_reference(&self, reference: &ImageReference) -> Result<ImageBytes> {
        let image = self.fetcher.fetch(reference)?;
        self.events.emit(
            "fetch_completed",
            json!({
                "reference": reference.abbreviated(),
                "bytes": image.bytes.len(),
                "mime_type": image.mime_type,
            }),
        )?;
        Ok(image)
    }

    /// Stores the fetched sheet as `sheet.<ext>` in the run directory.
    pub fn store_sheet(&mut self, image: &ImageBytes) -> Result<PathBuf> {
        let path = self.run_dir.join(format!("sheet.{}", image.extension()));
        std::fs::write(&path, &image.bytes)
            .with_context(|| format!("failed writing sheet {}", path.display()))?;
        self.summary.sheet_path = Some(path.to_string_lossy().to_string());
        Ok(path)
    }

    pub fn slice_to_archive(
        &mut self,
        sheet: &[u8],
        grid: GridSpec,
    ) -> Result<(Archive, SliceReport)> {
        let mut packager = ArchivePackager::new()?;
        let report = slice_grid(sheet, grid, &mut packager).context("sticker slicing failed")?;
        let archive = packager.finish()?;

        for skipped in &report.skipped {
            self.events.emit(
                "cell_skipped",
                json!({
                    "row": skipped.region.row,
                    "col": skipped.region.col,
                    "reason": skipped.reason,
                }),
            )?;
        }
        self.events.emit(
            "slice_completed",
            json!({
                "grid": grid.to_string(),
                "source_width": report.source_width,
                "source_height": report.source_height,
                "cells_written": report.cells_written,
                "cells_skipped": report.skipped.len(),
            }),
        )?;
        self.summary.grid = Some(grid.to_string());
        self.summary.cells_written = u64::from(report.cells_written);
        self.summary.cells_skipped = report.skipped.len() as u64;
        Ok((archive, report))
    }

    pub fn write_archive(&mut self, archive: &Archive, path: &Path) -> Result<()> {
        archive.write_to(path)?;
        self.events.emit(
            "archive_written",
            json!({
                "path": path.to_string_lossy(),
                "entries": archive.entries().len(),
                "bytes": archive.bytes().len(),
            }),
        )?;
        self.summary.archive_path = Some(path.to_string_lossy().to_string());
        Ok(())
    }

    /// Downloads one image to `path`, or hands the URL back when it cannot be fetched.
    pub fn save_reference(&self, reference: &ImageReference, path: &Path) -> Result<SaveOutcome> {
        self.fetcher.save(reference, path)
    }

    /// Photo in, sticker archive out: generate, fetch, store, slice, package.
    pub fn run(
        &mut self,
        image: &SourceImage,
        config: &ApiConfig,
        grid: GridSpec,
    ) -> Result<RunOutput> {
        let reference = self.generate_sheet(image, config)?;
        let sheet = self.fetch_reference(&reference)?;
        let sheet_path = self.store_sheet(&sheet)?;
        let (archive, report) = self.slice_to_archive(&sheet.bytes, grid)?;
        let archive_path = self.run_dir.join(ARCHIVE_FILE_NAME);
        self.write_archive(&archive, &archive_path)?;
        Ok(RunOutput {
            reference,
            sheet_path,
            archive_path,
            report,
        })
    }

    pub fn finish(&mut self) -> Result<()> {
        self.summary.finished_at = now_utc_iso();
        write_summary(&self.summary_path, &self.summary)?;
        self.events.emit(
            "run_finished",
            json!({ "summary_path": self.summary_path.to_string_lossy() }),
        )?;
        Ok(())
    }
}

pub(crate) fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() || parts.last().is_some_and(|last| last == trimmed) {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    truncate_text(&parts.join(": "), max_chars)
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
