use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::events::now_utc_iso;

/// Final record of one generate/slice/package run, written as `summary.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub started_at: String,
    pub finished_at: String,
    pub reference: Option<String>,
    pub sheet_path: Option<String>,
    pub grid: Option<String>,
    pub cells_written: u64,
    pub cells_skipped: u64,
    pub archive_path: Option<String>,
}

impl RunSummary {
    pub fn new(run_id: impl Into<String>, started_at: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            started_at: started_at.into(),
            finished_at: String::new(),
            reference: None,
            sheet_path: None,
            grid: None,
            cells_written: 0,
            cells_skipped: 0,
            archive_path: None,
        }
    }
}

pub fn write_summary(path: &Path, summary: &RunSummary) -> anyhow::Result<()> {
    let mut payload = serde_json::to_value(summary)?;
    if let Some(fields) = payload.as_object_mut() {
        fields.insert("ts".to_string(), serde_json::Value::String(now_utc_iso()));
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(&payload)?)?;
    Ok(())
}
