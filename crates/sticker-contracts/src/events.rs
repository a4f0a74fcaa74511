use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

/// Append-only `events.jsonl` log for one run.
///
/// Every line is a compact JSON object carrying `type`, `run_id` and `ts`,
/// followed by the caller's fields. A writer built with [`EventWriter::disabled`]
/// accepts events and drops them.
#[derive(Debug, Clone)]
pub struct EventWriter {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    path: Option<PathBuf>,
    run_id: String,
    lock: Mutex<()>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, run_id: impl Into<String>) -> Self {
        Self::build(Some(path.into()), run_id.into())
    }

    pub fn disabled(run_id: impl Into<String>) -> Self {
        Self::build(None, run_id.into())
    }

    fn build(path: Option<PathBuf>, run_id: String) -> Self {
        Self {
            inner: Arc::new(Inner {
                path,
                run_id,
                lock: Mutex::new(()),
            }),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.inner.path.as_deref()
    }

    /// Writes one event. Non-object payloads are stored under `value`.
    pub fn emit(&self, event_type: &str, payload: Value) -> anyhow::Result<Value> {
        let mut event = Map::new();
        event.insert("type".to_string(), Value::String(event_type.to_string()));
        event.insert(
            "run_id".to_string(),
            Value::String(self.inner.run_id.clone()),
        );
        event.insert("ts".to_string(), Value::String(now_utc_iso()));
        match payload {
            Value::Object(fields) => {
                for (key, value) in fields {
                    if key == "type" || key == "run_id" || key == "ts" {
                        continue;
                    }
                    event.insert(key, value);
                }
            }
            Value::Null => {}
            other => {
                event.insert("value".to_string(), other);
            }
        }
        let event = Value::Object(event);

        let Some(path) = self.inner.path.as_deref() else {
            return Ok(event);
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let line = serde_json::to_string(&event)?;
        let _guard = self
            .inner
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("event writer lock poisoned"))?;
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        Ok(event)
    }
}

pub fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use chrono::DateTime;
    use serde_json::{json, Value};

    use super::EventWriter;

    #[test]
    fn emit_appends_one_line_per_event() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("nested").join("events.jsonl");
        let writer = EventWriter::new(&path, "run-7");

        let emitted = writer.emit("slice_completed", json!({ "cells_written": 24 }))?;
        writer.emit("archive_written", json!({ "entries": 24 }))?;

        let content = fs::read_to_string(&path)?;
        let lines: Vec<Value> = content
            .lines()
            .map(serde_json::from_str)
            .collect::<Result<_, _>>()?;
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], emitted);
        assert_eq!(lines[0]["type"], json!("slice_completed"));
        assert_eq!(lines[0]["run_id"], json!("run-7"));
        assert_eq!(lines[0]["cells_written"], json!(24));
        assert_eq!(lines[1]["type"], json!("archive_written"));
        DateTime::parse_from_rfc3339(lines[1]["ts"].as_str().unwrap_or(""))?;
        Ok(())
    }

    #[test]
    fn payload_cannot_replace_envelope_fields() -> anyhow::Result<()> {
        let writer = EventWriter::disabled("run-1");
        let emitted = writer.emit("one", json!({ "type": "other", "run_id": "x", "n": 1 }))?;
        assert_eq!(emitted["type"], json!("one"));
        assert_eq!(emitted["run_id"], json!("run-1"));
        assert_eq!(emitted["n"], json!(1));

        let scalar = writer.emit("two", json!("hello"))?;
        assert_eq!(scalar["value"], json!("hello"));
        Ok(())
    }

    #[test]
    fn disabled_writer_touches_no_files() -> anyhow::Result<()> {
        let writer = EventWriter::disabled("run-1");
        assert!(writer.path().is_none());
        writer.emit("ignored", Value::Null)?;
        Ok(())
    }
}
