//! Structured progress and benchmark logging as JSON lines.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::Utc;
use log::warn;
use serde_json::json;

use crate::models::FileProgress;

/// Appends progress events to a JSONL file; shared across worker threads.
pub struct ProgressLogger {
    path: Option<PathBuf>,
    lock: Mutex<()>,
}

impl ProgressLogger {
    pub fn new(path: Option<PathBuf>) -> Result<Self> {
        if let Some(path) = &path {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)
                        .with_context(|| format!("Creating progress log directory {parent:?}"))?;
                }
            }
        }
        Ok(Self {
            path,
            lock: Mutex::new(()),
        })
    }

    pub fn disabled() -> Self {
        Self {
            path: None,
            lock: Mutex::new(()),
        }
    }

    pub fn emit(&self, progress: &FileProgress) {
        let Some(path) = &self.path else {
            return;
        };
        let payload = json!({
            "ts": Utc::now().timestamp_millis() as f64 / 1_000.0,
            "job_id": progress.job_id,
            "schema_id": progress.schema_id,
            "file": progress.file,
            "phase": progress.phase,
            "processed_rows": progress.processed_rows,
            "eta_s": progress.eta_s,
            "rows_per_sec": progress.rows_per_sec,
            "spill_rows": progress.spill_rows,
        });
        let _guard = self.lock.lock().unwrap();
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut file| writeln!(file, "{payload}"));
        if let Err(err) = result {
            warn!("Progress log append failed for {}: {err}", path.display());
        }
    }
}

/// Stores throughput measurements from the benchmark verb.
pub struct BenchmarkRecorder {
    path: PathBuf,
}

impl BenchmarkRecorder {
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Creating benchmark log directory {parent:?}"))?;
            }
        }
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn record(&self, dataset: &str, metrics: serde_json::Value) -> Result<()> {
        let mut payload = json!({
            "dataset": dataset,
            "ts": Utc::now().timestamp_millis() as f64 / 1_000.0,
        });
        if let (Some(target), Some(source)) = (payload.as_object_mut(), metrics.as_object()) {
            for (key, value) in source {
                target.insert(key.clone(), value.clone());
            }
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Opening benchmark log {:?}", self.path))?;
        writeln!(file, "{payload}").context("Appending benchmark record")
    }
}
