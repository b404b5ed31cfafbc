//! Checkpoint registry and the job state machine.
//!
//! Checkpoints live at `checkpoints/<phase>/<job_id>.json` and are written
//! with a temp-file-plus-rename so a crash never leaves a torn snapshot.
//! The state machine persists every transition to the store together with an
//! event-log append, under one per-job lock.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::Utc;
use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::PipelineError;
use crate::io_utils;
use crate::models::JobState;
use crate::store::Store;

/// Snapshot payload persisted per `(job_id, phase)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub job_id: String,
    pub phase: String,
    pub payload: Value,
    pub updated_at: f64,
}

/// Filesystem-backed checkpoint store, single writer per job.
pub struct CheckpointRegistry {
    base_dir: PathBuf,
    lock: Mutex<()>,
}

impl CheckpointRegistry {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            lock: Mutex::new(()),
        }
    }

    fn path_for(&self, job_id: &str, phase: &str) -> PathBuf {
        let safe_phase: String = phase
            .chars()
            .map(|ch| if ch == '/' || ch == '\\' { '_' } else { ch })
            .collect();
        let safe_job: String = job_id
            .chars()
            .map(|ch| {
                if ch.is_alphanumeric() || ch == '-' || ch == '_' {
                    ch
                } else {
                    '_'
                }
            })
            .collect();
        self.base_dir.join(safe_phase).join(format!("{safe_job}.json"))
    }

    /// Last committed snapshot, or `None` when the job has no checkpoint. A
    /// corrupt file reads as absent rather than failing the resume.
    pub fn load(&self, job_id: &str, phase: &str) -> Option<CheckpointRecord> {
        let path = self.path_for(job_id, phase);
        let _guard = self.lock.lock().unwrap();
        let raw = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str::<CheckpointRecord>(&raw) {
            Ok(record) => Some(record),
            Err(err) => {
                warn!("Discarding unreadable checkpoint {}: {err}", path.display());
                None
            }
        }
    }

    pub fn save(&self, job_id: &str, phase: &str, payload: Value) -> Result<()> {
        let record = CheckpointRecord {
            job_id: job_id.to_string(),
            phase: phase.to_string(),
            payload,
            updated_at: Utc::now().timestamp_millis() as f64 / 1_000.0,
        };
        let path = self.path_for(job_id, phase);
        let _guard = self.lock.lock().unwrap();
        io_utils::write_json_atomic(&path, &record)
            .with_context(|| format!("Persisting checkpoint for job '{job_id}' phase '{phase}'"))
    }

    /// Drop the snapshot after terminal success; failures keep it for resume.
    pub fn clear(&self, job_id: &str, phase: &str) -> Result<()> {
        let path = self.path_for(job_id, phase);
        let _guard = self.lock.lock().unwrap();
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => {
                Err(err).with_context(|| format!("Removing checkpoint {}", path.display()))
            }
        }
    }
}

struct TrackerInner {
    state: JobState,
}

/// Thread-safe job state machine persisting transitions to the store.
pub struct JobTracker {
    job_id: String,
    store: Option<Store>,
    metadata: BTreeMap<String, String>,
    inner: Mutex<TrackerInner>,
}

impl JobTracker {
    pub fn new(
        job_id: impl Into<String>,
        store: Option<Store>,
        metadata: BTreeMap<String, String>,
    ) -> Result<Self> {
        let tracker = Self {
            job_id: job_id.into(),
            store,
            metadata,
            inner: Mutex::new(TrackerInner {
                state: JobState::Pending,
            }),
        };
        tracker.record(JobState::Pending, Some("job registered"), None)?;
        Ok(tracker)
    }

    pub fn state(&self) -> JobState {
        self.inner.lock().unwrap().state
    }

    /// Forward transition. Terminal states reject everything; backward
    /// transitions are invalid.
    pub fn transition(&self, target: JobState, detail: Option<&str>) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.state == target {
            return Ok(());
        }
        if !can_transition(inner.state, target) {
            return Err(PipelineError::storage(format!(
                "Invalid job transition {} -> {}",
                inner.state.as_str(),
                target.as_str()
            ))
            .into());
        }
        inner.state = target;
        drop(inner);
        self.record(target, detail, None)
    }

    pub fn mark_failed(&self, detail: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.state = JobState::Failed;
        drop(inner);
        if let Err(err) = self.record(JobState::Failed, Some(detail), Some(detail)) {
            warn!("Failed to persist FAILED status for job '{}': {err:#}", self.job_id);
        }
    }

    pub fn mark_cancelled(&self, detail: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.state = JobState::Cancelled;
        drop(inner);
        if let Err(err) = self.record(JobState::Cancelled, Some(detail), None) {
            warn!(
                "Failed to persist CANCELLED status for job '{}': {err:#}",
                self.job_id
            );
        }
    }

    fn record(&self, state: JobState, detail: Option<&str>, last_error: Option<&str>) -> Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        store
            .upsert_job_status(&self.job_id, state, detail, last_error, &self.metadata)
            .and_then(|_| store.record_job_event(&self.job_id, state, detail))
            .map_err(|err| {
                PipelineError::storage(format!(
                    "Recording state {} for job '{}': {err:#}",
                    state.as_str(),
                    self.job_id
                ))
                .into()
            })
    }
}

fn can_transition(current: JobState, target: JobState) -> bool {
    if current.is_terminal() {
        return false;
    }
    if matches!(target, JobState::Failed | JobState::Cancelled) {
        return true;
    }
    target.rank() >= current.rank()
}

/// Checkpoint path layout helper used by the CLI `--resume` validation.
pub fn checkpoint_exists(base_dir: &Path, phase: &str, job_id: &str) -> bool {
    CheckpointRegistry::new(base_dir).load(job_id, phase).is_some()
}

/// Map a phase failure onto the job state machine: cooperative cancels
/// become CANCELLED, anything else FAILED with the serialized error.
/// Checkpoints stay intact either way so `--resume` replays from the last
/// committed snapshot.
pub fn resolve_failure(tracker: &JobTracker, error: &anyhow::Error) {
    use crate::errors::ErrorCode;

    for cause in error.chain() {
        if let Some(pipeline) = cause.downcast_ref::<PipelineError>() {
            if pipeline.code == ErrorCode::UserAbort {
                tracker.mark_cancelled(&pipeline.message);
                return;
            }
        }
    }
    tracker.mark_failed(&format!("{error:#}"));
}
