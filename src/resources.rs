//! Centralized resource budgeting: RAM, spill disk, worker slots, and
//! per-job scratch directories. Reservations are RAII leases; exceeding a
//! budget fails fast instead of degrading.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};

use crate::config::ResourceLimits;
use crate::errors::PipelineError;
use crate::text::slugify;

#[derive(Debug, Default)]
struct Usage {
    memory_mb: u64,
    disk_mb: u64,
    workers: usize,
}

/// Tracks budget usage and hands out scratch directories.
#[derive(Clone)]
pub struct ResourceManager {
    limits: ResourceLimits,
    usage: Arc<Mutex<Usage>>,
    temp_root: PathBuf,
}

impl ResourceManager {
    pub fn new(limits: ResourceLimits) -> Result<Self> {
        let temp_root = limits.temp_dir.clone();
        std::fs::create_dir_all(&temp_root)
            .with_context(|| format!("Creating temp root {temp_root:?}"))?;
        Ok(Self {
            limits,
            usage: Arc::new(Mutex::new(Usage::default())),
            temp_root,
        })
    }

    /// Clamp a requested worker count to the configured budget.
    pub fn plan_workers(&self, requested: usize) -> usize {
        let requested = requested.max(1);
        match self.limits.max_workers {
            Some(limit) if limit > 0 => requested.min(limit).max(1),
            _ => requested,
        }
    }

    pub fn reserve(&self, memory_mb: u64, disk_mb: u64, workers: usize) -> Result<ResourceLease> {
        let mut usage = self.usage.lock().unwrap();
        if let Some(limit) = self.limits.memory_mb {
            if usage.memory_mb + memory_mb > limit {
                return Err(PipelineError::resource_limit(format!(
                    "RAM budget exceeded: requested {memory_mb} MB, \
                     available {} MB",
                    limit.saturating_sub(usage.memory_mb)
                ))
                .into());
            }
        }
        if let Some(limit) = self.limits.spill_mb {
            if usage.disk_mb + disk_mb > limit {
                return Err(PipelineError::resource_limit(format!(
                    "Spill budget exceeded: requested {disk_mb} MB, \
                     available {} MB",
                    limit.saturating_sub(usage.disk_mb)
                ))
                .into());
            }
        }
        if let Some(limit) = self.limits.max_workers {
            if usage.workers + workers > limit {
                return Err(PipelineError::resource_limit(format!(
                    "Worker budget exceeded: requested {workers}, \
                     available {}",
                    limit.saturating_sub(usage.workers)
                ))
                .into());
            }
        }
        usage.memory_mb += memory_mb;
        usage.disk_mb += disk_mb;
        usage.workers += workers;
        Ok(ResourceLease {
            usage: Arc::clone(&self.usage),
            memory_mb,
            disk_mb,
            workers,
        })
    }

    /// `temp_dir/<job_id>/<phase>/<schema_slug>/`, created on demand.
    pub fn scratch_dir(&self, job_id: &str, segments: &[&str]) -> Result<PathBuf> {
        let mut path = self.temp_root.join(slugify(job_id));
        for segment in segments {
            path.push(slugify(segment));
        }
        std::fs::create_dir_all(&path)
            .with_context(|| format!("Creating scratch directory {path:?}"))?;
        Ok(path)
    }

    /// Remove a job's scratch tree on terminal states.
    pub fn cleanup(&self, job_id: &str) {
        let target = self.temp_root.join(slugify(job_id));
        if target.exists() {
            let _ = std::fs::remove_dir_all(&target);
        }
    }

    pub fn temp_root(&self) -> &Path {
        &self.temp_root
    }
}

/// Budget reservation released automatically when dropped.
pub struct ResourceLease {
    usage: Arc<Mutex<Usage>>,
    memory_mb: u64,
    disk_mb: u64,
    workers: usize,
}

impl std::fmt::Debug for ResourceLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceLease")
            .field("memory_mb", &self.memory_mb)
            .field("disk_mb", &self.disk_mb)
            .field("workers", &self.workers)
            .finish()
    }
}

impl Drop for ResourceLease {
    fn drop(&mut self) {
        let mut usage = self.usage.lock().unwrap();
        usage.memory_mb = usage.memory_mb.saturating_sub(self.memory_mb);
        usage.disk_mb = usage.disk_mb.saturating_sub(self.disk_mb);
        usage.workers = usage.workers.saturating_sub(self.workers);
    }
}
