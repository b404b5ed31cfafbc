//! Durable SQLite store for mappings, profiles, clusters, job status, and
//! telemetry. One database file per installation; every open applies the
//! pending integer-versioned migrations, which are idempotent. All access is
//! serialized through a store-level mutex, one connection per store handle.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::errors::PipelineError;
use crate::models::{
    ClusterDocument, FileColumnProfile, FileProgress, JobEventRecord, JobMetrics,
    JobProgressEvent, JobState, JobStatusRecord, MappingDocument, SpillMetrics, ValidationSummary,
};
use crate::synonyms::SynonymDictionary;

pub const MAX_PROGRESS_EVENTS_PER_SCHEMA: u64 = 500;

const MIGRATIONS: &[(i64, &[&str])] = &[
    (
        1,
        &[
            "CREATE TABLE IF NOT EXISTS schemas (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                columns_json TEXT NOT NULL,
                confidence REAL NOT NULL,
                canonical_schema_id TEXT,
                canonical_namespace TEXT,
                canonical_schema_version TEXT,
                updated_at REAL NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS blocks (
                block_key TEXT PRIMARY KEY,
                file_path TEXT NOT NULL,
                block_id INTEGER NOT NULL,
                schema_id TEXT,
                start_line INTEGER NOT NULL,
                end_line INTEGER NOT NULL,
                byte_start INTEGER NOT NULL,
                byte_end INTEGER NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_blocks_schema ON blocks(schema_id, block_id)",
            "CREATE TABLE IF NOT EXISTS stats (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                schema_id TEXT NOT NULL,
                column_name TEXT NOT NULL,
                metrics_json TEXT NOT NULL,
                updated_at REAL NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_stats_schema ON stats(schema_id, column_name)",
            "CREATE TABLE IF NOT EXISTS synonyms (
                canonical_name TEXT NOT NULL,
                variant TEXT NOT NULL,
                created_at REAL NOT NULL,
                PRIMARY KEY (canonical_name, variant)
            )",
            "CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                entity TEXT NOT NULL,
                action TEXT NOT NULL,
                detail TEXT,
                created_at REAL NOT NULL
            )",
        ],
    ),
    (
        2,
        &[
            "CREATE TABLE IF NOT EXISTS column_profiles (
                file_path TEXT NOT NULL,
                column_index INTEGER NOT NULL,
                name TEXT,
                profile_json TEXT NOT NULL,
                unique_estimate INTEGER NOT NULL,
                null_count INTEGER NOT NULL,
                updated_at REAL NOT NULL,
                PRIMARY KEY (file_path, column_index)
            )",
            "CREATE TABLE IF NOT EXISTS header_clusters (
                cluster_id TEXT PRIMARY KEY,
                canonical_name TEXT NOT NULL,
                members_json TEXT NOT NULL,
                confidence REAL NOT NULL,
                needs_review INTEGER NOT NULL,
                version INTEGER NOT NULL,
                reason_codes_json TEXT NOT NULL,
                updated_at REAL NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS artifact_metadata (
                artifact TEXT PRIMARY KEY,
                version INTEGER NOT NULL,
                updated_at REAL NOT NULL
            )",
        ],
    ),
    (
        3,
        &[
            "CREATE TABLE IF NOT EXISTS job_status (
                job_id TEXT PRIMARY KEY,
                state TEXT NOT NULL,
                detail TEXT,
                last_error TEXT,
                metadata_json TEXT,
                created_at REAL NOT NULL,
                updated_at REAL NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS job_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id TEXT NOT NULL,
                state TEXT NOT NULL,
                detail TEXT,
                created_at REAL NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_job_events_job ON job_events(job_id, created_at)",
        ],
    ),
    (
        4,
        &[
            "CREATE TABLE IF NOT EXISTS job_metrics (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id TEXT NOT NULL,
                schema_id TEXT NOT NULL,
                schema_name TEXT,
                rows INTEGER NOT NULL,
                rows_per_sec REAL NOT NULL,
                duration_ms INTEGER NOT NULL,
                short_rows INTEGER NOT NULL,
                long_rows INTEGER NOT NULL,
                empty_rows INTEGER NOT NULL,
                missing_required INTEGER NOT NULL,
                type_mismatches INTEGER NOT NULL,
                spill_count INTEGER NOT NULL,
                rows_spilled INTEGER NOT NULL,
                created_at REAL NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_job_metrics_job ON job_metrics(job_id, schema_id)",
            "CREATE TABLE IF NOT EXISTS job_progress_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id TEXT NOT NULL,
                schema_id TEXT NOT NULL,
                file_path TEXT NOT NULL,
                processed_rows INTEGER NOT NULL,
                eta_seconds REAL,
                rows_per_sec REAL,
                spill_rows INTEGER,
                created_at REAL NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_job_progress_schema
                ON job_progress_events(schema_id, created_at)",
        ],
    ),
];

fn now_seconds() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1_000.0
}

struct StoreInner {
    path: PathBuf,
    conn: Mutex<Connection>,
}

/// Handle to the installation store. Cloning shares the connection.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Creating store directory {parent:?}"))?;
            }
        }
        let conn = Connection::open(path)
            .map_err(|err| PipelineError::storage(format!("Opening store {path:?}: {err}")))?;
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(|err| PipelineError::storage(format!("Configuring store: {err}")))?;
        conn.query_row("PRAGMA journal_mode=WAL;", [], |_| Ok(()))
            .map_err(|err| PipelineError::storage(format!("Enabling WAL: {err}")))?;
        apply_migrations(&conn)?;
        Ok(Self {
            inner: Arc::new(StoreInner {
                path: path.to_path_buf(),
                conn: Mutex::new(conn),
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    fn with_conn<T>(&self, action: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> Result<T> {
        let conn = self.inner.conn.lock().unwrap();
        action(&conn).map_err(|err| {
            PipelineError::storage(format!("Store {:?}: {err}", self.inner.path)).into()
        })
    }

    pub fn applied_migrations(&self) -> Result<Vec<i64>> {
        self.with_conn(|conn| {
            let mut statement =
                conn.prepare("SELECT version FROM schema_migrations ORDER BY version")?;
            let rows = statement.query_map([], |row| row.get::<_, i64>(0))?;
            rows.collect()
        })
    }

    pub fn persist_mapping(&self, mapping: &MappingDocument) -> Result<()> {
        let now = now_seconds();
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute("DELETE FROM schemas", [])?;
            tx.execute("DELETE FROM blocks", [])?;
            tx.execute("DELETE FROM stats", [])?;
            for schema in &mapping.schemas {
                tx.execute(
                    "INSERT OR REPLACE INTO schemas(
                        id, name, columns_json, confidence,
                        canonical_schema_id, canonical_namespace,
                        canonical_schema_version, updated_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        schema.schema_id.to_string(),
                        schema.name,
                        serde_json::to_string(&schema.columns).unwrap_or_default(),
                        schema.confidence,
                        schema.canonical_schema_id,
                        schema.canonical_namespace,
                        schema.canonical_schema_version,
                        now,
                    ],
                )?;
            }
            for block in &mapping.blocks {
                let file_path = block.file_path.display().to_string();
                tx.execute(
                    "INSERT OR REPLACE INTO blocks(
                        block_key, file_path, block_id, schema_id,
                        start_line, end_line, byte_start, byte_end
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        format!("{file_path}:{}", block.block_id),
                        file_path,
                        block.block_id as i64,
                        block.schema_id.map(|id| id.to_string()),
                        block.start_line as i64,
                        block.end_line as i64,
                        block.byte_start as i64,
                        block.byte_end as i64,
                    ],
                )?;
            }
            for schema in &mapping.schemas {
                for column in &schema.columns {
                    let metrics = serde_json::json!({
                        "index": column.index,
                        "data_type": column.data_type,
                        "normalized_name": column.normalized_name,
                    });
                    tx.execute(
                        "INSERT INTO stats(schema_id, column_name, metrics_json, updated_at)
                         VALUES (?1, ?2, ?3, ?4)",
                        params![
                            schema.schema_id.to_string(),
                            column.raw_name,
                            metrics.to_string(),
                            now,
                        ],
                    )?;
                }
            }
            tx.commit()
        })
    }

    pub fn persist_column_profiles(&self, profiles: &[FileColumnProfile]) -> Result<()> {
        let now = now_seconds();
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute("DELETE FROM column_profiles", [])?;
            for entry in profiles {
                let unique = crate::profiler::HllLite::from_registers(
                    &entry.profile.hll_registers,
                )
                .estimate();
                tx.execute(
                    "INSERT OR REPLACE INTO column_profiles(
                        file_path, column_index, name, profile_json,
                        unique_estimate, null_count, updated_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        entry.file_path,
                        entry.column_index as i64,
                        entry.profile.name,
                        serde_json::to_string(&entry.profile).unwrap_or_default(),
                        unique as i64,
                        entry.profile.nulls as i64,
                        now,
                    ],
                )?;
            }
            tx.commit()
        })
    }

    pub fn persist_header_clusters(&self, document: &ClusterDocument) -> Result<()> {
        let now = now_seconds();
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute("DELETE FROM header_clusters", [])?;
            for cluster in &document.clusters {
                tx.execute(
                    "INSERT OR REPLACE INTO header_clusters(
                        cluster_id, canonical_name, members_json, confidence,
                        needs_review, version, reason_codes_json, updated_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        cluster.cluster_id.to_string(),
                        cluster.canonical_name,
                        serde_json::to_string(&cluster.members).unwrap_or_default(),
                        cluster.confidence,
                        cluster.needs_review as i64,
                        cluster.version as i64,
                        serde_json::to_string(&cluster.reason_codes).unwrap_or_default(),
                        now,
                    ],
                )?;
            }
            tx.execute(
                "INSERT INTO artifact_metadata(artifact, version, updated_at)
                 VALUES ('header_clusters', ?1, ?2)
                 ON CONFLICT(artifact) DO UPDATE SET version = ?1, updated_at = ?2",
                params![document.artifact_version as i64, now],
            )?;
            tx.commit()
        })
    }

    pub fn artifact_version(&self, artifact: &str) -> Result<Option<u64>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT version FROM artifact_metadata WHERE artifact = ?1",
                params![artifact],
                |row| row.get::<_, i64>(0),
            )
            .optional()
            .map(|value| value.map(|version| version as u64))
        })
    }

    pub fn persist_synonyms(&self, dictionary: &SynonymDictionary) -> Result<()> {
        let now = now_seconds();
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute("DELETE FROM synonyms", [])?;
            for (canonical, variant) in dictionary.entries() {
                tx.execute(
                    "INSERT OR REPLACE INTO synonyms(canonical_name, variant, created_at)
                     VALUES (?1, ?2, ?3)",
                    params![canonical, variant, now],
                )?;
            }
            tx.commit()
        })
    }

    pub fn record_audit_event(&self, entity: &str, action: &str, detail: Option<&str>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO audit_log(entity, action, detail, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![entity, action, detail, now_seconds()],
            )
            .map(|_| ())
        })
    }

    pub fn upsert_job_status(
        &self,
        job_id: &str,
        state: JobState,
        detail: Option<&str>,
        last_error: Option<&str>,
        metadata: &BTreeMap<String, String>,
    ) -> Result<JobStatusRecord> {
        let now = now_seconds();
        let metadata_json = if metadata.is_empty() {
            None
        } else {
            Some(serde_json::to_string(metadata).unwrap_or_default())
        };
        let created_at = self.with_conn(|conn| {
            let existing: Option<f64> = conn
                .query_row(
                    "SELECT created_at FROM job_status WHERE job_id = ?1",
                    params![job_id],
                    |row| row.get(0),
                )
                .optional()?;
            let created_at = existing.unwrap_or(now);
            conn.execute(
                "INSERT INTO job_status(
                    job_id, state, detail, last_error, metadata_json, created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ON CONFLICT(job_id) DO UPDATE SET
                    state = ?2, detail = ?3, last_error = ?4,
                    metadata_json = ?5, updated_at = ?7",
                params![
                    job_id,
                    state.as_str(),
                    detail,
                    last_error,
                    metadata_json,
                    created_at,
                    now,
                ],
            )?;
            Ok(created_at)
        })?;
        Ok(JobStatusRecord {
            job_id: job_id.to_string(),
            state: state.as_str().to_string(),
            detail: detail.map(|value| value.to_string()),
            last_error: last_error.map(|value| value.to_string()),
            metadata: metadata.clone(),
            created_at,
            updated_at: now,
        })
    }

    pub fn record_job_event(&self, job_id: &str, state: JobState, detail: Option<&str>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO job_events(job_id, state, detail, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![job_id, state.as_str(), detail, now_seconds()],
            )
            .map(|_| ())
        })
    }

    pub fn fetch_job_events(&self, job_id: &str) -> Result<Vec<JobEventRecord>> {
        self.with_conn(|conn| {
            let mut statement = conn.prepare(
                "SELECT job_id, state, detail, created_at
                 FROM job_events WHERE job_id = ?1 ORDER BY created_at, id",
            )?;
            let rows = statement.query_map(params![job_id], |row| {
                Ok(JobEventRecord {
                    job_id: row.get(0)?,
                    state: row.get(1)?,
                    detail: row.get(2)?,
                    created_at: row.get(3)?,
                })
            })?;
            rows.collect()
        })
    }

    pub fn fetch_job_status(&self, job_id: &str) -> Result<Option<JobStatusRecord>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT job_id, state, detail, last_error, metadata_json, created_at, updated_at
                 FROM job_status WHERE job_id = ?1",
                params![job_id],
                |row| {
                    let metadata_json: Option<String> = row.get(4)?;
                    let metadata = metadata_json
                        .and_then(|raw| serde_json::from_str(&raw).ok())
                        .unwrap_or_default();
                    Ok(JobStatusRecord {
                        job_id: row.get(0)?,
                        state: row.get(1)?,
                        detail: row.get(2)?,
                        last_error: row.get(3)?,
                        metadata,
                        created_at: row.get(5)?,
                        updated_at: row.get(6)?,
                    })
                },
            )
            .optional()
        })
    }

    pub fn record_job_metrics(&self, metrics: &JobMetrics) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO job_metrics(
                    job_id, schema_id, schema_name, rows, rows_per_sec, duration_ms,
                    short_rows, long_rows, empty_rows, missing_required, type_mismatches,
                    spill_count, rows_spilled, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    metrics.job_id,
                    metrics.schema_id,
                    metrics.schema_name,
                    metrics.rows as i64,
                    metrics.rows_per_sec,
                    metrics.duration_ms as i64,
                    metrics.validation.short_rows as i64,
                    metrics.validation.long_rows as i64,
                    metrics.validation.empty_rows as i64,
                    metrics.validation.missing_required as i64,
                    metrics.validation.type_mismatches as i64,
                    metrics.spill.spills as i64,
                    metrics.spill.rows_spilled as i64,
                    now_seconds(),
                ],
            )
            .map(|_| ())
        })
    }

    pub fn fetch_job_metrics(&self, job_id: &str) -> Result<Vec<JobMetrics>> {
        self.with_conn(|conn| {
            let mut statement = conn.prepare(
                "SELECT job_id, schema_id, schema_name, rows, rows_per_sec, duration_ms,
                        short_rows, long_rows, empty_rows, missing_required, type_mismatches,
                        spill_count, rows_spilled
                 FROM job_metrics WHERE job_id = ?1 ORDER BY schema_id, id",
            )?;
            let rows = statement.query_map(params![job_id], |row| {
                Ok(JobMetrics {
                    job_id: row.get(0)?,
                    schema_id: row.get(1)?,
                    schema_name: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                    rows: row.get::<_, i64>(3)? as u64,
                    rows_per_sec: row.get(4)?,
                    duration_ms: row.get::<_, i64>(5)? as u64,
                    validation: ValidationSummary {
                        total_rows: row.get::<_, i64>(3)? as u64,
                        short_rows: row.get::<_, i64>(6)? as u64,
                        long_rows: row.get::<_, i64>(7)? as u64,
                        empty_rows: row.get::<_, i64>(8)? as u64,
                        missing_required: row.get::<_, i64>(9)? as u64,
                        type_mismatches: row.get::<_, i64>(10)? as u64,
                    },
                    spill: SpillMetrics {
                        spills: row.get::<_, i64>(11)? as u64,
                        rows_spilled: row.get::<_, i64>(12)? as u64,
                        bytes_spilled: 0,
                        max_buffer_rows: 0,
                    },
                })
            })?;
            rows.collect()
        })
    }

    /// Append a progress tick and evict the oldest rows past the per-schema
    /// retention cap.
    pub fn record_progress_event(&self, progress: &FileProgress) -> Result<()> {
        let schema_id = progress
            .schema_id
            .clone()
            .unwrap_or_else(|| "unassigned".to_string());
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO job_progress_events(
                    job_id, schema_id, file_path, processed_rows,
                    eta_seconds, rows_per_sec, spill_rows, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    progress.job_id,
                    schema_id,
                    progress.file,
                    progress.processed_rows as i64,
                    progress.eta_s,
                    progress.rows_per_sec,
                    progress.spill_rows as i64,
                    now_seconds(),
                ],
            )?;
            conn.execute(
                "DELETE FROM job_progress_events
                 WHERE schema_id = ?1
                   AND id NOT IN (
                        SELECT id FROM job_progress_events
                        WHERE schema_id = ?1
                        ORDER BY created_at DESC, id DESC
                        LIMIT ?2
                   )",
                params![schema_id, MAX_PROGRESS_EVENTS_PER_SCHEMA as i64],
            )?;
            Ok(())
        })
    }

    pub fn count_progress_events(&self, schema_id: &str) -> Result<u64> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM job_progress_events WHERE schema_id = ?1",
                params![schema_id],
                |row| row.get::<_, i64>(0),
            )
            .map(|count| count as u64)
        })
    }

    pub fn fetch_progress_events(
        &self,
        schema_id: Option<&str>,
        limit: u64,
    ) -> Result<Vec<JobProgressEvent>> {
        self.with_conn(|conn| {
            let mut rows = Vec::new();
            let mut push = |row: &rusqlite::Row<'_>| -> rusqlite::Result<()> {
                rows.push(JobProgressEvent {
                    job_id: row.get(0)?,
                    schema_id: row.get(1)?,
                    file_path: row.get(2)?,
                    processed_rows: row.get::<_, i64>(3)? as u64,
                    eta_seconds: row.get(4)?,
                    rows_per_sec: row.get(5)?,
                    spill_rows: row.get::<_, Option<i64>>(6)?.unwrap_or(0) as u64,
                    emitted_at: row.get(7)?,
                });
                Ok(())
            };
            match schema_id {
                Some(schema_id) => {
                    let mut statement = conn.prepare(
                        "SELECT job_id, schema_id, file_path, processed_rows,
                                eta_seconds, rows_per_sec, spill_rows, created_at
                         FROM job_progress_events WHERE schema_id = ?1
                         ORDER BY created_at DESC, id DESC LIMIT ?2",
                    )?;
                    let mut result = statement.query(params![schema_id, limit as i64])?;
                    while let Some(row) = result.next()? {
                        push(row)?;
                    }
                }
                None => {
                    let mut statement = conn.prepare(
                        "SELECT job_id, schema_id, file_path, processed_rows,
                                eta_seconds, rows_per_sec, spill_rows, created_at
                         FROM job_progress_events
                         ORDER BY created_at DESC, id DESC LIMIT ?1",
                    )?;
                    let mut result = statement.query(params![limit as i64])?;
                    while let Some(row) = result.next()? {
                        push(row)?;
                    }
                }
            }
            Ok(rows)
        })
    }
}

fn apply_migrations(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at REAL NOT NULL
        )",
        [],
    )
    .map_err(|err| PipelineError::storage(format!("Creating schema_migrations: {err}")))?;

    let applied: Vec<i64> = {
        let mut statement = conn
            .prepare("SELECT version FROM schema_migrations")
            .map_err(|err| PipelineError::storage(format!("Reading migrations: {err}")))?;
        let rows = statement
            .query_map([], |row| row.get::<_, i64>(0))
            .map_err(|err| PipelineError::storage(format!("Reading migrations: {err}")))?;
        rows.filter_map(|row| row.ok()).collect()
    };

    for (version, statements) in MIGRATIONS {
        if applied.contains(version) {
            continue;
        }
        for statement in *statements {
            conn.execute(statement, []).map_err(|err| {
                PipelineError::storage(format!("Applying migration {version}: {err}"))
            })?;
        }
        conn.execute(
            "INSERT INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
            params![version, now_seconds()],
        )
        .map_err(|err| PipelineError::storage(format!("Recording migration {version}: {err}")))?;
    }
    Ok(())
}
