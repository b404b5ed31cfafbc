//! Materialization: per-schema tasks executed on a fixed two-slot pool with
//! back-pressured spill buffering, block-granular checkpoints, and live
//! progress telemetry.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossbeam_channel::unbounded;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::canonical::{CanonicalRegistry, CanonicalValidator};
use crate::checkpoint::{CheckpointRegistry, JobTracker};
use crate::errors::{ErrorCode, PipelineError};
use crate::io_utils;
use crate::models::{
    FileBlock, FileProgress, JobMetrics, JobState, MappingDocument, SchemaDefinition, SpillMetrics,
    ValidationSummary,
};
use crate::offsets::{NormalizedRow, RowNormalizer};
use crate::profiler::split_delimited;
use crate::progress::ProgressLogger;
use crate::resources::ResourceManager;
use crate::store::Store;
use crate::writers::{build_writer, WriterCursor, WriterFormat};

pub const MAX_CONCURRENT_SCHEMA_TASKS: usize = 2;
pub const CHECKPOINT_PHASE: &str = "materialize";
const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);
const ETA_SMOOTHING_WINDOW_SECS: f64 = 30.0;

/// One planned task: a schema and its ordered block ranges.
#[derive(Debug, Clone, Serialize)]
pub struct PlanEntry {
    pub schema_id: String,
    pub schema_name: String,
    pub block_count: usize,
    pub estimated_rows: u64,
    pub source_files: Vec<String>,
}

/// Group blocks by owning schema, ordered by `(file_path, start_line)`.
pub fn build_plan(mapping: &MappingDocument) -> Vec<(SchemaDefinition, Vec<FileBlock>)> {
    let mut tasks = Vec::new();
    for schema in &mapping.schemas {
        let mut blocks: Vec<FileBlock> = mapping
            .blocks
            .iter()
            .filter(|block| block.schema_id == Some(schema.schema_id))
            .cloned()
            .collect();
        if blocks.is_empty() {
            continue;
        }
        blocks.sort_by(|a, b| {
            a.file_path
                .cmp(&b.file_path)
                .then_with(|| a.start_line.cmp(&b.start_line))
        });
        tasks.push((schema.clone(), blocks));
    }
    tasks.sort_by(|a, b| a.0.name.cmp(&b.0.name));
    tasks
}

pub fn plan_summary(tasks: &[(SchemaDefinition, Vec<FileBlock>)]) -> Vec<PlanEntry> {
    tasks
        .iter()
        .map(|(schema, blocks)| {
            let mut source_files: Vec<String> = blocks
                .iter()
                .map(|block| block.file_path.display().to_string())
                .collect();
            source_files.sort();
            source_files.dedup();
            PlanEntry {
                schema_id: schema.schema_id.to_string(),
                schema_name: schema.name.clone(),
                block_count: blocks.len(),
                estimated_rows: blocks.iter().map(FileBlock::row_span).sum(),
                source_files,
            }
        })
        .collect()
}

/// Checkpoint payload for one schema inside a materialize job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaCheckpoint {
    pub next_block_index: usize,
    pub writer: WriterCursor,
}

/// Job-level checkpoint payload: per-schema snapshots keyed by schema id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MaterializeCheckpoint {
    #[serde(default)]
    pub schemas: std::collections::BTreeMap<String, SchemaCheckpoint>,
}

/// Width normalization and per-row validation counters. Rows are padded or
/// truncated to the schema width; the observed pre-reorder width drives the
/// short/long counters.
pub struct ValidationTracker {
    expected_columns: usize,
    summary: ValidationSummary,
    canonical: Option<CanonicalValidator>,
}

impl ValidationTracker {
    pub fn new(expected_columns: usize, canonical: Option<CanonicalValidator>) -> Self {
        Self {
            expected_columns: expected_columns.max(1),
            summary: ValidationSummary::default(),
            canonical,
        }
    }

    pub fn normalize(&mut self, mut values: Vec<String>, observed_length: usize) -> Vec<String> {
        if values.iter().all(|value| value.trim().is_empty()) {
            self.summary.empty_rows += 1;
        }
        if observed_length < self.expected_columns {
            self.summary.short_rows += 1;
        } else if observed_length > self.expected_columns {
            self.summary.long_rows += 1;
        }
        if values.len() < self.expected_columns {
            values.resize(self.expected_columns, String::new());
        } else if values.len() > self.expected_columns {
            values.truncate(self.expected_columns);
        }
        if let Some(validator) = &mut self.canonical {
            validator.validate(&mut values);
        }
        self.summary.total_rows += 1;
        values
    }

    pub fn summary(&self) -> ValidationSummary {
        let mut summary = self.summary;
        if let Some(validator) = &self.canonical {
            summary.missing_required = validator.missing_required;
            summary.type_mismatches = validator.type_mismatches;
        }
        summary
    }
}

/// Bounded buffer between the normalizer and the writer. When the buffer
/// fills, rows overflow to a JSONL file in the job scratch directory and are
/// drained back through the sink, so the writer sets the pace without the
/// reader holding everything in memory.
pub struct SpillBuffer {
    threshold: usize,
    spool_dir: PathBuf,
    buffer: Vec<NormalizedRow>,
    pub telemetry: SpillMetrics,
    pub rows_skipped: u64,
}

impl SpillBuffer {
    pub fn new(threshold: usize, spool_dir: PathBuf) -> Self {
        Self {
            threshold: threshold.max(1),
            spool_dir,
            buffer: Vec::new(),
            telemetry: SpillMetrics::default(),
            rows_skipped: 0,
        }
    }

    pub fn push(
        &mut self,
        row: NormalizedRow,
        sink: &mut dyn FnMut(NormalizedRow) -> Result<()>,
    ) -> Result<()> {
        self.buffer.push(row);
        self.telemetry.max_buffer_rows = self.telemetry.max_buffer_rows.max(self.buffer.len() as u64);
        if self.buffer.len() >= self.threshold {
            self.spill(sink)?;
        }
        Ok(())
    }

    pub fn flush(&mut self, sink: &mut dyn FnMut(NormalizedRow) -> Result<()>) -> Result<()> {
        for row in self.buffer.drain(..) {
            sink(row)?;
        }
        Ok(())
    }

    fn spill(&mut self, sink: &mut dyn FnMut(NormalizedRow) -> Result<()>) -> Result<()> {
        std::fs::create_dir_all(&self.spool_dir)
            .with_context(|| format!("Creating spool directory {:?}", self.spool_dir))?;
        let spill_path = self
            .spool_dir
            .join(format!("spill_{}.jsonl", Uuid::new_v4().simple()));
        {
            let mut file = File::create(&spill_path)
                .with_context(|| format!("Creating spill file {spill_path:?}"))?;
            for row in &self.buffer {
                let payload = serde_json::json!({
                    "values": row.values,
                    "observed_length": row.observed_length,
                });
                writeln!(file, "{payload}").context("Writing spill row")?;
            }
        }
        self.telemetry.spills += 1;
        self.telemetry.rows_spilled += self.buffer.len() as u64;
        self.telemetry.bytes_spilled += spill_path.metadata().map(|meta| meta.len()).unwrap_or(0);
        self.buffer.clear();
        self.drain_spill(&spill_path, sink)
    }

    fn drain_spill(
        &mut self,
        path: &Path,
        sink: &mut dyn FnMut(NormalizedRow) -> Result<()>,
    ) -> Result<()> {
        let file = File::open(path).with_context(|| format!("Opening spill file {path:?}"))?;
        let reader = BufReader::new(file);
        for line in reader.lines() {
            let line = line.context("Reading spill row")?;
            if line.trim().is_empty() {
                continue;
            }
            #[derive(Deserialize)]
            struct SpillRow {
                values: Vec<String>,
                observed_length: usize,
            }
            // A row that no longer parses is skipped and counted; it never
            // aborts the job.
            let row: SpillRow = match serde_json::from_str(&line) {
                Ok(row) => row,
                Err(err) => {
                    warn!(
                        "[{}] Skipping unreadable spill row in {}: {err}",
                        ErrorCode::ParsingError,
                        path.display()
                    );
                    self.rows_skipped += 1;
                    continue;
                }
            };
            sink(NormalizedRow {
                values: row.values,
                observed_length: row.observed_length,
            })?;
        }
        let _ = std::fs::remove_file(path);
        Ok(())
    }
}

/// Exponentially smoothed throughput for ETA computation.
struct EtaTracker {
    smoothed_rate: Option<f64>,
    last_instant: Instant,
    last_rows: u64,
}

impl EtaTracker {
    fn new() -> Self {
        Self {
            smoothed_rate: None,
            last_instant: Instant::now(),
            last_rows: 0,
        }
    }

    fn update(&mut self, processed_rows: u64) -> Option<f64> {
        let elapsed = self.last_instant.elapsed().as_secs_f64();
        if elapsed <= 0.0 {
            return self.smoothed_rate;
        }
        let delta = processed_rows.saturating_sub(self.last_rows) as f64;
        let instantaneous = delta / elapsed;
        let alpha = (elapsed / ETA_SMOOTHING_WINDOW_SECS).clamp(0.05, 1.0);
        self.smoothed_rate = Some(match self.smoothed_rate {
            Some(current) => alpha * instantaneous + (1.0 - alpha) * current,
            None => instantaneous,
        });
        self.last_instant = Instant::now();
        self.last_rows = processed_rows;
        self.smoothed_rate
    }

    fn eta_seconds(&self, processed_rows: u64, total_rows: u64) -> Option<f64> {
        let rate = self.smoothed_rate?;
        if rate <= 0.0 || total_rows == 0 || processed_rows >= total_rows {
            return None;
        }
        Some((total_rows - processed_rows) as f64 / rate)
    }
}

#[derive(Debug, Clone)]
pub struct MaterializeOptions {
    pub dest_dir: PathBuf,
    pub checkpoint_dir: PathBuf,
    pub format: WriterFormat,
    pub writer_chunk_rows: u64,
    pub spill_threshold: usize,
    pub telemetry_log: Option<PathBuf>,
    pub db_url: Option<String>,
    pub job_id: String,
    pub resume: bool,
}

/// Result of one schema task.
#[derive(Debug, Clone)]
pub struct JobSummary {
    pub schema_id: String,
    pub schema_name: String,
    pub blocks_processed: usize,
    pub rows_written: u64,
    pub rows_per_sec: f64,
    pub duration_ms: u64,
    pub output_files: Vec<String>,
    pub validation: ValidationSummary,
    pub spill: SpillMetrics,
}

impl JobSummary {
    pub fn to_metrics(&self, job_id: &str) -> JobMetrics {
        JobMetrics {
            job_id: job_id.to_string(),
            schema_id: self.schema_id.clone(),
            schema_name: self.schema_name.clone(),
            rows: self.rows_written,
            rows_per_sec: self.rows_per_sec,
            duration_ms: self.duration_ms,
            validation: self.validation,
            spill: self.spill,
        }
    }
}

/// Run the materialization phase of a job end to end: plan, execute on the
/// two-slot pool, checkpoint per block, validate, and persist metrics.
pub fn run(
    mapping: &MappingDocument,
    registry: &CanonicalRegistry,
    resources: &ResourceManager,
    tracker: &JobTracker,
    store: Option<&Store>,
    progress: &ProgressLogger,
    cancel: &Arc<AtomicBool>,
    options: &MaterializeOptions,
) -> Result<Vec<JobSummary>> {
    std::fs::create_dir_all(&options.dest_dir)
        .with_context(|| format!("Creating destination {:?}", options.dest_dir))?;
    let checkpoints = Arc::new(CheckpointRegistry::new(options.checkpoint_dir.clone()));
    let job_id = options.job_id.clone();

    let job_checkpoint = if options.resume {
        checkpoints
            .load(&job_id, CHECKPOINT_PHASE)
            .and_then(|record| serde_json::from_value::<MaterializeCheckpoint>(record.payload).ok())
            .unwrap_or_default()
    } else {
        checkpoints.clear(&job_id, CHECKPOINT_PHASE)?;
        MaterializeCheckpoint::default()
    };

    let tasks = build_plan(mapping);
    if tasks.is_empty() {
        info!("No schema has assigned blocks; nothing to materialize");
        return Ok(Vec::new());
    }
    for entry in plan_summary(&tasks) {
        info!(
            "Planned schema '{}': {} block(s), ~{} row(s) from {} file(s)",
            entry.schema_name,
            entry.block_count,
            entry.estimated_rows,
            entry.source_files.len()
        );
    }

    tracker.transition(JobState::Materializing, Some("materialization started"))?;

    let lease = resources.reserve(0, 0, MAX_CONCURRENT_SCHEMA_TASKS.min(tasks.len()))?;
    let global_seen: Arc<Mutex<HashSet<(String, u64)>>> = Arc::new(Mutex::new(HashSet::new()));
    let shared_checkpoint = Arc::new(Mutex::new(job_checkpoint));

    let (task_tx, task_rx) = unbounded::<(SchemaDefinition, Vec<FileBlock>)>();
    let (result_tx, result_rx) = unbounded::<Result<JobSummary>>();
    let task_count = tasks.len();
    for task in tasks {
        task_tx.send(task).expect("task channel open");
    }
    drop(task_tx);

    std::thread::scope(|scope| {
        for _ in 0..MAX_CONCURRENT_SCHEMA_TASKS.min(task_count) {
            let task_rx = task_rx.clone();
            let result_tx = result_tx.clone();
            let checkpoints = Arc::clone(&checkpoints);
            let shared_checkpoint = Arc::clone(&shared_checkpoint);
            let global_seen = Arc::clone(&global_seen);
            let cancel = Arc::clone(cancel);
            let job_id = job_id.clone();
            scope.spawn(move || {
                while let Ok((schema, blocks)) = task_rx.recv() {
                    let outcome = process_schema(
                        &schema,
                        &blocks,
                        mapping,
                        registry,
                        resources,
                        store,
                        progress,
                        &cancel,
                        options,
                        &checkpoints,
                        &shared_checkpoint,
                        &global_seen,
                        &job_id,
                    );
                    if result_tx.send(outcome).is_err() {
                        break;
                    }
                }
            });
        }
        drop(result_tx);

        let mut summaries = Vec::new();
        let mut first_error: Option<anyhow::Error> = None;
        for outcome in result_rx.iter() {
            match outcome {
                Ok(summary) => summaries.push(summary),
                Err(err) => {
                    cancel.store(true, Ordering::SeqCst);
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(summaries),
        }
    })
    .and_then(|mut summaries| {
        drop(lease);
        tracker.transition(JobState::Validating, Some("validating materialized outputs"))?;
        summaries.sort_by(|a, b| a.schema_name.cmp(&b.schema_name));
        for summary in &summaries {
            if let Some(store) = store {
                store.record_job_metrics(&summary.to_metrics(&job_id))?;
            }
            emit_telemetry(options, summary)?;
            info!(
                "Schema '{}': {} row(s) in {} ms ({:.0} rows/s), {} spill(s)",
                summary.schema_name,
                summary.rows_written,
                summary.duration_ms,
                summary.rows_per_sec,
                summary.spill.spills
            );
        }
        // Every schema finished, so the job-level checkpoint is spent.
        checkpoints.clear(&job_id, CHECKPOINT_PHASE)?;
        resources.cleanup(&job_id);
        Ok(summaries)
    })
}

#[allow(clippy::too_many_arguments)]
fn process_schema(
    schema: &SchemaDefinition,
    blocks: &[FileBlock],
    mapping: &MappingDocument,
    registry: &CanonicalRegistry,
    resources: &ResourceManager,
    store: Option<&Store>,
    progress: &ProgressLogger,
    cancel: &Arc<AtomicBool>,
    options: &MaterializeOptions,
    checkpoints: &CheckpointRegistry,
    shared_checkpoint: &Arc<Mutex<MaterializeCheckpoint>>,
    global_seen: &Arc<Mutex<HashSet<(String, u64)>>>,
    job_id: &str,
) -> Result<JobSummary> {
    let schema_id = schema.schema_id.to_string();
    let resumed = {
        let shared = shared_checkpoint.lock().unwrap();
        shared.schemas.get(&schema_id).cloned()
    };
    let start_block = resumed.as_ref().map(|cp| cp.next_block_index).unwrap_or(0);

    let mut writer = build_writer(
        options.format,
        schema,
        &options.dest_dir,
        options.writer_chunk_rows,
        options.db_url.as_deref(),
        resumed.as_ref().map(|cp| &cp.writer),
    )?;

    let canonical = registry.resolve(schema);
    let validator = canonical.map(|contract| CanonicalValidator::new(schema, contract));
    let mut validation = ValidationTracker::new(schema.columns.len(), validator);
    let mut normalizer = RowNormalizer::new(&mapping.schema_mapping, &mapping.column_profiles);
    let scratch = resources.scratch_dir(job_id, &[CHECKPOINT_PHASE, writer.slug()])?;
    let mut spill = SpillBuffer::new(options.spill_threshold, scratch);

    let total_estimated: u64 = blocks.iter().map(FileBlock::row_span).sum();
    let mut processed_rows = writer.cursor().total_rows;
    let mut eta = EtaTracker::new();
    let mut last_emit = Instant::now()
        .checked_sub(PROGRESS_INTERVAL)
        .unwrap_or_else(Instant::now);
    let started = Instant::now();
    let mut blocks_processed = start_block.min(blocks.len());
    let mut seen_lines: HashSet<(String, u64)> = HashSet::new();

    for (index, block) in blocks.iter().enumerate() {
        if index < start_block {
            continue;
        }
        if cancel.load(Ordering::SeqCst) {
            return Err(PipelineError::user_abort(format!(
                "Cancelled while materializing schema '{}'",
                schema.name
            ))
            .into());
        }

        let rows = io_utils::with_io_retries("Reading block", || read_block_rows(block))?;
        for (line_number, row) in rows {
            let key = (block.file_path.display().to_string(), line_number);
            if seen_lines.contains(&key) {
                continue;
            }
            {
                let mut global = global_seen.lock().unwrap();
                if !global.insert(key.clone()) {
                    continue;
                }
            }
            seen_lines.insert(key);

            let file_key = block.file_path.display().to_string();
            let normalized = normalizer.normalize(row, schema, &file_key);
            let sink_validation = &mut validation;
            let sink_writer = &mut writer;
            spill.push(normalized, &mut |row: NormalizedRow| {
                let values = sink_validation.normalize(row.values, row.observed_length);
                sink_writer.write_row(&values)
            })?;
            processed_rows += 1;

            if last_emit.elapsed() >= PROGRESS_INTERVAL {
                let rate = eta.update(processed_rows);
                let event = FileProgress {
                    job_id: job_id.to_string(),
                    schema_id: Some(schema_id.clone()),
                    file: file_key,
                    phase: CHECKPOINT_PHASE.to_string(),
                    processed_rows,
                    total_rows: effective_total(total_estimated),
                    eta_s: eta.eta_seconds(processed_rows, effective_total(total_estimated)),
                    rows_per_sec: rate,
                    spill_rows: spill.telemetry.rows_spilled,
                };
                progress.emit(&event);
                if let Some(store) = store {
                    if let Err(err) = store.record_progress_event(&event) {
                        warn!("Progress event not stored: {err:#}");
                    }
                }
                last_emit = Instant::now();
            }
        }

        blocks_processed += 1;
        let sink_validation = &mut validation;
        let sink_writer = &mut writer;
        spill.flush(&mut |row: NormalizedRow| {
            let values = sink_validation.normalize(row.values, row.observed_length);
            sink_writer.write_row(&values)
        })?;
        writer.checkpoint_sync()?;

        let snapshot = SchemaCheckpoint {
            next_block_index: index + 1,
            writer: writer.cursor(),
        };
        let payload = {
            let mut shared = shared_checkpoint.lock().unwrap();
            shared.schemas.insert(schema_id.clone(), snapshot);
            serde_json::to_value(&*shared).context("Serializing checkpoint")?
        };
        checkpoints.save(job_id, CHECKPOINT_PHASE, payload)?;
    }

    let sink_validation = &mut validation;
    let sink_writer = &mut writer;
    spill.flush(&mut |row: NormalizedRow| {
        let values = sink_validation.normalize(row.values, row.observed_length);
        sink_writer.write_row(&values)
    })?;
    writer.close()?;
    if spill.rows_skipped > 0 {
        warn!(
            "Schema '{}': {} spill row(s) skipped as unreadable",
            schema.name, spill.rows_skipped
        );
    }

    // Schema finished: drop its slice of the job checkpoint so a later
    // resume replays nothing for it.
    {
        let mut shared = shared_checkpoint.lock().unwrap();
        shared.schemas.remove(&schema_id);
        let payload = serde_json::to_value(&*shared).context("Serializing checkpoint")?;
        checkpoints.save(job_id, CHECKPOINT_PHASE, payload)?;
    }

    let cursor = writer.cursor();
    let duration = started.elapsed();
    let duration_ms = duration.as_millis() as u64;
    let rows_per_sec = if duration.as_secs_f64() > 0.0 {
        cursor.total_rows as f64 / duration.as_secs_f64()
    } else {
        cursor.total_rows as f64
    };

    let final_event = FileProgress {
        job_id: job_id.to_string(),
        schema_id: Some(schema_id.clone()),
        file: blocks
            .last()
            .map(|block| block.file_path.display().to_string())
            .unwrap_or_default(),
        phase: CHECKPOINT_PHASE.to_string(),
        processed_rows,
        total_rows: effective_total(total_estimated),
        eta_s: None,
        rows_per_sec: Some(rows_per_sec),
        spill_rows: spill.telemetry.rows_spilled,
    };
    progress.emit(&final_event);
    if let Some(store) = store {
        if let Err(err) = store.record_progress_event(&final_event) {
            warn!("Progress event not stored: {err:#}");
        }
    }

    Ok(JobSummary {
        schema_id,
        schema_name: schema.name.clone(),
        blocks_processed,
        rows_written: cursor.total_rows,
        rows_per_sec,
        duration_ms,
        output_files: cursor.output_files,
        validation: validation.summary(),
        spill: spill.telemetry,
    })
}

/// Row estimates above this are treated as unknown so the ETA falls back to
/// rate-only reporting.
fn effective_total(estimated: u64) -> u64 {
    if estimated > 10_000_000 {
        0
    } else {
        estimated
    }
}

/// Read the rows of one block: lines `[start_line, end_line]` split on the
/// block's delimiter, skipping the header line when the block carries one.
fn read_block_rows(block: &FileBlock) -> Result<Vec<(u64, Vec<String>)>> {
    let file = File::open(&block.file_path)
        .with_context(|| format!("Opening {:?}", block.file_path))?;
    let reader = BufReader::new(file);
    let delimiter = block.signature.delimiter;
    let header = block.signature.header_sample.as_ref();
    let mut rows = Vec::new();
    for (line_number, line) in reader.lines().enumerate() {
        let line_number = line_number as u64;
        if line_number < block.start_line {
            continue;
        }
        if line_number > block.end_line {
            break;
        }
        let line = line.with_context(|| format!("Reading {:?}", block.file_path))?;
        if line.trim().is_empty() {
            continue;
        }
        let values: Vec<String> = split_delimited(&line, delimiter)
            .into_iter()
            .map(|value| value.trim().to_string())
            .collect();
        if line_number == block.start_line && block.start_line == 0 {
            if let Some(header) = header {
                let matches = values.len() == header.len()
                    && values
                        .iter()
                        .zip(header.iter())
                        .all(|(cell, expected)| cell == expected.trim());
                if matches {
                    continue;
                }
            }
        }
        rows.push((line_number, values));
    }
    Ok(rows)
}

fn emit_telemetry(options: &MaterializeOptions, summary: &JobSummary) -> Result<()> {
    let Some(path) = &options.telemetry_log else {
        return Ok(());
    };
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Creating telemetry directory {parent:?}"))?;
        }
    }
    let payload = serde_json::json!({
        "job_id": options.job_id,
        "schema_id": summary.schema_id,
        "schema_name": summary.schema_name,
        "rows_written": summary.rows_written,
        "duration_ms": summary.duration_ms,
        "rows_per_sec": summary.rows_per_sec,
        "validation": summary.validation,
        "spill": summary.spill,
        "output_files": summary.output_files,
    });
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Opening telemetry log {path:?}"))?;
    writeln!(file, "{payload}").context("Appending telemetry record")
}

