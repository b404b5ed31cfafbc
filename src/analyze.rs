//! Phase 1: parallel file analysis.
//!
//! Files fan out to a worker pool over a channel; the dispatcher keeps the
//! number of in-flight files at the adaptive throttle's limit, which reacts
//! to per-file read latency. Completed analyses are grouped into schema
//! definitions by signature similarity.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use crossbeam_channel::{bounded, unbounded};
use encoding_rs::Encoding;
use log::{debug, info};
use uuid::Uuid;

use crate::config::RuntimeConfig;
use crate::errors::PipelineError;
use crate::io_utils;
use crate::models::{
    CanonicalType, ColumnProfile, FileBlock, FileColumnProfile, FileProgress, MappingDocument,
    SchemaColumn, SchemaDefinition, TypeBucket,
};
use crate::profiler::build_signature;
use crate::progress::ProgressLogger;
use crate::resources::ResourceManager;
use crate::sampling::{count_lines, plan_blocks, stream_blocks};
use crate::text::{normalize_header, slugify};

pub const SCHEMA_HEADER_SIMILARITY: f64 = 0.85;
const SLOW_WINDOW_STREAK: u32 = 3;
const FAST_WINDOW_STREAK: u32 = 6;
const LATENCY_WINDOW: usize = 4;

/// Concurrency governor driven by per-file latency windows. Three
/// consecutive slow windows halve the in-flight limit (floor 1); six
/// consecutive fast windows double it back up to the profile cap.
pub struct AdaptiveThrottle {
    max_workers: usize,
    limit: usize,
    slow_threshold: f64,
    samples: Vec<f64>,
    slow_streak: u32,
    fast_streak: u32,
}

impl AdaptiveThrottle {
    pub fn new(max_workers: usize, slow_threshold: f64) -> Self {
        let max_workers = max_workers.max(1);
        Self {
            max_workers,
            limit: max_workers,
            slow_threshold,
            samples: Vec::new(),
            slow_streak: 0,
            fast_streak: 0,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn report(&mut self, latency_secs: f64) {
        self.samples.push(latency_secs);
        if self.samples.len() > LATENCY_WINDOW {
            self.samples.remove(0);
        }
        let average = self.samples.iter().sum::<f64>() / self.samples.len() as f64;
        if average > self.slow_threshold {
            self.slow_streak += 1;
            self.fast_streak = 0;
            if self.slow_streak >= SLOW_WINDOW_STREAK {
                self.limit = (self.limit / 2).max(1);
                self.slow_streak = 0;
                debug!("Throttle: slow windows, limit now {}", self.limit);
            }
        } else if average < self.slow_threshold / 2.0 {
            self.fast_streak += 1;
            self.slow_streak = 0;
            if self.fast_streak >= FAST_WINDOW_STREAK {
                self.limit = (self.limit * 2).min(self.max_workers);
                self.fast_streak = 0;
                debug!("Throttle: fast windows, limit now {}", self.limit);
            }
        } else {
            self.slow_streak = 0;
            self.fast_streak = 0;
        }
    }
}

/// Everything learned about one file during Phase 1.
#[derive(Debug, Clone)]
pub struct FileAnalysisResult {
    pub file_path: PathBuf,
    pub total_lines: u64,
    pub blocks: Vec<FileBlock>,
    pub headers: Vec<String>,
    pub column_profiles: Vec<ColumnProfile>,
}

/// Analyze a single file: count lines, sample blocks, build signatures, and
/// profile every column in one streaming pass.
pub fn analyze_file(
    path: &Path,
    config: &RuntimeConfig,
    encoding: &'static Encoding,
) -> Result<FileAnalysisResult> {
    let total_lines = io_utils::with_io_retries("Counting lines", || count_lines(path))?;
    let plan = plan_blocks(
        total_lines,
        config.profile.block_size,
        config.profile.min_gap_lines,
    );

    let mut blocks: Vec<FileBlock> = Vec::with_capacity(plan.len());
    let sample_cap = config.profile.sample_values_cap;
    let header_ratio = config.profile.header_nontext_ratio;
    io_utils::with_io_retries("Sampling blocks", || {
        blocks.clear();
        stream_blocks(path, &plan, encoding, |planned, buffer| {
            let (signature, profiles) = build_signature(
                &buffer.lines,
                sample_cap,
                header_ratio,
                planned.start_line == 0,
            );
            blocks.push(FileBlock {
                file_path: path.to_path_buf(),
                block_id: planned.block_id,
                start_line: planned.start_line,
                end_line: planned.end_line,
                byte_start: buffer.byte_start,
                byte_end: buffer.byte_end,
                signature,
                column_profiles: profiles,
                schema_id: None,
            });
            Ok(())
        })
    })?;

    let (headers, has_headers, delimiter) = match blocks.first() {
        Some(first) => {
            let delimiter = first.signature.delimiter;
            match &first.signature.header_sample {
                Some(sample) => (sample.clone(), true, delimiter),
                None => {
                    let width = first.signature.column_count;
                    let names = (0..width).map(|idx| format!("column_{}", idx + 1)).collect();
                    (names, false, delimiter)
                }
            }
        }
        None => (Vec::new(), false, ','),
    };

    let column_profiles = if total_lines > 0 {
        let (_, profiles) = crate::profiler::profile_file_columns(
            path,
            delimiter,
            encoding,
            has_headers,
            sample_cap,
        )?;
        profiles
    } else {
        Vec::new()
    };

    Ok(FileAnalysisResult {
        file_path: path.to_path_buf(),
        total_lines,
        blocks,
        headers,
        column_profiles,
    })
}

/// Fan the file set out to the worker pool and assemble the mapping.
pub fn analyze_files(
    files: &[PathBuf],
    config: &RuntimeConfig,
    resources: &ResourceManager,
    progress: &ProgressLogger,
    cancel: &Arc<AtomicBool>,
    job_id: &str,
) -> Result<Vec<FileAnalysisResult>> {
    if files.is_empty() {
        return Ok(Vec::new());
    }
    let encoding = io_utils::resolve_encoding(Some(&config.global.encoding));
    let max_workers = resources.plan_workers(config.profile.max_parallel_files);
    let _lease = resources.reserve(0, 0, max_workers)?;

    if max_workers == 1 || files.len() == 1 {
        let mut results = Vec::with_capacity(files.len());
        for path in files {
            if cancel.load(Ordering::SeqCst) {
                return Err(PipelineError::user_abort("Cancelled during analysis").into());
            }
            let result = analyze_file(path, config, encoding)?;
            emit_file_progress(progress, job_id, &result);
            results.push(result);
        }
        return Ok(results);
    }

    let mut throttle = AdaptiveThrottle::new(max_workers, 4.0);
    let order: HashMap<PathBuf, usize> = files
        .iter()
        .enumerate()
        .map(|(idx, path)| (path.clone(), idx))
        .collect();

    let results = std::thread::scope(|scope| -> Result<Vec<FileAnalysisResult>> {
        let (task_tx, task_rx) = bounded::<PathBuf>(max_workers);
        let (result_tx, result_rx) = unbounded::<(Result<FileAnalysisResult>, f64)>();

        for _ in 0..max_workers {
            let task_rx = task_rx.clone();
            let result_tx = result_tx.clone();
            scope.spawn(move || {
                while let Ok(path) = task_rx.recv() {
                    let started = Instant::now();
                    let outcome = analyze_file(&path, config, encoding);
                    let latency = started.elapsed().as_secs_f64();
                    if result_tx.send((outcome, latency)).is_err() {
                        break;
                    }
                }
            });
        }
        drop(result_tx);

        let mut pending = files.iter().cloned();
        let mut in_flight = 0usize;
        let mut collected = Vec::with_capacity(files.len());

        while in_flight < throttle.limit() {
            match pending.next() {
                Some(path) => {
                    task_tx.send(path).expect("task channel open");
                    in_flight += 1;
                }
                None => break,
            }
        }

        let mut abort: Option<anyhow::Error> = None;
        while in_flight > 0 {
            let (outcome, latency) = result_rx.recv().expect("result channel open");
            in_flight -= 1;
            throttle.report(latency);
            match outcome {
                Ok(result) => {
                    emit_file_progress(progress, job_id, &result);
                    collected.push(result);
                }
                Err(err) => {
                    if abort.is_none() {
                        abort = Some(err);
                    }
                    cancel.store(true, Ordering::SeqCst);
                }
            }
            if abort.is_none() && !cancel.load(Ordering::SeqCst) {
                while in_flight < throttle.limit() {
                    match pending.next() {
                        Some(path) => {
                            task_tx.send(path).expect("task channel open");
                            in_flight += 1;
                        }
                        None => break,
                    }
                }
            }
        }
        drop(task_tx);

        match abort {
            Some(err) => Err(err),
            None if cancel.load(Ordering::SeqCst) => {
                Err(PipelineError::user_abort("Cancelled during analysis").into())
            }
            None => Ok(collected),
        }
    })?;

    let mut ordered = results;
    ordered.sort_by_key(|result| order.get(&result.file_path).copied().unwrap_or(usize::MAX));
    Ok(ordered)
}

fn emit_file_progress(progress: &ProgressLogger, job_id: &str, result: &FileAnalysisResult) {
    progress.emit(&FileProgress {
        job_id: job_id.to_string(),
        schema_id: None,
        file: result.file_path.display().to_string(),
        phase: "analyze".to_string(),
        processed_rows: result.total_lines,
        total_rows: result.total_lines,
        eta_s: None,
        rows_per_sec: None,
        spill_rows: 0,
    });
}

/// Group analyzed blocks into schema definitions: same delimiter, same
/// column count, and normalized headers at least
/// [`SCHEMA_HEADER_SIMILARITY`] similar.
pub fn assemble_mapping(results: Vec<FileAnalysisResult>) -> MappingDocument {
    #[derive(Debug)]
    struct Group {
        delimiter: char,
        column_count: usize,
        header_key: String,
        block_refs: Vec<usize>,
    }

    let mut blocks: Vec<FileBlock> = Vec::new();
    let mut file_headers: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut column_profiles: Vec<FileColumnProfile> = Vec::new();
    let mut block_headers: Vec<String> = Vec::new();

    for result in results {
        let file_key = result.file_path.display().to_string();
        if !result.headers.is_empty() {
            file_headers.insert(file_key.clone(), result.headers.clone());
        }
        for (column_index, profile) in result.column_profiles.into_iter().enumerate() {
            column_profiles.push(FileColumnProfile {
                file_path: file_key.clone(),
                column_index,
                profile,
            });
        }
        let normalized_headers = result
            .headers
            .iter()
            .map(|header| normalize_header(header))
            .collect::<Vec<_>>()
            .join("|");
        for block in result.blocks {
            block_headers.push(normalized_headers.clone());
            blocks.push(block);
        }
    }

    let mut groups: Vec<Group> = Vec::new();
    for (index, block) in blocks.iter().enumerate() {
        if block.signature.column_count == 0 {
            continue;
        }
        let header_key = block
            .signature
            .header_sample
            .as_ref()
            .map(|cells| {
                cells
                    .iter()
                    .map(|cell| normalize_header(cell))
                    .collect::<Vec<_>>()
                    .join("|")
            })
            .unwrap_or_else(|| block_headers[index].clone());
        let position = groups.iter().position(|group| {
            group.delimiter == block.signature.delimiter
                && group.column_count == block.signature.column_count
                && strsim::normalized_levenshtein(&group.header_key, &header_key)
                    >= SCHEMA_HEADER_SIMILARITY
        });
        match position {
            Some(position) => groups[position].block_refs.push(index),
            None => groups.push(Group {
                delimiter: block.signature.delimiter,
                column_count: block.signature.column_count,
                header_key,
                block_refs: vec![index],
            }),
        }
    }

    let mut schemas = Vec::new();
    for group in groups {
        let schema_id = Uuid::new_v4();
        let first_block = &blocks[group.block_refs[0]];
        let header = first_block.signature.header_sample.clone();
        let types = first_block.signature.column_types.clone();
        let columns: Vec<SchemaColumn> = (0..group.column_count)
            .map(|index| {
                let raw_name = header
                    .as_ref()
                    .and_then(|cells| cells.get(index))
                    .filter(|cell| !cell.is_empty())
                    .cloned()
                    .unwrap_or_else(|| format!("column_{}", index + 1));
                let bucket = types.get(index).copied().unwrap_or(TypeBucket::Text);
                SchemaColumn {
                    index,
                    normalized_name: slugify(&raw_name),
                    data_type: bucket_to_type(bucket),
                    known_variants: vec![raw_name.clone()],
                    raw_name,
                }
            })
            .collect();
        let name = header
            .as_ref()
            .and_then(|cells| cells.first())
            .filter(|cell| !cell.is_empty())
            .map(|cell| format!("{}_{}", slugify(cell), group.column_count))
            .unwrap_or_else(|| format!("schema_{}", group.column_count));

        let mut blocks_by_file: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for block_ref in &group.block_refs {
            let block = &blocks[*block_ref];
            blocks_by_file
                .entry(block.file_path.display().to_string())
                .or_default()
                .push(block.block_id);
        }
        let confidence = group_confidence(&blocks, &group.block_refs, &group.header_key);
        schemas.push(SchemaDefinition {
            schema_id,
            name,
            columns,
            blocks_by_file,
            confidence,
            canonical_schema_id: None,
            canonical_namespace: None,
            canonical_schema_version: None,
        });
        for block_ref in group.block_refs {
            blocks[block_ref].schema_id = Some(schema_id);
        }
    }
    schemas.sort_by(|a, b| a.name.cmp(&b.name));

    info!(
        "Assembled {} schema(s) across {} block(s)",
        schemas.len(),
        blocks.len()
    );
    MappingDocument {
        artifact_version: 1,
        schemas,
        blocks,
        header_clusters: Vec::new(),
        schema_mapping: Vec::new(),
        column_profiles,
        file_headers,
    }
}

fn group_confidence(blocks: &[FileBlock], block_refs: &[usize], header_key: &str) -> f64 {
    if block_refs.len() < 2 {
        return 1.0;
    }
    let mut total = 0.0;
    let mut pairs = 0usize;
    for block_ref in block_refs {
        let block = &blocks[*block_ref];
        if let Some(sample) = &block.signature.header_sample {
            let key = sample
                .iter()
                .map(|cell| normalize_header(cell))
                .collect::<Vec<_>>()
                .join("|");
            total += strsim::normalized_levenshtein(header_key, &key);
            pairs += 1;
        }
    }
    if pairs == 0 {
        1.0
    } else {
        total / pairs as f64
    }
}

fn bucket_to_type(bucket: TypeBucket) -> CanonicalType {
    match bucket {
        TypeBucket::Numeric => CanonicalType::Float,
        TypeBucket::Date => CanonicalType::Date,
        TypeBucket::Bool => CanonicalType::Bool,
        TypeBucket::Text | TypeBucket::Null => CanonicalType::String,
    }
}

/// Expand input paths: directories are scanned (non-recursively) for
/// delimited text files; explicit files pass through.
pub fn collect_input_files(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    const EXTENSIONS: [&str; 4] = ["csv", "tsv", "txt", "psv"];
    let mut files = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let entries = std::fs::read_dir(input)
                .with_context(|| format!("Reading directory {input:?}"))?;
            for entry in entries {
                let path = entry.context("Reading directory entry")?.path();
                if !path.is_file() {
                    continue;
                }
                let matches = path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known)))
                    .unwrap_or(false);
                if matches {
                    files.push(path);
                }
            }
        } else if input.is_file() {
            files.push(input.clone());
        } else {
            return Err(PipelineError::io(format!(
                "Input {} does not exist",
                input.display()
            ))
            .into());
        }
    }
    files.sort();
    files.dedup();
    if files.is_empty() {
        return Err(PipelineError::config("No delimited input files found").into());
    }
    Ok(files)
}
