pub mod analyze;
pub mod canonical;
pub mod checkpoint;
pub mod cli;
pub mod cluster;
pub mod config;
pub mod errors;
pub mod io_utils;
pub mod mapping;
pub mod materialize;
pub mod models;
pub mod normalize;
pub mod offsets;
pub mod profiler;
pub mod progress;
pub mod resources;
pub mod sampling;
pub mod sandbox;
pub mod store;
pub mod synonyms;
pub mod text;
pub mod writers;

use std::collections::BTreeMap;
use std::env;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, LevelFilter};
use uuid::Uuid;

use crate::canonical::CanonicalRegistry;
use crate::checkpoint::{resolve_failure, JobTracker};
use crate::cli::{
    AnalyzeArgs, BenchmarkArgs, Cli, Commands, MaterializeArgs, NormalizeArgs, ReviewArgs,
};
use crate::config::{load_runtime_config, RuntimeConfig};
use crate::models::{ClusterDocument, JobState, MappingDocument};
use crate::progress::{BenchmarkRecorder, ProgressLogger};
use crate::resources::ResourceManager;
use crate::sandbox::Sandbox;
use crate::store::Store;
use crate::synonyms::SynonymDictionary;
use crate::writers::WriterFormat;

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("csv_unify", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Analyze(args) => handle_analyze(&args),
        Commands::Benchmark(args) => handle_benchmark(&args),
        Commands::Review(args) => handle_review(&args),
        Commands::Normalize(args) => handle_normalize(&args),
        Commands::Materialize(args) => handle_materialize(&args),
    }
}

fn short_id() -> String {
    let id = Uuid::new_v4().simple().to_string();
    id[..8].to_string()
}

fn open_store(path: Option<&Path>) -> Result<Option<Store>> {
    match path {
        Some(path) => Ok(Some(Store::open(path)?)),
        None => Ok(None),
    }
}

fn load_config(profile: &str, config: Option<&Path>, encoding: Option<&str>) -> Result<RuntimeConfig> {
    let mut runtime = load_runtime_config(profile, config)?;
    if let Some(encoding) = encoding {
        runtime.global.encoding = encoding.to_string();
    }
    Ok(runtime)
}

fn handle_analyze(args: &AnalyzeArgs) -> Result<()> {
    let config = load_config(&args.profile, args.config.as_deref(), args.input_encoding.as_deref())?;

    // Sandbox enforcement happens before any filesystem side effect.
    if let Some(root) = &args.sandbox_root {
        let sandbox = Sandbox::new(
            root.clone(),
            vec![config.profile.resource_limits.temp_dir.clone()],
        );
        for input in &args.inputs {
            sandbox.resolve(input)?;
        }
        sandbox.resolve(&args.output)?;
    }

    let resources = ResourceManager::new(config.profile.resource_limits.clone())?;

    let files = analyze::collect_input_files(&args.inputs)?;
    let store = open_store(args.store.as_deref())?;
    let job_id = args
        .job_id
        .clone()
        .unwrap_or_else(|| format!("analyze-{}", short_id()));
    let mut metadata = BTreeMap::new();
    metadata.insert("profile".to_string(), args.profile.clone());
    metadata.insert("files".to_string(), files.len().to_string());
    let tracker = JobTracker::new(&job_id, store.clone(), metadata)?;
    let progress = ProgressLogger::new(args.progress_log.clone())?;
    let cancel = Arc::new(AtomicBool::new(false));

    info!(
        "Analyzing {} file(s) with profile '{}' (block_size={}, workers={})",
        files.len(),
        args.profile,
        config.profile.block_size,
        config.profile.max_parallel_files
    );

    let outcome = (|| -> Result<MappingDocument> {
        tracker.transition(JobState::Analyzing, Some("sampling input files"))?;
        let results = analyze::analyze_files(&files, &config, &resources, &progress, &cancel, &job_id)?;
        tracker.transition(JobState::Mapping, Some("assembling schemas"))?;
        let document = analyze::assemble_mapping(results);

        mapping::save(&document, &args.output, args.include_samples)?;
        let profiles_path = mapping::sibling_artifact(&args.output, "column_profiles");
        io_utils::write_json_atomic(&profiles_path, &document.column_profiles)?;

        if let Some(store) = &store {
            store.persist_mapping(&document)?;
            store.persist_column_profiles(&document.column_profiles)?;
            store.record_audit_event("mapping", "analyze", Some(&args.output.display().to_string()))?;
        }
        Ok(document)
    })();

    match outcome {
        Ok(document) => {
            tracker.transition(JobState::Done, Some("analysis complete"))?;
            info!(
                "Wrote mapping with {} schema(s) and {} block(s) to {}",
                document.schemas.len(),
                document.blocks.len(),
                args.output.display()
            );
            Ok(())
        }
        Err(err) => {
            resolve_failure(&tracker, &err);
            Err(err)
        }
    }
}

fn handle_benchmark(args: &BenchmarkArgs) -> Result<()> {
    let config = load_config(&args.profile, args.config.as_deref(), None)?;
    let files = analyze::collect_input_files(&args.inputs)?;
    let recorder = BenchmarkRecorder::new(&args.log)?;
    let encoding = io_utils::resolve_encoding(Some(&config.global.encoding));

    for file in &files {
        let started = Instant::now();
        let result = analyze::analyze_file(file, &config, encoding)?;
        let seconds = started.elapsed().as_secs_f64();
        let lines_per_sec = if seconds > 0.0 {
            result.total_lines as f64 / seconds
        } else {
            result.total_lines as f64
        };
        recorder.record(
            &file.display().to_string(),
            serde_json::json!({
                "lines": result.total_lines,
                "blocks": result.blocks.len(),
                "seconds": seconds,
                "lines_per_sec": lines_per_sec,
            }),
        )?;
        info!(
            "{}: {} line(s), {} block(s), {:.0} lines/s",
            file.display(),
            result.total_lines,
            result.blocks.len(),
            lines_per_sec
        );
    }
    info!("Benchmark results appended to {}", args.log.display());
    Ok(())
}

fn handle_review(args: &ReviewArgs) -> Result<()> {
    let document = mapping::load(&args.mapping)?;
    let synonyms = match &args.synonyms {
        Some(path) => SynonymDictionary::from_file(path)?,
        None => SynonymDictionary::empty(),
    };

    let clusters_path = mapping::sibling_artifact(&args.mapping, "header_clusters");
    let previous: Option<ClusterDocument> = if clusters_path.exists() {
        let raw = std::fs::read_to_string(&clusters_path)
            .with_context(|| format!("Reading {clusters_path:?}"))?;
        serde_json::from_str(&raw).ok()
    } else {
        None
    };

    let cluster_document = cluster::build_clusters(&document, &synonyms, previous.as_ref());
    let flagged = cluster_document
        .clusters
        .iter()
        .filter(|cluster| cluster.needs_review)
        .count();

    io_utils::write_json_atomic(&clusters_path, &cluster_document)?;
    let mut reviewed = document;
    reviewed.header_clusters = cluster_document.clusters.clone();
    reviewed.artifact_version = cluster_document.artifact_version;
    let review_path = mapping::sibling_artifact(&args.mapping, "review");
    mapping::save(&reviewed, &review_path, true)?;

    if let Some(store_path) = &args.store {
        let store = Store::open(store_path)?;
        store.persist_header_clusters(&cluster_document)?;
        if !synonyms.is_empty() {
            store.persist_synonyms(&synonyms)?;
        }
        store.record_audit_event(
            "header_clusters",
            "review",
            Some(&format!("artifact_version={}", cluster_document.artifact_version)),
        )?;
    }

    info!(
        "Built {} cluster(s) ({} flagged for review) at artifact version {}; wrote {} and {}",
        cluster_document.clusters.len(),
        flagged,
        cluster_document.artifact_version,
        review_path.display(),
        clusters_path.display()
    );
    Ok(())
}

fn handle_normalize(args: &NormalizeArgs) -> Result<()> {
    let mut document = mapping::load(&args.mapping)?;
    let synonyms = match &args.synonyms {
        Some(path) => SynonymDictionary::from_file(path)?,
        None => SynonymDictionary::empty(),
    };
    let registry = match &args.canonical_schemas {
        Some(path) => CanonicalRegistry::from_file(path)?,
        None => CanonicalRegistry::empty(),
    };

    let bound = normalize::apply(&mut document, &synonyms, &registry)?;
    let output = mapping::sibling_artifact(&args.mapping, "normalized");
    mapping::save(&document, &output, true)?;

    if let Some(store_path) = &args.store {
        let store = Store::open(store_path)?;
        store.persist_mapping(&document)?;
        store.record_audit_event(
            "mapping",
            "normalize",
            Some(&format!("canonical_bindings={bound}")),
        )?;
    }

    info!("Wrote normalized mapping to {}", output.display());
    Ok(())
}

fn handle_materialize(args: &MaterializeArgs) -> Result<()> {
    let document = mapping::load(&args.mapping)?;
    let format = WriterFormat::parse(&args.format)?;
    let config = load_config(&args.profile, args.config.as_deref(), None)?;
    let registry = match &args.canonical_schemas {
        Some(path) => CanonicalRegistry::from_file(path)?,
        None => CanonicalRegistry::empty(),
    };
    let resources = ResourceManager::new(config.profile.resource_limits.clone())?;
    let store = open_store(args.store.as_deref())?;
    let job_id = args
        .job_id
        .clone()
        .unwrap_or_else(|| format!("job-{}", short_id()));

    let mut metadata = BTreeMap::new();
    metadata.insert("format".to_string(), args.format.clone());
    metadata.insert("dest".to_string(), args.dest.display().to_string());
    metadata.insert("mapping".to_string(), args.mapping.display().to_string());
    let tracker = JobTracker::new(&job_id, store.clone(), metadata)?;
    let progress = ProgressLogger::new(args.progress_log.clone())?;
    let cancel = Arc::new(AtomicBool::new(false));

    if args.resume
        && !checkpoint::checkpoint_exists(
            &args.checkpoint_dir,
            materialize::CHECKPOINT_PHASE,
            &job_id,
        )
    {
        log::warn!("--resume given but job '{job_id}' has no checkpoint; starting fresh");
    }

    let options = materialize::MaterializeOptions {
        dest_dir: args.dest.clone(),
        checkpoint_dir: args.checkpoint_dir.clone(),
        format,
        writer_chunk_rows: config.profile.writer_chunk_rows,
        spill_threshold: args.spill_threshold,
        telemetry_log: args.telemetry_log.clone(),
        db_url: args.db_url.clone(),
        job_id: job_id.clone(),
        resume: args.resume,
    };

    info!(
        "Materializing {} with job id '{}' into {} ({})",
        args.mapping.display(),
        job_id,
        args.dest.display(),
        args.format
    );

    let outcome = materialize::run(
        &document,
        &registry,
        &resources,
        &tracker,
        store.as_ref(),
        &progress,
        &cancel,
        &options,
    );

    match outcome {
        Ok(summaries) => {
            tracker.transition(JobState::Done, Some("materialization complete"))?;
            let total_rows: u64 = summaries.iter().map(|summary| summary.rows_written).sum();
            info!(
                "Job '{}' done: {} schema(s), {} row(s) total",
                job_id,
                summaries.len(),
                total_rows
            );
            Ok(())
        }
        Err(err) => {
            resolve_failure(&tracker, &err);
            Err(err)
        }
    }
}
