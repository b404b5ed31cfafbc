use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Discover, cluster, and materialize schemas across delimited files",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Sample and profile input files, emitting a mapping artifact
    Analyze(AnalyzeArgs),
    /// Measure analysis throughput and append it to a JSONL log
    Benchmark(BenchmarkArgs),
    /// Cluster equivalent headers across files and flag items for review
    Review(ReviewArgs),
    /// Apply synonyms and canonical contracts to a mapping
    Normalize(NormalizeArgs),
    /// Materialize normalized rows into csv, parquet, or database outputs
    Materialize(MaterializeArgs),
}

#[derive(Debug, Args)]
pub struct AnalyzeArgs {
    /// Files or directories to analyze
    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,
    /// Configuration profile name (built-ins: low_memory, workstation)
    #[arg(short, long, default_value = "workstation")]
    pub profile: String,
    /// Optional JSON config document overriding the built-in profiles
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Output mapping artifact path
    #[arg(short = 'o', long, default_value = "mapping.json")]
    pub output: PathBuf,
    /// JSONL file receiving progress events
    #[arg(long = "progress-log")]
    pub progress_log: Option<PathBuf>,
    /// SQLite store for durable mapping/profile/telemetry persistence
    #[arg(long = "store")]
    pub store: Option<PathBuf>,
    /// Character encoding of the input files (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
    /// Keep per-column sample values in the mapping artifact
    #[arg(long = "include-samples")]
    pub include_samples: bool,
    /// Restrict all reads and writes to this directory
    #[arg(long = "sandbox-root")]
    pub sandbox_root: Option<PathBuf>,
    /// Job identifier for status tracking (generated when omitted)
    #[arg(long = "job-id")]
    pub job_id: Option<String>,
}

#[derive(Debug, Args)]
pub struct BenchmarkArgs {
    /// Files or directories to measure
    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,
    /// Configuration profile name
    #[arg(short, long, default_value = "workstation")]
    pub profile: String,
    /// Optional JSON config document
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Throughput log (JSON lines), appended per file
    #[arg(short, long)]
    pub log: PathBuf,
}

#[derive(Debug, Args)]
pub struct ReviewArgs {
    /// Mapping artifact produced by analyze
    pub mapping: PathBuf,
    /// Synonym dictionary JSON ({canonical: [variants...]})
    #[arg(long)]
    pub synonyms: Option<PathBuf>,
    /// SQLite store for cluster persistence
    #[arg(long = "store")]
    pub store: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct NormalizeArgs {
    /// Mapping artifact (typically the review output)
    pub mapping: PathBuf,
    /// Synonym dictionary JSON
    #[arg(long)]
    pub synonyms: Option<PathBuf>,
    /// Canonical schema contracts JSON
    #[arg(long = "canonical-schemas")]
    pub canonical_schemas: Option<PathBuf>,
    /// SQLite store
    #[arg(long = "store")]
    pub store: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct MaterializeArgs {
    /// Normalized mapping artifact
    pub mapping: PathBuf,
    /// Destination directory for materialized outputs
    #[arg(short, long)]
    pub dest: PathBuf,
    /// Checkpoint registry directory
    #[arg(long = "checkpoint-dir", default_value = "checkpoints")]
    pub checkpoint_dir: PathBuf,
    /// Writer backend: csv, parquet, or database
    #[arg(long = "format", default_value = "csv")]
    pub format: String,
    /// Configuration profile name (writer chunking and resource limits)
    #[arg(short, long, default_value = "workstation")]
    pub profile: String,
    /// Optional JSON config document
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Spill buffer capacity in rows
    #[arg(long = "spill-threshold", default_value_t = 50_000)]
    pub spill_threshold: usize,
    /// JSONL file receiving per-schema telemetry summaries
    #[arg(long = "telemetry-log")]
    pub telemetry_log: Option<PathBuf>,
    /// JSONL file receiving progress events
    #[arg(long = "progress-log")]
    pub progress_log: Option<PathBuf>,
    /// Canonical schema contracts JSON (enables row validation)
    #[arg(long = "canonical-schemas")]
    pub canonical_schemas: Option<PathBuf>,
    /// Database URL for the database writer (sqlite:///path/to.db)
    #[arg(long = "db-url")]
    pub db_url: Option<String>,
    /// SQLite store for job status, events, and metrics
    #[arg(long = "store")]
    pub store: Option<PathBuf>,
    /// Job identifier (generated when omitted; reuse it with --resume)
    #[arg(long = "job-id")]
    pub job_id: Option<String>,
    /// Resume from the job's last committed checkpoint
    #[arg(long)]
    pub resume: bool,
}
