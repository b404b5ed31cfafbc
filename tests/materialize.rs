mod common;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tempfile::tempdir;

use csv_unify::canonical::CanonicalRegistry;
use csv_unify::checkpoint::{resolve_failure, CheckpointRegistry, JobTracker};
use csv_unify::materialize::{run, MaterializeOptions, CHECKPOINT_PHASE};
use csv_unify::models::{JobState, MappingDocument};
use csv_unify::progress::ProgressLogger;
use csv_unify::resources::ResourceManager;
use csv_unify::store::Store;
use csv_unify::writers::WriterFormat;

use common::{analyzed_mapping, collect_output_rows, numbered_rows, write_csv};

struct Harness {
    resources: ResourceManager,
    registry: CanonicalRegistry,
    progress: ProgressLogger,
    cancel: Arc<AtomicBool>,
}

impl Harness {
    fn new(temp_dir: &Path) -> Self {
        let config = common::test_config(temp_dir);
        Self {
            resources: ResourceManager::new(config.profile.resource_limits.clone()).unwrap(),
            registry: CanonicalRegistry::empty(),
            progress: ProgressLogger::disabled(),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    fn options(&self, temp_dir: &Path, dest: &str, job_id: &str) -> MaterializeOptions {
        MaterializeOptions {
            dest_dir: temp_dir.join(dest),
            checkpoint_dir: temp_dir.join("checkpoints"),
            format: WriterFormat::Csv,
            writer_chunk_rows: 1_000,
            spill_threshold: 50_000,
            telemetry_log: None,
            db_url: None,
            job_id: job_id.to_string(),
            resume: false,
        }
    }

    fn run(
        &self,
        mapping: &MappingDocument,
        store: Option<&Store>,
        options: &MaterializeOptions,
    ) -> anyhow::Result<Vec<csv_unify::materialize::JobSummary>> {
        let tracker =
            JobTracker::new(&options.job_id, store.cloned(), BTreeMap::new()).unwrap();
        let outcome = run(
            mapping,
            &self.registry,
            &self.resources,
            &tracker,
            store,
            &self.progress,
            &self.cancel,
            options,
        );
        match &outcome {
            Ok(_) => tracker.transition(JobState::Done, None).unwrap(),
            Err(err) => resolve_failure(&tracker, err),
        }
        outcome
    }
}

#[test]
fn small_job_materializes_every_row() {
    let dir = tempdir().expect("temp dir");
    let input = dir.path().join("retail.csv");
    let rows = numbered_rows(500, 0);
    write_csv(&input, "id,name,price", &rows);

    let mapping = analyzed_mapping(&[input], dir.path());
    let harness = Harness::new(dir.path());
    let options = harness.options(dir.path(), "out", "job-small");
    let summaries = harness.run(&mapping, None, &options).unwrap();

    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].rows_written, 500);
    assert_eq!(summaries[0].validation.total_rows, 500);
    assert_eq!(summaries[0].validation.short_rows, 0);

    let output = collect_output_rows(&options.dest_dir);
    assert_eq!(output.len(), 500);
    // Checkpoint is removed after terminal success.
    let registry = CheckpointRegistry::new(options.checkpoint_dir.clone());
    assert!(registry.load("job-small", CHECKPOINT_PHASE).is_none());
}

#[test]
fn chunks_rotate_at_writer_chunk_rows() {
    let dir = tempdir().expect("temp dir");
    let input = dir.path().join("big.csv");
    write_csv(&input, "id,name,price", &numbered_rows(2_500, 0));

    let mapping = analyzed_mapping(&[input], dir.path());
    let harness = Harness::new(dir.path());
    let options = harness.options(dir.path(), "out", "job-chunks");
    let summaries = harness.run(&mapping, None, &options).unwrap();

    assert_eq!(summaries[0].rows_written, 2_500);
    let chunks: Vec<_> = std::fs::read_dir(&options.dest_dir)
        .unwrap()
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().map(|ext| ext == "csv").unwrap_or(false))
        .collect();
    assert_eq!(chunks.len(), 3, "1000-row chunks over 2500 rows");
    assert_eq!(collect_output_rows(&options.dest_dir).len(), 2_500);
}

// Scenario: two-schema job interrupted mid-flight; resuming with the same
// job id yields the same output row multiset as a crash-free run.
#[test]
fn resume_after_failure_matches_clean_run() {
    let dir = tempdir().expect("temp dir");
    let orders_a = dir.path().join("orders_a.csv");
    let orders_b = dir.path().join("orders_b.csv");
    let shipments = dir.path().join("shipments.csv");
    write_csv(&orders_a, "id,name,price", &numbered_rows(1_200, 0));
    write_csv(&orders_b, "id,name,price", &numbered_rows(1_200, 5_000));
    let shipment_rows: Vec<String> = (0..800)
        .map(|i| format!("{i};dock-{};2024-01-{:02}", i % 5, (i % 27) + 1))
        .collect();
    write_csv(&shipments, "sku;dock;shipped_on", &shipment_rows);

    let mapping = analyzed_mapping(
        &[orders_a, orders_b.clone(), shipments],
        dir.path(),
    );
    assert_eq!(mapping.schemas.len(), 2, "orders and shipments schemas");

    // Clean baseline.
    let harness = Harness::new(dir.path());
    let clean_options = harness.options(dir.path(), "clean", "job-clean");
    let clean_summaries = harness.run(&mapping, None, &clean_options).unwrap();
    let clean_rows = collect_output_rows(&clean_options.dest_dir);
    let clean_short: u64 = clean_summaries.iter().map(|s| s.validation.short_rows).sum();

    // Fault injection: hide one source file so the orders task fails after
    // the first block's checkpoint is committed.
    let store = Store::open(&dir.path().join("store.db")).unwrap();
    let hidden = dir.path().join("orders_b.hidden");
    std::fs::rename(&orders_b, &hidden).unwrap();

    let crash_options = harness.options(dir.path(), "resumed", "job-crash");
    let crashed = harness.run(&mapping, Some(&store), &crash_options);
    assert!(crashed.is_err(), "missing source must fail the job");
    let status = store.fetch_job_status("job-crash").unwrap().expect("status");
    assert_eq!(status.state, "FAILED");
    assert!(status.last_error.is_some());

    // The checkpoint survives the failure.
    let registry = CheckpointRegistry::new(crash_options.checkpoint_dir.clone());
    assert!(registry.load("job-crash", CHECKPOINT_PHASE).is_some());

    // Restore the file and resume under the same job id.
    std::fs::rename(&hidden, &orders_b).unwrap();
    let resumed_harness = Harness::new(dir.path());
    let mut resume_options = crash_options.clone();
    resume_options.resume = true;
    let resumed_summaries = resumed_harness
        .run(&mapping, Some(&store), &resume_options)
        .unwrap();

    let resumed_rows = collect_output_rows(&resume_options.dest_dir);
    assert_eq!(resumed_rows, clean_rows, "row multisets must match");

    let resumed_short: u64 = resumed_summaries
        .iter()
        .map(|s| s.validation.short_rows)
        .sum();
    let resumed_total: u64 = resumed_summaries.iter().map(|s| s.rows_written).sum();
    let clean_total: u64 = clean_summaries.iter().map(|s| s.rows_written).sum();
    assert_eq!(resumed_total, clean_total);
    assert_eq!(resumed_short, clean_short);

    // Terminal success removes the checkpoint.
    assert!(registry.load("job-crash", CHECKPOINT_PHASE).is_none());
}

// Scenario: a tiny spill threshold forces overflow to scratch files while
// the final row count still matches the input.
#[test]
fn back_pressure_spills_without_losing_rows() {
    let dir = tempdir().expect("temp dir");
    let input = dir.path().join("stream.csv");
    write_csv(&input, "id,name,price", &numbered_rows(3_000, 0));

    let mapping = analyzed_mapping(&[input], dir.path());
    let harness = Harness::new(dir.path());
    let mut options = harness.options(dir.path(), "out", "job-spill");
    options.spill_threshold = 200;

    let summaries = harness.run(&mapping, None, &options).unwrap();
    let summary = &summaries[0];
    assert!(summary.spill.spills > 0, "expected spill events");
    assert!(summary.spill.rows_spilled > 0);
    assert_eq!(summary.rows_written, 3_000);
    assert_eq!(collect_output_rows(&options.dest_dir).len(), 3_000);
}

#[test]
fn database_writer_materializes_rows() {
    let dir = tempdir().expect("temp dir");
    let input = dir.path().join("retail.csv");
    write_csv(&input, "id,name,price", &numbered_rows(300, 0));

    let mapping = analyzed_mapping(&[input], dir.path());
    let harness = Harness::new(dir.path());
    let mut options = harness.options(dir.path(), "out", "job-db");
    options.format = WriterFormat::Database;
    let db_path = dir.path().join("dest.db");
    options.db_url = Some(format!("sqlite:///{}", db_path.display()));

    let summaries = harness.run(&mapping, None, &options).unwrap();
    assert_eq!(summaries[0].rows_written, 300);

    let conn = rusqlite::Connection::open(&db_path).unwrap();
    let table: String = conn
        .query_row(
            "SELECT name FROM sqlite_master WHERE type='table' LIMIT 1",
            [],
            |row| row.get(0),
        )
        .unwrap();
    let count: i64 = conn
        .query_row(&format!("SELECT COUNT(*) FROM \"{table}\""), [], |row| row.get(0))
        .unwrap();
    assert_eq!(count, 300);
}

#[test]
fn parquet_writer_produces_chunk_files() {
    let dir = tempdir().expect("temp dir");
    let input = dir.path().join("retail.csv");
    write_csv(&input, "id,name,price", &numbered_rows(1_500, 0));

    let mapping = analyzed_mapping(&[input], dir.path());
    let harness = Harness::new(dir.path());
    let mut options = harness.options(dir.path(), "out", "job-parquet");
    options.format = WriterFormat::Parquet;

    let summaries = harness.run(&mapping, None, &options).unwrap();
    assert_eq!(summaries[0].rows_written, 1_500);
    let parquet_files: Vec<_> = std::fs::read_dir(&options.dest_dir)
        .unwrap()
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().map(|ext| ext == "parquet").unwrap_or(false))
        .collect();
    assert_eq!(parquet_files.len(), 2, "1000-row chunks over 1500 rows");
    // No staging leftovers after rotation.
    assert!(std::fs::read_dir(&options.dest_dir)
        .unwrap()
        .filter_map(|entry| entry.ok())
        .all(|entry| !entry.file_name().to_string_lossy().ends_with(".part")));
}

#[test]
fn metrics_are_recorded_per_schema() {
    let dir = tempdir().expect("temp dir");
    let input = dir.path().join("retail.csv");
    write_csv(&input, "id,name,price", &numbered_rows(100, 0));

    let mapping = analyzed_mapping(&[input], dir.path());
    let store = Store::open(&dir.path().join("store.db")).unwrap();
    let harness = Harness::new(dir.path());
    let options = harness.options(dir.path(), "out", "job-metrics");
    harness.run(&mapping, Some(&store), &options).unwrap();

    let metrics = store.fetch_job_metrics("job-metrics").unwrap();
    assert_eq!(metrics.len(), 1);
    assert_eq!(metrics[0].rows, 100);
    assert!(metrics[0].rows_per_sec > 0.0);
}
