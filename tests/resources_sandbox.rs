use std::path::{Path, PathBuf};

use tempfile::tempdir;

use csv_unify::config::ResourceLimits;
use csv_unify::resources::ResourceManager;
use csv_unify::sandbox::Sandbox;

fn limits(temp_dir: &Path) -> ResourceLimits {
    ResourceLimits {
        memory_mb: Some(1_024),
        spill_mb: Some(2_048),
        max_workers: Some(4),
        temp_dir: temp_dir.to_path_buf(),
    }
}

#[test]
fn reservations_respect_budgets() {
    let dir = tempdir().expect("temp dir");
    let manager = ResourceManager::new(limits(dir.path())).unwrap();

    let lease = manager.reserve(512, 1_000, 2).unwrap();
    // A second reservation fitting the remainder succeeds.
    let small = manager.reserve(512, 1_000, 2).unwrap();
    drop(small);

    // Exceeding the remaining RAM fails fast.
    let err = manager.reserve(600, 0, 0).unwrap_err();
    assert!(format!("{err:#}").contains("RAM budget exceeded"));
    drop(lease);

    // Released leases free their budget.
    manager.reserve(1_000, 2_000, 4).unwrap();
}

#[test]
fn worker_budget_is_enforced() {
    let dir = tempdir().expect("temp dir");
    let manager = ResourceManager::new(limits(dir.path())).unwrap();
    let _lease = manager.reserve(0, 0, 4).unwrap();
    let err = manager.reserve(0, 0, 1).unwrap_err();
    assert!(format!("{err:#}").contains("Worker budget exceeded"));
}

#[test]
fn plan_workers_clamps_to_limit() {
    let dir = tempdir().expect("temp dir");
    let manager = ResourceManager::new(limits(dir.path())).unwrap();
    assert_eq!(manager.plan_workers(16), 4);
    assert_eq!(manager.plan_workers(2), 2);
    assert_eq!(manager.plan_workers(0), 1);
}

#[test]
fn scratch_dirs_follow_job_phase_schema_layout() {
    let dir = tempdir().expect("temp dir");
    let manager = ResourceManager::new(limits(dir.path())).unwrap();

    let scratch = manager
        .scratch_dir("Job 42", &["materialize", "Retail Sales"])
        .unwrap();
    assert!(scratch.ends_with("job_42/materialize/retail_sales"));
    assert!(scratch.exists());

    manager.cleanup("Job 42");
    assert!(!dir.path().join("job_42").exists());
}

#[test]
fn unlimited_budgets_accept_any_reservation() {
    let dir = tempdir().expect("temp dir");
    let manager = ResourceManager::new(ResourceLimits {
        memory_mb: None,
        spill_mb: None,
        max_workers: None,
        temp_dir: dir.path().to_path_buf(),
    })
    .unwrap();
    manager.reserve(1_000_000, 1_000_000, 512).unwrap();
    assert_eq!(manager.plan_workers(64), 64);
}

#[test]
fn sandbox_accepts_paths_under_root() {
    let sandbox = Sandbox::new("/data/jobs", vec![]);
    assert!(sandbox.resolve(Path::new("input/a.csv")).is_ok());
    assert!(sandbox.resolve(Path::new("/data/jobs/deep/nested/file.csv")).is_ok());
}

#[test]
fn sandbox_rejects_escapes() {
    let sandbox = Sandbox::new("/data/jobs", vec![]);
    let err = sandbox.resolve(Path::new("../secrets.txt")).unwrap_err();
    assert!(format!("{err:#}").contains("SANDBOX_VIOLATION"));
    assert!(sandbox.resolve(Path::new("/etc/passwd")).is_err());
    // Dot-dot segments inside the tree cannot climb out either.
    assert!(sandbox
        .resolve(Path::new("nested/../../../etc/passwd"))
        .is_err());
}

#[test]
fn sandbox_allowlist_extends_root() {
    let sandbox = Sandbox::new("/data/jobs", vec![PathBuf::from("/var/tmp/spill")]);
    assert!(sandbox.resolve(Path::new("/var/tmp/spill/chunk.jsonl")).is_ok());
    assert!(sandbox.resolve(Path::new("/var/tmp/other")).is_err());
}
