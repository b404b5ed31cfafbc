mod common;

use tempfile::tempdir;

use csv_unify::analyze::{collect_input_files, AdaptiveThrottle};
use csv_unify::models::TypeBucket;

use common::{analyzed_mapping, numbered_rows, write_csv};

#[test]
fn analysis_builds_mapping_with_profiles_and_headers() {
    let dir = tempdir().expect("temp dir");
    let input = dir.path().join("retail.csv");
    write_csv(&input, "id,name,price", &numbered_rows(200, 0));

    let mapping = analyzed_mapping(&[input.clone()], dir.path());
    assert_eq!(mapping.artifact_version, 1);
    assert_eq!(mapping.schemas.len(), 1);
    assert_eq!(mapping.blocks.len(), 1);

    let schema = &mapping.schemas[0];
    assert_eq!(schema.columns.len(), 3);
    assert_eq!(schema.columns[0].raw_name, "id");
    assert_eq!(schema.columns[1].raw_name, "name");
    assert!(schema.confidence > 0.99);

    let block = &mapping.blocks[0];
    assert_eq!(block.schema_id, Some(schema.schema_id));
    assert_eq!(block.signature.column_count, 3);
    assert_eq!(block.signature.column_types[0], TypeBucket::Numeric);

    let key = input.display().to_string();
    assert_eq!(
        mapping.file_headers.get(&key).map(|headers| headers.len()),
        Some(3)
    );
    assert_eq!(mapping.column_profiles.len(), 3);
    assert!(schema.blocks_by_file.contains_key(&key));
}

#[test]
fn files_with_same_shape_share_a_schema() {
    let dir = tempdir().expect("temp dir");
    let a = dir.path().join("jan.csv");
    let b = dir.path().join("feb.csv");
    write_csv(&a, "id,name,price", &numbered_rows(50, 0));
    write_csv(&b, "id,name,price", &numbered_rows(50, 100));

    let mapping = analyzed_mapping(&[a, b], dir.path());
    assert_eq!(mapping.schemas.len(), 1);
    assert_eq!(mapping.blocks.len(), 2);
    assert_eq!(mapping.schemas[0].blocks_by_file.len(), 2);
}

#[test]
fn different_shapes_get_distinct_schemas() {
    let dir = tempdir().expect("temp dir");
    let a = dir.path().join("orders.csv");
    let b = dir.path().join("inventory.csv");
    write_csv(&a, "id,name,price", &numbered_rows(50, 0));
    let inventory: Vec<String> = (0..50)
        .map(|i| format!("w-{i}|{}|{}|full", i * 2, i % 3))
        .collect();
    write_csv(&b, "warehouse|capacity|zone|state", &inventory);

    let mapping = analyzed_mapping(&[a, b], dir.path());
    assert_eq!(mapping.schemas.len(), 2);
}

#[test]
fn throttle_halves_after_three_slow_windows() {
    let mut throttle = AdaptiveThrottle::new(8, 1.0);
    assert_eq!(throttle.limit(), 8);
    for _ in 0..3 {
        throttle.report(5.0);
    }
    assert_eq!(throttle.limit(), 4);
    for _ in 0..3 {
        throttle.report(5.0);
    }
    assert_eq!(throttle.limit(), 2);
}

#[test]
fn throttle_floor_is_one_worker() {
    let mut throttle = AdaptiveThrottle::new(2, 1.0);
    for _ in 0..12 {
        throttle.report(10.0);
    }
    assert_eq!(throttle.limit(), 1);
}

#[test]
fn throttle_doubles_after_six_fast_windows() {
    let mut throttle = AdaptiveThrottle::new(8, 1.0);
    for _ in 0..3 {
        throttle.report(5.0);
    }
    assert_eq!(throttle.limit(), 4);
    // Recovery requires six consecutive fast windows, but the moving average
    // still contains slow samples at first.
    for _ in 0..16 {
        throttle.report(0.01);
    }
    assert_eq!(throttle.limit(), 8);
}

#[test]
fn throttle_never_exceeds_profile_cap() {
    let mut throttle = AdaptiveThrottle::new(4, 1.0);
    for _ in 0..40 {
        throttle.report(0.01);
    }
    assert_eq!(throttle.limit(), 4);
}

#[test]
fn collect_input_files_scans_directories() {
    let dir = tempdir().expect("temp dir");
    write_csv(&dir.path().join("a.csv"), "x", &["1".to_string()]);
    write_csv(&dir.path().join("b.tsv"), "y", &["2".to_string()]);
    std::fs::write(dir.path().join("ignore.json"), "{}").unwrap();

    let files = collect_input_files(&[dir.path().to_path_buf()]).unwrap();
    assert_eq!(files.len(), 2);
    assert!(files.iter().all(|path| {
        let ext = path.extension().unwrap().to_string_lossy().to_string();
        ext == "csv" || ext == "tsv"
    }));
}

#[test]
fn collect_input_files_rejects_missing_paths() {
    let err = collect_input_files(&[std::path::PathBuf::from("no/such/dir")]).unwrap_err();
    assert!(format!("{err:#}").contains("does not exist"));
}
