use std::collections::BTreeMap;

use tempfile::tempdir;
use uuid::Uuid;

use csv_unify::models::{CanonicalType, SchemaColumn, SchemaDefinition};
use csv_unify::writers::{build_writer, resolve_sqlite_path, WriterFormat};

fn schema(name: &str, columns: &[&str]) -> SchemaDefinition {
    SchemaDefinition {
        schema_id: Uuid::new_v4(),
        name: name.to_string(),
        columns: columns
            .iter()
            .enumerate()
            .map(|(index, column)| SchemaColumn {
                index,
                raw_name: column.to_string(),
                normalized_name: column.to_string(),
                data_type: CanonicalType::String,
                known_variants: vec![],
            })
            .collect(),
        blocks_by_file: BTreeMap::new(),
        confidence: 1.0,
        canonical_schema_id: None,
        canonical_namespace: None,
        canonical_schema_version: None,
    }
}

fn row(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

#[test]
fn csv_writer_rotates_and_names_chunks_by_ordinal() {
    let dir = tempdir().expect("temp dir");
    let schema = schema("retail sales", &["id", "name"]);
    let mut writer = build_writer(WriterFormat::Csv, &schema, dir.path(), 3, None, None).unwrap();

    let batch: Vec<Vec<String>> = (0..7).map(|i| row(&[&i.to_string(), "x"])).collect();
    writer.write_rows(&batch).unwrap();
    writer.close().unwrap();

    let cursor = writer.cursor();
    assert_eq!(cursor.total_rows, 7);
    assert_eq!(cursor.chunk_ordinal, 2);
    assert_eq!(cursor.output_files.len(), 3);

    // Chunk files follow <slug>_<ordinal>.csv and each carries one header.
    for (ordinal, expected_rows) in [(0u64, 3usize), (1, 3), (2, 1)] {
        let path = dir.path().join(format!("retail_sales_{ordinal:03}.csv"));
        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "id,name");
        assert_eq!(lines.len(), expected_rows + 1);
    }
}

#[test]
fn csv_resume_truncates_uncommitted_rows() {
    let dir = tempdir().expect("temp dir");
    let schema = schema("orders", &["id"]);

    // First writer: checkpoint after two rows, then write two more that are
    // never covered by a checkpoint (simulated crash: no close).
    let mut writer =
        build_writer(WriterFormat::Csv, &schema, dir.path(), 100, None, None).unwrap();
    writer.write_row(&row(&["1"])).unwrap();
    writer.write_row(&row(&["2"])).unwrap();
    writer.checkpoint_sync().unwrap();
    let committed = writer.cursor();
    writer.write_row(&row(&["3"])).unwrap();
    writer.write_row(&row(&["4"])).unwrap();
    writer.checkpoint_sync().unwrap();
    drop(writer);

    // Resume from the committed cursor: the staged chunk is truncated back
    // to two rows before appending replayed data.
    let mut resumed =
        build_writer(WriterFormat::Csv, &schema, dir.path(), 100, None, Some(&committed)).unwrap();
    resumed.write_row(&row(&["3"])).unwrap();
    resumed.write_row(&row(&["4"])).unwrap();
    resumed.close().unwrap();

    let content = std::fs::read_to_string(dir.path().join("orders_000.csv")).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines, vec!["id", "1", "2", "3", "4"]);
    assert_eq!(resumed.cursor().total_rows, 4);
}

#[test]
fn parquet_cursor_mid_chunk_is_superseded() {
    let dir = tempdir().expect("temp dir");
    let schema = schema("events", &["id"]);

    let mut writer =
        build_writer(WriterFormat::Parquet, &schema, dir.path(), 10, None, None).unwrap();
    writer.write_row(&row(&["1"])).unwrap();
    writer.checkpoint_sync().unwrap();
    let committed = writer.cursor();
    // checkpoint_sync seals parquet chunks, so the committed cursor sits at
    // a chunk boundary.
    assert_eq!(committed.rows_in_chunk, 0);
    assert_eq!(committed.chunk_ordinal, 1);
    drop(writer);

    let mut resumed = build_writer(
        WriterFormat::Parquet,
        &schema,
        dir.path(),
        10,
        None,
        Some(&committed),
    )
    .unwrap();
    resumed.write_row(&row(&["2"])).unwrap();
    resumed.close().unwrap();
    let cursor = resumed.cursor();
    assert_eq!(cursor.total_rows, 2);
    assert!(dir.path().join("events_000.parquet").exists());
    assert!(dir.path().join("events_001.parquet").exists());
}

#[test]
fn database_writer_requires_sqlite_url() {
    let dir = tempdir().expect("temp dir");
    let schema = schema("orders", &["id"]);
    let err = build_writer(WriterFormat::Database, &schema, dir.path(), 10, None, None)
        .unwrap_err();
    assert!(format!("{err:#}").contains("--db-url"));

    assert!(resolve_sqlite_path("postgres://host/db").is_err());
    assert!(resolve_sqlite_path("sqlite:///tmp/x.db").is_ok());
}

#[test]
fn writer_format_parsing() {
    assert!(WriterFormat::parse("CSV").is_ok());
    assert!(WriterFormat::parse("Parquet").is_ok());
    assert!(WriterFormat::parse("database").is_ok());
    assert!(WriterFormat::parse("avro").is_err());
}
