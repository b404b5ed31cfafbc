mod common;

use std::collections::HashMap;
use std::io::Write;

use tempfile::{tempdir, NamedTempFile};

use csv_unify::canonical::CanonicalRegistry;
use csv_unify::normalize::apply;
use csv_unify::synonyms::SynonymDictionary;

use common::{analyzed_mapping, numbered_rows, write_csv};

#[test]
fn synonyms_rename_columns_and_track_variants() {
    let dir = tempdir().expect("temp dir");
    let input = dir.path().join("sales.csv");
    write_csv(&input, "Customer ID,name,price", &numbered_rows(40, 0));

    let mut mapping = analyzed_mapping(&[input], dir.path());
    let mut synonym_map = HashMap::new();
    synonym_map.insert(
        "customer_number".to_string(),
        vec!["customer id".to_string()],
    );
    let synonyms = SynonymDictionary::from_mapping(&synonym_map);

    apply(&mut mapping, &synonyms, &CanonicalRegistry::empty()).unwrap();

    let column = &mapping.schemas[0].columns[0];
    assert_eq!(column.normalized_name, "customer_number");
    assert!(column
        .known_variants
        .iter()
        .any(|variant| variant == "Customer ID"));
}

#[test]
fn canonical_contract_binds_schema_and_types() {
    let dir = tempdir().expect("temp dir");
    let input = dir.path().join("orders.csv");
    write_csv(&input, "id,name,price", &numbered_rows(40, 0));

    let mut mapping = analyzed_mapping(&[input], dir.path());
    // Give the discovered schema the contract's id.
    mapping.schemas[0].canonical_schema_id = Some("orders".to_string());

    let mut contracts = NamedTempFile::new().unwrap();
    write!(
        contracts,
        r#"[{{"namespace": "default", "id": "orders", "version": "2.1.0", "columns": [
            {{"name": "id", "data_type": "int", "required": true}},
            {{"name": "price", "data_type": "decimal", "required": true}}
        ]}}]"#
    )
    .unwrap();
    let registry = CanonicalRegistry::from_file(contracts.path()).unwrap();

    let bound = apply(&mut mapping, &SynonymDictionary::empty(), &registry).unwrap();
    assert_eq!(bound, 1);

    let schema = &mapping.schemas[0];
    assert_eq!(schema.canonical_schema_id.as_deref(), Some("orders"));
    assert_eq!(schema.canonical_schema_version.as_deref(), Some("2.1.0"));
    let id_column = schema
        .columns
        .iter()
        .find(|column| column.normalized_name == "id")
        .unwrap();
    assert_eq!(
        serde_json::to_string(&id_column.data_type).unwrap(),
        "\"int\""
    );
}

#[test]
fn normalize_fills_clusters_and_mapping_entries() {
    let dir = tempdir().expect("temp dir");
    let a = dir.path().join("jan.csv");
    let b = dir.path().join("feb.csv");
    write_csv(&a, "Customer ID,name,price", &numbered_rows(40, 0));
    write_csv(&b, "customer id,name,price", &numbered_rows(40, 90));

    let mut mapping = analyzed_mapping(&[a, b], dir.path());
    assert!(mapping.header_clusters.is_empty());
    assert!(mapping.schema_mapping.is_empty());
    let version_before = mapping.artifact_version;

    apply(&mut mapping, &SynonymDictionary::empty(), &CanonicalRegistry::empty()).unwrap();

    assert!(!mapping.header_clusters.is_empty());
    // Every (file, column) pair gets a mapping entry: 2 files x 3 columns.
    assert_eq!(mapping.schema_mapping.len(), 6);
    assert_eq!(mapping.artifact_version, version_before + 1);
}
