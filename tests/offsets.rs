use std::collections::BTreeMap;

use uuid::Uuid;

use csv_unify::models::{
    CanonicalType, ClusterMember, ColumnProfile, FileColumnProfile, HeaderCluster,
    MappingDocument, SchemaColumn, SchemaDefinition, SchemaMappingEntry, TypeHistogram,
};
use csv_unify::offsets::{detect_offsets, RowNormalizer};

fn cluster(name: &str, members: &[(&str, usize)]) -> HeaderCluster {
    HeaderCluster {
        cluster_id: Uuid::new_v4(),
        canonical_name: name.to_string(),
        members: members
            .iter()
            .map(|(file, index)| ClusterMember {
                file_path: file.to_string(),
                column_index: *index,
                raw_name: name.to_string(),
            })
            .collect(),
        confidence: 1.0,
        needs_review: false,
        version: 1,
        reason_codes: vec![],
    }
}

fn schema(columns: &[(&str, CanonicalType)]) -> SchemaDefinition {
    SchemaDefinition {
        schema_id: Uuid::new_v4(),
        name: "orders".to_string(),
        columns: columns
            .iter()
            .enumerate()
            .map(|(index, (name, data_type))| SchemaColumn {
                index,
                raw_name: name.to_string(),
                normalized_name: name.to_string(),
                data_type: *data_type,
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

#[test]
fn offsets_follow_the_modal_index() {
    let mut mapping = MappingDocument::default();
    mapping.header_clusters = vec![cluster(
        "customer id",
        &[("a.csv", 0), ("b.csv", 0), ("c.csv", 2)],
    )];
    let entries = detect_offsets(&mapping);
    assert_eq!(entries.len(), 3);

    let shifted = entries
        .iter()
        .find(|entry| entry.file_path == "c.csv")
        .expect("shifted entry");
    assert_eq!(shifted.canonical_index, Some(0));
    assert_eq!(shifted.offset, Some(2));
    assert_eq!(shifted.reason.as_deref(), Some("auto-detected"));

    let stable = entries
        .iter()
        .find(|entry| entry.file_path == "a.csv")
        .expect("stable entry");
    assert_eq!(stable.offset, None);
    assert_eq!(stable.reason, None);
}

#[test]
fn offset_confidence_reflects_profile_distance() {
    let mut mapping = MappingDocument::default();
    mapping.header_clusters = vec![cluster("amount", &[("a.csv", 1), ("b.csv", 1)])];
    mapping.column_profiles = vec![
        FileColumnProfile {
            file_path: "a.csv".to_string(),
            column_index: 1,
            profile: ColumnProfile {
                type_hist: TypeHistogram {
                    numeric: 100,
                    ..TypeHistogram::default()
                },
                ..ColumnProfile::default()
            },
        },
        FileColumnProfile {
            file_path: "b.csv".to_string(),
            column_index: 1,
            profile: ColumnProfile {
                type_hist: TypeHistogram {
                    numeric: 95,
                    text: 5,
                    ..TypeHistogram::default()
                },
                ..ColumnProfile::default()
            },
        },
    ];
    let entries = detect_offsets(&mapping);
    for entry in &entries {
        assert!(entry.confidence > 0.9, "confidence {}", entry.confidence);
        assert!(entry.confidence <= 1.0);
    }
}

#[test]
fn rows_are_reordered_into_canonical_positions() {
    let entries = vec![
        SchemaMappingEntry {
            file_path: "shifted.csv".to_string(),
            source_index: 0,
            canonical_name: "name".to_string(),
            canonical_index: Some(1),
            confidence: 1.0,
            offset: Some(-1),
            reason: Some("auto-detected".to_string()),
        },
        SchemaMappingEntry {
            file_path: "shifted.csv".to_string(),
            source_index: 1,
            canonical_name: "id".to_string(),
            canonical_index: Some(0),
            confidence: 1.0,
            offset: Some(1),
            reason: Some("auto-detected".to_string()),
        },
    ];
    let schema = schema(&[("id", CanonicalType::Int), ("name", CanonicalType::String)]);
    let mut normalizer = RowNormalizer::new(&entries, &[]);

    let row = vec!["alice".to_string(), "7".to_string()];
    let normalized = normalizer.normalize(row, &schema, "shifted.csv");
    assert_eq!(normalized.values, vec!["7".to_string(), "alice".to_string()]);
    assert_eq!(normalized.observed_length, 2);
}

#[test]
fn missing_sources_become_nulls_and_extras_survive_in_width() {
    let entries = vec![SchemaMappingEntry {
        file_path: "short.csv".to_string(),
        source_index: 0,
        canonical_name: "id".to_string(),
        canonical_index: Some(0),
        confidence: 1.0,
        offset: None,
        reason: None,
    }];
    let schema = schema(&[
        ("id", CanonicalType::Int),
        ("name", CanonicalType::String),
        ("total", CanonicalType::Float),
    ]);
    let mut normalizer = RowNormalizer::new(&entries, &[]);

    // Short row: only the id is present.
    let normalized = normalizer.normalize(vec!["5".to_string()], &schema, "short.csv");
    assert_eq!(normalized.observed_length, 1);
    assert_eq!(normalized.values[0], "5");
    assert_eq!(normalized.values[1], "");
    assert_eq!(normalized.values[2], "");

    // Unmapped extras fill remaining canonical slots in order.
    let normalized = normalizer.normalize(
        vec!["5".to_string(), "bob".to_string(), "9.5".to_string(), "extra".to_string()],
        &schema,
        "short.csv",
    );
    assert_eq!(normalized.observed_length, 4);
    assert_eq!(normalized.values[0], "5");
    assert_eq!(normalized.values[1], "bob");
    assert_eq!(normalized.values[2], "9.5");
}

#[test]
fn unknown_file_passes_rows_through() {
    let schema = schema(&[("id", CanonicalType::Int)]);
    let mut normalizer = RowNormalizer::new(&[], &[]);
    let row = vec!["1".to_string(), "2".to_string()];
    let normalized = normalizer.normalize(row.clone(), &schema, "unmapped.csv");
    assert_eq!(normalized.values, row);
}

#[test]
fn name_only_entries_resolve_through_schema_slugs() {
    let entries = vec![SchemaMappingEntry {
        file_path: "f.csv".to_string(),
        source_index: 0,
        canonical_name: "Customer ID".to_string(),
        canonical_index: None,
        confidence: 0.8,
        offset: None,
        reason: None,
    }];
    let schema = schema(&[
        ("customer_id", CanonicalType::Int),
        ("total", CanonicalType::Float),
    ]);
    let mut normalizer = RowNormalizer::new(&entries, &[]);
    let normalized = normalizer.normalize(vec!["42".to_string()], &schema, "f.csv");
    assert_eq!(normalized.values[0], "42");
}

#[test]
fn profile_fallback_matches_by_dominant_type() {
    // Entry with an unresolvable name; the source column is numeric, and the
    // schema has exactly one numeric column at index 1.
    let entries = vec![
        SchemaMappingEntry {
            file_path: "g.csv".to_string(),
            source_index: 0,
            canonical_name: "mystery".to_string(),
            canonical_index: None,
            confidence: 0.5,
            offset: None,
            reason: None,
        },
        SchemaMappingEntry {
            file_path: "other.csv".to_string(),
            source_index: 1,
            canonical_name: "total".to_string(),
            canonical_index: Some(1),
            confidence: 1.0,
            offset: None,
            reason: None,
        },
    ];
    let profiles = vec![
        FileColumnProfile {
            file_path: "g.csv".to_string(),
            column_index: 0,
            profile: ColumnProfile {
                type_hist: TypeHistogram {
                    numeric: 50,
                    ..TypeHistogram::default()
                },
                numeric_min: Some(1.0),
                numeric_max: Some(100.0),
                ..ColumnProfile::default()
            },
        },
        FileColumnProfile {
            file_path: "other.csv".to_string(),
            column_index: 1,
            profile: ColumnProfile {
                type_hist: TypeHistogram {
                    numeric: 60,
                    ..TypeHistogram::default()
                },
                numeric_min: Some(5.0),
                numeric_max: Some(90.0),
                ..ColumnProfile::default()
            },
        },
    ];
    let schema = schema(&[("label", CanonicalType::String), ("total", CanonicalType::Float)]);
    let mut normalizer = RowNormalizer::new(&entries, &profiles);
    let normalized = normalizer.normalize(vec!["77".to_string()], &schema, "g.csv");
    assert_eq!(normalized.values[1], "77");
}
