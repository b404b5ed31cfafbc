use std::collections::HashSet;
use std::io::Write;

use tempfile::NamedTempFile;

use csv_unify::models::TypeBucket;
use csv_unify::profiler::{
    build_signature, classify_value, detect_delimiter, looks_like_header, profile_file_columns,
    split_delimited, ColumnAccumulator, HllLite, MIXED_DELIMITER_WARNING,
};

fn lines(raw: &[&str]) -> Vec<String> {
    raw.iter().map(|line| line.to_string()).collect()
}

#[test]
fn classify_value_buckets() {
    assert_eq!(classify_value("42"), TypeBucket::Numeric);
    assert_eq!(classify_value("-3.5"), TypeBucket::Numeric);
    assert_eq!(classify_value("3,5"), TypeBucket::Numeric);
    assert_eq!(classify_value("2024-01-15"), TypeBucket::Date);
    assert_eq!(classify_value("15.01.2024"), TypeBucket::Date);
    assert_eq!(classify_value("true"), TypeBucket::Bool);
    assert_eq!(classify_value("no"), TypeBucket::Bool);
    assert_eq!(classify_value("widget"), TypeBucket::Text);
    assert_eq!(classify_value("   "), TypeBucket::Null);
    assert_eq!(classify_value(""), TypeBucket::Null);
}

#[test]
fn split_delimited_honors_quotes() {
    assert_eq!(
        split_delimited("a,\"b,c\",d", ','),
        vec!["a".to_string(), "b,c".to_string(), "d".to_string()]
    );
    assert_eq!(
        split_delimited("\"he said \"\"hi\"\"\",x", ','),
        vec!["he said \"hi\"".to_string(), "x".to_string()]
    );
}

// Scenario: single file of six rows with header id,name,price.
#[test]
fn retail_small_signature() {
    let block = lines(&[
        "id,name,price",
        "1,apple,10.5",
        "2,banana,4.2",
        "3,pear,7.0",
        "4,plum,3.3",
        "5,grape,8.8",
        "6,melon,12.0",
    ]);
    let (signature, profiles) = build_signature(&block, 16, 0.7, true);

    assert_eq!(signature.delimiter, ',');
    assert_eq!(signature.column_count, 3);
    assert_eq!(
        signature.header_sample,
        Some(vec!["id".to_string(), "name".to_string(), "price".to_string()])
    );
    assert_eq!(signature.short_rows, 0);
    assert_eq!(signature.long_rows, 0);
    assert!(signature.warnings.is_empty());

    assert_eq!(signature.column_types[0], TypeBucket::Numeric);
    assert_eq!(signature.column_types[1], TypeBucket::Text);
    assert_eq!(signature.column_types[2], TypeBucket::Numeric);

    let id = &profiles[0];
    assert_eq!(id.nulls, 0);
    assert_eq!(id.numeric_min, Some(1.0));
    assert_eq!(id.numeric_max, Some(6.0));
    let price = &profiles[2];
    assert_eq!(price.nulls, 0);
    assert_eq!(price.type_hist.numeric, 6);
}

// Scenario: rows alternating between comma and semicolon delimiters.
#[test]
fn mixed_delimiters_pick_comma_and_warn() {
    let block = lines(&[
        "a,b,c",
        "1;2;3",
        "4,5,6",
        "7;8;9",
        "10,11,12",
        "13;14;15",
    ]);
    let (delimiter, mixed) = detect_delimiter(&block);
    assert_eq!(delimiter, ',');
    assert!(mixed);

    let (signature, _) = build_signature(&block, 16, 0.7, false);
    assert_eq!(signature.delimiter, ',');
    assert!(signature
        .warnings
        .iter()
        .any(|warning| warning == MIXED_DELIMITER_WARNING));
    // The three semicolon rows collapse to a single column under ','.
    assert_eq!(signature.short_rows, 3);
}

#[test]
fn tab_and_pipe_delimiters_detected() {
    let (delimiter, _) = detect_delimiter(&lines(&["a\tb\tc", "1\t2\t3"]));
    assert_eq!(delimiter, '\t');
    let (delimiter, _) = detect_delimiter(&lines(&["a|b|c", "1|2|3"]));
    assert_eq!(delimiter, '|');
}

#[test]
fn header_detection_respects_nontext_ratio() {
    let header = vec!["id".to_string(), "name".to_string(), "price".to_string()];
    let rows = vec![vec!["1".to_string(), "apple".to_string(), "2.5".to_string()]];
    assert!(looks_like_header(&header, &rows, 0.7));

    // Mostly numeric first line is data, not a header.
    let numeric = vec!["1".to_string(), "2".to_string(), "apple".to_string()];
    assert!(!looks_like_header(&numeric, &rows, 0.7));

    // A first line whose cells recur in the data is data.
    let repeated = vec!["apple".to_string(), "pear".to_string()];
    let body = vec![vec!["apple".to_string(), "other".to_string()]];
    assert!(!looks_like_header(&repeated, &body, 0.7));
}

#[test]
fn headerless_block_profiles_all_rows() {
    let block = lines(&["1,foo", "2,bar", "3,baz"]);
    let (signature, profiles) = build_signature(&block, 16, 0.7, true);
    assert_eq!(signature.header_sample, None);
    assert_eq!(signature.column_count, 2);
    assert_eq!(profiles[0].type_hist.numeric, 3);
}

#[test]
fn empty_lines_are_skipped() {
    let block = lines(&["a,b", "", "1,2", "   ", "3,4"]);
    let (signature, profiles) = build_signature(&block, 16, 0.7, true);
    assert_eq!(signature.column_count, 2);
    assert_eq!(profiles[0].type_hist.total(), 2);
}

#[test]
fn quoted_newlines_joined_for_comma_blocks() {
    let block = lines(&["name,note", "alice,\"line one", "line two\"", "bob,short"]);
    let (signature, _) = build_signature(&block, 16, 0.7, true);
    assert_eq!(signature.column_count, 2);
    assert_eq!(signature.short_rows, 0);
    assert_eq!(signature.long_rows, 0);
}

// HLL-lite estimate stays within five percent for streams past ten thousand
// distinct values.
#[test]
fn hll_estimate_within_bound() {
    let mut hll = HllLite::default();
    let truth = 10_000u64;
    for i in 0..truth {
        hll.add(&format!("value-{i}"));
    }
    let estimate = hll.estimate();
    let error = (estimate as f64 - truth as f64).abs() / truth as f64;
    assert!(
        error <= 0.05,
        "estimate {estimate} deviates {:.1}% from {truth}",
        error * 100.0
    );
}

#[test]
fn hll_merge_is_superset_of_parts() {
    let mut left = HllLite::default();
    let mut right = HllLite::default();
    for i in 0..500 {
        left.add(&format!("left-{i}"));
        right.add(&format!("right-{i}"));
    }
    let separate = left.estimate();
    left.merge(&right);
    assert!(left.estimate() >= separate);
}

#[test]
fn top_k_tracks_heavy_hitters() {
    let mut accumulator = ColumnAccumulator::new(Some("status".to_string()), 8);
    for _ in 0..200 {
        accumulator.observe("ACTIVE");
    }
    for _ in 0..50 {
        accumulator.observe("INACTIVE");
    }
    for i in 0..30 {
        accumulator.observe(&format!("rare-{i}"));
    }
    let profile = accumulator.finish();
    assert!(profile.top_k.len() <= 16);
    assert_eq!(profile.top_k[0].value, "ACTIVE");
    assert!(profile.top_k[0].count >= 200);
    assert_eq!(profile.top_k[1].value, "INACTIVE");
}

#[test]
fn accumulator_tracks_minmax_and_nulls() {
    let mut accumulator = ColumnAccumulator::new(None, 8);
    for value in ["5", "", "12", "3", ""] {
        accumulator.observe(value);
    }
    let profile = accumulator.finish();
    assert_eq!(profile.nulls, 2);
    assert_eq!(profile.non_nulls, 3);
    assert_eq!(profile.numeric_min, Some(3.0));
    assert_eq!(profile.numeric_max, Some(12.0));
    assert_eq!(profile.min.as_deref(), Some("12"));
    assert_eq!(profile.max.as_deref(), Some("5"));
}

#[test]
fn file_profile_streams_all_columns() {
    let mut file = NamedTempFile::new().expect("temp file");
    writeln!(file, "id,city,amount").unwrap();
    for i in 0..100 {
        writeln!(file, "{i},town-{},{}.5", i % 7, i).unwrap();
    }
    let (names, profiles) =
        profile_file_columns(file.path(), ',', encoding_rs::UTF_8, true, 16).unwrap();
    assert_eq!(names, vec!["id", "city", "amount"]);
    assert_eq!(profiles.len(), 3);
    assert_eq!(profiles[0].type_hist.numeric, 100);
    let cities: HashSet<_> = profiles[1].sample_values.iter().collect();
    assert!(cities.len() <= 16);
    assert_eq!(profiles[2].nulls, 0);
}
