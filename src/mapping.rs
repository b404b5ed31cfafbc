//! Mapping artifact persistence.
//!
//! The mapping document is immutable once written; refinement phases emit a
//! new document with a bumped `artifact_version`.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{Context, Result};

use crate::io_utils;
use crate::models::MappingDocument;

/// Save a mapping document atomically. When `include_samples` is false the
/// per-column sample payloads are stripped from the serialized form, which
/// keeps artifacts small for large runs.
pub fn save(mapping: &MappingDocument, path: &Path, include_samples: bool) -> Result<()> {
    if include_samples {
        io_utils::write_json_atomic(path, mapping)
    } else {
        let mut trimmed = mapping.clone();
        strip_samples(&mut trimmed);
        io_utils::write_json_atomic(path, &trimmed)
    }
}

pub fn load(path: &Path) -> Result<MappingDocument> {
    let file = File::open(path).with_context(|| format!("Opening mapping {path:?}"))?;
    let reader = BufReader::new(file);
    let mapping =
        serde_json::from_reader(reader).with_context(|| format!("Parsing mapping {path:?}"))?;
    Ok(mapping)
}

pub fn strip_samples(mapping: &mut MappingDocument) {
    for block in &mut mapping.blocks {
        for profile in &mut block.column_profiles {
            profile.sample_values.clear();
        }
    }
    for entry in &mut mapping.column_profiles {
        entry.profile.sample_values.clear();
    }
}

/// Next artifact version for a refinement of `mapping`.
pub fn next_artifact_version(mapping: &MappingDocument) -> u64 {
    mapping.artifact_version + 1
}

/// Path of the sibling artifact `<stem>.<suffix>.json` next to a mapping.
pub fn sibling_artifact(path: &Path, suffix: &str) -> std::path::PathBuf {
    let stem = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("mapping");
    let stem = stem.strip_suffix(".json").unwrap_or(stem);
    path.with_file_name(format!("{stem}.{suffix}.json"))
}
