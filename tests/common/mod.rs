#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use csv_unify::analyze::{analyze_files, assemble_mapping};
use csv_unify::config::{builtin_profile, GlobalSettings, ProfileSettings, RuntimeConfig};
use csv_unify::models::MappingDocument;
use csv_unify::progress::ProgressLogger;
use csv_unify::resources::ResourceManager;

pub fn write_csv(path: &Path, header: &str, rows: &[String]) {
    let mut content = String::new();
    content.push_str(header);
    content.push('\n');
    for row in rows {
        content.push_str(row);
        content.push('\n');
    }
    std::fs::write(path, content).expect("write fixture");
}

pub fn numbered_rows(count: usize, offset: usize) -> Vec<String> {
    (0..count)
        .map(|i| format!("{},item-{},{}.50", i + offset, (i + offset) % 13, i + offset))
        .collect()
}

/// Single-block profile sized so each small fixture file maps to one block.
pub fn test_profile(temp_dir: &Path) -> ProfileSettings {
    let mut profile = builtin_profile("workstation").expect("builtin profile");
    profile.max_parallel_files = 2;
    profile.writer_chunk_rows = 1_000;
    profile.resource_limits.temp_dir = temp_dir.to_path_buf();
    profile
}

pub fn test_config(temp_dir: &Path) -> RuntimeConfig {
    RuntimeConfig {
        global: GlobalSettings::default(),
        profile: test_profile(temp_dir),
    }
}

/// Analyze fixture files into a mapping document, like the analyze verb does.
pub fn analyzed_mapping(files: &[PathBuf], temp_dir: &Path) -> MappingDocument {
    let config = test_config(temp_dir);
    let resources = ResourceManager::new(config.profile.resource_limits.clone()).unwrap();
    let progress = ProgressLogger::disabled();
    let cancel = Arc::new(AtomicBool::new(false));
    let results =
        analyze_files(files, &config, &resources, &progress, &cancel, "test-job").unwrap();
    assemble_mapping(results)
}

/// Read every data row (header excluded) from all csv chunks in a directory.
pub fn collect_output_rows(dest: &Path) -> Vec<String> {
    let mut rows = Vec::new();
    let mut chunks: Vec<PathBuf> = std::fs::read_dir(dest)
        .expect("read dest")
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().map(|ext| ext == "csv").unwrap_or(false))
        .collect();
    chunks.sort();
    for chunk in chunks {
        let content = std::fs::read_to_string(&chunk).expect("read chunk");
        for (index, line) in content.lines().enumerate() {
            if index == 0 || line.trim().is_empty() {
                continue;
            }
            rows.push(line.to_string());
        }
    }
    rows.sort();
    rows
}
