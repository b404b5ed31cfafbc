//! Runtime configuration profiles.
//!
//! Profiles arrive either as built-ins (`low_memory`, `workstation`) or from a
//! JSON config document `{version, global, profiles}`. Malformed documents and
//! unknown profile names surface as `CONFIG_ERROR`.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::errors::PipelineError;

/// Global knobs that apply across profiles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalSettings {
    #[serde(default = "default_encoding")]
    pub encoding: String,
    #[serde(default = "default_error_policy")]
    pub error_policy: ErrorPolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synonym_dictionary: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canonical_schema_path: Option<PathBuf>,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            encoding: default_encoding(),
            error_policy: default_error_policy(),
            synonym_dictionary: None,
            canonical_schema_path: None,
        }
    }
}

fn default_encoding() -> String {
    "utf-8".to_string()
}

fn default_error_policy() -> ErrorPolicy {
    ErrorPolicy::FailFast
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorPolicy {
    FailFast,
    Replace,
}

/// Hardware budgets enforced by the resource manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceLimits {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_mb: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spill_mb: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_workers: Option<usize>,
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            memory_mb: None,
            spill_mb: None,
            max_workers: None,
            temp_dir: default_temp_dir(),
        }
    }
}

fn default_temp_dir() -> PathBuf {
    PathBuf::from("artifacts/tmp")
}

/// Profile-specific sampling and writer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileSettings {
    pub description: String,
    pub block_size: u64,
    pub min_gap_lines: u64,
    pub max_parallel_files: usize,
    pub sample_values_cap: usize,
    #[serde(default = "default_writer_chunk_rows")]
    pub writer_chunk_rows: u64,
    #[serde(default = "default_header_nontext_ratio")]
    pub header_nontext_ratio: f64,
    #[serde(default)]
    pub resource_limits: ResourceLimits,
}

fn default_writer_chunk_rows() -> u64 {
    10_000
}

fn default_header_nontext_ratio() -> f64 {
    0.7
}

/// Resolved configuration for a single run.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub global: GlobalSettings,
    pub profile: ProfileSettings,
}

#[derive(Debug, Deserialize)]
struct ConfigDocument {
    version: u32,
    #[serde(default)]
    global: GlobalSettings,
    profiles: BTreeMap<String, ProfileSettings>,
}

pub fn builtin_profile(name: &str) -> Option<ProfileSettings> {
    match name {
        "low_memory" => Some(ProfileSettings {
            description: "Bounded-memory profile for constrained hosts".to_string(),
            block_size: 1_000,
            min_gap_lines: 10_000,
            max_parallel_files: 1,
            sample_values_cap: 24,
            writer_chunk_rows: 10_000,
            header_nontext_ratio: default_header_nontext_ratio(),
            resource_limits: ResourceLimits {
                memory_mb: Some(512),
                spill_mb: Some(2_048),
                max_workers: Some(2),
                temp_dir: default_temp_dir(),
            },
        }),
        "workstation" => Some(ProfileSettings {
            description: "Default workstation profile".to_string(),
            block_size: 10_000,
            min_gap_lines: 2_500,
            max_parallel_files: 4,
            sample_values_cap: 64,
            writer_chunk_rows: 50_000,
            header_nontext_ratio: default_header_nontext_ratio(),
            resource_limits: ResourceLimits {
                memory_mb: Some(4_096),
                spill_mb: Some(16_384),
                max_workers: Some(8),
                temp_dir: default_temp_dir(),
            },
        }),
        _ => None,
    }
}

/// Resolve a profile by name, consulting the optional config document first.
pub fn load_runtime_config(profile: &str, config_path: Option<&Path>) -> Result<RuntimeConfig> {
    if let Some(path) = config_path {
        let document = load_config_document(path)?;
        let settings = document.profiles.get(profile).cloned().ok_or_else(|| {
            PipelineError::config(format!(
                "Profile '{profile}' not found in {}",
                path.display()
            ))
        })?;
        validate_profile(profile, &settings)?;
        return Ok(RuntimeConfig {
            global: document.global,
            profile: settings,
        });
    }
    let settings = builtin_profile(profile).ok_or_else(|| {
        PipelineError::config(format!(
            "Unknown profile '{profile}'. Built-ins: low_memory, workstation"
        ))
    })?;
    Ok(RuntimeConfig {
        global: GlobalSettings::default(),
        profile: settings,
    })
}

fn load_config_document(path: &Path) -> Result<ConfigDocument> {
    let file = File::open(path)
        .map_err(|err| PipelineError::config(format!("Config file {path:?}: {err}")))?;
    let reader = BufReader::new(file);
    let document: ConfigDocument = serde_json::from_reader(reader)
        .map_err(|err| PipelineError::config(format!("Config file {path:?} is not valid: {err}")))?;
    if document.version == 0 {
        return Err(PipelineError::config(format!(
            "Config file {path:?} must declare a positive version"
        ))
        .into());
    }
    if document.profiles.is_empty() {
        return Err(
            PipelineError::config(format!("Config file {path:?} declares no profiles")).into(),
        );
    }
    for (name, profile) in &document.profiles {
        validate_profile(name, profile)?;
    }
    Ok(document)
}

fn validate_profile(name: &str, profile: &ProfileSettings) -> Result<()> {
    if profile.block_size == 0 {
        return Err(
            PipelineError::config(format!("profiles.{name}.block_size must be positive")).into(),
        );
    }
    if profile.min_gap_lines == 0 {
        return Err(PipelineError::config(format!(
            "profiles.{name}.min_gap_lines must be positive"
        ))
        .into());
    }
    if profile.max_parallel_files == 0 {
        return Err(PipelineError::config(format!(
            "profiles.{name}.max_parallel_files must be positive"
        ))
        .into());
    }
    if profile.sample_values_cap == 0 {
        return Err(PipelineError::config(format!(
            "profiles.{name}.sample_values_cap must be positive"
        ))
        .into());
    }
    if profile.writer_chunk_rows == 0 {
        return Err(PipelineError::config(format!(
            "profiles.{name}.writer_chunk_rows must be positive"
        ))
        .into());
    }
    if !(0.0..=1.0).contains(&profile.header_nontext_ratio) {
        return Err(PipelineError::config(format!(
            "profiles.{name}.header_nontext_ratio must be within [0, 1]"
        ))
        .into());
    }
    Ok(())
}

