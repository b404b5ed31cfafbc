//! Record types shared across the pipeline phases, the mapping artifact, and
//! the durable store. Every persisted entity is a concrete tagged type;
//! serialization is a mechanical serde projection.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const TOP_K_CAPACITY: usize = 16;
pub const HLL_REGISTERS: usize = 64;

/// Coarse per-value type buckets tracked by the profiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeBucket {
    Numeric,
    Date,
    Bool,
    Text,
    Null,
}

impl TypeBucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            TypeBucket::Numeric => "numeric",
            TypeBucket::Date => "date",
            TypeBucket::Bool => "bool",
            TypeBucket::Text => "text",
            TypeBucket::Null => "null",
        }
    }
}

/// Counts per type bucket for one column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TypeHistogram {
    pub numeric: u64,
    pub date: u64,
    #[serde(rename = "bool")]
    pub boolean: u64,
    pub text: u64,
    pub null: u64,
}

impl TypeHistogram {
    pub fn record(&mut self, bucket: TypeBucket) {
        match bucket {
            TypeBucket::Numeric => self.numeric += 1,
            TypeBucket::Date => self.date += 1,
            TypeBucket::Bool => self.boolean += 1,
            TypeBucket::Text => self.text += 1,
            TypeBucket::Null => self.null += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.numeric + self.date + self.boolean + self.text + self.null
    }

    pub fn non_null(&self) -> u64 {
        self.total() - self.null
    }

    /// Dominant non-null bucket, if any value was observed.
    pub fn dominant(&self) -> Option<TypeBucket> {
        let pairs = [
            (TypeBucket::Numeric, self.numeric),
            (TypeBucket::Date, self.date),
            (TypeBucket::Bool, self.boolean),
            (TypeBucket::Text, self.text),
        ];
        pairs
            .iter()
            .filter(|(_, count)| *count > 0)
            .max_by_key(|(_, count)| *count)
            .map(|(bucket, _)| *bucket)
    }

    pub fn ratio(&self, bucket: TypeBucket) -> f64 {
        let total = self.non_null();
        if total == 0 {
            return 0.0;
        }
        let count = match bucket {
            TypeBucket::Numeric => self.numeric,
            TypeBucket::Date => self.date,
            TypeBucket::Bool => self.boolean,
            TypeBucket::Text => self.text,
            TypeBucket::Null => self.null,
        };
        count as f64 / total as f64
    }

    /// L1 distance between bucket distributions, in `[0, 2]`.
    pub fn l1_distance(&self, other: &TypeHistogram) -> f64 {
        let buckets = [
            TypeBucket::Numeric,
            TypeBucket::Date,
            TypeBucket::Bool,
            TypeBucket::Text,
        ];
        buckets
            .iter()
            .map(|bucket| (self.ratio(*bucket) - other.ratio(*bucket)).abs())
            .sum()
    }
}

/// Streaming per-column statistics gathered within the sampling budget.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub nulls: u64,
    pub non_nulls: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hll_registers: Vec<u8>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub top_k: Vec<TopValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub numeric_min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub numeric_max: Option<f64>,
    pub type_hist: TypeHistogram,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sample_values: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopValue {
    pub value: String,
    pub count: u64,
}

/// Whole-file column profile keyed by `(file, column_index)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileColumnProfile {
    pub file_path: String,
    pub column_index: usize,
    pub profile: ColumnProfile,
}

/// Signature inferred from one sampled block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaSignature {
    pub delimiter: char,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header_sample: Option<Vec<String>>,
    pub column_count: usize,
    pub column_types: Vec<TypeBucket>,
    pub short_rows: u64,
    pub long_rows: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl Default for SchemaSignature {
    fn default() -> Self {
        Self {
            delimiter: ',',
            header_sample: None,
            column_count: 0,
            column_types: Vec::new(),
            short_rows: 0,
            long_rows: 0,
            warnings: Vec::new(),
        }
    }
}

/// Contiguous sampled line range of one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileBlock {
    pub file_path: PathBuf,
    pub block_id: usize,
    pub start_line: u64,
    pub end_line: u64,
    pub byte_start: u64,
    pub byte_end: u64,
    pub signature: SchemaSignature,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub column_profiles: Vec<ColumnProfile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_id: Option<Uuid>,
}

impl FileBlock {
    pub fn row_span(&self) -> u64 {
        if self.end_line < self.start_line {
            0
        } else {
            self.end_line - self.start_line + 1
        }
    }
}

/// Canonical data types used by contracts and schema columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CanonicalType {
    String,
    Int,
    Float,
    Decimal,
    Bool,
    Date,
    Datetime,
    Json,
}

impl CanonicalType {
    pub fn bucket(&self) -> TypeBucket {
        match self {
            CanonicalType::Int | CanonicalType::Float | CanonicalType::Decimal => {
                TypeBucket::Numeric
            }
            CanonicalType::Date | CanonicalType::Datetime => TypeBucket::Date,
            CanonicalType::Bool => TypeBucket::Bool,
            CanonicalType::String | CanonicalType::Json => TypeBucket::Text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaColumn {
    pub index: usize,
    pub raw_name: String,
    pub normalized_name: String,
    pub data_type: CanonicalType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub known_variants: Vec<String>,
}

/// Schema derived from clustered block signatures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaDefinition {
    pub schema_id: Uuid,
    pub name: String,
    pub columns: Vec<SchemaColumn>,
    pub blocks_by_file: BTreeMap<String, Vec<usize>>,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canonical_schema_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canonical_namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canonical_schema_version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterMember {
    pub file_path: String,
    pub column_index: usize,
    pub raw_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    LowConfidence,
    TypeProfileDisagreement,
}

/// Cluster of headers judged to denote the same logical field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeaderCluster {
    pub cluster_id: Uuid,
    pub canonical_name: String,
    pub members: Vec<ClusterMember>,
    pub confidence: f64,
    pub needs_review: bool,
    pub version: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reason_codes: Vec<ReasonCode>,
}

/// Versioned header-cluster document persisted by the review phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterDocument {
    pub artifact_version: u64,
    pub clusters: Vec<HeaderCluster>,
}

/// One source-column to canonical-column assignment for a file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaMappingEntry {
    pub file_path: String,
    pub source_index: usize,
    pub canonical_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canonical_index: Option<usize>,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Column contract inside a canonical schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalColumnSpec {
    pub name: String,
    pub data_type: CanonicalType,
    #[serde(default = "default_true")]
    pub required: bool,
    #[serde(default)]
    pub allow_null: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_values: Option<BTreeSet<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_value: Option<f64>,
}

fn default_true() -> bool {
    true
}

/// External contract of column names, types, and constraints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalSchema {
    #[serde(default = "default_namespace")]
    pub namespace: String,
    pub id: String,
    #[serde(default = "default_version")]
    pub version: String,
    pub columns: Vec<CanonicalColumnSpec>,
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_version() -> String {
    "1.0.0".to_string()
}

/// The mapping artifact tying blocks, schemas, clusters, and profiles together.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MappingDocument {
    pub artifact_version: u64,
    pub schemas: Vec<SchemaDefinition>,
    pub blocks: Vec<FileBlock>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub header_clusters: Vec<HeaderCluster>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub schema_mapping: Vec<SchemaMappingEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub column_profiles: Vec<FileColumnProfile>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub file_headers: BTreeMap<String, Vec<String>>,
}

/// Progress payload emitted during long phases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileProgress {
    pub job_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_id: Option<String>,
    pub file: String,
    pub phase: String,
    pub processed_rows: u64,
    pub total_rows: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta_s: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows_per_sec: Option<f64>,
    pub spill_rows: u64,
}

/// Row-level validation counters accumulated during materialization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationSummary {
    pub total_rows: u64,
    pub short_rows: u64,
    pub long_rows: u64,
    pub empty_rows: u64,
    pub missing_required: u64,
    pub type_mismatches: u64,
}

/// Spill/back-pressure telemetry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpillMetrics {
    pub spills: u64,
    pub rows_spilled: u64,
    pub bytes_spilled: u64,
    pub max_buffer_rows: u64,
}

/// Per-schema materialization metrics persisted to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobMetrics {
    pub job_id: String,
    pub schema_id: String,
    pub schema_name: String,
    pub rows: u64,
    pub rows_per_sec: f64,
    pub duration_ms: u64,
    pub validation: ValidationSummary,
    pub spill: SpillMetrics,
}

/// Lifecycle states for pipeline jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Pending,
    Analyzing,
    Mapping,
    Materializing,
    Validating,
    Done,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "PENDING",
            JobState::Analyzing => "ANALYZING",
            JobState::Mapping => "MAPPING",
            JobState::Materializing => "MATERIALIZING",
            JobState::Validating => "VALIDATING",
            JobState::Done => "DONE",
            JobState::Failed => "FAILED",
            JobState::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Done | JobState::Failed | JobState::Cancelled)
    }

    pub fn rank(&self) -> i32 {
        match self {
            JobState::Pending => 0,
            JobState::Analyzing => 1,
            JobState::Mapping => 2,
            JobState::Materializing => 3,
            JobState::Validating => 4,
            JobState::Done => 5,
            JobState::Failed | JobState::Cancelled => -1,
        }
    }
}

/// Current status snapshot for a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusRecord {
    pub job_id: String,
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    pub created_at: f64,
    pub updated_at: f64,
}

/// Append-only state transition record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEventRecord {
    pub job_id: String,
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub created_at: f64,
}

/// Stored progress tick, retained per schema with a hard cap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobProgressEvent {
    pub job_id: String,
    pub schema_id: String,
    pub file_path: String,
    pub processed_rows: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows_per_sec: Option<f64>,
    pub spill_rows: u64,
    pub emitted_at: f64,
}
