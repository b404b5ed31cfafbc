//! Canonical schema contracts: versioned registry plus the per-row validator
//! that feeds the materialization counters.

use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use serde::Deserialize;

use crate::models::{CanonicalColumnSpec, CanonicalSchema, CanonicalType, SchemaDefinition};
use crate::text::slugify;

/// In-memory registry of canonical contracts keyed by `(namespace, id)`.
#[derive(Debug, Clone, Default)]
pub struct CanonicalRegistry {
    schemas: HashMap<(String, String), CanonicalSchema>,
}

impl CanonicalRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load contracts from JSON: either `{"schemas": [...]}` or a bare list.
    /// A missing file yields an empty registry so contracts stay optional.
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::empty());
        }
        let file =
            File::open(path).with_context(|| format!("Opening canonical schemas {path:?}"))?;
        let reader = BufReader::new(file);

        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Document {
            Wrapped { schemas: Vec<CanonicalSchema> },
            Bare(Vec<CanonicalSchema>),
        }

        let document: Document =
            serde_json::from_reader(reader).context("Parsing canonical schema JSON")?;
        let schemas = match document {
            Document::Wrapped { schemas } => schemas,
            Document::Bare(schemas) => schemas,
        };
        let mut registry = Self::empty();
        for schema in schemas {
            registry.register(schema);
        }
        Ok(registry)
    }

    pub fn register(&mut self, schema: CanonicalSchema) {
        self.schemas
            .insert((schema.namespace.clone(), schema.id.clone()), schema);
    }

    pub fn get(&self, id: &str, namespace: Option<&str>) -> Option<&CanonicalSchema> {
        let namespace = namespace.unwrap_or("default");
        self.schemas.get(&(namespace.to_string(), id.to_string()))
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    /// Resolve the contract for a discovered schema: exact
    /// `(namespace, id)` first, then the schema name, then the id across all
    /// namespaces.
    pub fn resolve(&self, schema: &SchemaDefinition) -> Option<&CanonicalSchema> {
        let namespace = schema.canonical_namespace.as_deref();
        if let Some(id) = &schema.canonical_schema_id {
            if let Some(found) = self.get(id, namespace) {
                return Some(found);
            }
        }
        if let Some(found) = self.get(&schema.name, namespace) {
            return Some(found);
        }
        let wanted: Vec<&str> = schema
            .canonical_schema_id
            .iter()
            .map(|id| id.as_str())
            .chain(std::iter::once(schema.name.as_str()))
            .collect();
        self.schemas
            .values()
            .find(|candidate| wanted.contains(&candidate.id.as_str()))
    }
}

/// Per-row validator enforcing a canonical contract. For every canonical
/// column exactly one of ok / missing_required / type_mismatch is counted.
pub struct CanonicalValidator {
    bindings: Vec<(CanonicalColumnSpec, Option<usize>)>,
    pub missing_required: u64,
    pub type_mismatches: u64,
}

impl CanonicalValidator {
    pub fn new(schema: &SchemaDefinition, canonical: &CanonicalSchema) -> Self {
        let mut slug_to_index: HashMap<String, usize> = HashMap::new();
        for column in &schema.columns {
            let name = if column.normalized_name.is_empty() {
                &column.raw_name
            } else {
                &column.normalized_name
            };
            slug_to_index.entry(slugify(name)).or_insert(column.index);
        }
        let bindings = canonical
            .columns
            .iter()
            .map(|spec| {
                let index = slug_to_index.get(&slugify(&spec.name)).copied();
                (spec.clone(), index)
            })
            .collect();
        Self {
            bindings,
            missing_required: 0,
            type_mismatches: 0,
        }
    }

    /// Validate one canonical-ordered row, mutating it where the contract
    /// demands: values the declared type cannot parse are replaced by the
    /// null representation; enum and range violations keep the raw value.
    pub fn validate(&mut self, values: &mut [String]) {
        for (spec, index) in &self.bindings {
            let cell = index.and_then(|idx| values.get(idx));
            let value = cell.map(|value| value.trim().to_string()).unwrap_or_default();
            if value.is_empty() {
                if spec.required && !spec.allow_null {
                    self.missing_required += 1;
                }
                continue;
            }
            if let Some(allowed) = &spec.allowed_values {
                if !allowed.contains(value.as_str()) {
                    self.type_mismatches += 1;
                    continue;
                }
            }
            match check_value(spec, &value) {
                TypeCheck::Ok => {}
                TypeCheck::OutOfRange => self.type_mismatches += 1,
                TypeCheck::Unparseable => {
                    self.type_mismatches += 1;
                    if let Some(idx) = index {
                        if let Some(slot) = values.get_mut(*idx) {
                            slot.clear();
                        }
                    }
                }
            }
        }
    }
}

enum TypeCheck {
    Ok,
    OutOfRange,
    Unparseable,
}

fn check_value(spec: &CanonicalColumnSpec, value: &str) -> TypeCheck {
    match spec.data_type {
        CanonicalType::String => TypeCheck::Ok,
        CanonicalType::Int => match value.parse::<i64>() {
            Ok(parsed) => bounds_check(spec, parsed as f64),
            Err(_) => TypeCheck::Unparseable,
        },
        CanonicalType::Float | CanonicalType::Decimal => match value.parse::<f64>() {
            Ok(parsed) => bounds_check(spec, parsed),
            Err(_) => TypeCheck::Unparseable,
        },
        CanonicalType::Bool => {
            if matches!(
                value.to_ascii_lowercase().as_str(),
                "true" | "false" | "1" | "0" | "yes" | "no"
            ) {
                TypeCheck::Ok
            } else {
                TypeCheck::Unparseable
            }
        }
        CanonicalType::Date => {
            if parse_date(value) {
                TypeCheck::Ok
            } else {
                TypeCheck::Unparseable
            }
        }
        CanonicalType::Datetime => {
            if parse_datetime(value) {
                TypeCheck::Ok
            } else {
                TypeCheck::Unparseable
            }
        }
        CanonicalType::Json => {
            if serde_json::from_str::<serde_json::Value>(value).is_ok() {
                TypeCheck::Ok
            } else {
                TypeCheck::Unparseable
            }
        }
    }
}

fn bounds_check(spec: &CanonicalColumnSpec, numeric: f64) -> TypeCheck {
    if let Some(min) = spec.min_value {
        if numeric < min {
            return TypeCheck::OutOfRange;
        }
    }
    if let Some(max) = spec.max_value {
        if numeric > max {
            return TypeCheck::OutOfRange;
        }
    }
    TypeCheck::Ok
}

fn parse_date(value: &str) -> bool {
    const FORMATS: [&str; 5] = ["%Y-%m-%d", "%d.%m.%Y", "%d-%m-%Y", "%m/%d/%Y", "%Y/%m/%d"];
    FORMATS
        .iter()
        .any(|format| NaiveDate::parse_from_str(value, format).is_ok())
}

fn parse_datetime(value: &str) -> bool {
    const FORMATS: [&str; 4] = [
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
    ];
    FORMATS
        .iter()
        .any(|format| NaiveDateTime::parse_from_str(value, format).is_ok())
}
