//! Per-file column offset detection and row normalization.
//!
//! Offsets come from header clusters first; when a file's headers disagree
//! with every cluster, the fallback matches columns by profile distance over
//! the type histogram, the null ratio, and numeric range overlap.

use std::collections::HashMap;

use crate::models::{
    ColumnProfile, FileColumnProfile, HeaderCluster, MappingDocument, SchemaDefinition,
    SchemaMappingEntry, TypeHistogram,
};
use crate::text::slugify;

/// Aggregate the cluster-wide type histogram, then emit one mapping entry per
/// member. The canonical index for a cluster is the modal column index across
/// its members; members sitting elsewhere carry their offset.
pub fn detect_offsets(mapping: &MappingDocument) -> Vec<SchemaMappingEntry> {
    let profile_index = index_profiles(&mapping.column_profiles);
    let mut entries = Vec::new();
    for cluster in &mapping.header_clusters {
        let target_index = modal_index(cluster);
        let cluster_hist = cluster_histogram(cluster, &profile_index);
        for member in &cluster.members {
            let offset = member.column_index as i64 - target_index as i64;
            let profile = profile_index.get(&(member.file_path.as_str(), member.column_index));
            let confidence = match profile {
                Some(profile) => histogram_affinity(&profile.type_hist, &cluster_hist),
                None => cluster.confidence,
            };
            entries.push(SchemaMappingEntry {
                file_path: member.file_path.clone(),
                source_index: member.column_index,
                canonical_name: cluster.canonical_name.clone(),
                canonical_index: Some(target_index),
                confidence,
                offset: (offset != 0).then_some(offset),
                reason: (offset != 0).then(|| "auto-detected".to_string()),
            });
        }
    }
    entries.sort_by(|a, b| {
        a.file_path
            .cmp(&b.file_path)
            .then_with(|| a.source_index.cmp(&b.source_index))
    });
    entries
}

fn modal_index(cluster: &HeaderCluster) -> usize {
    let mut counts: HashMap<usize, usize> = HashMap::new();
    for member in &cluster.members {
        *counts.entry(member.column_index).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(&a.0)))
        .map(|(index, _)| index)
        .unwrap_or(0)
}

fn index_profiles(profiles: &[FileColumnProfile]) -> HashMap<(&str, usize), &ColumnProfile> {
    profiles
        .iter()
        .map(|entry| ((entry.file_path.as_str(), entry.column_index), &entry.profile))
        .collect()
}

fn cluster_histogram(
    cluster: &HeaderCluster,
    profiles: &HashMap<(&str, usize), &ColumnProfile>,
) -> TypeHistogram {
    let mut merged = TypeHistogram::default();
    for member in &cluster.members {
        if let Some(profile) = profiles.get(&(member.file_path.as_str(), member.column_index)) {
            merge_histogram(&mut merged, &profile.type_hist);
        }
    }
    merged
}

fn merge_histogram(target: &mut TypeHistogram, source: &TypeHistogram) {
    target.numeric += source.numeric;
    target.date += source.date;
    target.boolean += source.boolean;
    target.text += source.text;
    target.null += source.null;
}

fn null_ratio(profile: &TypeHistogram) -> f64 {
    let total = profile.total();
    if total == 0 {
        0.0
    } else {
        profile.null as f64 / total as f64
    }
}

fn histogram_affinity(observed: &TypeHistogram, reference: &TypeHistogram) -> f64 {
    let hist_similarity = 1.0 - observed.l1_distance(reference) / 2.0;
    let null_similarity = 1.0 - (null_ratio(observed) - null_ratio(reference)).abs();
    (0.7 * hist_similarity + 0.3 * null_similarity).clamp(0.0, 1.0)
}

fn range_overlap(a: (Option<f64>, Option<f64>), b: (Option<f64>, Option<f64>)) -> Option<f64> {
    let (a_min, a_max) = (a.0?, a.1?);
    let (b_min, b_max) = (b.0?, b.1?);
    let lo = a_min.max(b_min);
    let hi = a_max.min(b_max);
    let union = (a_max.max(b_max) - a_min.min(b_min)).max(f64::EPSILON);
    Some(((hi - lo).max(0.0) / union).clamp(0.0, 1.0))
}

/// Distance-derived affinity between a source column profile and the merged
/// reference profile of a canonical position.
fn profile_affinity(observed: &ColumnProfile, reference: &ReferenceProfile) -> f64 {
    let hist = histogram_affinity(&observed.type_hist, &reference.type_hist);
    match range_overlap(
        (observed.numeric_min, observed.numeric_max),
        (reference.numeric_min, reference.numeric_max),
    ) {
        Some(overlap) => 0.8 * hist + 0.2 * overlap,
        None => hist,
    }
}

#[derive(Debug, Clone, Default)]
struct ReferenceProfile {
    type_hist: TypeHistogram,
    numeric_min: Option<f64>,
    numeric_max: Option<f64>,
}

impl ReferenceProfile {
    fn absorb(&mut self, profile: &ColumnProfile) {
        merge_histogram(&mut self.type_hist, &profile.type_hist);
        if let Some(min) = profile.numeric_min {
            self.numeric_min = Some(match self.numeric_min {
                Some(current) => current.min(min),
                None => min,
            });
        }
        if let Some(max) = profile.numeric_max {
            self.numeric_max = Some(match self.numeric_max {
                Some(current) => current.max(max),
                None => max,
            });
        }
    }
}

/// A row reordered into canonical column order, retaining the raw width read
/// from the file so short/long validation can see the original shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedRow {
    pub values: Vec<String>,
    pub observed_length: usize,
}

#[derive(Debug, Clone)]
struct ResolvedMapping {
    source_index: usize,
    canonical_index: Option<usize>,
    canonical_name: String,
}

/// Reorders rows into canonical order using mapping entries, falling back to
/// profile matching when an entry carries no resolvable target.
pub struct RowNormalizer {
    files: HashMap<String, Vec<ResolvedMapping>>,
    profiles: HashMap<(String, usize), ColumnProfile>,
    references: HashMap<usize, ReferenceProfile>,
    slug_cache: HashMap<String, HashMap<String, usize>>,
}

impl RowNormalizer {
    pub fn new(entries: &[SchemaMappingEntry], profiles: &[FileColumnProfile]) -> Self {
        let mut files: HashMap<String, Vec<ResolvedMapping>> = HashMap::new();
        for entry in entries {
            files
                .entry(entry.file_path.clone())
                .or_default()
                .push(ResolvedMapping {
                    source_index: entry.source_index,
                    canonical_index: entry.canonical_index,
                    canonical_name: entry.canonical_name.clone(),
                });
        }
        for mappings in files.values_mut() {
            mappings.sort_by_key(|mapping| mapping.source_index);
        }

        let profile_map: HashMap<(String, usize), ColumnProfile> = profiles
            .iter()
            .map(|entry| {
                (
                    (entry.file_path.clone(), entry.column_index),
                    entry.profile.clone(),
                )
            })
            .collect();

        // Merge the profiles of every source feeding a canonical position so
        // the name-less fallback has something to compare against.
        let mut references: HashMap<usize, ReferenceProfile> = HashMap::new();
        for entry in entries {
            if let Some(target) = entry.canonical_index {
                if let Some(profile) =
                    profile_map.get(&(entry.file_path.clone(), entry.source_index))
                {
                    references.entry(target).or_default().absorb(profile);
                }
            }
        }

        Self {
            files,
            profiles: profile_map,
            references,
            slug_cache: HashMap::new(),
        }
    }

    pub fn normalize(
        &mut self,
        row: Vec<String>,
        schema: &SchemaDefinition,
        file_path: &str,
    ) -> NormalizedRow {
        let observed_length = row.len();
        let mappings = match self.files.get(file_path) {
            Some(mappings) => mappings.clone(),
            None => {
                return NormalizedRow {
                    values: row,
                    observed_length,
                }
            }
        };

        let mut resolved: Vec<(usize, usize)> = Vec::with_capacity(mappings.len());
        let mut max_target = 0usize;
        for mapping in &mappings {
            if let Some(target) = self.resolve_target(mapping, schema, file_path) {
                max_target = max_target.max(target);
                resolved.push((mapping.source_index, target));
            }
        }

        let width = schema.columns.len().max(max_target + 1).max(1);
        let mut values = vec![String::new(); width];
        let mut assigned = vec![false; width];
        let mut used_sources = vec![false; observed_length];
        for (source, target) in resolved {
            if let Some(value) = row.get(source) {
                values[target] = value.clone();
                assigned[target] = true;
                used_sources[source] = true;
            }
        }

        // Unmapped source columns fill the remaining canonical slots in file
        // order; whatever is left over is dropped and shows up as a long row
        // through the observed length.
        let mut leftovers = row
            .into_iter()
            .enumerate()
            .filter(|(idx, _)| !used_sources.get(*idx).copied().unwrap_or(true))
            .map(|(_, value)| value);
        for (slot, taken) in values.iter_mut().zip(assigned.into_iter()) {
            if !taken {
                if let Some(value) = leftovers.next() {
                    *slot = value;
                }
            }
        }

        NormalizedRow {
            values,
            observed_length,
        }
    }

    fn resolve_target(
        &mut self,
        mapping: &ResolvedMapping,
        schema: &SchemaDefinition,
        file_path: &str,
    ) -> Option<usize> {
        if let Some(target) = mapping.canonical_index {
            return Some(target);
        }
        let schema_key = schema.schema_id.to_string();
        let slug_map = self.slug_cache.entry(schema_key).or_insert_with(|| {
            let mut slug_map = HashMap::new();
            for column in &schema.columns {
                let name = if column.normalized_name.is_empty() {
                    &column.raw_name
                } else {
                    &column.normalized_name
                };
                slug_map.entry(slugify(name)).or_insert(column.index);
            }
            slug_map
        });
        if let Some(target) = slug_map.get(&slugify(&mapping.canonical_name)) {
            return Some(*target);
        }
        self.match_by_profile(mapping.source_index, schema, file_path)
    }

    /// Fallback when names disagree everywhere: among schema columns whose
    /// declared bucket matches the source's dominant type, choose the one
    /// whose merged reference profile sits closest to the observed profile.
    fn match_by_profile(
        &self,
        source_index: usize,
        schema: &SchemaDefinition,
        file_path: &str,
    ) -> Option<usize> {
        let profile = self.profiles.get(&(file_path.to_string(), source_index))?;
        let dominant = profile.type_hist.dominant()?;
        let mut best: Option<(usize, f64)> = None;
        for column in &schema.columns {
            if column.data_type.bucket() != dominant {
                continue;
            }
            let affinity = match self.references.get(&column.index) {
                Some(reference) => profile_affinity(profile, reference),
                None => 0.5,
            };
            match best {
                Some((_, current)) if current >= affinity => {}
                _ => best = Some((column.index, affinity)),
            }
        }
        best.map(|(index, _)| index)
    }
}
