//! Graph-based header clustering.
//!
//! Nodes are `(file_path, column_index)` pairs carrying a normalized header.
//! An edge joins two nodes when the combined similarity score clears
//! [`EDGE_THRESHOLD`] and their type profiles are compatible. Connected
//! components, assembled with union-find over trigram-blocked candidate
//! pairs, become clusters; the full n-squared edge set is never materialized.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use itertools::Itertools;
use uuid::Uuid;

use crate::models::{
    ClusterDocument, ClusterMember, FileColumnProfile, HeaderCluster, MappingDocument, ReasonCode,
    TypeBucket,
};
use crate::synonyms::SynonymDictionary;
use crate::text::{jaccard, normalize_header, token_overlap, trigrams};

pub const EDGE_THRESHOLD: f64 = 0.55;
pub const REVIEW_CONFIDENCE_THRESHOLD: f64 = 0.75;
pub const TYPE_DISAGREEMENT_THRESHOLD: f64 = 0.15;

#[derive(Debug, Clone)]
struct HeaderNode {
    file_path: String,
    column_index: usize,
    raw_name: String,
    normalized: String,
    alias: Option<String>,
    grams: BTreeSet<String>,
    dominant: Option<TypeBucket>,
}

fn type_compatible(a: &HeaderNode, b: &HeaderNode) -> bool {
    match (a.dominant, b.dominant) {
        (Some(left), Some(right)) => left == right,
        _ => true,
    }
}

/// Similarity score:
/// `0.5 * levenshtein_ratio + 0.3 * trigram_jaccard + 0.2 * token_overlap`.
fn score(a: &HeaderNode, b: &HeaderNode) -> f64 {
    if a.normalized.is_empty() || b.normalized.is_empty() {
        return 0.0;
    }
    let levenshtein = strsim::normalized_levenshtein(&a.normalized, &b.normalized);
    let ngram = jaccard(&a.grams, &b.grams);
    let tokens = token_overlap(&a.normalized, &b.normalized);
    0.5 * levenshtein + 0.3 * ngram + 0.2 * tokens
}

struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(size: usize) -> Self {
        Self {
            parent: (0..size).collect(),
        }
    }

    fn find(&mut self, node: usize) -> usize {
        let mut root = node;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut cursor = node;
        while self.parent[cursor] != root {
            let next = self.parent[cursor];
            self.parent[cursor] = root;
            cursor = next;
        }
        root
    }

    fn union(&mut self, a: usize, b: usize) {
        let root_a = self.find(a);
        let root_b = self.find(b);
        if root_a != root_b {
            self.parent[root_b] = root_a;
        }
    }
}

fn collect_nodes(
    mapping: &MappingDocument,
    synonyms: &SynonymDictionary,
) -> Vec<HeaderNode> {
    let mut profile_index: HashMap<(&str, usize), &FileColumnProfile> = HashMap::new();
    for profile in &mapping.column_profiles {
        profile_index.insert((profile.file_path.as_str(), profile.column_index), profile);
    }

    let mut headers_by_file: BTreeMap<String, Vec<String>> = mapping.file_headers.clone();
    if headers_by_file.is_empty() {
        for block in &mapping.blocks {
            if let Some(sample) = &block.signature.header_sample {
                headers_by_file
                    .entry(block.file_path.display().to_string())
                    .or_insert_with(|| sample.clone());
            }
        }
    }

    let mut nodes = Vec::new();
    for (file_path, headers) in &headers_by_file {
        for (column_index, raw_name) in headers.iter().enumerate() {
            let raw_name = if raw_name.trim().is_empty() {
                format!("column_{}", column_index + 1)
            } else {
                raw_name.trim().to_string()
            };
            let normalized = normalize_header(&raw_name);
            let dominant = profile_index
                .get(&(file_path.as_str(), column_index))
                .and_then(|profile| profile.profile.type_hist.dominant());
            nodes.push(HeaderNode {
                file_path: file_path.clone(),
                column_index,
                alias: synonyms.alias(&raw_name).map(|alias| alias.to_string()),
                grams: trigrams(&normalized),
                normalized,
                raw_name,
                dominant,
            });
        }
    }
    nodes
}

/// Candidate pairs: nodes sharing at least one trigram, plus nodes sharing a
/// synonym alias. This blocking keeps edge evaluation near-linear for real
/// header populations.
fn candidate_pairs(nodes: &[HeaderNode]) -> BTreeSet<(usize, usize)> {
    let mut by_gram: HashMap<&str, Vec<usize>> = HashMap::new();
    for (idx, node) in nodes.iter().enumerate() {
        for gram in &node.grams {
            by_gram.entry(gram.as_str()).or_default().push(idx);
        }
    }
    let mut by_alias: HashMap<&str, Vec<usize>> = HashMap::new();
    for (idx, node) in nodes.iter().enumerate() {
        if let Some(alias) = &node.alias {
            by_alias.entry(alias.as_str()).or_default().push(idx);
        }
    }

    let mut pairs = BTreeSet::new();
    for bucket in by_gram.values().chain(by_alias.values()) {
        for (left, right) in bucket.iter().tuple_combinations() {
            let (a, b) = if left < right {
                (*left, *right)
            } else {
                (*right, *left)
            };
            pairs.insert((a, b));
        }
    }
    pairs
}

/// Build the versioned cluster document for a mapping. When `previous` is
/// given, unchanged clusters keep their id and version; changed clusters bump
/// their version, and the artifact version always increments.
pub fn build_clusters(
    mapping: &MappingDocument,
    synonyms: &SynonymDictionary,
    previous: Option<&ClusterDocument>,
) -> ClusterDocument {
    let nodes = collect_nodes(mapping, synonyms);
    let mut union_find = UnionFind::new(nodes.len());
    let mut edges: Vec<(usize, usize, f64)> = Vec::new();

    for (left, right) in candidate_pairs(&nodes) {
        let a = &nodes[left];
        let b = &nodes[right];
        let same_alias = match (&a.alias, &b.alias) {
            (Some(left_alias), Some(right_alias)) => left_alias == right_alias,
            _ => false,
        };
        if same_alias {
            union_find.union(left, right);
            edges.push((left, right, 1.0));
            continue;
        }
        if !type_compatible(a, b) {
            continue;
        }
        let weight = score(a, b);
        if weight >= EDGE_THRESHOLD {
            union_find.union(left, right);
            edges.push((left, right, weight));
        }
    }

    let mut components: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for idx in 0..nodes.len() {
        components.entry(union_find.find(idx)).or_default().push(idx);
    }
    let mut edge_lookup: HashMap<usize, Vec<(usize, usize, f64)>> = HashMap::new();
    for (left, right, weight) in edges {
        let root = union_find.find(left);
        edge_lookup.entry(root).or_default().push((left, right, weight));
    }

    let mut clusters = Vec::new();
    for (root, member_ids) in components {
        let cluster_edges = edge_lookup.remove(&root).unwrap_or_default();
        clusters.push(build_cluster(&nodes, &member_ids, &cluster_edges));
    }
    clusters.sort_by(|a, b| a.canonical_name.cmp(&b.canonical_name));

    apply_versions(clusters, previous)
}

fn build_cluster(
    nodes: &[HeaderNode],
    member_ids: &[usize],
    edges: &[(usize, usize, f64)],
) -> HeaderCluster {
    let mut centrality: HashMap<usize, f64> = HashMap::new();
    for (left, right, weight) in edges {
        *centrality.entry(*left).or_insert(0.0) += weight;
        *centrality.entry(*right).or_insert(0.0) += weight;
    }

    // Canonical member: maximum weighted centrality, lexicographic tie-break.
    let canonical = member_ids
        .iter()
        .max_by(|a, b| {
            let score_a = centrality.get(*a).copied().unwrap_or(0.0);
            let score_b = centrality.get(*b).copied().unwrap_or(0.0);
            score_a
                .partial_cmp(&score_b)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| nodes[**b].raw_name.cmp(&nodes[**a].raw_name))
        })
        .copied()
        .unwrap_or(member_ids[0]);

    let confidence = if edges.is_empty() {
        1.0
    } else {
        edges.iter().map(|(_, _, weight)| weight).sum::<f64>() / edges.len() as f64
    };

    let mut dominant_counts: HashMap<TypeBucket, usize> = HashMap::new();
    let mut typed_members = 0usize;
    for member in member_ids {
        if let Some(bucket) = nodes[*member].dominant {
            *dominant_counts.entry(bucket).or_insert(0) += 1;
            typed_members += 1;
        }
    }
    let type_disagreement = if typed_members == 0 {
        0.0
    } else {
        let modal = dominant_counts.values().copied().max().unwrap_or(0);
        1.0 - modal as f64 / typed_members as f64
    };

    let mut reason_codes = Vec::new();
    if confidence < REVIEW_CONFIDENCE_THRESHOLD {
        reason_codes.push(ReasonCode::LowConfidence);
    }
    if type_disagreement >= TYPE_DISAGREEMENT_THRESHOLD {
        reason_codes.push(ReasonCode::TypeProfileDisagreement);
    }

    let mut members: Vec<ClusterMember> = member_ids
        .iter()
        .map(|idx| ClusterMember {
            file_path: nodes[*idx].file_path.clone(),
            column_index: nodes[*idx].column_index,
            raw_name: nodes[*idx].raw_name.clone(),
        })
        .collect();
    members.sort_by(|a, b| {
        a.file_path
            .cmp(&b.file_path)
            .then_with(|| a.column_index.cmp(&b.column_index))
    });

    HeaderCluster {
        cluster_id: Uuid::new_v4(),
        canonical_name: nodes[canonical].raw_name.clone(),
        members,
        confidence,
        needs_review: !reason_codes.is_empty(),
        version: 1,
        reason_codes,
    }
}

fn member_key(cluster: &HeaderCluster) -> BTreeSet<(String, usize)> {
    cluster
        .members
        .iter()
        .map(|member| (member.file_path.clone(), member.column_index))
        .collect()
}

fn apply_versions(
    mut clusters: Vec<HeaderCluster>,
    previous: Option<&ClusterDocument>,
) -> ClusterDocument {
    let artifact_version = previous.map(|doc| doc.artifact_version + 1).unwrap_or(1);
    if let Some(previous) = previous {
        let prior: Vec<(BTreeSet<(String, usize)>, &HeaderCluster)> = previous
            .clusters
            .iter()
            .map(|cluster| (member_key(cluster), cluster))
            .collect();
        for cluster in &mut clusters {
            let key = member_key(cluster);
            let matched = prior
                .iter()
                .max_by_key(|(prior_key, _)| prior_key.intersection(&key).count())
                .filter(|(prior_key, _)| prior_key.intersection(&key).count() > 0);
            if let Some((prior_key, prior_cluster)) = matched {
                cluster.cluster_id = prior_cluster.cluster_id;
                let unchanged = *prior_key == key
                    && prior_cluster.canonical_name == cluster.canonical_name;
                cluster.version = if unchanged {
                    prior_cluster.version
                } else {
                    prior_cluster.version + 1
                };
            }
        }
    }
    ClusterDocument {
        artifact_version,
        clusters,
    }
}
