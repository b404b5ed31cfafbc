//! Phase 2 preparation: synonym-driven column renaming, canonical contract
//! binding, and schema mapping assembly.

use anyhow::Result;
use log::info;

use crate::canonical::CanonicalRegistry;
use crate::cluster::build_clusters;
use crate::mapping;
use crate::models::MappingDocument;
use crate::offsets::detect_offsets;
use crate::synonyms::SynonymDictionary;
use crate::text::slugify;

/// Normalize a mapping in place: apply the synonym dictionary to column
/// names, bind canonical contracts, and (re)compute the per-file schema
/// mapping from header clusters. Returns the number of schemas bound to a
/// canonical contract.
pub fn apply(
    document: &mut MappingDocument,
    synonyms: &SynonymDictionary,
    registry: &CanonicalRegistry,
) -> Result<usize> {
    for schema in &mut document.schemas {
        for column in &mut schema.columns {
            let raw = column.raw_name.clone();
            let normalized = match synonyms.alias(&raw) {
                Some(canonical) => slugify(canonical),
                None => slugify(&raw),
            };
            if !raw.is_empty() && !column.known_variants.contains(&raw) {
                column.known_variants.push(raw);
            }
            if !column.known_variants.contains(&normalized) {
                column.known_variants.push(normalized.clone());
            }
            column.normalized_name = normalized;
        }
    }

    let mut bound = 0usize;
    for schema in &mut document.schemas {
        let Some(contract) = registry.resolve(schema) else {
            continue;
        };
        schema.canonical_schema_id = Some(contract.id.clone());
        schema.canonical_namespace = Some(contract.namespace.clone());
        schema.canonical_schema_version = Some(contract.version.clone());
        for spec in &contract.columns {
            let slug = slugify(&spec.name);
            if let Some(column) = schema
                .columns
                .iter_mut()
                .find(|column| slugify(&column.normalized_name) == slug)
            {
                column.data_type = spec.data_type;
            }
        }
        bound += 1;
    }

    if document.header_clusters.is_empty() {
        let clusters = build_clusters(document, synonyms, None);
        document.header_clusters = clusters.clusters;
    }
    document.schema_mapping = detect_offsets(document);
    let next_version = mapping::next_artifact_version(document);
    document.artifact_version = next_version;

    info!(
        "Normalized {} schema(s); {} bound to canonical contracts, {} mapping entr(ies)",
        document.schemas.len(),
        bound,
        document.schema_mapping.len()
    );
    Ok(bound)
}
