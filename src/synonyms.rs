//! Synonym dictionary: an opaque canonical-name to variants mapping used to
//! pre-link header nodes before similarity scoring.

use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{Context, Result};

use crate::text::normalize_header;

#[derive(Debug, Clone, Default)]
pub struct SynonymDictionary {
    lookup: HashMap<String, String>,
}

impl SynonymDictionary {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load `{canonical: [variant, ...]}` from JSON. A missing file yields an
    /// empty dictionary so the feature stays optional.
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::empty());
        }
        let file = File::open(path).with_context(|| format!("Opening synonyms file {path:?}"))?;
        let reader = BufReader::new(file);
        let mapping: HashMap<String, Vec<String>> =
            serde_json::from_reader(reader).context("Parsing synonyms JSON")?;
        Ok(Self::from_mapping(&mapping))
    }

    pub fn from_mapping(mapping: &HashMap<String, Vec<String>>) -> Self {
        let mut lookup = HashMap::new();
        for (canonical, variants) in mapping {
            lookup.insert(normalize_header(canonical), canonical.clone());
            for variant in variants {
                lookup.insert(normalize_header(variant), canonical.clone());
            }
        }
        Self { lookup }
    }

    /// Canonical alias for a raw header, if the dictionary knows it.
    pub fn alias(&self, raw_name: &str) -> Option<&str> {
        self.lookup
            .get(&normalize_header(raw_name))
            .map(|canonical| canonical.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.lookup.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.lookup
            .iter()
            .map(|(variant, canonical)| (canonical.as_str(), variant.as_str()))
    }
}
