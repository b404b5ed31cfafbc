//! Header text normalization shared by clustering and schema naming.

use std::collections::BTreeSet;

/// Cyrillic-to-Latin folding for headers that mix scripts. Homoglyphs such as
/// `с`/`c` and `о`/`o` must land on the same normalized form.
const CYRILLIC_LATIN: &[(char, &str)] = &[
    ('а', "a"),
    ('б', "b"),
    ('в', "v"),
    ('г', "g"),
    ('ґ', "g"),
    ('д', "d"),
    ('е', "e"),
    ('ё', "e"),
    ('є', "ye"),
    ('ж', "zh"),
    ('з', "z"),
    ('и', "i"),
    ('і', "i"),
    ('ї', "yi"),
    ('й', "i"),
    ('к', "k"),
    ('л', "l"),
    ('м', "m"),
    ('н', "n"),
    ('о', "o"),
    ('п', "p"),
    ('р', "r"),
    ('с', "s"),
    ('т', "t"),
    ('у', "u"),
    ('ф', "f"),
    ('х', "h"),
    ('ц', "ts"),
    ('ч', "ch"),
    ('ш', "sh"),
    ('щ', "shch"),
    ('ъ', ""),
    ('ы', "y"),
    ('ь', ""),
    ('э', "e"),
    ('ю', "yu"),
    ('я', "ya"),
];

fn fold_char(ch: char, out: &mut String) {
    for (cyr, latin) in CYRILLIC_LATIN {
        if *cyr == ch {
            out.push_str(latin);
            return;
        }
    }
    out.push(ch);
}

/// Lowercase, fold Cyrillic homoglyphs, replace punctuation with spaces, and
/// collapse whitespace runs.
pub fn normalize_header(raw: &str) -> String {
    let mut folded = String::with_capacity(raw.len());
    for ch in raw.trim().chars() {
        for lower in ch.to_lowercase() {
            fold_char(lower, &mut folded);
        }
    }
    let cleaned: String = folded
        .chars()
        .map(|ch| if ch.is_alphanumeric() { ch } else { ' ' })
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Filesystem/SQL-safe identifier derived from an arbitrary name.
pub fn slugify(value: &str) -> String {
    let mut slug = String::with_capacity(value.len());
    let mut last_was_sep = true;
    for ch in value.trim().chars() {
        if ch.is_alphanumeric() {
            for lower in ch.to_lowercase() {
                slug.push(lower);
            }
            last_was_sep = false;
        } else if !last_was_sep {
            slug.push('_');
            last_was_sep = true;
        }
    }
    while slug.ends_with('_') {
        slug.pop();
    }
    if slug.is_empty() {
        "dataset".to_string()
    } else {
        slug
    }
}

/// Character trigrams of the whitespace-stripped normalized form.
pub fn trigrams(normalized: &str) -> BTreeSet<String> {
    let compact: Vec<char> = normalized.chars().filter(|ch| !ch.is_whitespace()).collect();
    let mut grams = BTreeSet::new();
    if compact.len() < 3 {
        if !compact.is_empty() {
            grams.insert(compact.iter().collect());
        }
        return grams;
    }
    for window in compact.windows(3) {
        grams.insert(window.iter().collect());
    }
    grams
}

pub fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

pub fn token_overlap(a: &str, b: &str) -> f64 {
    let left: BTreeSet<&str> = a.split_whitespace().collect();
    let right: BTreeSet<&str> = b.split_whitespace().collect();
    if left.is_empty() && right.is_empty() {
        return 1.0;
    }
    let shorter = left.len().min(right.len());
    if shorter == 0 {
        return 0.0;
    }
    let shared = left.intersection(&right).count();
    shared as f64 / shorter as f64
}
