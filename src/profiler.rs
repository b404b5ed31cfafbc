//! Per-block signature detection and streaming column profiling.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::OnceLock;

use anyhow::{Context, Result};
use encoding_rs::Encoding;
use regex::Regex;

use crate::io_utils;
use crate::models::{
    ColumnProfile, SchemaSignature, TopValue, TypeBucket, HLL_REGISTERS, TOP_K_CAPACITY,
};

pub const DELIMITER_CANDIDATES: [char; 4] = [',', ';', '\t', '|'];
pub const SIGNATURE_SAMPLE_LINES: usize = 100;
pub const MIXED_DELIMITER_WARNING: &str = "MixedDelimiter";

fn date_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\d{1,4}[./-]\d{1,2}[./-]\d{1,4}").unwrap())
}

fn int_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[+-]?\d+$").unwrap())
}

fn float_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[+-]?(?:\d+[.,]\d*|\d*[.,]\d+)(?:[eE][+-]?\d+)?$").unwrap())
}

/// Classify a cell into a coarse type bucket.
pub fn classify_value(value: &str) -> TypeBucket {
    let cleaned = value.trim();
    if cleaned.is_empty() {
        return TypeBucket::Null;
    }
    if date_pattern().is_match(cleaned) {
        return TypeBucket::Date;
    }
    if int_pattern().is_match(cleaned) || float_pattern().is_match(cleaned) {
        return TypeBucket::Numeric;
    }
    if matches!(
        cleaned.to_ascii_lowercase().as_str(),
        "true" | "false" | "yes" | "no" | "t" | "f" | "y" | "n"
    ) {
        return TypeBucket::Bool;
    }
    TypeBucket::Text
}

pub fn parse_numeric(value: &str) -> Option<f64> {
    let normalized = value.trim().replace(' ', "").replace(',', ".");
    normalized.parse::<f64>().ok()
}

/// Small-register HyperLogLog for approximate distinct counts. 64 registers
/// keep the sketch at 64 bytes per column while holding estimate error within
/// a few percent for streams past ten thousand values.
#[derive(Debug, Clone)]
pub struct HllLite {
    registers: [u8; HLL_REGISTERS],
}

impl Default for HllLite {
    fn default() -> Self {
        Self {
            registers: [0; HLL_REGISTERS],
        }
    }
}

impl HllLite {
    const PRECISION: u32 = 6;

    pub fn from_registers(raw: &[u8]) -> Self {
        let mut registers = [0u8; HLL_REGISTERS];
        for (slot, value) in registers.iter_mut().zip(raw.iter()) {
            *slot = *value;
        }
        Self { registers }
    }

    pub fn registers(&self) -> Vec<u8> {
        self.registers.to_vec()
    }

    pub fn add(&mut self, value: &str) {
        if value.is_empty() {
            return;
        }
        let mut hasher = DefaultHasher::new();
        value.hash(&mut hasher);
        let hashed = hasher.finish();
        let index = (hashed & (HLL_REGISTERS as u64 - 1)) as usize;
        let remainder = hashed >> Self::PRECISION;
        let rank = rho(remainder, 64 - Self::PRECISION);
        if rank > self.registers[index] {
            self.registers[index] = rank;
        }
    }

    pub fn merge(&mut self, other: &HllLite) {
        for (register, incoming) in self.registers.iter_mut().zip(other.registers.iter()) {
            if incoming > register {
                *register = *incoming;
            }
        }
    }

    pub fn estimate(&self) -> u64 {
        let m = HLL_REGISTERS as f64;
        let alpha = 0.7213 / (1.0 + 1.079 / m);
        let indicator: f64 = self
            .registers
            .iter()
            .map(|register| 2f64.powi(-(*register as i32)))
            .sum();
        if indicator == 0.0 {
            return 0;
        }
        let raw = alpha * m * m / indicator;
        let zero_registers = self.registers.iter().filter(|register| **register == 0).count();
        if zero_registers > 0 && raw < 2.5 * m {
            return (m * (m / zero_registers as f64).ln()).round() as u64;
        }
        raw.round() as u64
    }
}

fn rho(value: u64, bits: u32) -> u8 {
    if value == 0 {
        return (bits + 1) as u8;
    }
    let mut leading = 1u8;
    let mut probe = bits;
    while probe > 0 {
        probe -= 1;
        if (value >> probe) & 1 == 1 {
            break;
        }
        leading += 1;
    }
    leading
}

/// Count-min sketch backing the top-k heavy-hitter estimate.
#[derive(Debug, Clone)]
struct CountMin {
    rows: [[u32; Self::WIDTH]; Self::DEPTH],
}

impl CountMin {
    const WIDTH: usize = 128;
    const DEPTH: usize = 4;

    fn new() -> Self {
        Self {
            rows: [[0; Self::WIDTH]; Self::DEPTH],
        }
    }

    fn update(&mut self, value: &str) -> u32 {
        let mut estimate = u32::MAX;
        for (seed, row) in self.rows.iter_mut().enumerate() {
            let mut hasher = DefaultHasher::new();
            seed.hash(&mut hasher);
            value.hash(&mut hasher);
            let slot = (hasher.finish() % Self::WIDTH as u64) as usize;
            row[slot] = row[slot].saturating_add(1);
            estimate = estimate.min(row[slot]);
        }
        estimate
    }
}

/// Streaming accumulator for one column's statistics.
#[derive(Debug, Clone)]
pub struct ColumnAccumulator {
    pub name: Option<String>,
    profile: ColumnProfile,
    hll: HllLite,
    count_min: CountMin,
    top: BTreeMap<String, u64>,
    sample_cap: usize,
    samples: BTreeSet<String>,
}

impl ColumnAccumulator {
    pub fn new(name: Option<String>, sample_cap: usize) -> Self {
        Self {
            name,
            profile: ColumnProfile::default(),
            hll: HllLite::default(),
            count_min: CountMin::new(),
            top: BTreeMap::new(),
            sample_cap,
            samples: BTreeSet::new(),
        }
    }

    pub fn observe(&mut self, raw: &str) {
        let value = raw.trim();
        let bucket = classify_value(value);
        self.profile.type_hist.record(bucket);
        if bucket == TypeBucket::Null {
            self.profile.nulls += 1;
            return;
        }
        self.profile.non_nulls += 1;
        self.hll.add(value);
        self.observe_top(value);
        if self.samples.len() < self.sample_cap {
            self.samples.insert(value.to_string());
        }
        match &mut self.profile.min {
            Some(current) if value >= current.as_str() => {}
            slot => *slot = Some(value.to_string()),
        }
        match &mut self.profile.max {
            Some(current) if value <= current.as_str() => {}
            slot => *slot = Some(value.to_string()),
        }
        if bucket == TypeBucket::Numeric {
            if let Some(numeric) = parse_numeric(value) {
                self.profile.numeric_min = Some(match self.profile.numeric_min {
                    Some(current) => current.min(numeric),
                    None => numeric,
                });
                self.profile.numeric_max = Some(match self.profile.numeric_max {
                    Some(current) => current.max(numeric),
                    None => numeric,
                });
            }
        }
    }

    fn observe_top(&mut self, value: &str) {
        let estimate = self.count_min.update(value) as u64;
        if let Some(count) = self.top.get_mut(value) {
            *count += 1;
            return;
        }
        if self.top.len() < TOP_K_CAPACITY {
            self.top.insert(value.to_string(), estimate.max(1));
            return;
        }
        let weakest = self
            .top
            .iter()
            .min_by_key(|(_, count)| **count)
            .map(|(key, count)| (key.clone(), *count));
        if let Some((key, count)) = weakest {
            if estimate > count {
                self.top.remove(&key);
                self.top.insert(value.to_string(), estimate);
            }
        }
    }

    pub fn dominant(&self) -> Option<TypeBucket> {
        self.profile.type_hist.dominant()
    }

    pub fn finish(mut self) -> ColumnProfile {
        self.profile.name = self.name;
        self.profile.hll_registers = self.hll.registers();
        let mut top: Vec<TopValue> = self
            .top
            .into_iter()
            .map(|(value, count)| TopValue { value, count })
            .collect();
        top.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.value.cmp(&b.value)));
        self.profile.top_k = top;
        self.profile.sample_values = self.samples.into_iter().collect();
        self.profile
    }

    pub fn unique_estimate(&self) -> u64 {
        self.hll.estimate()
    }
}

/// Split one line on `delimiter`, honoring double-quoted fields.
pub fn split_delimited(line: &str, delimiter: char) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();
    while let Some(ch) = chars.next() {
        if in_quotes {
            if ch == '"' {
                if chars.peek() == Some(&'"') {
                    current.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            } else {
                current.push(ch);
            }
        } else if ch == '"' && current.is_empty() {
            in_quotes = true;
        } else if ch == delimiter {
            fields.push(std::mem::take(&mut current));
        } else {
            current.push(ch);
        }
    }
    fields.push(current);
    fields
}

fn has_unbalanced_quotes(line: &str) -> bool {
    line.chars().filter(|ch| *ch == '"').count() % 2 == 1
}

/// Join physical lines whose quoted fields span newlines. Only applied when
/// the delimiter is `,` or `;`.
fn logical_lines(lines: &[String], delimiter: char) -> Vec<String> {
    if delimiter != ',' && delimiter != ';' {
        return lines.to_vec();
    }
    let mut joined = Vec::with_capacity(lines.len());
    let mut pending: Option<String> = None;
    for line in lines {
        match pending.take() {
            Some(mut open) => {
                open.push('\n');
                open.push_str(line);
                if has_unbalanced_quotes(&open) {
                    pending = Some(open);
                } else {
                    joined.push(open);
                }
            }
            None => {
                if has_unbalanced_quotes(line) {
                    pending = Some(line.clone());
                } else {
                    joined.push(line.clone());
                }
            }
        }
    }
    if let Some(open) = pending {
        joined.push(open);
    }
    joined
}

struct DelimiterScore {
    delimiter: char,
    modal_width: usize,
    modal_frequency: usize,
}

fn score_delimiter(lines: &[&String], delimiter: char) -> DelimiterScore {
    let mut width_counts: HashMap<usize, usize> = HashMap::new();
    for line in lines {
        let width = split_delimited(line, delimiter).len();
        *width_counts.entry(width).or_insert(0) += 1;
    }
    let (modal_width, modal_frequency) = width_counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)))
        .unwrap_or((1, 0));
    DelimiterScore {
        delimiter,
        modal_width,
        modal_frequency,
    }
}

/// Choose the delimiter whose modal column count covers the most sample
/// lines. Candidates that never split a line (modal width 1) lose to any
/// candidate that does; exact ties resolve in candidate order.
pub fn detect_delimiter(lines: &[String]) -> (char, bool) {
    let sample: Vec<&String> = lines
        .iter()
        .filter(|line| !line.trim().is_empty())
        .take(SIGNATURE_SAMPLE_LINES)
        .collect();
    if sample.is_empty() {
        return (',', false);
    }
    let scores: Vec<DelimiterScore> = DELIMITER_CANDIDATES
        .iter()
        .map(|delimiter| score_delimiter(&sample, *delimiter))
        .collect();
    // Ties resolve in candidate order: , > ; > \t > |.
    let mut best = &scores[0];
    for score in &scores[1..] {
        let challenger = ((score.modal_width > 1) as u8, score.modal_frequency);
        let incumbent = ((best.modal_width > 1) as u8, best.modal_frequency);
        if challenger > incumbent {
            best = score;
        }
    }
    let mixed = scores.iter().any(|score| {
        score.delimiter != best.delimiter
            && score.modal_width > 1
            && score.modal_frequency * 4 >= sample.len()
    });
    (best.delimiter, mixed)
}

/// Decide whether the first line of a block is a header: at least
/// `nontext_ratio` of its cells are non-numeric and none of them recurs as a
/// data cell in the remaining sample.
pub fn looks_like_header(first: &[String], remaining: &[Vec<String>], nontext_ratio: f64) -> bool {
    if first.is_empty() {
        return false;
    }
    let non_numeric = first
        .iter()
        .filter(|cell| classify_value(cell) != TypeBucket::Numeric)
        .count();
    if (non_numeric as f64) < nontext_ratio * first.len() as f64 {
        return false;
    }
    let mut seen: BTreeSet<&str> = BTreeSet::new();
    for row in remaining {
        for cell in row {
            seen.insert(cell.trim());
        }
    }
    first
        .iter()
        .all(|cell| cell.trim().is_empty() || !seen.contains(cell.trim()))
}

/// Build the signature and per-column profiles of one sampled block.
pub fn build_signature(
    lines: &[String],
    sample_cap: usize,
    header_nontext_ratio: f64,
    may_have_header: bool,
) -> (SchemaSignature, Vec<ColumnProfile>) {
    let non_empty: Vec<String> = lines
        .iter()
        .filter(|line| !line.trim().is_empty())
        .cloned()
        .collect();
    if non_empty.is_empty() {
        return (SchemaSignature::default(), Vec::new());
    }

    let (delimiter, mixed) = detect_delimiter(&non_empty);
    let rows: Vec<Vec<String>> = logical_lines(&non_empty, delimiter)
        .iter()
        .map(|line| split_delimited(line, delimiter))
        .collect();

    let header = if may_have_header && !rows.is_empty() {
        let first = &rows[0];
        if looks_like_header(first, &rows[1..], header_nontext_ratio) {
            Some(first.iter().map(|cell| cell.trim().to_string()).collect::<Vec<_>>())
        } else {
            None
        }
    } else {
        None
    };
    let data_rows: &[Vec<String>] = if header.is_some() { &rows[1..] } else { &rows };

    let mut width_counts: HashMap<usize, usize> = HashMap::new();
    for row in data_rows {
        *width_counts.entry(row.len()).or_insert(0) += 1;
    }
    let column_count = width_counts
        .iter()
        .max_by(|a, b| a.1.cmp(b.1).then_with(|| a.0.cmp(b.0)))
        .map(|(width, _)| *width)
        .unwrap_or_else(|| header.as_ref().map(|cells| cells.len()).unwrap_or(0));

    let mut short_rows = 0u64;
    let mut long_rows = 0u64;
    let mut accumulators: Vec<ColumnAccumulator> = (0..column_count)
        .map(|idx| {
            let name = header
                .as_ref()
                .and_then(|cells| cells.get(idx))
                .filter(|cell| !cell.is_empty())
                .cloned();
            ColumnAccumulator::new(name, sample_cap)
        })
        .collect();

    for row in data_rows {
        if row.len() < column_count {
            short_rows += 1;
        } else if row.len() > column_count {
            long_rows += 1;
        }
        for (idx, accumulator) in accumulators.iter_mut().enumerate() {
            let value = row.get(idx).map(|cell| cell.as_str()).unwrap_or("");
            accumulator.observe(value);
        }
    }

    let column_types: Vec<TypeBucket> = accumulators
        .iter()
        .map(|accumulator| accumulator.dominant().unwrap_or(TypeBucket::Text))
        .collect();
    let profiles: Vec<ColumnProfile> = accumulators
        .into_iter()
        .map(ColumnAccumulator::finish)
        .collect();

    let mut warnings = Vec::new();
    if mixed {
        warnings.push(MIXED_DELIMITER_WARNING.to_string());
    }
    let signature = SchemaSignature {
        delimiter,
        header_sample: header,
        column_count,
        column_types,
        short_rows,
        long_rows,
        warnings,
    };
    (signature, profiles)
}

/// Profile every column of a file in one streaming pass.
pub fn profile_file_columns(
    path: &Path,
    delimiter: char,
    encoding: &'static Encoding,
    has_headers: bool,
    sample_cap: usize,
) -> Result<(Vec<String>, Vec<ColumnProfile>)> {
    let mut reader = io_utils::open_delimited_reader(path, delimiter as u8, has_headers)?;
    let headers: Vec<String> = if has_headers {
        let record = reader
            .byte_headers()
            .with_context(|| format!("Reading headers from {path:?}"))?
            .clone();
        record
            .iter()
            .enumerate()
            .map(|(idx, field)| {
                let (decoded, _, _) = encoding.decode(field);
                let trimmed = decoded.trim().to_string();
                if trimmed.is_empty() {
                    format!("column_{}", idx + 1)
                } else {
                    trimmed
                }
            })
            .collect()
    } else {
        Vec::new()
    };

    let mut accumulators: Vec<ColumnAccumulator> = headers
        .iter()
        .map(|name| ColumnAccumulator::new(Some(name.clone()), sample_cap))
        .collect();
    let mut record = csv::ByteRecord::new();
    loop {
        let more = reader
            .read_byte_record(&mut record)
            .with_context(|| format!("Reading rows from {path:?}"))?;
        if !more {
            break;
        }
        while accumulators.len() < record.len() {
            let name = format!("column_{}", accumulators.len() + 1);
            accumulators.push(ColumnAccumulator::new(Some(name), sample_cap));
        }
        for (idx, accumulator) in accumulators.iter_mut().enumerate() {
            let field = record.get(idx).unwrap_or(b"");
            let (decoded, _, _) = encoding.decode(field);
            accumulator.observe(&decoded);
        }
    }

    let names: Vec<String> = accumulators
        .iter()
        .map(|accumulator| {
            accumulator
                .name
                .clone()
                .unwrap_or_else(|| "column_1".to_string())
        })
        .collect();
    let profiles = accumulators
        .into_iter()
        .map(ColumnAccumulator::finish)
        .collect();
    Ok((names, profiles))
}
