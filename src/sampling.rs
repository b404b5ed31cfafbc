//! Sampling plan construction and bounded block streaming.
//!
//! The planner seeds `{0, total_lines - 1}` and inserts midpoints into every
//! interval wider than `min_gap` until none remains, so the plan is
//! deterministic for a given `(total_lines, min_gap, block_size)`. Each sampled
//! index expands to a block of `block_size` lines centered on it, clipped to
//! the file; overlapping blocks are merged by deduplicating `(start, end)`.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use anyhow::{Context, Result};
use encoding_rs::Encoding;
use log::warn;

pub const LINE_COUNT_CHUNK_BYTES: usize = 1_048_576;
pub const BLOCK_BUFFER_LIMIT_BYTES: usize = 1_048_576;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedBlock {
    pub block_id: usize,
    pub start_line: u64,
    pub end_line: u64,
}

pub fn build_sample_indices(total_lines: u64, min_gap: u64) -> Vec<u64> {
    if total_lines == 0 {
        return Vec::new();
    }
    let gap = min_gap.max(1);
    let mut samples: BTreeSet<u64> = BTreeSet::new();
    samples.insert(0);
    samples.insert(total_lines.saturating_sub(1));
    loop {
        let ordered: Vec<u64> = samples.iter().copied().collect();
        let mut changed = false;
        for pair in ordered.windows(2) {
            let (left, right) = (pair[0], pair[1]);
            if right - left > gap {
                let mid = left + (right - left) / 2;
                if samples.insert(mid) {
                    changed = true;
                }
            }
        }
        if !changed {
            return samples.into_iter().collect();
        }
    }
}

/// Expand a sampled line index into a block centered on it, clipped to the
/// file bounds.
pub fn to_block(line_index: u64, total_lines: u64, block_size: u64) -> (u64, u64) {
    let block_size = block_size.max(1);
    let total_lines = total_lines.max(1);
    let half = block_size / 2;
    let start = line_index.saturating_sub(half);
    let end = (start + block_size - 1).min(total_lines - 1);
    let start = (end + 1).saturating_sub(block_size);
    (start, end)
}

pub fn plan_blocks(total_lines: u64, block_size: u64, min_gap: u64) -> Vec<PlannedBlock> {
    let indices = build_sample_indices(total_lines, min_gap);
    let mut seen: BTreeSet<(u64, u64)> = BTreeSet::new();
    let mut planned = Vec::new();
    for (block_id, index) in indices.into_iter().enumerate() {
        let (start, end) = to_block(index, total_lines, block_size);
        if !seen.insert((start, end)) {
            continue;
        }
        planned.push(PlannedBlock {
            block_id,
            start_line: start,
            end_line: end,
        });
    }
    planned.sort_by_key(|block| block.start_line);
    planned
}

/// Count newline-delimited rows in binary chunks without materializing the
/// file. A trailing byte that is not a newline still terminates a row.
pub fn count_lines(path: &Path) -> Result<u64> {
    let mut file = File::open(path).with_context(|| format!("Opening {path:?}"))?;
    let mut chunk = vec![0u8; LINE_COUNT_CHUNK_BYTES];
    let mut line_count = 0u64;
    let mut last_byte = 0u8;
    let mut has_data = false;
    loop {
        let read = file
            .read(&mut chunk)
            .with_context(|| format!("Reading {path:?}"))?;
        if read == 0 {
            break;
        }
        has_data = true;
        line_count += chunk[..read].iter().filter(|byte| **byte == b'\n').count() as u64;
        last_byte = chunk[read - 1];
    }
    if has_data && last_byte != b'\n' {
        line_count += 1;
    }
    Ok(line_count)
}

/// Decoded lines of one sampled block plus the byte span they came from.
#[derive(Debug, Clone, Default)]
pub struct BlockBuffer {
    pub lines: Vec<String>,
    pub byte_start: u64,
    pub byte_end: u64,
    pub decode_errors: u64,
}

/// Stream the planned blocks of `path` through a bounded buffer, invoking
/// `on_block` once per plan entry in start-line order. Lines past the 1 MiB
/// per-block cap are dropped from the sample buffer. Unsupported byte
/// sequences decode with replacement characters; one warning is logged per
/// file.
pub fn stream_blocks<F>(
    path: &Path,
    plan: &[PlannedBlock],
    encoding: &'static Encoding,
    mut on_block: F,
) -> Result<()>
where
    F: FnMut(&PlannedBlock, BlockBuffer) -> Result<()>,
{
    if plan.is_empty() {
        return Ok(());
    }
    let file = File::open(path).with_context(|| format!("Opening {path:?}"))?;
    let mut reader = BufReader::with_capacity(LINE_COUNT_CHUNK_BYTES, file);

    let mut plan_iter = plan.iter();
    let mut current = plan_iter.next();
    let mut buffer = BlockBuffer::default();
    let mut buffer_bytes = 0usize;
    let mut decode_errors_total = 0u64;

    let mut raw_line: Vec<u8> = Vec::new();
    let mut line_number: u64 = 0;
    let mut byte_offset: u64 = 0;

    loop {
        raw_line.clear();
        let read = reader
            .read_until(b'\n', &mut raw_line)
            .with_context(|| format!("Reading {path:?}"))?;
        if read == 0 {
            break;
        }
        let line_start = byte_offset;
        byte_offset += read as u64;

        while let Some(block) = current {
            if line_number <= block.end_line {
                break;
            }
            let finished = std::mem::take(&mut buffer);
            buffer_bytes = 0;
            decode_errors_total += finished.decode_errors;
            on_block(block, finished)?;
            current = plan_iter.next();
        }
        let block = match current {
            Some(block) => block,
            None => break,
        };
        if block.start_line <= line_number && line_number <= block.end_line {
            if buffer.lines.is_empty() {
                buffer.byte_start = line_start;
            }
            if buffer_bytes + read <= BLOCK_BUFFER_LIMIT_BYTES {
                let trimmed = trim_line_ending(&raw_line);
                let (decoded, _, had_errors) = encoding.decode(trimmed);
                if had_errors {
                    buffer.decode_errors += 1;
                }
                buffer.lines.push(decoded.into_owned());
                buffer_bytes += read;
            }
            buffer.byte_end = byte_offset;
        }
        if line_number == block.end_line {
            let finished = std::mem::take(&mut buffer);
            buffer_bytes = 0;
            decode_errors_total += finished.decode_errors;
            on_block(block, finished)?;
            current = plan_iter.next();
        }
        line_number += 1;
    }

    // Plans built from a stale line count can outrun the file; emit the
    // remaining blocks as empty so block ids stay aligned.
    if let Some(block) = current {
        decode_errors_total += buffer.decode_errors;
        on_block(block, std::mem::take(&mut buffer))?;
    }
    for block in plan_iter {
        on_block(block, BlockBuffer::default())?;
    }

    if decode_errors_total > 0 {
        warn!(
            "{} line(s) in {} contained byte sequences invalid for {}; decoded with replacements",
            decode_errors_total,
            path.display(),
            encoding.name()
        );
    }
    Ok(())
}

fn trim_line_ending(raw: &[u8]) -> &[u8] {
    let mut end = raw.len();
    if end > 0 && raw[end - 1] == b'\n' {
        end -= 1;
    }
    if end > 0 && raw[end - 1] == b'\r' {
        end -= 1;
    }
    &raw[..end]
}
