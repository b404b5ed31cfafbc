//! Shared IO helpers: delimited reader/writer construction, encoding
//! resolution, and the block-boundary retry policy for transient read errors.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use csv::QuoteStyle;
use encoding_rs::{Encoding, UTF_8, WINDOWS_1251};
use log::warn;

pub const IO_RETRY_ATTEMPTS: u32 = 3;
const IO_RETRY_BASE_DELAY_MS: u64 = 50;

pub fn resolve_encoding(label: Option<&str>) -> &'static Encoding {
    match label {
        None => UTF_8,
        Some(value) => {
            let trimmed = value.trim();
            if trimmed.eq_ignore_ascii_case("windows-1251") || trimmed.eq_ignore_ascii_case("cp1251")
            {
                return WINDOWS_1251;
            }
            match Encoding::for_label(trimmed.as_bytes()) {
                Some(encoding) => encoding,
                None => {
                    warn!("Unknown encoding '{trimmed}'; falling back to UTF-8 with replacement");
                    UTF_8
                }
            }
        }
    }
}

pub fn open_delimited_reader(
    path: &Path,
    delimiter: u8,
    has_headers: bool,
) -> Result<csv::Reader<BufReader<File>>> {
    let file = File::open(path).with_context(|| format!("Opening input file {path:?}"))?;
    let mut builder = csv::ReaderBuilder::new();
    builder
        .has_headers(has_headers)
        .delimiter(delimiter)
        .double_quote(true)
        .flexible(true);
    Ok(builder.from_reader(BufReader::new(file)))
}

pub fn open_delimited_writer(path: &Path, delimiter: u8) -> Result<csv::Writer<BufWriter<File>>> {
    let file = File::create(path).with_context(|| format!("Creating output file {path:?}"))?;
    let mut builder = csv::WriterBuilder::new();
    builder
        .delimiter(delimiter)
        .quote_style(QuoteStyle::Necessary)
        .double_quote(true);
    Ok(builder.from_writer(BufWriter::new(file)))
}

pub fn open_append_writer(path: &Path, delimiter: u8) -> Result<csv::Writer<BufWriter<File>>> {
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Opening output file {path:?} for append"))?;
    let mut builder = csv::WriterBuilder::new();
    builder
        .delimiter(delimiter)
        .quote_style(QuoteStyle::Necessary)
        .double_quote(true);
    Ok(builder.from_writer(BufWriter::new(file)))
}

/// Run `operation` up to [`IO_RETRY_ATTEMPTS`] + 1 times with exponential
/// backoff. Used at block boundaries so one flaky read does not fail a phase.
pub fn with_io_retries<T, F>(label: &str, mut operation: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let mut attempt = 0u32;
    loop {
        match operation() {
            Ok(value) => return Ok(value),
            Err(err) if attempt < IO_RETRY_ATTEMPTS => {
                let delay = IO_RETRY_BASE_DELAY_MS * 2u64.pow(attempt);
                warn!(
                    "{label} failed (attempt {}/{}): {err:#}; retrying in {delay} ms",
                    attempt + 1,
                    IO_RETRY_ATTEMPTS + 1
                );
                thread::sleep(Duration::from_millis(delay));
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Durable JSON write: serialize to a staging file, then rename over the
/// target so readers never observe a partial document.
pub fn write_json_atomic<T: serde::Serialize>(path: &Path, payload: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Creating directory {parent:?}"))?;
    }
    let staged = path.with_extension("json.tmp");
    {
        let file =
            File::create(&staged).with_context(|| format!("Creating staging file {staged:?}"))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, payload)
            .with_context(|| format!("Serializing {path:?}"))?;
        writer.flush().with_context(|| format!("Flushing {staged:?}"))?;
    }
    std::fs::rename(&staged, path)
        .with_context(|| format!("Renaming {staged:?} over {path:?}"))?;
    Ok(())
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        other => {
            let mut chars = other.chars();
            let first = chars
                .next()
                .ok_or_else(|| "Delimiter cannot be empty".to_string())?;
            if chars.next().is_some() {
                return Err("Delimiter must be a single character".to_string());
            }
            if !first.is_ascii() {
                return Err("Delimiter must be ASCII".to_string());
            }
            Ok(first as u8)
        }
    }
}

pub fn printable_delimiter(delimiter: char) -> String {
    match delimiter {
        '\t' => "\\t".to_string(),
        '\n' => "\\n".to_string(),
        other => other.to_string(),
    }
}
