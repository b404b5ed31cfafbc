//! Row-sink writer adapters for materialization.
//!
//! A writer owns one logical output per schema, rotating chunk files when
//! `chunk_rows` is reached. File-based rotation stages chunks as `*.part` and
//! renames on completion; the SQL writer uses a transaction per checkpoint
//! window. Headers are emitted exactly once per chunk, including across
//! resume, and a partially written chunk is either appended to (csv),
//! superseded by a bumped chunk ordinal (parquet), or rolled back by the
//! transaction boundary (database).

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use arrow_array::{ArrayRef, RecordBatch, StringArray};
use arrow_schema::{DataType, Field, Schema as ArrowSchema};
use csv::QuoteStyle;
use parquet::arrow::ArrowWriter;
use rusqlite::{params_from_iter, Connection};
use serde::{Deserialize, Serialize};

use crate::errors::PipelineError;
use crate::models::SchemaDefinition;
use crate::text::slugify;

pub const PARQUET_FLUSH_ROWS: usize = 2_048;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterFormat {
    Csv,
    Parquet,
    Database,
}

impl WriterFormat {
    pub fn parse(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "csv" => Ok(WriterFormat::Csv),
            "parquet" => Ok(WriterFormat::Parquet),
            "database" => Ok(WriterFormat::Database),
            other => Err(PipelineError::config(format!(
                "Unsupported writer format '{other}'. Expected csv, parquet, or database"
            ))
            .into()),
        }
    }

}

/// Writer-side cursor persisted inside the job checkpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WriterCursor {
    pub chunk_ordinal: u64,
    pub rows_in_chunk: u64,
    pub total_rows: u64,
    pub output_files: Vec<String>,
}

/// Row sink bound to one schema and one destination.
pub trait SchemaWriter: Send + std::fmt::Debug {
    fn write_row(&mut self, values: &[String]) -> Result<()>;

    fn write_rows(&mut self, batch: &[Vec<String>]) -> Result<()> {
        for row in batch {
            self.write_row(row)?;
        }
        Ok(())
    }

    /// Finish the current chunk and start the next one.
    fn rotate(&mut self) -> Result<()>;

    /// Make everything written so far durable; called immediately before the
    /// job checkpoint is persisted.
    fn checkpoint_sync(&mut self) -> Result<()>;

    fn close(&mut self) -> Result<()>;

    fn cursor(&self) -> WriterCursor;

    fn slug(&self) -> &str;
}

pub fn build_writer(
    format: WriterFormat,
    schema: &SchemaDefinition,
    dest_dir: &Path,
    chunk_rows: u64,
    db_url: Option<&str>,
    resume: Option<&WriterCursor>,
) -> Result<Box<dyn SchemaWriter>> {
    let header: Vec<String> = if schema.columns.is_empty() {
        vec!["column_1".to_string()]
    } else {
        schema
            .columns
            .iter()
            .map(|column| {
                if column.normalized_name.is_empty() {
                    column.raw_name.clone()
                } else {
                    column.normalized_name.clone()
                }
            })
            .collect()
    };
    let slug = slugify(&schema.name);
    match format {
        WriterFormat::Csv => Ok(Box::new(CsvSchemaWriter::open(
            dest_dir, slug, header, chunk_rows, resume,
        )?)),
        WriterFormat::Parquet => Ok(Box::new(ParquetSchemaWriter::open(
            dest_dir, slug, header, chunk_rows, resume,
        )?)),
        WriterFormat::Database => {
            let url = db_url.ok_or_else(|| {
                PipelineError::config(
                    "Database writer requires --db-url (e.g. sqlite:///path/to.db)",
                )
            })?;
            Ok(Box::new(DatabaseSchemaWriter::open(
                url, slug, header, chunk_rows, resume,
            )?))
        }
    }
}

fn chunk_path(dest_dir: &Path, slug: &str, ordinal: u64, extension: &str) -> PathBuf {
    dest_dir.join(format!("{slug}_{ordinal:03}.{extension}"))
}

fn staging_path(path: &Path) -> PathBuf {
    let mut staged = path.as_os_str().to_owned();
    staged.push(".part");
    PathBuf::from(staged)
}

// ---------------------------------------------------------------------------
// CSV

pub struct CsvSchemaWriter {
    dest_dir: PathBuf,
    slug: String,
    header: Vec<String>,
    chunk_rows: u64,
    cursor: WriterCursor,
    writer: Option<csv::Writer<File>>,
    current_final: PathBuf,
}

impl std::fmt::Debug for CsvSchemaWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsvSchemaWriter")
            .field("slug", &self.slug)
            .field("cursor", &self.cursor)
            .finish()
    }
}

impl CsvSchemaWriter {
    fn open(
        dest_dir: &Path,
        slug: String,
        header: Vec<String>,
        chunk_rows: u64,
        resume: Option<&WriterCursor>,
    ) -> Result<Self> {
        std::fs::create_dir_all(dest_dir)
            .with_context(|| format!("Creating destination {dest_dir:?}"))?;
        let cursor = resume.cloned().unwrap_or_default();
        let mut writer = Self {
            dest_dir: dest_dir.to_path_buf(),
            slug,
            header,
            chunk_rows: chunk_rows.max(1),
            cursor,
            writer: None,
            current_final: PathBuf::new(),
        };
        let resume_mid_chunk = writer.cursor.rows_in_chunk > 0;
        writer.open_chunk(resume_mid_chunk)?;
        Ok(writer)
    }

    fn open_chunk(&mut self, append: bool) -> Result<()> {
        let final_path = chunk_path(
            &self.dest_dir,
            &self.slug,
            self.cursor.chunk_ordinal,
            "csv",
        );
        let staged = staging_path(&final_path);
        let resuming = append && staged.exists() && self.cursor.rows_in_chunk > 0;
        let file = if resuming {
            // Rows written after the last committed checkpoint are not
            // covered by the cursor; truncate the staged chunk back to the
            // header plus the checkpointed row count before appending.
            truncate_staged_chunk(&staged, self.cursor.rows_in_chunk)?;
            std::fs::OpenOptions::new()
                .append(true)
                .open(&staged)
                .with_context(|| format!("Reopening chunk {staged:?}"))?
        } else {
            File::create(&staged).with_context(|| format!("Creating chunk {staged:?}"))?
        };
        let mut csv_writer = csv::WriterBuilder::new()
            .quote_style(QuoteStyle::Necessary)
            .from_writer(file);
        if !resuming {
            csv_writer
                .write_record(&self.header)
                .context("Writing chunk header")?;
            self.cursor.rows_in_chunk = 0;
        }
        self.writer = Some(csv_writer);
        self.current_final = final_path;
        Ok(())
    }

    fn seal_chunk(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush().context("Flushing chunk")?;
        }
        let staged = staging_path(&self.current_final);
        if staged.exists() {
            std::fs::rename(&staged, &self.current_final).with_context(|| {
                format!("Renaming {staged:?} over {:?}", self.current_final)
            })?;
        }
        let name = self.current_final.display().to_string();
        if !self.cursor.output_files.contains(&name) {
            self.cursor.output_files.push(name);
        }
        Ok(())
    }
}

fn truncate_staged_chunk(staged: &Path, keep_rows: u64) -> Result<()> {
    let raw = std::fs::read_to_string(staged)
        .with_context(|| format!("Reading staged chunk {staged:?}"))?;
    let keep_lines = keep_rows as usize + 1;
    let mut kept = String::with_capacity(raw.len());
    for line in raw.lines().take(keep_lines) {
        kept.push_str(line);
        kept.push('\n');
    }
    std::fs::write(staged, kept).with_context(|| format!("Truncating staged chunk {staged:?}"))
}

impl SchemaWriter for CsvSchemaWriter {
    fn write_row(&mut self, values: &[String]) -> Result<()> {
        if self.cursor.rows_in_chunk >= self.chunk_rows {
            self.rotate()?;
        }
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| anyhow!("Writer used after close"))?;
        writer.write_record(values).context("Writing row")?;
        self.cursor.rows_in_chunk += 1;
        self.cursor.total_rows += 1;
        Ok(())
    }

    fn rotate(&mut self) -> Result<()> {
        self.seal_chunk()?;
        self.cursor.chunk_ordinal += 1;
        self.cursor.rows_in_chunk = 0;
        self.open_chunk(false)
    }

    fn checkpoint_sync(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush().context("Flushing chunk")?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.writer.is_some() {
            self.seal_chunk()?;
        }
        Ok(())
    }

    fn cursor(&self) -> WriterCursor {
        self.cursor.clone()
    }

    fn slug(&self) -> &str {
        &self.slug
    }
}

// ---------------------------------------------------------------------------
// Parquet

pub struct ParquetSchemaWriter {
    dest_dir: PathBuf,
    slug: String,
    chunk_rows: u64,
    cursor: WriterCursor,
    arrow_schema: Arc<ArrowSchema>,
    header: Vec<String>,
    writer: Option<ArrowWriter<File>>,
    buffer: Vec<Vec<String>>,
    current_final: PathBuf,
}

impl std::fmt::Debug for ParquetSchemaWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParquetSchemaWriter")
            .field("slug", &self.slug)
            .field("cursor", &self.cursor)
            .finish()
    }
}

impl ParquetSchemaWriter {
    fn open(
        dest_dir: &Path,
        slug: String,
        header: Vec<String>,
        chunk_rows: u64,
        resume: Option<&WriterCursor>,
    ) -> Result<Self> {
        std::fs::create_dir_all(dest_dir)
            .with_context(|| format!("Creating destination {dest_dir:?}"))?;
        let mut cursor = resume.cloned().unwrap_or_default();
        // Parquet chunks cannot be appended to; checkpoint_sync seals the
        // chunk, so a committed cursor always sits at a chunk boundary. A
        // cursor caught mid-chunk is superseded by the next ordinal.
        if cursor.rows_in_chunk > 0 {
            cursor.chunk_ordinal += 1;
            cursor.rows_in_chunk = 0;
        }
        let fields: Vec<Field> = header
            .iter()
            .map(|name| Field::new(name.clone(), DataType::Utf8, true))
            .collect();
        let mut writer = Self {
            dest_dir: dest_dir.to_path_buf(),
            slug,
            chunk_rows: chunk_rows.max(1),
            cursor,
            arrow_schema: Arc::new(ArrowSchema::new(fields)),
            header,
            writer: None,
            buffer: Vec::new(),
            current_final: PathBuf::new(),
        };
        writer.open_chunk()?;
        Ok(writer)
    }

    fn open_chunk(&mut self) -> Result<()> {
        let final_path = chunk_path(
            &self.dest_dir,
            &self.slug,
            self.cursor.chunk_ordinal,
            "parquet",
        );
        let staged = staging_path(&final_path);
        let file = File::create(&staged).with_context(|| format!("Creating chunk {staged:?}"))?;
        let writer = ArrowWriter::try_new(file, Arc::clone(&self.arrow_schema), None)
            .context("Opening parquet writer")?;
        self.writer = Some(writer);
        self.current_final = final_path;
        Ok(())
    }

    fn flush_buffer(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| anyhow!("Writer used after close"))?;
        let columns: Vec<ArrayRef> = (0..self.header.len())
            .map(|idx| {
                let values: Vec<&str> = self
                    .buffer
                    .iter()
                    .map(|row| row.get(idx).map(|value| value.as_str()).unwrap_or(""))
                    .collect();
                Arc::new(StringArray::from(values)) as ArrayRef
            })
            .collect();
        let batch = RecordBatch::try_new(Arc::clone(&self.arrow_schema), columns)
            .context("Assembling record batch")?;
        writer.write(&batch).context("Writing record batch")?;
        self.buffer.clear();
        Ok(())
    }

    fn seal_chunk(&mut self) -> Result<()> {
        self.flush_buffer()?;
        if let Some(writer) = self.writer.take() {
            writer.close().context("Closing parquet chunk")?;
        }
        let staged = staging_path(&self.current_final);
        if self.cursor.rows_in_chunk == 0 {
            // Nothing was written into this chunk; drop the staged file
            // instead of publishing an empty output.
            let _ = std::fs::remove_file(&staged);
            return Ok(());
        }
        if staged.exists() {
            std::fs::rename(&staged, &self.current_final).with_context(|| {
                format!("Renaming {staged:?} over {:?}", self.current_final)
            })?;
        }
        let name = self.current_final.display().to_string();
        if !self.cursor.output_files.contains(&name) {
            self.cursor.output_files.push(name);
        }
        Ok(())
    }
}

impl SchemaWriter for ParquetSchemaWriter {
    fn write_row(&mut self, values: &[String]) -> Result<()> {
        if self.cursor.rows_in_chunk >= self.chunk_rows {
            self.rotate()?;
        }
        self.buffer.push(values.to_vec());
        if self.buffer.len() >= PARQUET_FLUSH_ROWS {
            self.flush_buffer()?;
        }
        self.cursor.rows_in_chunk += 1;
        self.cursor.total_rows += 1;
        Ok(())
    }

    fn rotate(&mut self) -> Result<()> {
        self.seal_chunk()?;
        self.cursor.chunk_ordinal += 1;
        self.cursor.rows_in_chunk = 0;
        self.open_chunk()
    }

    // A parquet file is only readable once its footer is written, so the
    // durability point must seal the chunk; the checkpointed cursor then
    // always refers to completed chunks only.
    fn checkpoint_sync(&mut self) -> Result<()> {
        if self.cursor.rows_in_chunk > 0 {
            self.rotate()?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.writer.is_some() {
            self.seal_chunk()?;
        }
        Ok(())
    }

    fn cursor(&self) -> WriterCursor {
        self.cursor.clone()
    }

    fn slug(&self) -> &str {
        &self.slug
    }
}

// ---------------------------------------------------------------------------
// Embedded SQL

pub struct DatabaseSchemaWriter {
    slug: String,
    header: Vec<String>,
    chunk_rows: u64,
    cursor: WriterCursor,
    conn: Connection,
    insert_sql: String,
    in_transaction: bool,
}

impl std::fmt::Debug for DatabaseSchemaWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseSchemaWriter")
            .field("slug", &self.slug)
            .field("cursor", &self.cursor)
            .finish()
    }
}

impl DatabaseSchemaWriter {
    fn open(
        db_url: &str,
        slug: String,
        header: Vec<String>,
        chunk_rows: u64,
        resume: Option<&WriterCursor>,
    ) -> Result<Self> {
        let db_path = resolve_sqlite_path(db_url)?;
        let conn = Connection::open(&db_path)
            .map_err(|err| PipelineError::storage(format!("Opening {db_path:?}: {err}")))?;
        let cursor = resume.cloned().unwrap_or_default();

        let columns_ddl: String = header
            .iter()
            .map(|name| format!("\"{}\" TEXT", slugify(name)))
            .collect::<Vec<_>>()
            .join(", ");
        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS \"{slug}\" (
                    chunk_ordinal INTEGER NOT NULL,
                    row_in_chunk INTEGER NOT NULL,
                    {columns_ddl}
                )"
            ),
            [],
        )
        .map_err(|err| PipelineError::storage(format!("Creating table '{slug}': {err}")))?;

        // Rows past the resumed cursor were not covered by a committed
        // checkpoint; clear them so replay cannot produce duplicates.
        conn.execute(
            &format!(
                "DELETE FROM \"{slug}\"
                 WHERE chunk_ordinal > ?1
                    OR (chunk_ordinal = ?1 AND row_in_chunk >= ?2)"
            ),
            rusqlite::params![cursor.chunk_ordinal as i64, cursor.rows_in_chunk as i64],
        )
        .map_err(|err| PipelineError::storage(format!("Trimming table '{slug}': {err}")))?;

        let placeholders = vec!["?"; header.len() + 2];
        let quoted: Vec<String> = std::iter::once("chunk_ordinal".to_string())
            .chain(std::iter::once("row_in_chunk".to_string()))
            .chain(header.iter().map(|name| format!("\"{}\"", slugify(name))))
            .collect();
        let insert_sql = format!(
            "INSERT INTO \"{slug}\" ({}) VALUES ({})",
            quoted.join(", "),
            placeholders.join(", ")
        );

        let mut writer = Self {
            slug,
            header,
            chunk_rows: chunk_rows.max(1),
            cursor,
            conn,
            insert_sql,
            in_transaction: false,
        };
        writer.begin()?;
        Ok(writer)
    }

    fn begin(&mut self) -> Result<()> {
        if !self.in_transaction {
            self.conn
                .execute_batch("BEGIN")
                .map_err(|err| PipelineError::storage(format!("BEGIN failed: {err}")))?;
            self.in_transaction = true;
        }
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        if self.in_transaction {
            self.conn
                .execute_batch("COMMIT")
                .map_err(|err| PipelineError::storage(format!("COMMIT failed: {err}")))?;
            self.in_transaction = false;
        }
        Ok(())
    }
}

impl SchemaWriter for DatabaseSchemaWriter {
    fn write_row(&mut self, values: &[String]) -> Result<()> {
        if self.cursor.rows_in_chunk >= self.chunk_rows {
            self.rotate()?;
        }
        let mut bound: Vec<String> = Vec::with_capacity(self.header.len() + 2);
        bound.push(self.cursor.chunk_ordinal.to_string());
        bound.push(self.cursor.rows_in_chunk.to_string());
        for idx in 0..self.header.len() {
            bound.push(values.get(idx).cloned().unwrap_or_default());
        }
        self.conn
            .execute(&self.insert_sql, params_from_iter(bound.iter()))
            .map_err(|err| {
                PipelineError::storage(format!("Insert into '{}': {err}", self.slug))
            })?;
        self.cursor.rows_in_chunk += 1;
        self.cursor.total_rows += 1;
        Ok(())
    }

    fn rotate(&mut self) -> Result<()> {
        // Transaction boundary doubles as the atomic rotation point.
        self.commit()?;
        self.cursor.chunk_ordinal += 1;
        self.cursor.rows_in_chunk = 0;
        self.begin()
    }

    fn checkpoint_sync(&mut self) -> Result<()> {
        self.commit()?;
        self.begin()
    }

    fn close(&mut self) -> Result<()> {
        self.commit()
    }

    fn cursor(&self) -> WriterCursor {
        let mut cursor = self.cursor.clone();
        let name = format!("sqlite:{}", self.slug);
        if !cursor.output_files.contains(&name) {
            cursor.output_files.push(name);
        }
        cursor
    }

    fn slug(&self) -> &str {
        &self.slug
    }
}

pub fn resolve_sqlite_path(db_url: &str) -> Result<PathBuf> {
    let prefix = "sqlite:///";
    let raw = db_url.strip_prefix(prefix).ok_or_else(|| {
        PipelineError::config("Only sqlite:/// URLs are supported for database destinations")
    })?;
    let path = PathBuf::from(raw);
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Creating database directory {parent:?}"))?;
        }
    }
    Ok(path)
}
