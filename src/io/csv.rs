//! CSV rows in and out.
//!
//! - [`CsvRowSource`] streams typed records `rows_per_chunk` at a time; the file is
//!   never loaded whole. Compressed inputs are decoded transparently.
//! - [`encode_csv`] serializes one chunk for a partition sink.
//!
//! Row numbers in errors are 1-based and exclude the header.

use crate::chunk::{Chunk, ChunkSource, SourceCursor};
use crate::io::compression::open_decoded;
use anyhow::{Context, Result, anyhow, bail};
use csv::{DeserializeRecordsIntoIter, ReaderBuilder, WriterBuilder};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Streaming, typed CSV source.
pub struct CsvRowSource<T> {
    path: PathBuf,
    records: DeserializeRecordsIntoIter<Box<dyn Read>, T>,
    rows_per_chunk: usize,
    total: Option<u64>,
    cursor: SourceCursor,
}

impl<T: DeserializeOwned> CsvRowSource<T> {
    /// # Errors
    /// The file cannot be opened, its codec is unavailable, or `rows_per_chunk` is 0.
    pub fn open(path: impl AsRef<Path>, has_headers: bool, rows_per_chunk: usize) -> Result<Self> {
        if rows_per_chunk == 0 {
            bail!("rows_per_chunk must be at least 1");
        }
        let path = path.as_ref().to_path_buf();
        let rdr = ReaderBuilder::new()
            .has_headers(has_headers)
            .from_reader(open_decoded(&path)?);
        Ok(Self {
            records: rdr.into_deserialize(),
            path,
            rows_per_chunk,
            total: None,
            cursor: SourceCursor::new(),
        })
    }

    /// Pre-scan the file so progress can report a fraction.
    ///
    /// # Errors
    /// The file cannot be re-read or contains a malformed record.
    pub fn with_counted_total(mut self, has_headers: bool) -> Result<Self> {
        self.total = Some(count_csv_rows(&self.path, has_headers)?);
        Ok(self)
    }
}

impl<T: DeserializeOwned + Send + 'static> ChunkSource for CsvRowSource<T> {
    type Payload = Vec<T>;

    fn next_chunk(&mut self) -> Result<Option<Chunk<Vec<T>>>> {
        self.cursor.check_open()?;
        let mut batch = Vec::with_capacity(self.rows_per_chunk);
        while batch.len() < self.rows_per_chunk {
            match self.records.next() {
                Some(rec) => {
                    let row = self.cursor.offset() + batch.len() as u64 + 1;
                    let v = rec.with_context(|| {
                        format!("parse CSV record #{row} in {}", self.path.display())
                    })?;
                    batch.push(v);
                }
                None => break,
            }
        }
        if batch.is_empty() {
            return Ok(self.cursor.finish());
        }
        Ok(Some(self.cursor.emit(batch)))
    }

    fn total_units(&self) -> Option<u64> {
        self.total
    }
}

/// Count data rows (header excluded) without deserializing them.
///
/// # Errors
/// Open, decode, or CSV framing errors.
pub fn count_csv_rows(path: impl AsRef<Path>, has_headers: bool) -> Result<u64> {
    let path = path.as_ref();
    let mut rdr = ReaderBuilder::new()
        .has_headers(has_headers)
        .from_reader(open_decoded(path)?);
    let mut n = 0u64;
    for rec in rdr.byte_records() {
        rec.with_context(|| format!("scan CSV record #{} in {}", n + 1, path.display()))?;
        n += 1;
    }
    Ok(n)
}

/// Serialize `rows` as one CSV document.
///
/// # Errors
/// A row fails to serialize.
pub fn encode_csv<T: Serialize>(rows: &[T], has_headers: bool) -> Result<Vec<u8>> {
    let mut wtr = WriterBuilder::new()
        .has_headers(has_headers)
        .from_writer(Vec::new());
    for (i, row) in rows.iter().enumerate() {
        wtr.serialize(row)
            .with_context(|| format!("serialize CSV row #{}", i + 1))?;
    }
    wtr.into_inner()
        .map_err(|e| anyhow!("flush CSV buffer: {}", e.error()))
}
