//! JSON Lines rows in and out.
//!
//! [`JsonlRowSource`] reads one JSON value per line, skipping blank lines, and
//! hands out `rows_per_chunk` values at a time. [`encode_jsonl`] writes one
//! compact value per line.

use crate::chunk::{Chunk, ChunkSource, SourceCursor};
use crate::io::compression::open_decoded;
use anyhow::{Context, Result, bail};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io::{BufRead, BufReader, Lines, Read};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

/// Streaming, typed JSONL source.
pub struct JsonlRowSource<T> {
    path: PathBuf,
    lines: Lines<BufReader<Box<dyn Read>>>,
    line_no: usize,
    rows_per_chunk: usize,
    cursor: SourceCursor,
    _row: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> JsonlRowSource<T> {
    /// # Errors
    /// The file cannot be opened, its codec is unavailable, or `rows_per_chunk` is 0.
    pub fn open(path: impl AsRef<Path>, rows_per_chunk: usize) -> Result<Self> {
        if rows_per_chunk == 0 {
            bail!("rows_per_chunk must be at least 1");
        }
        let path = path.as_ref().to_path_buf();
        let lines = BufReader::new(open_decoded(&path)?).lines();
        Ok(Self {
            path,
            lines,
            line_no: 0,
            rows_per_chunk,
            cursor: SourceCursor::new(),
            _row: PhantomData,
        })
    }
}

impl<T: DeserializeOwned + Send + 'static> ChunkSource for JsonlRowSource<T> {
    type Payload = Vec<T>;

    fn next_chunk(&mut self) -> Result<Option<Chunk<Vec<T>>>> {
        self.cursor.check_open()?;
        let mut batch = Vec::with_capacity(self.rows_per_chunk);
        while batch.len() < self.rows_per_chunk {
            let Some(line) = self.lines.next() else { break };
            self.line_no += 1;
            let line = line
                .with_context(|| format!("read line {} in {}", self.line_no, self.path.display()))?;
            if line.trim().is_empty() {
                continue;
            }
            let v: T = serde_json::from_str(&line).with_context(|| {
                format!("parse JSONL line {} in {}", self.line_no, self.path.display())
            })?;
            batch.push(v);
        }
        if batch.is_empty() {
            return Ok(self.cursor.finish());
        }
        Ok(Some(self.cursor.emit(batch)))
    }
}

/// Serialize `rows` as JSON Lines.
///
/// # Errors
/// A row fails to serialize.
pub fn encode_jsonl<T: Serialize>(rows: &[T]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for (i, row) in rows.iter().enumerate() {
        serde_json::to_writer(&mut out, row)
            .with_context(|| format!("serialize JSONL row #{}", i + 1))?;
        out.push(b'\n');
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Event {
        id: u64,
        kind: String,
    }

    #[test]
    fn blank_lines_are_skipped_and_chunks_stay_full() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("events.jsonl");
        std::fs::write(
            &path,
            "{\"id\":1,\"kind\":\"a\"}\n\n{\"id\":2,\"kind\":\"b\"}\n{\"id\":3,\"kind\":\"c\"}\n",
        )?;

        let mut src = JsonlRowSource::<Event>::open(&path, 2)?;
        let first = src.next_chunk()?.unwrap();
        assert_eq!(first.payload.iter().map(|e| e.id).collect::<Vec<_>>(), vec![1, 2]);
        let second = src.next_chunk()?.unwrap();
        assert_eq!(second.offset, 2);
        assert_eq!(second.payload.len(), 1);
        assert!(src.next_chunk()?.is_none());
        Ok(())
    }

    #[test]
    fn bad_line_reports_line_number() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("events.jsonl");
        std::fs::write(&path, "{\"id\":1,\"kind\":\"a\"}\n{oops}\n")?;
        let err = JsonlRowSource::<Event>::open(&path, 10)?.next_chunk().unwrap_err();
        assert!(format!("{err:#}").contains("line 2"), "{err:#}");
        Ok(())
    }

    #[test]
    fn encode_writes_one_value_per_line() -> Result<()> {
        let rows = vec![
            Event { id: 7, kind: "x".into() },
            Event { id: 8, kind: "y".into() },
        ];
        let text = String::from_utf8(encode_jsonl(&rows)?)?;
        assert_eq!(text, "{\"id\":7,\"kind\":\"x\"}\n{\"id\":8,\"kind\":\"y\"}\n");
        Ok(())
    }
}
