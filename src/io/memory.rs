//! In-memory row source.

use crate::chunk::{Chunk, ChunkSource, SourceCursor};
use anyhow::{Result, bail};
use std::collections::VecDeque;

/// Hands out an owned `Vec<T>` `rows_per_chunk` rows at a time.
#[derive(Debug)]
pub struct VecRowSource<T> {
    rows: VecDeque<T>,
    rows_per_chunk: usize,
    total: u64,
    cursor: SourceCursor,
}

impl<T> VecRowSource<T> {
    /// # Errors
    /// `rows_per_chunk` is zero.
    pub fn new(rows: Vec<T>, rows_per_chunk: usize) -> Result<Self> {
        if rows_per_chunk == 0 {
            bail!("rows_per_chunk must be at least 1");
        }
        Ok(Self {
            total: rows.len() as u64,
            rows: rows.into(),
            rows_per_chunk,
            cursor: SourceCursor::new(),
        })
    }

    /// Rows not yet handed out.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.rows.len()
    }
}

impl<T: Send + 'static> ChunkSource for VecRowSource<T> {
    type Payload = Vec<T>;

    fn next_chunk(&mut self) -> Result<Option<Chunk<Vec<T>>>> {
        self.cursor.check_open()?;
        if self.rows.is_empty() {
            return Ok(self.cursor.finish());
        }
        let take = self.rows_per_chunk.min(self.rows.len());
        let batch: Vec<T> = self.rows.drain(..take).collect();
        Ok(Some(self.cursor.emit(batch)))
    }

    fn total_units(&self) -> Option<u64> {
        Some(self.total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_into_ceil_n_over_c_chunks() -> Result<()> {
        let mut src = VecRowSource::new((0..25).collect::<Vec<u32>>(), 10)?;
        assert_eq!(src.total_units(), Some(25));
        let mut sizes = Vec::new();
        let mut offsets = Vec::new();
        while let Some(chunk) = src.next_chunk()? {
            sizes.push(chunk.payload.len());
            offsets.push(chunk.offset);
        }
        assert_eq!(sizes, vec![10, 10, 5]);
        assert_eq!(offsets, vec![0, 10, 20]);
        assert!(src.next_chunk().is_err());
        Ok(())
    }

    #[test]
    fn empty_input_ends_immediately() -> Result<()> {
        let mut src = VecRowSource::<u8>::new(Vec::new(), 3)?;
        assert!(src.next_chunk()?.is_none());
        assert!(VecRowSource::new(vec![1u8], 0).is_err());
        Ok(())
    }
}
