//! Chunks, jobs, and the two collaborator traits the driver talks through.
//!
//! A [`ChunkSource`] is a strictly sequential, finite producer. A [`ChunkSink`]
//! materializes one chunk and may be called from many worker threads at once.
//! Everything format- or transport-specific lives behind these two traits.

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

/// Payloads report their size in *units*: rows for tabular data, bytes for
/// byte windows. Progress, totals, and the chunk-size bound are all in units.
pub trait ChunkUnits {
    fn units(&self) -> u64;
}

impl<T> ChunkUnits for Vec<T> {
    fn units(&self) -> u64 {
        self.len() as u64
    }
}

/// A contiguous byte window `[offset, offset + len)` of some object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ByteRange {
    pub offset: u64,
    pub len: u64,
}

impl ByteRange {
    #[must_use]
    pub fn end(&self) -> u64 {
        self.offset + self.len
    }
}

impl ChunkUnits for ByteRange {
    fn units(&self) -> u64 {
        self.len
    }
}

/// An ordered unit of work.
#[derive(Clone, Debug, PartialEq)]
pub struct Chunk<P> {
    /// 0-based sequence number, strictly increasing in production order.
    pub index: u64,
    /// Position of the first unit in the source stream.
    pub offset: u64,
    pub payload: P,
}

impl<P: ChunkUnits> Chunk<P> {
    pub fn units(&self) -> u64 {
        self.payload.units()
    }
}

/// Lifecycle of a job as seen by the driver.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Created,
    Submitted,
    Running,
    Succeeded,
    Failed,
}

impl JobState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    #[must_use]
    pub fn is_inflight(self) -> bool {
        matches!(self, Self::Submitted | Self::Running)
    }
}

/// A chunk paired with its destination, owned by whichever component runs it.
#[derive(Debug)]
pub struct Job<P> {
    pub chunk: Chunk<P>,
    /// Where the sink should materialize this chunk. `None` when the sink derives
    /// it on its own (e.g. writes into a shared pre-sized file).
    pub destination: Option<PathBuf>,
}

impl<P> Job<P> {
    pub fn new(chunk: Chunk<P>, destination: Option<PathBuf>) -> Self {
        Self { chunk, destination }
    }

    pub fn index(&self) -> u64 {
        self.chunk.index
    }
}

/// What a sink reports back for a successfully materialized chunk.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMeta {
    /// Rows or bytes covered by the chunk.
    pub units: u64,
    /// Bytes written to the destination.
    pub bytes_written: u64,
    pub destination: Option<PathBuf>,
    /// Hex SHA-256 of the materialized bytes.
    pub checksum: Option<String>,
}

/// Sequential, finite producer of chunks.
///
/// Only the driver calls this, from one thread. `Ok(None)` is returned exactly
/// once, after the last chunk; implementations must return an error if called
/// again afterwards. Any `Err` is treated as fatal for the whole run.
pub trait ChunkSource {
    type Payload: ChunkUnits + Send + 'static;

    fn next_chunk(&mut self) -> Result<Option<Chunk<Self::Payload>>>;

    /// Total units the source expects to produce, when cheaply known.
    fn total_units(&self) -> Option<u64> {
        None
    }
}

impl<S: ChunkSource + ?Sized> ChunkSource for Box<S> {
    type Payload = S::Payload;

    fn next_chunk(&mut self) -> Result<Option<Chunk<Self::Payload>>> {
        (**self).next_chunk()
    }

    fn total_units(&self) -> Option<u64> {
        (**self).total_units()
    }
}

/// Materializes one chunk. Must be safe to call concurrently on different chunks
/// and idempotent for the same chunk.
pub trait ChunkSink<P>: Send + Sync {
    /// Destination for chunk `index`, a pure function of the index.
    fn destination(&self, _index: u64) -> Option<PathBuf> {
        None
    }

    /// Called on the driver thread once the chunk holds an in-flight slot, just
    /// before it is handed to the pool. Calls arrive in index order.
    fn on_submit(&self, _index: u64) {}

    fn process(&self, job: &Job<P>) -> Result<ChunkMeta>;
}

/// Index/offset bookkeeping shared by the built-in sources.
///
/// Enforces the end-of-stream contract: [`SourceCursor::finish`] yields `None`
/// once, and any later call to [`SourceCursor::check_open`] errors.
#[derive(Clone, Debug, Default)]
pub struct SourceCursor {
    next_index: u64,
    offset: u64,
    exhausted: bool,
}

impl SourceCursor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Errors if end-of-stream was already signalled.
    pub fn check_open(&self) -> Result<()> {
        if self.exhausted {
            bail!("next_chunk called after end of stream (after chunk {})", self.next_index);
        }
        Ok(())
    }

    /// Wrap `payload` as the next chunk and advance by its size.
    pub fn emit<P: ChunkUnits>(&mut self, payload: P) -> Chunk<P> {
        let chunk = Chunk {
            index: self.next_index,
            offset: self.offset,
            payload,
        };
        self.next_index += 1;
        self.offset += chunk.payload.units();
        chunk
    }

    /// Mark end-of-stream.
    pub fn finish<P>(&mut self) -> Option<Chunk<P>> {
        self.exhausted = true;
        None
    }

    #[must_use]
    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }
}

/// Forwards only the chunks whose index is in `keep`, e.g. to retry the failed
/// indices of an earlier run. Skipped chunks are still read, so positions stay
/// consistent with the original run.
pub struct OnlyIndices<S> {
    inner: S,
    keep: BTreeSet<u64>,
    done: bool,
}

impl<S: ChunkSource> OnlyIndices<S> {
    pub fn new(inner: S, keep: impl IntoIterator<Item = u64>) -> Self {
        Self {
            inner,
            keep: keep.into_iter().collect(),
            done: false,
        }
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: ChunkSource> ChunkSource for OnlyIndices<S> {
    type Payload = S::Payload;

    fn next_chunk(&mut self) -> Result<Option<Chunk<Self::Payload>>> {
        if self.done {
            bail!("next_chunk called after end of stream");
        }
        loop {
            // Stop early once every wanted index has been seen.
            let Some(&max_wanted) = self.keep.last() else {
                self.done = true;
                return Ok(None);
            };
            match self.inner.next_chunk()? {
                Some(chunk) if self.keep.remove(&chunk.index) => return Ok(Some(chunk)),
                Some(chunk) if chunk.index > max_wanted => {
                    self.done = true;
                    return Ok(None);
                }
                Some(_) => {}
                None => {
                    self.done = true;
                    return Ok(None);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counting {
        cursor: SourceCursor,
        remaining: u64,
        per_chunk: u64,
    }

    impl ChunkSource for Counting {
        type Payload = ByteRange;

        fn next_chunk(&mut self) -> Result<Option<Chunk<ByteRange>>> {
            self.cursor.check_open()?;
            if self.remaining == 0 {
                return Ok(self.cursor.finish());
            }
            let len = self.per_chunk.min(self.remaining);
            self.remaining -= len;
            let offset = self.cursor.offset();
            Ok(Some(self.cursor.emit(ByteRange { offset, len })))
        }
    }

    #[test]
    fn cursor_advances_and_refuses_after_eos() {
        let mut src = Counting {
            cursor: SourceCursor::new(),
            remaining: 25,
            per_chunk: 10,
        };
        let a = src.next_chunk().unwrap().unwrap();
        let b = src.next_chunk().unwrap().unwrap();
        let c = src.next_chunk().unwrap().unwrap();
        assert_eq!((a.index, a.offset, a.units()), (0, 0, 10));
        assert_eq!((b.index, b.offset, b.units()), (1, 10, 10));
        assert_eq!((c.index, c.offset, c.units()), (2, 20, 5));
        assert!(src.next_chunk().unwrap().is_none());
        assert!(src.next_chunk().is_err());
    }

    #[test]
    fn only_indices_filters_and_stops_early() {
        let src = Counting {
            cursor: SourceCursor::new(),
            remaining: 100,
            per_chunk: 10,
        };
        let mut only = OnlyIndices::new(src, [1, 4]);
        assert_eq!(only.next_chunk().unwrap().unwrap().index, 1);
        assert_eq!(only.next_chunk().unwrap().unwrap().index, 4);
        assert!(only.next_chunk().unwrap().is_none());
        assert!(only.next_chunk().is_err());
        // Stopped after chunk 4 instead of reading the whole source.
        assert_eq!(only.into_inner().cursor.next_index(), 5);
    }

    #[test]
    fn job_states() {
        assert!(JobState::Running.is_inflight());
        assert!(JobState::Submitted.is_inflight());
        assert!(!JobState::Created.is_inflight());
        assert!(JobState::Failed.is_terminal());
        assert!(!JobState::Running.is_terminal());
    }
}
