//! Run summary and JSON manifest.

use crate::chunk::ChunkMeta;
use crate::error::ChunkFailure;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::time::Duration;

/// How a run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// The source ran dry and every job was drained.
    Completed,
    /// Fail-fast stopped production after the first chunk failure.
    FailedFast,
    /// Cancelled before the source ran dry; submitted jobs were still awaited.
    Cancelled,
}

/// Aggregate outcome of one pipeline run.
///
/// Built by the driver as completions arrive and handed out once the source is
/// exhausted (or production stopped) and every in-flight job has drained.
/// Successes and failures are keyed by chunk index because completion order
/// carries no meaning.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PipelineResult {
    pub outcome: RunOutcome,
    /// Chunks read from the source and submitted.
    pub chunks_produced: u64,
    /// Rows or bytes across successful chunks.
    pub units_completed: u64,
    /// Bytes written by sinks across successful chunks.
    pub bytes_written: u64,
    pub successes: BTreeMap<u64, ChunkMeta>,
    pub failures: BTreeMap<u64, ChunkFailure>,
    /// Highest number of jobs outstanding at once (bounded by `max_inflight`).
    #[serde(default)]
    pub peak_in_flight: usize,
    /// Highest number of jobs executing at once (bounded by `max_workers`).
    #[serde(default)]
    pub peak_running: usize,
    #[serde(with = "duration_ms")]
    pub elapsed: Duration,
}

impl PipelineResult {
    pub(crate) fn new() -> Self {
        Self {
            outcome: RunOutcome::Completed,
            chunks_produced: 0,
            units_completed: 0,
            bytes_written: 0,
            successes: BTreeMap::new(),
            failures: BTreeMap::new(),
            peak_in_flight: 0,
            peak_running: 0,
            elapsed: Duration::ZERO,
        }
    }

    pub(crate) fn record_success(&mut self, index: u64, meta: ChunkMeta) {
        self.units_completed += meta.units;
        self.bytes_written += meta.bytes_written;
        self.successes.insert(index, meta);
    }

    pub(crate) fn record_failure(&mut self, failure: ChunkFailure) {
        self.failures.insert(failure.index, failure);
    }

    /// Indices that succeeded, ascending.
    #[must_use]
    pub fn succeeded_indices(&self) -> Vec<u64> {
        self.successes.keys().copied().collect()
    }

    /// Indices that failed, ascending. Feed into
    /// [`OnlyIndices`](crate::OnlyIndices) to retry them.
    #[must_use]
    pub fn failed_indices(&self) -> Vec<u64> {
        self.failures.keys().copied().collect()
    }

    #[must_use]
    pub fn chunks_completed(&self) -> u64 {
        (self.successes.len() + self.failures.len()) as u64
    }

    /// Every produced chunk succeeded and the run was not cut short.
    #[must_use]
    pub fn is_complete_success(&self) -> bool {
        self.outcome == RunOutcome::Completed
            && self.failures.is_empty()
            && self.successes.len() as u64 == self.chunks_produced
    }

    /// Fold a retry run into this one: its successes clear matching failures.
    pub fn merge_retry(&mut self, retry: PipelineResult) {
        for (index, meta) in retry.successes {
            self.failures.remove(&index);
            if let Some(old) = self.successes.insert(index, meta.clone()) {
                self.units_completed -= old.units;
                self.bytes_written -= old.bytes_written;
            }
            self.units_completed += meta.units;
            self.bytes_written += meta.bytes_written;
        }
        for (index, failure) in retry.failures {
            if !self.successes.contains_key(&index) {
                self.failures.insert(index, failure);
            }
        }
        self.elapsed += retry.elapsed;
    }

    /// Write the result as pretty JSON.
    ///
    /// # Errors
    /// File creation or serialization failures.
    pub fn save_manifest(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let f = File::create(path).with_context(|| format!("create {}", path.display()))?;
        let mut w = BufWriter::new(f);
        serde_json::to_writer_pretty(&mut w, self)
            .with_context(|| format!("serialize manifest {}", path.display()))?;
        w.flush()?;
        Ok(())
    }

    /// # Errors
    /// File or JSON errors.
    pub fn load_manifest(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let f = File::open(path).with_context(|| format!("open {}", path.display()))?;
        serde_json::from_reader(BufReader::new(f))
            .with_context(|| format!("parse manifest {}", path.display()))
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    #[allow(clippy::cast_possible_truncation)]
    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
