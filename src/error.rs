//! Error types for pipeline runs.
//!
//! Two layers of failure exist:
//!
//! - [`PipelineError`] is terminal. It is returned instead of a
//!   [`PipelineResult`](crate::PipelineResult) when the run cannot be trusted to
//!   continue: bad configuration, a broken source stream, or a dead worker pool.
//! - [`ChunkFailure`] is local to one chunk. It is recorded inside the result and
//!   never stops the other chunks unless fail-fast is enabled.
//!
//! Collaborators (sources, sinks, object stores) report through `anyhow::Error`;
//! the driver folds those into one of the two shapes above.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Terminal errors surfaced by [`PipelineDriver`](crate::PipelineDriver).
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Rejected before any work started.
    #[error("invalid pipeline configuration: {0}")]
    ConfigInvalid(String),

    /// The chunk source could not continue. `index` is the index the failed read
    /// would have produced. In-flight jobs were drained before this was returned.
    #[error("chunk source failed at chunk {index}: {source:#}")]
    SourceFatal {
        index: u64,
        #[source]
        source: anyhow::Error,
    },

    /// The worker pool could not be built or its completion channel closed early.
    #[error("worker pool failure: {0}")]
    WorkerPool(String),
}

impl PipelineError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::ConfigInvalid(message.into())
    }

    /// `true` for [`PipelineError::ConfigInvalid`].
    #[must_use]
    pub fn is_config(&self) -> bool {
        matches!(self, Self::ConfigInvalid(_))
    }

    /// `true` for [`PipelineError::SourceFatal`].
    #[must_use]
    pub fn is_source_fatal(&self) -> bool {
        matches!(self, Self::SourceFatal { .. })
    }
}

/// One failed sink invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkFailure {
    pub index: u64,
    /// Full error chain, outermost context first.
    pub reason: String,
}

impl ChunkFailure {
    pub(crate) fn from_error(index: u64, err: &anyhow::Error) -> Self {
        Self {
            index,
            reason: format!("{err:#}"),
        }
    }

    pub(crate) fn from_panic(index: u64, payload: &(dyn std::any::Any + Send)) -> Self {
        let msg = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_string());
        Self {
            index,
            reason: format!("sink panicked: {msg}"),
        }
    }
}

impl fmt::Display for ChunkFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chunk {}: {}", self.index, self.reason)
    }
}
