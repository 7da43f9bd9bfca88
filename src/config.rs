//! Pipeline configuration.
//!
//! [`PipelineConfig`] is an explicit value handed to the driver; nothing is read
//! from process-wide state. It deserializes from JSON with defaults for every
//! field, and [`PipelineConfig::validate`] runs before any work starts.
//!
//! ```
//! use ironshard::PipelineConfig;
//!
//! let cfg = PipelineConfig::new(100_000)
//!     .with_workers(4)
//!     .with_max_inflight(8)
//!     .with_output_root("out")
//!     .with_naming("part-{index:05}.parquet")
//!     .unwrap();
//! assert!(cfg.validate().is_ok());
//! ```

use crate::error::PipelineError;
use crate::naming::NamingTemplate;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Units (rows or bytes) per chunk.
    pub chunk_size: u64,
    /// Concurrent execution slots.
    pub max_workers: usize,
    /// Cap on submitted-but-not-completed jobs. `None` means `max_workers`.
    pub max_inflight: Option<usize>,
    /// Directory per-chunk artifacts are written under.
    pub output_root: PathBuf,
    /// File name for each chunk, a function of its index.
    pub naming: NamingTemplate,
    /// Stop submitting after the first chunk failure.
    pub fail_fast: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_size: 100_000,
            max_workers: num_cpus::get().max(1),
            max_inflight: None,
            output_root: PathBuf::from("."),
            naming: NamingTemplate::default(),
            fail_fast: false,
        }
    }
}

impl PipelineConfig {
    #[must_use]
    pub fn new(chunk_size: u64) -> Self {
        Self {
            chunk_size,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    #[must_use]
    pub fn with_max_inflight(mut self, max_inflight: usize) -> Self {
        self.max_inflight = Some(max_inflight);
        self
    }

    #[must_use]
    pub fn with_output_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.output_root = root.into();
        self
    }

    /// # Errors
    /// [`PipelineError::ConfigInvalid`] if the template is not injective.
    pub fn with_naming(mut self, template: &str) -> Result<Self, PipelineError> {
        self.naming = NamingTemplate::parse(template)?;
        Ok(self)
    }

    #[must_use]
    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    /// The in-flight cap actually used.
    #[must_use]
    pub fn effective_max_inflight(&self) -> usize {
        self.max_inflight.unwrap_or(self.max_workers)
    }

    /// Path of chunk `index`'s artifact.
    #[must_use]
    pub fn destination(&self, index: u64) -> PathBuf {
        self.naming.path_for(&self.output_root, index)
    }

    /// # Errors
    /// [`PipelineError::ConfigInvalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.chunk_size == 0 {
            return Err(PipelineError::config("chunk_size must be at least 1"));
        }
        if self.max_workers == 0 {
            return Err(PipelineError::config("max_workers must be at least 1"));
        }
        if self.max_inflight == Some(0) {
            return Err(PipelineError::config("max_inflight must be at least 1"));
        }
        Ok(())
    }

    /// Load from a JSON file. Missing fields take their defaults.
    ///
    /// # Errors
    /// I/O or parse failures, or a configuration rejected by [`validate`](Self::validate).
    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let f = File::open(path).with_context(|| format!("open {}", path.display()))?;
        let cfg: Self = serde_json::from_reader(BufReader::new(f))
            .with_context(|| format!("parse pipeline config {}", path.display()))?;
        cfg.validate()?;
        Ok(cfg)
    }
}
