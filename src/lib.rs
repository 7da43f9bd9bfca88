//! # Ironshard
//!
//! A **bounded chunked pipeline** for Rust: split a large dataset into ordered
//! chunks, hand each chunk to a pool of workers, and keep memory bounded by
//! capping how many chunks are outstanding at once.
//!
//! ## Key Features
//!
//! - **Sequential producer** - a [`ChunkSource`] yields chunks with strictly
//!   increasing indices; only the driver ever calls it
//! - **Bounded in-flight work** - the [`InflightLimiter`] blocks production while
//!   `max_inflight` chunks are submitted but not finished
//! - **Fixed worker pool** - at most `max_workers` chunks run at once
//! - **Failure isolation** - a failing chunk is recorded in the [`PipelineResult`]
//!   and never stops its siblings (unless fail-fast is on)
//! - **Idempotent sinks** - destinations are a pure function of the chunk index,
//!   so a retry of the failed indices fills the holes and nothing else
//! - **Built-in I/O** - CSV, JSON Lines and Parquet rows (optionally compressed)
//!   and byte-range downloads from an [`ObjectStore`](io::ObjectStore)
//!
//! ## Quick Start
//!
//! ```no_run
//! use ironshard::io::{RowPartitionSink, open_row_source};
//! use ironshard::testing::SampleRow;
//! use ironshard::{LogProgress, PipelineConfig, PipelineDriver};
//! use std::sync::Arc;
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = PipelineConfig::new(100_000)
//!     .with_workers(4)
//!     .with_max_inflight(8)
//!     .with_output_root("out")
//!     .with_naming("part-{index:05}.parquet")?;
//!
//! let source = open_row_source::<SampleRow>("input.csv.gz", 100_000)?;
//! let sink = Arc::new(RowPartitionSink::<SampleRow>::new(&config)?);
//!
//! let driver = PipelineDriver::new(config)?.with_observer(Arc::new(LogProgress::new("export")));
//! let result = driver.run(source, sink)?;
//! result.save_manifest("out/manifest.json")?;
//!
//! for index in result.failed_indices() {
//!     eprintln!("chunk {index} failed: {}", result.failures[&index].reason);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Retrying failed chunks
//!
//! ```no_run
//! use ironshard::io::{RowPartitionSink, open_row_source};
//! use ironshard::testing::SampleRow;
//! use ironshard::{OnlyIndices, PipelineConfig, PipelineDriver, PipelineResult};
//! use std::sync::Arc;
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = PipelineConfig::from_json_file("pipeline.json")?;
//! let mut first = PipelineResult::load_manifest("out/manifest.json")?;
//!
//! let source = OnlyIndices::new(
//!     open_row_source::<SampleRow>("input.csv.gz", config.chunk_size as usize)?,
//!     first.failed_indices(),
//! );
//! let sink = Arc::new(RowPartitionSink::<SampleRow>::new(&config)?);
//! let retry = PipelineDriver::new(config)?.run(source, sink)?;
//! first.merge_retry(retry);
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `io-jsonl` - JSON Lines sources and sinks
//! - `io-csv` - CSV sources and sinks
//! - `io-parquet` - Parquet sources and sinks (requires Arrow)
//! - `compression-gzip`, `compression-zstd`, `compression-bzip2`, `compression-xz` -
//!   transparent compression by file extension
//!
//! All are on by default.
//!
//! ## Logging
//!
//! The crate logs through [`tracing`] and never installs a subscriber. Run
//! start/end are `info`, per-chunk submission and completion are `debug`, chunk
//! failures, source failures and cancellation are `warn`.
//!
//! ## Module Overview
//!
//! - [`driver`] - [`PipelineDriver`] and [`CancellationToken`]
//! - [`chunk`] - chunks, jobs, and the [`ChunkSource`]/[`ChunkSink`] traits
//! - [`limiter`] - the in-flight bound
//! - [`pool`] - the fixed worker pool
//! - [`config`] - [`PipelineConfig`] and its validation
//! - [`naming`] - index → file name templates
//! - [`result`] - [`PipelineResult`] and the JSON manifest
//! - [`progress`] - progress observers
//! - [`io`] - built-in sources and sinks
//! - [`testing`] - scripted sinks and probes for tests

pub mod chunk;
pub mod config;
pub mod driver;
pub mod error;
pub mod io;
pub mod limiter;
pub mod naming;
pub mod pool;
pub mod progress;
pub mod result;
pub mod testing;

pub use chunk::{ByteRange, Chunk, ChunkMeta, ChunkSink, ChunkSource, ChunkUnits, Job, JobState, OnlyIndices, SourceCursor};
pub use config::PipelineConfig;
pub use driver::{CancellationToken, PipelineDriver};
pub use error::{ChunkFailure, PipelineError};
pub use limiter::{InflightLimiter, InflightPermit};
pub use naming::NamingTemplate;
pub use pool::{Completion, WorkerPool};
pub use progress::{CollectingObserver, LogProgress, Progress, ProgressObserver};
pub use result::{PipelineResult, RunOutcome};
