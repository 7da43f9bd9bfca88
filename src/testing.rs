//! Fixtures for testing pipelines and the sinks/sources plugged into them.
//!
//! - [`ScriptedSink`]: a sink whose latency, failures and panics are scripted per
//!   chunk index, and which records the order chunks were submitted and finished.
//! - [`ConcurrencyProbe`]: current/peak counter for "how many ran at once".
//! - [`CollectingObserver`]: keeps every progress snapshot.
//! - [`sample_rows`]: deterministic typed rows for the tabular sinks.
//!
//! ```
//! use ironshard::testing::ScriptedSink;
//! use ironshard::io::VecRowSource;
//! use ironshard::{PipelineConfig, PipelineDriver};
//! use std::sync::Arc;
//!
//! # fn main() -> anyhow::Result<()> {
//! let sink = Arc::new(ScriptedSink::new().fail_at([1]));
//! let driver = PipelineDriver::new(PipelineConfig::new(10).with_workers(2))?;
//! let result = driver.run(VecRowSource::new((0..30).collect::<Vec<u32>>(), 10)?, Arc::clone(&sink))?;
//! assert_eq!(result.failed_indices(), vec![1]);
//! assert_eq!(sink.submitted(), vec![0, 1, 2]);
//! # Ok(())
//! # }
//! ```

pub mod fixtures;
pub mod probe;
pub mod scripted;

pub use crate::progress::CollectingObserver;
pub use fixtures::{SampleRow, sample_rows};
pub use probe::{ConcurrencyProbe, ProbeGuard};
pub use scripted::ScriptedSink;
