//! The pipeline driver: one sequential producer, a bounded number of
//! outstanding jobs, and a fixed pool of workers.
//!
//! ```text
//!  ChunkSource ──next_chunk──▶ Driver ──acquire──▶ InflightLimiter
//!                                │                       ▲
//!                                ▼ submit                │ permit dropped
//!                            WorkerPool ──▶ ChunkSink ───┘
//!                                │
//!                                ▼ Completion (any order)
//!                             Driver folds into PipelineResult
//! ```
//!
//! The driver is the only caller of the source and the only writer of the
//! result. Backpressure is applied in exactly one place: `acquire()` blocks the
//! producer while `max_inflight` jobs are outstanding. Completions are polled
//! without blocking after every submission and awaited one by one during the
//! final drain.
//!
//! # Stopping early
//!
//! Production stops when the source is exhausted, when the source fails
//! (`SourceFatal`), when fail-fast is on and a chunk failed, or when the
//! [`CancellationToken`] fires. In every case the driver stops calling the
//! source, closes the pool to new work, and **awaits** every job already
//! submitted (folding each as it finishes) before returning, so no job is abandoned mid-write.

use crate::chunk::{ChunkSink, ChunkSource, ChunkUnits, Job, JobState};
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::limiter::InflightLimiter;
use crate::pool::{Completion, WorkerPool};
use crate::progress::{Progress, ProgressObserver};
use crate::result::{PipelineResult, RunOutcome};
use anyhow::anyhow;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{debug, info, trace, warn};

/// Cooperative cancellation flag shared between the caller and the driver.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Orchestrates one or more pipeline runs with a fixed configuration.
pub struct PipelineDriver {
    config: PipelineConfig,
    observer: Option<Arc<dyn ProgressObserver>>,
    cancel: CancellationToken,
}

/// Per-run bookkeeping, owned by the driver thread.
struct RunState {
    result: PipelineResult,
    /// Submitted jobs whose completion has not been folded yet, with their units.
    outstanding: HashMap<u64, u64>,
    progress: Progress,
}

impl PipelineDriver {
    /// # Errors
    /// [`PipelineError::ConfigInvalid`] if the configuration does not validate.
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self {
            config,
            observer: None,
            cancel: CancellationToken::new(),
        })
    }

    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// A handle that cancels this driver's runs.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run `source` through `sink` to completion.
    ///
    /// Returns a [`PipelineResult`] whenever the source could be read to the end
    /// (or production was stopped on purpose), even if chunks failed.
    ///
    /// # Errors
    /// - [`PipelineError::SourceFatal`] if the source fails or violates its
    ///   contract; submitted jobs are drained first.
    /// - [`PipelineError::WorkerPool`] if the pool cannot start.
    pub fn run<S, K>(&self, mut source: S, sink: Arc<K>) -> Result<PipelineResult, PipelineError>
    where
        S: ChunkSource,
        K: ChunkSink<S::Payload> + 'static,
    {
        let started = Instant::now();
        let max_inflight = self.config.effective_max_inflight();
        let pool = WorkerPool::new(self.config.max_workers)?;
        let limiter = Arc::new(InflightLimiter::new(max_inflight));

        let mut run = RunState {
            result: PipelineResult::new(),
            outstanding: HashMap::with_capacity(max_inflight),
            progress: Progress {
                total_estimate: source.total_units(),
                ..Progress::default()
            },
        };

        info!(
            chunk_size = self.config.chunk_size,
            max_workers = self.config.max_workers,
            max_inflight,
            total = ?run.progress.total_estimate,
            "pipeline run starting"
        );

        let mut fatal: Option<PipelineError> = None;
        let mut last_index: Option<u64> = None;

        loop {
            if self.cancel.is_cancelled() {
                warn!(produced = run.result.chunks_produced, "pipeline cancelled; draining");
                run.result.outcome = RunOutcome::Cancelled;
                break;
            }
            if self.config.fail_fast && !run.result.failures.is_empty() {
                warn!(
                    produced = run.result.chunks_produced,
                    "fail-fast: chunk failure recorded; draining"
                );
                run.result.outcome = RunOutcome::FailedFast;
                break;
            }

            let expected = last_index.map_or(0, |i| i + 1);
            let chunk = match source.next_chunk() {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(err) => {
                    fatal = Some(PipelineError::SourceFatal {
                        index: expected,
                        source: err,
                    });
                    break;
                }
            };
            if let Err(err) = self.check_chunk(last_index, chunk.index, chunk.payload.units()) {
                fatal = Some(PipelineError::SourceFatal {
                    index: chunk.index,
                    source: err,
                });
                break;
            }
            last_index = Some(chunk.index);

            // Backpressure: blocks while max_inflight jobs are outstanding.
            let permit = limiter.acquire_owned();

            let index = chunk.index;
            let units = chunk.payload.units();
            let job = Job::new(chunk, sink.destination(index));
            trace!(index, state = ?JobState::Created, "job created");
            sink.on_submit(index);
            let worker_sink = Arc::clone(&sink);
            pool.submit(index, move || {
                let _permit = permit;
                trace!(index, state = ?JobState::Running, "job running");
                worker_sink.process(&job)
            })?;

            run.outstanding.insert(index, units);
            run.result.chunks_produced += 1;
            debug!(
                index,
                units,
                state = ?JobState::Submitted,
                in_flight = limiter.in_flight(),
                "chunk submitted"
            );

            self.drain_completed(&pool, &mut run);
        }

        if let Some(err) = &fatal {
            warn!(error = %err, "chunk source failed; draining submitted jobs");
        }

        // Nothing new may be submitted from here on. Fold each straggler as it
        // lands so progress keeps moving through the tail of the run.
        pool.close();
        while !run.outstanding.is_empty() {
            let completion = pool.next_completion()?;
            self.fold(completion, &mut run);
        }
        pool.shutdown();

        run.result.peak_in_flight = limiter.peak_in_flight();
        run.result.peak_running = pool.peak_running();
        run.result.elapsed = started.elapsed();

        info!(
            outcome = ?run.result.outcome,
            produced = run.result.chunks_produced,
            succeeded = run.result.successes.len(),
            failed = run.result.failures.len(),
            units = run.result.units_completed,
            peak_in_flight = run.result.peak_in_flight,
            elapsed_ms = run.result.elapsed.as_millis() as u64,
            "pipeline run finished"
        );

        match fatal {
            Some(err) => Err(err),
            None => Ok(run.result),
        }
    }

    /// Chunk indices must strictly increase and payloads must respect `chunk_size`.
    fn check_chunk(&self, last: Option<u64>, index: u64, units: u64) -> anyhow::Result<()> {
        if let Some(last) = last
            && index <= last
        {
            return Err(anyhow!(
                "chunk index {index} does not follow {last}; indices must strictly increase"
            ));
        }
        if units > self.config.chunk_size {
            return Err(anyhow!(
                "chunk {index} holds {units} units, more than chunk_size {}",
                self.config.chunk_size
            ));
        }
        Ok(())
    }

    /// Fold every completion that is already available, without blocking.
    fn drain_completed(&self, pool: &WorkerPool, run: &mut RunState) {
        while let Some(completion) = pool.try_next_completion() {
            self.fold(completion, run);
        }
    }

    fn fold(&self, completion: Completion, run: &mut RunState) {
        let Completion {
            index,
            outcome,
            elapsed,
        } = completion;
        let Some(units) = run.outstanding.remove(&index) else {
            warn!(index, "completion for a chunk that is not outstanding; ignored");
            return;
        };

        match outcome {
            Ok(mut meta) => {
                meta.units = units;
                debug!(
                    index,
                    units,
                    state = ?JobState::Succeeded,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "chunk done"
                );
                run.result.record_success(index, meta);
                run.progress.units_completed += units;
            }
            Err(failure) => {
                warn!(index, state = ?JobState::Failed, reason = %failure.reason, "chunk failed");
                run.result.record_failure(failure);
                run.progress.chunks_failed += 1;
            }
        }
        run.progress.chunks_completed += 1;

        if let Some(observer) = &self.observer {
            observer.on_progress(&run.progress);
        }
    }
}
