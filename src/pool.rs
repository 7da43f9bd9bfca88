//! Fixed-size worker pool with a completion channel.
//!
//! Jobs are spawned onto a dedicated rayon [`ThreadPool`] with `max_workers`
//! threads; rayon queues anything beyond the free threads. Each job reports back
//! on a crossbeam channel as a [`Completion`] tagged with its chunk index, which
//! is how the driver learns that a job finished (in whatever order they finish).

use crate::chunk::ChunkMeta;
use crate::error::{ChunkFailure, PipelineError};
use anyhow::Result;
use crossbeam_channel::{Receiver, Sender, TryRecvError, unbounded};
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Outcome of one job, delivered to the driver.
#[derive(Debug)]
pub struct Completion {
    pub index: u64,
    pub outcome: Result<ChunkMeta, ChunkFailure>,
    pub elapsed: Duration,
}

#[derive(Debug, Default)]
struct PoolState {
    running: AtomicUsize,
    peak_running: AtomicUsize,
    outstanding: Mutex<usize>,
    idle: Condvar,
}

impl PoolState {
    fn finish_one(&self) {
        let mut n = self.outstanding.lock().unwrap_or_else(|e| e.into_inner());
        *n -= 1;
        if *n == 0 {
            self.idle.notify_all();
        }
    }
}

#[derive(Debug)]
pub struct WorkerPool {
    pool: ThreadPool,
    max_workers: usize,
    tx: Sender<Completion>,
    rx: Receiver<Completion>,
    state: Arc<PoolState>,
    closed: AtomicBool,
}

impl WorkerPool {
    /// # Errors
    /// [`PipelineError::ConfigInvalid`] for zero workers, [`PipelineError::WorkerPool`]
    /// if the OS refuses to start the threads.
    pub fn new(max_workers: usize) -> Result<Self, PipelineError> {
        if max_workers == 0 {
            return Err(PipelineError::config("max_workers must be at least 1"));
        }
        let pool = ThreadPoolBuilder::new()
            .num_threads(max_workers)
            .thread_name(|i| format!("ironshard-worker-{i}"))
            .build()
            .map_err(|e| PipelineError::WorkerPool(e.to_string()))?;
        let (tx, rx) = unbounded();
        Ok(Self {
            pool,
            max_workers,
            tx,
            rx,
            state: Arc::new(PoolState::default()),
            closed: AtomicBool::new(false),
        })
    }

    /// Queue `work` for chunk `index`. Panics inside `work` become a
    /// [`ChunkFailure`] for that chunk only.
    ///
    /// # Errors
    /// [`PipelineError::WorkerPool`] after [`shutdown`](Self::shutdown).
    pub fn submit<F>(&self, index: u64, work: F) -> Result<(), PipelineError>
    where
        F: FnOnce() -> Result<ChunkMeta> + Send + 'static,
    {
        if self.closed.load(Ordering::Acquire) {
            return Err(PipelineError::WorkerPool(format!(
                "pool is shut down; rejected chunk {index}"
            )));
        }
        *self.state.outstanding.lock().unwrap_or_else(|e| e.into_inner()) += 1;

        let tx = self.tx.clone();
        let state = Arc::clone(&self.state);
        self.pool.spawn(move || {
            let now = state.running.fetch_add(1, Ordering::AcqRel) + 1;
            state.peak_running.fetch_max(now, Ordering::Relaxed);
            let started = Instant::now();

            let outcome = match catch_unwind(AssertUnwindSafe(work)) {
                Ok(Ok(meta)) => Ok(meta),
                Ok(Err(err)) => Err(ChunkFailure::from_error(index, &err)),
                Err(panic) => Err(ChunkFailure::from_panic(index, panic.as_ref())),
            };

            state.running.fetch_sub(1, Ordering::AcqRel);
            // The receiver lives as long as the pool; a send error means the
            // driver is gone and nobody wants the result.
            let _ = tx.send(Completion {
                index,
                outcome,
                elapsed: started.elapsed(),
            });
            state.finish_one();
        });
        Ok(())
    }

    /// Non-blocking poll for one finished job.
    pub fn try_next_completion(&self) -> Option<Completion> {
        match self.rx.try_recv() {
            Ok(c) => Some(c),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Block until some job finishes.
    ///
    /// # Errors
    /// [`PipelineError::WorkerPool`] if nothing is outstanding (the call would
    /// never return).
    pub fn next_completion(&self) -> Result<Completion, PipelineError> {
        if let Some(c) = self.try_next_completion() {
            return Ok(c);
        }
        if self.outstanding() == 0 {
            // Workers send before they count themselves finished, so every
            // completion is in the channel by now.
            return self.try_next_completion().ok_or_else(|| {
                PipelineError::WorkerPool("waited for a completion with no outstanding jobs".into())
            });
        }
        self.rx
            .recv()
            .map_err(|e| PipelineError::WorkerPool(e.to_string()))
    }

    /// Reject further submissions without waiting for running jobs.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Reject further submissions and wait for every submitted job to finish.
    /// Running work is never cancelled. Completions stay readable afterwards.
    pub fn shutdown(&self) {
        self.close();
        let mut n = self.state.outstanding.lock().unwrap_or_else(|e| e.into_inner());
        while *n > 0 {
            n = self.state.idle.wait(n).unwrap_or_else(|e| e.into_inner());
        }
    }

    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Submitted jobs that have not yet reported a completion.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        *self.state.outstanding.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Jobs currently executing on a worker thread.
    #[must_use]
    pub fn running(&self) -> usize {
        self.state.running.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn peak_running(&self) -> usize {
        self.state.peak_running.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn max_workers(&self) -> usize {
        self.max_workers
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
