use crate::chunk::{ChunkMeta, ChunkSink, ChunkUnits, Job};
use crate::testing::probe::ConcurrencyProbe;
use anyhow::{Result, bail};
use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

type LatencyFn = Box<dyn Fn(u64) -> Duration + Send + Sync>;

/// A sink that does no I/O and follows a script instead.
///
/// Submissions are recorded through [`ChunkSink::on_submit`]. At each one the
/// sink also notes how many submitted chunks have not finished `process` yet,
/// which bounds the driver's in-flight set from the outside.
pub struct ScriptedSink {
    latency: LatencyFn,
    failures: Mutex<HashMap<u64, u32>>,
    panics: BTreeSet<u64>,
    probe: ConcurrencyProbe,
    submitted: Mutex<Vec<u64>>,
    completed: Mutex<Vec<u64>>,
    peak_unfinished: AtomicUsize,
}

impl Default for ScriptedSink {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedSink {
    #[must_use]
    pub fn new() -> Self {
        Self {
            latency: Box::new(|_| Duration::ZERO),
            failures: Mutex::new(HashMap::new()),
            panics: BTreeSet::new(),
            probe: ConcurrencyProbe::new(),
            submitted: Mutex::new(Vec::new()),
            completed: Mutex::new(Vec::new()),
            peak_unfinished: AtomicUsize::new(0),
        }
    }

    /// Sleep for `latency(index)` before finishing each chunk.
    #[must_use]
    pub fn with_latency(mut self, latency: impl Fn(u64) -> Duration + Send + Sync + 'static) -> Self {
        self.latency = Box::new(latency);
        self
    }

    /// Same sleep for every chunk.
    #[must_use]
    pub fn with_fixed_latency(self, latency: Duration) -> Self {
        self.with_latency(move |_| latency)
    }

    /// Fail these indices on every attempt.
    #[must_use]
    pub fn fail_at(self, indices: impl IntoIterator<Item = u64>) -> Self {
        self.fail_times(indices, u32::MAX)
    }

    /// Fail these indices on their first `times` attempts, then succeed.
    #[must_use]
    pub fn fail_times(self, indices: impl IntoIterator<Item = u64>, times: u32) -> Self {
        {
            let mut failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
            for i in indices {
                failures.insert(i, times);
            }
        }
        self
    }

    /// Panic inside the sink for these indices.
    #[must_use]
    pub fn panic_at(mut self, indices: impl IntoIterator<Item = u64>) -> Self {
        self.panics.extend(indices);
        self
    }

    /// Indices in the order they were handed to the worker pool.
    #[must_use]
    pub fn submitted(&self) -> Vec<u64> {
        self.submitted.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Indices in the order their work finished, failed ones included.
    #[must_use]
    pub fn completed(&self) -> Vec<u64> {
        self.completed.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Most chunks ever submitted but not yet through `process`, sampled at
    /// each submission (the new chunk included).
    #[must_use]
    pub fn peak_unfinished(&self) -> usize {
        self.peak_unfinished.load(Ordering::SeqCst)
    }

    /// Counts chunks inside `process` at once.
    #[must_use]
    pub fn probe(&self) -> &ConcurrencyProbe {
        &self.probe
    }

    fn should_fail(&self, index: u64) -> bool {
        let mut failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
        match failures.get_mut(&index) {
            Some(0) | None => false,
            Some(left) => {
                if *left != u32::MAX {
                    *left -= 1;
                }
                true
            }
        }
    }
}

impl<P: ChunkUnits> ChunkSink<P> for ScriptedSink {
    fn on_submit(&self, index: u64) {
        let mut submitted = self.submitted.lock().unwrap_or_else(|e| e.into_inner());
        submitted.push(index);
        let done = self.completed.lock().unwrap_or_else(|e| e.into_inner()).len();
        self.peak_unfinished
            .fetch_max(submitted.len().saturating_sub(done), Ordering::SeqCst);
    }

    fn process(&self, job: &Job<P>) -> Result<ChunkMeta> {
        let index = job.index();
        let _inside = self.probe.enter();
        thread::sleep((self.latency)(index));

        let outcome = if self.panics.contains(&index) {
            None
        } else {
            Some(self.should_fail(index))
        };
        self.completed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(index);

        match outcome {
            None => panic!("scripted panic at chunk {index}"),
            Some(true) => bail!("scripted failure at chunk {index}"),
            Some(false) => Ok(ChunkMeta {
                units: job.chunk.payload.units(),
                ..ChunkMeta::default()
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{ByteRange, Chunk};

    fn job(index: u64) -> Job<ByteRange> {
        Job::new(
            Chunk {
                index,
                offset: index * 10,
                payload: ByteRange {
                    offset: index * 10,
                    len: 10,
                },
            },
            None,
        )
    }

    #[test]
    fn transient_failures_run_out() {
        let sink = ScriptedSink::new().fail_times([2], 1);
        assert!(sink.process(&job(2)).is_err());
        assert_eq!(sink.process(&job(2)).unwrap().units, 10);
        assert_eq!(sink.completed(), vec![2, 2]);
        assert_eq!(sink.probe().current(), 0);
    }

    #[test]
    fn unfinished_count_is_sampled_at_submission() {
        let sink = ScriptedSink::new();
        ChunkSink::<ByteRange>::on_submit(&sink, 0);
        ChunkSink::<ByteRange>::on_submit(&sink, 1);
        sink.process(&job(0)).unwrap();
        ChunkSink::<ByteRange>::on_submit(&sink, 2);
        assert_eq!(sink.submitted(), vec![0, 1, 2]);
        assert_eq!(sink.peak_unfinished(), 2);
    }

    #[test]
    fn scripted_panic_still_records_completion() {
        let sink = ScriptedSink::new().panic_at([0]);
        let r = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| sink.process(&job(0))));
        assert!(r.is_err());
        assert_eq!(sink.completed(), vec![0]);
        assert_eq!(sink.probe().current(), 0);
    }
}
