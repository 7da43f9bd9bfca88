//! Progress reporting.
//!
//! The driver calls [`ProgressObserver::on_progress`] once per completed job,
//! from its own thread, after the completion is folded into the result. Counts
//! therefore only ever grow and only reflect finished work. Observers run inline
//! on the driver: a slow observer slows the whole pipeline.

use std::sync::Mutex;
use tracing::info;

/// Snapshot passed to observers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Progress {
    /// Chunks that reached a terminal state (success or failure).
    pub chunks_completed: u64,
    /// Chunks that failed, included in `chunks_completed`.
    pub chunks_failed: u64,
    /// Rows or bytes of successfully materialized chunks.
    pub units_completed: u64,
    /// Expected total units, when the source knows it.
    pub total_estimate: Option<u64>,
}

impl Progress {
    /// Completion fraction in `[0, 1]`, when the total is known.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn fraction(&self) -> Option<f64> {
        match self.total_estimate {
            Some(0) => Some(1.0),
            Some(total) => Some((self.units_completed as f64 / total as f64).min(1.0)),
            None => None,
        }
    }
}

pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, progress: &Progress);
}

impl<F> ProgressObserver for F
where
    F: Fn(&Progress) + Send + Sync,
{
    fn on_progress(&self, progress: &Progress) {
        self(progress);
    }
}

/// Emits one `tracing` event per completion.
#[derive(Clone, Debug)]
pub struct LogProgress {
    label: String,
}

impl LogProgress {
    pub fn new(label: impl Into<String>) -> Self {
        Self { label: label.into() }
    }
}

impl ProgressObserver for LogProgress {
    fn on_progress(&self, p: &Progress) {
        let pct = p.fraction().map(|f| format!("{:.1}%", f * 100.0));
        info!(
            label = %self.label,
            chunks = p.chunks_completed,
            failed = p.chunks_failed,
            units = p.units_completed,
            total = ?p.total_estimate,
            pct = pct.as_deref().unwrap_or("?"),
            "progress"
        );
    }
}

/// Keeps every snapshot it receives. Handy in tests.
#[derive(Debug, Default)]
pub struct CollectingObserver {
    seen: Mutex<Vec<Progress>>,
}

impl CollectingObserver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn snapshots(&self) -> Vec<Progress> {
        self.seen.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl ProgressObserver for CollectingObserver {
    fn on_progress(&self, progress: &Progress) {
        self.seen
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(*progress);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fraction_handles_unknown_and_empty_totals() {
        let mut p = Progress::default();
        assert_eq!(p.fraction(), None);
        p.total_estimate = Some(0);
        assert_eq!(p.fraction(), Some(1.0));
        p.total_estimate = Some(200);
        p.units_completed = 50;
        assert_eq!(p.fraction(), Some(0.25));
    }

    #[test]
    fn closures_are_observers() {
        let calls = std::sync::atomic::AtomicU64::new(0);
        let obs = |p: &Progress| {
            calls.fetch_add(p.chunks_completed, std::sync::atomic::Ordering::Relaxed);
        };
        obs.on_progress(&Progress {
            chunks_completed: 2,
            ..Progress::default()
        });
        assert_eq!(calls.load(std::sync::atomic::Ordering::Relaxed), 2);
    }
}
