use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Counts how many holders are inside a section right now, and the most ever.
#[derive(Clone, Debug, Default)]
pub struct ConcurrencyProbe {
    inner: Arc<Counters>,
}

#[derive(Debug, Default)]
struct Counters {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl ConcurrencyProbe {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter the section; leaving happens when the guard drops.
    pub fn enter(&self) -> ProbeGuard {
        let now = self.inner.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.peak.fetch_max(now, Ordering::SeqCst);
        ProbeGuard {
            inner: Arc::clone(&self.inner),
        }
    }

    #[must_use]
    pub fn current(&self) -> usize {
        self.inner.current.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn peak(&self) -> usize {
        self.inner.peak.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
#[must_use = "dropping the guard leaves the section immediately"]
pub struct ProbeGuard {
    inner: Arc<Counters>,
}

impl Drop for ProbeGuard {
    fn drop(&mut self) {
        self.inner.current.fetch_sub(1, Ordering::SeqCst);
    }
}
