//! Counting limiter that bounds how many jobs are outstanding at once.
//!
//! The count is an atomic so that `in_flight()` and `release()` never take the
//! lock on the fast path; the mutex/condvar pair only exists so that a blocked
//! `acquire()` can sleep until a release arrives.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// Blocks the submitter once `max_inflight` jobs are outstanding.
///
/// The limiter is independent of any thread pool. The driver acquires before
/// submitting; the slot is released from the worker thread when the job
/// finishes (see [`InflightPermit`]).
#[derive(Debug)]
pub struct InflightLimiter {
    max: usize,
    count: AtomicUsize,
    peak: AtomicUsize,
    lock: Mutex<()>,
    freed: Condvar,
}

impl InflightLimiter {
    /// # Panics
    /// Panics if `max_inflight == 0`; configuration validation rejects that first.
    #[must_use]
    pub fn new(max_inflight: usize) -> Self {
        assert!(max_inflight >= 1, "max_inflight must be at least 1");
        Self {
            max: max_inflight,
            count: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            lock: Mutex::new(()),
            freed: Condvar::new(),
        }
    }

    /// Take a slot without blocking. Returns `false` at the cap.
    pub fn try_acquire(&self) -> bool {
        let mut cur = self.count.load(Ordering::Acquire);
        loop {
            if cur >= self.max {
                return false;
            }
            match self
                .count
                .compare_exchange_weak(cur, cur + 1, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => {
                    self.peak.fetch_max(cur + 1, Ordering::Relaxed);
                    return true;
                }
                Err(actual) => cur = actual,
            }
        }
    }

    /// Block until a slot is free, then take it.
    pub fn acquire(&self) {
        if self.try_acquire() {
            return;
        }
        let mut guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        while !self.try_acquire() {
            guard = self.freed.wait(guard).unwrap_or_else(|e| e.into_inner());
        }
    }

    /// [`acquire`](Self::acquire), returning a permit that releases on drop.
    ///
    /// The permit travels with the job to the worker thread, so the slot frees
    /// up the moment the job finishes, even if it panics.
    pub fn acquire_owned(self: &Arc<Self>) -> InflightPermit {
        self.acquire();
        InflightPermit {
            limiter: Arc::clone(self),
        }
    }

    /// Like [`acquire`](Self::acquire) but gives up after `timeout`.
    pub fn acquire_timeout(&self, timeout: Duration) -> bool {
        if self.try_acquire() {
            return true;
        }
        let deadline = std::time::Instant::now() + timeout;
        let mut guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if self.try_acquire() {
                return true;
            }
            let now = std::time::Instant::now();
            if now >= deadline {
                return false;
            }
            guard = self
                .freed
                .wait_timeout(guard, deadline - now)
                .unwrap_or_else(|e| e.into_inner())
                .0;
        }
    }

    /// Return a slot and wake at most one waiter.
    ///
    /// # Panics
    /// Panics on a release without a matching acquire.
    pub fn release(&self) {
        let prev = self.count.fetch_sub(1, Ordering::AcqRel);
        assert!(prev > 0, "InflightLimiter::release without matching acquire");
        // Taking the lock orders this notify after a waiter's failed try_acquire,
        // so the wakeup cannot be lost.
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        self.freed.notify_one();
    }

    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Highest `in_flight()` ever observed.
    #[must_use]
    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn max_inflight(&self) -> usize {
        self.max
    }
}

/// One held slot of an [`InflightLimiter`].
#[derive(Debug)]
#[must_use = "dropping the permit releases the slot immediately"]
pub struct InflightPermit {
    limiter: Arc<InflightLimiter>,
}

impl Drop for InflightPermit {
    fn drop(&mut self) {
        self.limiter.release();
    }
}
