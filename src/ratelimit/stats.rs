//! Aggregate limiter statistics.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters describing what the limiter has done since it started.
///
/// Per-event store failures are never surfaced to the pipeline under a
/// failure policy; these counters are where they become observable.
#[derive(Debug, Default)]
pub struct LimiterStats {
    admitted: AtomicU64,
    dropped: AtomicU64,
    store_errors: AtomicU64,
    fail_open_admits: AtomicU64,
    fail_closed_drops: AtomicU64,
    gc_sweeps: AtomicU64,
    gc_evicted: AtomicU64,
    gc_failures: AtomicU64,
}

/// Point-in-time copy of [`LimiterStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Events admitted and counted
    pub admitted: u64,
    /// Events dropped because the window was full
    pub dropped: u64,
    /// Decisions that hit a store failure
    pub store_errors: u64,
    /// Events admitted uncounted under fail-open
    pub fail_open_admits: u64,
    /// Events dropped under fail-closed
    pub fail_closed_drops: u64,
    /// Completed GC sweeps
    pub gc_sweeps: u64,
    /// Counters removed by GC
    pub gc_evicted: u64,
    /// GC sweeps and evictions that failed
    pub gc_failures: u64,
}

impl LimiterStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_admitted(&self) {
        self.admitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_store_error(&self) {
        self.store_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_fail_open(&self) {
        self.fail_open_admits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_fail_closed(&self) {
        self.fail_closed_drops.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_gc_sweep(&self, evicted: usize) {
        self.gc_sweeps.fetch_add(1, Ordering::Relaxed);
        self.gc_evicted.fetch_add(evicted as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_gc_eviction(&self) {
        self.gc_evicted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_gc_failure(&self) {
        self.gc_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a snapshot of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            admitted: self.admitted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            store_errors: self.store_errors.load(Ordering::Relaxed),
            fail_open_admits: self.fail_open_admits.load(Ordering::Relaxed),
            fail_closed_drops: self.fail_closed_drops.load(Ordering::Relaxed),
            gc_sweeps: self.gc_sweeps.load(Ordering::Relaxed),
            gc_evicted: self.gc_evicted.load(Ordering::Relaxed),
            gc_failures: self.gc_failures.load(Ordering::Relaxed),
        }
    }
}
