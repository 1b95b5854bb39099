//! Eviction of counters for windows that have rolled out of retention.
//!
//! The collector remembers the newest window it has seen. Everything older
//! than `newest - (retention_windows - 1)` is fair game for deletion; the
//! newest window itself is never deleted, so GC cannot race with increments
//! on the window that is still receiving events.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::stats::LimiterStats;
use super::window::{WindowIndex, WindowKey};
use crate::store::{CounterStore, StoreError};

/// Tracks the newest observed window and deletes counters behind it.
pub struct WindowGc<S: CounterStore + ?Sized> {
    store: Arc<S>,
    retention_windows: u64,
    store_timeout: Duration,
    observed: AtomicBool,
    max_seen: AtomicI64,
    stats: Arc<LimiterStats>,
}

impl<S: CounterStore + ?Sized> WindowGc<S> {
    /// Create a collector over `store` that keeps the newest `retention_windows` windows.
    pub fn new(
        store: Arc<S>,
        retention_windows: u64,
        store_timeout: Duration,
        stats: Arc<LimiterStats>,
    ) -> Self {
        Self {
            store,
            retention_windows: retention_windows.max(1),
            store_timeout,
            observed: AtomicBool::new(false),
            max_seen: AtomicI64::new(WindowIndex::MIN),
            stats,
        }
    }

    /// Record that an event for `window` was seen.
    ///
    /// Returns `true` if this moved the newest window forward, meaning the
    /// retention cutoff advanced and a sweep may find something to evict.
    pub fn observe(&self, window: WindowIndex) -> bool {
        self.observed.store(true, Ordering::Release);
        let previous = self.max_seen.fetch_max(window, Ordering::AcqRel);
        window > previous
    }

    /// The newest window observed so far.
    pub fn max_seen(&self) -> Option<WindowIndex> {
        if self.observed.load(Ordering::Acquire) {
            Some(self.max_seen.load(Ordering::Acquire))
        } else {
            None
        }
    }

    /// Oldest window that is still retained.
    pub fn cutoff(&self) -> Option<WindowIndex> {
        let trailing = i64::try_from(self.retention_windows - 1).unwrap_or(i64::MAX);
        self.max_seen().map(|max| max.saturating_sub(trailing))
    }

    /// Delete every counter older than the current cutoff.
    ///
    /// Failures are logged and counted here; callers only need the result if
    /// they want to act on it.
    pub async fn sweep(&self) -> Result<usize, StoreError> {
        let Some(cutoff) = self.cutoff() else {
            return Ok(0);
        };

        let result = match tokio::time::timeout(
            self.store_timeout,
            self.store.delete_older_than(cutoff),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout {
                operation: "delete_older_than",
                after: self.store_timeout,
            }),
        };

        match result {
            Ok(evicted) => {
                self.stats.record_gc_sweep(evicted);
                if evicted > 0 {
                    debug!(cutoff = cutoff, evicted = evicted, "Evicted stale window counters");
                }
                Ok(evicted)
            }
            Err(e) => {
                self.stats.record_gc_failure();
                warn!(cutoff = cutoff, error = %e, "Window GC sweep failed, will retry");
                Err(e)
            }
        }
    }

    /// Delete a single counter if its window is already behind the cutoff.
    ///
    /// Late events for evicted windows recreate their counter, and a sweep
    /// only runs when the cutoff moves. This removes such a counter right
    /// after it was used. Returns `true` if a counter was deleted.
    pub async fn evict_if_stale(&self, key: &WindowKey) -> bool {
        let Some(cutoff) = self.cutoff() else {
            return false;
        };
        if key.window >= cutoff {
            return false;
        }

        let result = match tokio::time::timeout(self.store_timeout, self.store.delete(key)).await
        {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout {
                operation: "delete",
                after: self.store_timeout,
            }),
        };

        match result {
            Ok(()) => {
                self.stats.record_gc_eviction();
                debug!(key = %key, cutoff = cutoff, "Evicted late window counter");
                true
            }
            Err(e) => {
                self.stats.record_gc_failure();
                warn!(key = %key, cutoff = cutoff, error = %e, "Late window eviction failed");
                false
            }
        }
    }
}

/// Background task that runs [`WindowGc::sweep`] on a fixed interval.
pub struct Sweeper {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl Sweeper {
    /// Spawn the sweep loop on the current tokio runtime.
    pub fn spawn<S>(gc: Arc<WindowGc<S>>, interval: Duration) -> Self
    where
        S: CounterStore + ?Sized + 'static,
    {
        let (shutdown, mut signal) = oneshot::channel::<()>();

        info!(interval_ms = interval.as_millis() as u64, "Starting window sweeper");

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick fires immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = &mut signal => break,
                    _ = ticker.tick() => {
                        // Errors are already logged and counted by sweep().
                        let _ = gc.sweep().await;
                    }
                }
            }

            debug!("Window sweeper stopped");
        });

        Self { shutdown, task }
    }

    /// Stop the sweep loop and wait for it to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        if let Err(e) = self.task.await {
            warn!(error = %e, "Window sweeper task ended abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::{EventKey, WindowKey};
    use crate::store::InMemoryCounterStore;

    fn gc_over(store: Arc<InMemoryCounterStore>, retention: u64) -> WindowGc<InMemoryCounterStore> {
        WindowGc::new(
            store,
            retention,
            Duration::from_millis(100),
            Arc::new(LimiterStats::new()),
        )
    }

    fn seed(store: &InMemoryCounterStore, windows: &[WindowIndex]) {
        for &window in windows {
            store.insert(WindowKey::new(EventKey::from("k"), window), 1);
        }
    }

    #[test]
    fn test_observe_reports_advances() {
        let gc = gc_over(Arc::new(InMemoryCounterStore::new()), 1);

        assert_eq!(gc.max_seen(), None);
        assert!(gc.observe(3));
        assert!(!gc.observe(3));
        assert!(!gc.observe(1));
        assert!(gc.observe(4));
        assert_eq!(gc.max_seen(), Some(4));
    }

    #[test]
    fn test_cutoff_respects_retention() {
        let gc = gc_over(Arc::new(InMemoryCounterStore::new()), 3);
        assert_eq!(gc.cutoff(), None);

        gc.observe(10);
        assert_eq!(gc.cutoff(), Some(8));

        let gc = gc_over(Arc::new(InMemoryCounterStore::new()), 1);
        gc.observe(-4);
        assert_eq!(gc.cutoff(), Some(-4));
    }

    #[tokio::test]
    async fn test_sweep_before_observe_is_noop() {
        let store = Arc::new(InMemoryCounterStore::new());
        seed(&store, &[0, 1, 2]);
        let gc = gc_over(store.clone(), 1);

        assert_eq!(gc.sweep().await.unwrap(), 0);
        assert_eq!(store.windows(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_sweep_keeps_active_window() {
        let store = Arc::new(InMemoryCounterStore::new());
        seed(&store, &[0, 1, 2]);
        let gc = gc_over(store.clone(), 1);

        gc.observe(2);
        assert_eq!(gc.sweep().await.unwrap(), 2);
        assert_eq!(store.windows(), vec![2]);
    }

    #[tokio::test]
    async fn test_sweep_keeps_trailing_windows() {
        let store = Arc::new(InMemoryCounterStore::new());
        seed(&store, &[5, 6, 7, 8, 9]);
        let gc = gc_over(store.clone(), 2);

        gc.observe(9);
        gc.sweep().await.unwrap();
        assert_eq!(store.windows(), vec![8, 9]);
    }

    #[tokio::test]
    async fn test_evict_if_stale_only_removes_old_windows() {
        let store = Arc::new(InMemoryCounterStore::new());
        seed(&store, &[3, 7, 8]);
        let gc = gc_over(store.clone(), 2);

        let stale = WindowKey::new(EventKey::from("k"), 3);
        assert!(!gc.evict_if_stale(&stale).await);

        gc.observe(8);
        assert!(!gc.evict_if_stale(&WindowKey::new(EventKey::from("k"), 7)).await);
        assert!(gc.evict_if_stale(&stale).await);
        assert_eq!(store.windows(), vec![7, 8]);
    }

    #[tokio::test]
    async fn test_sweeper_runs_until_shutdown() {
        let store = Arc::new(InMemoryCounterStore::new());
        seed(&store, &[0, 1]);
        let stats = Arc::new(LimiterStats::new());
        let gc = Arc::new(WindowGc::new(
            store.clone(),
            1,
            Duration::from_millis(100),
            stats.clone(),
        ));
        gc.observe(1);

        let sweeper = Sweeper::spawn(gc, Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(100)).await;
        sweeper.shutdown().await;

        assert_eq!(store.windows(), vec![1]);
        assert!(stats.snapshot().gc_sweeps >= 1);
        assert_eq!(stats.snapshot().gc_evicted, 1);
    }
}
