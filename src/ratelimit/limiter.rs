//! Admission decision engine.

use std::collections::hash_map::RandomState;
use std::future::Future;
use std::hash::BuildHasher;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

use super::gc::WindowGc;
use super::stats::{LimiterStats, StatsSnapshot};
use super::window::{EventKey, WindowKey};
use crate::config::{FailurePolicy, GcStrategy, LimiterConfig, LimiterSettings};
use crate::error::Result;
use crate::store::{CounterStore, StoreError};

/// Number of lock stripes guarding the read-compare-increment sequence.
const LOCK_STRIPES: usize = 64;

/// Outcome of a rate limit check for one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The event is within quota and was counted
    Admitted,
    /// The window's quota is used up
    Dropped,
}

impl Decision {
    /// Whether the event should be forwarded.
    pub fn is_admitted(self) -> bool {
        matches!(self, Decision::Admitted)
    }
}

/// Per-key fixed-window rate limiter.
///
/// Counters live in an injected [`CounterStore`]. For each window key the
/// limiter reads the counter, compares it to the limit and increments it
/// while holding that key's lock stripe, so concurrent callers racing on the
/// same key can never push a counter past the limit.
///
/// This struct is thread-safe and can be shared across tasks behind an `Arc`.
pub struct RateLimiter<S: CounterStore + ?Sized> {
    settings: LimiterSettings,
    store: Arc<S>,
    gc: Arc<WindowGc<S>>,
    stats: Arc<LimiterStats>,
    stripes: Box<[Mutex<()>]>,
    hasher: RandomState,
}

impl<S: CounterStore + ?Sized> RateLimiter<S> {
    /// Create a limiter over `store` with validated settings.
    pub fn new(settings: LimiterSettings, store: Arc<S>) -> Self {
        let stats = Arc::new(LimiterStats::new());
        let gc = Arc::new(WindowGc::new(
            store.clone(),
            settings.retention_windows(),
            settings.store_timeout(),
            stats.clone(),
        ));

        debug!(
            store = settings.store_name(),
            window_size_ms = settings.window_size_ms(),
            max_per_window = settings.max_per_window(),
            retention_windows = settings.retention_windows(),
            failure_policy = ?settings.failure_policy(),
            "Creating rate limiter"
        );

        Self {
            settings,
            store,
            gc,
            stats,
            stripes: (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
            hasher: RandomState::new(),
        }
    }

    /// Validate a raw configuration and create a limiter from it.
    pub fn from_config(config: &LimiterConfig, store: Arc<S>) -> Result<Self> {
        Ok(Self::new(config.validate()?, store))
    }

    /// The validated settings this limiter was built with.
    pub fn settings(&self) -> &LimiterSettings {
        &self.settings
    }

    /// The counter store backing this limiter.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// The window collector shared with any background sweeper.
    pub fn gc(&self) -> &Arc<WindowGc<S>> {
        &self.gc
    }

    /// Snapshot of the outcome counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Decide whether an event is admitted, surfacing store failures.
    ///
    /// Admission performs exactly one store increment; a drop performs none.
    pub async fn decide(&self, event_key: &EventKey, timestamp_ms: i64) -> Result<Decision> {
        let key = WindowKey::compute(
            event_key.clone(),
            timestamp_ms,
            self.settings.window_size_ms(),
        )?;

        trace!(key = %key, timestamp_ms = timestamp_ms, "Checking rate limit");

        // Nothing is ever written with a zero limit, so the store and the
        // collector are left alone entirely.
        if self.settings.max_per_window() == 0 {
            self.stats.record_dropped();
            return Ok(Decision::Dropped);
        }

        let result = self.admit(&key).await;

        match &result {
            Ok(Decision::Admitted) => self.stats.record_admitted(),
            Ok(Decision::Dropped) => {
                debug!(
                    key = %key,
                    limit = self.settings.max_per_window(),
                    "Rate limit exceeded"
                );
                self.stats.record_dropped();
            }
            Err(_) => self.stats.record_store_error(),
        }

        self.collect_garbage(&key).await;

        result
    }

    /// Decide whether an event is admitted, applying the configured failure
    /// policy when the store is unavailable. Never fails.
    pub async fn check(&self, event_key: &EventKey, timestamp_ms: i64) -> Decision {
        match self.decide(event_key, timestamp_ms).await {
            Ok(decision) => decision,
            Err(e) => match self.settings.failure_policy() {
                FailurePolicy::FailOpen => {
                    warn!(
                        store = self.settings.store_name(),
                        key = %event_key,
                        error = %e,
                        "Counter store failed, admitting event uncounted"
                    );
                    self.stats.record_fail_open();
                    Decision::Admitted
                }
                FailurePolicy::FailClosed => {
                    warn!(
                        store = self.settings.store_name(),
                        key = %event_key,
                        error = %e,
                        "Counter store failed, dropping event"
                    );
                    self.stats.record_fail_closed();
                    Decision::Dropped
                }
            },
        }
    }

    /// Current counter value for the window an event at `timestamp_ms` falls in.
    pub async fn get_counter_value(
        &self,
        event_key: &EventKey,
        timestamp_ms: i64,
    ) -> Result<Option<u64>> {
        let key = WindowKey::compute(
            event_key.clone(),
            timestamp_ms,
            self.settings.window_size_ms(),
        )?;
        Ok(self.bounded("get", self.store.get(&key)).await?)
    }

    /// Number of counters currently held by the store.
    pub async fn counter_count(&self) -> Result<usize> {
        Ok(self.bounded("len", self.store.len()).await?)
    }

    async fn admit(&self, key: &WindowKey) -> Result<Decision> {
        let limit = self.settings.max_per_window();
        let timeout = self.settings.store_timeout();

        let stripe = &self.stripes[self.stripe_index(key)];
        let _guard = tokio::time::timeout(timeout, stripe.lock())
            .await
            .map_err(|_| StoreError::Timeout {
                operation: "counter lock",
                after: timeout,
            })?;

        let current = self.read_counter(key).await?.unwrap_or(0);
        if current >= limit {
            return Ok(Decision::Dropped);
        }

        // Not retried: a timed-out increment may still have been applied.
        let count = self
            .bounded("increment_and_get", self.store.increment_and_get(key))
            .await?;

        if count > limit {
            warn!(
                key = %key,
                count = count,
                limit = limit,
                "Counter passed the limit; the store is being written outside this limiter"
            );
        }

        trace!(key = %key, count = count, "Event admitted");
        Ok(Decision::Admitted)
    }

    async fn read_counter(&self, key: &WindowKey) -> std::result::Result<Option<u64>, StoreError> {
        let mut attempt = 0;
        loop {
            match self.bounded("get", self.store.get(key)).await {
                Ok(count) => return Ok(count),
                Err(e) if attempt < self.settings.read_retries() => {
                    attempt += 1;
                    debug!(key = %key, attempt = attempt, error = %e, "Retrying counter read");
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = std::result::Result<T, StoreError>>,
    ) -> std::result::Result<T, StoreError> {
        let after = self.settings.store_timeout();
        match tokio::time::timeout(after, call).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout { operation, after }),
        }
    }

    async fn collect_garbage(&self, key: &WindowKey) {
        let advanced = self.gc.observe(key.window);
        if *self.settings.gc() != GcStrategy::Lazy {
            return;
        }

        // Failures are logged and counted by the collector.
        if advanced {
            let _ = self.gc.sweep().await;
        } else {
            let _ = self.gc.evict_if_stale(key).await;
        }
    }

    fn stripe_index(&self, key: &WindowKey) -> usize {
        (self.hasher.hash_one(key) % self.stripes.len() as u64) as usize
    }
}
