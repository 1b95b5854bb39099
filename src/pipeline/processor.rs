//! Rate limiting pipeline stage.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::info;

use super::RecordProcessor;
use crate::config::{GcStrategy, LimiterConfig, LimiterSettings};
use crate::error::Result;
use crate::ratelimit::{Decision, EventKey, RateLimiter, StatsSnapshot, Sweeper};
use crate::store::CounterStore;

/// Pipeline stage that forwards admitted events and swallows dropped ones.
///
/// Owns the background sweeper when the GC strategy is `sweep`; call
/// [`close`](Self::close) when the stage is torn down.
pub struct RateLimitingProcessor<S: CounterStore + ?Sized + 'static> {
    limiter: Arc<RateLimiter<S>>,
    sweeper: Mutex<Option<Sweeper>>,
}

impl<S: CounterStore + ?Sized + 'static> RateLimitingProcessor<S> {
    /// Build a limiter over `store` and start the stage.
    ///
    /// Must be called from within a tokio runtime when the GC strategy is `sweep`.
    pub fn start(settings: LimiterSettings, store: Arc<S>) -> Self {
        Self::with_limiter(Arc::new(RateLimiter::new(settings, store)))
    }

    /// Validate a raw configuration and start the stage.
    pub fn from_config(config: &LimiterConfig, store: Arc<S>) -> Result<Self> {
        Ok(Self::start(config.validate()?, store))
    }

    /// Start the stage around an existing limiter.
    pub fn with_limiter(limiter: Arc<RateLimiter<S>>) -> Self {
        let sweeper = match limiter.settings().gc() {
            GcStrategy::Sweep { interval_ms } => Some(Sweeper::spawn(
                limiter.gc().clone(),
                Duration::from_millis(*interval_ms),
            )),
            GcStrategy::Lazy => None,
        };

        info!(
            store = limiter.settings().store_name(),
            gc = ?limiter.settings().gc(),
            "Rate limiting processor started"
        );

        Self {
            limiter,
            sweeper: Mutex::new(sweeper),
        }
    }

    pub fn limiter(&self) -> &Arc<RateLimiter<S>> {
        &self.limiter
    }

    /// Aggregate outcome counters, including store failures absorbed by the
    /// failure policy.
    pub fn stats(&self) -> StatsSnapshot {
        self.limiter.stats()
    }

    /// Like [`RecordProcessor::process`], but returns store failures instead
    /// of applying the failure policy.
    pub async fn try_process<V>(&self, key: &EventKey, value: V, timestamp_ms: i64) -> Result<Option<V>> {
        Ok(match self.limiter.decide(key, timestamp_ms).await? {
            Decision::Admitted => Some(value),
            Decision::Dropped => None,
        })
    }

    /// Stop background work. Safe to call more than once.
    pub async fn close(&self) {
        let sweeper = self.sweeper.lock().take();
        if let Some(sweeper) = sweeper {
            sweeper.shutdown().await;
        }

        let stats = self.stats();
        info!(
            store = self.limiter.settings().store_name(),
            admitted = stats.admitted,
            dropped = stats.dropped,
            store_errors = stats.store_errors,
            "Rate limiting processor closed"
        );
    }
}

#[async_trait]
impl<S, V> RecordProcessor<V> for RateLimitingProcessor<S>
where
    S: CounterStore + ?Sized + 'static,
    V: Send + 'static,
{
    async fn process(&self, key: &EventKey, value: V, timestamp_ms: i64) -> Option<V> {
        match self.limiter.check(key, timestamp_ms).await {
            Decision::Admitted => Some(value),
            Decision::Dropped => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FailurePolicy;
    use crate::store::InMemoryCounterStore;

    fn processor(config: LimiterConfig) -> RateLimitingProcessor<InMemoryCounterStore> {
        RateLimitingProcessor::from_config(&config, Arc::new(InMemoryCounterStore::new())).unwrap()
    }

    #[tokio::test]
    async fn test_process_forwards_value_unchanged() {
        let processor = processor(LimiterConfig::new(FailurePolicy::FailClosed).with_limit(1000, 1));
        let key = EventKey::from("A");

        let out = processor.process(&key, "payload".to_string(), 0).await;
        assert_eq!(out.as_deref(), Some("payload"));

        let out = processor.process(&key, "second".to_string(), 1).await;
        assert_eq!(out, None);
    }

    #[tokio::test]
    async fn test_try_process_matches_process_on_healthy_store() {
        let processor = processor(LimiterConfig::new(FailurePolicy::FailOpen).with_limit(1000, 1));
        let key = EventKey::from("A");

        assert_eq!(processor.try_process(&key, 1u32, 0).await.unwrap(), Some(1));
        assert_eq!(processor.try_process(&key, 2u32, 0).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let config = LimiterConfig::new(FailurePolicy::FailClosed).with_limit(0, 1);
        let result =
            RateLimitingProcessor::from_config(&config, Arc::new(InMemoryCounterStore::new()));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_sweeper_started_and_closed() {
        let config = LimiterConfig::new(FailurePolicy::FailClosed)
            .with_limit(1000, 5)
            .with_gc(GcStrategy::Sweep { interval_ms: 10 });
        let processor = processor(config);
        let key = EventKey::from("A");

        processor.process(&key, (), 100).await;
        processor.process(&key, (), 1100).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(processor.limiter().store().windows(), vec![1]);

        processor.close().await;
        processor.close().await;
    }
}
