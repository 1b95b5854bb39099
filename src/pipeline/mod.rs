//! Integration point for host pipelines.
//!
//! A host hands each keyed event to a [`RecordProcessor`] and forwards
//! whatever comes back. `None` means "suppress this record", not an error.

mod processor;

pub use processor::RateLimitingProcessor;

use async_trait::async_trait;

use crate::ratelimit::EventKey;

/// A per-record stage in a keyed event pipeline.
#[async_trait]
pub trait RecordProcessor<V: Send + 'static>: Send + Sync {
    /// Process one event, returning the record to emit or `None` to emit nothing.
    async fn process(&self, key: &EventKey, value: V, timestamp_ms: i64) -> Option<V>;
}
