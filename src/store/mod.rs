//! Counter store abstraction.
//!
//! The limiter only needs a narrow capability set from its state store:
//! read a counter, atomically bump it, and drop old windows. Anything that
//! can provide those operations (an embedded map, a state store backed by a
//! log, a remote KV) can sit behind [`CounterStore`].

mod memory;

pub use memory::InMemoryCounterStore;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::ratelimit::{WindowIndex, WindowKey};

/// Errors reported by a counter store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The operation did not finish in time
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// The store cannot be reached
    #[error("store unreachable: {0}")]
    Unavailable(String),

    /// The store answered with an error
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Key to count mapping consumed by the rate limiter.
///
/// Implementations must make `increment_and_get` atomic per key. No
/// transactional guarantees across keys are required.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Current count for a key, or `None` if the key has never been written.
    async fn get(&self, key: &WindowKey) -> Result<Option<u64>, StoreError>;

    /// Increment the count for a key, creating it at zero first if needed,
    /// and return the new value.
    async fn increment_and_get(&self, key: &WindowKey) -> Result<u64, StoreError>;

    /// Remove a single counter.
    async fn delete(&self, key: &WindowKey) -> Result<(), StoreError>;

    /// Remove every counter whose window is strictly older than `window`.
    ///
    /// Returns the number of counters removed.
    async fn delete_older_than(&self, window: WindowIndex) -> Result<usize, StoreError>;

    /// Number of live counters.
    async fn len(&self) -> Result<usize, StoreError>;
}
