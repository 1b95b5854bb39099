//! In-process counter store backed by a concurrent hash map.

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::trace;

use super::{CounterStore, StoreError};
use crate::ratelimit::{WindowIndex, WindowKey};

/// A [`CounterStore`] that keeps all counters in memory.
///
/// Increments go through the map's entry API, which holds the shard lock
/// for the key, so they are atomic per key.
#[derive(Debug, Default)]
pub struct InMemoryCounterStore {
    counters: DashMap<WindowKey, u64>,
}

impl InMemoryCounterStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the count for a key. Intended for seeding tests and restores.
    pub fn insert(&self, key: WindowKey, count: u64) {
        self.counters.insert(key, count);
    }

    /// Windows that currently hold at least one counter, oldest first.
    pub fn windows(&self) -> Vec<WindowIndex> {
        let mut windows: Vec<WindowIndex> = self.counters.iter().map(|e| e.key().window).collect();
        windows.sort_unstable();
        windows.dedup();
        windows
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn get(&self, key: &WindowKey) -> Result<Option<u64>, StoreError> {
        Ok(self.counters.get(key).map(|count| *count))
    }

    async fn increment_and_get(&self, key: &WindowKey) -> Result<u64, StoreError> {
        let mut entry = self.counters.entry(key.clone()).or_insert(0);
        *entry += 1;
        Ok(*entry)
    }

    async fn delete(&self, key: &WindowKey) -> Result<(), StoreError> {
        self.counters.remove(key);
        Ok(())
    }

    async fn delete_older_than(&self, window: WindowIndex) -> Result<usize, StoreError> {
        let before = self.counters.len();
        self.counters.retain(|key, _| key.window >= window);
        let removed = before.saturating_sub(self.counters.len());

        trace!(cutoff = window, removed = removed, "Removed stale window counters");
        Ok(removed)
    }

    async fn len(&self) -> Result<usize, StoreError> {
        Ok(self.counters.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::EventKey;

    fn key(name: &str, window: WindowIndex) -> WindowKey {
        WindowKey::new(EventKey::from(name), window)
    }

    #[tokio::test]
    async fn test_absent_key_reads_none() {
        let store = InMemoryCounterStore::new();
        assert_eq!(store.get(&key("a", 0)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_increment_and_get() {
        let store = InMemoryCounterStore::new();

        assert_eq!(store.increment_and_get(&key("a", 0)).await.unwrap(), 1);
        assert_eq!(store.increment_and_get(&key("a", 0)).await.unwrap(), 2);
        assert_eq!(store.increment_and_get(&key("a", 1)).await.unwrap(), 1);
        assert_eq!(store.get(&key("a", 0)).await.unwrap(), Some(2));
        assert_eq!(store.len().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_delete() {
        let store = InMemoryCounterStore::new();
        store.insert(key("a", 0), 5);

        store.delete(&key("a", 0)).await.unwrap();
        assert_eq!(store.get(&key("a", 0)).await.unwrap(), None);

        // Deleting a missing key is not an error
        store.delete(&key("missing", 0)).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_older_than() {
        let store = InMemoryCounterStore::new();
        store.insert(key("a", -2), 1);
        store.insert(key("a", 3), 1);
        store.insert(key("b", 4), 1);
        store.insert(key("a", 5), 1);
        store.insert(key("b", 5), 1);

        let removed = store.delete_older_than(5).await.unwrap();
        assert_eq!(removed, 3);
        assert_eq!(store.windows(), vec![5]);
        assert_eq!(store.len().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_increments_are_not_lost() {
        let store = std::sync::Arc::new(InMemoryCounterStore::new());
        let mut handles = Vec::new();

        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..100 {
                    store.increment_and_get(&key("hot", 7)).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.get(&key("hot", 7)).await.unwrap(), Some(1600));
    }
}
