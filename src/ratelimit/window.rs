//! Window key derivation.

use std::fmt;
use std::sync::Arc;

use crate::error::{Result, TurnstileError};

/// Index of a fixed window: `floor(timestamp_ms / window_size_ms)`.
pub type WindowIndex = i64;

/// Opaque identifier that partitions the rate limit domain.
///
/// Events with the same key share one quota per window.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventKey(Arc<[u8]>);

impl EventKey {
    /// Create a key from raw bytes.
    pub fn new(bytes: impl AsRef<[u8]>) -> Self {
        Self(Arc::from(bytes.as_ref()))
    }

    /// The raw bytes of this key.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<&str> for EventKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for EventKey {
    fn from(key: String) -> Self {
        Self::new(key)
    }
}

impl From<&[u8]> for EventKey {
    fn from(key: &[u8]) -> Self {
        Self::new(key)
    }
}

impl From<Vec<u8>> for EventKey {
    fn from(key: Vec<u8>) -> Self {
        Self(Arc::from(key))
    }
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.escape_ascii())
    }
}

/// A key that uniquely identifies one counter: an event key within one window.
///
/// The two components are kept as separate fields, so keys containing any
/// byte sequence can never alias another `(key, window)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowKey {
    /// The event key this counter belongs to
    pub event_key: EventKey,
    /// The window this counter covers
    pub window: WindowIndex,
}

impl WindowKey {
    /// Create a window key from its parts.
    pub fn new(event_key: EventKey, window: WindowIndex) -> Self {
        Self { event_key, window }
    }

    /// Derive the window key for an event.
    ///
    /// Negative timestamps floor toward negative infinity, so `-1` lands in
    /// window `-1` rather than sharing window `0` with `0..window_size_ms`.
    pub fn compute(event_key: EventKey, timestamp_ms: i64, window_size_ms: i64) -> Result<Self> {
        Ok(Self::new(event_key, window_index(timestamp_ms, window_size_ms)?))
    }

    /// First millisecond covered by this key's window.
    pub fn window_start_ms(&self, window_size_ms: i64) -> i64 {
        self.window.saturating_mul(window_size_ms)
    }
}

impl fmt::Display for WindowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.event_key, self.window)
    }
}

/// Compute the window index a timestamp falls in.
pub fn window_index(timestamp_ms: i64, window_size_ms: i64) -> Result<WindowIndex> {
    if window_size_ms <= 0 {
        return Err(TurnstileError::InvalidConfiguration(format!(
            "window size must be positive, got {}ms",
            window_size_ms
        )));
    }
    Ok(timestamp_ms.div_euclid(window_size_ms))
}

/// Derive the window key for `(event_key, timestamp_ms)` with the given window size.
pub fn compute_window_key(
    event_key: impl Into<EventKey>,
    timestamp_ms: i64,
    window_size_ms: i64,
) -> Result<WindowKey> {
    WindowKey::compute(event_key.into(), timestamp_ms, window_size_ms)
}
