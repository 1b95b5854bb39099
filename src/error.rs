//! Error types for Turnstile.

use thiserror::Error;

use crate::store::StoreError;

/// Main error type for Turnstile operations.
#[derive(Error, Debug)]
pub enum TurnstileError {
    /// Limiter parameters that can never produce a valid decision
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The counter store failed or did not answer in time
    #[error("Counter store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),
}

impl TurnstileError {
    /// Whether the failure came from the counter store rather than from setup.
    pub fn is_store_failure(&self) -> bool {
        matches!(self, TurnstileError::StoreUnavailable(_))
    }
}

impl From<::config::ConfigError> for TurnstileError {
    fn from(err: ::config::ConfigError) -> Self {
        TurnstileError::InvalidConfiguration(err.to_string())
    }
}

/// Result type alias for Turnstile operations.
pub type Result<T> = std::result::Result<T, TurnstileError>;
