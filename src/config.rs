//! Configuration management for Turnstile.
//!
//! Configuration is layered: serde defaults, then an optional YAML/TOML/JSON
//! file, then `TURNSTILE__`-prefixed environment variables
//! (e.g. `TURNSTILE__LIMITER__MAX_PER_WINDOW=50`).

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{Result, TurnstileError};

/// Main configuration for a Turnstile deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnstileConfig {
    /// Rate limiter configuration
    pub limiter: LimiterConfig,
}

/// What the limiter does with an event when the counter store fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Admit the event without counting it
    FailOpen,
    /// Drop the event
    FailClosed,
}

/// How stale window counters are evicted from the store.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "lowercase")]
pub enum GcStrategy {
    /// Evict inline whenever the newest observed window advances
    #[default]
    Lazy,
    /// Evict from a background task on a fixed interval
    Sweep {
        #[serde(default = "default_sweep_interval_ms")]
        interval_ms: u64,
    },
}

/// Raw rate limiter configuration, as read from files or the environment.
///
/// Limits are signed so negative values reach [`LimiterConfig::validate`]
/// instead of failing inside the deserializer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Size of each fixed window in milliseconds
    #[serde(default = "default_window_size_ms")]
    pub window_size_ms: i64,

    /// Events admitted per key per window
    #[serde(default = "default_max_per_window")]
    pub max_per_window: i64,

    /// Number of most recent windows whose counters are kept
    #[serde(default = "default_retention_windows")]
    pub retention_windows: i64,

    /// Behavior under store failure. Has no default.
    pub failure_policy: FailurePolicy,

    /// Upper bound on every store call and lock wait
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,

    /// Extra attempts for the counter read
    #[serde(default)]
    pub read_retries: u32,

    /// Window eviction strategy
    #[serde(default)]
    pub gc: GcStrategy,

    /// Name of the counter store, used in logs
    #[serde(default = "default_store_name")]
    pub store_name: String,
}

fn default_window_size_ms() -> i64 {
    1000
}

fn default_max_per_window() -> i64 {
    100
}

fn default_retention_windows() -> i64 {
    1
}

fn default_store_timeout_ms() -> u64 {
    250
}

fn default_sweep_interval_ms() -> u64 {
    1000
}

fn default_store_name() -> String {
    "rate-limit-store".to_string()
}

impl LimiterConfig {
    /// Create a configuration with default limits and the given failure policy.
    pub fn new(failure_policy: FailurePolicy) -> Self {
        Self {
            window_size_ms: default_window_size_ms(),
            max_per_window: default_max_per_window(),
            retention_windows: default_retention_windows(),
            failure_policy,
            store_timeout_ms: default_store_timeout_ms(),
            read_retries: 0,
            gc: GcStrategy::default(),
            store_name: default_store_name(),
        }
    }

    /// Set the window size and per-window limit.
    pub fn with_limit(mut self, window_size_ms: i64, max_per_window: i64) -> Self {
        self.window_size_ms = window_size_ms;
        self.max_per_window = max_per_window;
        self
    }

    /// Set the number of retained windows.
    pub fn with_retention(mut self, retention_windows: i64) -> Self {
        self.retention_windows = retention_windows;
        self
    }

    /// Set the GC strategy.
    pub fn with_gc(mut self, gc: GcStrategy) -> Self {
        self.gc = gc;
        self
    }

    /// Set the store call timeout.
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the number of read retries.
    pub fn with_read_retries(mut self, read_retries: u32) -> Self {
        self.read_retries = read_retries;
        self
    }

    /// Validate the raw values into immutable limiter settings.
    pub fn validate(&self) -> Result<LimiterSettings> {
        if self.window_size_ms <= 0 {
            return Err(invalid(format!(
                "window_size_ms must be positive, got {}",
                self.window_size_ms
            )));
        }
        if self.max_per_window < 0 {
            return Err(invalid(format!(
                "max_per_window must not be negative, got {}",
                self.max_per_window
            )));
        }
        if self.retention_windows < 1 {
            return Err(invalid(format!(
                "retention_windows must be at least 1, got {}",
                self.retention_windows
            )));
        }
        if self.store_timeout_ms == 0 {
            return Err(invalid("store_timeout_ms must be positive".to_string()));
        }
        if let GcStrategy::Sweep { interval_ms: 0 } = self.gc {
            return Err(invalid("gc sweep interval_ms must be positive".to_string()));
        }

        Ok(LimiterSettings {
            window_size_ms: self.window_size_ms,
            max_per_window: self.max_per_window as u64,
            retention_windows: self.retention_windows as u64,
            failure_policy: self.failure_policy,
            store_timeout: Duration::from_millis(self.store_timeout_ms),
            read_retries: self.read_retries,
            gc: self.gc.clone(),
            store_name: self.store_name.clone(),
        })
    }
}

fn invalid(msg: String) -> TurnstileError {
    TurnstileError::InvalidConfiguration(msg)
}

/// Validated, immutable limiter parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimiterSettings {
    window_size_ms: i64,
    max_per_window: u64,
    retention_windows: u64,
    failure_policy: FailurePolicy,
    store_timeout: Duration,
    read_retries: u32,
    gc: GcStrategy,
    store_name: String,
}

impl LimiterSettings {
    pub fn window_size_ms(&self) -> i64 {
        self.window_size_ms
    }

    pub fn max_per_window(&self) -> u64 {
        self.max_per_window
    }

    pub fn retention_windows(&self) -> u64 {
        self.retention_windows
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }

    pub fn store_timeout(&self) -> Duration {
        self.store_timeout
    }

    pub fn read_retries(&self) -> u32 {
        self.read_retries
    }

    pub fn gc(&self) -> &GcStrategy {
        &self.gc
    }

    pub fn store_name(&self) -> &str {
        &self.store_name
    }
}

impl TurnstileConfig {
    /// Load configuration from an optional file, overridden by `TURNSTILE__*`
    /// environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();

        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(::config::File::from(path));
        }

        builder = builder.add_source(
            ::config::Environment::with_prefix("TURNSTILE")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: TurnstileConfig = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| invalid(format!("Failed to parse configuration: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config_uses_defaults() {
        let yaml = r#"
limiter:
  failure_policy: fail-closed
"#;
        let config = TurnstileConfig::from_yaml(yaml).unwrap();
        let settings = config.limiter.validate().unwrap();

        assert_eq!(settings.window_size_ms(), 1000);
        assert_eq!(settings.max_per_window(), 100);
        assert_eq!(settings.retention_windows(), 1);
        assert_eq!(settings.failure_policy(), FailurePolicy::FailClosed);
        assert_eq!(settings.store_timeout(), Duration::from_millis(250));
        assert_eq!(settings.gc(), &GcStrategy::Lazy);
        assert_eq!(settings.store_name(), "rate-limit-store");
    }

    #[test]
    fn test_parse_sweep_strategy() {
        let yaml = r#"
limiter:
  window_size_ms: 60000
  max_per_window: 10
  retention_windows: 3
  failure_policy: fail-open
  gc:
    strategy: sweep
    interval_ms: 5000
"#;
        let config = TurnstileConfig::from_yaml(yaml).unwrap();
        let settings = config.limiter.validate().unwrap();

        assert_eq!(settings.failure_policy(), FailurePolicy::FailOpen);
        assert_eq!(settings.gc(), &GcStrategy::Sweep { interval_ms: 5000 });
        assert_eq!(settings.retention_windows(), 3);
    }

    #[test]
    fn test_missing_failure_policy_rejected() {
        let yaml = r#"
limiter:
  max_per_window: 5
"#;
        assert!(TurnstileConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let base = LimiterConfig::new(FailurePolicy::FailClosed);

        assert!(base.clone().with_limit(0, 10).validate().is_err());
        assert!(base.clone().with_limit(-1000, 10).validate().is_err());
        assert!(base.clone().with_limit(1000, -1).validate().is_err());
        assert!(base.clone().with_retention(0).validate().is_err());
        assert!(base
            .clone()
            .with_gc(GcStrategy::Sweep { interval_ms: 0 })
            .validate()
            .is_err());
        assert!(base.clone().with_store_timeout(Duration::ZERO).validate().is_err());
    }

    #[test]
    fn test_zero_max_is_valid() {
        let settings = LimiterConfig::new(FailurePolicy::FailOpen)
            .with_limit(1000, 0)
            .validate()
            .unwrap();
        assert_eq!(settings.max_per_window(), 0);
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!(
            "turnstile-config-{}.yaml",
            std::process::id()
        ));
        std::fs::write(
            &path,
            "limiter:\n  window_size_ms: 500\n  max_per_window: 7\n  failure_policy: fail-closed\n",
        )
        .unwrap();

        let config = TurnstileConfig::load(Some(&path)).unwrap();
        assert_eq!(config.limiter.window_size_ms, 500);
        assert_eq!(config.limiter.max_per_window, 7);
        assert_eq!(config.limiter.failure_policy, FailurePolicy::FailClosed);

        // Environment variables override the file. Kept in this test so no
        // other test loads while the variable is set.
        std::env::set_var("TURNSTILE__LIMITER__MAX_PER_WINDOW", "50");
        let config = TurnstileConfig::load(Some(&path));
        std::env::remove_var("TURNSTILE__LIMITER__MAX_PER_WINDOW");
        std::fs::remove_file(&path).ok();

        let config = config.unwrap();
        assert_eq!(config.limiter.max_per_window, 50);
        assert_eq!(config.limiter.window_size_ms, 500);
    }
}
