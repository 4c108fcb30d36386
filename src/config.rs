//! Engine configuration.
//!
//! All fields have defaults; a TOML document only needs to name what it
//! overrides:
//!
//! ```
//! use case_sync::{ConflictPolicy, SyncConfig};
//!
//! let config = SyncConfig::from_toml_str(r#"
//!     debounce_ms = 500
//!     conflict_policy = "version"
//! "#).unwrap();
//! assert_eq!(config.debounce().as_millis(), 500);
//! assert_eq!(config.conflict_policy, ConflictPolicy::Version);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::conflict::ConflictPolicy;

/// Error type for configuration loading and validation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("config parse error: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Timers, limits and policy for one sync session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Quiet period after the last local edit before a commit is attempted.
    pub debounce_ms: u64,
    /// Forced commit check interval, independent of edit activity.
    pub periodic_check_ms: u64,
    /// Window in which an origin-less remote event is treated as our own echo.
    pub echo_window_ms: u64,
    /// First retry delay after a failed commit.
    pub retry_initial_ms: u64,
    /// Upper bound for the retry delay.
    pub retry_max_ms: u64,
    /// Upper bound for a single commit round trip before it counts as failed.
    pub commit_timeout_ms: u64,
    /// Largest serialized document accepted for commit.
    pub max_payload_bytes: usize,
    pub conflict_policy: ConflictPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 2_000,
            periodic_check_ms: 3 * 60 * 60 * 1_000,
            echo_window_ms: 10_000,
            retry_initial_ms: 1_000,
            retry_max_ms: 5 * 60 * 1_000,
            commit_timeout_ms: 30_000,
            max_payload_bytes: 5 * 1024 * 1024,
            conflict_policy: ConflictPolicy::default(),
        }
    }
}

impl SyncConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: SyncConfig =
            toml::from_str(source).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.debounce_ms == 0 {
            return Err(ConfigError::Invalid("debounce_ms must be > 0".into()));
        }
        if self.periodic_check_ms <= self.debounce_ms {
            return Err(ConfigError::Invalid(
                "periodic_check_ms must be longer than debounce_ms".into(),
            ));
        }
        if self.retry_initial_ms == 0 || self.retry_max_ms < self.retry_initial_ms {
            return Err(ConfigError::Invalid(
                "retry_max_ms must be >= retry_initial_ms > 0".into(),
            ));
        }
        if self.commit_timeout_ms == 0 {
            return Err(ConfigError::Invalid("commit_timeout_ms must be > 0".into()));
        }
        if self.max_payload_bytes == 0 {
            return Err(ConfigError::Invalid("max_payload_bytes must be > 0".into()));
        }
        Ok(())
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce_ms = millis(debounce);
        self
    }

    pub fn with_periodic_check(mut self, interval: Duration) -> Self {
        self.periodic_check_ms = millis(interval);
        self
    }

    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    pub fn with_retry(mut self, initial: Duration, max: Duration) -> Self {
        self.retry_initial_ms = millis(initial);
        self.retry_max_ms = millis(max);
        self
    }

    pub fn with_max_payload_bytes(mut self, max: usize) -> Self {
        self.max_payload_bytes = max;
        self
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn periodic_check(&self) -> Duration {
        Duration::from_millis(self.periodic_check_ms)
    }

    pub fn echo_window(&self) -> Duration {
        Duration::from_millis(self.echo_window_ms)
    }

    pub fn retry_initial(&self) -> Duration {
        Duration::from_millis(self.retry_initial_ms)
    }

    pub fn retry_max(&self) -> Duration {
        Duration::from_millis(self.retry_max_ms)
    }

    pub fn commit_timeout(&self) -> Duration {
        Duration::from_millis(self.commit_timeout_ms)
    }
}

/// Whole milliseconds, saturating at `u64::MAX`.
fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
