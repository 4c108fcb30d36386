use std::time::Duration;

use thiserror::Error;

/// Errors raised by a backing store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("backing store unavailable: {0}")]
    Unavailable(String),
    #[error("backing store timed out after {0:?}")]
    Timeout(Duration),
    #[error("store lock poisoned during {0}")]
    LockPoisoned(&'static str),
    #[error("version {version} already exists for case {case_id}")]
    DuplicateVersion { case_id: String, version: u64 },
    #[error("backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Transient failures the auto-save path retries with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::Unavailable(_) | StoreError::Timeout(_) | StoreError::DuplicateVersion { .. }
        )
    }
}
