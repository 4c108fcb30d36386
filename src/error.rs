use thiserror::Error;

use crate::config::ConfigError;
use crate::document::{CaseId, ValidationError};
use crate::notify::TransportError;
use crate::version::{CaseStatus, StoreError, VersionId};

/// Top-level error for engine operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("malformed payload: {0}")]
    MalformedPayload(ValidationError),
    #[error("no case key resolvable; refusing to create an anonymous case")]
    MissingCaseKey,
    #[error("version {0} not found")]
    VersionNotFound(VersionId),
    #[error("case {0} not found")]
    CaseNotFound(CaseId),
    #[error("case {case_id} is {status} and accepts no new versions")]
    CaseClosed { case_id: CaseId, status: CaseStatus },
    #[error("case {case_id} cannot move from {from} to {to}")]
    InvalidTransition {
        case_id: CaseId,
        from: CaseStatus,
        to: CaseStatus,
    },
    #[error("case {0} is not open in this session")]
    CaseNotOpen(CaseId),
    #[error("no conflict awaiting a decision for case {0}")]
    NoPendingConflict(CaseId),
    #[error("a commit for case {0} is already in flight")]
    Busy(CaseId),
    #[error("case {0} has a conflict awaiting a decision")]
    AwaitingConflictChoice(CaseId),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl SyncError {
    /// Transient failures that the auto-save path absorbs and retries.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Store(err) => err.is_retryable(),
            SyncError::Transport(err) => err.is_retryable(),
            _ => false,
        }
    }
}

impl From<ValidationError> for SyncError {
    fn from(err: ValidationError) -> Self {
        match err {
            ValidationError::MissingCaseKey => SyncError::MissingCaseKey,
            other => SyncError::MalformedPayload(other),
        }
    }
}
