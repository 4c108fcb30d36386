//! Non-blocking warnings and errors surfaced to the UI.

use std::fmt;

use chrono::{DateTime, Utc};

use crate::document::CaseId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// Something the engine absorbed but the user should hear about.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    /// A commit failed transiently; the edits are kept and retried.
    CommitFailed {
        case_id: CaseId,
        attempt: u32,
        error: String,
        retry_at: DateTime<Utc>,
    },
    /// A commit was refused for good (malformed payload, closed case).
    CommitRejected { case_id: CaseId, error: String },
    /// A retried commit went through.
    CommitRecovered {
        case_id: CaseId,
        version: u64,
        attempts: u32,
    },
    /// A newer remote version replaced unsaved local edits.
    LocalEditsDiscarded {
        case_id: CaseId,
        remote_version: u64,
        pending_since: DateTime<Utc>,
    },
    /// Local edits won; the remote version was not adopted.
    RemoteDiscarded { case_id: CaseId, remote_version: u64 },
    /// A conflict waits for `resolve`.
    ConflictAwaitingChoice {
        case_id: CaseId,
        local_base: Option<u64>,
        remote_version: u64,
    },
    /// The cross-session channel failed.
    TransportError { error: String },
}

impl Notice {
    pub fn case_id(&self) -> Option<&CaseId> {
        match self {
            Notice::CommitFailed { case_id, .. }
            | Notice::CommitRejected { case_id, .. }
            | Notice::CommitRecovered { case_id, .. }
            | Notice::LocalEditsDiscarded { case_id, .. }
            | Notice::RemoteDiscarded { case_id, .. }
            | Notice::ConflictAwaitingChoice { case_id, .. } => Some(case_id),
            Notice::TransportError { .. } => None,
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            Notice::CommitRecovered { .. } | Notice::RemoteDiscarded { .. } => Severity::Info,
            Notice::CommitFailed { .. }
            | Notice::LocalEditsDiscarded { .. }
            | Notice::ConflictAwaitingChoice { .. }
            | Notice::TransportError { .. } => Severity::Warning,
            Notice::CommitRejected { .. } => Severity::Error,
        }
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::CommitFailed {
                case_id,
                attempt,
                error,
                retry_at,
            } => write!(
                f,
                "saving {case_id} failed (attempt {attempt}): {error}; retrying at {retry_at}"
            ),
            Notice::CommitRejected { case_id, error } => {
                write!(f, "saving {case_id} was rejected: {error}")
            }
            Notice::CommitRecovered {
                case_id,
                version,
                attempts,
            } => write!(f, "{case_id} saved as v{version} after {attempts} attempts"),
            Notice::LocalEditsDiscarded {
                case_id,
                remote_version,
                pending_since,
            } => write!(
                f,
                "unsaved edits to {case_id} since {pending_since} replaced by v{remote_version}"
            ),
            Notice::RemoteDiscarded {
                case_id,
                remote_version,
            } => write!(f, "kept local edits to {case_id} over v{remote_version}"),
            Notice::ConflictAwaitingChoice {
                case_id,
                remote_version,
                ..
            } => write!(f, "{case_id} changed elsewhere (v{remote_version}); choose a version"),
            Notice::TransportError { error } => write!(f, "sync channel error: {error}"),
        }
    }
}
