use std::fmt;

use serde::{Deserialize, Serialize};

/// How a remote version meeting unsaved local edits is settled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    /// Later edit time wins; ties go to the persisted remote version.
    #[default]
    Timestamp,
    /// Higher version number wins. Unsaved edits count as the baseline version.
    Version,
    /// Hold both candidates until `resolve` is called.
    Manual,
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictPolicy::Timestamp => write!(f, "timestamp"),
            ConflictPolicy::Version => write!(f, "version"),
            ConflictPolicy::Manual => write!(f, "manual"),
        }
    }
}

/// The user's answer to a manual conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionChoice {
    KeepLocal,
    TakeRemote,
}
