use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use super::policy::{ConflictPolicy, ResolutionChoice};
use crate::cache::{Baseline, LocalCache};
use crate::document::CaseId;
use crate::error::SyncError;
use crate::notify::ChangeEnvelope;

/// Why a remote event changed nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Older than what this session already has.
    Stale,
    /// Same version as the baseline or the one already awaiting a choice.
    Duplicate,
    /// The case is not open here.
    NotOpen,
    /// The event describes a version that was not current when published.
    NotCurrent,
}

/// Outcome of handling one remote version.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// No local divergence; the remote version was taken as is.
    Adopted { version: u64 },
    /// Local edits lost to the remote version and were discarded.
    RemoteWon {
        version: u64,
        discarded_since: DateTime<Utc>,
    },
    /// Local edits won; they now sit on top of the remote version.
    LocalKept { remote_version: u64 },
    /// Manual policy: waiting for `resolve`.
    AwaitingChoice { remote_version: u64 },
    Ignored { reason: IgnoreReason },
}

impl Resolution {
    pub fn changed_cache(&self) -> bool {
        matches!(
            self,
            Resolution::Adopted { .. } | Resolution::RemoteWon { .. }
        )
    }
}

/// Both candidates of a conflict held for the user.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingConflict {
    pub case_id: CaseId,
    pub local_base: Option<u64>,
    pub local_edit_at: Option<DateTime<Utc>>,
    pub pending_since: DateTime<Utc>,
    pub remote: ChangeEnvelope,
    pub detected_at: DateTime<Utc>,
}

/// Settles remote versions against the local cache.
///
/// Remote versions at or below the local baseline are ignored, which makes
/// repeated delivery of the same event harmless.
pub struct ConflictResolver {
    policy: ConflictPolicy,
    pending: Mutex<HashMap<CaseId, PendingConflict>>,
    last: Mutex<HashMap<CaseId, Resolution>>,
}

impl ConflictResolver {
    pub fn new(policy: ConflictPolicy) -> Self {
        Self {
            policy,
            pending: Mutex::new(HashMap::new()),
            last: Mutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> ConflictPolicy {
        self.policy
    }

    /// Merge one remote version into the cache.
    ///
    /// Returns the resolution and the sections whose content changed in the
    /// working copy.
    pub fn handle_remote(
        &self,
        envelope: &ChangeEnvelope,
        cache: &LocalCache,
        now: DateTime<Utc>,
    ) -> Result<(Resolution, Vec<String>), SyncError> {
        let case_id = &envelope.case_id;
        let (resolution, changed) = self.decide(envelope, cache, now)?;

        match &resolution {
            Resolution::Ignored { reason } => {
                debug!(case_id = %case_id, version = envelope.version, ?reason, "remote version ignored");
            }
            other => {
                info!(
                    case_id = %case_id,
                    version = envelope.version,
                    policy = %self.policy,
                    resolution = ?other,
                    "remote version handled"
                );
                self.last
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(case_id.clone(), other.clone());
            }
        }
        Ok((resolution, changed))
    }

    fn decide(
        &self,
        envelope: &ChangeEnvelope,
        cache: &LocalCache,
        now: DateTime<Utc>,
    ) -> Result<(Resolution, Vec<String>), SyncError> {
        let ignored = |reason| Ok((Resolution::Ignored { reason }, Vec::new()));
        let case_id = &envelope.case_id;

        if !cache.is_open(case_id) {
            return ignored(IgnoreReason::NotOpen);
        }
        if !envelope.is_current {
            return ignored(IgnoreReason::NotCurrent);
        }

        let entry = cache.snapshot(case_id)?;
        if let Some(base) = entry.baseline_version() {
            if envelope.version < base {
                return ignored(IgnoreReason::Stale);
            }
            if envelope.version == base {
                return ignored(IgnoreReason::Duplicate);
            }
        }

        let remote = Baseline::from_envelope(envelope);
        let marker = match entry.pending {
            Some(marker) if entry.is_dirty() => marker,
            _ => {
                // No divergence: take it and drop any stale marker.
                self.clear(case_id);
                let changed = cache.adopt(case_id, remote)?;
                return Ok((
                    Resolution::Adopted {
                        version: envelope.version,
                    },
                    changed,
                ));
            }
        };

        let remote_wins = match self.policy {
            ConflictPolicy::Timestamp => entry
                .last_local_edit_at
                .map_or(true, |edited| envelope.timestamp >= edited),
            ConflictPolicy::Version => {
                envelope.version > entry.baseline_version().unwrap_or(0)
            }
            ConflictPolicy::Manual => {
                let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
                if let Some(existing) = pending.get(case_id) {
                    if envelope.version <= existing.remote.version {
                        return ignored(IgnoreReason::Duplicate);
                    }
                }
                pending.insert(
                    case_id.clone(),
                    PendingConflict {
                        case_id: case_id.clone(),
                        local_base: entry.baseline_version(),
                        local_edit_at: entry.last_local_edit_at,
                        pending_since: marker.since,
                        remote: envelope.clone(),
                        detected_at: now,
                    },
                );
                return Ok((
                    Resolution::AwaitingChoice {
                        remote_version: envelope.version,
                    },
                    Vec::new(),
                ));
            }
        };

        if remote_wins {
            let changed = cache.adopt(case_id, remote)?;
            Ok((
                Resolution::RemoteWon {
                    version: envelope.version,
                    discarded_since: marker.since,
                },
                changed,
            ))
        } else {
            cache.rebase(case_id, remote)?;
            Ok((
                Resolution::LocalKept {
                    remote_version: envelope.version,
                },
                Vec::new(),
            ))
        }
    }

    /// Apply the user's decision to a conflict held under the manual policy.
    pub fn resolve(
        &self,
        case_id: &CaseId,
        choice: ResolutionChoice,
        cache: &LocalCache,
    ) -> Result<(Resolution, Vec<String>), SyncError> {
        let conflict = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(case_id)
            .ok_or_else(|| SyncError::NoPendingConflict(case_id.clone()))?;

        let remote = Baseline::from_envelope(&conflict.remote);
        let (resolution, changed) = match choice {
            ResolutionChoice::TakeRemote => {
                let changed = cache.adopt(case_id, remote)?;
                (
                    Resolution::RemoteWon {
                        version: conflict.remote.version,
                        discarded_since: conflict.pending_since,
                    },
                    changed,
                )
            }
            ResolutionChoice::KeepLocal => {
                cache.rebase(case_id, remote)?;
                (
                    Resolution::LocalKept {
                        remote_version: conflict.remote.version,
                    },
                    Vec::new(),
                )
            }
        };

        info!(case_id = %case_id, ?choice, remote_version = conflict.remote.version, "conflict resolved");
        self.last
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(case_id.clone(), resolution.clone());
        Ok((resolution, changed))
    }

    pub fn pending(&self, case_id: &CaseId) -> Option<PendingConflict> {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(case_id)
            .cloned()
    }

    /// Most recent non-ignored resolution for a case.
    pub fn last_resolution(&self, case_id: &CaseId) -> Option<Resolution> {
        self.last
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(case_id)
            .cloned()
    }

    /// Forget any held conflict for a case.
    pub fn clear(&self, case_id: &CaseId) -> Option<PendingConflict> {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(case_id)
    }

    /// Forget everything about a case.
    pub fn forget(&self, case_id: &CaseId) {
        self.clear(case_id);
        self.last
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(case_id);
    }
}
