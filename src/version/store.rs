use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use super::backing::BackingStore;
use super::error::StoreError;
use super::record::{
    version_name, CaseRecord, CaseStatus, NewVersion, VersionId, VersionRecord, VersionSource,
    VersionSummary,
};
use crate::clock::{Clock, SystemClock};
use crate::document::{ActorId, CaseId, Document};
use crate::error::SyncError;

/// Duplicate-version inserts are retried this many times before giving up.
const MAX_INSERT_ATTEMPTS: usize = 3;

/// Everything needed to create one new version.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitRequest {
    pub case_id: CaseId,
    pub payload: Document,
    pub actor: Option<ActorId>,
    pub source: VersionSource,
    pub restored_from: Option<u64>,
}

impl CommitRequest {
    pub fn new(case_id: CaseId, payload: Document) -> Self {
        Self {
            case_id,
            payload,
            actor: None,
            source: VersionSource::System,
            restored_from: None,
        }
    }

    pub fn by(mut self, actor: Option<ActorId>) -> Self {
        self.actor = actor;
        self
    }

    pub fn source(mut self, source: VersionSource) -> Self {
        self.source = source;
        self
    }

    pub fn restored_from(mut self, version: u64) -> Self {
        self.restored_from = Some(version);
        self
    }
}

/// Versioned document store on top of a `BackingStore`.
///
/// Validates payloads before any store call, assigns monotonically increasing
/// version numbers, and keeps exactly one version per case flagged current.
/// Clone-friendly when the backing store is.
#[derive(Clone)]
pub struct VersionStore<B> {
    backing: B,
    clock: Arc<dyn Clock>,
    max_payload_bytes: usize,
}

impl<B: BackingStore> VersionStore<B> {
    pub fn new(backing: B) -> Self {
        Self::with_clock(backing, Arc::new(SystemClock))
    }

    pub fn with_clock(backing: B, clock: Arc<dyn Clock>) -> Self {
        Self {
            backing,
            clock,
            max_payload_bytes: crate::SyncConfig::default().max_payload_bytes,
        }
    }

    pub fn with_max_payload_bytes(mut self, max: usize) -> Self {
        self.max_payload_bytes = max;
        self
    }

    pub fn backing(&self) -> &B {
        &self.backing
    }

    /// Commit a payload as the new current version of a case.
    pub fn commit(
        &self,
        case_id: &CaseId,
        payload: &Document,
        actor: Option<&ActorId>,
        source: VersionSource,
    ) -> Result<VersionRecord, SyncError> {
        self.commit_request(
            CommitRequest::new(case_id.clone(), payload.clone())
                .by(actor.cloned())
                .source(source),
        )
    }

    /// Commit with full control over the audit fields.
    ///
    /// Sequence: find-or-create the case, flip every version to not-current,
    /// read `max(version) + 1`, insert the new current row. A concurrent
    /// committer that grabbed the same number makes the insert fail with a
    /// duplicate, and the number is recomputed. Any other failure after the
    /// flip hands the current flag back to the newest version, so a failed
    /// commit never leaves the case without a current version.
    pub fn commit_request(&self, request: CommitRequest) -> Result<VersionRecord, SyncError> {
        request.payload.validate(self.max_payload_bytes)?;

        let now = self.clock.now();
        let case = self.backing.find_or_create_case(&request.case_id, now)?;
        if !case.status.accepts_commits() {
            return Err(SyncError::CaseClosed {
                case_id: request.case_id,
                status: case.status,
            });
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            let flipped = self.backing.clear_current(&request.case_id)?;
            match self.insert_next(&request, now, flipped) {
                Ok(record) => {
                    info!(
                        case_id = %record.case_id,
                        version = record.version,
                        source = %record.source,
                        "version committed"
                    );
                    return Ok(record);
                }
                Err(StoreError::DuplicateVersion { version, .. })
                    if attempt < MAX_INSERT_ATTEMPTS =>
                {
                    warn!(case_id = %request.case_id, version, attempt, "version number taken, retrying");
                }
                Err(err) => {
                    self.undo_flip(&request.case_id);
                    return Err(err.into());
                }
            }
        }
    }

    fn insert_next(
        &self,
        request: &CommitRequest,
        now: DateTime<Utc>,
        flipped: usize,
    ) -> Result<VersionRecord, StoreError> {
        let next = self
            .backing
            .max_version(&request.case_id)?
            .map_or(1, |max| max + 1);
        debug!(case_id = %request.case_id, flipped, next, "committing version");

        self.backing.insert_version(NewVersion {
            case_id: request.case_id.clone(),
            version: next,
            name: version_name(&request.case_id, next),
            payload: request.payload.clone(),
            source: request.source,
            created_by: request.actor.clone(),
            created_at: now,
            restored_from: request.restored_from,
        })
    }

    /// Put the current flag back on the newest row after a failed insert.
    fn undo_flip(&self, case_id: &CaseId) {
        match self.backing.restore_current(case_id) {
            Ok(Some(version)) => {
                warn!(case_id = %case_id, version, "commit failed, previous version is current again")
            }
            Ok(None) => {}
            Err(err) => {
                error!(case_id = %case_id, error = %err, "commit failed and the current flag could not be restored")
            }
        }
    }

    pub fn get_current(&self, case_id: &CaseId) -> Result<Option<VersionRecord>, SyncError> {
        Ok(self.backing.current_version(case_id)?)
    }

    /// Version summaries, newest first.
    pub fn get_history(&self, case_id: &CaseId) -> Result<Vec<VersionSummary>, SyncError> {
        let mut versions = self.backing.versions_for_case(case_id)?;
        versions.sort_by(|a, b| b.version.cmp(&a.version));
        Ok(versions.iter().map(VersionRecord::summary).collect())
    }

    pub fn get_version(&self, id: &VersionId) -> Result<Option<VersionRecord>, SyncError> {
        Ok(self.backing.version_by_id(id)?)
    }

    pub fn get_case(&self, case_id: &CaseId) -> Result<Option<CaseRecord>, SyncError> {
        Ok(self.backing.get_case(case_id)?)
    }

    /// Move a case along its lifecycle.
    pub fn transition_case(
        &self,
        case_id: &CaseId,
        next: CaseStatus,
    ) -> Result<CaseRecord, SyncError> {
        let case = self
            .backing
            .get_case(case_id)?
            .ok_or_else(|| SyncError::CaseNotFound(case_id.clone()))?;
        if !case.status.can_transition_to(next) {
            return Err(SyncError::InvalidTransition {
                case_id: case_id.clone(),
                from: case.status,
                to: next,
            });
        }
        let updated = self
            .backing
            .update_case_status(case_id, next, self.clock.now())?
            .ok_or_else(|| SyncError::CaseNotFound(case_id.clone()))?;
        info!(case_id = %case_id, from = %case.status, to = %next, "case status changed");
        Ok(updated)
    }
}
