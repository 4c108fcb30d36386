use std::fmt::Write as _;
use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use super::describe::describe_version;
use crate::clock::Clock;
use crate::document::{ActorId, CaseId};
use crate::error::SyncError;
use crate::version::{
    BackingStore, CommitRequest, VersionId, VersionRecord, VersionSource, VersionStore,
    VersionSummary,
};

/// A history row with its human-readable label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionEntry {
    #[serde(flatten)]
    pub summary: VersionSummary,
    pub description: String,
}

/// Read-only history browser plus restore.
///
/// Restoring never touches the old version: it commits a copy of its payload
/// as the next version, so version numbers keep increasing.
pub struct VersionRecovery<B> {
    store: VersionStore<B>,
    clock: Arc<dyn Clock>,
}

impl<B: BackingStore> VersionRecovery<B> {
    pub fn new(store: VersionStore<B>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// All versions of a case, newest first, with descriptions.
    pub fn list_versions(&self, case_id: &CaseId) -> Result<Vec<VersionEntry>, SyncError> {
        let now = self.clock.now();
        Ok(self
            .store
            .get_history(case_id)?
            .into_iter()
            .map(|summary| VersionEntry {
                description: describe_version(&summary, now),
                summary,
            })
            .collect())
    }

    /// Full record of any version. Nothing is changed.
    pub fn preview(&self, version_id: &VersionId) -> Result<VersionRecord, SyncError> {
        self.store
            .get_version(version_id)?
            .ok_or(SyncError::VersionNotFound(*version_id))
    }

    /// Commit a copy of an old version as the new current one.
    ///
    /// Fails with `VersionNotFound` if the version is gone or belongs to
    /// another case; the caller should refresh its history first.
    pub fn restore(
        &self,
        case_id: &CaseId,
        version_id: &VersionId,
        actor: Option<&ActorId>,
    ) -> Result<VersionRecord, SyncError> {
        let target = self.preview(version_id)?;
        if &target.case_id != case_id {
            return Err(SyncError::VersionNotFound(*version_id));
        }

        let restored = self.store.commit_request(
            CommitRequest::new(case_id.clone(), target.payload)
                .by(actor.cloned())
                .source(VersionSource::UserRestore)
                .restored_from(target.version),
        )?;
        info!(
            case_id = %case_id,
            from = target.version,
            version = restored.version,
            "version restored"
        );
        Ok(restored)
    }

    /// Plain-text report of a version: a header followed by the document.
    pub fn export_text(&self, version_id: &VersionId) -> Result<String, SyncError> {
        let record = self.preview(version_id)?;
        let mut out = String::new();
        let _ = writeln!(out, "Case: {}", record.case_id);
        let _ = writeln!(out, "Version: {} ({})", record.version, record.name);
        let _ = writeln!(out, "Source: {}", record.source.label());
        if let Some(actor) = &record.created_by {
            let _ = writeln!(out, "Created by: {actor}");
        }
        let _ = writeln!(out, "Created at: {}", record.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
        if let Some(from) = record.restored_from {
            let _ = writeln!(out, "Restored from: v{from}");
        }
        if record.is_current {
            let _ = writeln!(out, "Current: yes");
        }
        out.push('\n');
        out.push_str(&record.payload.to_pretty_string());
        out.push('\n');
        Ok(out)
    }
}
