use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::document::{ActorId, CaseId, Document};

/// Store-assigned identity of one document version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionId(Uuid);

impl VersionId {
    pub fn generate() -> Self {
        VersionId(Uuid::new_v4())
    }

    pub fn parse(value: &str) -> Option<Self> {
        Uuid::parse_str(value).ok().map(VersionId)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// What produced a version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionSource {
    /// Auto-save or manual save of local edits.
    System,
    /// Restore of an older version.
    UserRestore,
    /// Document pushed in by an outside integration.
    ExternalImport,
}

impl VersionSource {
    /// Short human label used in version descriptions.
    pub fn label(&self) -> &'static str {
        match self {
            VersionSource::System => "Auto-save",
            VersionSource::UserRestore => "Restored",
            VersionSource::ExternalImport => "Imported",
        }
    }
}

impl fmt::Display for VersionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            VersionSource::System => "system",
            VersionSource::UserRestore => "user_restore",
            VersionSource::ExternalImport => "external_import",
        })
    }
}

/// An immutable snapshot of a case document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionRecord {
    pub id: VersionId,
    pub case_id: CaseId,
    pub version: u64,
    pub is_current: bool,
    pub name: String,
    pub payload: Document,
    pub source: VersionSource,
    pub created_by: Option<ActorId>,
    pub created_at: DateTime<Utc>,
    /// Version number this one was restored from, for restores.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restored_from: Option<u64>,
}

impl VersionRecord {
    pub fn summary(&self) -> VersionSummary {
        VersionSummary {
            id: self.id,
            case_id: self.case_id.clone(),
            version: self.version,
            is_current: self.is_current,
            name: self.name.clone(),
            source: self.source,
            created_by: self.created_by.clone(),
            created_at: self.created_at,
            restored_from: self.restored_from,
        }
    }
}

/// A version record without its payload, for history listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionSummary {
    pub id: VersionId,
    pub case_id: CaseId,
    pub version: u64,
    pub is_current: bool,
    pub name: String,
    pub source: VersionSource,
    pub created_by: Option<ActorId>,
    pub created_at: DateTime<Utc>,
    pub restored_from: Option<u64>,
}

/// Row handed to `BackingStore::insert_version`. Always inserted as current.
#[derive(Debug, Clone, PartialEq)]
pub struct NewVersion {
    pub case_id: CaseId,
    pub version: u64,
    pub name: String,
    pub payload: Document,
    pub source: VersionSource,
    pub created_by: Option<ActorId>,
    pub created_at: DateTime<Utc>,
    pub restored_from: Option<u64>,
}

impl NewVersion {
    pub fn into_record(self, id: VersionId) -> VersionRecord {
        VersionRecord {
            id,
            case_id: self.case_id,
            version: self.version,
            is_current: true,
            name: self.name,
            payload: self.payload,
            source: self.source,
            created_by: self.created_by,
            created_at: self.created_at,
            restored_from: self.restored_from,
        }
    }
}

/// `{case}_helper_v{n}`
pub fn version_name(case_id: &CaseId, version: u64) -> String {
    format!("{}_helper_v{}", case_id, version)
}

/// Lifecycle of a case. Cases are never deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    Open,
    InProgress,
    Closed,
    Archived,
}

impl CaseStatus {
    pub fn can_transition_to(self, next: CaseStatus) -> bool {
        use CaseStatus::*;
        matches!(
            (self, next),
            (Open, InProgress) | (Open, Closed) | (InProgress, Closed) | (InProgress, Archived)
                | (Closed, Archived)
        )
    }

    /// Closed and archived cases are read-only.
    pub fn accepts_commits(self) -> bool {
        matches!(self, CaseStatus::Open | CaseStatus::InProgress)
    }
}

impl fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CaseStatus::Open => "open",
            CaseStatus::InProgress => "in_progress",
            CaseStatus::Closed => "closed",
            CaseStatus::Archived => "archived",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseRecord {
    pub key: CaseId,
    pub status: CaseStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
