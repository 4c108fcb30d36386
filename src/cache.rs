//! Local Cache - the session's working copy of every open case.
//!
//! The cache is the only place the working document lives. The scheduler,
//! resolver and session facade all receive a handle to it; nothing reaches it
//! through a global.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::document::{changed_sections, CaseId, Document};
use crate::error::SyncError;
use crate::notify::ChangeEnvelope;
use crate::version::{VersionId, VersionRecord};

/// The last persisted version this session knows the document derives from.
#[derive(Debug, Clone, PartialEq)]
pub struct Baseline {
    pub version: u64,
    pub version_id: VersionId,
    pub payload: Document,
    pub committed_at: DateTime<Utc>,
}

impl Baseline {
    pub fn from_record(record: &VersionRecord) -> Self {
        Self {
            version: record.version,
            version_id: record.id,
            payload: record.payload.clone(),
            committed_at: record.created_at,
        }
    }

    pub fn from_envelope(envelope: &ChangeEnvelope) -> Self {
        Self {
            version: envelope.version,
            version_id: envelope.version_id,
            payload: envelope.payload.clone(),
            committed_at: envelope.timestamp,
        }
    }
}

/// Local divergence from the baseline since `since`. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingEditMarker {
    pub since: DateTime<Utc>,
}

/// Working state of one case.
#[derive(Debug, Clone, PartialEq)]
pub struct CaseEntry {
    pub case_id: CaseId,
    pub document: Document,
    pub baseline: Option<Baseline>,
    pub pending: Option<PendingEditMarker>,
    pub last_local_edit_at: Option<DateTime<Utc>>,
}

impl CaseEntry {
    fn new(case_id: CaseId, current: Option<&VersionRecord>) -> Self {
        Self {
            case_id,
            document: current.map(|r| r.payload.clone()).unwrap_or_default(),
            baseline: current.map(Baseline::from_record),
            pending: None,
            last_local_edit_at: None,
        }
    }

    /// Structural difference from the baseline payload.
    pub fn is_dirty(&self) -> bool {
        match &self.baseline {
            Some(baseline) => baseline.payload != self.document,
            None => !self.document.is_empty(),
        }
    }

    pub fn baseline_version(&self) -> Option<u64> {
        self.baseline.as_ref().map(|b| b.version)
    }

    fn baseline_payload(&self) -> Document {
        self.baseline
            .as_ref()
            .map(|b| b.payload.clone())
            .unwrap_or_default()
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        if self.pending.is_none() {
            self.pending = Some(PendingEditMarker { since: now });
        }
        self.last_local_edit_at = Some(now);
    }
}

/// Session-local working copies.
///
/// Clone-friendly (cloning shares the same underlying storage).
#[derive(Debug, Clone, Default)]
pub struct LocalCache {
    entries: Arc<RwLock<HashMap<CaseId, CaseEntry>>>,
}

impl LocalCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_entry<T>(
        &self,
        case_id: &CaseId,
        f: impl FnOnce(&mut CaseEntry) -> T,
    ) -> Result<T, SyncError> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let entry = entries
            .get_mut(case_id)
            .ok_or_else(|| SyncError::CaseNotOpen(case_id.clone()))?;
        Ok(f(entry))
    }

    /// Open a case seeded from its current version. Reopening keeps the
    /// existing working copy.
    pub fn open(&self, case_id: &CaseId, current: Option<&VersionRecord>) -> CaseEntry {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries
            .entry(case_id.clone())
            .or_insert_with(|| CaseEntry::new(case_id.clone(), current))
            .clone()
    }

    pub fn close(&self, case_id: &CaseId) -> Option<CaseEntry> {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(case_id)
    }

    pub fn is_open(&self, case_id: &CaseId) -> bool {
        self.entries
            .read()
            .map(|e| e.contains_key(case_id))
            .unwrap_or(false)
    }

    pub fn open_cases(&self) -> Vec<CaseId> {
        self.entries
            .read()
            .map(|e| e.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn snapshot(&self, case_id: &CaseId) -> Result<CaseEntry, SyncError> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(case_id)
            .cloned()
            .ok_or_else(|| SyncError::CaseNotOpen(case_id.clone()))
    }

    pub fn document(&self, case_id: &CaseId) -> Result<Document, SyncError> {
        self.snapshot(case_id).map(|e| e.document)
    }

    /// Set one section. Returns false (and leaves the marker alone) when the
    /// value is unchanged.
    pub fn edit_section(
        &self,
        case_id: &CaseId,
        section: &str,
        value: Value,
        now: DateTime<Utc>,
    ) -> Result<bool, SyncError> {
        self.with_entry(case_id, |entry| -> Result<bool, SyncError> {
            if entry.document.section(section) == Some(&value) {
                return Ok(false);
            }
            entry.document.set_section(section, value)?;
            entry.touch(now);
            Ok(true)
        })?
    }

    pub fn remove_section(
        &self,
        case_id: &CaseId,
        section: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, SyncError> {
        self.with_entry(case_id, |entry| {
            let removed = entry.document.remove_section(section).is_some();
            if removed {
                entry.touch(now);
            }
            removed
        })
    }

    /// Replace the whole working document. Returns the sections that changed.
    pub fn replace_document(
        &self,
        case_id: &CaseId,
        document: Document,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>, SyncError> {
        self.with_entry(case_id, |entry| {
            let changed = changed_sections(&entry.document, &document);
            if !changed.is_empty() {
                entry.document = document;
                entry.touch(now);
            }
            changed
        })
    }

    /// Record a successful commit as the new baseline.
    ///
    /// The marker is cleared only if the working copy still equals what was
    /// committed; edits made while the commit was in flight stay pending.
    pub fn mark_committed(
        &self,
        case_id: &CaseId,
        record: &VersionRecord,
    ) -> Result<bool, SyncError> {
        self.with_entry(case_id, |entry| {
            entry.baseline = Some(Baseline::from_record(record));
            if entry.document == record.payload {
                entry.pending = None;
                true
            } else {
                false
            }
        })
    }

    /// Take a persisted version wholesale: working copy, baseline, no marker.
    /// Returns the sections that changed.
    pub fn adopt(&self, case_id: &CaseId, baseline: Baseline) -> Result<Vec<String>, SyncError> {
        self.with_entry(case_id, |entry| {
            let changed = changed_sections(&entry.document, &baseline.payload);
            entry.document = baseline.payload.clone();
            entry.baseline = Some(baseline);
            entry.pending = None;
            changed
        })
    }

    /// Move the baseline under local edits without touching the working copy.
    pub fn rebase(&self, case_id: &CaseId, baseline: Baseline) -> Result<(), SyncError> {
        self.with_entry(case_id, |entry| {
            entry.baseline = Some(baseline);
        })
    }

    /// Throw local edits away and return to the baseline.
    /// Returns the sections that changed.
    pub fn discard(&self, case_id: &CaseId) -> Result<Vec<String>, SyncError> {
        self.with_entry(case_id, |entry| {
            let original = entry.baseline_payload();
            let changed = changed_sections(&entry.document, &original);
            entry.document = original;
            entry.pending = None;
            changed
        })
    }

    pub fn clear_marker(&self, case_id: &CaseId) -> Result<(), SyncError> {
        self.with_entry(case_id, |entry| {
            entry.pending = None;
        })
    }
}
