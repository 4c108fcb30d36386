use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{channel, Sender};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::backing::{BackingStore, ChangeFeed};
use super::error::StoreError;
use super::record::{CaseRecord, CaseStatus, NewVersion, VersionId, VersionRecord};
use crate::document::CaseId;

#[derive(Default)]
struct Tables {
    cases: HashMap<CaseId, CaseRecord>,
    /// Insertion order.
    versions: Vec<VersionRecord>,
}

/// Switches for simulating an unreliable backend.
#[derive(Default)]
struct Faults {
    offline: AtomicBool,
    failing_commits: AtomicUsize,
    timing_out_commits: AtomicUsize,
    failing_inserts: AtomicUsize,
}

/// In-memory backing store backed by `Arc<RwLock<..>>`.
///
/// Clone-friendly (cloning shares the same underlying tables), so several
/// sessions can commit into one store the way several browser tabs share one
/// database.
#[derive(Clone, Default)]
pub struct InMemoryBackingStore {
    tables: Arc<RwLock<Tables>>,
    feeds: Arc<Mutex<Vec<(CaseId, Sender<VersionRecord>)>>>,
    faults: Arc<Faults>,
}

impl InMemoryBackingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While offline every call fails with `StoreError::Unavailable`.
    pub fn set_offline(&self, offline: bool) {
        self.faults.offline.store(offline, Ordering::SeqCst);
    }

    /// Fail the next `n` commits (at the not-current flip, before anything changes).
    pub fn fail_next_commits(&self, n: usize) {
        self.faults.failing_commits.store(n, Ordering::SeqCst);
    }

    /// Time out the next `n` commits (at the not-current flip).
    pub fn time_out_next_commits(&self, n: usize) {
        self.faults.timing_out_commits.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` inserts, after the not-current flip has gone through.
    pub fn fail_next_inserts(&self, n: usize) {
        self.faults.failing_inserts.store(n, Ordering::SeqCst);
    }

    /// Close every open change feed, as a dropped realtime connection would.
    pub fn drop_feeds(&self) {
        if let Ok(mut feeds) = self.feeds.lock() {
            feeds.clear();
        }
    }

    /// Total number of stored versions across all cases.
    pub fn version_count(&self) -> usize {
        self.tables.read().map(|t| t.versions.len()).unwrap_or(0)
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.faults.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("store offline".into()));
        }
        Ok(())
    }

    fn take_fault(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn notify(&self, record: &VersionRecord) {
        let Ok(mut feeds) = self.feeds.lock() else {
            return;
        };
        feeds.retain(|(case_id, tx)| {
            if case_id != &record.case_id {
                return true;
            }
            tx.send(record.clone()).is_ok()
        });
    }
}

impl BackingStore for InMemoryBackingStore {
    fn find_or_create_case(
        &self,
        key: &CaseId,
        now: DateTime<Utc>,
    ) -> Result<CaseRecord, StoreError> {
        self.check_online()?;
        let mut tables = self
            .tables
            .write()
            .map_err(|_| StoreError::LockPoisoned("case write"))?;
        Ok(tables
            .cases
            .entry(key.clone())
            .or_insert_with(|| CaseRecord {
                key: key.clone(),
                status: CaseStatus::Open,
                created_at: now,
                updated_at: now,
            })
            .clone())
    }

    fn get_case(&self, key: &CaseId) -> Result<Option<CaseRecord>, StoreError> {
        self.check_online()?;
        let tables = self
            .tables
            .read()
            .map_err(|_| StoreError::LockPoisoned("case read"))?;
        Ok(tables.cases.get(key).cloned())
    }

    fn update_case_status(
        &self,
        key: &CaseId,
        status: CaseStatus,
        now: DateTime<Utc>,
    ) -> Result<Option<CaseRecord>, StoreError> {
        self.check_online()?;
        let mut tables = self
            .tables
            .write()
            .map_err(|_| StoreError::LockPoisoned("case write"))?;
        Ok(tables.cases.get_mut(key).map(|case| {
            case.status = status;
            case.updated_at = now;
            case.clone()
        }))
    }

    fn insert_version(&self, row: NewVersion) -> Result<VersionRecord, StoreError> {
        self.check_online()?;
        if Self::take_fault(&self.faults.failing_inserts) {
            return Err(StoreError::Unavailable("injected insert failure".into()));
        }
        let record = {
            let mut tables = self
                .tables
                .write()
                .map_err(|_| StoreError::LockPoisoned("version write"))?;
            let taken = tables
                .versions
                .iter()
                .any(|v| v.case_id == row.case_id && v.version == row.version);
            if taken {
                return Err(StoreError::DuplicateVersion {
                    case_id: row.case_id.to_string(),
                    version: row.version,
                });
            }
            // Last writer wins on the current flag when two commits interleave.
            for version in tables.versions.iter_mut() {
                if version.case_id == row.case_id {
                    version.is_current = false;
                }
            }
            let record = row.into_record(VersionId::generate());
            tables.versions.push(record.clone());
            record
        };
        self.notify(&record);
        Ok(record)
    }

    fn clear_current(&self, case_id: &CaseId) -> Result<usize, StoreError> {
        self.check_online()?;
        if Self::take_fault(&self.faults.timing_out_commits) {
            return Err(StoreError::Timeout(Duration::from_secs(30)));
        }
        if Self::take_fault(&self.faults.failing_commits) {
            return Err(StoreError::Unavailable("injected commit failure".into()));
        }
        let mut tables = self
            .tables
            .write()
            .map_err(|_| StoreError::LockPoisoned("version write"))?;
        let mut touched = 0;
        for version in tables.versions.iter_mut() {
            if &version.case_id == case_id && version.is_current {
                version.is_current = false;
                touched += 1;
            }
        }
        Ok(touched)
    }

    fn restore_current(&self, case_id: &CaseId) -> Result<Option<u64>, StoreError> {
        self.check_online()?;
        let mut tables = self
            .tables
            .write()
            .map_err(|_| StoreError::LockPoisoned("version write"))?;
        let mut rows = tables.versions.iter_mut().filter(|v| &v.case_id == case_id);
        let mut newest: Option<&mut VersionRecord> = None;
        for row in &mut rows {
            if row.is_current {
                return Ok(None);
            }
            if newest.as_ref().map_or(true, |n| row.version > n.version) {
                newest = Some(row);
            }
        }
        Ok(newest.map(|row| {
            row.is_current = true;
            row.version
        }))
    }

    fn max_version(&self, case_id: &CaseId) -> Result<Option<u64>, StoreError> {
        self.check_online()?;
        let tables = self
            .tables
            .read()
            .map_err(|_| StoreError::LockPoisoned("version read"))?;
        Ok(tables
            .versions
            .iter()
            .filter(|v| &v.case_id == case_id)
            .map(|v| v.version)
            .max())
    }

    fn current_version(&self, case_id: &CaseId) -> Result<Option<VersionRecord>, StoreError> {
        self.check_online()?;
        let tables = self
            .tables
            .read()
            .map_err(|_| StoreError::LockPoisoned("version read"))?;
        // Newest first, in case a race left more than one flagged.
        Ok(tables
            .versions
            .iter()
            .filter(|v| &v.case_id == case_id && v.is_current)
            .max_by_key(|v| v.version)
            .cloned())
    }

    fn versions_for_case(&self, case_id: &CaseId) -> Result<Vec<VersionRecord>, StoreError> {
        self.check_online()?;
        let tables = self
            .tables
            .read()
            .map_err(|_| StoreError::LockPoisoned("version read"))?;
        Ok(tables
            .versions
            .iter()
            .filter(|v| &v.case_id == case_id)
            .cloned()
            .collect())
    }

    fn version_by_id(&self, id: &VersionId) -> Result<Option<VersionRecord>, StoreError> {
        self.check_online()?;
        let tables = self
            .tables
            .read()
            .map_err(|_| StoreError::LockPoisoned("version read"))?;
        Ok(tables.versions.iter().find(|v| &v.id == id).cloned())
    }

    fn subscribe_changes(&self, case_id: &CaseId) -> Result<ChangeFeed, StoreError> {
        self.check_online()?;
        let (tx, rx) = channel();
        self.feeds
            .lock()
            .map_err(|_| StoreError::LockPoisoned("feed subscribe"))?
            .push((case_id.clone(), tx));
        Ok(rx)
    }
}
