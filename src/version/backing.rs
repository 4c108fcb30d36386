use std::sync::mpsc::Receiver;

use chrono::{DateTime, Utc};

use super::error::StoreError;
use super::record::{CaseRecord, CaseStatus, NewVersion, VersionId, VersionRecord};
use crate::document::CaseId;

/// Receiving end of a per-case change feed. Yields every newly inserted version.
pub type ChangeFeed = Receiver<VersionRecord>;

/// The table-like store the engine persists into.
///
/// Implementations might be a relational database, a document store, or the
/// included `InMemoryBackingStore`. The engine needs four capabilities:
/// insert-with-returned-row, a bulk "not current" flip per case, point
/// queries by case key and by version id, and a change feed filtered by case.
pub trait BackingStore: Send + Sync {
    /// Return the case record, creating it as `Open` if the key is unseen.
    fn find_or_create_case(
        &self,
        key: &CaseId,
        now: DateTime<Utc>,
    ) -> Result<CaseRecord, StoreError>;

    fn get_case(&self, key: &CaseId) -> Result<Option<CaseRecord>, StoreError>;

    /// Persist a new case status. Returns `None` if the case does not exist.
    fn update_case_status(
        &self,
        key: &CaseId,
        status: CaseStatus,
        now: DateTime<Utc>,
    ) -> Result<Option<CaseRecord>, StoreError>;

    /// Insert a new current version. Must reject a `(case, version)` pair that
    /// already exists with `StoreError::DuplicateVersion`.
    fn insert_version(&self, row: NewVersion) -> Result<VersionRecord, StoreError>;

    /// Flip `is_current` to false for every version of the case. Returns the
    /// number of rows touched.
    fn clear_current(&self, case_id: &CaseId) -> Result<usize, StoreError>;

    /// If no version of the case is flagged current, flag the newest one.
    /// Undoes a flip whose insert never landed. Returns the version flagged,
    /// or `None` when nothing changed.
    fn restore_current(&self, case_id: &CaseId) -> Result<Option<u64>, StoreError>;

    fn max_version(&self, case_id: &CaseId) -> Result<Option<u64>, StoreError>;

    fn current_version(&self, case_id: &CaseId) -> Result<Option<VersionRecord>, StoreError>;

    /// All versions of a case, in no particular order.
    fn versions_for_case(&self, case_id: &CaseId) -> Result<Vec<VersionRecord>, StoreError>;

    fn version_by_id(&self, id: &VersionId) -> Result<Option<VersionRecord>, StoreError>;

    /// Subscribe to inserts for one case.
    fn subscribe_changes(&self, case_id: &CaseId) -> Result<ChangeFeed, StoreError>;
}
