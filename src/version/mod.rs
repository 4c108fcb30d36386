//! Version Store - immutable, numbered snapshots of a case document.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 VersionStore<B: BackingStore>                │
//! │  - validates payloads before any store call                 │
//! │  - commit / get_current / get_history / get_version         │
//! │  - case lifecycle transitions                               │
//! └─────────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    BackingStore trait                        │
//! │  insert_version / clear_current / point queries / feed      │
//! └─────────────────────────────────────────────────────────────┘
//!          │                                    │
//!          ▼                                    ▼
//! ┌──────────────────────┐          ┌─────────────────────────┐
//! │ InMemoryBackingStore │          │ SQL / document store    │
//! │     (included)       │          │      (external)         │
//! └──────────────────────┘          └─────────────────────────┘
//! ```

mod backing;
mod error;
mod in_memory;
mod record;
mod store;

pub use backing::{BackingStore, ChangeFeed};
pub use error::StoreError;
pub use in_memory::InMemoryBackingStore;
pub use record::{
    version_name, CaseRecord, CaseStatus, NewVersion, VersionId, VersionRecord, VersionSource,
    VersionSummary,
};
pub use store::{CommitRequest, VersionStore};
