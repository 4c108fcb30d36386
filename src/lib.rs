//! Shared case-document sync: versioned store, debounced auto-save,
//! cross-session change notification, conflict resolution and recovery.
//!
//! ```text
//! UI edits ─► LocalCache ─► AutoSaveScheduler ─► VersionStore ─► BackingStore
//!                 ▲                                    │
//!                 │                                    ▼
//!          ConflictResolver ◄── ChangeNotifier ◄── ChangeTransport
//! ```

pub mod autosave;
pub mod cache;
pub mod clock;
pub mod config;
pub mod conflict;
pub mod document;
pub mod driver;
pub mod error;
pub mod notify;
pub mod recovery;
pub mod session;
pub mod version;

pub use autosave::{
    AutoSaveScheduler, Backoff, CaseTimers, CommitOutcome, CommitTrigger, Phase, ScheduledCommit,
};
pub use cache::{Baseline, CaseEntry, LocalCache, PendingEditMarker};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, SyncConfig};
pub use conflict::{
    ConflictPolicy, ConflictResolver, IgnoreReason, PendingConflict, Resolution,
    ResolutionChoice,
};
pub use document::{
    changed_sections, ActorId, CaseId, Document, SectionDiff, SessionId, ValidationError,
};
pub use driver::{DriverStats, SessionDriver};
pub use error::SyncError;
pub use notify::{
    ChangeEnvelope, ChangeNotifier, ChangeOrigin, ChangeTransport, ConnectionState, InMemoryChannel,
    ListenerId,
    Notice, SectionBus, SectionChange, SectionFilter, Severity, StorageSlotChannel,
    StoreFeedChannel, SubscriptionId, TransportError,
};
pub use recovery::{describe_version, time_ago, VersionEntry, VersionRecovery};
pub use session::{ConflictState, SyncStatus, SyncSession};
pub use version::{
    BackingStore, CaseRecord, CaseStatus, ChangeFeed, CommitRequest, InMemoryBackingStore,
    NewVersion, StoreError, VersionId, VersionRecord, VersionSource, VersionStore,
    VersionSummary,
};
