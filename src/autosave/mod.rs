//! Auto-Save Scheduler - turns local edits into committed versions.
//!
//! ## State machine (per case)
//!
//! ```text
//!            touch()                 deadline due, document differs
//!   Idle ─────────────► PendingCommit ──────────────────────► Committing
//!    ▲                    ▲     │ touch() restarts debounce        │
//!    │                    └─────┘                                  │
//!    │   committed, marker cleared                                  │
//!    ├──────────────────────────────────────────────────────────────┤
//!    │   failed: marker kept, retry scheduled with backoff          │
//!    └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Deadlines: debounce (reset by every edit), periodic (independent of
//! edits), retry (after a failure). Each one leads to the same diff-checked
//! commit path.

mod backoff;
mod scheduler;

pub use backoff::Backoff;
pub use scheduler::{
    AutoSaveScheduler, CaseTimers, CommitOutcome, CommitTrigger, Phase, ScheduledCommit,
};
