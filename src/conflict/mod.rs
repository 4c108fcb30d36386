//! Conflict Resolver - what happens when a remote version meets unsaved local edits.
//!
//! ```text
//! remote version ──► ignored?  (not open / not current / version <= baseline)
//!                      │ no
//!                      ▼
//!                 local divergence? ── no ──► Adopted (marker cleared)
//!                      │ yes
//!                      ▼
//!                 policy
//!                   timestamp ─► later edit wins (ties to remote)
//!                   version   ─► higher version wins
//!                   manual    ─► AwaitingChoice ─► resolve(case, choice)
//! ```

mod policy;
mod resolver;

pub use policy::{ConflictPolicy, ResolutionChoice};
pub use resolver::{ConflictResolver, IgnoreReason, PendingConflict, Resolution};
