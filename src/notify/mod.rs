//! Change Notifier - section events within a session, version events across sessions.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      ChangeNotifier                          │
//! │  - subscribe / unsubscribe / publish / pump                 │
//! │  - echo suppression (origin session, commit window)         │
//! │  - notice channel for non-blocking warnings                 │
//! └─────────────────────────────────────────────────────────────┘
//!            │                                    │
//!            ▼                                    ▼
//! ┌──────────────────────┐     ┌──────────────────────────────────┐
//! │     SectionBus       │     │      ChangeTransport trait        │
//! │ sync fan-out by      │     │  publish(envelope) / poll(timeout)│
//! │ section, "*" = all   │     └──────────────────────────────────┘
//! └──────────────────────┘          │            │            │
//!                                   ▼            ▼            ▼
//!                        ┌──────────────┐ ┌────────────┐ ┌──────────────┐
//!                        │InMemoryChannel│ │StorageSlot │ │StoreFeed     │
//!                        │ (push, cursor)│ │ (last value)│ │ (store feed) │
//!                        └──────────────┘ └────────────┘ └──────────────┘
//! ```

mod bus;
mod envelope;
mod in_memory;
mod notice;
mod notifier;
mod storage_slot;
mod store_feed;
mod transport;

pub use bus::{ChangeOrigin, ListenerId, SectionBus, SectionChange, SectionFilter};
pub use envelope::ChangeEnvelope;
pub use in_memory::InMemoryChannel;
pub use notice::{Notice, Severity};
pub use notifier::{ChangeNotifier, SubscriptionId};
pub use storage_slot::StorageSlotChannel;
pub use store_feed::StoreFeedChannel;
pub use transport::{ChangeTransport, ConnectionState, TransportError};
