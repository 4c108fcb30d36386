//! Cross-session transport trait.

use std::time::Duration;

use thiserror::Error;

use super::envelope::ChangeEnvelope;
use crate::document::CaseId;

/// Error type for transport operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport disconnected: {0}")]
    Disconnected(String),
    #[error("envelope codec error: {0}")]
    Codec(String),
    #[error("transport lock poisoned during {0}")]
    LockPoisoned(&'static str),
    #[error("transport timeout")]
    Timeout,
}

impl TransportError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransportError::Disconnected(_) | TransportError::Timeout)
    }
}

/// Link health as a transport sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    /// Lost, and trying again with backoff.
    Reconnecting { attempts: u32 },
    /// Lost, with no reconnect in progress.
    Disconnected,
}

/// Carries change envelopes between sessions.
///
/// Implementations might include:
/// - `InMemoryChannel` - push channel with a per-session cursor
/// - `StorageSlotChannel` - last-value key slot, like browser storage events
/// - `StoreFeedChannel` - the backing store's own per-case change feed
/// - a websocket or long-polling client (external)
///
/// Delivery is at-least-once; consumers must be idempotent.
pub trait ChangeTransport: Send + Sync {
    /// Announce a committed version.
    fn publish(&self, envelope: &ChangeEnvelope) -> Result<(), TransportError>;

    /// Wait up to `timeout` for the next envelope.
    fn poll(&self, timeout: Duration) -> Result<Option<ChangeEnvelope>, TransportError>;

    /// Declare interest in a case. Transports that filter at the source use it.
    fn watch(&self, _case_id: &CaseId) -> Result<(), TransportError> {
        Ok(())
    }

    /// Withdraw interest in a case.
    fn unwatch(&self, _case_id: &CaseId) {}

    fn connection_state(&self) -> ConnectionState {
        ConnectionState::Connected
    }
}

impl<T: ChangeTransport + ?Sized> ChangeTransport for std::sync::Arc<T> {
    fn publish(&self, envelope: &ChangeEnvelope) -> Result<(), TransportError> {
        (**self).publish(envelope)
    }

    fn poll(&self, timeout: Duration) -> Result<Option<ChangeEnvelope>, TransportError> {
        (**self).poll(timeout)
    }

    fn watch(&self, case_id: &CaseId) -> Result<(), TransportError> {
        (**self).watch(case_id)
    }

    fn unwatch(&self, case_id: &CaseId) {
        (**self).unwatch(case_id)
    }

    fn connection_state(&self) -> ConnectionState {
        (**self).connection_state()
    }
}
