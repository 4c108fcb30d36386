//! In-memory push channel for tests and single-process deployments.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use super::envelope::ChangeEnvelope;
use super::transport::{ChangeTransport, ConnectionState, TransportError};

/// In-memory change channel.
///
/// Features:
/// - Thread-safe (can be shared across threads via `Clone`)
/// - Every session gets its own handle via `connect()`
/// - Frames are stored encoded in an append-only log
/// - Each handle tracks its own read position
///
/// ## Example
///
/// ```
/// use case_sync::{ChangeTransport, InMemoryChannel};
/// use std::time::Duration;
///
/// let channel = InMemoryChannel::new();
/// let tab_a = channel.connect();
/// let tab_b = channel.connect();
/// assert!(tab_b.poll(Duration::ZERO).unwrap().is_none());
/// # let _ = tab_a;
/// ```
#[derive(Clone)]
pub struct InMemoryChannel {
    /// Shared frame log
    log: Arc<RwLock<Vec<Vec<u8>>>>,
    /// Per-handle read position
    position: Arc<Mutex<usize>>,
    /// Shared connectivity switch
    connected: Arc<AtomicBool>,
}

impl Default for InMemoryChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryChannel {
    pub fn new() -> Self {
        Self {
            log: Arc::new(RwLock::new(Vec::new())),
            position: Arc::new(Mutex::new(0)),
            connected: Arc::new(AtomicBool::new(true)),
        }
    }

    /// A new handle on the same log, positioned at its current end.
    pub fn connect(&self) -> Self {
        let end = self.len();
        Self {
            log: Arc::clone(&self.log),
            position: Arc::new(Mutex::new(end)),
            connected: Arc::clone(&self.connected),
        }
    }

    /// Simulate losing (or regaining) the connection for every handle.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Number of frames ever published.
    pub fn len(&self) -> usize {
        self.log.read().map(|l| l.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver the most recent frame again, as an at-least-once transport may.
    pub fn replay_last(&self) -> Result<(), TransportError> {
        let mut log = self
            .log
            .write()
            .map_err(|_| TransportError::LockPoisoned("replay"))?;
        if let Some(last) = log.last().cloned() {
            log.push(last);
        }
        Ok(())
    }

    fn check_connected(&self) -> Result<(), TransportError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TransportError::Disconnected("channel offline".into()))
        }
    }

    fn next_frame(&self) -> Result<Option<Vec<u8>>, TransportError> {
        let log = self
            .log
            .read()
            .map_err(|_| TransportError::LockPoisoned("poll"))?;
        let mut pos = self
            .position
            .lock()
            .map_err(|_| TransportError::LockPoisoned("poll"))?;
        if *pos < log.len() {
            let frame = log[*pos].clone();
            *pos += 1;
            return Ok(Some(frame));
        }
        Ok(None)
    }
}

impl ChangeTransport for InMemoryChannel {
    fn publish(&self, envelope: &ChangeEnvelope) -> Result<(), TransportError> {
        self.check_connected()?;
        let frame = envelope.encode()?;
        self.log
            .write()
            .map_err(|_| TransportError::LockPoisoned("publish"))?
            .push(frame);
        Ok(())
    }

    fn poll(&self, timeout: Duration) -> Result<Option<ChangeEnvelope>, TransportError> {
        self.check_connected()?;
        let deadline = Instant::now() + timeout;

        loop {
            if let Some(frame) = self.next_frame()? {
                return ChangeEnvelope::decode(&frame).map(Some);
            }

            if Instant::now() >= deadline {
                return Ok(None);
            }

            // Small sleep to avoid busy-waiting
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn connection_state(&self) -> ConnectionState {
        if self.connected.load(Ordering::SeqCst) {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }
}
