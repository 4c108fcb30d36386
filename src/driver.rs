//! Background thread that keeps a session's timers and remote feed moving.

use std::sync::mpsc::{channel, Sender, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use crate::autosave::CommitOutcome;
use crate::conflict::Resolution;
use crate::session::SyncSession;
use crate::version::BackingStore;

/// Statistics from the session driver.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DriverStats {
    pub ticks: usize,
    pub commits: usize,
    pub failures: usize,
    pub remote_events: usize,
    pub transport_errors: usize,
}

/// A background thread that calls `tick` and `pump` on a shared session.
///
/// ## Example
///
/// ```
/// use case_sync::{
///     InMemoryBackingStore, InMemoryChannel, SessionDriver, SyncConfig, SyncSession, SystemClock,
/// };
/// use std::sync::{Arc, Mutex};
/// use std::time::Duration;
///
/// let session = SyncSession::new(
///     InMemoryBackingStore::new(),
///     Arc::new(InMemoryChannel::new()),
///     SyncConfig::default(),
///     Arc::new(SystemClock),
/// )
/// .unwrap();
/// let session = Arc::new(Mutex::new(session));
///
/// let driver = SessionDriver::spawn(Arc::clone(&session), Duration::from_millis(10));
///
/// // ... edit through `session.lock()` ...
///
/// let stats = driver.stop();
/// assert!(stats.ticks >= 1);
/// ```
pub struct SessionDriver {
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<DriverStats>>,
}

impl SessionDriver {
    /// Spawn a driver thread.
    ///
    /// Each round ticks the scheduler, drains remote versions, then sleeps
    /// for `interval`. The session lock is taken separately for each call.
    pub fn spawn<B>(session: Arc<Mutex<SyncSession<B>>>, interval: Duration) -> Self
    where
        B: BackingStore + Clone + 'static,
    {
        let (stop_tx, stop_rx) = channel();

        let handle = thread::spawn(move || {
            let mut stats = DriverStats::default();

            loop {
                match stop_rx.try_recv() {
                    Ok(()) | Err(TryRecvError::Disconnected) => break,
                    Err(TryRecvError::Empty) => {}
                }

                stats.ticks += 1;

                let commits = match session.lock() {
                    Ok(session) => session.tick(),
                    Err(_) => {
                        warn!("session lock poisoned, driver exiting");
                        break;
                    }
                };
                for commit in &commits {
                    match commit.outcome {
                        CommitOutcome::Committed(_) => stats.commits += 1,
                        CommitOutcome::Failed { .. } => stats.failures += 1,
                        CommitOutcome::Unchanged | CommitOutcome::Busy => {}
                    }
                }

                let pumped = match session.lock() {
                    Ok(session) => session.pump(Duration::ZERO),
                    Err(_) => break,
                };
                match pumped {
                    Ok(handled) => {
                        stats.remote_events += handled
                            .iter()
                            .filter(|(_, r)| !matches!(r, Resolution::Ignored { .. }))
                            .count();
                    }
                    Err(err) => {
                        // Already surfaced as a notice; keep going.
                        debug!(error = %err, "pump failed");
                        stats.transport_errors += 1;
                    }
                }

                thread::sleep(interval);
            }

            stats
        });

        Self {
            stop_tx,
            handle: Some(handle),
        }
    }

    /// Signal the driver to stop and wait for it to finish.
    /// Returns the driver statistics.
    pub fn stop(mut self) -> DriverStats {
        let _ = self.stop_tx.send(());
        if let Some(handle) = self.handle.take() {
            handle.join().unwrap_or_default()
        } else {
            DriverStats::default()
        }
    }

    /// Signal the driver to stop without waiting.
    pub fn signal_stop(&self) {
        let _ = self.stop_tx.send(());
    }
}

impl Drop for SessionDriver {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
    }
}
