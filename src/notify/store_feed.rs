//! Transport over the backing store's own change feed.
//!
//! The store announces inserts itself, so `publish` has nothing to do.
//! Envelopes carry no origin session; the notifier falls back to its
//! echo-window check to drop our own commits.
//!
//! A feed that closes is re-subscribed with exponential backoff. After a
//! successful resubscribe the case's current version is delivered once if it
//! is newer than anything the feed handed out, so inserts made while the
//! feed was down are not lost.

use std::collections::{HashMap, VecDeque};
use std::sync::mpsc::TryRecvError;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use super::envelope::ChangeEnvelope;
use super::transport::{ChangeTransport, ConnectionState, TransportError};
use crate::autosave::Backoff;
use crate::document::CaseId;
use crate::version::{BackingStore, ChangeFeed};

const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

struct Lost {
    attempts: u32,
    retry_at: Option<Instant>,
}

#[derive(Default)]
struct Feeds {
    live: Vec<(CaseId, ChangeFeed)>,
    lost: HashMap<CaseId, Lost>,
    /// Newest version handed out per watched case.
    last_seen: HashMap<CaseId, u64>,
    catch_up: VecDeque<ChangeEnvelope>,
}

pub struct StoreFeedChannel<B> {
    store: B,
    feeds: Mutex<Feeds>,
    backoff: Backoff,
    max_attempts: u32,
}

impl<B: BackingStore> StoreFeedChannel<B> {
    pub fn new(store: B) -> Self {
        Self {
            store,
            feeds: Mutex::new(Feeds::default()),
            backoff: Backoff::new(Duration::from_secs(1), Duration::from_secs(16)),
            max_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
        }
    }

    pub fn with_reconnect_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.backoff = Backoff::new(initial, max);
        self
    }

    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    fn lock(&self, op: &'static str) -> Result<std::sync::MutexGuard<'_, Feeds>, TransportError> {
        self.feeds.lock().map_err(|_| TransportError::LockPoisoned(op))
    }

    /// Newest version the store currently holds for a case, if readable.
    fn current_version(&self, case_id: &CaseId) -> Option<crate::version::VersionRecord> {
        match self.store.current_version(case_id) {
            Ok(current) => current,
            Err(err) => {
                debug!(case_id = %case_id, error = %err, "current version unreadable");
                None
            }
        }
    }

    fn reconnect_due(&self, feeds: &mut Feeds) {
        let now = Instant::now();
        let due: Vec<CaseId> = feeds
            .lost
            .iter()
            .filter(|(_, lost)| lost.retry_at.is_some_and(|at| at <= now))
            .map(|(case_id, _)| case_id.clone())
            .collect();

        for case_id in due {
            match self.store.subscribe_changes(&case_id) {
                Ok(feed) => {
                    feeds.lost.remove(&case_id);
                    let seen = feeds.last_seen.get(&case_id).copied().unwrap_or(0);
                    if let Some(current) = self.current_version(&case_id) {
                        if current.version > seen {
                            feeds.last_seen.insert(case_id.clone(), current.version);
                            feeds
                                .catch_up
                                .push_back(ChangeEnvelope::from_record(&current, None));
                        }
                    }
                    feeds.live.push((case_id.clone(), feed));
                    info!(case_id = %case_id, "change feed resubscribed");
                }
                Err(err) => {
                    let Some(lost) = feeds.lost.get_mut(&case_id) else {
                        continue;
                    };
                    lost.attempts += 1;
                    if lost.attempts >= self.max_attempts {
                        lost.retry_at = None;
                        error!(case_id = %case_id, attempts = lost.attempts, error = %err, "change feed reconnect gave up");
                    } else {
                        let delay = self.backoff.delay(lost.attempts);
                        lost.retry_at = Some(now + delay);
                        warn!(
                            case_id = %case_id,
                            attempts = lost.attempts,
                            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                            error = %err,
                            "change feed reconnect failed"
                        );
                    }
                }
            }
        }
    }

    fn try_next(&self) -> Result<Option<ChangeEnvelope>, TransportError> {
        let mut feeds = self.lock("feed poll")?;
        let feeds = &mut *feeds;
        self.reconnect_due(feeds);
        if let Some(envelope) = feeds.catch_up.pop_front() {
            return Ok(Some(envelope));
        }

        let mut next = None;
        let mut closed = Vec::new();
        feeds.live.retain(|(case_id, feed)| {
            if next.is_some() {
                return true;
            }
            match feed.try_recv() {
                Ok(record) => {
                    next = Some(record);
                    true
                }
                Err(TryRecvError::Empty) => true,
                Err(TryRecvError::Disconnected) => {
                    warn!(case_id = %case_id, "change feed closed");
                    closed.push(case_id.clone());
                    false
                }
            }
        });

        if let Some(record) = next {
            let seen = feeds.last_seen.entry(record.case_id.clone()).or_insert(0);
            *seen = (*seen).max(record.version);
            return Ok(Some(ChangeEnvelope::from_record(&record, None)));
        }
        if closed.is_empty() {
            return Ok(None);
        }

        // First reconnect attempt goes out immediately.
        let now = Instant::now();
        for case_id in closed {
            feeds.lost.insert(
                case_id,
                Lost {
                    attempts: 0,
                    retry_at: Some(now),
                },
            );
        }
        self.reconnect_due(feeds);
        Ok(feeds.catch_up.pop_front())
    }
}

impl<B: BackingStore> ChangeTransport for StoreFeedChannel<B> {
    fn publish(&self, _envelope: &ChangeEnvelope) -> Result<(), TransportError> {
        Ok(())
    }

    fn poll(&self, timeout: Duration) -> Result<Option<ChangeEnvelope>, TransportError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(envelope) = self.try_next()? {
                return Ok(Some(envelope));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    /// Subscribe to a case. Watching a case whose feed was lost retries at once.
    fn watch(&self, case_id: &CaseId) -> Result<(), TransportError> {
        let mut feeds = self.lock("feed watch")?;
        if feeds.live.iter().any(|(c, _)| c == case_id) {
            return Ok(());
        }
        if let Some(lost) = feeds.lost.get_mut(case_id) {
            lost.attempts = 0;
            lost.retry_at = Some(Instant::now());
            return Ok(());
        }
        let feed = self
            .store
            .subscribe_changes(case_id)
            .map_err(|e| TransportError::Disconnected(e.to_string()))?;
        if let Some(current) = self.current_version(case_id) {
            feeds.last_seen.insert(case_id.clone(), current.version);
        }
        feeds.live.push((case_id.clone(), feed));
        Ok(())
    }

    fn unwatch(&self, case_id: &CaseId) {
        if let Ok(mut feeds) = self.feeds.lock() {
            feeds.live.retain(|(c, _)| c != case_id);
            feeds.lost.remove(case_id);
            feeds.last_seen.remove(case_id);
            feeds.catch_up.retain(|e| &e.case_id != case_id);
        }
    }

    fn connection_state(&self) -> ConnectionState {
        let Ok(feeds) = self.feeds.lock() else {
            return ConnectionState::Disconnected;
        };
        if feeds.lost.is_empty() {
            return ConnectionState::Connected;
        }
        if feeds.lost.values().all(|lost| lost.retry_at.is_none()) {
            return ConnectionState::Disconnected;
        }
        let attempts = feeds.lost.values().map(|lost| lost.attempts).max().unwrap_or(0);
        ConnectionState::Reconnecting { attempts }
    }
}
