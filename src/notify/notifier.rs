//! Change notifier: one subscription API over the in-process section bus
//! and a cross-session transport.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use super::bus::SectionBus;
use super::envelope::ChangeEnvelope;
use super::notice::{Notice, Severity};
use super::transport::{ChangeTransport, ConnectionState, TransportError};
use crate::clock;
use crate::document::{CaseId, SessionId};
use crate::version::VersionRecord;

/// Handle returned by `subscribe` and `on_notice`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type VersionCallback = Arc<dyn Fn(&ChangeEnvelope) + Send + Sync>;
type NoticeListener = Arc<dyn Fn(&Notice) + Send + Sync>;

struct Subscription {
    id: SubscriptionId,
    case_id: CaseId,
    callback: VersionCallback,
}

/// Delivers committed versions between sessions and section changes within one.
///
/// Every envelope this session publishes is stamped with its session id.
/// Incoming envelopes that carry that id, or that carry no id but match the
/// version and commit time of our own last commit for the case, are echoes
/// and are dropped before anyone sees them.
pub struct ChangeNotifier {
    session_id: SessionId,
    transport: Arc<dyn ChangeTransport>,
    sections: SectionBus,
    subscriptions: RwLock<Vec<Subscription>>,
    notice_listeners: RwLock<Vec<(SubscriptionId, NoticeListener)>>,
    watched: Mutex<HashSet<CaseId>>,
    own_commits: Mutex<HashMap<CaseId, (u64, DateTime<Utc>)>>,
    echo_window: Duration,
    next_id: AtomicU64,
}

impl ChangeNotifier {
    pub fn new(
        session_id: SessionId,
        transport: Arc<dyn ChangeTransport>,
        echo_window: Duration,
    ) -> Self {
        Self {
            session_id,
            transport,
            sections: SectionBus::new(),
            subscriptions: RwLock::new(Vec::new()),
            notice_listeners: RwLock::new(Vec::new()),
            watched: Mutex::new(HashSet::new()),
            own_commits: Mutex::new(HashMap::new()),
            echo_window,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.transport.connection_state()
    }

    /// The in-process section bus.
    pub fn sections(&self) -> &SectionBus {
        &self.sections
    }

    fn next_id(&self) -> SubscriptionId {
        SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Take an interest in a case's remote versions without a callback.
    pub fn watch(&self, case_id: &CaseId) -> Result<(), TransportError> {
        self.transport.watch(case_id)?;
        self.watched
            .lock()
            .map_err(|_| TransportError::LockPoisoned("watch"))?
            .insert(case_id.clone());
        Ok(())
    }

    pub fn unwatch(&self, case_id: &CaseId) {
        if let Ok(mut watched) = self.watched.lock() {
            watched.remove(case_id);
        }
        if !self.has_subscribers(case_id) {
            self.transport.unwatch(case_id);
        }
        if let Ok(mut own) = self.own_commits.lock() {
            own.remove(case_id);
        }
    }

    /// Register a callback for versions other sessions commit for a case.
    pub fn subscribe<F>(&self, case_id: &CaseId, callback: F) -> Result<SubscriptionId, TransportError>
    where
        F: Fn(&ChangeEnvelope) + Send + Sync + 'static,
    {
        self.transport.watch(case_id)?;
        let id = self.next_id();
        self.subscriptions
            .write()
            .map_err(|_| TransportError::LockPoisoned("subscribe"))?
            .push(Subscription {
                id,
                case_id: case_id.clone(),
                callback: Arc::new(callback),
            });
        debug!(case_id = %case_id, "subscribed to versions");
        Ok(id)
    }

    /// Returns true if the subscription existed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = {
            let mut subs = self.subscriptions.write().unwrap_or_else(|e| e.into_inner());
            let pos = subs.iter().position(|s| s.id == id);
            pos.map(|p| subs.remove(p))
        };
        match removed {
            Some(sub) => {
                if !self.is_interested(&sub.case_id) {
                    self.transport.unwatch(&sub.case_id);
                }
                true
            }
            None => false,
        }
    }

    fn has_subscribers(&self, case_id: &CaseId) -> bool {
        self.subscriptions
            .read()
            .map(|subs| subs.iter().any(|s| &s.case_id == case_id))
            .unwrap_or(false)
    }

    fn is_interested(&self, case_id: &CaseId) -> bool {
        let watched = self
            .watched
            .lock()
            .map(|w| w.contains(case_id))
            .unwrap_or(false);
        watched || self.has_subscribers(case_id)
    }

    /// Announce a version this session committed.
    pub fn publish(&self, record: &VersionRecord) -> Result<(), TransportError> {
        self.own_commits
            .lock()
            .map_err(|_| TransportError::LockPoisoned("publish"))?
            .insert(record.case_id.clone(), (record.version, record.created_at));

        let envelope = ChangeEnvelope::from_record(record, Some(self.session_id.clone()));
        match self.transport.publish(&envelope) {
            Ok(()) => {
                debug!(case_id = %record.case_id, version = record.version, "version published");
                Ok(())
            }
            Err(err) => {
                self.emit_notice(&Notice::TransportError {
                    error: err.to_string(),
                });
                Err(err)
            }
        }
    }

    /// Is this envelope plausibly our own commit coming back?
    pub fn is_echo(&self, envelope: &ChangeEnvelope) -> bool {
        if let Some(origin) = &envelope.origin {
            return origin == &self.session_id;
        }
        let own = match self.own_commits.lock() {
            Ok(own) => own.get(&envelope.case_id).copied(),
            Err(_) => None,
        };
        match own {
            Some((version, at)) => {
                version == envelope.version
                    && clock::distance(at, envelope.timestamp) <= self.echo_window
            }
            None => false,
        }
    }

    /// Drain the transport and fan out to subscribers.
    ///
    /// Waits up to `max_wait` for the first envelope, then takes whatever
    /// else is already queued. Returns the envelopes that passed echo and
    /// interest filtering, in arrival order. A transport failure is an error
    /// only when nothing was read before it; otherwise it is reported as a
    /// notice and the envelopes read so far are returned.
    pub fn pump(&self, max_wait: Duration) -> Result<Vec<ChangeEnvelope>, TransportError> {
        let mut delivered = Vec::new();
        let mut wait = max_wait;
        loop {
            let next = match self.transport.poll(wait) {
                Ok(next) => next,
                Err(err) => {
                    warn!(error = %err, delivered = delivered.len(), "change transport poll failed");
                    self.emit_notice(&Notice::TransportError {
                        error: err.to_string(),
                    });
                    // Envelopes already taken off the transport still go to the caller.
                    if delivered.is_empty() {
                        return Err(err);
                    }
                    break;
                }
            };
            let Some(envelope) = next else { break };
            wait = Duration::ZERO;

            if self.is_echo(&envelope) {
                debug!(case_id = %envelope.case_id, version = envelope.version, "echo dropped");
                continue;
            }
            if !self.is_interested(&envelope.case_id) {
                continue;
            }

            let targets: Vec<VersionCallback> = self
                .subscriptions
                .read()
                .map_err(|_| TransportError::LockPoisoned("pump"))?
                .iter()
                .filter(|s| s.case_id == envelope.case_id)
                .map(|s| Arc::clone(&s.callback))
                .collect();
            for callback in &targets {
                callback(&envelope);
            }
            delivered.push(envelope);
        }
        Ok(delivered)
    }

    pub fn on_notice<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&Notice) + Send + Sync + 'static,
    {
        let id = self.next_id();
        self.notice_listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(listener)));
        id
    }

    pub fn off_notice(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.notice_listeners.write().unwrap_or_else(|e| e.into_inner());
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    /// Log a notice and hand it to every notice listener.
    pub fn emit_notice(&self, notice: &Notice) {
        match notice.severity() {
            Severity::Info => info!(notice = %notice, "sync notice"),
            Severity::Warning => warn!(notice = %notice, "sync notice"),
            Severity::Error => error!(notice = %notice, "sync notice"),
        }
        let targets: Vec<NoticeListener> = self
            .notice_listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in &targets {
            listener(notice);
        }
    }
}
