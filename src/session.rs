//! Sync session - the surface the UI layer talks to.
//!
//! One `SyncSession` per tab. It owns the local cache and wires the version
//! store, notifier, scheduler, resolver and recovery together by constructor
//! injection. The session never runs by itself: call `tick` for timers and
//! `pump` for remote versions, or hand it to a `SessionDriver`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::autosave::{AutoSaveScheduler, CommitOutcome, Phase, ScheduledCommit};
use crate::cache::{Baseline, LocalCache};
use crate::clock::Clock;
use crate::config::SyncConfig;
use crate::conflict::{ConflictResolver, Resolution, ResolutionChoice};
use crate::document::{ActorId, CaseId, Document, SessionId};
use crate::error::SyncError;
use crate::notify::{
    ChangeEnvelope, ChangeNotifier, ChangeOrigin, ChangeTransport, ConnectionState, ListenerId,
    Notice, SectionBus, SectionChange, SectionFilter, SubscriptionId,
};
use crate::recovery::{VersionEntry, VersionRecovery};
use crate::version::{
    BackingStore, CaseRecord, CaseStatus, VersionId, VersionRecord, VersionStore, VersionSummary,
};

/// Conflict view for status indicators.
#[derive(Debug, Clone, PartialEq)]
pub enum ConflictState {
    None,
    /// The last remote version was settled without asking.
    AutoResolved { resolution: Resolution },
    /// Waiting for `resolve`.
    AwaitingChoice {
        local_base: Option<u64>,
        remote_version: u64,
        detected_at: DateTime<Utc>,
    },
}

/// Diagnostics for one open case.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncStatus {
    pub case_id: CaseId,
    pub pending: bool,
    pub last_local_edit_at: Option<DateTime<Utc>>,
    pub last_committed_at: Option<DateTime<Utc>>,
    pub conflict_state: ConflictState,
    pub phase: Phase,
    pub baseline_version: Option<u64>,
    pub retry_attempts: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Health of the cross-session transport.
    pub connection: ConnectionState,
}

pub struct SyncSession<B> {
    config: SyncConfig,
    clock: Arc<dyn Clock>,
    actor: Option<ActorId>,
    store: VersionStore<B>,
    cache: LocalCache,
    notifier: Arc<ChangeNotifier>,
    scheduler: AutoSaveScheduler<B>,
    resolver: ConflictResolver,
    recovery: VersionRecovery<B>,
}

impl<B: BackingStore + Clone> SyncSession<B> {
    /// Session with a fresh random id.
    pub fn new(
        backing: B,
        transport: Arc<dyn ChangeTransport>,
        config: SyncConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, SyncError> {
        Self::with_session_id(backing, transport, config, clock, SessionId::generate())
    }

    pub fn with_session_id(
        backing: B,
        transport: Arc<dyn ChangeTransport>,
        config: SyncConfig,
        clock: Arc<dyn Clock>,
        session_id: SessionId,
    ) -> Result<Self, SyncError> {
        config.validate()?;

        let store = VersionStore::with_clock(backing, Arc::clone(&clock))
            .with_max_payload_bytes(config.max_payload_bytes);
        let cache = LocalCache::new();
        let notifier = Arc::new(ChangeNotifier::new(
            session_id,
            transport,
            config.echo_window(),
        ));
        let scheduler = AutoSaveScheduler::new(
            store.clone(),
            cache.clone(),
            Arc::clone(&notifier),
            Arc::clone(&clock),
            &config,
        );
        let resolver = ConflictResolver::new(config.conflict_policy);
        let recovery = VersionRecovery::new(store.clone(), Arc::clone(&clock));

        Ok(Self {
            config,
            clock,
            actor: None,
            store,
            cache,
            notifier,
            scheduler,
            resolver,
            recovery,
        })
    }

    /// Actor recorded on every version this session commits.
    pub fn with_actor(mut self, actor: impl Into<ActorId>) -> Self {
        let actor = actor.into();
        self.scheduler.set_actor(Some(actor.clone()));
        self.actor = Some(actor);
        self
    }

    pub fn session_id(&self) -> &SessionId {
        self.notifier.session_id()
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn sections(&self) -> &SectionBus {
        self.notifier.sections()
    }

    pub fn open_cases(&self) -> Vec<CaseId> {
        self.cache.open_cases()
    }

    // ---- case lifecycle ----------------------------------------------

    /// Open a case by its natural key, seeding the cache from the current
    /// version. An empty key is refused: no anonymous cases.
    pub fn open_case(&self, key: &str) -> Result<CaseId, SyncError> {
        let case_id = CaseId::new(key)?;
        if self.cache.is_open(&case_id) {
            return Ok(case_id);
        }
        let current = self.store.get_current(&case_id)?;
        self.notifier.watch(&case_id)?;
        self.cache.open(&case_id, current.as_ref());
        self.scheduler.track(&case_id);
        info!(
            case_id = %case_id,
            version = current.as_ref().map(|r| r.version),
            "case opened"
        );
        Ok(case_id)
    }

    /// Leave a case. Pending edits are dropped without a commit.
    pub fn close_case(&self, case_id: &CaseId) -> bool {
        let closed = self.cache.close(case_id);
        self.scheduler.untrack(case_id);
        self.resolver.forget(case_id);
        self.notifier.unwatch(case_id);
        self.notifier.sections().off_case(case_id);
        if let Some(entry) = &closed {
            if entry.pending.is_some() {
                warn!(case_id = %case_id, "case closed with unsaved edits");
            }
        }
        closed.is_some()
    }

    pub fn case_record(&self, case_id: &CaseId) -> Result<Option<CaseRecord>, SyncError> {
        self.store.get_case(case_id)
    }

    pub fn transition_case(
        &self,
        case_id: &CaseId,
        next: CaseStatus,
    ) -> Result<CaseRecord, SyncError> {
        self.store.transition_case(case_id, next)
    }

    // ---- editing -----------------------------------------------------

    pub fn document(&self, case_id: &CaseId) -> Result<Document, SyncError> {
        self.cache.document(case_id)
    }

    /// Set one section of the working copy.
    pub fn edit(&self, case_id: &CaseId, section: &str, value: Value) -> Result<bool, SyncError> {
        let now = self.clock.now();
        let changed = self.cache.edit_section(case_id, section, value, now)?;
        if changed {
            self.scheduler.touch(case_id)?;
            self.emit_sections(case_id, &[section.to_string()], ChangeOrigin::Local);
        }
        Ok(changed)
    }

    pub fn remove_section(&self, case_id: &CaseId, section: &str) -> Result<bool, SyncError> {
        let now = self.clock.now();
        let removed = self.cache.remove_section(case_id, section, now)?;
        if removed {
            self.scheduler.touch(case_id)?;
            self.emit_sections(case_id, &[section.to_string()], ChangeOrigin::Local);
        }
        Ok(removed)
    }

    /// Replace the whole working copy. Returns the changed sections.
    pub fn replace_document(
        &self,
        case_id: &CaseId,
        document: Document,
    ) -> Result<Vec<String>, SyncError> {
        document.validate(self.config.max_payload_bytes)?;
        let changed = self
            .cache
            .replace_document(case_id, document, self.clock.now())?;
        if !changed.is_empty() {
            self.scheduler.touch(case_id)?;
            self.emit_sections(case_id, &changed, ChangeOrigin::Local);
        }
        Ok(changed)
    }

    /// Throw away local edits and go back to the last known version.
    ///
    /// With a conflict awaiting a choice, discarding means taking the remote
    /// version.
    pub fn discard_local_edits(&self, case_id: &CaseId) -> Result<Vec<String>, SyncError> {
        if self.resolver.pending(case_id).is_some() {
            return self
                .settle(case_id, ResolutionChoice::TakeRemote)
                .map(|(_, changed)| changed);
        }
        self.scheduler.cancel(case_id);
        let changed = self.cache.discard(case_id)?;
        self.emit_sections(case_id, &changed, ChangeOrigin::Discard);
        info!(case_id = %case_id, sections = changed.len(), "local edits discarded");
        Ok(changed)
    }

    /// Commit now, skipping the debounce wait but not the diff check.
    ///
    /// With a payload, the working copy is replaced first. The version is
    /// recorded against the session's actor (see `with_actor`); use
    /// `save_as` to name someone else.
    pub fn save(
        &self,
        case_id: &CaseId,
        payload: Option<Document>,
    ) -> Result<CommitOutcome, SyncError> {
        self.save_as(case_id, payload, self.actor.as_ref())
    }

    /// `save` with an explicit actor for this one commit.
    pub fn save_as(
        &self,
        case_id: &CaseId,
        payload: Option<Document>,
        actor: Option<&ActorId>,
    ) -> Result<CommitOutcome, SyncError> {
        if let Some(document) = payload {
            self.replace_document(case_id, document)?;
        }
        self.scheduler.save_now_as(case_id, actor)
    }

    // ---- listeners ---------------------------------------------------

    /// Register a widget for one section, or `"*"` for all of them.
    pub fn on_change<F>(&self, case_id: &CaseId, section: &str, handler: F) -> ListenerId
    where
        F: Fn(&SectionChange) + Send + Sync + 'static,
    {
        self.notifier
            .sections()
            .on(case_id, SectionFilter::parse(section), handler)
    }

    pub fn off(&self, id: ListenerId) -> bool {
        self.notifier.sections().off(id)
    }

    pub fn on_notice<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&Notice) + Send + Sync + 'static,
    {
        self.notifier.on_notice(handler)
    }

    pub fn off_notice(&self, id: SubscriptionId) -> bool {
        self.notifier.off_notice(id)
    }

    /// Raw remote-version events for a case, before conflict handling.
    pub fn subscribe_versions<F>(
        &self,
        case_id: &CaseId,
        callback: F,
    ) -> Result<SubscriptionId, SyncError>
    where
        F: Fn(&ChangeEnvelope) + Send + Sync + 'static,
    {
        Ok(self.notifier.subscribe(case_id, callback)?)
    }

    pub fn unsubscribe_versions(&self, id: SubscriptionId) -> bool {
        self.notifier.unsubscribe(id)
    }

    // ---- version browser ---------------------------------------------

    pub fn get_history(&self, case_id: &CaseId) -> Result<Vec<VersionSummary>, SyncError> {
        self.store.get_history(case_id)
    }

    pub fn list_versions(&self, case_id: &CaseId) -> Result<Vec<VersionEntry>, SyncError> {
        self.recovery.list_versions(case_id)
    }

    pub fn preview(&self, version_id: &VersionId) -> Result<VersionRecord, SyncError> {
        self.recovery.preview(version_id)
    }

    pub fn export_text(&self, version_id: &VersionId) -> Result<String, SyncError> {
        self.recovery.export_text(version_id)
    }

    /// Restore an old version as a new current one and load it.
    pub fn restore(
        &self,
        case_id: &CaseId,
        version_id: &VersionId,
    ) -> Result<VersionRecord, SyncError> {
        let record = self
            .recovery
            .restore(case_id, version_id, self.actor.as_ref())?;

        if let Ok(entry) = self.cache.snapshot(case_id) {
            if let Some(marker) = entry.pending.filter(|_| entry.is_dirty()) {
                self.notifier.emit_notice(&Notice::LocalEditsDiscarded {
                    case_id: case_id.clone(),
                    remote_version: record.version,
                    pending_since: marker.since,
                });
            }
            self.resolver.clear(case_id);
            self.scheduler.cancel(case_id);
            let changed = self.cache.adopt(case_id, Baseline::from_record(&record))?;
            self.scheduler.release(case_id);
            self.emit_sections(
                case_id,
                &changed,
                ChangeOrigin::Restore {
                    version: record.version,
                },
            );
        }

        if let Err(err) = self.notifier.publish(&record) {
            warn!(case_id = %case_id, error = %err, "restored version not announced");
        }
        Ok(record)
    }

    // ---- conflicts and status ----------------------------------------

    /// Apply the user's decision to a conflict held under the manual policy.
    pub fn resolve(
        &self,
        case_id: &CaseId,
        choice: ResolutionChoice,
    ) -> Result<Resolution, SyncError> {
        self.settle(case_id, choice).map(|(resolution, _)| resolution)
    }

    fn settle(
        &self,
        case_id: &CaseId,
        choice: ResolutionChoice,
    ) -> Result<(Resolution, Vec<String>), SyncError> {
        let (resolution, changed) = self.resolver.resolve(case_id, choice, &self.cache)?;
        self.apply_resolution(case_id, &resolution, &changed);
        self.scheduler.release(case_id);
        Ok((resolution, changed))
    }

    pub fn get_status(&self, case_id: &CaseId) -> Result<SyncStatus, SyncError> {
        let entry = self.cache.snapshot(case_id)?;
        let timers = self
            .scheduler
            .timers(case_id)
            .ok_or_else(|| SyncError::CaseNotOpen(case_id.clone()))?;

        let conflict_state = match self.resolver.pending(case_id) {
            Some(pending) => ConflictState::AwaitingChoice {
                local_base: pending.local_base,
                remote_version: pending.remote.version,
                detected_at: pending.detected_at,
            },
            None => match self.resolver.last_resolution(case_id) {
                Some(resolution) => ConflictState::AutoResolved { resolution },
                None => ConflictState::None,
            },
        };

        let baseline_committed = entry.baseline.as_ref().map(|b| b.committed_at);
        Ok(SyncStatus {
            case_id: case_id.clone(),
            pending: entry.pending.is_some(),
            last_local_edit_at: entry.last_local_edit_at,
            last_committed_at: timers.last_committed_at.max(baseline_committed),
            conflict_state,
            phase: timers.phase,
            baseline_version: entry.baseline_version(),
            retry_attempts: timers.attempts,
            next_retry_at: timers.retry_at,
            last_error: timers.last_error,
            connection: self.notifier.connection_state(),
        })
    }

    // ---- driving -----------------------------------------------------

    /// Fire due timers.
    pub fn tick(&self) -> Vec<ScheduledCommit> {
        self.scheduler.tick()
    }

    /// Receive remote versions and settle each against the local cache.
    pub fn pump(&self, max_wait: Duration) -> Result<Vec<(CaseId, Resolution)>, SyncError> {
        let envelopes = self.notifier.pump(max_wait)?;
        let mut handled = Vec::with_capacity(envelopes.len());
        for envelope in envelopes {
            let now = self.clock.now();
            match self.resolver.handle_remote(&envelope, &self.cache, now) {
                Ok((resolution, changed)) => {
                    self.apply_resolution(&envelope.case_id, &resolution, &changed);
                    handled.push((envelope.case_id, resolution));
                }
                Err(err) => {
                    warn!(case_id = %envelope.case_id, version = envelope.version, error = %err, "remote version not applied");
                }
            }
        }
        Ok(handled)
    }

    fn apply_resolution(&self, case_id: &CaseId, resolution: &Resolution, changed: &[String]) {
        match resolution {
            Resolution::Adopted { version } => {
                self.scheduler.cancel(case_id);
                self.emit_sections(case_id, changed, ChangeOrigin::Remote { version: *version });
            }
            Resolution::RemoteWon {
                version,
                discarded_since,
            } => {
                self.scheduler.cancel(case_id);
                self.emit_sections(case_id, changed, ChangeOrigin::Remote { version: *version });
                self.notifier.emit_notice(&Notice::LocalEditsDiscarded {
                    case_id: case_id.clone(),
                    remote_version: *version,
                    pending_since: *discarded_since,
                });
            }
            Resolution::LocalKept { remote_version } => {
                self.notifier.emit_notice(&Notice::RemoteDiscarded {
                    case_id: case_id.clone(),
                    remote_version: *remote_version,
                });
            }
            Resolution::AwaitingChoice { remote_version } => {
                self.scheduler.hold(case_id);
                let local_base = self
                    .resolver
                    .pending(case_id)
                    .and_then(|p| p.local_base);
                self.notifier.emit_notice(&Notice::ConflictAwaitingChoice {
                    case_id: case_id.clone(),
                    local_base,
                    remote_version: *remote_version,
                });
            }
            Resolution::Ignored { .. } => {}
        }
    }

    fn emit_sections(&self, case_id: &CaseId, sections: &[String], origin: ChangeOrigin) {
        if sections.is_empty() {
            return;
        }
        let Ok(document) = self.cache.document(case_id) else {
            return;
        };
        let at = self.clock.now();
        let mut delivered = 0;
        for section in sections {
            delivered += self.notifier.sections().emit(&SectionChange {
                case_id: case_id.clone(),
                section: section.clone(),
                value: document.section(section).cloned(),
                origin,
                at,
            });
        }
        debug!(case_id = %case_id, sections = sections.len(), delivered, ?origin, "section changes emitted");
    }
}
