use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::backoff::Backoff;
use crate::cache::LocalCache;
use crate::clock::{after, Clock};
use crate::config::SyncConfig;
use crate::document::{ActorId, CaseId};
use crate::error::SyncError;
use crate::notify::{ChangeNotifier, Notice};
use crate::version::{BackingStore, StoreError, VersionRecord, VersionSource, VersionStore};

/// Per-case auto-save state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    PendingCommit,
    Committing,
}

/// What started a commit attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitTrigger {
    Debounce,
    Periodic,
    Retry,
    Manual,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
    Committed(VersionRecord),
    /// The working copy equals the baseline; nothing was written.
    Unchanged,
    /// Edits are kept. `retry_at` is `None` when the error is not retryable.
    Failed {
        error: SyncError,
        retry_at: Option<DateTime<Utc>>,
    },
    /// A commit for the case is still in flight.
    Busy,
}

/// One commit attempt made by `tick`.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledCommit {
    pub case_id: CaseId,
    pub trigger: CommitTrigger,
    pub outcome: CommitOutcome,
}

/// Timers and retry bookkeeping for one case.
#[derive(Debug, Clone, PartialEq)]
pub struct CaseTimers {
    pub phase: Phase,
    pub debounce_deadline: Option<DateTime<Utc>>,
    pub next_periodic: DateTime<Utc>,
    pub retry_at: Option<DateTime<Utc>>,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub last_committed_at: Option<DateTime<Utc>>,
    pub committing_since: Option<DateTime<Utc>>,
    /// Automatic commits suspended, e.g. while a conflict awaits a choice.
    pub held: bool,
}

impl CaseTimers {
    fn new(next_periodic: DateTime<Utc>) -> Self {
        Self {
            phase: Phase::Idle,
            debounce_deadline: None,
            next_periodic,
            retry_at: None,
            attempts: 0,
            last_error: None,
            last_committed_at: None,
            committing_since: None,
            held: false,
        }
    }
}

/// Debounced, periodic and retried commits of the local cache.
///
/// The scheduler owns every timer for every tracked case. It never runs on
/// its own: `tick` checks the deadlines against the injected clock and
/// commits whatever is due, so a driver thread or a test decides when time
/// passes.
///
/// Commits for one case are serialized: a case in `Committing` is skipped,
/// and a commit that never came back is failed after the commit timeout.
pub struct AutoSaveScheduler<B> {
    store: VersionStore<B>,
    cache: LocalCache,
    notifier: Arc<ChangeNotifier>,
    clock: Arc<dyn Clock>,
    debounce: Duration,
    periodic: Duration,
    backoff: Backoff,
    commit_timeout: Duration,
    actor: Option<ActorId>,
    timers: Mutex<HashMap<CaseId, CaseTimers>>,
}

impl<B: BackingStore> AutoSaveScheduler<B> {
    pub fn new(
        store: VersionStore<B>,
        cache: LocalCache,
        notifier: Arc<ChangeNotifier>,
        clock: Arc<dyn Clock>,
        config: &SyncConfig,
    ) -> Self {
        Self {
            store,
            cache,
            notifier,
            clock,
            debounce: config.debounce(),
            periodic: config.periodic_check(),
            backoff: Backoff::new(config.retry_initial(), config.retry_max()),
            commit_timeout: config.commit_timeout(),
            actor: None,
            timers: Mutex::new(HashMap::new()),
        }
    }

    /// Set the actor recorded on automatic commits.
    pub fn with_actor(mut self, actor: Option<ActorId>) -> Self {
        self.actor = actor;
        self
    }

    pub fn set_actor(&mut self, actor: Option<ActorId>) {
        self.actor = actor;
    }

    fn lock_timers(&self) -> MutexGuard<'_, HashMap<CaseId, CaseTimers>> {
        self.timers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start scheduling a case. A working copy that is already pending gets
    /// a debounce deadline right away.
    pub fn track(&self, case_id: &CaseId) {
        let now = self.clock.now();
        let pending = self
            .cache
            .snapshot(case_id)
            .map(|e| e.pending.is_some())
            .unwrap_or(false);
        let mut timers = self.lock_timers();
        timers.entry(case_id.clone()).or_insert_with(|| {
            let mut t = CaseTimers::new(after(now, self.periodic));
            if pending {
                t.phase = Phase::PendingCommit;
                t.debounce_deadline = Some(after(now, self.debounce));
            }
            t
        });
    }

    pub fn untrack(&self, case_id: &CaseId) -> Option<CaseTimers> {
        self.lock_timers().remove(case_id)
    }

    pub fn timers(&self, case_id: &CaseId) -> Option<CaseTimers> {
        self.lock_timers().get(case_id).cloned()
    }

    /// A local mutation happened: (re)start the debounce timer.
    pub fn touch(&self, case_id: &CaseId) -> Result<(), SyncError> {
        let now = self.clock.now();
        let mut timers = self.lock_timers();
        let t = timers
            .get_mut(case_id)
            .ok_or_else(|| SyncError::CaseNotOpen(case_id.clone()))?;
        if t.phase != Phase::Committing {
            t.phase = Phase::PendingCommit;
        }
        t.debounce_deadline = Some(after(now, self.debounce));
        Ok(())
    }

    /// Drop pending timers and retries without committing.
    pub fn cancel(&self, case_id: &CaseId) {
        if let Some(t) = self.lock_timers().get_mut(case_id) {
            if t.phase != Phase::Committing {
                t.phase = Phase::Idle;
            }
            t.debounce_deadline = None;
            t.retry_at = None;
            t.attempts = 0;
            t.last_error = None;
        }
    }

    /// Suspend automatic commits for a case.
    pub fn hold(&self, case_id: &CaseId) {
        if let Some(t) = self.lock_timers().get_mut(case_id) {
            t.held = true;
        }
    }

    /// Resume automatic commits; a pending case is committed on the next
    /// debounce deadline.
    pub fn release(&self, case_id: &CaseId) {
        let now = self.clock.now();
        let dirty = self
            .cache
            .snapshot(case_id)
            .map(|e| e.pending.is_some())
            .unwrap_or(false);
        if let Some(t) = self.lock_timers().get_mut(case_id) {
            t.held = false;
            if dirty && t.phase != Phase::Committing {
                t.phase = Phase::PendingCommit;
                t.debounce_deadline = Some(after(now, self.debounce));
            }
        }
    }

    /// Commit immediately, skipping the debounce wait but not the diff check.
    pub fn save_now(&self, case_id: &CaseId) -> Result<CommitOutcome, SyncError> {
        self.save_now_as(case_id, self.actor.as_ref())
    }

    /// Manual save recorded against `actor` instead of the scheduler's own.
    pub fn save_now_as(
        &self,
        case_id: &CaseId,
        actor: Option<&ActorId>,
    ) -> Result<CommitOutcome, SyncError> {
        if self.timers(case_id).is_some_and(|t| t.held) {
            return Err(SyncError::AwaitingConflictChoice(case_id.clone()));
        }
        self.run_commit(case_id, CommitTrigger::Manual, actor)
    }

    /// Fire every deadline that has passed.
    pub fn tick(&self) -> Vec<ScheduledCommit> {
        let now = self.clock.now();
        let mut due = Vec::new();
        let mut timed_out = Vec::new();

        {
            let mut timers = self.lock_timers();
            for (case_id, t) in timers.iter_mut() {
                if t.phase == Phase::Committing {
                    let expired = t
                        .committing_since
                        .is_some_and(|since| after(since, self.commit_timeout) <= now);
                    if expired {
                        t.phase = Phase::Idle;
                        t.committing_since = None;
                        t.attempts += 1;
                        let retry_at = after(now, self.backoff.delay(t.attempts));
                        t.retry_at = Some(retry_at);
                        let error = SyncError::from(StoreError::Timeout(self.commit_timeout));
                        t.last_error = Some(error.to_string());
                        timed_out.push(Notice::CommitFailed {
                            case_id: case_id.clone(),
                            attempt: t.attempts,
                            error: error.to_string(),
                            retry_at,
                        });
                    }
                    continue;
                }

                let periodic_due = t.next_periodic <= now;
                if periodic_due {
                    t.next_periodic = after(now, self.periodic);
                }
                if t.held {
                    continue;
                }

                let trigger = if t.retry_at.is_some_and(|at| at <= now) {
                    Some(CommitTrigger::Retry)
                } else if t.debounce_deadline.is_some_and(|at| at <= now) {
                    Some(CommitTrigger::Debounce)
                } else if periodic_due {
                    Some(CommitTrigger::Periodic)
                } else {
                    None
                };
                if let Some(trigger) = trigger {
                    due.push((case_id.clone(), trigger));
                }
            }
        }

        for notice in &timed_out {
            warn!(notice = %notice, "in-flight commit timed out");
            self.notifier.emit_notice(notice);
        }

        let mut commits = Vec::with_capacity(due.len());
        for (case_id, trigger) in due {
            match self.run_commit(&case_id, trigger, self.actor.as_ref()) {
                Ok(outcome) => commits.push(ScheduledCommit {
                    case_id,
                    trigger,
                    outcome,
                }),
                Err(err) => warn!(case_id = %case_id, error = %err, "scheduled commit skipped"),
            }
        }
        commits
    }

    fn run_commit(
        &self,
        case_id: &CaseId,
        trigger: CommitTrigger,
        actor: Option<&ActorId>,
    ) -> Result<CommitOutcome, SyncError> {
        let now = self.clock.now();
        let entry = self.cache.snapshot(case_id)?;

        {
            let mut timers = self.lock_timers();
            let t = timers
                .get_mut(case_id)
                .ok_or_else(|| SyncError::CaseNotOpen(case_id.clone()))?;
            if t.phase == Phase::Committing {
                return Ok(CommitOutcome::Busy);
            }
            if !entry.is_dirty() {
                t.phase = Phase::Idle;
                t.debounce_deadline = None;
                t.retry_at = None;
                t.attempts = 0;
                drop(timers);
                if entry.pending.is_some() {
                    self.cache.clear_marker(case_id)?;
                }
                debug!(case_id = %case_id, ?trigger, "no changes since baseline");
                return Ok(CommitOutcome::Unchanged);
            }
            t.phase = Phase::Committing;
            t.committing_since = Some(now);
            t.debounce_deadline = None;
        }

        debug!(case_id = %case_id, ?trigger, "commit started");
        let result = self.store.commit(
            case_id,
            &entry.document,
            actor,
            VersionSource::System,
        );
        let finished = self.clock.now();
        let cleared = match &result {
            Ok(record) => self.cache.mark_committed(case_id, record).unwrap_or(false),
            Err(_) => false,
        };

        let mut timers = self.lock_timers();
        let Some(t) = timers.get_mut(case_id) else {
            // Untracked while the commit was in flight.
            return Ok(match result {
                Ok(record) => CommitOutcome::Committed(record),
                Err(error) => CommitOutcome::Failed {
                    error,
                    retry_at: None,
                },
            });
        };
        t.committing_since = None;

        match result {
            Ok(record) => {
                let previous_attempts = t.attempts;
                t.attempts = 0;
                t.retry_at = None;
                t.last_error = None;
                t.last_committed_at = Some(record.created_at);
                if cleared {
                    t.phase = Phase::Idle;
                } else {
                    t.phase = Phase::PendingCommit;
                    if t.debounce_deadline.is_none() {
                        t.debounce_deadline = Some(after(finished, self.debounce));
                    }
                }
                drop(timers);

                if let Err(err) = self.notifier.publish(&record) {
                    warn!(case_id = %case_id, version = record.version, error = %err, "version not announced");
                }
                if previous_attempts > 0 {
                    self.notifier.emit_notice(&Notice::CommitRecovered {
                        case_id: case_id.clone(),
                        version: record.version,
                        attempts: previous_attempts + 1,
                    });
                }
                Ok(CommitOutcome::Committed(record))
            }
            Err(error) if error.is_retryable() => {
                t.attempts += 1;
                let attempt = t.attempts;
                let retry_at = after(finished, self.backoff.delay(attempt));
                t.retry_at = Some(retry_at);
                t.phase = Phase::Idle;
                t.last_error = Some(error.to_string());
                drop(timers);

                self.notifier.emit_notice(&Notice::CommitFailed {
                    case_id: case_id.clone(),
                    attempt,
                    error: error.to_string(),
                    retry_at,
                });
                Ok(CommitOutcome::Failed {
                    error,
                    retry_at: Some(retry_at),
                })
            }
            Err(error) => {
                t.attempts = 0;
                t.retry_at = None;
                t.phase = Phase::Idle;
                t.last_error = Some(error.to_string());
                drop(timers);

                self.notifier.emit_notice(&Notice::CommitRejected {
                    case_id: case_id.clone(),
                    error: error.to_string(),
                });
                Ok(CommitOutcome::Failed {
                    error,
                    retry_at: None,
                })
            }
        }
    }
}
