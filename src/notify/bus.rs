//! In-process section bus.
//!
//! Synchronous fan-out to listeners keyed by section name, with a wildcard
//! filter that receives every section. Listeners are cloned out of the lock
//! before they run, so a listener may register or remove listeners itself.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::document::CaseId;

/// Which sections a listener wants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SectionFilter {
    Section(String),
    All,
}

impl SectionFilter {
    /// `"*"` means every section.
    pub fn parse(name: &str) -> Self {
        if name == "*" {
            SectionFilter::All
        } else {
            SectionFilter::Section(name.to_string())
        }
    }

    pub fn matches(&self, section: &str) -> bool {
        match self {
            SectionFilter::All => true,
            SectionFilter::Section(name) => name == section,
        }
    }
}

/// Where a section change came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOrigin {
    /// Edited in this session.
    Local,
    /// Adopted from another session's version.
    Remote { version: u64 },
    /// Produced by restoring an older version.
    Restore { version: u64 },
    /// Local edits thrown away, section reverted to the baseline.
    Discard,
}

/// One section of one case changed.
#[derive(Debug, Clone, PartialEq)]
pub struct SectionChange {
    pub case_id: CaseId,
    pub section: String,
    /// New value, `None` if the section was removed.
    pub value: Option<Value>,
    pub origin: ChangeOrigin,
    pub at: DateTime<Utc>,
}

/// Handle returned by `SectionBus::on`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type SectionListener = Arc<dyn Fn(&SectionChange) + Send + Sync>;

struct Registration {
    id: ListenerId,
    case_id: CaseId,
    filter: SectionFilter,
    listener: SectionListener,
}

/// Clone-friendly (cloning shares the same listener table).
#[derive(Clone, Default)]
pub struct SectionBus {
    listeners: Arc<RwLock<Vec<Registration>>>,
    next_id: Arc<AtomicU64>,
}

impl SectionBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(&self, case_id: &CaseId, filter: SectionFilter, listener: F) -> ListenerId
    where
        F: Fn(&SectionChange) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(Registration {
                id,
                case_id: case_id.clone(),
                filter,
                listener: Arc::new(listener),
            });
        id
    }

    /// Returns true if the listener was registered.
    pub fn off(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        let before = listeners.len();
        listeners.retain(|r| r.id != id);
        listeners.len() != before
    }

    /// Drop every listener for a case.
    pub fn off_case(&self, case_id: &CaseId) -> usize {
        let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        let before = listeners.len();
        listeners.retain(|r| &r.case_id != case_id);
        before - listeners.len()
    }

    /// Deliver to every matching listener. Returns the number of deliveries.
    pub fn emit(&self, change: &SectionChange) -> usize {
        let targets: Vec<SectionListener> = self
            .listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|r| r.case_id == change.case_id && r.filter.matches(&change.section))
            .map(|r| Arc::clone(&r.listener))
            .collect();

        for listener in &targets {
            listener(change);
        }
        targets.len()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().map(|l| l.len()).unwrap_or(0)
    }
}
