//! Shared fixtures: several tabs on one backing store and one channel,
//! all reading the same manual clock.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use case_sync::{
    CaseId, ConflictPolicy, Document, InMemoryBackingStore, InMemoryChannel, ManualClock, Notice,
    SessionId, SyncConfig, SyncSession, VersionRecord, VersionSource, VersionStore,
};
use serde_json::Value;

pub const PLATE: &str = "123-45-678";
pub const OTHER_PLATE: &str = "77-888-99";

pub type Tab = SyncSession<InMemoryBackingStore>;

pub struct World {
    pub clock: ManualClock,
    pub backing: InMemoryBackingStore,
    pub channel: InMemoryChannel,
}

impl World {
    pub fn new() -> Self {
        Self {
            clock: ManualClock::new(),
            backing: InMemoryBackingStore::new(),
            channel: InMemoryChannel::new(),
        }
    }

    pub fn config(&self, policy: ConflictPolicy) -> SyncConfig {
        SyncConfig::default().with_conflict_policy(policy)
    }

    pub fn tab(&self, name: &str, policy: ConflictPolicy) -> Tab {
        self.tab_with(name, self.config(policy))
    }

    pub fn tab_with(&self, name: &str, config: SyncConfig) -> Tab {
        SyncSession::with_session_id(
            self.backing.clone(),
            Arc::new(self.channel.connect()),
            config,
            Arc::new(self.clock.clone()),
            SessionId::new(name),
        )
        .expect("valid config")
        .with_actor(name)
    }

    /// Direct store access, bypassing any session.
    pub fn store(&self) -> VersionStore<InMemoryBackingStore> {
        VersionStore::with_clock(self.backing.clone(), Arc::new(self.clock.clone()))
    }

    /// Seed `count` versions of the plate case directly in the store.
    pub fn seed(&self, count: i64) -> Vec<VersionRecord> {
        let store = self.store();
        let case_id = case();
        (1..=count)
            .map(|n| {
                self.clock.advance(Duration::from_secs(60));
                store
                    .commit(&case_id, &doc_km(n), None, VersionSource::System)
                    .expect("seed commit")
            })
            .collect()
    }

    pub fn advance_secs(&self, secs: u64) {
        self.clock.advance(Duration::from_secs(secs));
    }
}

pub fn case() -> CaseId {
    CaseId::new(PLATE).expect("plate")
}

pub fn doc(value: Value) -> Document {
    Document::from_value(value).expect("object")
}

pub fn doc_km(km: i64) -> Document {
    doc(serde_json::json!({
        "vehicle": {"plate": PLATE, "km": km},
        "damage-centers": [],
    }))
}

/// Collect every notice a tab emits.
pub fn notices(tab: &Tab) -> Arc<Mutex<Vec<Notice>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    tab.on_notice(move |n| sink.lock().unwrap().push(n.clone()));
    seen
}

/// Install a test subscriber once; output shows with `--nocapture`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
