//! Last-value key slot transport.
//!
//! Models shared browser storage: each case has its own key, every publish
//! overwrites that key's text and stamps it with a fresh generation, and
//! other handles are woken to read it. The writer never sees its own write.
//! A slow reader can miss intermediate values of one case, but it always
//! sees the newest value of every case that changed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use super::envelope::ChangeEnvelope;
use super::transport::{ChangeTransport, TransportError};
use crate::document::CaseId;

struct Slot {
    value: String,
    generation: u64,
    writer: u64,
}

#[derive(Default)]
struct Slots {
    by_case: HashMap<CaseId, Slot>,
    generation: u64,
}

#[derive(Default)]
struct Shared {
    slots: Mutex<Slots>,
    changed: Condvar,
    next_handle: AtomicU64,
}

/// What one handle has already read.
struct Seen {
    /// Generation at connect time; keys never read are compared against it.
    opened_at: u64,
    by_case: HashMap<CaseId, u64>,
}

impl Seen {
    fn get(&self, case_id: &CaseId) -> u64 {
        self.by_case.get(case_id).copied().unwrap_or(self.opened_at)
    }
}

/// One tab's view of the shared storage.
pub struct StorageSlotChannel {
    shared: Arc<Shared>,
    handle: u64,
    seen: Mutex<Seen>,
}

impl Default for StorageSlotChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageSlotChannel {
    pub fn new() -> Self {
        let shared = Arc::new(Shared::default());
        let handle = shared.next_handle.fetch_add(1, Ordering::Relaxed);
        Self {
            shared,
            handle,
            seen: Mutex::new(Seen {
                opened_at: 0,
                by_case: HashMap::new(),
            }),
        }
    }

    /// Another tab on the same storage. It sees only writes made after it opened.
    pub fn connect(&self) -> Self {
        let generation = self
            .shared
            .slots
            .lock()
            .map(|s| s.generation)
            .unwrap_or(0);
        Self {
            shared: Arc::clone(&self.shared),
            handle: self.shared.next_handle.fetch_add(1, Ordering::Relaxed),
            seen: Mutex::new(Seen {
                opened_at: generation,
                by_case: HashMap::new(),
            }),
        }
    }

    /// Raw contents of one case's key, as another process would read them.
    pub fn raw_value(&self, case_id: &CaseId) -> Option<String> {
        self.shared
            .slots
            .lock()
            .ok()
            .and_then(|s| s.by_case.get(case_id).map(|slot| slot.value.clone()))
    }
}

impl ChangeTransport for StorageSlotChannel {
    fn publish(&self, envelope: &ChangeEnvelope) -> Result<(), TransportError> {
        let text = envelope.to_text()?;
        let mut slots = self
            .shared
            .slots
            .lock()
            .map_err(|_| TransportError::LockPoisoned("slot write"))?;
        slots.generation += 1;
        let generation = slots.generation;
        slots.by_case.insert(
            envelope.case_id.clone(),
            Slot {
                value: text,
                generation,
                writer: self.handle,
            },
        );
        drop(slots);

        // Our own write is not an event for us.
        if let Ok(mut seen) = self.seen.lock() {
            seen.by_case.insert(envelope.case_id.clone(), generation);
        }
        self.shared.changed.notify_all();
        Ok(())
    }

    fn poll(&self, timeout: Duration) -> Result<Option<ChangeEnvelope>, TransportError> {
        let deadline = Instant::now() + timeout;
        let mut seen = self
            .seen
            .lock()
            .map_err(|_| TransportError::LockPoisoned("slot seen"))?;
        let mut slots = self
            .shared
            .slots
            .lock()
            .map_err(|_| TransportError::LockPoisoned("slot read"))?;

        loop {
            // Oldest unread key first.
            let unread = slots
                .by_case
                .iter()
                .filter(|(case_id, slot)| slot.generation > seen.get(case_id))
                .min_by_key(|(_, slot)| slot.generation);
            if let Some((case_id, slot)) = unread {
                seen.by_case.insert(case_id.clone(), slot.generation);
                if slot.writer == self.handle {
                    continue;
                }
                return ChangeEnvelope::from_text(&slot.value).map(Some);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let (guard, _) = self
                .shared
                .changed
                .wait_timeout(slots, deadline - now)
                .map_err(|_| TransportError::LockPoisoned("slot wait"))?;
            slots = guard;
        }
    }
}
