//! Time source injected into every timer-owning component.
//!
//! The scheduler and resolver never call `Utc::now()` directly; they ask a
//! `Clock`. Production code uses `SystemClock`, tests drive a `ManualClock`.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Trait for reading the current wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Clock backed by the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock.
///
/// Clone-friendly (cloning shares the same underlying instant), so a test can
/// hold one handle while the session holds another.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<RwLock<DateTime<Utc>>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    /// Start at a fixed, arbitrary instant (2024-01-01T00:00:00Z).
    pub fn new() -> Self {
        Self::starting_at(DateTime::from_timestamp(1_704_067_200, 0).unwrap_or_default())
    }

    pub fn starting_at(at: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(RwLock::new(at)),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.write().unwrap_or_else(|e| e.into_inner());
        *now = after(*now, by);
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.write().unwrap_or_else(|e| e.into_inner()) = at;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read().unwrap_or_else(|e| e.into_inner())
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }
}

/// Add a std `Duration` to a timestamp, saturating instead of overflowing.
pub(crate) fn after(at: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(by)
        .ok()
        .and_then(|d| at.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Absolute distance between two instants.
pub(crate) fn distance(a: DateTime<Utc>, b: DateTime<Utc>) -> Duration {
    let delta = if a >= b { a - b } else { b - a };
    delta.to_std().unwrap_or(Duration::ZERO)
}
