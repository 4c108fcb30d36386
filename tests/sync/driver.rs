//! Background driver tests, on the system clock.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use case_sync::{
    InMemoryBackingStore, InMemoryChannel, SessionDriver, SessionId, SyncConfig, SyncSession,
    SystemClock,
};
use serde_json::json;

use crate::support::{init_tracing, PLATE};

fn fast_config() -> SyncConfig {
    SyncConfig::default()
        .with_debounce(Duration::from_millis(10))
        .with_periodic_check(Duration::from_secs(1))
}

fn session(
    backing: &InMemoryBackingStore,
    channel: &InMemoryChannel,
    name: &str,
) -> Arc<Mutex<SyncSession<InMemoryBackingStore>>> {
    let session = SyncSession::with_session_id(
        backing.clone(),
        Arc::new(channel.connect()),
        fast_config(),
        Arc::new(SystemClock),
        SessionId::new(name),
    )
    .unwrap()
    .with_actor(name);
    Arc::new(Mutex::new(session))
}

fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    done()
}

#[test]
fn driver_commits_and_carries_versions_across_sessions() {
    init_tracing();
    let backing = InMemoryBackingStore::new();
    let channel = InMemoryChannel::new();
    let a = session(&backing, &channel, "a");
    let b = session(&backing, &channel, "b");

    let case_id = a.lock().unwrap().open_case(PLATE).unwrap();
    b.lock().unwrap().open_case(PLATE).unwrap();

    let driver_a = SessionDriver::spawn(Arc::clone(&a), Duration::from_millis(5));
    let driver_b = SessionDriver::spawn(Arc::clone(&b), Duration::from_millis(5));

    a.lock()
        .unwrap()
        .edit(&case_id, "vehicle", json!({"plate": PLATE, "km": 1200}))
        .unwrap();

    assert!(
        wait_until(Duration::from_secs(2), || backing.version_count() == 1),
        "debounced commit landed"
    );
    let expected = a.lock().unwrap().document(&case_id).unwrap();
    assert!(
        wait_until(Duration::from_secs(2), || {
            b.lock().unwrap().document(&case_id).ok() == Some(expected.clone())
        }),
        "other session adopted the version"
    );

    let stats_a = driver_a.stop();
    let stats_b = driver_b.stop();
    assert!(stats_a.ticks >= 1);
    assert_eq!(stats_a.commits, 1);
    assert_eq!(stats_a.failures, 0);
    assert_eq!(stats_b.remote_events, 1);
    assert_eq!(stats_b.commits, 0);
    assert_eq!(backing.version_count(), 1);
}

#[test]
fn dropped_driver_stops_its_thread() {
    let backing = InMemoryBackingStore::new();
    let channel = InMemoryChannel::new();
    let a = session(&backing, &channel, "a");
    let driver = SessionDriver::spawn(Arc::clone(&a), Duration::from_millis(5));
    driver.signal_stop();
    drop(driver);

    // The session is still usable from this thread.
    let case_id = a.lock().unwrap().open_case(PLATE).unwrap();
    a.lock().unwrap().save(&case_id, None).unwrap();
    assert_eq!(backing.version_count(), 0, "empty working copy, nothing to save");
}
