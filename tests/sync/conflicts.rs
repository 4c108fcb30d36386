use std::sync::{Arc, Mutex};
use std::time::Duration;

use case_sync::{
    ChangeEnvelope, ChangeOrigin, ChangeTransport, Clock, CommitOutcome, ConflictPolicy,
    ConflictState, IgnoreReason, Notice, Resolution, ResolutionChoice, SyncError,
};
use serde_json::json;

use crate::support::{doc_km, notices, Tab, World, PLATE};

fn pump(tab: &Tab) -> Vec<Resolution> {
    tab.pump(Duration::ZERO)
        .unwrap()
        .into_iter()
        .map(|(_, resolution)| resolution)
        .collect()
}

#[test]
fn newer_remote_beats_older_local_edit() {
    let world = World::new();
    world.seed(4);
    let a = world.tab("a", ConflictPolicy::Timestamp);
    let b = world.tab("b", ConflictPolicy::Timestamp);
    let case_id = a.open_case(PLATE).unwrap();
    b.open_case(PLATE).unwrap();
    let seen = notices(&a);

    let sections = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&sections);
    a.on_change(&case_id, "*", move |c| {
        sink.lock().unwrap().push((c.section.clone(), c.origin))
    });

    world.advance_secs(10);
    let edited_at = world.clock.now();
    a.edit(&case_id, "notes", json!("from a")).unwrap();

    world.advance_secs(2);
    let remote = b.save(&case_id, Some(doc_km(500))).unwrap();
    assert!(matches!(remote, CommitOutcome::Committed(ref r) if r.version == 5));

    let resolutions = pump(&a);
    assert_eq!(
        resolutions,
        vec![Resolution::RemoteWon {
            version: 5,
            discarded_since: edited_at,
        }]
    );
    assert_eq!(a.document(&case_id).unwrap(), doc_km(500));

    let status = a.get_status(&case_id).unwrap();
    assert!(!status.pending);
    assert_eq!(status.baseline_version, Some(5));
    assert!(matches!(
        status.conflict_state,
        ConflictState::AutoResolved {
            resolution: Resolution::RemoteWon { version: 5, .. }
        }
    ));

    assert!(matches!(
        seen.lock().unwrap().as_slice(),
        [Notice::LocalEditsDiscarded {
            remote_version: 5,
            ..
        }]
    ));

    let mut remote_sections: Vec<String> = sections
        .lock()
        .unwrap()
        .iter()
        .filter(|(_, origin)| *origin == ChangeOrigin::Remote { version: 5 })
        .map(|(section, _)| section.clone())
        .collect();
    remote_sections.sort();
    assert_eq!(remote_sections, vec!["notes", "vehicle"]);

    world.advance_secs(5);
    assert!(a.tick().is_empty(), "discarded edits are not committed");
    assert_eq!(world.backing.version_count(), 5);
}

#[test]
fn later_local_edit_beats_older_remote() {
    let world = World::new();
    world.seed(4);
    let a = world.tab("a", ConflictPolicy::Timestamp);
    let b = world.tab("b", ConflictPolicy::Timestamp);
    let case_id = a.open_case(PLATE).unwrap();
    b.open_case(PLATE).unwrap();
    let seen = notices(&a);

    b.save(&case_id, Some(doc_km(500))).unwrap();
    world.advance_secs(2);
    a.edit(&case_id, "notes", json!("from a")).unwrap();

    assert_eq!(pump(&a), vec![Resolution::LocalKept { remote_version: 5 }]);
    assert!(matches!(
        seen.lock().unwrap().as_slice(),
        [Notice::RemoteDiscarded {
            remote_version: 5,
            ..
        }]
    ));

    let status = a.get_status(&case_id).unwrap();
    assert!(status.pending);
    assert_eq!(status.baseline_version, Some(5));

    world.advance_secs(2);
    let commits = a.tick();
    let CommitOutcome::Committed(record) = &commits[0].outcome else {
        panic!("expected a commit, got {:?}", commits[0].outcome);
    };
    assert_eq!(record.version, 6);
    assert_eq!(record.payload.section("notes"), Some(&json!("from a")));
    assert_eq!(record.payload.section("vehicle"), doc_km(4).section("vehicle"));

    assert_eq!(pump(&b), vec![Resolution::Adopted { version: 6 }]);
    assert_eq!(b.document(&case_id).unwrap(), record.payload);
}

#[test]
fn stale_marker_adopts_remote_without_asking() {
    let world = World::new();
    world.seed(4);
    let a = world.tab("a", ConflictPolicy::Manual);
    let b = world.tab("b", ConflictPolicy::Timestamp);
    let case_id = a.open_case(PLATE).unwrap();
    b.open_case(PLATE).unwrap();
    let seen = notices(&a);

    // Edited and reverted: the marker is set but nothing diverges.
    a.edit(&case_id, "notes", json!("typo")).unwrap();
    a.remove_section(&case_id, "notes").unwrap();

    world.advance_secs(1);
    b.save(&case_id, Some(doc_km(600))).unwrap();

    assert_eq!(pump(&a), vec![Resolution::Adopted { version: 5 }]);
    assert_eq!(a.document(&case_id).unwrap(), doc_km(600));
    assert!(!a.get_status(&case_id).unwrap().pending);
    assert!(seen.lock().unwrap().is_empty(), "no prompt for a stale marker");
}

#[test]
fn manual_policy_waits_for_a_decision() {
    let world = World::new();
    world.seed(4);
    let a = world.tab("a", ConflictPolicy::Manual);
    let b = world.tab("b", ConflictPolicy::Timestamp);
    let case_id = a.open_case(PLATE).unwrap();
    b.open_case(PLATE).unwrap();
    let seen = notices(&a);

    world.advance_secs(10);
    a.edit(&case_id, "notes", json!("from a")).unwrap();
    world.advance_secs(1);
    b.save(&case_id, Some(doc_km(500))).unwrap();

    assert_eq!(pump(&a), vec![Resolution::AwaitingChoice { remote_version: 5 }]);
    assert!(matches!(
        seen.lock().unwrap().as_slice(),
        [Notice::ConflictAwaitingChoice {
            local_base: Some(4),
            remote_version: 5,
            ..
        }]
    ));
    assert_eq!(
        a.document(&case_id).unwrap().section("notes"),
        Some(&json!("from a")),
        "nothing applied before the choice"
    );
    assert!(matches!(
        a.get_status(&case_id).unwrap().conflict_state,
        ConflictState::AwaitingChoice {
            local_base: Some(4),
            remote_version: 5,
            ..
        }
    ));

    assert_eq!(
        a.save(&case_id, None),
        Err(SyncError::AwaitingConflictChoice(case_id.clone()))
    );
    world.advance_secs(10);
    assert!(a.tick().is_empty(), "auto-save held while the conflict is open");

    world.channel.replay_last().unwrap();
    assert_eq!(
        pump(&a),
        vec![Resolution::Ignored {
            reason: IgnoreReason::Duplicate
        }]
    );

    let resolution = a.resolve(&case_id, ResolutionChoice::KeepLocal).unwrap();
    assert_eq!(resolution, Resolution::LocalKept { remote_version: 5 });
    assert!(matches!(
        a.resolve(&case_id, ResolutionChoice::KeepLocal),
        Err(SyncError::NoPendingConflict(_))
    ));

    world.advance_secs(2);
    let commits = a.tick();
    let CommitOutcome::Committed(record) = &commits[0].outcome else {
        panic!("expected a commit, got {:?}", commits[0].outcome);
    };
    assert_eq!(record.version, 6);
    assert_eq!(record.payload.section("notes"), Some(&json!("from a")));
    assert_eq!(pump(&b), vec![Resolution::Adopted { version: 6 }]);
}

#[test]
fn discarding_a_held_conflict_takes_the_remote() {
    let world = World::new();
    world.seed(2);
    let a = world.tab("a", ConflictPolicy::Manual);
    let b = world.tab("b", ConflictPolicy::Timestamp);
    let case_id = a.open_case(PLATE).unwrap();
    b.open_case(PLATE).unwrap();

    a.edit(&case_id, "notes", json!("from a")).unwrap();
    world.advance_secs(1);
    b.save(&case_id, Some(doc_km(77))).unwrap();
    assert_eq!(pump(&a), vec![Resolution::AwaitingChoice { remote_version: 3 }]);

    let changed = a.discard_local_edits(&case_id).unwrap();
    assert!(changed.contains(&"notes".to_string()));
    assert_eq!(a.document(&case_id).unwrap(), doc_km(77));

    let status = a.get_status(&case_id).unwrap();
    assert!(!status.pending);
    assert_eq!(status.baseline_version, Some(3));
    assert!(matches!(
        status.conflict_state,
        ConflictState::AutoResolved {
            resolution: Resolution::RemoteWon { version: 3, .. }
        }
    ));
    world.advance_secs(5);
    assert!(a.tick().is_empty());
}

#[test]
fn redelivered_version_is_ignored() {
    let world = World::new();
    world.seed(1);
    let a = world.tab("a", ConflictPolicy::Timestamp);
    let b = world.tab("b", ConflictPolicy::Timestamp);
    let case_id = a.open_case(PLATE).unwrap();
    b.open_case(PLATE).unwrap();

    b.save(&case_id, Some(doc_km(9))).unwrap();
    assert_eq!(pump(&a), vec![Resolution::Adopted { version: 2 }]);

    world.channel.replay_last().unwrap();
    assert_eq!(
        pump(&a),
        vec![Resolution::Ignored {
            reason: IgnoreReason::Duplicate
        }]
    );
    assert_eq!(a.document(&case_id).unwrap(), doc_km(9));
    assert_eq!(a.get_status(&case_id).unwrap().baseline_version, Some(2));
}

#[test]
fn version_policy_prefers_higher_numbers() {
    let world = World::new();
    let seeded = world.seed(3);
    let a = world.tab("a", ConflictPolicy::Version);
    let b = world.tab("b", ConflictPolicy::Timestamp);
    let case_id = a.open_case(PLATE).unwrap();
    b.open_case(PLATE).unwrap();

    // A local edit newer than the remote still loses to a newer version.
    b.save(&case_id, Some(doc_km(300))).unwrap();
    world.advance_secs(5);
    a.edit(&case_id, "notes", json!("from a")).unwrap();
    assert!(matches!(
        pump(&a).as_slice(),
        [Resolution::RemoteWon { version: 4, .. }]
    ));

    let late = world.channel.connect();
    late.publish(&ChangeEnvelope::from_record(&seeded[1], None))
        .unwrap();
    assert_eq!(
        pump(&a),
        vec![Resolution::Ignored {
            reason: IgnoreReason::Stale
        }]
    );
    assert_eq!(a.document(&case_id).unwrap(), doc_km(300));
}

#[test]
fn own_commits_do_not_come_back() {
    let world = World::new();
    world.seed(1);
    let a = world.tab("a", ConflictPolicy::Timestamp);
    let case_id = a.open_case(PLATE).unwrap();

    a.edit(&case_id, "notes", json!("mine")).unwrap();
    a.save(&case_id, None).unwrap();
    assert_eq!(world.channel.len(), 1);
    assert!(pump(&a).is_empty());

    let raw = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&raw);
    a.subscribe_versions(&case_id, move |env| sink.lock().unwrap().push(env.version))
        .unwrap();
    world.channel.replay_last().unwrap();
    assert!(pump(&a).is_empty());
    assert!(raw.lock().unwrap().is_empty());
}

#[test]
fn remote_versions_reach_raw_subscribers() {
    let world = World::new();
    world.seed(1);
    let a = world.tab("a", ConflictPolicy::Timestamp);
    let b = world.tab("b", ConflictPolicy::Timestamp);
    let case_id = a.open_case(PLATE).unwrap();
    b.open_case(PLATE).unwrap();

    let raw = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&raw);
    let id = a
        .subscribe_versions(&case_id, move |env| sink.lock().unwrap().push(env.version))
        .unwrap();

    b.save(&case_id, Some(doc_km(2))).unwrap();
    pump(&a);
    assert!(a.unsubscribe_versions(id));
    b.save(&case_id, Some(doc_km(3))).unwrap();
    pump(&a);

    assert_eq!(*raw.lock().unwrap(), vec![2]);
    assert_eq!(a.get_status(&case_id).unwrap().baseline_version, Some(3));
}
