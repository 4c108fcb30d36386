use std::time::Duration;

use case_sync::{
    ActorId, CaseId, CaseStatus, CommitOutcome, CommitTrigger, ConflictPolicy, Notice, Phase, SyncError,
};
use serde_json::json;

use crate::support::{doc_km, notices, World, PLATE};

fn committed_version(outcome: &CommitOutcome) -> u64 {
    match outcome {
        CommitOutcome::Committed(record) => record.version,
        other => panic!("expected a commit, got {other:?}"),
    }
}

#[test]
fn debounce_collapses_a_burst_into_one_version() {
    let world = World::new();
    world.seed(1);
    let tab = world.tab("a", ConflictPolicy::Timestamp);
    let case_id = tab.open_case(PLATE).unwrap();

    for note in ["a", "ab", "abc"] {
        assert!(tab.edit(&case_id, "notes", json!(note)).unwrap());
        world.advance_secs(1);
    }
    assert!(tab.tick().is_empty(), "still inside the quiet period");

    world.advance_secs(1);
    let commits = tab.tick();
    assert_eq!(commits.len(), 1);
    assert_eq!(commits[0].trigger, CommitTrigger::Debounce);
    assert_eq!(committed_version(&commits[0].outcome), 2);

    assert_eq!(world.backing.version_count(), 2);
    let current = world.store().get_current(&case_id).unwrap().unwrap();
    assert_eq!(current.payload.section("notes"), Some(&json!("abc")));
    assert_eq!(current.created_by.as_ref().map(|a| a.as_str()), Some("a"));

    let status = tab.get_status(&case_id).unwrap();
    assert!(!status.pending);
    assert_eq!(status.phase, Phase::Idle);
    assert_eq!(status.baseline_version, Some(2));
    assert_eq!(status.last_committed_at, Some(current.created_at));
}

#[test]
fn periodic_check_without_changes_writes_nothing() {
    let world = World::new();
    world.seed(1);
    let config = world
        .config(ConflictPolicy::Timestamp)
        .with_periodic_check(Duration::from_secs(60));
    let tab = world.tab_with("a", config);
    let case_id = tab.open_case(PLATE).unwrap();

    world.advance_secs(61);
    let commits = tab.tick();
    assert_eq!(commits.len(), 1);
    assert_eq!(commits[0].trigger, CommitTrigger::Periodic);
    assert_eq!(commits[0].outcome, CommitOutcome::Unchanged);
    assert!(tab.tick().is_empty(), "periodic deadline moved forward");

    world.advance_secs(60);
    assert_eq!(tab.tick().len(), 1);
    assert_eq!(world.backing.version_count(), 1);
    assert_eq!(tab.get_status(&case_id).unwrap().phase, Phase::Idle);
}

#[test]
fn edits_that_cancel_out_do_not_churn_versions() {
    let world = World::new();
    world.seed(1);
    let tab = world.tab("a", ConflictPolicy::Timestamp);
    let case_id = tab.open_case(PLATE).unwrap();

    let vehicle = json!({"plate": PLATE, "km": 1});
    assert!(!tab.edit(&case_id, "vehicle", vehicle).unwrap(), "same value");
    assert_eq!(tab.get_status(&case_id).unwrap().phase, Phase::Idle);

    tab.edit(&case_id, "notes", json!("typo")).unwrap();
    tab.remove_section(&case_id, "notes").unwrap();
    world.advance_secs(2);

    let commits = tab.tick();
    assert_eq!(commits.len(), 1);
    assert_eq!(commits[0].outcome, CommitOutcome::Unchanged);
    assert_eq!(world.backing.version_count(), 1);
    assert!(!tab.get_status(&case_id).unwrap().pending);
}

#[test]
fn failed_commits_back_off_and_recover() {
    let world = World::new();
    world.seed(1);
    let tab = world.tab("a", ConflictPolicy::Timestamp);
    let case_id = tab.open_case(PLATE).unwrap();
    let seen = notices(&tab);

    world.backing.fail_next_commits(2);
    tab.edit(&case_id, "notes", json!("offline edit")).unwrap();
    world.advance_secs(2);

    let first = tab.tick();
    assert!(matches!(
        first[0].outcome,
        CommitOutcome::Failed { retry_at: Some(_), .. }
    ));
    let status = tab.get_status(&case_id).unwrap();
    assert!(status.pending, "edits kept across the failure");
    assert_eq!(status.retry_attempts, 1);
    assert!(status.last_error.is_some());

    world.advance_secs(1);
    let second = tab.tick();
    assert_eq!(second[0].trigger, CommitTrigger::Retry);
    assert!(matches!(second[0].outcome, CommitOutcome::Failed { .. }));

    world.advance_secs(1);
    assert!(tab.tick().is_empty(), "second backoff is two seconds");
    world.advance_secs(1);
    let third = tab.tick();
    assert_eq!(third[0].trigger, CommitTrigger::Retry);
    assert_eq!(committed_version(&third[0].outcome), 2);

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 3);
    assert!(matches!(seen[0], Notice::CommitFailed { attempt: 1, .. }));
    assert!(matches!(seen[1], Notice::CommitFailed { attempt: 2, .. }));
    assert!(matches!(
        seen[2],
        Notice::CommitRecovered {
            version: 2,
            attempts: 3,
            ..
        }
    ));

    let status = tab.get_status(&case_id).unwrap();
    assert_eq!(status.retry_attempts, 0);
    assert_eq!(status.last_error, None);
    assert!(!status.pending);
}

#[test]
fn timed_out_commit_is_retried() {
    let world = World::new();
    world.seed(1);
    let tab = world.tab("a", ConflictPolicy::Timestamp);
    let case_id = tab.open_case(PLATE).unwrap();

    world.backing.time_out_next_commits(1);
    let outcome = tab.save(&case_id, Some(doc_km(50))).unwrap();
    assert!(matches!(outcome, CommitOutcome::Failed { retry_at: Some(_), .. }));
    assert_eq!(world.backing.version_count(), 1);

    world.advance_secs(1);
    let commits = tab.tick();
    assert_eq!(committed_version(&commits[0].outcome), 2);
    assert_eq!(
        world.store().get_current(&case_id).unwrap().unwrap().payload,
        doc_km(50)
    );
}

#[test]
fn manual_save_skips_the_debounce() {
    let world = World::new();
    world.seed(1);
    let tab = world.tab("a", ConflictPolicy::Timestamp);
    let case_id = tab.open_case(PLATE).unwrap();

    tab.edit(&case_id, "notes", json!("now")).unwrap();
    let outcome = tab.save(&case_id, None).unwrap();
    assert_eq!(committed_version(&outcome), 2);

    world.advance_secs(5);
    assert!(tab.tick().is_empty(), "debounce cleared by the manual save");
    assert_eq!(tab.save(&case_id, None).unwrap(), CommitOutcome::Unchanged);
    assert_eq!(world.backing.version_count(), 2);
}

#[test]
fn save_as_records_the_given_actor() {
    let world = World::new();
    world.seed(1);
    let tab = world.tab("a", ConflictPolicy::Timestamp);
    let case_id = tab.open_case(PLATE).unwrap();

    let reviewer = ActorId::new("reviewer");
    let outcome = tab
        .save_as(&case_id, Some(doc_km(300)), Some(&reviewer))
        .unwrap();
    let CommitOutcome::Committed(record) = outcome else {
        panic!("expected a commit, got {outcome:?}");
    };
    assert_eq!(record.created_by, Some(reviewer));

    tab.edit(&case_id, "notes", json!("own")).unwrap();
    let CommitOutcome::Committed(record) = tab.save(&case_id, None).unwrap() else {
        panic!("expected a commit");
    };
    assert_eq!(record.created_by, Some(ActorId::new("a")));
}

#[test]
fn oversized_payload_is_rejected_without_a_version() {
    let world = World::new();
    world.seed(1);
    let config = world
        .config(ConflictPolicy::Timestamp)
        .with_max_payload_bytes(200);
    let tab = world.tab_with("a", config);
    let case_id = tab.open_case(PLATE).unwrap();
    let seen = notices(&tab);

    let err = tab
        .replace_document(&case_id, crate::support::doc(json!({"notes": "x".repeat(300)})))
        .unwrap_err();
    assert!(matches!(err, SyncError::MalformedPayload(_)));

    tab.edit(&case_id, "notes", json!("y".repeat(300))).unwrap();
    let outcome = tab.save(&case_id, None).unwrap();
    assert!(matches!(
        outcome,
        CommitOutcome::Failed {
            error: SyncError::MalformedPayload(_),
            retry_at: None,
        }
    ));
    assert_eq!(world.backing.version_count(), 1);
    assert!(matches!(
        seen.lock().unwrap().last(),
        Some(Notice::CommitRejected { .. })
    ));
}

#[test]
fn closed_case_keeps_edits_but_refuses_commits() {
    let world = World::new();
    world.seed(1);
    let tab = world.tab("a", ConflictPolicy::Timestamp);
    let case_id = tab.open_case(PLATE).unwrap();
    tab.transition_case(&case_id, CaseStatus::Closed).unwrap();

    tab.edit(&case_id, "notes", json!("too late")).unwrap();
    let outcome = tab.save(&case_id, None).unwrap();
    assert!(matches!(
        outcome,
        CommitOutcome::Failed {
            error: SyncError::CaseClosed { .. },
            retry_at: None,
        }
    ));
    assert!(tab.get_status(&case_id).unwrap().pending);
    assert_eq!(world.backing.version_count(), 1);
}

#[test]
fn editing_a_case_that_is_not_open_fails() {
    let world = World::new();
    let tab = world.tab("a", ConflictPolicy::Timestamp);
    let other = CaseId::new("999-99-999").unwrap();
    assert!(matches!(
        tab.edit(&other, "notes", json!("x")),
        Err(SyncError::CaseNotOpen(_))
    ));
}
