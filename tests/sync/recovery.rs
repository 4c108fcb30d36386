use std::sync::{Arc, Mutex};

use case_sync::{
    ActorId, CaseId, ChangeOrigin, ConflictPolicy, Notice, Resolution, SyncError, VersionId,
    VersionSource,
};
use serde_json::json;

use crate::support::{doc_km, notices, World, PLATE};

#[test]
fn restore_commits_a_copy_as_the_next_version() {
    let world = World::new();
    let seeded = world.seed(4);
    let a = world.tab("a", ConflictPolicy::Timestamp);
    let b = world.tab("b", ConflictPolicy::Timestamp);
    let case_id = a.open_case(PLATE).unwrap();
    b.open_case(PLATE).unwrap();
    let seen = notices(&a);

    let origins = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&origins);
    a.on_change(&case_id, "vehicle", move |c| sink.lock().unwrap().push(c.origin));

    a.edit(&case_id, "notes", json!("unsaved")).unwrap();

    let preview = a.preview(&seeded[1].id).unwrap();
    assert_eq!(preview.version, 2);
    assert_eq!(preview.payload, doc_km(2));
    assert_eq!(
        a.document(&case_id).unwrap().section("notes"),
        Some(&json!("unsaved")),
        "preview changes nothing"
    );

    world.advance_secs(30);
    let restored = a.restore(&case_id, &seeded[1].id).unwrap();
    assert_eq!(restored.version, 5);
    assert_eq!(restored.payload, doc_km(2));
    assert_eq!(restored.source, VersionSource::UserRestore);
    assert_eq!(restored.restored_from, Some(2));
    assert_eq!(restored.created_by, Some(ActorId::new("a")));
    assert!(restored.is_current);

    let history = a.get_history(&case_id).unwrap();
    assert_eq!(history.len(), 5);
    assert_eq!(history[0].version, 5);
    assert!(history[0].is_current);
    assert!(!history[3].is_current, "the restored-from version stays old");

    assert_eq!(a.document(&case_id).unwrap(), doc_km(2));
    let status = a.get_status(&case_id).unwrap();
    assert!(!status.pending);
    assert_eq!(status.baseline_version, Some(5));

    assert_eq!(
        *origins.lock().unwrap(),
        vec![ChangeOrigin::Restore { version: 5 }]
    );
    assert!(matches!(
        seen.lock().unwrap().as_slice(),
        [Notice::LocalEditsDiscarded {
            remote_version: 5,
            ..
        }]
    ));

    world.advance_secs(5);
    assert!(a.tick().is_empty(), "restore leaves nothing to auto-save");

    let handled = b.pump(std::time::Duration::ZERO).unwrap();
    assert_eq!(handled, vec![(case_id.clone(), Resolution::Adopted { version: 5 })]);
    assert_eq!(b.document(&case_id).unwrap(), doc_km(2));
}

#[test]
fn unknown_versions_are_reported() {
    let world = World::new();
    world.seed(1);
    let other = CaseId::new("999-99-999").unwrap();
    let foreign = world
        .store()
        .commit(&other, &doc_km(1), None, VersionSource::System)
        .unwrap();

    let a = world.tab("a", ConflictPolicy::Timestamp);
    let case_id = a.open_case(PLATE).unwrap();

    let missing = VersionId::generate();
    assert_eq!(a.preview(&missing), Err(SyncError::VersionNotFound(missing)));
    assert_eq!(
        a.restore(&case_id, &missing),
        Err(SyncError::VersionNotFound(missing))
    );
    assert_eq!(
        a.restore(&case_id, &foreign.id),
        Err(SyncError::VersionNotFound(foreign.id))
    );
    assert_eq!(a.get_history(&case_id).unwrap().len(), 1);
}

#[test]
fn version_list_describes_each_entry() {
    let world = World::new();
    let seeded = world.seed(3);
    let a = world.tab("a", ConflictPolicy::Timestamp);
    let case_id = a.open_case(PLATE).unwrap();
    a.restore(&case_id, &seeded[0].id).unwrap();

    let entries = a.list_versions(&case_id).unwrap();
    let labels: Vec<&str> = entries.iter().map(|e| e.description.as_str()).collect();
    assert_eq!(
        labels,
        vec![
            "Restored - Just now (from v1) (Current)",
            "Auto-save - Just now",
            "Auto-save - 1 minute ago",
            "Auto-save - 2 minutes ago",
        ]
    );

    let row = serde_json::to_value(&entries[0]).unwrap();
    assert_eq!(row["version"], json!(4));
    assert_eq!(row["source"], json!("user_restore"));
    assert_eq!(row["description"], json!(labels[0]));
}

#[test]
fn export_includes_audit_header_and_document() {
    let world = World::new();
    let seeded = world.seed(2);
    let a = world.tab("a", ConflictPolicy::Timestamp);
    let case_id = a.open_case(PLATE).unwrap();
    let restored = a.restore(&case_id, &seeded[0].id).unwrap();

    let text = a.export_text(&restored.id).unwrap();
    assert!(text.starts_with("Case: 123-45-678\n"));
    assert!(text.contains("Version: 3 (123-45-678_helper_v3)"));
    assert!(text.contains("Source: Restored"));
    assert!(text.contains("Created by: a"));
    assert!(text.contains("Restored from: v1"));
    assert!(text.contains("Current: yes"));
    assert!(text.contains("\"plate\": \"123-45-678\""));

    let old = a.export_text(&seeded[0].id).unwrap();
    assert!(!old.contains("Current: yes"));
    assert!(!old.contains("Created by"));
}
