use roomsync::{
    core::conflict::{
        ConflictError, ConflictMetadata, ConflictStatus, ConflictTracker, ConflictVersion,
        FieldDiff, ResolutionStrategy, create_conflict, detect_conflict, get_conflict_diff,
        merge_values, resolve_conflict,
    },
    runtime::broadcast::{BroadcastHub, BroadcastSync},
};
use serde_json::{Value, json};

fn meta(key: &str, tab: &str, timestamp: u64) -> ConflictMetadata {
    ConflictMetadata {
        conflict_id: format!("{tab}-{timestamp}"),
        key: key.to_string(),
        timestamp,
        tab_id: tab.to_string(),
        user_id: None,
    }
}

fn version(value: Value, tab: &str, timestamp: u64) -> ConflictVersion<Value> {
    ConflictVersion {
        value,
        metadata: meta("room-101", tab, timestamp),
        version: 1,
    }
}

#[test]
fn writes_outside_the_window_never_conflict() {
    let a = json!({ "status": "clean" });
    let b = json!({ "status": "dirty" });
    assert!(detect_conflict(&a, &meta("k", "t1", 0), &b, &meta("k", "t2", 5000)));
    assert!(!detect_conflict(&a, &meta("k", "t1", 0), &b, &meta("k", "t2", 5001)));
    assert!(!detect_conflict(&a, &meta("k", "t1", 9000), &b, &meta("k", "t2", 1000)));
}

#[test]
fn equal_values_never_conflict_regardless_of_key_order() {
    let a: Value = serde_json::from_str(r#"{"a":1,"b":2}"#).expect("json");
    let b: Value = serde_json::from_str(r#"{"b":2,"a":1}"#).expect("json");
    assert!(!detect_conflict(&a, &meta("k", "t1", 10), &b, &meta("k", "t2", 11)));
}

#[test]
fn last_write_wins_prefers_newer_and_local_on_tie() {
    let newer_remote = create_conflict(
        "room-101",
        version(json!("local"), "t1", 100),
        version(json!("remote"), "t2", 200),
    );
    let value = resolve_conflict(&newer_remote, ResolutionStrategy::LastWriteWins, None)
        .expect("resolve");
    assert_eq!(value, json!("remote"));

    let tie = create_conflict(
        "room-101",
        version(json!("local"), "t1", 100),
        version(json!("remote"), "t2", 100),
    );
    assert_eq!(
        resolve_conflict(&tie, ResolutionStrategy::LastWriteWins, None).expect("resolve"),
        json!("local")
    );
    assert_eq!(
        resolve_conflict(&tie, ResolutionStrategy::FirstWriteWins, None).expect("resolve"),
        json!("local")
    );
}

#[test]
fn first_write_wins_prefers_older() {
    let conflict = create_conflict(
        "room-101",
        version(json!("local"), "t1", 100),
        version(json!("remote"), "t2", 50),
    );
    let value = resolve_conflict(&conflict, ResolutionStrategy::FirstWriteWins, None)
        .expect("resolve");
    assert_eq!(value, json!("remote"));
}

#[test]
fn manual_resolution_requires_a_value() {
    let conflict = create_conflict(
        "room-101",
        version(json!(1), "t1", 1),
        version(json!(2), "t2", 2),
    );
    let err = resolve_conflict(&conflict, ResolutionStrategy::Manual, None)
        .expect_err("missing value");
    assert!(matches!(err, ConflictError::MissingResolution));

    let value = resolve_conflict(&conflict, ResolutionStrategy::Manual, Some(json!(3)))
        .expect("resolve");
    assert_eq!(value, json!(3));
}

#[test]
fn merge_unions_arrays_by_id() {
    let local = json!([{ "id": 1 }, { "id": 2, "side": "local" }]);
    let remote = json!([{ "id": 2, "side": "remote" }, { "id": 3 }]);
    assert_eq!(
        merge_values(&local, &remote),
        json!([{ "id": 1 }, { "id": 2, "side": "local" }, { "id": 3 }])
    );
}

#[test]
fn merge_overlays_local_fields_on_remote() {
    let local = json!({ "status": "clean", "floor": 2 });
    let remote = json!({ "status": "dirty", "notes": "late checkout" });
    assert_eq!(
        merge_values(&local, &remote),
        json!({ "status": "clean", "floor": 2, "notes": "late checkout" })
    );
}

#[test]
fn merge_of_mismatched_shapes_keeps_local() {
    assert_eq!(merge_values(&json!([1, 2]), &json!({ "a": 1 })), json!([1, 2]));
    assert_eq!(merge_values(&json!("x"), &json!("y")), json!("x"));
}

#[test]
fn diff_lists_changed_added_and_removed_fields() {
    let local = json!({ "status": "clean", "floor": 2, "vip": true });
    let remote = json!({ "status": "dirty", "floor": 2, "notes": "x" });

    let diff = get_conflict_diff(&local, &remote).expect("diff");
    assert_eq!(
        diff,
        vec![
            FieldDiff {
                field: "notes".to_string(),
                local: None,
                remote: Some(json!("x")),
            },
            FieldDiff {
                field: "status".to_string(),
                local: Some(json!("clean")),
                remote: Some(json!("dirty")),
            },
            FieldDiff {
                field: "vip".to_string(),
                local: Some(json!(true)),
                remote: None,
            },
        ]
    );
}

#[test]
fn diff_of_scalars_is_a_single_value_entry() {
    let diff = get_conflict_diff(&json!(1), &json!(2)).expect("diff");
    assert_eq!(diff.len(), 1);
    assert_eq!(diff[0].field, "value");
    assert!(get_conflict_diff(&json!(1), &json!(1)).expect("diff").is_empty());
}

#[test]
fn tracker_raises_and_settles_conflicts() {
    let mut tracker: ConflictTracker<Value> = ConflictTracker::new("front-desk");
    tracker.record_local("room-101", json!({ "status": "clean" }), 1000);
    let second = tracker.record_local("room-101", json!({ "status": "inspected" }), 1500);
    assert_eq!(second.version, 2);

    let remote = version(json!({ "status": "dirty" }), "housekeeping", 2000);
    let id = tracker
        .observe_remote(remote)
        .expect("conflict raised")
        .id
        .clone();
    assert_eq!(tracker.pending().len(), 1);

    let value = tracker
        .resolve(&id, ResolutionStrategy::LastWriteWins, None)
        .expect("resolve");
    assert_eq!(value, json!({ "status": "dirty" }));
    assert_eq!(tracker.local("room-101").expect("local").value, value);
    assert!(tracker.pending().is_empty());
    assert_eq!(tracker.conflicts()[0].status, ConflictStatus::Resolved);
    assert_eq!(
        tracker.conflicts()[0].strategy,
        Some(ResolutionStrategy::LastWriteWins)
    );

    let again = tracker.resolve(&id, ResolutionStrategy::Merge, None);
    assert!(matches!(again, Err(ConflictError::NotPending { .. })));
    assert!(matches!(tracker.ignore(&id), Err(ConflictError::NotPending { .. })));
    assert!(matches!(tracker.ignore("nope"), Err(ConflictError::UnknownConflict(_))));

    assert_eq!(tracker.discard_settled(), 1);
    assert!(tracker.conflicts().is_empty());
}

#[test]
fn tracker_ignores_own_writes_and_unknown_keys() {
    let mut tracker: ConflictTracker<Value> = ConflictTracker::new("front-desk");
    tracker.record_local("room-101", json!(1), 1000);

    assert!(tracker.observe_remote(version(json!(2), "front-desk", 1001)).is_none());

    let mut other_key = version(json!(2), "housekeeping", 1001);
    other_key.metadata.key = "room-202".to_string();
    assert!(tracker.observe_remote(other_key).is_none());
}

#[test]
fn tabs_sharing_a_hub_detect_each_others_writes() {
    let hub = BroadcastHub::new("hotel-pms-sync");
    let mut front = BroadcastSync::new(hub.open_tab_with_id("front-desk"));
    let mut housekeeping = BroadcastSync::new(hub.open_tab_with_id("housekeeping"));

    front.announce_at("room-101", json!({ "status": "occupied" }), 10_000);
    housekeeping.announce_at("room-101", json!({ "status": "cleaning" }), 11_000);

    let raised = front.drain();
    assert_eq!(raised.len(), 1);
    assert_eq!(raised[0].local_version.metadata.tab_id, "front-desk");
    assert_eq!(raised[0].remote_version.metadata.tab_id, "housekeeping");

    let raised = housekeeping.drain();
    assert_eq!(raised.len(), 1);
    assert_eq!(housekeeping.tracker().pending().len(), 1);

    let id = raised[0].id.clone();
    let merged = housekeeping
        .tracker_mut()
        .resolve(&id, ResolutionStrategy::Merge, None)
        .expect("merge");
    assert_eq!(merged, json!({ "status": "cleaning" }));
}
