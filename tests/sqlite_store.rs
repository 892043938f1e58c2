use roomsync::{
    core::queue::OfflineQueue,
    op::OperationDraft,
    persist::{KvStore, NAMESPACE_PREFIX, PersistResult, sqlite::SqliteKv},
    schema::integrity::{BackupType, DataIntegrity},
    types::{OperationType, Priority},
};
use serde_json::json;
use tempfile::tempdir;

#[test]
fn kv_roundtrip_and_namespaced_listing() {
    let mut kv = SqliteKv::open_in_memory().expect("open");
    kv.set("hotel-pms:rooms", "[]").expect("set");
    kv.set("hotel-pms:guests", "[1]").expect("set");
    kv.set("hotel-pms-backup:abc", "{}").expect("set");
    kv.set("other", "1").expect("set");

    assert_eq!(kv.get("hotel-pms:guests").expect("get").as_deref(), Some("[1]"));
    assert_eq!(kv.get("missing").expect("get"), None);
    assert!(kv.updated_at("hotel-pms:rooms").expect("ts").is_some());

    kv.set("hotel-pms:guests", "[2]").expect("overwrite");
    assert_eq!(kv.get("hotel-pms:guests").expect("get").as_deref(), Some("[2]"));

    assert_eq!(
        kv.namespaced_keys().expect("keys"),
        vec!["hotel-pms:guests", "hotel-pms:rooms"]
    );
    assert_eq!(kv.keys().expect("keys").len(), 4);

    kv.delete("hotel-pms:rooms").expect("delete");
    kv.delete("hotel-pms:rooms").expect("delete twice");
    assert_eq!(kv.namespaced_keys().expect("keys"), vec!["hotel-pms:guests"]);
}

#[test]
fn queue_survives_reopening_the_database() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("roomsync.sqlite");

    let (high, low) = {
        let kv = SqliteKv::open(&path).expect("open");
        let mut queue = OfflineQueue::open(Box::new(kv)).expect("queue");
        let low = queue
            .push_at(
                OperationDraft::new(OperationType::Create, "housekeeping", json!({ "room": 101 }))
                    .with_priority(Priority::Low),
                10,
            )
            .id
            .clone();
        let high = queue
            .push_at(
                OperationDraft::new(OperationType::Update, "room-status", json!({ "room": 101 }))
                    .with_priority(Priority::High),
                20,
            )
            .id
            .clone();
        queue.mark_synced(&low);
        queue.set_last_sync(30);
        queue.persist().expect("persist");
        (high, low)
    };

    let kv = SqliteKv::open(&path).expect("reopen");
    let queue = OfflineQueue::open(Box::new(kv)).expect("queue");
    let status = queue.status();
    assert_eq!(status.pending, 1);
    assert_eq!(status.synced, 1);
    assert_eq!(status.last_sync, Some(30));
    assert!(queue.get(&low).expect("low").synced);
    assert_eq!(queue.pending_in_replay_order()[0].id, high);
}

#[test]
fn backups_round_trip_through_sqlite() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("backups.sqlite");
    let rooms = format!("{NAMESPACE_PREFIX}rooms");

    let backup_id = {
        let mut kv = SqliteKv::open(&path).expect("open");
        kv.set(&rooms, r#"[{"id":101}]"#).expect("seed");
        let backup = DataIntegrity::new(&mut kv)
            .create_backup(BackupType::Manual)
            .expect("backup");
        kv.set(&rooms, "[]").expect("overwrite");
        backup.id
    };

    let mut kv = SqliteKv::open(&path).expect("reopen");
    DataIntegrity::new(&mut kv)
        .restore_backup(&backup_id)
        .expect("restore");
    assert_eq!(kv.get(&rooms).expect("get").as_deref(), Some(r#"[{"id":101}]"#));
}

struct IndexedKv;

impl KvStore for IndexedKv {
    fn get(&self, _key: &str) -> PersistResult<Option<String>> {
        Ok(None)
    }

    fn set(&mut self, _key: &str, _value: &str) -> PersistResult<()> {
        Ok(())
    }

    fn delete(&mut self, _key: &str) -> PersistResult<()> {
        Ok(())
    }

    fn keys(&self) -> PersistResult<Vec<String>> {
        Ok(Vec::new())
    }

    fn namespaced_keys(&self) -> PersistResult<Vec<String>> {
        Ok(vec![format!("{NAMESPACE_PREFIX}from-index")])
    }
}

fn namespaced<S: KvStore>(store: &S) -> Vec<String> {
    store.namespaced_keys().expect("keys")
}

#[test]
fn boxed_stores_use_their_own_namespaced_listing() {
    let boxed: Box<IndexedKv> = Box::new(IndexedKv);
    assert_eq!(namespaced(&boxed), vec![format!("{NAMESPACE_PREFIX}from-index")]);

    let as_dyn: Box<dyn KvStore> = Box::new(IndexedKv);
    assert_eq!(namespaced(&as_dyn), vec![format!("{NAMESPACE_PREFIX}from-index")]);

    let mut sqlite: Box<dyn KvStore> = Box::new(SqliteKv::open_in_memory().expect("open"));
    sqlite.set("hotel-pms:rooms", "[]").expect("set");
    sqlite.set("hotel-pmsx:rooms", "[]").expect("set");
    assert_eq!(namespaced(&sqlite), vec!["hotel-pms:rooms"]);
}
