use roomsync::{
    persist::{
        BACKUP_HISTORY_KEY, BACKUP_PAYLOAD_PREFIX, KvStore, NAMESPACE_PREFIX, memory::MemoryKv,
    },
    schema::integrity::{
        BackupType, DataIntegrity, ExportedData, ImportMode, IntegrityConfig, IntegrityError,
        MAX_AUTO_BACKUPS,
    },
};

fn key(name: &str) -> String {
    format!("{NAMESPACE_PREFIX}{name}")
}

fn seeded() -> MemoryKv {
    let mut kv = MemoryKv::new();
    for name in ["rooms", "reservations", "guests", "invoices", "settings"] {
        kv.set(&key(name), "[]").expect("seed");
    }
    kv.set("unrelated-app:theme", "\"dark\"").expect("seed");
    kv
}

#[test]
fn auto_backups_are_capped_and_others_kept() {
    let mut kv = seeded();
    let mut integrity = DataIntegrity::new(&mut kv);

    let manual = integrity.create_backup(BackupType::Manual).expect("manual");
    let mut autos = Vec::new();
    for _ in 0..15 {
        autos.push(integrity.create_backup(BackupType::Auto).expect("auto"));
    }

    let backups = integrity.list_backups().expect("list");
    let kept_autos: Vec<&str> = backups
        .iter()
        .filter(|b| b.backup_type == BackupType::Auto)
        .map(|b| b.id.as_str())
        .collect();
    let expected: Vec<&str> = autos[5..].iter().map(|b| b.id.as_str()).collect();
    assert_eq!(kept_autos.len(), MAX_AUTO_BACKUPS);
    assert_eq!(kept_autos, expected);
    assert!(backups.iter().any(|b| b.id == manual.id));

    drop(integrity);
    for pruned in &autos[..5] {
        let payload = kv
            .get(&format!("{BACKUP_PAYLOAD_PREFIX}{}", pruned.id))
            .expect("get");
        assert!(payload.is_none());
    }
}

#[test]
fn backup_snapshot_covers_namespace_only() {
    let mut kv = seeded();
    let backup = DataIntegrity::new(&mut kv)
        .create_backup(BackupType::Manual)
        .expect("backup");

    assert_eq!(backup.keys.len(), 5);
    assert!(backup.keys.iter().all(|k| k.starts_with(NAMESPACE_PREFIX)));
    assert!(!backup.keys.contains(&BACKUP_HISTORY_KEY.to_string()));
    assert_eq!(backup.version, "1.0.0");
    assert_eq!(backup.checksum.len(), 8);
    assert!(backup.size > 0);
}

#[test]
fn restore_replaces_namespace_but_keeps_history() {
    let mut kv = seeded();
    let mut integrity = DataIntegrity::new(&mut kv);
    let backup = integrity.create_backup(BackupType::Manual).expect("backup");
    drop(integrity);

    kv.set(&key("rooms"), r#"[{"id":101}]"#).expect("write");
    kv.set(&key("scratch"), "1").expect("write");

    let mut integrity = DataIntegrity::new(&mut kv);
    integrity.restore_backup(&backup.id).expect("restore");
    assert_eq!(integrity.list_backups().expect("list").len(), 1);
    drop(integrity);

    assert_eq!(kv.get(&key("rooms")).expect("get").as_deref(), Some("[]"));
    assert!(kv.get(&key("scratch")).expect("get").is_none());
    assert!(kv.get("unrelated-app:theme").expect("get").is_some());
}

#[test]
fn unknown_or_deleted_backups_are_reported() {
    let mut kv = seeded();
    let mut integrity = DataIntegrity::new(&mut kv);
    assert!(matches!(
        integrity.restore_backup("missing"),
        Err(IntegrityError::UnknownBackup(_))
    ));

    let backup = integrity.create_backup(BackupType::Auto).expect("backup");
    integrity.delete_backup(&backup.id).expect("delete");
    assert!(integrity.list_backups().expect("list").is_empty());
    assert!(matches!(
        integrity.delete_backup(&backup.id),
        Err(IntegrityError::UnknownBackup(_))
    ));
}

#[test]
fn verify_reports_each_missing_critical_key() {
    let mut kv = seeded();
    kv.delete(&key("guests")).expect("delete");
    kv.delete(&key("settings")).expect("delete");

    let report = DataIntegrity::new(&mut kv)
        .verify_data_integrity()
        .expect("verify");
    assert!(!report.valid);
    assert_eq!(
        report.errors,
        vec![
            format!("Missing critical data: {}", key("guests")),
            format!("Missing critical data: {}", key("settings")),
        ]
    );

    let config = IntegrityConfig {
        critical_keys: vec![key("rooms")],
    };
    let report = DataIntegrity::with_config(&mut kv, config)
        .verify_data_integrity()
        .expect("verify");
    assert!(report.valid);
    assert!(report.errors.is_empty());
}

#[test]
fn export_then_import_merge_and_overwrite() {
    let mut source = seeded();
    let exported = DataIntegrity::new(&mut source).export_data().expect("export");
    assert_eq!(exported.len(), 5);
    assert!(!exported.contains_key("unrelated-app:theme"));

    let mut target = MemoryKv::new();
    target.set(&key("local-only"), "1").expect("seed");

    let written = DataIntegrity::new(&mut target)
        .import_data(&exported, ImportMode::Merge)
        .expect("merge");
    assert_eq!(written, 5);
    assert!(target.get(&key("local-only")).expect("get").is_some());

    let mut partial = ExportedData::new();
    partial.insert(key("rooms"), r#"[{"id":7}]"#.to_string());
    partial.insert("foreign:key".to_string(), "1".to_string());
    let written = DataIntegrity::new(&mut target)
        .import_data(&partial, ImportMode::Overwrite)
        .expect("overwrite");
    assert_eq!(written, 1);

    let remaining = target.namespaced_keys().expect("keys");
    assert_eq!(remaining, vec![key("rooms")]);
    assert!(target.get("foreign:key").expect("get").is_none());
}
