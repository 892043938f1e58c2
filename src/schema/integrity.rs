//! Backup snapshots, critical-key checks, and whole-namespace import/export.
//!
//! Backup checksums fingerprint the sorted key list plus the backup timestamp.
//! They are bookkeeping only: two backups of identical content get different
//! checksums, and content changes that keep the key set are invisible.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    persist::{
        BACKUP_HISTORY_KEY, BACKUP_PAYLOAD_PREFIX, KvStore, NAMESPACE_PREFIX, PersistError,
        load_document, store_document,
    },
    types::{TimestampMs, new_id, now_ms},
};

use super::{
    fingerprint,
    version::{BASELINE_VERSION, VersionControl},
};

/// Auto backups kept; older ones are pruned.
pub const MAX_AUTO_BACKUPS: usize = 10;

/// Raw namespaced entries, key to stored JSON text.
pub type ExportedData = BTreeMap<String, String>;

/// Errors raised by [`DataIntegrity`].
#[derive(Debug, Error)]
pub enum IntegrityError {
    /// Store access failed.
    #[error("integrity store access failed: {0}")]
    Persist(#[from] PersistError),
    /// No backup record has this id.
    #[error("unknown backup {0}")]
    UnknownBackup(String),
    /// The record exists but its payload is gone.
    #[error("backup {0} has no stored payload")]
    MissingPayload(String),
}

/// Why a backup was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackupType {
    /// User requested; kept forever.
    Manual,
    /// Periodic; capped at [`MAX_AUTO_BACKUPS`].
    Auto,
    /// Taken before migrations; kept forever.
    PreMigration,
}

/// Backup metadata record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataBackup {
    /// Backup id.
    pub id: String,
    /// Creation time.
    pub timestamp: TimestampMs,
    /// Schema version current at creation.
    pub version: String,
    /// Snapshotted keys, sorted.
    pub keys: Vec<String>,
    /// Payload size in bytes.
    pub size: usize,
    /// Fingerprint of keys plus timestamp.
    pub checksum: String,
    /// Backup kind.
    #[serde(rename = "type")]
    pub backup_type: BackupType,
}

/// Outcome of [`DataIntegrity::verify_data_integrity`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityReport {
    /// True when no error was found.
    pub valid: bool,
    /// One message per problem.
    pub errors: Vec<String>,
}

/// How [`DataIntegrity::import_data`] treats existing keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportMode {
    /// Write imported keys, keep the rest.
    Merge,
    /// Delete every namespaced key first.
    Overwrite,
}

/// Keys whose absence makes the local store unusable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegrityConfig {
    /// Full keys, including the namespace prefix.
    pub critical_keys: Vec<String>,
}

impl Default for IntegrityConfig {
    fn default() -> Self {
        let critical_keys = ["rooms", "reservations", "guests", "invoices", "settings"]
            .iter()
            .map(|k| format!("{NAMESPACE_PREFIX}{k}"))
            .collect();
        Self { critical_keys }
    }
}

/// Backup store and integrity checks over the application namespace.
pub struct DataIntegrity<'a> {
    kv: &'a mut dyn KvStore,
    config: IntegrityConfig,
}

impl<'a> DataIntegrity<'a> {
    /// Uses the default critical keys.
    pub fn new(kv: &'a mut dyn KvStore) -> Self {
        Self::with_config(kv, IntegrityConfig::default())
    }

    /// Uses `config` for critical keys.
    pub fn with_config(kv: &'a mut dyn KvStore, config: IntegrityConfig) -> Self {
        Self { kv, config }
    }

    /// Snapshots every namespaced key and records the backup.
    ///
    /// Auto backups beyond [`MAX_AUTO_BACKUPS`] are pruned afterwards, oldest
    /// first; other kinds are never pruned.
    pub fn create_backup(&mut self, backup_type: BackupType) -> Result<DataBackup, IntegrityError> {
        let data = self.snapshot()?;
        let keys: Vec<String> = data.keys().cloned().collect();
        let payload = serde_json::to_string(&data).map_err(PersistError::from)?;
        let timestamp = now_ms();

        let version = VersionControl::new(&mut *self.kv)
            .current_version()?
            .unwrap_or_else(|| BASELINE_VERSION.to_string());

        let backup = DataBackup {
            id: new_id(),
            timestamp,
            version,
            checksum: backup_checksum(&keys, timestamp),
            keys,
            size: payload.len(),
            backup_type,
        };

        self.kv
            .set(&payload_key(&backup.id), &payload)?;
        let mut history = self.list_backups()?;
        history.push(backup.clone());

        for pruned in prune_auto_backups(&mut history) {
            self.kv.delete(&payload_key(&pruned.id))?;
            info!(id = %pruned.id, "pruned auto backup");
        }
        store_document(&mut *self.kv, BACKUP_HISTORY_KEY, &history)?;

        info!(id = %backup.id, kind = ?backup_type, keys = backup.keys.len(), size = backup.size, "backup created");
        Ok(backup)
    }

    /// Every backup record, oldest first.
    pub fn list_backups(&self) -> Result<Vec<DataBackup>, IntegrityError> {
        let history: Option<Vec<DataBackup>> = load_document(&*self.kv, BACKUP_HISTORY_KEY)?;
        Ok(history.unwrap_or_default())
    }

    /// Replaces the namespace with the snapshot of backup `id`.
    ///
    /// The backup history itself is left untouched.
    pub fn restore_backup(&mut self, id: &str) -> Result<DataBackup, IntegrityError> {
        let backup = self
            .list_backups()?
            .into_iter()
            .find(|b| b.id == id)
            .ok_or_else(|| IntegrityError::UnknownBackup(id.to_string()))?;
        let data: ExportedData = load_document(&*self.kv, &payload_key(id))?
            .ok_or_else(|| IntegrityError::MissingPayload(id.to_string()))?;

        for key in self.kv.namespaced_keys()? {
            if key != BACKUP_HISTORY_KEY {
                self.kv.delete(&key)?;
            }
        }
        for (key, value) in &data {
            self.kv.set(key, value)?;
        }
        info!(id, keys = data.len(), "backup restored");
        Ok(backup)
    }

    /// Removes backup `id` and its payload.
    pub fn delete_backup(&mut self, id: &str) -> Result<(), IntegrityError> {
        let mut history = self.list_backups()?;
        let before = history.len();
        history.retain(|b| b.id != id);
        if history.len() == before {
            return Err(IntegrityError::UnknownBackup(id.to_string()));
        }
        self.kv.delete(&payload_key(id))?;
        store_document(&mut *self.kv, BACKUP_HISTORY_KEY, &history)?;
        Ok(())
    }

    /// Checks that every critical key is present. Content is not validated.
    pub fn verify_data_integrity(&self) -> Result<IntegrityReport, IntegrityError> {
        let mut errors = Vec::new();
        for key in &self.config.critical_keys {
            if self.kv.get(key)?.is_none() {
                errors.push(format!("Missing critical data: {key}"));
            }
        }
        if !errors.is_empty() {
            warn!(missing = errors.len(), "integrity check failed");
        }
        Ok(IntegrityReport {
            valid: errors.is_empty(),
            errors,
        })
    }

    /// Reads every namespaced key.
    pub fn export_data(&self) -> Result<ExportedData, IntegrityError> {
        let mut out = ExportedData::new();
        for key in self.kv.namespaced_keys()? {
            if let Some(value) = self.kv.get(&key)? {
                out.insert(key, value);
            }
        }
        Ok(out)
    }

    /// Writes `data` into the namespace. Keys outside it are skipped.
    ///
    /// Returns how many keys were written.
    pub fn import_data(&mut self, data: &ExportedData, mode: ImportMode) -> Result<usize, IntegrityError> {
        if mode == ImportMode::Overwrite {
            for key in self.kv.namespaced_keys()? {
                self.kv.delete(&key)?;
            }
        }

        let mut written = 0;
        for (key, value) in data {
            if !key.starts_with(NAMESPACE_PREFIX) {
                warn!(key = %key, "skipping import of key outside namespace");
                continue;
            }
            self.kv.set(key, value)?;
            written += 1;
        }
        info!(written, ?mode, "data imported");
        Ok(written)
    }

    fn snapshot(&self) -> Result<ExportedData, IntegrityError> {
        let mut data = self.export_data()?;
        data.remove(BACKUP_HISTORY_KEY);
        Ok(data)
    }
}

fn payload_key(id: &str) -> String {
    format!("{BACKUP_PAYLOAD_PREFIX}{id}")
}

fn backup_checksum(keys: &[String], timestamp: TimestampMs) -> String {
    let mut sorted = keys.to_vec();
    sorted.sort();
    fingerprint(&format!("{}{timestamp}", sorted.join(",")))
}

/// Drops the oldest auto backups so at most [`MAX_AUTO_BACKUPS`] remain.
fn prune_auto_backups(history: &mut Vec<DataBackup>) -> Vec<DataBackup> {
    let autos = history
        .iter()
        .filter(|b| b.backup_type == BackupType::Auto)
        .count();
    let mut excess = autos.saturating_sub(MAX_AUTO_BACKUPS);
    if excess == 0 {
        return Vec::new();
    }

    let mut pruned = Vec::new();
    history.retain(|b| {
        if excess > 0 && b.backup_type == BackupType::Auto {
            excess -= 1;
            pruned.push(b.clone());
            false
        } else {
            true
        }
    });
    pruned
}
