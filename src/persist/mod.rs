//! Key-value persistence abstraction shared by every manager.

/// Process-local store, shareable between tabs.
pub mod memory;
/// SQLite-backed durable store.
pub mod sqlite;

use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

/// Prefix of every key owned by the application.
pub const NAMESPACE_PREFIX: &str = "hotel-pms:";
/// Offline operation queue document.
pub const QUEUE_KEY: &str = "hotel-pms:offline-queue";
/// Sync bookkeeping document (`lastSync`).
pub const SYNC_STATUS_KEY: &str = "hotel-pms:sync-status";
/// Applied migration log.
pub const MIGRATIONS_KEY: &str = "hotel-pms:migrations";
/// System version history.
pub const VERSION_HISTORY_KEY: &str = "hotel-pms:version-history";
/// Backup metadata list.
pub const BACKUP_HISTORY_KEY: &str = "hotel-pms:backup-history";
/// Prefix for backup payloads. Deliberately outside [`NAMESPACE_PREFIX`].
pub const BACKUP_PAYLOAD_PREFIX: &str = "hotel-pms-backup:";

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("storage quota exceeded writing {key}")]
    QuotaExceeded { key: String },
    #[error("{0}")]
    Message(String),
}

pub type PersistResult<T> = Result<T, PersistError>;

/// Minimal key-value interface required from the environment.
///
/// Values are JSON text. Every write replaces the whole value.
pub trait KvStore: Send {
    /// Reads `key`, `None` when absent.
    fn get(&self, key: &str) -> PersistResult<Option<String>>;
    /// Writes `value` under `key`.
    fn set(&mut self, key: &str, value: &str) -> PersistResult<()>;
    /// Removes `key`; absent keys are not an error.
    fn delete(&mut self, key: &str) -> PersistResult<()>;
    /// Lists every key in the store.
    fn keys(&self) -> PersistResult<Vec<String>>;

    /// Lists keys under [`NAMESPACE_PREFIX`], sorted.
    fn namespaced_keys(&self) -> PersistResult<Vec<String>> {
        let mut keys: Vec<String> = self
            .keys()?
            .into_iter()
            .filter(|k| k.starts_with(NAMESPACE_PREFIX))
            .collect();
        keys.sort();
        Ok(keys)
    }
}

impl<S: KvStore + ?Sized> KvStore for Box<S> {
    fn get(&self, key: &str) -> PersistResult<Option<String>> {
        (**self).get(key)
    }

    fn set(&mut self, key: &str, value: &str) -> PersistResult<()> {
        (**self).set(key, value)
    }

    fn delete(&mut self, key: &str) -> PersistResult<()> {
        (**self).delete(key)
    }

    fn keys(&self) -> PersistResult<Vec<String>> {
        (**self).keys()
    }

    fn namespaced_keys(&self) -> PersistResult<Vec<String>> {
        (**self).namespaced_keys()
    }
}

pub fn load_document<T: DeserializeOwned>(
    kv: &dyn KvStore,
    key: &str,
) -> PersistResult<Option<T>> {
    match kv.get(key)? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

pub fn store_document<T: Serialize + ?Sized>(
    kv: &mut dyn KvStore,
    key: &str,
    value: &T,
) -> PersistResult<()> {
    let raw = serde_json::to_string(value)?;
    kv.set(key, &raw)
}
