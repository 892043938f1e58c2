//! In-process key-value store.
//!
//! Clones share the same map, which is how several tabs of one browser see a
//! single origin storage. An optional byte quota mimics storage limits.

use std::sync::{Arc, Mutex, MutexGuard};

use hashbrown::HashMap;

use super::{KvStore, PersistError, PersistResult};

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, String>,
    quota_bytes: Option<usize>,
}

impl Inner {
    fn used_bytes_without(&self, key: &str) -> usize {
        self.entries
            .iter()
            .filter(|(k, _)| k.as_str() != key)
            .map(|(k, v)| k.len() + v.len())
            .sum()
    }
}

/// Shared in-memory implementation of [`KvStore`].
#[derive(Debug, Clone, Default)]
pub struct MemoryKv {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryKv {
    /// Creates an empty, unbounded store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty store rejecting writes past `quota_bytes` (keys plus values).
    pub fn with_quota(quota_bytes: usize) -> Self {
        let kv = Self::default();
        if let Ok(mut inner) = kv.inner.lock() {
            inner.quota_bytes = Some(quota_bytes);
        }
        kv
    }

    /// Changes the quota of this store and every clone of it.
    pub fn set_quota(&self, quota_bytes: Option<usize>) -> PersistResult<()> {
        self.lock()?.quota_bytes = quota_bytes;
        Ok(())
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.lock().map(|inner| inner.entries.len()).unwrap_or(0)
    }

    /// True when no entry is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> PersistResult<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| PersistError::Message("memory store lock poisoned".to_string()))
    }
}

impl KvStore for MemoryKv {
    fn get(&self, key: &str) -> PersistResult<Option<String>> {
        Ok(self.lock()?.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> PersistResult<()> {
        let mut inner = self.lock()?;
        if let Some(quota) = inner.quota_bytes {
            if inner.used_bytes_without(key) + key.len() + value.len() > quota {
                return Err(PersistError::QuotaExceeded {
                    key: key.to_string(),
                });
            }
        }
        inner.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&mut self, key: &str) -> PersistResult<()> {
        self.lock()?.entries.remove(key);
        Ok(())
    }

    fn keys(&self) -> PersistResult<Vec<String>> {
        Ok(self.lock()?.entries.keys().cloned().collect())
    }
}
