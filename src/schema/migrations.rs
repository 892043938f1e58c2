use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info};

use crate::{
    persist::{KvStore, MIGRATIONS_KEY, PersistError, load_document, store_document},
    types::{TimestampMs, new_id, now_ms},
};

use super::fingerprint;

/// Effect run against the store when a migration is applied or rolled back.
pub type MigrationFn = Box<dyn Fn(&mut dyn KvStore) -> Result<(), MigrationError> + Send + Sync>;

/// Errors raised by the migration runner.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// Reading or writing the migration log failed.
    #[error("migration log persistence failed: {0}")]
    Persist(#[from] PersistError),
    /// A migration effect failed.
    #[error("migration {version} failed: {message}")]
    Step {
        /// Version of the failing migration.
        version: String,
        /// Failure detail.
        message: String,
    },
    /// Rollback requested for a migration without a `down` effect.
    #[error("migration {version} has no down step")]
    MissingDown {
        /// Version of the migration.
        version: String,
    },
    /// Rollback requested for a migration that was never applied.
    #[error("migration {version} is not applied")]
    NotApplied {
        /// Version of the migration.
        version: String,
    },
}

/// One versioned schema change.
pub struct Migration {
    /// Semver-like version, unique per migration.
    pub version: String,
    /// Human readable name.
    pub name: String,
    /// Authoring time; migrations run in ascending order of this field.
    pub timestamp: TimestampMs,
    up: MigrationFn,
    down: Option<MigrationFn>,
}

impl Migration {
    /// Creates a migration without a rollback step.
    pub fn new<F>(version: impl Into<String>, name: impl Into<String>, timestamp: TimestampMs, up: F) -> Self
    where
        F: Fn(&mut dyn KvStore) -> Result<(), MigrationError> + Send + Sync + 'static,
    {
        Self {
            version: version.into(),
            name: name.into(),
            timestamp,
            up: Box::new(up),
            down: None,
        }
    }

    /// Adds a rollback step.
    pub fn with_down<F>(mut self, down: F) -> Self
    where
        F: Fn(&mut dyn KvStore) -> Result<(), MigrationError> + Send + Sync + 'static,
    {
        self.down = Some(Box::new(down));
        self
    }

    /// True when [`MigrationRunner::rollback_migration`] can undo this step.
    pub fn has_down(&self) -> bool {
        self.down.is_some()
    }

    fn checksum(&self) -> String {
        let body = serde_json::json!({
            "version": self.version,
            "name": self.name,
            "timestamp": self.timestamp,
        });
        fingerprint(&body.to_string())
    }
}

impl fmt::Debug for Migration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Migration")
            .field("version", &self.version)
            .field("name", &self.name)
            .field("timestamp", &self.timestamp)
            .field("has_down", &self.down.is_some())
            .finish()
    }
}

/// Log entry proving a migration version was applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationRecord {
    /// Record id.
    pub id: String,
    /// Applied version.
    pub version: String,
    /// Applied migration name.
    pub name: String,
    /// Application time.
    pub applied_at: TimestampMs,
    /// Fingerprint of `{version, name, timestamp}`.
    pub checksum: String,
}

/// Applies migrations at most once each, recording them in the store.
pub struct MigrationRunner<'a> {
    kv: &'a mut dyn KvStore,
}

impl<'a> MigrationRunner<'a> {
    /// Creates a runner over `kv`.
    pub fn new(kv: &'a mut dyn KvStore) -> Self {
        Self { kv }
    }

    /// Every recorded migration, in application order.
    pub fn applied_migrations(&self) -> Result<Vec<MigrationRecord>, MigrationError> {
        let records: Option<Vec<MigrationRecord>> = load_document(&*self.kv, MIGRATIONS_KEY)?;
        Ok(records.unwrap_or_default())
    }

    /// True when a record for `version` exists.
    pub fn is_applied(&self, version: &str) -> Result<bool, MigrationError> {
        Ok(self
            .applied_migrations()?
            .iter()
            .any(|r| r.version == version))
    }

    /// Migrations from `list` not yet applied, in run order.
    pub fn pending_migrations<'m>(&self, list: &'m [Migration]) -> Result<Vec<&'m Migration>, MigrationError> {
        let records = self.applied_migrations()?;
        let mut pending: Vec<&Migration> = list
            .iter()
            .filter(|m| !records.iter().any(|r| r.version == m.version))
            .collect();
        pending.sort_by_key(|m| m.timestamp);
        Ok(pending)
    }

    /// Applies every pending migration in timestamp order.
    ///
    /// Each record is persisted right after its `up` step, so an interrupted
    /// run resumes where it stopped. The first failing step halts the run.
    /// Returns the records written by this call.
    pub fn run_migrations(&mut self, list: &[Migration]) -> Result<Vec<MigrationRecord>, MigrationError> {
        let mut records = self.applied_migrations()?;
        let mut ordered: Vec<&Migration> = list.iter().collect();
        ordered.sort_by_key(|m| m.timestamp);

        let mut applied = Vec::new();
        for migration in ordered {
            if records.iter().any(|r| r.version == migration.version) {
                continue;
            }

            if let Err(err) = (migration.up)(&mut *self.kv) {
                error!(version = %migration.version, name = %migration.name, %err, "migration failed");
                return Err(err);
            }

            let record = MigrationRecord {
                id: new_id(),
                version: migration.version.clone(),
                name: migration.name.clone(),
                applied_at: now_ms(),
                checksum: migration.checksum(),
            };
            records.push(record.clone());
            store_document(&mut *self.kv, MIGRATIONS_KEY, &records)?;
            info!(version = %migration.version, name = %migration.name, "applied migration");
            applied.push(record);
        }
        Ok(applied)
    }

    /// Runs `down` and forgets the record, making the migration pending again.
    pub fn rollback_migration(&mut self, migration: &Migration) -> Result<(), MigrationError> {
        let Some(down) = migration.down.as_ref() else {
            return Err(MigrationError::MissingDown {
                version: migration.version.clone(),
            });
        };

        let mut records = self.applied_migrations()?;
        let Some(pos) = records.iter().position(|r| r.version == migration.version) else {
            return Err(MigrationError::NotApplied {
                version: migration.version.clone(),
            });
        };

        down(&mut *self.kv)?;
        records.remove(pos);
        store_document(&mut *self.kv, MIGRATIONS_KEY, &records)?;
        info!(version = %migration.version, name = %migration.name, "rolled back migration");
        Ok(())
    }
}
