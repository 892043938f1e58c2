use std::cmp::Ordering;

use thiserror::Error;
use tracing::info;

use crate::persist::{KvStore, PersistError};

use super::{
    integrity::{BackupType, DataBackup, DataIntegrity, IntegrityConfig, IntegrityError},
    migrations::{Migration, MigrationError, MigrationRecord, MigrationRunner},
    version::{VersionControl, compare_versions},
};

/// Errors raised while reconciling the local schema at startup.
#[derive(Debug, Error)]
pub enum StartupError {
    /// Store access failed.
    #[error(transparent)]
    Persist(#[from] PersistError),
    /// The pre-migration backup could not be taken.
    #[error(transparent)]
    Integrity(#[from] IntegrityError),
    /// A migration failed; restore from the pre-migration backup.
    #[error(transparent)]
    Migration(#[from] MigrationError),
}

/// What [`reconcile_schema`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Backup taken before migrating, if any migration was pending.
    pub backup: Option<DataBackup>,
    /// Migrations applied by this call.
    pub applied: Vec<MigrationRecord>,
    /// Current version after reconciliation.
    pub version: Option<String>,
}

/// Brings the local store up to `target_version`.
///
/// Seeds the version history, snapshots the store when migrations are
/// pending, applies them, and records `target_version` when it is newer than
/// the current one. A failing migration aborts with the backup already taken;
/// nothing is rolled back automatically.
pub fn reconcile_schema(
    kv: &mut dyn KvStore,
    migrations: &[Migration],
    target_version: &str,
    integrity: &IntegrityConfig,
) -> Result<ReconcileReport, StartupError> {
    VersionControl::new(&mut *kv).initialize_version()?;

    let pending = MigrationRunner::new(&mut *kv).pending_migrations(migrations)?;
    let mut report = ReconcileReport {
        backup: None,
        applied: Vec::new(),
        version: None,
    };

    if !pending.is_empty() {
        info!(pending = pending.len(), "taking pre-migration backup");
        let backup = DataIntegrity::with_config(&mut *kv, integrity.clone())
            .create_backup(BackupType::PreMigration)?;
        report.backup = Some(backup);
        report.applied = MigrationRunner::new(&mut *kv).run_migrations(migrations)?;
    }

    let mut versions = VersionControl::new(&mut *kv);
    let current = versions.current_version()?;
    let is_newer = current
        .as_deref()
        .is_none_or(|c| compare_versions(target_version, c) == Ordering::Greater);
    if is_newer {
        let changelog = report
            .applied
            .iter()
            .map(|r| format!("{} ({})", r.name, r.version))
            .collect();
        versions.update_version(target_version, changelog)?;
    }

    report.version = versions.current_version()?;
    Ok(report)
}
