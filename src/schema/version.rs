use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    persist::{KvStore, PersistResult, VERSION_HISTORY_KEY, load_document, store_document},
    types::{TimestampMs, now_ms},
};

/// Version seeded into an empty history.
pub const BASELINE_VERSION: &str = "1.0.0";

/// One entry of the append-only version history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemVersion {
    /// Version reached.
    pub version: String,
    /// When it was reached.
    pub applied_at: TimestampMs,
    /// Version current before this entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_version: Option<String>,
    /// Notes for this version.
    #[serde(default)]
    pub changelog: Vec<String>,
}

/// Tracks the current schema version; current is always the last history entry.
pub struct VersionControl<'a> {
    kv: &'a mut dyn KvStore,
}

impl<'a> VersionControl<'a> {
    /// Creates a version tracker over `kv`.
    pub fn new(kv: &'a mut dyn KvStore) -> Self {
        Self { kv }
    }

    /// Seeds the baseline version when the history is empty.
    ///
    /// Returns true when it seeded, false when history already existed.
    pub fn initialize_version(&mut self) -> PersistResult<bool> {
        let history = self.version_history()?;
        if !history.is_empty() {
            return Ok(false);
        }

        let baseline = SystemVersion {
            version: BASELINE_VERSION.to_string(),
            applied_at: now_ms(),
            previous_version: None,
            changelog: vec!["Initial system version".to_string()],
        };
        store_document(&mut *self.kv, VERSION_HISTORY_KEY, &[baseline])?;
        info!(version = BASELINE_VERSION, "seeded version history");
        Ok(true)
    }

    /// Appends `new_version`; earlier entries are never touched.
    pub fn update_version(
        &mut self,
        new_version: &str,
        changelog: Vec<String>,
    ) -> PersistResult<SystemVersion> {
        let mut history = self.version_history()?;
        let entry = SystemVersion {
            version: new_version.to_string(),
            applied_at: now_ms(),
            previous_version: history.last().map(|v| v.version.clone()),
            changelog,
        };
        history.push(entry.clone());
        store_document(&mut *self.kv, VERSION_HISTORY_KEY, &history)?;
        info!(
            version = new_version,
            previous = entry.previous_version.as_deref().unwrap_or("none"),
            "version updated"
        );
        Ok(entry)
    }

    /// Version of the last history entry.
    pub fn current_version(&self) -> PersistResult<Option<String>> {
        Ok(self.version_history()?.pop().map(|v| v.version))
    }

    /// Full history, oldest first.
    pub fn version_history(&self) -> PersistResult<Vec<SystemVersion>> {
        let history: Option<Vec<SystemVersion>> = load_document(&*self.kv, VERSION_HISTORY_KEY)?;
        Ok(history.unwrap_or_default())
    }
}

/// Dotted numeric comparison.
///
/// Components compare as integers, so `1.2.0 < 1.10.0`. Missing or
/// non-numeric components count as 0.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let parse = |s: &str| -> Vec<u64> {
        s.split('.')
            .map(|part| part.trim().parse::<u64>().unwrap_or(0))
            .collect()
    };
    let left = parse(a);
    let right = parse(b);

    for i in 0..left.len().max(right.len()) {
        let l = left.get(i).copied().unwrap_or(0);
        let r = right.get(i).copied().unwrap_or(0);
        match l.cmp(&r) {
            Ordering::Equal => {}
            other => return other,
        }
    }
    Ordering::Equal
}
