//! Time-windowed conflict detection and strategy-based resolution.
//!
//! Detection is a heuristic: two versions of one key conflict when their
//! canonical JSON differs and their timestamps lie within
//! [`CONFLICT_WINDOW_MS`]. There is no vector clock, so writes further apart
//! are always treated as sequential even if they raced.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info};

use crate::types::{TabId, TimestampMs, new_id, now_ms};

/// Maximum timestamp distance for two writes to count as concurrent.
pub const CONFLICT_WINDOW_MS: u64 = 5000;

/// Errors raised while resolving conflicts.
#[derive(Debug, Error)]
pub enum ConflictError {
    /// `manual` resolution requested without a value.
    #[error("manual resolution requires a resolved value")]
    MissingResolution,
    /// Value could not be converted to or from JSON.
    #[error("conflict value serialization failed: {0}")]
    Serde(#[from] serde_json::Error),
    /// No tracked conflict has this id.
    #[error("unknown conflict {0}")]
    UnknownConflict(String),
    /// Resolution is terminal.
    #[error("conflict {id} is already {status:?}")]
    NotPending {
        /// Conflict id.
        id: String,
        /// Current terminal status.
        status: ConflictStatus,
    },
}

/// Who wrote a version, and when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictMetadata {
    /// Id of the write that produced the version.
    pub conflict_id: String,
    /// Logical key written.
    pub key: String,
    /// Write time in milliseconds.
    pub timestamp: TimestampMs,
    /// Writing tab.
    pub tab_id: TabId,
    /// Signed-in user, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

/// One side of a conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictVersion<T> {
    /// Written value.
    pub value: T,
    /// Write metadata.
    pub metadata: ConflictMetadata,
    /// Per-key write counter of the writing tab.
    pub version: u64,
}

/// Lifecycle of a [`Conflict`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictStatus {
    /// Awaiting resolution.
    Pending,
    /// Resolved by a strategy.
    Resolved,
    /// Dismissed without resolution.
    Ignored,
}

/// How a conflict is settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionStrategy {
    /// Newer timestamp wins; ties go to local.
    LastWriteWins,
    /// Older timestamp wins; ties go to local.
    FirstWriteWins,
    /// Caller supplies the value.
    Manual,
    /// Structural shallow merge, local fields first.
    Merge,
}

/// Two divergent versions of one key observed within the window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict<T> {
    /// Conflict id.
    pub id: String,
    /// Logical key.
    pub key: String,
    /// This tab's version.
    pub local_version: ConflictVersion<T>,
    /// The other writer's version.
    pub remote_version: ConflictVersion<T>,
    /// Detection time.
    pub detected_at: TimestampMs,
    /// Lifecycle state.
    pub status: ConflictStatus,
    /// Settled value, once resolved.
    pub resolution: Option<T>,
    /// Strategy used, once resolved.
    pub strategy: Option<ResolutionStrategy>,
}

/// One differing top-level field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDiff {
    /// Field name, or `value` for non-object inputs.
    pub field: String,
    /// Local value, `None` when the field is absent.
    pub local: Option<Value>,
    /// Remote value, `None` when the field is absent.
    pub remote: Option<Value>,
}

fn canonical<T: Serialize>(value: &T) -> Option<String> {
    // serde_json maps are key-sorted, so this is order independent.
    serde_json::to_value(value)
        .and_then(|v| serde_json::to_string(&v))
        .ok()
}

/// True when the versions were written within the window and differ.
pub fn detect_conflict<T: Serialize>(
    local: &T,
    local_meta: &ConflictMetadata,
    remote: &T,
    remote_meta: &ConflictMetadata,
) -> bool {
    if local_meta.timestamp.abs_diff(remote_meta.timestamp) > CONFLICT_WINDOW_MS {
        return false;
    }
    match (canonical(local), canonical(remote)) {
        (Some(a), Some(b)) => a != b,
        // Unserializable values cannot be proven equal.
        _ => true,
    }
}

/// Builds a pending conflict for `key`.
pub fn create_conflict<T>(
    key: impl Into<String>,
    local_version: ConflictVersion<T>,
    remote_version: ConflictVersion<T>,
) -> Conflict<T> {
    Conflict {
        id: new_id(),
        key: key.into(),
        local_version,
        remote_version,
        detected_at: now_ms(),
        status: ConflictStatus::Pending,
        resolution: None,
        strategy: None,
    }
}

/// Computes the settled value of `conflict` under `strategy`.
///
/// `custom` is only consulted by [`ResolutionStrategy::Manual`].
pub fn resolve_conflict<T>(
    conflict: &Conflict<T>,
    strategy: ResolutionStrategy,
    custom: Option<T>,
) -> Result<T, ConflictError>
where
    T: Serialize + DeserializeOwned + Clone,
{
    let local = &conflict.local_version;
    let remote = &conflict.remote_version;
    match strategy {
        ResolutionStrategy::LastWriteWins => {
            if remote.metadata.timestamp > local.metadata.timestamp {
                Ok(remote.value.clone())
            } else {
                Ok(local.value.clone())
            }
        }
        ResolutionStrategy::FirstWriteWins => {
            if remote.metadata.timestamp < local.metadata.timestamp {
                Ok(remote.value.clone())
            } else {
                Ok(local.value.clone())
            }
        }
        ResolutionStrategy::Manual => custom.ok_or(ConflictError::MissingResolution),
        ResolutionStrategy::Merge => {
            let merged = merge_values(
                &serde_json::to_value(&local.value)?,
                &serde_json::to_value(&remote.value)?,
            );
            Ok(serde_json::from_value(merged)?)
        }
    }
}

/// Shallow structural merge.
///
/// Arrays: union keyed by element `id`, local order then remote-only ids.
/// Objects: remote fields overlaid by local fields. Anything else, including
/// mismatched shapes: local. Nested changes below the top level are lost.
pub fn merge_values(local: &Value, remote: &Value) -> Value {
    match (local, remote) {
        (Value::Array(l), Value::Array(r)) => {
            let mut out = l.clone();
            for item in r {
                let id = item.get("id");
                if !l.iter().any(|existing| existing.get("id") == id) {
                    out.push(item.clone());
                }
            }
            Value::Array(out)
        }
        (Value::Object(l), Value::Object(r)) => {
            let mut out: Map<String, Value> = r.clone();
            for (k, v) in l {
                out.insert(k.clone(), v.clone());
            }
            Value::Object(out)
        }
        _ => local.clone(),
    }
}

/// Shallow top-level diff using serialized equality per field.
pub fn get_conflict_diff<T: Serialize>(local: &T, remote: &T) -> Result<Vec<FieldDiff>, ConflictError> {
    let local = serde_json::to_value(local)?;
    let remote = serde_json::to_value(remote)?;

    let (Some(l), Some(r)) = (local.as_object(), remote.as_object()) else {
        if local == remote {
            return Ok(Vec::new());
        }
        return Ok(vec![FieldDiff {
            field: "value".to_string(),
            local: Some(local.clone()),
            remote: Some(remote.clone()),
        }]);
    };

    let mut fields: Vec<&String> = l.keys().chain(r.keys()).collect();
    fields.sort();
    fields.dedup();

    let diffs = fields
        .into_iter()
        .filter(|field| l.get(*field) != r.get(*field))
        .map(|field| FieldDiff {
            field: field.clone(),
            local: l.get(field).cloned(),
            remote: r.get(field).cloned(),
        })
        .collect();
    Ok(diffs)
}

/// Tracks this tab's latest writes and the conflicts raised against them.
///
/// Each incoming remote version is compared only with the local latest for
/// its key; what happens with three or more writers inside one window is not
/// defined beyond that pairwise check.
#[derive(Debug)]
pub struct ConflictTracker<T> {
    tab_id: TabId,
    latest: HashMap<String, ConflictVersion<T>>,
    conflicts: Vec<Conflict<T>>,
}

impl<T> ConflictTracker<T>
where
    T: Serialize + DeserializeOwned + Clone,
{
    /// Creates a tracker for writes made by `tab_id`.
    pub fn new(tab_id: impl Into<TabId>) -> Self {
        Self {
            tab_id: tab_id.into(),
            latest: HashMap::new(),
            conflicts: Vec::new(),
        }
    }

    /// Tab that owns the local versions.
    pub fn tab_id(&self) -> &str {
        &self.tab_id
    }

    /// Records a local write of `key` and returns the new version.
    pub fn record_local(&mut self, key: &str, value: T, timestamp: TimestampMs) -> ConflictVersion<T> {
        let version = self.latest.get(key).map_or(1, |v| v.version + 1);
        let entry = ConflictVersion {
            value,
            metadata: ConflictMetadata {
                conflict_id: new_id(),
                key: key.to_string(),
                timestamp,
                tab_id: self.tab_id.clone(),
                user_id: None,
            },
            version,
        };
        self.latest.insert(key.to_string(), entry.clone());
        entry
    }

    /// Latest local version of `key`.
    pub fn local(&self, key: &str) -> Option<&ConflictVersion<T>> {
        self.latest.get(key)
    }

    /// Compares a version written elsewhere with the local latest.
    ///
    /// Returns the new pending conflict when the two diverge inside the window.
    pub fn observe_remote(&mut self, remote: ConflictVersion<T>) -> Option<&Conflict<T>> {
        if remote.metadata.tab_id == self.tab_id {
            return None;
        }
        let key = remote.metadata.key.clone();
        let local = self.latest.get(&key)?;
        if !detect_conflict(&local.value, &local.metadata, &remote.value, &remote.metadata) {
            return None;
        }

        let conflict = create_conflict(key, local.clone(), remote);
        debug!(id = %conflict.id, key = %conflict.key, "conflict detected");
        self.conflicts.push(conflict);
        self.conflicts.last()
    }

    /// Settles a pending conflict and adopts the result as the local latest.
    pub fn resolve(
        &mut self,
        id: &str,
        strategy: ResolutionStrategy,
        custom: Option<T>,
    ) -> Result<T, ConflictError> {
        let conflict = self.pending_mut(id)?;
        let value = resolve_conflict(conflict, strategy, custom)?;
        conflict.status = ConflictStatus::Resolved;
        conflict.resolution = Some(value.clone());
        conflict.strategy = Some(strategy);
        info!(id, key = %conflict.key, ?strategy, "conflict resolved");

        let key = conflict.key.clone();
        if let Some(local) = self.latest.get_mut(&key) {
            local.value = value.clone();
        }
        Ok(value)
    }

    /// Dismisses a pending conflict.
    pub fn ignore(&mut self, id: &str) -> Result<(), ConflictError> {
        let conflict = self.pending_mut(id)?;
        conflict.status = ConflictStatus::Ignored;
        Ok(())
    }

    /// Conflicts still awaiting resolution.
    pub fn pending(&self) -> Vec<&Conflict<T>> {
        self.conflicts
            .iter()
            .filter(|c| c.status == ConflictStatus::Pending)
            .collect()
    }

    /// Every tracked conflict, settled or not.
    pub fn conflicts(&self) -> &[Conflict<T>] {
        &self.conflicts
    }

    /// Drops resolved and ignored conflicts.
    pub fn discard_settled(&mut self) -> usize {
        let before = self.conflicts.len();
        self.conflicts
            .retain(|c| c.status == ConflictStatus::Pending);
        before - self.conflicts.len()
    }

    fn pending_mut(&mut self, id: &str) -> Result<&mut Conflict<T>, ConflictError> {
        let conflict = self
            .conflicts
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| ConflictError::UnknownConflict(id.to_string()))?;
        if conflict.status != ConflictStatus::Pending {
            return Err(ConflictError::NotPending {
                id: id.to_string(),
                status: conflict.status,
            });
        }
        Ok(conflict)
    }
}
