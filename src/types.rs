//! Shared primitive ids, timestamps and queue enums.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Milliseconds since the Unix epoch.
pub type TimestampMs = u64;
/// Offline operation identifier.
pub type OpId = String;
/// Browser-tab (or process) identifier used by the broadcast bus.
pub type TabId = String;

/// Kind of mutation recorded by the offline queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    /// A new record was created.
    Create,
    /// An existing record was changed.
    Update,
    /// A record was removed.
    Delete,
}

/// Replay priority. Ordering follows replay order: `High < Medium < Low`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Replayed first.
    High,
    /// Default priority.
    #[default]
    Medium,
    /// Replayed last.
    Low,
}

pub(crate) fn now_ms() -> TimestampMs {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

pub(crate) fn new_id() -> String {
    uuid::Uuid::now_v7().to_string()
}
