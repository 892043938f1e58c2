//! Offline operation model and persisted queue documents.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{OpId, OperationType, Priority, TimestampMs};

/// Version number for serialized [`QueueEnvelope`] documents.
pub const QUEUE_FORMAT_VERSION: u16 = 1;

/// Mutation recorded while disconnected, awaiting replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineOperation {
    /// Unique id assigned at enqueue time.
    pub id: OpId,
    /// Mutation kind.
    #[serde(rename = "type")]
    pub op_type: OperationType,
    /// Logical resource name, e.g. `room-status`.
    pub resource: String,
    /// Opaque payload handed to the transport unchanged.
    pub data: Value,
    /// Enqueue time in milliseconds.
    pub timestamp: TimestampMs,
    /// Set once the operation was replayed successfully.
    pub synced: bool,
    /// Replay priority.
    pub priority: Priority,
    /// Number of failed replay attempts so far.
    #[serde(default)]
    pub failed_attempts: u32,
}

/// Caller-supplied part of an [`OfflineOperation`].
#[derive(Debug, Clone, PartialEq)]
pub struct OperationDraft {
    /// Mutation kind.
    pub op_type: OperationType,
    /// Logical resource name.
    pub resource: String,
    /// Opaque payload.
    pub data: Value,
    /// Replay priority.
    pub priority: Priority,
}

impl OperationDraft {
    /// Draft with [`Priority::Medium`].
    pub fn new(op_type: OperationType, resource: impl Into<String>, data: Value) -> Self {
        Self {
            op_type,
            resource: resource.into(),
            data,
            priority: Priority::default(),
        }
    }

    /// Overrides the replay priority.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

/// Versioned wrapper for the persisted operation list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEnvelope {
    /// Document format version.
    pub format_version: u16,
    /// Every retained operation, in enqueue order.
    pub operations: Vec<OfflineOperation>,
}

impl QueueEnvelope {
    /// Wraps `operations` using [`QUEUE_FORMAT_VERSION`].
    pub fn new(operations: Vec<OfflineOperation>) -> Self {
        Self {
            format_version: QUEUE_FORMAT_VERSION,
            operations,
        }
    }

    /// Decodes a persisted queue document.
    pub fn decode(raw: &str) -> Result<Vec<OfflineOperation>, String> {
        if let Ok(envelope) = serde_json::from_str::<QueueEnvelope>(raw) {
            if envelope.format_version != QUEUE_FORMAT_VERSION {
                return Err(format!(
                    "unsupported queue format version: {}",
                    envelope.format_version
                ));
            }
            return Ok(envelope.operations);
        }

        // Older documents stored the bare operation array.
        serde_json::from_str::<Vec<OfflineOperation>>(raw)
            .map_err(|e| format!("queue document decode failed: {e}"))
    }
}

/// Persisted sync bookkeeping, kept apart from the queue itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatusDocument {
    /// Completion time of the last sync pass.
    pub last_sync: Option<TimestampMs>,
}
