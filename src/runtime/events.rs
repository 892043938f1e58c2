//! Events broadcast to runtime subscribers.

use crate::{core::queue::OfflineQueueStatus, types::OpId};

/// Severity of a user-facing notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    /// Something completed.
    Success,
    /// Neutral information.
    Info,
    /// Recoverable problem.
    Warning,
    /// Failure the user should know about.
    Error,
}

/// Fire-and-forget message for a toast-style UI sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    /// Severity.
    pub level: NoticeLevel,
    /// Human readable text.
    pub message: String,
}

impl Notice {
    pub(crate) fn new(level: NoticeLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
        }
    }
}

/// Emitted by the sync runtime after each state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// An operation was appended to the queue.
    OperationQueued {
        /// Queued operation id.
        id: OpId,
    },
    /// Queue counts changed; listeners should re-render.
    StatusChanged(OfflineQueueStatus),
    /// Connectivity flipped.
    ConnectivityChanged {
        /// New connectivity.
        online: bool,
    },
    /// A sync pass finished.
    SyncCompleted {
        /// Operations replayed successfully.
        processed: usize,
        /// Operations that failed and stay pending.
        failed: usize,
    },
    /// Another tab changed the shared queue and it was reloaded.
    QueueReloaded,
    /// User-facing notification.
    Notice(Notice),
}
