use hashbrown::HashSet;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    op::{OfflineOperation, OperationDraft, QueueEnvelope, SyncStatusDocument},
    persist::{
        KvStore, PersistError, PersistResult, QUEUE_KEY, SYNC_STATUS_KEY, load_document,
        store_document,
    },
    types::{OpId, TimestampMs, new_id, now_ms},
};

/// Synced operations older than this are garbage-collected (24h).
pub const DEFAULT_RETENTION_MS: u64 = 24 * 60 * 60 * 1000;

/// Counts derived from the operation list plus the persisted `last_sync`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineQueueStatus {
    /// Unsynced operations, failed ones included.
    pub pending: usize,
    /// Unsynced operations with at least one failed replay.
    pub failed: usize,
    pub synced: usize,
    pub last_sync: Option<TimestampMs>,
}

/// Persisted queue of offline operations.
///
/// Mutations only touch memory. [`OfflineQueue::persist`] merges with what
/// other writers stored meanwhile and writes the result back, so an operation
/// queued by another tab sharing the store is never dropped.
pub struct OfflineQueue {
    kv: Box<dyn KvStore>,
    operations: Vec<OfflineOperation>,
    // Ids collected since the last successful persist; not re-adopted on merge.
    removed: HashSet<OpId>,
    last_sync: Option<TimestampMs>,
    dirty: bool,
}

impl OfflineQueue {
    /// Loads the queue persisted in `kv`, or starts empty.
    pub fn open(kv: Box<dyn KvStore>) -> PersistResult<Self> {
        let mut queue = Self {
            kv,
            operations: Vec::new(),
            removed: HashSet::new(),
            last_sync: None,
            dirty: false,
        };
        queue.reload()?;
        Ok(queue)
    }

    /// Replaces in-memory state with what the store currently holds.
    pub fn reload(&mut self) -> PersistResult<()> {
        self.operations = self.load_stored()?;
        self.last_sync = self.load_last_sync()?;
        self.removed.clear();
        self.dirty = false;
        Ok(())
    }

    fn load_stored(&self) -> PersistResult<Vec<OfflineOperation>> {
        match self.kv.get(QUEUE_KEY)? {
            Some(raw) => QueueEnvelope::decode(&raw).map_err(PersistError::Message),
            None => Ok(Vec::new()),
        }
    }

    fn load_last_sync(&self) -> PersistResult<Option<TimestampMs>> {
        let status: Option<SyncStatusDocument> = load_document(&*self.kv, SYNC_STATUS_KEY)?;
        Ok(status.and_then(|s| s.last_sync))
    }

    /// Appends an operation stamped with the current time.
    pub fn push(&mut self, draft: OperationDraft) -> &OfflineOperation {
        self.push_at(draft, now_ms())
    }

    /// Appends an operation stamped with `timestamp`.
    pub fn push_at(&mut self, draft: OperationDraft, timestamp: TimestampMs) -> &OfflineOperation {
        let op = OfflineOperation {
            id: new_id(),
            op_type: draft.op_type,
            resource: draft.resource,
            data: draft.data,
            timestamp,
            synced: false,
            priority: draft.priority,
            failed_attempts: 0,
        };
        debug!(id = %op.id, resource = %op.resource, priority = ?op.priority, "operation queued");
        self.dirty = true;
        self.operations.push(op);
        &self.operations[self.operations.len() - 1]
    }

    /// Merges with the stored queue, then writes the queue and sync-status
    /// documents.
    ///
    /// Stored operations missing from memory are adopted unless this queue
    /// collected them. For operations held on both sides, `synced` and
    /// `failed_attempts` keep the furthest progress. On failure the in-memory
    /// queue is kept and marked dirty, so the next successful call writes
    /// everything.
    pub fn persist(&mut self) -> PersistResult<()> {
        let result = self.merge_stored().and_then(|()| self.write_documents());
        self.dirty = result.is_err();
        if result.is_ok() {
            self.removed.clear();
        }
        result
    }

    fn merge_stored(&mut self) -> PersistResult<()> {
        let mut adopted = 0usize;
        for theirs in self.load_stored()? {
            if self.removed.contains(&theirs.id) {
                continue;
            }
            match self.operations.iter_mut().find(|op| op.id == theirs.id) {
                Some(ours) => {
                    ours.synced |= theirs.synced;
                    ours.failed_attempts = ours.failed_attempts.max(theirs.failed_attempts);
                }
                None => {
                    self.operations.push(theirs);
                    adopted += 1;
                }
            }
        }
        if adopted > 0 {
            debug!(adopted, "adopted operations stored by another writer");
        }

        if let Some(theirs) = self.load_last_sync()? {
            self.last_sync = Some(self.last_sync.map_or(theirs, |ours| ours.max(theirs)));
        }
        Ok(())
    }

    fn write_documents(&mut self) -> PersistResult<()> {
        let envelope = QueueEnvelope::new(self.operations.clone());
        store_document(&mut *self.kv, QUEUE_KEY, &envelope)?;
        let status = SyncStatusDocument {
            last_sync: self.last_sync,
        };
        store_document(&mut *self.kv, SYNC_STATUS_KEY, &status)
    }

    /// Unsynced operations in replay order: priority first, then timestamp.
    ///
    /// The sort is stable, so enqueue order breaks timestamp ties.
    pub fn pending_in_replay_order(&self) -> Vec<OfflineOperation> {
        let mut pending: Vec<OfflineOperation> = self
            .operations
            .iter()
            .filter(|op| !op.synced)
            .cloned()
            .collect();
        pending.sort_by_key(|op| (op.priority, op.timestamp));
        pending
    }

    /// Marks `id` as replayed. Returns false for unknown or already synced ids.
    pub fn mark_synced(&mut self, id: &str) -> bool {
        match self.operations.iter_mut().find(|op| op.id == id) {
            Some(op) if !op.synced => {
                op.synced = true;
                self.dirty = true;
                true
            }
            _ => false,
        }
    }

    /// Records a failed replay attempt for `id`.
    pub fn mark_failed(&mut self, id: &str) -> bool {
        match self.operations.iter_mut().find(|op| op.id == id) {
            Some(op) if !op.synced => {
                op.failed_attempts = op.failed_attempts.saturating_add(1);
                self.dirty = true;
                true
            }
            _ => false,
        }
    }

    pub fn set_last_sync(&mut self, timestamp: TimestampMs) {
        self.last_sync = Some(timestamp);
        self.dirty = true;
    }

    /// Drops synced operations older than `retention_ms`. Never drops unsynced ones.
    pub fn collect_garbage(&mut self, now: TimestampMs, retention_ms: u64) -> usize {
        let before = self.operations.len();
        let collected = &mut self.removed;
        self.operations.retain(|op| {
            let keep = !op.synced || now.saturating_sub(op.timestamp) <= retention_ms;
            if !keep {
                collected.insert(op.id.clone());
            }
            keep
        });
        let removed = before - self.operations.len();
        if removed > 0 {
            info!(removed, "collected synced operations");
            self.dirty = true;
        }
        removed
    }

    /// Empties the queue, resets `last_sync`, and overwrites the stored
    /// documents without merging.
    pub fn clear(&mut self) -> PersistResult<()> {
        self.operations.clear();
        self.removed.clear();
        self.last_sync = None;
        let result = self.write_documents();
        self.dirty = result.is_err();
        result
    }

    pub fn status(&self) -> OfflineQueueStatus {
        let mut status = OfflineQueueStatus {
            last_sync: self.last_sync,
            ..OfflineQueueStatus::default()
        };
        for op in &self.operations {
            if op.synced {
                status.synced += 1;
            } else {
                status.pending += 1;
                if op.failed_attempts > 0 {
                    status.failed += 1;
                }
            }
        }
        status
    }

    /// True when at least one operation awaits replay.
    pub fn has_pending(&self) -> bool {
        self.operations.iter().any(|op| !op.synced)
    }

    pub fn operations(&self) -> &[OfflineOperation] {
        &self.operations
    }

    pub fn get(&self, id: &str) -> Option<&OfflineOperation> {
        self.operations.iter().find(|op| op.id == id)
    }

    pub fn last_sync(&self) -> Option<TimestampMs> {
        self.last_sync
    }

    /// True when memory holds changes the store has not seen.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}
