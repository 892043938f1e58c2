use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{error, info, warn};

use crate::{
    core::queue::{DEFAULT_RETENTION_MS, OfflineQueue, OfflineQueueStatus},
    op::{OfflineOperation, OperationDraft},
    persist::PersistError,
    types::{OpId, OperationType, Priority, now_ms},
};

use super::{
    broadcast::{TabChannel, TabMessageKind, TabPublisher},
    events::{Notice, NoticeLevel, SyncEvent},
    transport::{OperationTransport, TransportError},
};

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("persistence failed: {0}")]
    Persist(#[from] PersistError),
    #[error("sync runtime channel closed")]
    ChannelClosed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub start_online: bool,
    /// 0 waits forever.
    pub process_timeout_ms: u64,
    pub retention_ms: u64,
    pub command_queue_bound: usize,
    pub event_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            start_online: true,
            process_timeout_ms: 30_000,
            retention_ms: DEFAULT_RETENTION_MS,
            command_queue_bound: 256,
            event_capacity: 1024,
        }
    }
}

impl RuntimeConfig {
    /// Missing fields take defaults.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub processed: usize,
    pub failed: usize,
    pub collected: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Offline,
    NothingPending,
    Completed(SyncReport),
}

#[derive(Clone)]
pub struct SyncHandle {
    cmd_tx: mpsc::Sender<Command>,
    events_tx: broadcast::Sender<SyncEvent>,
}

enum Command {
    Queue {
        draft: OperationDraft,
        resp: oneshot::Sender<OpId>,
    },
    Sync {
        resp: oneshot::Sender<SyncOutcome>,
    },
    SetOnline {
        online: bool,
        resp: oneshot::Sender<Option<SyncOutcome>>,
    },
    IsOnline {
        resp: oneshot::Sender<bool>,
    },
    Clear {
        resp: oneshot::Sender<Result<(), RuntimeError>>,
    },
    Status {
        resp: oneshot::Sender<OfflineQueueStatus>,
    },
    Operations {
        resp: oneshot::Sender<Vec<OfflineOperation>>,
    },
    Shutdown {
        resp: oneshot::Sender<Result<(), RuntimeError>>,
    },
}

struct RuntimeState {
    queue: OfflineQueue,
    transport: Box<dyn OperationTransport>,
    tab: Option<TabPublisher>,
    online: bool,
    config: RuntimeConfig,
    events_tx: broadcast::Sender<SyncEvent>,
}

/// Spawns the single-writer runtime owning `queue`.
///
/// With a `tab` channel, persisted queue changes are announced to other tabs
/// and their announcements trigger a reload from the shared store.
pub fn spawn_sync_runtime(
    queue: OfflineQueue,
    transport: Box<dyn OperationTransport>,
    tab: Option<TabChannel>,
    config: RuntimeConfig,
) -> SyncHandle {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<Command>(config.command_queue_bound.max(1));
    let (events_tx, _) = broadcast::channel::<SyncEvent>(config.event_capacity.max(1));

    let mut state = RuntimeState {
        queue,
        transport,
        tab: tab.as_ref().map(TabChannel::publisher),
        online: config.start_online,
        config,
        events_tx: events_tx.clone(),
    };
    let mut tab_rx = tab;

    tokio::spawn(async move {
        loop {
            if let Some(rx) = tab_rx.as_mut() {
                let mut tab_closed = false;
                tokio::select! {
                    cmd = cmd_rx.recv() => {
                        let Some(cmd) = cmd else { break; };
                        if handle_command(cmd, &mut state).await {
                            break;
                        }
                    }
                    msg = rx.recv() => {
                        match msg {
                            Some(msg) if matches!(msg.kind, TabMessageKind::QueueUpdated) => {
                                state.reload_from_store();
                            }
                            Some(_) => {}
                            None => tab_closed = true,
                        }
                    }
                }
                if tab_closed {
                    tab_rx = None;
                }
            } else {
                let Some(cmd) = cmd_rx.recv().await else { break; };
                if handle_command(cmd, &mut state).await {
                    break;
                }
            }
        }
    });

    SyncHandle { cmd_tx, events_tx }
}

impl SyncHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events_tx.subscribe()
    }

    /// Appends an operation and persists the queue.
    ///
    /// Persistence failures do not fail this call: they are logged and
    /// reported as an error [`SyncEvent::Notice`], and the operation stays
    /// queued in memory until a later write succeeds.
    pub async fn queue_operation(&self, draft: OperationDraft) -> Result<OpId, RuntimeError> {
        self.request(|resp| Command::Queue { draft, resp }).await
    }

    pub async fn queue(
        &self,
        op_type: OperationType,
        resource: impl Into<String>,
        data: Value,
        priority: Priority,
    ) -> Result<OpId, RuntimeError> {
        let draft = OperationDraft::new(op_type, resource, data).with_priority(priority);
        self.queue_operation(draft).await
    }

    /// Replays pending operations in priority order.
    pub async fn sync_pending_operations(&self) -> Result<SyncOutcome, RuntimeError> {
        self.request(|resp| Command::Sync { resp }).await
    }

    /// Reports a connectivity change.
    ///
    /// Going online runs a sync pass and returns its outcome. Going offline
    /// only notifies. Repeating the current state does nothing.
    pub async fn set_online(&self, online: bool) -> Result<Option<SyncOutcome>, RuntimeError> {
        self.request(|resp| Command::SetOnline { online, resp }).await
    }

    pub async fn is_online(&self) -> Result<bool, RuntimeError> {
        self.request(|resp| Command::IsOnline { resp }).await
    }

    /// Empties the queue and resets `last_sync`.
    pub async fn clear_queue(&self) -> Result<(), RuntimeError> {
        self.request(|resp| Command::Clear { resp }).await?
    }

    pub async fn queue_status(&self) -> Result<OfflineQueueStatus, RuntimeError> {
        self.request(|resp| Command::Status { resp }).await
    }

    pub async fn operations(&self) -> Result<Vec<OfflineOperation>, RuntimeError> {
        self.request(|resp| Command::Operations { resp }).await
    }

    /// Writes any unpersisted state and stops the runtime.
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        self.request(|resp| Command::Shutdown { resp }).await?
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(make(tx))
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)
    }
}

async fn handle_command(cmd: Command, state: &mut RuntimeState) -> bool {
    match cmd {
        Command::Queue { draft, resp } => {
            let id = state.queue.push(draft).id.clone();
            state.persist_queue();
            state.emit(SyncEvent::OperationQueued { id: id.clone() });
            state.emit_status();
            let _ = resp.send(id);
        }
        Command::Sync { resp } => {
            let outcome = state.sync_pending().await;
            let _ = resp.send(outcome);
        }
        Command::SetOnline { online, resp } => {
            let outcome = state.set_online(online).await;
            let _ = resp.send(outcome);
        }
        Command::IsOnline { resp } => {
            let _ = resp.send(state.online);
        }
        Command::Clear { resp } => {
            let out = match state.queue.clear() {
                Ok(()) => {
                    state.announce_queue_change();
                    state.emit_status();
                    Ok(())
                }
                Err(err) => {
                    error!(%err, "failed to clear offline queue");
                    state.notice(NoticeLevel::Error, format!("Could not clear offline queue: {err}"));
                    Err(RuntimeError::from(err))
                }
            };
            let _ = resp.send(out);
        }
        Command::Status { resp } => {
            let _ = resp.send(state.queue.status());
        }
        Command::Operations { resp } => {
            let _ = resp.send(state.queue.operations().to_vec());
        }
        Command::Shutdown { resp } => {
            let out = if state.queue.is_dirty() {
                state.queue.persist().map_err(RuntimeError::from)
            } else {
                Ok(())
            };
            let _ = resp.send(out);
            return true;
        }
    }

    false
}

async fn process_with_timeout(
    transport: &dyn OperationTransport,
    op: &OfflineOperation,
    timeout_ms: u64,
) -> Result<(), TransportError> {
    if timeout_ms == 0 {
        return transport.process(op).await;
    }
    match tokio::time::timeout(Duration::from_millis(timeout_ms), transport.process(op)).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::TimedOut(timeout_ms)),
    }
}

impl RuntimeState {
    async fn sync_pending(&mut self) -> SyncOutcome {
        if !self.online {
            self.notice(
                NoticeLevel::Warning,
                "Offline: pending changes will sync when the connection returns",
            );
            return SyncOutcome::Offline;
        }

        let pending = self.queue.pending_in_replay_order();
        if pending.is_empty() {
            self.notice(NoticeLevel::Info, "No pending changes to sync");
            return SyncOutcome::NothingPending;
        }

        let mut report = SyncReport::default();
        for op in &pending {
            let result =
                process_with_timeout(&*self.transport, op, self.config.process_timeout_ms).await;
            match result {
                Ok(()) => {
                    self.queue.mark_synced(&op.id);
                    report.processed += 1;
                }
                Err(err) => {
                    warn!(id = %op.id, resource = %op.resource, %err, "operation replay failed");
                    self.queue.mark_failed(&op.id);
                    report.failed += 1;
                }
            }
        }

        let now = now_ms();
        self.queue.set_last_sync(now);
        report.collected = self.queue.collect_garbage(now, self.config.retention_ms);
        self.persist_queue();

        info!(
            processed = report.processed,
            failed = report.failed,
            collected = report.collected,
            "sync pass finished"
        );
        self.emit(SyncEvent::SyncCompleted {
            processed: report.processed,
            failed: report.failed,
        });
        self.emit_status();
        if report.failed == 0 {
            self.notice(
                NoticeLevel::Success,
                format!("Synced {} pending change(s)", report.processed),
            );
        } else {
            self.notice(
                NoticeLevel::Warning,
                format!("{} change(s) failed to sync and will be retried", report.failed),
            );
        }
        SyncOutcome::Completed(report)
    }

    async fn set_online(&mut self, online: bool) -> Option<SyncOutcome> {
        if self.online == online {
            return None;
        }
        self.online = online;
        self.emit(SyncEvent::ConnectivityChanged { online });

        if online {
            info!("connection restored");
            self.notice(NoticeLevel::Success, "Back online");
            Some(self.sync_pending().await)
        } else {
            info!("connection lost");
            self.notice(
                NoticeLevel::Warning,
                "You are offline; changes will be queued",
            );
            self.emit_status();
            None
        }
    }

    fn persist_queue(&mut self) -> bool {
        match self.queue.persist() {
            Ok(()) => {
                self.announce_queue_change();
                true
            }
            Err(err) => {
                error!(%err, "failed to persist offline queue");
                self.notice(
                    NoticeLevel::Error,
                    format!("Could not save offline changes: {err}"),
                );
                false
            }
        }
    }

    fn reload_from_store(&mut self) {
        if self.queue.is_dirty() {
            warn!("skipping queue reload: local changes not yet persisted");
            return;
        }
        match self.queue.reload() {
            Ok(()) => {
                self.emit(SyncEvent::QueueReloaded);
                self.emit_status();
            }
            Err(err) => error!(%err, "failed to reload offline queue"),
        }
    }

    fn announce_queue_change(&self) {
        if let Some(tab) = &self.tab {
            tab.publish(TabMessageKind::QueueUpdated);
        }
    }

    fn emit(&self, event: SyncEvent) {
        let _ = self.events_tx.send(event);
    }

    fn emit_status(&self) {
        self.emit(SyncEvent::StatusChanged(self.queue.status()));
    }

    fn notice(&self, level: NoticeLevel, message: impl Into<String>) {
        self.emit(SyncEvent::Notice(Notice::new(level, message)));
    }
}
