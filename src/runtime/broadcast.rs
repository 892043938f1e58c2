//! Same-origin broadcast bus between tabs, plus conflict tracking on top of it.

use serde_json::Value;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::warn;

use crate::{
    core::conflict::{Conflict, ConflictTracker, ConflictVersion},
    types::{TabId, TimestampMs, new_id, now_ms},
};

const DEFAULT_CAPACITY: usize = 256;

/// Payload carried between tabs.
#[derive(Debug, Clone, PartialEq)]
pub enum TabMessageKind {
    /// A tab wrote a shared key.
    DataChanged(ConflictVersion<Value>),
    /// A tab persisted a change to the offline queue.
    QueueUpdated,
}

/// Message published on the bus.
#[derive(Debug, Clone, PartialEq)]
pub struct TabMessage {
    /// Publishing tab.
    pub origin: TabId,
    /// Payload.
    pub kind: TabMessageKind,
}

/// Named channel every tab of one origin subscribes to.
#[derive(Debug, Clone)]
pub struct BroadcastHub {
    name: String,
    tx: broadcast::Sender<TabMessage>,
}

impl BroadcastHub {
    /// Creates a hub with the default buffer.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_capacity(name, DEFAULT_CAPACITY)
    }

    /// Creates a hub buffering up to `capacity` messages per subscriber.
    pub fn with_capacity(name: impl Into<String>, capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            name: name.into(),
            tx,
        }
    }

    /// Channel name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Joins the bus as a new tab with a fresh id.
    pub fn open_tab(&self) -> TabChannel {
        self.open_tab_with_id(new_id())
    }

    /// Joins the bus as `tab_id`.
    pub fn open_tab_with_id(&self, tab_id: impl Into<TabId>) -> TabChannel {
        TabChannel {
            tab_id: tab_id.into(),
            tx: self.tx.clone(),
            rx: self.tx.subscribe(),
        }
    }
}

/// One tab's endpoint. Messages it published itself are never delivered back.
#[derive(Debug)]
pub struct TabChannel {
    tab_id: TabId,
    tx: broadcast::Sender<TabMessage>,
    rx: broadcast::Receiver<TabMessage>,
}

impl TabChannel {
    /// Id of this tab.
    pub fn tab_id(&self) -> &str {
        &self.tab_id
    }

    /// Send-only handle for this tab.
    pub fn publisher(&self) -> TabPublisher {
        TabPublisher {
            tab_id: self.tab_id.clone(),
            tx: self.tx.clone(),
        }
    }

    /// Publishes to every other subscriber. Returns how many received it.
    pub fn publish(&self, kind: TabMessageKind) -> usize {
        send(&self.tx, &self.tab_id, kind)
    }

    /// Waits for the next message from another tab; `None` once the bus closed.
    pub async fn recv(&mut self) -> Option<TabMessage> {
        loop {
            match self.rx.recv().await {
                Ok(msg) if msg.origin == self.tab_id => continue,
                Ok(msg) => return Some(msg),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(tab = %self.tab_id, skipped, "tab channel lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next already-buffered message from another tab, if any.
    pub fn try_recv(&mut self) -> Option<TabMessage> {
        loop {
            match self.rx.try_recv() {
                Ok(msg) if msg.origin == self.tab_id => continue,
                Ok(msg) => return Some(msg),
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(tab = %self.tab_id, skipped, "tab channel lagged");
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }
}

/// Send-only half of a [`TabChannel`].
#[derive(Debug, Clone)]
pub struct TabPublisher {
    tab_id: TabId,
    tx: broadcast::Sender<TabMessage>,
}

impl TabPublisher {
    /// Id of the publishing tab.
    pub fn tab_id(&self) -> &str {
        &self.tab_id
    }

    /// Publishes to every other subscriber. Returns how many received it.
    pub fn publish(&self, kind: TabMessageKind) -> usize {
        send(&self.tx, &self.tab_id, kind)
    }
}

fn send(tx: &broadcast::Sender<TabMessage>, origin: &str, kind: TabMessageKind) -> usize {
    let msg = TabMessage {
        origin: origin.to_string(),
        kind,
    };
    // No subscribers is not an error for a broadcast bus.
    tx.send(msg).unwrap_or(0)
}

/// Announces local writes to other tabs and flags concurrent remote writes.
pub struct BroadcastSync {
    channel: TabChannel,
    tracker: ConflictTracker<Value>,
}

impl BroadcastSync {
    /// Wraps `channel`; conflicts are tracked for its tab id.
    pub fn new(channel: TabChannel) -> Self {
        let tracker = ConflictTracker::new(channel.tab_id().to_string());
        Self { channel, tracker }
    }

    /// Records a local write of `key` now and tells the other tabs.
    pub fn announce(&mut self, key: &str, value: Value) -> ConflictVersion<Value> {
        self.announce_at(key, value, now_ms())
    }

    /// Records a local write of `key` at `timestamp` and tells the other tabs.
    pub fn announce_at(&mut self, key: &str, value: Value, timestamp: TimestampMs) -> ConflictVersion<Value> {
        let version = self.tracker.record_local(key, value, timestamp);
        self.channel
            .publish(TabMessageKind::DataChanged(version.clone()));
        version
    }

    /// Checks an incoming message against local writes.
    pub fn handle_message(&mut self, msg: TabMessage) -> Option<Conflict<Value>> {
        match msg.kind {
            TabMessageKind::DataChanged(version) => self.tracker.observe_remote(version).cloned(),
            TabMessageKind::QueueUpdated => None,
        }
    }

    /// Processes every buffered message; returns the conflicts raised.
    pub fn drain(&mut self) -> Vec<Conflict<Value>> {
        let mut raised = Vec::new();
        while let Some(msg) = self.channel.try_recv() {
            if let Some(conflict) = self.handle_message(msg) {
                raised.push(conflict);
            }
        }
        raised
    }

    /// Conflict tracker for resolution.
    pub fn tracker(&self) -> &ConflictTracker<Value> {
        &self.tracker
    }

    /// Mutable conflict tracker for resolution.
    pub fn tracker_mut(&mut self) -> &mut ConflictTracker<Value> {
        &mut self.tracker
    }
}
