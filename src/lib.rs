//! Offline operation queue, multi-tab conflict handling, and local schema
//! bookkeeping for a hotel property-management client.
//!
//! # Examples
//!
//! Queue bookkeeping without a runtime, over [`persist::memory::MemoryKv`]:
//! ```
//! use roomsync::{
//!     core::queue::OfflineQueue,
//!     op::OperationDraft,
//!     persist::memory::MemoryKv,
//!     types::{OperationType, Priority},
//! };
//!
//! let mut queue = OfflineQueue::open(Box::new(MemoryKv::new())).expect("open");
//! let id = queue
//!     .push(
//!         OperationDraft::new(OperationType::Update, "room-status", serde_json::json!({"room": 101}))
//!             .with_priority(Priority::High),
//!     )
//!     .id
//!     .clone();
//! queue.persist().expect("persist");
//! assert_eq!(queue.status().pending, 1);
//! assert!(queue.mark_synced(&id));
//! ```
//!
//! Runtime usage with the simulated transport:
//! ```no_run
//! use std::time::Duration;
//!
//! use roomsync::{
//!     core::queue::OfflineQueue,
//!     persist::sqlite::SqliteKv,
//!     runtime::{
//!         handle::{spawn_sync_runtime, RuntimeConfig},
//!         transport::SimulatedTransport,
//!     },
//!     types::{OperationType, Priority},
//! };
//!
//! # #[tokio::main]
//! # async fn main() {
//! let kv = SqliteKv::open("pms.db").expect("open sqlite");
//! let queue = OfflineQueue::open(Box::new(kv)).expect("load queue");
//! let cfg = RuntimeConfig { start_online: false, ..RuntimeConfig::default() };
//! let transport = SimulatedTransport::new(Duration::from_millis(50));
//! let handle = spawn_sync_runtime(queue, Box::new(transport), None, cfg);
//! handle
//!     .queue(OperationType::Update, "room-status", serde_json::json!({"room": 101}), Priority::High)
//!     .await
//!     .expect("queue");
//! handle.set_online(true).await.expect("online");
//! handle.shutdown().await.expect("shutdown");
//! # }
//! ```

/// Offline queue and conflict resolution.
pub mod core;
/// Offline operation model and persisted queue documents.
pub mod op;
/// Key-value persistence abstraction, memory and SQLite stores.
pub mod persist;
/// Single-writer runtime handle, tab bus, and events.
pub mod runtime;
/// Migrations, version history, backups, and integrity checks.
pub mod schema;
/// Ids, timestamps, operation kinds, and priorities.
pub mod types;
