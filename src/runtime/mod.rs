//! Single-writer async runtime, tab bus, and event stream APIs.

/// Same-origin broadcast bus and conflict tracking across tabs.
pub mod broadcast;
/// Sync events and user notices.
pub mod events;
/// Sync handle, command loop, and runtime config.
pub mod handle;
/// Replay transport trait and the simulated transport.
pub mod transport;
