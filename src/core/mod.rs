//! Offline queue and conflict handling.

/// Conflict detection, resolution strategies, and per-tab tracking.
pub mod conflict;
/// Persisted offline operation queue.
pub mod queue;
