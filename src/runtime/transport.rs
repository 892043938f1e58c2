//! Replay transport seam.

use std::{future::Future, pin::Pin, time::Duration};

use thiserror::Error;

use crate::op::OfflineOperation;

/// Errors raised while replaying one operation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Backend rejected or failed the operation.
    #[error("replay failed: {0}")]
    Failed(String),
    /// The operation did not finish within the configured timeout.
    #[error("replay timed out after {0} ms")]
    TimedOut(u64),
}

/// Boxed future returned by [`OperationTransport::process`].
pub type TransportFuture<'a> = Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + 'a>>;

/// Sends one queued operation to the authoritative backend.
pub trait OperationTransport: Send + Sync {
    /// Replays `op`; `Ok` marks it synced.
    fn process<'a>(&'a self, op: &'a OfflineOperation) -> TransportFuture<'a>;
}

/// Stand-in transport: waits a fixed delay and reports success.
#[derive(Debug, Clone)]
pub struct SimulatedTransport {
    delay: Duration,
}

impl SimulatedTransport {
    /// Succeeds after `delay`.
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Default for SimulatedTransport {
    fn default() -> Self {
        Self::new(Duration::from_millis(100))
    }
}

impl OperationTransport for SimulatedTransport {
    fn process<'a>(&'a self, _op: &'a OfflineOperation) -> TransportFuture<'a> {
        Box::pin(async move {
            tokio::time::sleep(self.delay).await;
            Ok(())
        })
    }
}
