//! Transport contracts: dispatching operations and receiving from a queue.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use super::message::TransportMessage;
use super::operation::TransportOperation;

/// Error type for transport operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The transport refused the operation.
    #[error("dispatch rejected: {0}")]
    Rejected(String),
    #[error("transport lock poisoned during {0}")]
    LockPoisoned(&'static str),
}

/// Sends operations to queues or topics with at-least-once semantics.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Dispatch all operations. Delayed operations become visible once their
    /// delay elapses.
    async fn dispatch(&self, operations: Vec<TransportOperation>) -> Result<(), TransportError>;
}

/// Receives messages from a named queue (competing consumers).
#[async_trait]
pub trait Listener: Send + Sync {
    /// Wait for the next message on `queue`, or `None` once `timeout` expires.
    async fn receive(
        &self,
        queue: &str,
        timeout: Duration,
    ) -> Result<Option<TransportMessage>, TransportError>;
}
