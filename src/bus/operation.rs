//! Outgoing operations and the pending-operation batch.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::message::TransportMessage;

/// Where an operation is delivered.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Destination {
    /// Point-to-point delivery to a named queue.
    Queue(String),
    /// Fan-out to every queue subscribed to the topic.
    Topic(String),
}

impl Destination {
    pub fn queue(name: impl Into<String>) -> Self {
        Destination::Queue(name.into())
    }

    pub fn topic(name: impl Into<String>) -> Self {
        Destination::Topic(name.into())
    }
}

/// Whether a dispatch may join the ambient receive transaction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DispatchConsistency {
    #[default]
    Default,
    /// Dispatched in its own delivery unit, independent of the current receive.
    Isolated,
}

/// One batched send or publish, recorded while a session is open.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingOperation {
    pub message: TransportMessage,
    pub destination: Destination,
    pub delay: Option<Duration>,
}

impl PendingOperation {
    pub fn new(message: TransportMessage, destination: Destination) -> Self {
        Self {
            message,
            destination,
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn into_transport(self, consistency: DispatchConsistency) -> TransportOperation {
        TransportOperation {
            message: self.message,
            destination: self.destination,
            delay: self.delay,
            consistency,
        }
    }
}

/// An operation handed to a [`Dispatcher`](super::Dispatcher).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportOperation {
    pub message: TransportMessage,
    pub destination: Destination,
    pub delay: Option<Duration>,
    pub consistency: DispatchConsistency,
}

impl TransportOperation {
    pub fn new(message: TransportMessage, destination: Destination) -> Self {
        Self {
            message,
            destination,
            delay: None,
            consistency: DispatchConsistency::Default,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn isolated(mut self) -> Self {
        self.consistency = DispatchConsistency::Isolated;
        self
    }
}

/// Append-only, ordered list of operations collected by an open session.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PendingOperations {
    operations: Vec<PendingOperation>,
}

impl PendingOperations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, operation: PendingOperation) {
        self.operations.push(operation);
    }

    pub fn operations(&self) -> &[PendingOperation] {
        &self.operations
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Take every operation out, leaving the batch empty.
    pub fn take(&mut self) -> Vec<PendingOperation> {
        std::mem::take(&mut self.operations)
    }
}
