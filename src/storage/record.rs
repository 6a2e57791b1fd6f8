use serde::{Deserialize, Serialize};

use crate::bus::PendingOperation;

/// One recorded operation and whether it has been handed to the transport.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxOperation {
    pub operation: PendingOperation,
    pub dispatched: bool,
}

/// Outbox entry keyed by session id.
///
/// Created exactly once per id; a second record under the same id is a
/// conflict. A record without operations is a tombstone.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxRecord {
    pub id: String,
    pub operations: Vec<OutboxOperation>,
}

impl OutboxRecord {
    pub fn new(id: impl Into<String>, operations: Vec<PendingOperation>) -> Self {
        Self {
            id: id.into(),
            operations: operations
                .into_iter()
                .map(|operation| OutboxOperation {
                    operation,
                    dispatched: false,
                })
                .collect(),
        }
    }

    /// Empty record written when the retry budget runs out.
    pub fn tombstone(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            operations: Vec::new(),
        }
    }

    pub fn is_tombstone(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn is_dispatched(&self) -> bool {
        self.operations.iter().all(|o| o.dispatched)
    }

    /// Operations still waiting for dispatch, in batch order.
    pub fn undispatched(&self) -> Vec<PendingOperation> {
        self.operations
            .iter()
            .filter(|o| !o.dispatched)
            .map(|o| o.operation.clone())
            .collect()
    }

    pub fn mark_dispatched(&mut self) {
        for operation in &mut self.operations {
            operation.dispatched = true;
        }
    }

    /// Serialize with bitcode (fast binary).
    pub fn encode(&self) -> Result<Vec<u8>, bitcode::Error> {
        bitcode::serialize(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, bitcode::Error> {
        bitcode::deserialize(bytes)
    }
}
