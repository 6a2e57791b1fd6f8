use async_trait::async_trait;
use tracing::debug;

use crate::bus::TransportMessage;
use crate::error::ProcessingError;

/// Business handling for ordinary (non-control) messages arriving at the
/// processor address.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &TransportMessage) -> Result<(), ProcessingError>;
}

/// Acknowledges every message without doing anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHandler;

#[async_trait]
impl MessageHandler for NoopHandler {
    async fn handle(&self, message: &TransportMessage) -> Result<(), ProcessingError> {
        debug!(
            message_id = %message.id,
            message_type = message.message_type().unwrap_or("unknown"),
            "no handler registered; acknowledging"
        );
        Ok(())
    }
}
