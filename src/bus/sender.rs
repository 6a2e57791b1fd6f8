//! Routing and stamping of outgoing messages.
//!
//! [`MessageSender`] is the message-sending facility a session forwards to.
//! When a batch is attached the routed operation is recorded in it for the
//! atomic commit; without one the operation is dispatched immediately.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use super::dispatcher::Dispatcher;
use super::headers;
use super::message::{OutgoingMessage, TransportMessage};
use super::operation::{
    Destination, DispatchConsistency, PendingOperation, PendingOperations,
};
use crate::config::SessionConfig;
use crate::control::format_timestamp;
use crate::error::{SessionResult, UsageError};

/// Options for a point-to-point send.
#[derive(Clone, Debug, Default)]
pub struct SendOptions {
    destination: Option<String>,
    route_to_this_endpoint: bool,
    delay: Option<Duration>,
    message_id: Option<String>,
    headers: HashMap<String, String>,
}

impl SendOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Send to an explicit queue, bypassing the route table.
    pub fn with_destination(mut self, queue: impl Into<String>) -> Self {
        self.destination = Some(queue.into());
        self
    }

    /// Send to this endpoint's own input queue.
    pub fn route_to_this_endpoint(mut self) -> Self {
        self.route_to_this_endpoint = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

/// Options for a publish.
#[derive(Clone, Debug, Default)]
pub struct PublishOptions {
    topic: Option<String>,
    message_id: Option<String>,
    headers: HashMap<String, String>,
}

impl PublishOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish to an explicit topic instead of the message type.
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub fn with_message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

/// Routes outgoing messages and either records or dispatches them.
#[derive(Clone)]
pub struct MessageSender {
    dispatcher: Arc<dyn Dispatcher>,
    routes: HashMap<String, String>,
    local_address: Option<String>,
}

impl MessageSender {
    pub fn new(dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self {
            dispatcher,
            routes: HashMap::new(),
            local_address: None,
        }
    }

    /// Build a sender using the route table and local address of `config`.
    pub fn from_config(config: &SessionConfig, dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self {
            dispatcher,
            routes: config.routes.clone(),
            local_address: config.local_address.clone(),
        }
    }

    /// Route messages of `message_type` to `queue`.
    pub fn with_route(mut self, message_type: impl Into<String>, queue: impl Into<String>) -> Self {
        self.routes.insert(message_type.into(), queue.into());
        self
    }

    pub fn with_local_address(mut self, address: impl Into<String>) -> Self {
        self.local_address = Some(address.into());
        self
    }

    pub fn dispatcher(&self) -> &Arc<dyn Dispatcher> {
        &self.dispatcher
    }

    pub fn local_address(&self) -> Option<&str> {
        self.local_address.as_deref()
    }

    /// Resolve the destination and stamp the standard headers for a send.
    pub fn prepare_send(
        &self,
        message: OutgoingMessage,
        options: SendOptions,
    ) -> Result<PendingOperation, UsageError> {
        let queue = if let Some(destination) = options.destination {
            destination
        } else if options.route_to_this_endpoint {
            self.local_address
                .clone()
                .ok_or_else(|| UsageError::UnroutableMessage(message.message_type.clone()))?
        } else {
            self.routes
                .get(&message.message_type)
                .cloned()
                .ok_or_else(|| UsageError::UnroutableMessage(message.message_type.clone()))?
        };

        let transport = self.stamp(
            message,
            options.message_id,
            options.headers,
            headers::INTENT_SEND,
        );
        let mut operation = PendingOperation::new(transport, Destination::Queue(queue));
        operation.delay = options.delay;
        Ok(operation)
    }

    /// Stamp the standard headers for a publish. The topic defaults to the
    /// message type.
    pub fn prepare_publish(
        &self,
        message: OutgoingMessage,
        options: PublishOptions,
    ) -> PendingOperation {
        let topic = options
            .topic
            .unwrap_or_else(|| message.message_type.clone());
        let transport = self.stamp(
            message,
            options.message_id,
            options.headers,
            headers::INTENT_PUBLISH,
        );
        PendingOperation::new(transport, Destination::Topic(topic))
    }

    /// Send a message. With a batch attached it is recorded, otherwise it is
    /// dispatched right away.
    pub async fn send(
        &self,
        message: OutgoingMessage,
        options: SendOptions,
        batch: Option<&mut PendingOperations>,
    ) -> SessionResult<()> {
        let operation = self.prepare_send(message, options)?;
        self.record_or_dispatch(operation, batch).await
    }

    /// Publish a message. With a batch attached it is recorded, otherwise it
    /// is dispatched right away.
    pub async fn publish(
        &self,
        message: OutgoingMessage,
        options: PublishOptions,
        batch: Option<&mut PendingOperations>,
    ) -> SessionResult<()> {
        let operation = self.prepare_publish(message, options);
        self.record_or_dispatch(operation, batch).await
    }

    async fn record_or_dispatch(
        &self,
        operation: PendingOperation,
        batch: Option<&mut PendingOperations>,
    ) -> SessionResult<()> {
        match batch {
            Some(batch) => {
                debug!(
                    message_id = %operation.message.id,
                    destination = ?operation.destination,
                    "recorded operation in pending batch"
                );
                batch.add(operation);
            }
            None => {
                debug!(
                    message_id = %operation.message.id,
                    destination = ?operation.destination,
                    "dispatching operation immediately"
                );
                self.dispatcher
                    .dispatch(vec![operation.into_transport(DispatchConsistency::Default)])
                    .await?;
            }
        }
        Ok(())
    }

    fn stamp(
        &self,
        message: OutgoingMessage,
        message_id: Option<String>,
        extra_headers: HashMap<String, String>,
        intent: &str,
    ) -> TransportMessage {
        let id = message_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let mut stamped = message.headers;
        stamped.extend(extra_headers);
        stamped.insert(headers::MESSAGE_ID.to_string(), id.clone());
        stamped.insert(headers::MESSAGE_TYPE.to_string(), message.message_type);
        stamped.insert(headers::MESSAGE_INTENT.to_string(), intent.to_string());
        stamped.insert(headers::TIME_SENT.to_string(), format_timestamp(Utc::now()));
        if let Some(local) = &self.local_address {
            stamped
                .entry(headers::REPLY_TO.to_string())
                .or_insert_with(|| local.clone());
        }
        TransportMessage::new(id, stamped, message.body)
    }
}
