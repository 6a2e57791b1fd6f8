//! In-memory transport for testing and single-process scenarios.
//!
//! Implements both [`Dispatcher`] and [`Listener`], useful for:
//! - Unit and integration testing without a broker
//! - Single-process applications
//! - Development and prototyping

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::dispatcher::{Dispatcher, Listener, TransportError};
use super::message::TransportMessage;
use super::operation::{Destination, TransportOperation};

/// In-memory transport with named queues, topic subscriptions and delayed
/// delivery.
///
/// Features:
/// - Cheap to clone; clones share the same queues
/// - Delayed operations stay invisible to receivers until they are due
/// - Every dispatched operation is kept in a log for assertions
///
/// ## Example
///
/// ```
/// # tokio_test_block(async {
/// use std::collections::HashMap;
/// use std::time::Duration;
/// use transactional_session::bus::{
///     Destination, Dispatcher, InMemoryTransport, Listener, TransportMessage, TransportOperation,
/// };
///
/// let transport = InMemoryTransport::new();
/// let message = TransportMessage::new("m-1", HashMap::new(), b"{}".to_vec());
/// transport
///     .dispatch(vec![TransportOperation::new(message, Destination::queue("sales"))])
///     .await
///     .unwrap();
///
/// let received = transport.receive("sales", Duration::from_millis(10)).await.unwrap();
/// assert_eq!(received.unwrap().id, "m-1");
/// # });
/// # fn tokio_test_block<F: std::future::Future>(f: F) {
/// #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f);
/// # }
/// ```
#[derive(Clone, Default)]
pub struct InMemoryTransport {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
    notify: Notify,
}

#[derive(Default)]
struct State {
    queues: HashMap<String, VecDeque<Envelope>>,
    subscriptions: HashMap<String, Vec<String>>,
    dispatched: Vec<TransportOperation>,
    reject_next: Option<String>,
}

struct Envelope {
    message: TransportMessage,
    deliver_at: Instant,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Subscribe `queue` to every publish on `topic`.
    pub fn subscribe(&self, topic: impl Into<String>, queue: impl Into<String>) {
        let queue = queue.into();
        let mut state = self.state();
        let subscribers = state.subscriptions.entry(topic.into()).or_default();
        if !subscribers.contains(&queue) {
            subscribers.push(queue);
        }
    }

    /// Make the next `dispatch` call fail with the given reason.
    pub fn reject_next_dispatch(&self, reason: impl Into<String>) {
        self.state().reject_next = Some(reason.into());
    }

    /// Every operation dispatched so far, in order.
    pub fn dispatched(&self) -> Vec<TransportOperation> {
        self.state().dispatched.clone()
    }

    /// Operations dispatched directly to `queue`.
    pub fn dispatched_to(&self, queue: &str) -> Vec<TransportOperation> {
        self.state()
            .dispatched
            .iter()
            .filter(|op| matches!(&op.destination, Destination::Queue(q) if q == queue))
            .cloned()
            .collect()
    }

    /// Messages waiting in `queue`, including ones not yet due.
    pub fn pending(&self, queue: &str) -> Vec<TransportMessage> {
        self.state()
            .queues
            .get(queue)
            .map(|entries| entries.iter().map(|e| e.message.clone()).collect())
            .unwrap_or_default()
    }

    /// Number of messages waiting in `queue`.
    pub fn len(&self, queue: &str) -> usize {
        self.state().queues.get(queue).map(VecDeque::len).unwrap_or(0)
    }

    pub fn is_empty(&self, queue: &str) -> bool {
        self.len(queue) == 0
    }

    /// Clear all queues and the dispatch log (useful for test cleanup).
    pub fn clear(&self) {
        let mut state = self.state();
        state.queues.clear();
        state.dispatched.clear();
        state.reject_next = None;
    }
}

#[async_trait]
impl Dispatcher for InMemoryTransport {
    async fn dispatch(&self, operations: Vec<TransportOperation>) -> Result<(), TransportError> {
        {
            let mut state = self
                .inner
                .state
                .lock()
                .map_err(|_| TransportError::LockPoisoned("dispatch"))?;

            if let Some(reason) = state.reject_next.take() {
                return Err(TransportError::Rejected(reason));
            }

            let now = Instant::now();
            for operation in operations {
                let deliver_at = now + operation.delay.unwrap_or_default();
                let queues = match &operation.destination {
                    Destination::Queue(queue) => vec![queue.clone()],
                    Destination::Topic(topic) => {
                        state.subscriptions.get(topic).cloned().unwrap_or_default()
                    }
                };
                for queue in queues {
                    state.queues.entry(queue).or_default().push_back(Envelope {
                        message: operation.message.clone(),
                        deliver_at,
                    });
                }
                state.dispatched.push(operation);
            }
        }

        self.inner.notify.notify_waiters();
        Ok(())
    }
}

#[async_trait]
impl Listener for InMemoryTransport {
    async fn receive(
        &self,
        queue: &str,
        timeout: Duration,
    ) -> Result<Option<TransportMessage>, TransportError> {
        let deadline = Instant::now() + timeout;

        loop {
            // Registered before inspecting the queue so a concurrent dispatch
            // cannot slip between the check and the wait.
            let notified = self.inner.notify.notified();

            let next_due = {
                let mut state = self
                    .inner
                    .state
                    .lock()
                    .map_err(|_| TransportError::LockPoisoned("receive"))?;
                let now = Instant::now();

                match state.queues.get_mut(queue) {
                    Some(entries) => {
                        let due = entries.iter().position(|e| e.deliver_at <= now);
                        if let Some(envelope) = due.and_then(|pos| entries.remove(pos)) {
                            return Ok(Some(envelope.message));
                        }
                        entries.iter().map(|e| e.deliver_at).min()
                    }
                    None => None,
                }
            };

            if Instant::now() >= deadline {
                return Ok(None);
            }

            let wake_at = next_due.map_or(deadline, |due| due.min(deadline));
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }
}
