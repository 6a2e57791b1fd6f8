//! Background task that drains the processor queue.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::handler::MessageHandler;
use super::pipeline::ReceivePipeline;
use crate::bus::{
    headers, Destination, Dispatcher, Listener, TransportMessage, TransportOperation,
};
use crate::config::{SessionConfig, DEFAULT_ERROR_QUEUE};
use crate::control::{OutcomeObserver, ReceiveDisposition};
use crate::error::{ProcessingError, UsageError};
use crate::storage::{OutboxStorage, PersistenceHints};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Counters reported when a processor stops.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProcessorStats {
    /// Messages received from the queue.
    pub handled: usize,
    /// Deliveries that completed normally.
    pub completed: usize,
    /// Control-message deliveries replaced by a delayed successor.
    pub retried: usize,
    /// Deliveries that failed and were forwarded to the error queue.
    pub failed: usize,
    /// Receive calls made.
    pub polls: usize,
}

/// Consumes the processor address and feeds every message through a
/// [`ReceivePipeline`].
///
/// ## Example
///
/// ```
/// use std::sync::Arc;
/// use transactional_session::bus::InMemoryTransport;
/// use transactional_session::processor::Processor;
/// use transactional_session::storage::InMemoryPersistence;
/// use transactional_session::SessionConfig;
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// let config = SessionConfig::new().with_local_address("orders");
/// let transport = InMemoryTransport::new();
/// let outbox = Arc::new(InMemoryPersistence::new());
///
/// let handle = Processor::from_config(&config, outbox, transport)
///     .unwrap()
///     .spawn();
/// let stats = handle.stop().await;
/// assert_eq!(stats.failed, 0);
/// # });
/// ```
pub struct Processor<O: OutboxStorage> {
    pipeline: ReceivePipeline<O>,
    listener: Arc<dyn Listener>,
    dispatcher: Arc<dyn Dispatcher>,
    error_queue: String,
    poll_interval: Duration,
}

impl<O: OutboxStorage + 'static> Processor<O> {
    pub fn new(
        pipeline: ReceivePipeline<O>,
        listener: Arc<dyn Listener>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Self {
        Self {
            pipeline,
            listener,
            dispatcher,
            error_queue: DEFAULT_ERROR_QUEUE.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Build a processor for the endpoint described by `config`, using one
    /// transport for both receiving and dispatching.
    pub fn from_config<T>(
        config: &SessionConfig,
        outbox: Arc<O>,
        transport: T,
    ) -> Result<Self, UsageError>
    where
        T: Dispatcher + Listener + 'static,
    {
        let processor_address = config.resolved_processor_address()?;
        let transport = Arc::new(transport);
        let dispatcher: Arc<dyn Dispatcher> = transport.clone();
        let pipeline = ReceivePipeline::new(outbox, Arc::clone(&dispatcher), processor_address);

        Ok(Self::new(pipeline, transport, dispatcher).with_error_queue(config.error_queue.clone()))
    }

    pub fn with_error_queue(mut self, queue: impl Into<String>) -> Self {
        self.error_queue = queue.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn OutcomeObserver>) -> Self {
        self.pipeline = self.pipeline.with_observer(observer);
        self
    }

    pub fn with_handler(mut self, handler: Arc<dyn MessageHandler>) -> Self {
        self.pipeline = self.pipeline.with_handler(handler);
        self
    }

    pub fn with_hints(mut self, hints: PersistenceHints) -> Self {
        self.pipeline = self.pipeline.with_hints(hints);
        self
    }

    /// Start the receive loop on the current tokio runtime.
    pub fn spawn(self) -> ProcessorHandle {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handle = tokio::spawn(self.run(token));
        ProcessorHandle {
            cancel,
            handle: Some(handle),
        }
    }

    async fn run(self, cancel: CancellationToken) -> ProcessorStats {
        let queue = self.pipeline.processor_address().to_string();
        let mut stats = ProcessorStats::default();
        debug!(queue = %queue, "processor started");

        loop {
            let received = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                received = self.listener.receive(&queue, self.poll_interval) => received,
            };
            stats.polls += 1;

            let message = match received {
                Ok(Some(message)) => message,
                Ok(None) => continue,
                Err(err) => {
                    warn!(queue = %queue, error = %err, "receive failed");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.poll_interval) => continue,
                    }
                }
            };
            stats.handled += 1;

            let original = message.clone();
            match self.pipeline.receive(message).await {
                Ok(ReceiveDisposition::Completed) => stats.completed += 1,
                Ok(ReceiveDisposition::RetryScheduled) => stats.retried += 1,
                Err(err) => {
                    stats.failed += 1;
                    self.forward_to_error_queue(original, &queue, &err).await;
                }
            }
        }

        debug!(queue = %queue, ?stats, "processor stopped");
        stats
    }

    async fn forward_to_error_queue(
        &self,
        message: TransportMessage,
        queue: &str,
        err: &ProcessingError,
    ) {
        error!(
            message_id = %message.id,
            error_queue = %self.error_queue,
            error = %err,
            "processing failed; moving message to the error queue"
        );
        let failed = message
            .with_header(headers::EXCEPTION_MESSAGE, err.to_string())
            .with_header(headers::FAILED_QUEUE, queue);
        let destination = Destination::Queue(self.error_queue.clone());
        let operation = TransportOperation::new(failed, destination).isolated();
        if let Err(forward_err) = self.dispatcher.dispatch(vec![operation]).await {
            error!(error = %forward_err, "could not forward message to the error queue");
        }
    }
}

/// Handle to a running [`Processor`]. Dropping it signals stop.
pub struct ProcessorHandle {
    cancel: CancellationToken,
    handle: Option<JoinHandle<ProcessorStats>>,
}

impl ProcessorHandle {
    /// Stop the processor and wait for the in-flight message to finish.
    pub async fn stop(mut self) -> ProcessorStats {
        self.cancel.cancel();
        match self.handle.take() {
            Some(handle) => handle.await.unwrap_or_default(),
            None => ProcessorStats::default(),
        }
    }

    /// Signal stop without waiting.
    pub fn signal_stop(&self) {
        self.cancel.cancel();
    }
}

impl Drop for ProcessorHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
