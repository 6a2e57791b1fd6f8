//! Receive pipeline at the processor address.

use std::sync::Arc;

use tracing::{debug, info, info_span, warn, Instrument};

use super::handler::{MessageHandler, NoopHandler};
use crate::bus::{DispatchConsistency, Dispatcher, TransportMessage, TransportOperation};
use crate::control::{
    IncomingContext, OutcomeAdapter, OutcomeObserver, ReceiveDisposition, RetryCoordinator,
    RetryOutcome, StageOutcome, TracingObserver,
};
use crate::error::ProcessingResult;
use crate::storage::{
    OutboxRecord, OutboxStorage, OutboxTransaction, PersistenceHints, StorageError,
};

/// Runs one physical message through the processor stages:
///
/// 1. [`OutcomeAdapter`] parses retry state and classifies the result.
/// 2. For control messages, the outbox record is looked up and its
///    operations dispatched when it exists.
/// 3. Otherwise the [`RetryCoordinator`] retries with delay or gives up;
///    giving up writes a tombstone record.
/// 4. Ordinary messages go to the [`MessageHandler`].
pub struct ReceivePipeline<O: OutboxStorage> {
    outbox: Arc<O>,
    dispatcher: Arc<dyn Dispatcher>,
    processor_address: String,
    adapter: OutcomeAdapter,
    coordinator: RetryCoordinator,
    handler: Arc<dyn MessageHandler>,
    hints: PersistenceHints,
}

impl<O: OutboxStorage> ReceivePipeline<O> {
    pub fn new(
        outbox: Arc<O>,
        dispatcher: Arc<dyn Dispatcher>,
        processor_address: impl Into<String>,
    ) -> Self {
        let processor_address = processor_address.into();
        let observer: Arc<dyn OutcomeObserver> = Arc::new(TracingObserver);
        Self {
            adapter: OutcomeAdapter::new(Arc::clone(&observer)),
            coordinator: RetryCoordinator::new(
                Arc::clone(&dispatcher),
                processor_address.clone(),
                observer,
            ),
            outbox,
            dispatcher,
            processor_address,
            handler: Arc::new(NoopHandler),
            hints: PersistenceHints::default(),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn OutcomeObserver>) -> Self {
        self.adapter = OutcomeAdapter::new(Arc::clone(&observer));
        self.coordinator = RetryCoordinator::new(
            Arc::clone(&self.dispatcher),
            self.processor_address.clone(),
            observer,
        );
        self
    }

    pub fn with_handler(mut self, handler: Arc<dyn MessageHandler>) -> Self {
        self.handler = handler;
        self
    }

    /// Hints used when writing tombstones.
    pub fn with_hints(mut self, hints: PersistenceHints) -> Self {
        self.hints = hints;
        self
    }

    pub fn processor_address(&self) -> &str {
        &self.processor_address
    }

    /// Process one delivery. `Err` means a genuine failure; a scheduled
    /// retry is a normal disposition.
    pub async fn receive(&self, message: TransportMessage) -> ProcessingResult<ReceiveDisposition> {
        let span = info_span!("receive", message_id = %message.id);
        self.adapter
            .invoke(message, |context| self.run_stages(context))
            .instrument(span)
            .await
    }

    async fn run_stages(&self, context: IncomingContext) -> StageOutcome {
        match self.stages(&context).await {
            Ok(outcome) => outcome,
            Err(err) => StageOutcome::Failed(err),
        }
    }

    async fn stages(&self, context: &IncomingContext) -> ProcessingResult<StageOutcome> {
        let message = context.message();
        let control = message.is_control_message();

        if control {
            if let Some(record) = self.outbox.get(&message.id).await? {
                self.dispatch_record(record).await?;
                return Ok(StageOutcome::Completed);
            }
        }

        match self.coordinator.invoke(message, context.retry_state()).await {
            RetryOutcome::Continue => {}
            RetryOutcome::Retried => return Ok(StageOutcome::Retried),
            RetryOutcome::Failed(err) => return Err(err),
            RetryOutcome::GaveUp if control => {
                self.tombstone(&message.id).await?;
                return Ok(StageOutcome::Completed);
            }
            RetryOutcome::GaveUp => return Ok(StageOutcome::Completed),
        }

        if control {
            warn!(
                session_id = %message.id,
                "control message without retry state and no outbox record; dropping"
            );
            return Ok(StageOutcome::Completed);
        }

        self.handler.handle(message).await?;
        Ok(StageOutcome::Completed)
    }

    async fn dispatch_record(&self, record: OutboxRecord) -> ProcessingResult<()> {
        if record.is_dispatched() {
            debug!(session_id = %record.id, "outbox record already dispatched");
            return Ok(());
        }

        let operations: Vec<TransportOperation> = record
            .undispatched()
            .into_iter()
            .map(|operation| operation.into_transport(DispatchConsistency::Default))
            .collect();
        let count = operations.len();

        self.dispatcher.dispatch(operations).await?;
        self.outbox.set_as_dispatched(&record.id).await?;
        info!(session_id = %record.id, operations = count, "dispatched outbox record");
        Ok(())
    }

    /// Write the empty record that blocks later commits under `id`.
    async fn tombstone(&self, id: &str) -> ProcessingResult<()> {
        let written: Result<(), StorageError> = async {
            let mut transaction = self.outbox.begin_transaction(&self.hints).await?;
            self.outbox
                .store(OutboxRecord::tombstone(id), &mut transaction)
                .await?;
            transaction.commit().await
        }
        .await;

        match written {
            Ok(()) => {
                debug!(session_id = %id, "wrote tombstone");
                Ok(())
            }
            Err(StorageError::Conflict { .. }) => {
                // The commit landed after all.
                match self.outbox.get(id).await? {
                    Some(record) => self.dispatch_record(record).await,
                    None => Ok(()),
                }
            }
            Err(err) => Err(err.into()),
        }
    }
}
