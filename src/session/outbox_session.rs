use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use super::options::{Extensions, OpenOptions};
use super::{SessionState, TransactionalSession};
use crate::bus::{
    Destination, MessageSender, OutgoingMessage, PendingOperations, PublishOptions, SendOptions,
    TransportOperation,
};
use crate::control::{control_message, RetryState};
use crate::error::{SessionError, SessionResult, UsageError};
use crate::storage::{
    OutboxRecord, OutboxStorage, OutboxTransaction, PersistenceHints, SynchronizedStorageSession,
};

struct Opened<T> {
    session_id: String,
    retry: RetryState,
    options: OpenOptions,
    transaction: Option<T>,
}

/// Session whose commit goes through the outbox.
///
/// Commit runs these steps in order:
///
/// 1. dispatch the control message to the processor address
/// 2. complete the storage session into the outbox transaction
/// 3. store the batch as the outbox record under the session id
/// 4. commit the outbox transaction
///
/// Steps 2-4 become durable together. If any of them fails the transaction
/// is rolled back, the storage session is disposed and the session moves to
/// [`SessionState::Failed`]. The control message stays in flight and the
/// processor eventually tombstones the id.
pub struct OutboxSession<O, S>
where
    O: OutboxStorage,
    S: SynchronizedStorageSession<Transaction = O::Transaction>,
{
    outbox: Arc<O>,
    storage: S,
    sender: MessageSender,
    processor_address: String,
    state: SessionState,
    opened: Option<Opened<O::Transaction>>,
    batch: PendingOperations,
    released: bool,
}

impl<O, S> OutboxSession<O, S>
where
    O: OutboxStorage,
    S: SynchronizedStorageSession<Transaction = O::Transaction>,
{
    pub fn new(
        outbox: Arc<O>,
        storage: S,
        sender: MessageSender,
        processor_address: impl Into<String>,
    ) -> Self {
        Self {
            outbox,
            storage,
            sender,
            processor_address: processor_address.into(),
            state: SessionState::Unopened,
            opened: None,
            batch: PendingOperations::new(),
            released: false,
        }
    }

    pub fn processor_address(&self) -> &str {
        &self.processor_address
    }

    /// The storage session, for staging the business mutation.
    pub fn storage_session_mut(&mut self) -> SessionResult<&mut S> {
        self.state.ensure_open()?;
        Ok(&mut self.storage)
    }

    pub fn extensions(&self) -> Option<&Extensions> {
        self.opened.as_ref().map(|opened| opened.options.extensions())
    }

    pub fn hints(&self) -> Option<&PersistenceHints> {
        self.opened.as_ref().map(|opened| opened.options.hints())
    }

    fn control_operation(&self) -> SessionResult<TransportOperation> {
        let opened = self.opened.as_ref().ok_or(UsageError::NotOpen)?;

        let mut retry = opened.retry.clone();
        retry.time_sent = Some(Utc::now());
        let control = control_message(&retry, opened.options.metadata());
        Ok(
            TransportOperation::new(control, Destination::Queue(self.processor_address.clone()))
                .isolated(),
        )
    }

    async fn dispatch_control_message(&mut self, cancel: &CancellationToken) -> SessionResult<()> {
        let operation = self.control_operation()?;
        let dispatcher = Arc::clone(self.sender.dispatcher());

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SessionError::Cancelled),
            result = dispatcher.dispatch(vec![operation]) => {
                result?;
                debug!(processor = %self.processor_address, "dispatched control message");
                Ok(())
            }
        }
    }

    /// Complete, store and commit. Not cancellable once started.
    async fn persist(&mut self) -> SessionResult<()> {
        let opened = self.opened.as_mut().ok_or(UsageError::NotOpen)?;
        let mut transaction = opened.transaction.take().ok_or(UsageError::NotOpen)?;
        let record = OutboxRecord::new(opened.session_id.clone(), self.batch.operations().to_vec());

        self.storage.complete().await?;
        self.outbox.store(record, &mut transaction).await?;
        transaction.commit().await?;
        Ok(())
    }

    async fn run_commit(&mut self, cancel: &CancellationToken) -> SessionResult<()> {
        if cancel.is_cancelled() {
            return Err(SessionError::Cancelled);
        }

        if let Err(err) = self.dispatch_control_message(cancel).await {
            self.fail(&err);
            return Err(err);
        }

        if let Err(err) = self.persist().await {
            self.fail(&err);
            return Err(err);
        }

        self.release();
        self.state = SessionState::Committed;
        info!(operations = self.batch.len(), "committed transactional session");
        Ok(())
    }

    fn fail(&mut self, err: &SessionError) {
        warn!(error = %err, "transactional session commit failed; rolling back");
        self.release();
        self.state = SessionState::Failed;
    }

    /// Drops the transaction and disposes the storage session, once.
    fn release(&mut self) {
        if let Some(opened) = self.opened.as_mut() {
            opened.transaction = None;
        }
        if self.released {
            return;
        }
        self.released = true;
        self.storage.dispose();
    }

    /// The storage session was handed back during a failed open.
    fn abandon_open(&mut self, err: SessionError) -> SessionError {
        warn!(error = %err, "could not open outbox session");
        self.release();
        self.state = SessionState::Disposed;
        err
    }
}

#[async_trait]
impl<O, S> TransactionalSession for OutboxSession<O, S>
where
    O: OutboxStorage,
    S: SynchronizedStorageSession<Transaction = O::Transaction>,
{
    fn session_id(&self) -> Option<&str> {
        self.opened.as_ref().map(|opened| opened.session_id.as_str())
    }

    fn state(&self) -> SessionState {
        self.state
    }

    fn pending_operations(&self) -> &PendingOperations {
        &self.batch
    }

    async fn open(
        &mut self,
        options: OpenOptions,
        cancel: &CancellationToken,
    ) -> SessionResult<()> {
        self.state.ensure_can_open()?;
        if cancel.is_cancelled() {
            return Err(SessionError::Cancelled);
        }

        options.validate_durations()?;
        let session_id = options.resolve_session_id()?;
        let retry = RetryState::initial(
            session_id.clone(),
            options.maximum_commit_duration(),
            options.commit_delay_increment(),
            None,
        )
        .map_err(|_| UsageError::DurationOutOfRange {
            name: "maximum_commit_duration",
        })?;

        let mut transaction = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SessionError::Cancelled),
            transaction = self.outbox.begin_transaction(options.hints()) => transaction?,
        };

        let attached = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            attached = self.storage.try_attach(&mut transaction, options.hints()) => Some(attached),
        };
        match attached {
            Some(Ok(true)) => {}
            Some(Ok(false)) => {
                return Err(self.abandon_open(SessionError::Incompatible(
                    "the synchronized storage session cannot join the outbox transaction".into(),
                )));
            }
            Some(Err(err)) => return Err(self.abandon_open(err.into())),
            None => return Err(self.abandon_open(SessionError::Cancelled)),
        }

        debug!(session_id = %session_id, "opened outbox session");
        self.opened = Some(Opened {
            session_id,
            retry,
            options,
            transaction: Some(transaction),
        });
        self.state = SessionState::Open;
        Ok(())
    }

    async fn send(
        &mut self,
        message: OutgoingMessage,
        options: SendOptions,
        cancel: &CancellationToken,
    ) -> SessionResult<()> {
        self.state.ensure_open()?;
        if cancel.is_cancelled() {
            return Err(SessionError::Cancelled);
        }
        self.sender
            .send(message, options, Some(&mut self.batch))
            .await
    }

    async fn publish(
        &mut self,
        message: OutgoingMessage,
        options: PublishOptions,
        cancel: &CancellationToken,
    ) -> SessionResult<()> {
        self.state.ensure_open()?;
        if cancel.is_cancelled() {
            return Err(SessionError::Cancelled);
        }
        self.sender
            .publish(message, options, Some(&mut self.batch))
            .await
    }

    async fn commit(&mut self, cancel: &CancellationToken) -> SessionResult<()> {
        self.state.ensure_open()?;
        let span = info_span!(
            "commit",
            session_id = self.session_id().unwrap_or_default(),
            processor = %self.processor_address,
        );
        self.run_commit(cancel).instrument(span).await
    }

    fn dispose(&mut self) {
        if self.state == SessionState::Disposed {
            return;
        }
        self.release();
        self.state = SessionState::Disposed;
    }
}

impl<O, S> Drop for OutboxSession<O, S>
where
    O: OutboxStorage,
    S: SynchronizedStorageSession<Transaction = O::Transaction>,
{
    fn drop(&mut self) {
        self.release();
    }
}
