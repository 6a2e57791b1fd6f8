use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use super::options::{Extensions, OpenOptions};
use super::{SessionState, TransactionalSession};
use crate::bus::{
    DispatchConsistency, MessageSender, OutgoingMessage, PendingOperations, PublishOptions,
    SendOptions,
};
use crate::error::{SessionError, SessionResult};
use crate::storage::SynchronizedStorageSession;

/// Session for endpoints without an outbox.
///
/// Commit completes the storage session and then dispatches the whole batch
/// in one transport call. If that dispatch fails the business mutation is
/// already durable and the messages are lost.
pub struct PlainSession<S: SynchronizedStorageSession> {
    storage: S,
    sender: MessageSender,
    state: SessionState,
    session_id: Option<String>,
    options: Option<OpenOptions>,
    batch: PendingOperations,
    released: bool,
}

impl<S: SynchronizedStorageSession> PlainSession<S> {
    pub fn new(storage: S, sender: MessageSender) -> Self {
        Self {
            storage,
            sender,
            state: SessionState::Unopened,
            session_id: None,
            options: None,
            batch: PendingOperations::new(),
            released: false,
        }
    }

    pub fn storage_session_mut(&mut self) -> SessionResult<&mut S> {
        self.state.ensure_open()?;
        Ok(&mut self.storage)
    }

    pub fn extensions(&self) -> Option<&Extensions> {
        self.options.as_ref().map(OpenOptions::extensions)
    }

    async fn run_commit(&mut self, cancel: &CancellationToken) -> SessionResult<()> {
        if cancel.is_cancelled() {
            return Err(SessionError::Cancelled);
        }

        if let Err(err) = self.storage.complete().await {
            return Err(self.fail(err.into()));
        }

        let operations: Vec<_> = self
            .batch
            .operations()
            .iter()
            .cloned()
            .map(|operation| operation.into_transport(DispatchConsistency::Default))
            .collect();
        if !operations.is_empty() {
            let dispatcher = Arc::clone(self.sender.dispatcher());
            if let Err(err) = dispatcher.dispatch(operations).await {
                return Err(self.fail(err.into()));
            }
        }

        self.release();
        self.state = SessionState::Committed;
        info!(operations = self.batch.len(), "committed session without outbox");
        Ok(())
    }

    fn fail(&mut self, err: SessionError) -> SessionError {
        warn!(error = %err, "session commit failed");
        self.release();
        self.state = SessionState::Failed;
        err
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.storage.dispose();
        }
    }

    fn abandon_open(&mut self, err: SessionError) -> SessionError {
        warn!(error = %err, "could not open session");
        self.release();
        self.state = SessionState::Disposed;
        err
    }
}

#[async_trait]
impl<S: SynchronizedStorageSession> TransactionalSession for PlainSession<S> {
    fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
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

        let session_id = options.resolve_session_id()?;
        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            opened = self.storage.open(options.hints()) => Some(opened),
        };
        match opened {
            Some(Ok(())) => {}
            Some(Err(err)) => return Err(self.abandon_open(err.into())),
            None => return Err(self.abandon_open(SessionError::Cancelled)),
        }

        self.session_id = Some(session_id);
        self.options = Some(options);
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
        let span = info_span!("commit", session_id = self.session_id().unwrap_or_default());
        self.run_commit(cancel).instrument(span).await
    }

    fn dispose(&mut self) {
        self.release();
        self.state = SessionState::Disposed;
    }
}

impl<S: SynchronizedStorageSession> Drop for PlainSession<S> {
    fn drop(&mut self) {
        self.release();
    }
}
