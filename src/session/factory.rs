use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::options::OpenOptions;
use super::outbox_session::OutboxSession;
use super::plain_session::PlainSession;
use super::TransactionalSession;
use crate::bus::{Dispatcher, MessageSender};
use crate::config::SessionConfig;
use crate::error::{SessionResult, UsageError};
use crate::storage::{OutboxStorage, StorageSessionProvider, SynchronizedStorageSession};

/// Creates sessions for one endpoint from its configuration and adapters.
pub struct SessionFactory<P> {
    config: SessionConfig,
    persistence: Arc<P>,
    sender: MessageSender,
    processor_address: Option<String>,
}

impl<P> SessionFactory<P>
where
    P: OutboxStorage + StorageSessionProvider + 'static,
    P::Session: SynchronizedStorageSession<Transaction = P::Transaction>,
{
    /// Validate `config` and build a factory.
    pub fn new(
        config: SessionConfig,
        persistence: P,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Result<Self, UsageError> {
        config.validate()?;
        let processor_address = if config.outbox_enabled {
            Some(config.resolved_processor_address()?)
        } else {
            None
        };
        let sender = MessageSender::from_config(&config, dispatcher);

        Ok(Self {
            config,
            persistence: Arc::new(persistence),
            sender,
            processor_address,
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn sender(&self) -> &MessageSender {
        &self.sender
    }

    pub fn persistence(&self) -> &Arc<P> {
        &self.persistence
    }

    /// Open options pre-filled with the configured commit durations.
    pub fn open_options(&self) -> OpenOptions {
        OpenOptions::from_config(&self.config)
    }

    /// An unopened outbox-backed session.
    pub fn outbox_session(&self) -> Result<OutboxSession<P, P::Session>, UsageError> {
        let processor_address = self
            .processor_address
            .clone()
            .ok_or(UsageError::OutboxDisabled)?;
        Ok(OutboxSession::new(
            Arc::clone(&self.persistence),
            self.persistence.create_session(),
            self.sender.clone(),
            processor_address,
        ))
    }

    /// An unopened session that dispatches directly on commit.
    pub fn plain_session(&self) -> PlainSession<P::Session> {
        PlainSession::new(self.persistence.create_session(), self.sender.clone())
    }

    /// An unopened session of the variant the configuration selects.
    pub fn session(&self) -> Box<dyn TransactionalSession> {
        match self.outbox_session() {
            Ok(session) => Box::new(session),
            Err(_) => Box::new(self.plain_session()),
        }
    }

    pub async fn open_outbox_session(
        &self,
        options: OpenOptions,
        cancel: &CancellationToken,
    ) -> SessionResult<OutboxSession<P, P::Session>> {
        let mut session = self.outbox_session()?;
        session.open(options, cancel).await?;
        Ok(session)
    }

    pub async fn open_plain_session(
        &self,
        options: OpenOptions,
        cancel: &CancellationToken,
    ) -> SessionResult<PlainSession<P::Session>> {
        let mut session = self.plain_session();
        session.open(options, cancel).await?;
        Ok(session)
    }
}
