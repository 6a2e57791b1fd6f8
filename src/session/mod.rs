//! Transactional sessions.
//!
//! A session batches outgoing sends and publishes together with one
//! business-data mutation and makes them visible all together on commit.
//!
//! ```text
//!   Unopened ──open──▶ Open ──commit──▶ Committed
//!      │                │  └──commit fails──▶ Failed
//!      └────────────────┴──────dispose───────▶ Disposed
//! ```
//!
//! An open that fails after reaching the storage session also ends in
//! `Disposed`. The storage session is released exactly once per session.
//!
//! Two variants exist:
//!
//! - [`OutboxSession`]: dispatches a control message to the processor, then
//!   stores the batch as an outbox record in the same transaction as the
//!   business mutation. The processor dispatches the batch once the record
//!   is durable.
//! - [`PlainSession`]: completes the business mutation, then dispatches the
//!   batch directly. Messages can be lost if the dispatch fails after the
//!   data store completed.

mod factory;
mod options;
mod outbox_session;
mod plain_session;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::bus::{OutgoingMessage, PendingOperations, PublishOptions, SendOptions};
use crate::error::{SessionResult, UsageError};

pub use factory::SessionFactory;
pub use options::{Extensions, OpenOptions};
pub use outbox_session::OutboxSession;
pub use plain_session::PlainSession;

/// Where a session is in its lifecycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    Unopened,
    Open,
    Committed,
    /// Commit was attempted and failed; only dispose is allowed.
    Failed,
    Disposed,
}

impl SessionState {
    pub(crate) fn ensure_can_open(self) -> Result<(), UsageError> {
        match self {
            SessionState::Unopened => Ok(()),
            SessionState::Open => Err(UsageError::AlreadyOpen),
            other => other.ensure_open(),
        }
    }

    pub(crate) fn ensure_open(self) -> Result<(), UsageError> {
        match self {
            SessionState::Open => Ok(()),
            SessionState::Unopened => Err(UsageError::NotOpen),
            SessionState::Committed => Err(UsageError::AlreadyCommitted),
            SessionState::Failed => Err(UsageError::CommitFailed),
            SessionState::Disposed => Err(UsageError::Disposed),
        }
    }
}

/// One logical unit of work. Not meant for concurrent use.
#[async_trait]
pub trait TransactionalSession: Send {
    /// The session id, available once the session is open.
    fn session_id(&self) -> Option<&str>;

    fn state(&self) -> SessionState;

    /// Operations batched so far, in call order.
    fn pending_operations(&self) -> &PendingOperations;

    async fn open(&mut self, options: OpenOptions, cancel: &CancellationToken)
        -> SessionResult<()>;

    async fn send(
        &mut self,
        message: OutgoingMessage,
        options: SendOptions,
        cancel: &CancellationToken,
    ) -> SessionResult<()>;

    async fn publish(
        &mut self,
        message: OutgoingMessage,
        options: PublishOptions,
        cancel: &CancellationToken,
    ) -> SessionResult<()>;

    async fn commit(&mut self, cancel: &CancellationToken) -> SessionResult<()>;

    /// Release storage handles. Safe to call more than once, in any state.
    fn dispose(&mut self);

    fn is_committed(&self) -> bool {
        self.state() == SessionState::Committed
    }
}
