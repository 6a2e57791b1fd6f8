use thiserror::Error;

use crate::bus::TransportError;
use crate::control::CodecError;
use crate::storage::StorageError;

/// Caller bugs: the session or configuration was used incorrectly.
///
/// These are never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UsageError {
    #[error("the session has not been opened")]
    NotOpen,
    #[error("the session is already open")]
    AlreadyOpen,
    #[error("the session has already been committed")]
    AlreadyCommitted,
    #[error("the session failed to commit and can only be disposed")]
    CommitFailed,
    #[error("the session has been disposed")]
    Disposed,
    #[error("{name} must not be negative")]
    NegativeDuration { name: &'static str },
    #[error("{name} must be greater than zero")]
    ZeroDuration { name: &'static str },
    #[error("{name} is too large")]
    DurationOutOfRange { name: &'static str },
    #[error("the outbox is disabled for this endpoint")]
    OutboxDisabled,
    #[error("a processor address is required for send-only endpoints using the outbox")]
    MissingProcessorAddress,
    #[error("a processor address can only be configured when the outbox is enabled")]
    ProcessorAddressWithoutOutbox,
    #[error("invalid session id: {0}")]
    InvalidSessionId(String),
    #[error("no destination could be resolved for message type {0}")]
    UnroutableMessage(String),
}

/// Errors surfaced by the transactional session API.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Usage(#[from] UsageError),

    /// The synchronized storage session could not join the outbox transaction.
    #[error("storage and outbox are not compatible: {0}")]
    Incompatible(String),

    #[error("storage error: {0}")]
    Storage(StorageError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("operation cancelled")]
    Cancelled,
}

impl SessionError {
    /// Whether the caller can reasonably retry the whole unit of work.
    ///
    /// Outbox conflicts and storage/transport failures during commit are
    /// transient; usage and compatibility errors are not.
    pub fn is_transient(&self) -> bool {
        match self {
            SessionError::Storage(StorageError::Incompatible(_)) => false,
            SessionError::Storage(_) | SessionError::Transport(_) => true,
            SessionError::Usage(_) | SessionError::Incompatible(_) | SessionError::Cancelled => {
                false
            }
        }
    }

    pub fn is_usage(&self) -> bool {
        matches!(self, SessionError::Usage(_))
    }
}

impl From<StorageError> for SessionError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Incompatible(reason) => SessionError::Incompatible(reason),
            other => SessionError::Storage(other),
        }
    }
}

/// A genuine failure while processing a received message.
///
/// The retry-in-progress signal is not an error and never becomes one of
/// these.
#[derive(Error, Debug)]
pub enum ProcessingError {
    #[error("handler failed: {0}")]
    Handler(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("malformed control message: {0}")]
    Codec(#[from] CodecError),
}

pub type SessionResult<T> = Result<T, SessionError>;
pub type ProcessingResult<T> = Result<T, ProcessingError>;
