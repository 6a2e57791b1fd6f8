pub mod bus;
mod config;
pub mod control;
mod error;
pub mod processor;
pub mod session;
pub mod storage;

pub use bus::{
    Destination, Dispatcher, Listener, MessageSender, OutgoingMessage, PublishOptions,
    SendOptions, TransportMessage,
};
pub use config::{ConfigError, SessionConfig};
pub use control::{CommitOutcome, OutcomeObserver, RecordingObserver, TracingObserver};
pub use error::{
    ProcessingError, ProcessingResult, SessionError, SessionResult, UsageError,
};
pub use processor::{MessageHandler, Processor, ProcessorHandle, ProcessorStats};
pub use session::{
    OpenOptions, OutboxSession, PlainSession, SessionFactory, SessionState, TransactionalSession,
};
pub use storage::{InMemoryPersistence, PersistenceHints, StorageError};

// Re-export the EventEmitter from the event_emitter_rs crate
#[cfg(feature = "emitter")]
pub use event_emitter_rs::EventEmitter;

pub use tokio_util::sync::CancellationToken;
