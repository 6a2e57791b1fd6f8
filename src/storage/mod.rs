//! Storage adapter contract.
//!
//! The core needs two things from persistence:
//!
//! - an idempotent outbox keyed by session id ([`OutboxStorage`]), whose
//!   transactions ([`OutboxTransaction`]) make the outbox record durable, and
//! - a synchronized storage session ([`SynchronizedStorageSession`]) that
//!   stages the business mutation and can be attached to an outbox
//!   transaction so both commit together.
//!
//! Store-specific concepts (partitions, containers, tables) reach the
//! adapter through [`PersistenceHints`].

mod in_memory;
mod record;

use async_trait::async_trait;
use thiserror::Error;

pub use in_memory::{InMemoryPersistence, InMemoryStorageSession, InMemoryTransaction};
pub use record::{OutboxOperation, OutboxRecord};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("an outbox record with id {id} already exists")]
    Conflict { id: String },
    /// The storage session cannot join the given outbox transaction.
    #[error("{0}")]
    Incompatible(String),
    #[error("storage lock poisoned during {0}")]
    LockPoisoned(&'static str),
    #[error("serialization failed: {0}")]
    Serialization(String),
    #[error("{0}")]
    Backend(String),
}

impl From<bitcode::Error> for StorageError {
    fn from(err: bitcode::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

/// Typed, optional store-specific settings for opening storage.
///
/// Each adapter reads the fields it understands and ignores the rest.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PersistenceHints {
    /// Partition the mutation and outbox record live in.
    pub partition_key: Option<String>,
    /// Container or collection name for document stores.
    pub container: Option<String>,
    /// Table name for table stores.
    pub table_name: Option<String>,
}

impl PersistenceHints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_partition_key(mut self, key: impl Into<String>) -> Self {
        self.partition_key = Some(key.into());
        self
    }

    pub fn with_container(mut self, container: impl Into<String>) -> Self {
        self.container = Some(container.into());
        self
    }

    pub fn with_table_name(mut self, table: impl Into<String>) -> Self {
        self.table_name = Some(table.into());
        self
    }
}

/// A unit of work in the outbox store. Dropping it without `commit` rolls
/// it back.
#[async_trait]
pub trait OutboxTransaction: Send {
    async fn commit(&mut self) -> Result<(), StorageError>;
}

/// Idempotent outbox store keyed by session id.
#[async_trait]
pub trait OutboxStorage: Send + Sync {
    type Transaction: OutboxTransaction + 'static;

    async fn begin_transaction(
        &self,
        hints: &PersistenceHints,
    ) -> Result<Self::Transaction, StorageError>;

    /// Stage `record` in `transaction`. Uniqueness of the id is enforced no
    /// later than the transaction commit.
    async fn store(
        &self,
        record: OutboxRecord,
        transaction: &mut Self::Transaction,
    ) -> Result<(), StorageError>;

    async fn get(&self, id: &str) -> Result<Option<OutboxRecord>, StorageError>;

    /// Mark every operation of the record as dispatched.
    async fn set_as_dispatched(&self, id: &str) -> Result<(), StorageError>;
}

/// Session over the business data store.
#[async_trait]
pub trait SynchronizedStorageSession: Send {
    type Transaction: Send;

    /// Attach to an outbox transaction. `Ok(false)` means the session cannot
    /// share that transaction.
    async fn try_attach(
        &mut self,
        transaction: &mut Self::Transaction,
        hints: &PersistenceHints,
    ) -> Result<bool, StorageError>;

    /// Open standalone, without an outbox transaction.
    async fn open(&mut self, hints: &PersistenceHints) -> Result<(), StorageError>;

    /// Flush the staged mutation: into the attached transaction, or straight
    /// to the store when standalone.
    async fn complete(&mut self) -> Result<(), StorageError>;

    /// Release the session. Safe to call more than once.
    fn dispose(&mut self);
}

/// Creates synchronized storage sessions for new transactional sessions.
pub trait StorageSessionProvider: Send + Sync {
    type Session: SynchronizedStorageSession + 'static;

    fn create_session(&self) -> Self::Session;
}
