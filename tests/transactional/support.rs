//! Fixtures shared by the transactional session tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use transactional_session::bus::{
    Destination, Dispatcher, InMemoryTransport, TransportError, TransportMessage,
    TransportOperation,
};
use transactional_session::processor::MessageHandler;
use transactional_session::storage::{
    InMemoryPersistence, OutboxRecord, OutboxStorage, OutboxTransaction, PersistenceHints,
    StorageError, StorageSessionProvider, SynchronizedStorageSession,
};
use transactional_session::{
    ProcessingError, RecordingObserver, SessionConfig, SessionFactory,
};

/// Install a fmt subscriber once; honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Poll `check` until it holds or `timeout` passes.
pub async fn eventually(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}

/// An endpoint whose input queue is also the processor address.
pub struct Endpoint {
    pub config: SessionConfig,
    pub transport: InMemoryTransport,
    pub persistence: InMemoryPersistence,
    pub observer: RecordingObserver,
    pub factory: SessionFactory<InMemoryPersistence>,
}

impl Endpoint {
    pub fn new(config: SessionConfig) -> Self {
        let transport = InMemoryTransport::new();
        let persistence = InMemoryPersistence::new();
        let factory = SessionFactory::new(
            config.clone(),
            persistence.clone(),
            Arc::new(transport.clone()),
        )
        .unwrap();
        Self {
            config,
            transport,
            persistence,
            observer: RecordingObserver::new(),
            factory,
        }
    }

    pub fn orders() -> Self {
        Self::new(
            SessionConfig::new()
                .with_local_address("orders")
                .with_route("ChargeCard", "billing")
                .with_route("OrderPlaced", "orders"),
        )
    }
}

/// Records the message ids a handler saw.
#[derive(Clone, Default)]
pub struct CountingHandler {
    seen: Arc<Mutex<Vec<String>>>,
}

impl CountingHandler {
    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageHandler for CountingHandler {
    async fn handle(&self, message: &TransportMessage) -> Result<(), ProcessingError> {
        self.seen.lock().unwrap().push(message.id.clone());
        Ok(())
    }
}

/// Ordered log of calls made to the scripted adapters.
#[derive(Clone, Default)]
pub struct Journal {
    entries: Arc<Mutex<Vec<String>>>,
}

impl Journal {
    pub fn push(&self, entry: impl Into<String>) {
        self.entries.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().unwrap().clone()
    }

    pub fn count(&self, entry: &str) -> usize {
        self.entries().iter().filter(|e| *e == entry).count()
    }

    pub fn position(&self, entry: &str) -> Option<usize> {
        self.entries().iter().position(|e| e == entry)
    }
}

/// Dispatcher that journals each operation before handing it to a transport.
pub struct JournalDispatcher {
    pub journal: Journal,
    pub transport: InMemoryTransport,
}

#[async_trait]
impl Dispatcher for JournalDispatcher {
    async fn dispatch(&self, operations: Vec<TransportOperation>) -> Result<(), TransportError> {
        for operation in &operations {
            let target = match &operation.destination {
                Destination::Queue(queue) => queue.clone(),
                Destination::Topic(topic) => topic.clone(),
            };
            self.journal.push(format!("dispatch {}", target));
        }
        self.transport.dispatch(operations).await
    }
}

/// Outbox and storage adapter that journals calls and can be told to fail.
#[derive(Clone, Default)]
pub struct ScriptedPersistence {
    pub journal: Journal,
    pub fail_store: bool,
    pub refuse_attach: bool,
    /// `try_attach` and `open` never return.
    pub stall: bool,
    pub committed: Arc<AtomicBool>,
}

impl ScriptedPersistence {
    pub fn was_committed(&self) -> bool {
        self.committed.load(Ordering::SeqCst)
    }
}

pub struct ScriptedTransaction {
    journal: Journal,
    committed: Arc<AtomicBool>,
}

#[async_trait]
impl OutboxTransaction for ScriptedTransaction {
    async fn commit(&mut self) -> Result<(), StorageError> {
        self.journal.push("commit");
        self.committed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

impl Drop for ScriptedTransaction {
    fn drop(&mut self) {
        if !self.committed.load(Ordering::SeqCst) {
            self.journal.push("rollback");
        }
    }
}

#[async_trait]
impl OutboxStorage for ScriptedPersistence {
    type Transaction = ScriptedTransaction;

    async fn begin_transaction(
        &self,
        _hints: &PersistenceHints,
    ) -> Result<Self::Transaction, StorageError> {
        self.journal.push("begin");
        Ok(ScriptedTransaction {
            journal: self.journal.clone(),
            committed: Arc::clone(&self.committed),
        })
    }

    async fn store(
        &self,
        _record: OutboxRecord,
        _transaction: &mut Self::Transaction,
    ) -> Result<(), StorageError> {
        self.journal.push("store");
        if self.fail_store {
            return Err(StorageError::Backend("outbox table unavailable".into()));
        }
        Ok(())
    }

    async fn get(&self, _id: &str) -> Result<Option<OutboxRecord>, StorageError> {
        Ok(None)
    }

    async fn set_as_dispatched(&self, _id: &str) -> Result<(), StorageError> {
        Ok(())
    }
}

pub struct ScriptedStorageSession {
    journal: Journal,
    refuse_attach: bool,
    stall: bool,
}

#[async_trait]
impl SynchronizedStorageSession for ScriptedStorageSession {
    type Transaction = ScriptedTransaction;

    async fn try_attach(
        &mut self,
        _transaction: &mut Self::Transaction,
        _hints: &PersistenceHints,
    ) -> Result<bool, StorageError> {
        self.journal.push("attach");
        if self.stall {
            std::future::pending::<()>().await;
        }
        Ok(!self.refuse_attach)
    }

    async fn open(&mut self, _hints: &PersistenceHints) -> Result<(), StorageError> {
        self.journal.push("open");
        if self.stall {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn complete(&mut self) -> Result<(), StorageError> {
        self.journal.push("complete");
        Ok(())
    }

    fn dispose(&mut self) {
        self.journal.push("dispose");
    }
}

impl StorageSessionProvider for ScriptedPersistence {
    type Session = ScriptedStorageSession;

    fn create_session(&self) -> Self::Session {
        ScriptedStorageSession {
            journal: self.journal.clone(),
            refuse_attach: self.refuse_attach,
            stall: self.stall,
        }
    }
}
