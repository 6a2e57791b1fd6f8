//! In-memory persistence implementing both the outbox and the synchronized
//! storage session.
//!
//! Clones share the same storage (thread-safe via `Arc<RwLock<...>>`).
//! Outbox ids are unique: committing a second record under an existing id
//! fails with [`StorageError::Conflict`] and nothing in that transaction is
//! applied.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use tracing::debug;

use super::record::OutboxRecord;
use super::{
    OutboxStorage, OutboxTransaction, PersistenceHints, StorageError, StorageSessionProvider,
    SynchronizedStorageSession,
};

#[derive(Clone, Debug)]
enum Write {
    Put { key: String, value: Vec<u8> },
    Delete { key: String },
    Outbox { id: String, encoded: Vec<u8> },
}

#[derive(Default)]
struct State {
    documents: HashMap<String, Vec<u8>>,
    outbox: HashMap<String, Vec<u8>>,
}

#[derive(Default)]
struct Faults {
    store: Option<String>,
    complete: Option<String>,
    commit: Option<String>,
}

#[derive(Default)]
struct Shared {
    state: RwLock<State>,
    faults: Mutex<Faults>,
}

impl Shared {
    fn take_fault(&self, pick: impl FnOnce(&mut Faults) -> Option<String>) -> Option<String> {
        let mut faults = self.faults.lock().unwrap_or_else(PoisonError::into_inner);
        pick(&mut faults)
    }

    fn apply(&self, writes: Vec<Write>) -> Result<(), StorageError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| StorageError::LockPoisoned("commit"))?;

        let mut seen = HashSet::new();
        for write in &writes {
            if let Write::Outbox { id, .. } = write {
                if state.outbox.contains_key(id) || !seen.insert(id.clone()) {
                    return Err(StorageError::Conflict { id: id.clone() });
                }
            }
        }

        for write in writes {
            match write {
                Write::Put { key, value } => {
                    state.documents.insert(key, value);
                }
                Write::Delete { key } => {
                    state.documents.remove(&key);
                }
                Write::Outbox { id, encoded } => {
                    state.outbox.insert(id, encoded);
                }
            }
        }
        Ok(())
    }
}

/// In-memory data store plus outbox.
#[derive(Clone, Default)]
pub struct InMemoryPersistence {
    shared: Arc<Shared>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed value of a document.
    pub fn document(&self, key: &str) -> Option<Vec<u8>> {
        self.shared
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .documents
            .get(key)
            .cloned()
    }

    /// Committed value of a document written under a partition key.
    pub fn document_in(&self, partition: &str, key: &str) -> Option<Vec<u8>> {
        self.document(&partition_key(Some(partition), key))
    }

    pub fn document_count(&self) -> usize {
        self.shared
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .documents
            .len()
    }

    /// Number of committed outbox records, tombstones included.
    pub fn outbox_len(&self) -> usize {
        self.shared
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .outbox
            .len()
    }

    /// Make the next `store` call fail.
    pub fn fail_next_store(&self, reason: impl Into<String>) {
        self.shared.take_fault(|f| f.store.replace(reason.into()));
    }

    /// Make the next storage-session `complete` call fail.
    pub fn fail_next_complete(&self, reason: impl Into<String>) {
        self.shared.take_fault(|f| f.complete.replace(reason.into()));
    }

    /// Make the next transaction `commit` call fail.
    pub fn fail_next_commit(&self, reason: impl Into<String>) {
        self.shared.take_fault(|f| f.commit.replace(reason.into()));
    }
}

/// Outbox transaction over [`InMemoryPersistence`].
///
/// Writes are buffered and applied atomically on commit; dropping an
/// uncommitted transaction discards them.
pub struct InMemoryTransaction {
    owner: Arc<Shared>,
    writes: Arc<Mutex<Vec<Write>>>,
    committed: bool,
}

impl InMemoryTransaction {
    pub fn is_committed(&self) -> bool {
        self.committed
    }

    fn push(&self, write: Write) -> Result<(), StorageError> {
        self.writes
            .lock()
            .map_err(|_| StorageError::LockPoisoned("transaction write"))?
            .push(write);
        Ok(())
    }
}

#[async_trait]
impl OutboxTransaction for InMemoryTransaction {
    async fn commit(&mut self) -> Result<(), StorageError> {
        if self.committed {
            return Ok(());
        }
        if let Some(reason) = self.owner.take_fault(|f| f.commit.take()) {
            return Err(StorageError::Backend(reason));
        }

        let writes = std::mem::take(
            &mut *self
                .writes
                .lock()
                .map_err(|_| StorageError::LockPoisoned("transaction commit"))?,
        );
        self.owner.apply(writes)?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for InMemoryTransaction {
    fn drop(&mut self) {
        if !self.committed {
            let discarded = self.writes.lock().map(|w| w.len()).unwrap_or(0);
            if discarded > 0 {
                debug!(discarded, "rolled back in-memory outbox transaction");
            }
        }
    }
}

#[async_trait]
impl OutboxStorage for InMemoryPersistence {
    type Transaction = InMemoryTransaction;

    async fn begin_transaction(
        &self,
        _hints: &PersistenceHints,
    ) -> Result<Self::Transaction, StorageError> {
        Ok(InMemoryTransaction {
            owner: Arc::clone(&self.shared),
            writes: Arc::new(Mutex::new(Vec::new())),
            committed: false,
        })
    }

    async fn store(
        &self,
        record: OutboxRecord,
        transaction: &mut Self::Transaction,
    ) -> Result<(), StorageError> {
        if let Some(reason) = self.shared.take_fault(|f| f.store.take()) {
            return Err(StorageError::Backend(reason));
        }
        if !Arc::ptr_eq(&transaction.owner, &self.shared) {
            return Err(StorageError::Incompatible(
                "transaction belongs to a different store".into(),
            ));
        }
        let encoded = record.encode()?;
        transaction.push(Write::Outbox {
            id: record.id,
            encoded,
        })
    }

    async fn get(&self, id: &str) -> Result<Option<OutboxRecord>, StorageError> {
        let state = self
            .shared
            .state
            .read()
            .map_err(|_| StorageError::LockPoisoned("outbox read"))?;
        match state.outbox.get(id) {
            Some(bytes) => Ok(Some(OutboxRecord::decode(bytes)?)),
            None => Ok(None),
        }
    }

    async fn set_as_dispatched(&self, id: &str) -> Result<(), StorageError> {
        let mut state = self
            .shared
            .state
            .write()
            .map_err(|_| StorageError::LockPoisoned("outbox write"))?;
        if let Some(bytes) = state.outbox.get_mut(id) {
            let mut record = OutboxRecord::decode(bytes)?;
            record.mark_dispatched();
            *bytes = record.encode()?;
        }
        Ok(())
    }
}

impl StorageSessionProvider for InMemoryPersistence {
    type Session = InMemoryStorageSession;

    fn create_session(&self) -> Self::Session {
        InMemoryStorageSession {
            owner: Arc::clone(&self.shared),
            mode: Mode::Closed,
            partition: None,
            staged: Vec::new(),
        }
    }
}

enum Mode {
    Closed,
    Attached(Arc<Mutex<Vec<Write>>>),
    Standalone,
}

/// Business-data session over [`InMemoryPersistence`].
///
/// Mutations are staged with [`put`](Self::put)/[`delete`](Self::delete)
/// and flushed by `complete`.
pub struct InMemoryStorageSession {
    owner: Arc<Shared>,
    mode: Mode,
    partition: Option<String>,
    staged: Vec<Write>,
}

impl InMemoryStorageSession {
    pub fn put(&mut self, key: &str, value: impl Into<Vec<u8>>) -> Result<(), StorageError> {
        self.ensure_open()?;
        self.staged.push(Write::Put {
            key: partition_key(self.partition.as_deref(), key),
            value: value.into(),
        });
        Ok(())
    }

    pub fn delete(&mut self, key: &str) -> Result<(), StorageError> {
        self.ensure_open()?;
        self.staged.push(Write::Delete {
            key: partition_key(self.partition.as_deref(), key),
        });
        Ok(())
    }

    /// Number of mutations staged and not yet completed.
    pub fn staged_len(&self) -> usize {
        self.staged.len()
    }

    pub fn is_attached(&self) -> bool {
        matches!(self.mode, Mode::Attached(_))
    }

    fn ensure_open(&self) -> Result<(), StorageError> {
        match self.mode {
            Mode::Closed => Err(StorageError::Backend("storage session is not open".into())),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl SynchronizedStorageSession for InMemoryStorageSession {
    type Transaction = InMemoryTransaction;

    async fn try_attach(
        &mut self,
        transaction: &mut Self::Transaction,
        hints: &PersistenceHints,
    ) -> Result<bool, StorageError> {
        if !Arc::ptr_eq(&transaction.owner, &self.owner) {
            return Ok(false);
        }
        self.partition = hints.partition_key.clone();
        self.mode = Mode::Attached(Arc::clone(&transaction.writes));
        Ok(true)
    }

    async fn open(&mut self, hints: &PersistenceHints) -> Result<(), StorageError> {
        self.partition = hints.partition_key.clone();
        self.mode = Mode::Standalone;
        Ok(())
    }

    async fn complete(&mut self) -> Result<(), StorageError> {
        if let Some(reason) = self.owner.take_fault(|f| f.complete.take()) {
            return Err(StorageError::Backend(reason));
        }
        let staged = std::mem::take(&mut self.staged);
        match &self.mode {
            Mode::Closed => Err(StorageError::Backend("storage session is not open".into())),
            Mode::Attached(writes) => {
                writes
                    .lock()
                    .map_err(|_| StorageError::LockPoisoned("storage session complete"))?
                    .extend(staged);
                Ok(())
            }
            Mode::Standalone => self.owner.apply(staged),
        }
    }

    fn dispose(&mut self) {
        self.staged.clear();
        self.mode = Mode::Closed;
    }
}

fn partition_key(partition: Option<&str>, key: &str) -> String {
    match partition {
        Some(partition) => format!("{}/{}", partition, key),
        None => key.to_string(),
    }
}
