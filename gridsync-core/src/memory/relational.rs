use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};

use crate::error::StoreError;
use crate::store::{Notification, NotificationStream, RelationalStore, RelationalTx};
use crate::types::{BatchId, ChangeNotice, Operation, Record, RecordId};

/// Channel the `users` change trigger notifies on.
pub const DEFAULT_CHANNEL: &str = "user_change";

/// Connections in the pool when none is configured.
pub const DEFAULT_POOL_SIZE: usize = 10;

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
struct TableState {
    records: BTreeMap<RecordId, Record>,
    listeners: Vec<(String, mpsc::UnboundedSender<Notification>)>,
}

#[derive(Debug)]
struct Shared {
    table: Mutex<TableState>,
    pool: Arc<Semaphore>,
    channel: String,
}

/// In-memory relational store with transactional writes and a change
/// trigger that notifies on commit.
#[derive(Debug, Clone)]
pub struct MemoryRelational {
    shared: Arc<Shared>,
}

impl Default for MemoryRelational {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRelational {
    pub fn new() -> Self {
        Self::with_options(DEFAULT_CHANNEL, DEFAULT_POOL_SIZE)
    }

    pub fn with_options(channel: &str, pool_size: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                table: Mutex::new(TableState::default()),
                pool: Arc::new(Semaphore::new(pool_size.max(1))),
                channel: channel.to_owned(),
            }),
        }
    }

    /// Seed records without firing the change trigger.
    pub fn with_records(self, records: impl IntoIterator<Item = Record>) -> Self {
        {
            let mut table = self.lock();
            for record in records {
                table.records.insert(record.id, record);
            }
        }
        self
    }

    /// Every record, ordered by id.
    pub fn snapshot(&self) -> Vec<Record> {
        self.lock().records.values().cloned().collect()
    }

    /// Connections currently free in the pool.
    pub fn available_connections(&self) -> usize {
        self.shared.pool.available_permits()
    }

    /// Deliver a raw payload on the trigger channel, bypassing the table.
    pub fn notify_raw(&self, payload: impl Into<String>) {
        let payload = payload.into();
        let mut table = self.lock();
        deliver(&mut table, &self.shared.channel, vec![payload]);
    }

    fn lock(&self) -> MutexGuard<'_, TableState> {
        self.shared
            .table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn deliver(table: &mut TableState, channel: &str, payloads: Vec<String>) {
    table.listeners.retain(|(_, tx)| !tx.is_closed());
    for payload in payloads {
        for (listening, tx) in &table.listeners {
            if listening == channel {
                let _ = tx.send(Notification {
                    channel: channel.to_owned(),
                    payload: payload.clone(),
                });
            }
        }
    }
}

#[async_trait]
impl RelationalStore for MemoryRelational {
    async fn begin(&self, origin: Option<BatchId>) -> Result<Box<dyn RelationalTx>, StoreError> {
        let permit = tokio::time::timeout(ACQUIRE_TIMEOUT, self.shared.pool.clone().acquire_owned())
            .await
            .map_err(|_| StoreError::PoolExhausted)?
            .map_err(|_| StoreError::Closed("connection pool"))?;
        let working = self.lock().records.clone();
        tracing::trace!(origin = ?origin, "transaction started");
        Ok(Box::new(MemoryTx {
            shared: self.shared.clone(),
            working,
            staged: Vec::new(),
            origin,
            _permit: permit,
        }))
    }

    async fn list(&self) -> Result<Vec<Record>, StoreError> {
        Ok(self.snapshot())
    }

    async fn find(&self, id: RecordId) -> Result<Option<Record>, StoreError> {
        Ok(self.lock().records.get(&id).cloned())
    }

    async fn listen(&self, channel: &str) -> Result<NotificationStream, StoreError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().listeners.push((channel.to_owned(), tx));
        Ok(rx)
    }
}

#[derive(Debug)]
enum Staged {
    Insert(Record),
    Update(Record),
    Delete(Record),
}

/// Writes are staged against a private copy of the table and replayed onto
/// the shared table on commit. The pooled connection is held until the
/// transaction is committed, rolled back, or dropped.
struct MemoryTx {
    shared: Arc<Shared>,
    working: BTreeMap<RecordId, Record>,
    staged: Vec<Staged>,
    origin: Option<BatchId>,
    _permit: OwnedSemaphorePermit,
}

#[async_trait]
impl RelationalTx for MemoryTx {
    async fn find(&mut self, id: RecordId) -> Result<Option<Record>, StoreError> {
        Ok(self.working.get(&id).cloned())
    }

    async fn insert(&mut self, record: &Record) -> Result<Record, StoreError> {
        if self.working.contains_key(&record.id) {
            return Err(StoreError::Duplicate(record.id));
        }
        self.working.insert(record.id, record.clone());
        self.staged.push(Staged::Insert(record.clone()));
        Ok(record.clone())
    }

    async fn update(&mut self, record: &Record) -> Result<Option<Record>, StoreError> {
        let Some(existing) = self.working.get_mut(&record.id) else {
            return Ok(None);
        };
        *existing = record.clone();
        self.staged.push(Staged::Update(record.clone()));
        Ok(Some(record.clone()))
    }

    async fn delete(&mut self, id: RecordId) -> Result<(), StoreError> {
        if let Some(old) = self.working.remove(&id) {
            self.staged.push(Staged::Delete(old));
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryTx {
            shared,
            staged,
            origin,
            ..
        } = *self;

        let mut payloads = Vec::with_capacity(staged.len());
        let mut table = shared.table.lock().unwrap_or_else(PoisonError::into_inner);
        for change in staged {
            let (operation, record) = match change {
                Staged::Insert(record) => {
                    table.records.insert(record.id, record.clone());
                    (Operation::Insert, record)
                }
                Staged::Update(record) => {
                    table.records.insert(record.id, record.clone());
                    (Operation::Update, record)
                }
                Staged::Delete(record) => {
                    table.records.remove(&record.id);
                    (Operation::Delete, record)
                }
            };
            let notice = ChangeNotice::from_record(operation, &record, origin);
            payloads.push(serde_json::to_string(&notice)?);
        }
        deliver(&mut table, &shared.channel, payloads);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        tracing::trace!(origin = ?self.origin, staged = self.staged.len(), "transaction rolled back");
        Ok(())
    }
}
