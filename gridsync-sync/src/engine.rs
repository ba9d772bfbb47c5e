//! Wires stores, broker, guard and workers into one running engine.
//!
//! This is the single entrypoint used by the daemon and by integration
//! tests.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use gridsync_core::memory::DEFAULT_CHANNEL;
use gridsync_core::{GridStore, RelationalStore};

use crate::direct::DirectEdits;
use crate::error::SyncError;
use crate::guard::{GuardSnapshot, ProvenanceGuard, DEFAULT_RECENT_CAPACITY};
use crate::listener::NotificationListener;
use crate::producer::{watch_completions, SyncProducer};
use crate::propagator::Propagator;
use crate::queue::{Broker, JobCounts, MemoryBroker, QueueName, QueueSettings};
use crate::reconciler::Reconciler;
use crate::row_index::RowIndex;
use crate::worker::run_worker;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOptions {
    pub queue: QueueSettings,
    /// Relational notification channel to listen on.
    pub channel: String,
    /// Finished batches the guard remembers.
    pub guard_capacity: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            queue: QueueSettings::default(),
            channel: DEFAULT_CHANNEL.to_string(),
            guard_capacity: DEFAULT_RECENT_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    pub queue: QueueName,
    #[serde(flatten)]
    pub counts: JobCounts,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineStatus {
    pub queues: Vec<QueueStatus>,
    pub guard: GuardSnapshot,
    pub bound_rows: usize,
}

pub struct SyncEngine {
    grid: Arc<dyn GridStore>,
    db: Arc<dyn RelationalStore>,
    broker: Arc<dyn Broker>,
    guard: Arc<ProvenanceGuard>,
    index: Arc<RowIndex>,
    producer: SyncProducer,
    direct: DirectEdits,
    options: EngineOptions,
}

impl SyncEngine {
    pub fn new(
        grid: Arc<dyn GridStore>,
        db: Arc<dyn RelationalStore>,
        broker: Arc<dyn Broker>,
        options: EngineOptions,
    ) -> Self {
        let guard = Arc::new(ProvenanceGuard::new(options.guard_capacity));
        let index = Arc::new(RowIndex::new());
        let producer = SyncProducer::new(broker.clone(), guard.clone());
        let direct = DirectEdits::new(grid.clone(), db.clone(), guard.clone(), index.clone());
        Self {
            grid,
            db,
            broker,
            guard,
            index,
            producer,
            direct,
            options,
        }
    }

    /// Engine backed by the in-process broker.
    pub fn with_memory_broker(
        grid: Arc<dyn GridStore>,
        db: Arc<dyn RelationalStore>,
        options: EngineOptions,
    ) -> Self {
        let broker = Arc::new(MemoryBroker::new(options.queue));
        Self::new(grid, db, broker, options)
    }

    pub fn producer(&self) -> &SyncProducer {
        &self.producer
    }

    pub fn direct(&self) -> &DirectEdits {
        &self.direct
    }

    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }

    pub fn guard(&self) -> &Arc<ProvenanceGuard> {
        &self.guard
    }

    pub fn index(&self) -> &Arc<RowIndex> {
        &self.index
    }

    /// Subscribe to notifications and spawn both workers, the listener and
    /// the completion watcher. Every task exits when `shutdown` fires.
    ///
    /// A failed subscription is returned before anything is spawned.
    pub async fn start(
        &self,
        shutdown: &broadcast::Sender<()>,
    ) -> Result<Vec<JoinHandle<()>>, SyncError> {
        let listener = NotificationListener::subscribe(
            self.db.clone(),
            &self.options.channel,
            self.producer.clone(),
        )
        .await?;

        let mut handles = Vec::with_capacity(4);
        handles.push(tokio::spawn(watch_completions(
            self.guard.clone(),
            self.broker.events(),
            shutdown.subscribe(),
        )));

        let reconciler = Arc::new(Reconciler::new(
            self.grid.clone(),
            self.db.clone(),
            self.index.clone(),
        ));
        handles.push(tokio::spawn(run_worker(
            self.broker.clone(),
            QueueName::GridToRelational,
            reconciler,
            self.options.queue,
            shutdown.subscribe(),
        )));

        let propagator = Arc::new(Propagator::new(self.grid.clone(), self.index.clone()));
        handles.push(tokio::spawn(run_worker(
            self.broker.clone(),
            QueueName::RelationalToGrid,
            propagator,
            self.options.queue,
            shutdown.subscribe(),
        )));

        handles.push(tokio::spawn(listener.run(shutdown.subscribe())));
        tracing::info!(channel = %self.options.channel, "sync engine started");
        Ok(handles)
    }

    pub async fn status(&self) -> Result<EngineStatus, SyncError> {
        let mut queues = Vec::with_capacity(QueueName::ALL.len());
        for queue in QueueName::ALL {
            queues.push(QueueStatus {
                queue,
                counts: self.broker.counts(queue).await?,
            });
        }
        Ok(EngineStatus {
            queues,
            guard: self.guard.snapshot(),
            bound_rows: self.index.bindings().len(),
        })
    }
}
