//! # gridsync-sync
//!
//! Bidirectional sync engine between a grid and a relational store.
//!
//! Grid edits are queued as batches and reconciled transactionally by the
//! [`Reconciler`]; relational changes arrive as notifications and are
//! replayed onto the grid by the [`Propagator`]. [`SyncEngine`] wires both
//! directions together.

pub mod direct;
pub mod engine;
pub mod error;
pub mod guard;
pub mod jobs;
pub mod listener;
pub mod producer;
pub mod propagator;
pub mod queue;
pub mod reconciler;
pub mod row_index;
mod transaction;
pub mod worker;

pub use direct::DirectEdits;
pub use engine::{EngineOptions, EngineStatus, QueueStatus, SyncEngine};
pub use error::{QueueError, SyncError};
pub use guard::{GuardSnapshot, ProvenanceGuard};
pub use jobs::{ChangeCounts, JobOutcome, ProduceAck, PropagateJob, ReconcileJob, SheetTrigger};
pub use listener::{parse_notification, NotificationListener};
pub use producer::SyncProducer;
pub use propagator::Propagator;
pub use queue::{
    Broker, EnqueueOptions, JobCounts, JobId, JobRecord, JobState, MemoryBroker, NewJob, QueueEvent,
    QueueName, QueueSettings,
};
pub use reconciler::Reconciler;
pub use row_index::RowIndex;
pub use worker::{run_worker, JobHandler};
