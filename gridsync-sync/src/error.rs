//! Error types for gridsync-sync.

use thiserror::Error;

use gridsync_core::{Operation, RecordId, RowRange, StoreError};

use crate::queue::{JobId, QueueName};

/// Errors raised by a queue broker.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("job {job} not found on queue {queue}")]
    JobNotFound { queue: QueueName, job: JobId },

    /// The job was redelivered after a stall, or already finished, so the
    /// caller no longer owns it.
    #[error("lease on job {0} lost")]
    LeaseLost(JobId),

    #[error("queue {0} is closed")]
    Closed(QueueName),
}

/// All errors that can arise from producing or processing sync jobs.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A grid or relational store call failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The broker rejected an operation.
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    /// A job payload could not be encoded or decoded.
    #[error("malformed job payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("invalid row range {0}")]
    InvalidRange(RowRange),

    /// A grid row could not be turned into a record.
    #[error("row {row}: {reason}")]
    InvalidRow { row: u32, reason: String },

    #[error("header row is empty")]
    MissingHeader,

    #[error("{0} requires a record id")]
    MissingId(Operation),

    /// Ids below 1 map to no data row.
    #[error("record id {0} has no grid row")]
    UnplaceableId(RecordId),

    #[error("No data found")]
    NoData,

    /// Batch reconciliation failed and was rolled back.
    #[error("Data synchronization failed: {0}")]
    Reconcile(#[source] Box<SyncError>),
}

impl SyncError {
    pub(crate) fn reconcile(source: SyncError) -> Self {
        Self::Reconcile(Box::new(source))
    }
}
