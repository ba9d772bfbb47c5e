//! Error types for gridsync-core.

use thiserror::Error;

use crate::types::RecordId;

/// All errors that can arise from grid or relational store calls.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No record exists for the requested id.
    #[error("record {0} not found")]
    NotFound(RecordId),

    /// A record or grid row with this id already exists.
    #[error("row with ID {0} already exists")]
    Duplicate(RecordId),

    /// The store rejected a write (null key, bad column value, ...).
    #[error("constraint violation: {0}")]
    Constraint(String),

    /// Every pooled connection is checked out.
    #[error("connection pool exhausted")]
    PoolExhausted,

    /// The store (or its notification channel) has been shut down.
    #[error("store closed: {0}")]
    Closed(&'static str),

    /// Transport or backend failure reported by the store itself.
    #[error("backend error: {0}")]
    Backend(String),

    /// Payload encoding error (notification bodies).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
