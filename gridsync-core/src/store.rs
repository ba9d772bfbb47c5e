//! Contracts for the two stores kept in sync.
//!
//! The engine only talks to these traits. [`crate::memory`] provides
//! process-local implementations; networked adapters implement the same
//! traits.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::StoreError;
use crate::types::{BatchId, GridRow, Record, RecordId, DATA_START_ROW, HEADER_ROW};

// ---------------------------------------------------------------------------
// Grid
// ---------------------------------------------------------------------------

/// A block of whole rows in the grid, `start_row..=end_row` (open-ended when
/// `end_row` is `None`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridRange {
    pub start_row: u32,
    pub end_row: Option<u32>,
}

impl GridRange {
    pub fn header() -> Self {
        Self::row(HEADER_ROW)
    }

    /// Every data row.
    pub fn data() -> Self {
        Self {
            start_row: DATA_START_ROW,
            end_row: None,
        }
    }

    /// Header plus every data row.
    pub fn all() -> Self {
        Self {
            start_row: HEADER_ROW,
            end_row: None,
        }
    }

    pub fn row(row: u32) -> Self {
        Self {
            start_row: row,
            end_row: Some(row),
        }
    }

    /// A1 notation, e.g. `Sheet1!A2:D` or `Sheet1!A8:D8`.
    pub fn a1(&self, sheet: &str, last_column: char) -> String {
        match self.end_row {
            Some(end) => format!("{sheet}!A{}:{last_column}{end}", self.start_row),
            None => format!("{sheet}!A{}:{last_column}", self.start_row),
        }
    }
}

/// Primitive operations against the tabular store.
#[async_trait]
pub trait GridStore: Send + Sync {
    /// Rows in `range`; trailing blank rows may be omitted.
    async fn get(&self, range: GridRange) -> Result<Vec<GridRow>, StoreError>;

    /// Append after the last non-blank row. Returns the row number written.
    async fn append(&self, row: GridRow) -> Result<u32, StoreError>;

    /// Overwrite one row.
    async fn update(&self, row_number: u32, row: GridRow) -> Result<(), StoreError>;

    /// Blank out one row, keeping its position.
    async fn clear(&self, row_number: u32) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// Relational
// ---------------------------------------------------------------------------

/// One message received on a change-notification channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub channel: String,
    pub payload: String,
}

/// Receiving end of a notification subscription.
pub type NotificationStream = mpsc::UnboundedReceiver<Notification>;

/// Transactional CRUD against the relational store.
#[async_trait]
pub trait RelationalStore: Send + Sync {
    /// Check out a pooled connection and open a transaction. `origin` tags
    /// every notification the transaction's writes produce.
    async fn begin(&self, origin: Option<BatchId>) -> Result<Box<dyn RelationalTx>, StoreError>;

    /// All records, ordered by id. Not transacted.
    async fn list(&self) -> Result<Vec<Record>, StoreError>;

    /// Point lookup outside any transaction.
    async fn find(&self, id: RecordId) -> Result<Option<Record>, StoreError>;

    /// Subscribe to a change-notification channel for the life of the
    /// returned stream.
    async fn listen(&self, channel: &str) -> Result<NotificationStream, StoreError>;
}

/// An open transaction. Dropping it without `commit` rolls back.
#[async_trait]
pub trait RelationalTx: Send {
    async fn find(&mut self, id: RecordId) -> Result<Option<Record>, StoreError>;

    async fn insert(&mut self, record: &Record) -> Result<Record, StoreError>;

    /// Returns `None` when no record has this id.
    async fn update(&mut self, record: &Record) -> Result<Option<Record>, StoreError>;

    async fn delete(&mut self, id: RecordId) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a1_notation() {
        assert_eq!(GridRange::header().a1("Sheet1", 'D'), "Sheet1!A1:D1");
        assert_eq!(GridRange::data().a1("Sheet1", 'D'), "Sheet1!A2:D");
        assert_eq!(GridRange::row(8).a1("Users", 'E'), "Users!A8:E8");
    }
}
