//! Synchronous edits that bypass the queues.
//!
//! Record operations only touch the relational store; the change trigger
//! carries them to the grid. Row operations write the grid and mirror the
//! change into the relational store in the same call, under a correlation
//! id so the resulting notifications are not echoed back.

use std::sync::Arc;

use serde_json::{Map, Value};

use gridsync_core::types::coerce_integer;
use gridsync_core::{
    BatchId, GridRange, GridStore, Header, Record, RecordId, RelationalStore, RelationalTx,
    StoreError,
};

use crate::error::SyncError;
use crate::guard::ProvenanceGuard;
use crate::row_index::RowIndex;
use crate::transaction::settle;

pub struct DirectEdits {
    grid: Arc<dyn GridStore>,
    db: Arc<dyn RelationalStore>,
    guard: Arc<ProvenanceGuard>,
    index: Arc<RowIndex>,
}

impl DirectEdits {
    pub fn new(
        grid: Arc<dyn GridStore>,
        db: Arc<dyn RelationalStore>,
        guard: Arc<ProvenanceGuard>,
        index: Arc<RowIndex>,
    ) -> Self {
        Self {
            grid,
            db,
            guard,
            index,
        }
    }

    // -- records ------------------------------------------------------------

    pub async fn create_record(&self, record: &Record) -> Result<Record, SyncError> {
        let mut tx = self.db.begin(None).await?;
        let created = tx.insert(record).await.map_err(SyncError::from);
        settle(tx, created).await
    }

    pub async fn list_records(&self) -> Result<Vec<Record>, SyncError> {
        Ok(self.db.list().await?)
    }

    pub async fn get_record(&self, id: RecordId) -> Result<Record, SyncError> {
        self.db
            .find(id)
            .await?
            .ok_or(SyncError::Store(StoreError::NotFound(id)))
    }

    pub async fn update_record(&self, record: &Record) -> Result<Record, SyncError> {
        let mut tx = self.db.begin(None).await?;
        let updated = match tx.update(record).await {
            Ok(Some(updated)) => Ok(updated),
            Ok(None) => Err(StoreError::NotFound(record.id).into()),
            Err(e) => Err(e.into()),
        };
        settle(tx, updated).await
    }

    pub async fn delete_record(&self, id: RecordId) -> Result<(), SyncError> {
        let mut tx = self.db.begin(None).await?;
        let deleted = tx.delete(id).await.map_err(SyncError::from);
        settle(tx, deleted).await
    }

    // -- grid rows ----------------------------------------------------------

    /// Every data row keyed by header name.
    pub async fn read_rows(&self) -> Result<Vec<Map<String, Value>>, SyncError> {
        let rows = self.grid.get(GridRange::all()).await?;
        let Some((header, data)) = rows.split_first() else {
            return Err(SyncError::NoData);
        };
        let header = Header::from_row(header);
        Ok(data.iter().map(|row| header.structure(row)).collect())
    }

    /// Append `record` to the grid and insert it relationally. Returns the
    /// row written.
    pub async fn append_row(&self, record: &Record) -> Result<u32, SyncError> {
        let (batch, mut tx) = self.begin_tracked().await?;
        let staged = self.stage_append(tx.as_mut(), record).await;
        let row = self.finish_tracked(batch, tx, staged).await?;
        self.index.bind(record.id, row);
        tracing::info!(id = %record.id, row, "row appended");
        Ok(row)
    }

    pub async fn update_row(&self, record: &Record) -> Result<u32, SyncError> {
        let row = self.row_of(record.id)?;
        let (batch, mut tx) = self.begin_tracked().await?;
        let staged = self.stage_update(tx.as_mut(), row, record).await;
        self.finish_tracked(batch, tx, staged).await?;
        tracing::info!(id = %record.id, row, "row updated");
        Ok(row)
    }

    pub async fn clear_row(&self, id: RecordId) -> Result<u32, SyncError> {
        let row = self.row_of(id)?;
        let (batch, mut tx) = self.begin_tracked().await?;
        let staged = self.stage_clear(tx.as_mut(), row, id).await;
        self.finish_tracked(batch, tx, staged).await?;
        self.index.unbind(id);
        tracing::info!(id = %id, row, "row cleared");
        Ok(row)
    }

    // The relational write is staged before the grid call, so a record the
    // store rejects never reaches the grid.

    async fn stage_append(&self, tx: &mut dyn RelationalTx, record: &Record) -> Result<u32, SyncError> {
        if self.grid_has(record.id).await? {
            return Err(StoreError::Duplicate(record.id).into());
        }
        tx.insert(record).await?;
        Ok(self.grid.append(record.to_row()).await?)
    }

    async fn stage_update(
        &self,
        tx: &mut dyn RelationalTx,
        row: u32,
        record: &Record,
    ) -> Result<(), SyncError> {
        if tx.update(record).await?.is_none() {
            return Err(StoreError::NotFound(record.id).into());
        }
        Ok(self.grid.update(row, record.to_row()).await?)
    }

    async fn stage_clear(&self, tx: &mut dyn RelationalTx, row: u32, id: RecordId) -> Result<(), SyncError> {
        tx.delete(id).await?;
        Ok(self.grid.clear(row).await?)
    }

    fn row_of(&self, id: RecordId) -> Result<u32, SyncError> {
        self.index.position_of(id).ok_or_else(|| {
            StoreError::Constraint(format!("record {id} has no grid row")).into()
        })
    }

    async fn grid_has(&self, id: RecordId) -> Result<bool, SyncError> {
        let rows = self.grid.get(GridRange::data()).await?;
        Ok(rows
            .iter()
            .filter_map(|row| row.first())
            .any(|cell| coerce_integer(cell) == Some(id.0)))
    }

    /// Open a transaction tagged with a fresh batch id known to the guard.
    async fn begin_tracked(&self) -> Result<(BatchId, Box<dyn RelationalTx>), SyncError> {
        let batch = BatchId::new();
        self.guard.track(batch);
        match self.db.begin(Some(batch)).await {
            Ok(tx) => Ok((batch, tx)),
            Err(e) => {
                self.guard.abandon(batch);
                Err(e.into())
            }
        }
    }

    async fn finish_tracked<T>(
        &self,
        batch: BatchId,
        tx: Box<dyn RelationalTx>,
        staged: Result<T, SyncError>,
    ) -> Result<T, SyncError> {
        let result = settle(tx, staged).await;
        self.guard.finish(batch);
        result
    }
}
