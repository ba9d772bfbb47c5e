//! Relational → grid propagation: replay one record mutation onto the grid.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use gridsync_core::types::coerce_integer;
use gridsync_core::{
    ChangeNotice, GridRange, GridStore, Operation, Provenance, RecordId, StoreError,
};

use crate::error::SyncError;
use crate::jobs::{JobOutcome, PropagateJob};
use crate::queue::JobRecord;
use crate::row_index::RowIndex;
use crate::worker::JobHandler;

pub struct Propagator {
    grid: Arc<dyn GridStore>,
    index: Arc<RowIndex>,
}

impl Propagator {
    pub fn new(grid: Arc<dyn GridStore>, index: Arc<RowIndex>) -> Self {
        Self { grid, index }
    }

    /// One grid call per job; the grid is untouched when that call fails.
    pub async fn propagate(&self, operation: Operation, notice: &ChangeNotice) -> Result<(), SyncError> {
        match operation {
            Operation::Delete => {
                let id = notice.id.ok_or(SyncError::MissingId(operation))?;
                match self.index.position_of(id) {
                    Some(row) => {
                        self.grid.clear(row).await?;
                        tracing::info!(id = %id, row, "grid row cleared");
                    }
                    None => tracing::warn!(id = %id, "record has no grid row to clear"),
                }
                self.index.unbind(id);
            }
            Operation::Update => {
                let id = notice.id.ok_or(SyncError::MissingId(operation))?;
                match self.index.position_of(id) {
                    Some(row) => {
                        self.grid.update(row, notice.to_row()).await?;
                        tracing::info!(id = %id, row, "grid row updated");
                    }
                    None if id.default_row().is_none() => {
                        return Err(SyncError::UnplaceableId(id));
                    }
                    None => {
                        let row = self.grid.append(notice.to_row()).await?;
                        self.index.bind(id, row);
                        tracing::info!(id = %id, row, "record row taken, appended instead");
                    }
                }
            }
            Operation::Insert => {
                if let Some(id) = notice.id {
                    self.ensure_absent(id).await?;
                }
                let row = self.grid.append(notice.to_row()).await?;
                if let Some(id) = notice.id {
                    self.index.bind(id, row);
                }
                tracing::info!(id = ?notice.id, row, "grid row appended");
            }
            Operation::Unknown => {
                tracing::warn!(id = ?notice.id, "unknown operation, nothing propagated");
            }
        }
        Ok(())
    }

    async fn ensure_absent(&self, id: RecordId) -> Result<(), SyncError> {
        let rows = self.grid.get(GridRange::data()).await?;
        let taken = rows
            .iter()
            .filter_map(|row| row.first())
            .any(|cell| coerce_integer(cell) == Some(id.0));
        if taken {
            return Err(StoreError::Duplicate(id).into());
        }
        Ok(())
    }
}

#[async_trait]
impl JobHandler for Propagator {
    async fn handle(&self, job: &JobRecord) -> Result<Value, SyncError> {
        if job.provenance == Provenance::Grid {
            tracing::info!(job_id = %job.id, "change originated from the grid, not propagating");
            return Ok(serde_json::to_value(JobOutcome::skipped(job.provenance))?);
        }

        let payload: PropagateJob = serde_json::from_value(job.payload.clone())?;
        self.propagate(payload.operation, &payload.notice).await?;
        Ok(serde_json::to_value(JobOutcome::synced(
            "Data synchronized successfully",
            job.provenance,
        ))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridsync_core::MemoryGrid;
    use rstest::rstest;

    fn notice(id: Option<i64>, name: &str) -> ChangeNotice {
        ChangeNotice {
            id: id.map(RecordId),
            name: Some(name.into()),
            city: Some("NYC".into()),
            ..ChangeNotice::default()
        }
    }

    fn setup() -> (MemoryGrid, Arc<RowIndex>, Propagator) {
        let grid = MemoryGrid::new();
        let index = Arc::new(RowIndex::new());
        let propagator = Propagator::new(Arc::new(grid.clone()), index.clone());
        (grid, index, propagator)
    }

    #[tokio::test]
    async fn update_writes_to_id_plus_one() {
        let (grid, _, propagator) = setup();
        propagator
            .propagate(Operation::Update, &notice(Some(7), "Ann"))
            .await
            .unwrap();
        assert_eq!(grid.row(8).unwrap(), vec!["7", "Ann", "", "NYC"]);
        assert_eq!(grid.snapshot().len(), 8);
    }

    #[tokio::test]
    async fn insert_binds_appended_row() {
        let (grid, index, propagator) = setup();
        propagator
            .propagate(Operation::Insert, &notice(Some(50), "Zed"))
            .await
            .unwrap();
        assert_eq!(grid.row(2).unwrap()[0], "50");
        assert_eq!(index.position_of(RecordId(50)), Some(2));

        propagator
            .propagate(Operation::Delete, &notice(Some(50), "Zed"))
            .await
            .unwrap();
        assert!(grid.row(2).unwrap().is_empty(), "bound row cleared, not row 51");
    }

    #[tokio::test]
    async fn duplicate_insert_is_refused() {
        let (grid, _, propagator) = setup();
        propagator
            .propagate(Operation::Insert, &notice(Some(1), "A"))
            .await
            .unwrap();
        let err = propagator
            .propagate(Operation::Insert, &notice(Some(1), "A"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("already exists"), "{err}");
        assert_eq!(grid.snapshot().len(), 2);
    }

    #[tokio::test]
    async fn delete_without_id_fails() {
        let (_, _, propagator) = setup();
        let err = propagator
            .propagate(Operation::Delete, &notice(None, "A"))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::MissingId(Operation::Delete)));
    }

    #[rstest]
    #[case(0)]
    #[case(-4)]
    #[tokio::test]
    async fn update_with_unplaceable_id_fails(#[case] id: i64) {
        let (grid, index, propagator) = setup();
        let err = propagator
            .propagate(Operation::Update, &notice(Some(id), "Neg"))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::UnplaceableId(RecordId(got)) if got == id), "{err}");
        assert_eq!(grid.snapshot().len(), 1, "nothing appended");
        assert_eq!(index.position_of(RecordId(id)), None);
    }

    #[tokio::test]
    async fn unknown_operation_is_a_no_op() {
        let (grid, _, propagator) = setup();
        propagator
            .propagate(Operation::Unknown, &notice(Some(2), "A"))
            .await
            .expect("unknown operations succeed");
        assert_eq!(grid.snapshot().len(), 1);
    }
}
