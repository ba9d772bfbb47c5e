//! Grid → relational reconciliation.
//!
//! A job names a range of sheet rows and carries the sheet snapshot taken
//! right after the edit. Every row in the range is diffed against the
//! relational store inside a single transaction:
//!
//! - row missing from the snapshot, or first cell blank → delete the record
//!   that row stood for
//! - otherwise → upsert the record built from the row via the header
//!
//! Upserts run first, so a cleared row is resolved against the positions
//! the batch itself assigns. A record the batch upserts is never deleted.
//!
//! Any row failing aborts the whole batch; nothing is committed.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use gridsync_core::{
    GridRange, GridStore, Header, Provenance, Record, RelationalStore, RelationalTx,
};

use crate::error::SyncError;
use crate::jobs::{ChangeCounts, JobOutcome, ReconcileJob};
use crate::queue::JobRecord;
use crate::row_index::{IndexDelta, RowIndex};
use crate::transaction::settle;
use crate::worker::JobHandler;

pub struct Reconciler {
    grid: Arc<dyn GridStore>,
    db: Arc<dyn RelationalStore>,
    index: Arc<RowIndex>,
}

impl Reconciler {
    pub fn new(grid: Arc<dyn GridStore>, db: Arc<dyn RelationalStore>, index: Arc<RowIndex>) -> Self {
        Self { grid, db, index }
    }

    /// Apply one batch. Index changes are published only after commit.
    pub async fn reconcile(&self, job: &ReconcileJob) -> Result<ChangeCounts, SyncError> {
        let range = job.trigger.range;
        if range.is_inverted() {
            return Err(SyncError::reconcile(SyncError::InvalidRange(range)));
        }

        let mut tx = self
            .db
            .begin(Some(job.batch))
            .await
            .map_err(|e| SyncError::reconcile(e.into()))?;
        let mut delta = IndexDelta::default();
        let applied = self.apply(tx.as_mut(), job, &mut delta).await;
        let counts = settle(tx, applied).await.map_err(SyncError::reconcile)?;

        self.index.apply(delta);
        Ok(counts)
    }

    async fn header(&self) -> Result<Header, SyncError> {
        let rows = self.grid.get(GridRange::header()).await?;
        let header = rows
            .into_iter()
            .next()
            .map(|row| Header::from_row(&row))
            .ok_or(SyncError::MissingHeader)?;
        if header.is_empty() {
            return Err(SyncError::MissingHeader);
        }
        Ok(header)
    }

    async fn apply(
        &self,
        tx: &mut dyn RelationalTx,
        job: &ReconcileJob,
        delta: &mut IndexDelta,
    ) -> Result<ChangeCounts, SyncError> {
        let header = self.header().await?;
        let mut counts = ChangeCounts::default();

        let mut upserts: Vec<(u32, Record)> = Vec::new();
        let mut cleared: Vec<u32> = Vec::new();
        for row in job.trigger.range.data_rows() {
            let cells = job
                .trigger
                .row(row)
                .filter(|cells| cells.first().is_some_and(|c| !c.trim().is_empty()));
            let Some(cells) = cells else {
                cleared.push(row);
                continue;
            };
            let record = header
                .candidate(cells)
                .into_record()
                .ok_or_else(|| SyncError::InvalidRow {
                    row,
                    reason: "id is missing or not numeric".to_string(),
                })?;
            upserts.push((row, record));
        }

        let mut upserted = BTreeSet::new();
        for (row, record) in upserts {
            if tx.find(record.id).await?.is_some() {
                tx.update(&record).await?;
                counts.updated += 1;
                tracing::debug!(row, id = %record.id, "record updated");
            } else {
                tx.insert(&record).await?;
                counts.inserted += 1;
                tracing::debug!(row, id = %record.id, "record created");
            }
            delta.bind(record.id, row);
            upserted.insert(record.id);
        }

        for row in cleared {
            let Some(id) = self.index.record_at_staged(row, delta) else {
                tracing::debug!(row, "cleared row has no record");
                continue;
            };
            if upserted.contains(&id) {
                tracing::debug!(row, id = %id, "record moved within the batch, kept");
                continue;
            }
            if tx.find(id).await?.is_some() {
                tx.delete(id).await?;
                counts.deleted += 1;
                tracing::debug!(row, id = %id, "row cleared, record deleted");
            }
            delta.unbind(id);
        }

        Ok(counts)
    }
}

#[async_trait]
impl JobHandler for Reconciler {
    async fn handle(&self, job: &JobRecord) -> Result<Value, SyncError> {
        if job.provenance == Provenance::Relational {
            tracing::info!(job_id = %job.id, "change originated from the relational store, not reconciling");
            return Ok(serde_json::to_value(JobOutcome::skipped(job.provenance))?);
        }

        let payload: ReconcileJob = serde_json::from_value(job.payload.clone())?;
        let counts = self.reconcile(&payload).await?;
        tracing::info!(
            job_id = %job.id,
            batch = %payload.batch,
            range = %payload.trigger.range,
            inserted = counts.inserted,
            updated = counts.updated,
            deleted = counts.deleted,
            "grid changes reconciled"
        );

        let mut outcome = JobOutcome::synced("Data synchronized successfully", job.provenance);
        outcome.batch = Some(payload.batch);
        outcome.changes = Some(counts);
        Ok(serde_json::to_value(outcome)?)
    }
}
