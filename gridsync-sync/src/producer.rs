//! Enqueue side of both sync directions.

use std::sync::Arc;

use tokio::sync::broadcast;

use gridsync_core::{BatchId, ChangeNotice, Provenance};

use crate::error::SyncError;
use crate::guard::ProvenanceGuard;
use crate::jobs::{ProduceAck, PropagateJob, ReconcileJob, SheetTrigger};
use crate::queue::{Broker, EnqueueOptions, NewJob, QueueEvent, QueueName};

#[derive(Clone)]
pub struct SyncProducer {
    broker: Arc<dyn Broker>,
    guard: Arc<ProvenanceGuard>,
}

impl SyncProducer {
    pub fn new(broker: Arc<dyn Broker>, guard: Arc<ProvenanceGuard>) -> Self {
        Self { broker, guard }
    }

    /// Queue reconciliation of an external grid edit. Returns as soon as the
    /// job is enqueued.
    pub async fn produce_grid_to_relational(
        &self,
        trigger: SheetTrigger,
    ) -> Result<ProduceAck, SyncError> {
        let batch = BatchId::new();
        let range = trigger.range;
        let payload = serde_json::to_value(ReconcileJob { trigger, batch })?;

        self.guard.enter_batch(batch);
        let enqueued = self
            .broker
            .enqueue(
                QueueName::GridToRelational,
                NewJob {
                    provenance: Provenance::Grid,
                    correlation: Some(batch),
                    payload,
                    options: EnqueueOptions::retain(),
                },
            )
            .await;
        let job_id = match enqueued {
            Ok(id) => id,
            Err(e) => {
                self.guard.abandon(batch);
                return Err(e.into());
            }
        };

        tracing::info!(job_id = %job_id, batch = %batch, range = %range, "sheet sync job queued");
        Ok(ProduceAck {
            message: "Sheet sync job added to queue".to_string(),
            job_id: Some(job_id),
            batch: Some(batch),
            skipped: false,
        })
    }

    /// Queue propagation of one relational change, unless it is an echo of
    /// a grid batch.
    pub async fn produce_relational_to_grid(
        &self,
        notice: ChangeNotice,
    ) -> Result<ProduceAck, SyncError> {
        if self.guard.suppresses(notice.origin) {
            tracing::debug!(
                id = ?notice.id,
                origin = ?notice.origin,
                "change originated from the grid, not propagating"
            );
            return Ok(ProduceAck {
                message: "Sync skipped".to_string(),
                job_id: None,
                batch: notice.origin,
                skipped: true,
            });
        }

        let operation = notice.resolved_operation();
        let correlation = notice.origin;
        let payload = serde_json::to_value(PropagateJob { operation, notice })?;
        let job_id = self
            .broker
            .enqueue(
                QueueName::RelationalToGrid,
                NewJob {
                    provenance: Provenance::Relational,
                    correlation,
                    payload,
                    options: EnqueueOptions::retain(),
                },
            )
            .await?;

        tracing::info!(job_id = %job_id, operation = %operation, "propagation job queued");
        Ok(ProduceAck {
            message: "Relational sync job added to queue".to_string(),
            job_id: Some(job_id),
            batch: None,
            skipped: false,
        })
    }
}

/// Release the provenance guard as jobs finish on either queue.
pub async fn watch_completions(
    guard: Arc<ProvenanceGuard>,
    mut events: broadcast::Receiver<QueueEvent>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            event = events.recv() => match event {
                Ok(QueueEvent::Completed { queue, job_id, correlation, .. }) => {
                    guard.release(correlation);
                    tracing::debug!(queue = %queue, job_id = %job_id, "provenance cleared");
                }
                Ok(QueueEvent::Failed { queue, job_id, correlation, reason, .. }) => {
                    guard.release(correlation);
                    tracing::warn!(queue = %queue, job_id = %job_id, reason = %reason, "job failed");
                }
                Ok(QueueEvent::Stalled { queue, job_id }) => {
                    tracing::warn!(queue = %queue, job_id = %job_id, "job stalled");
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "completion watcher lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}
