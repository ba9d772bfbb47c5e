//! Queue consumer loop.
//!
//! One worker per queue processes one job at a time. While a handler runs,
//! the job's lock is renewed every half lock duration so a long but healthy
//! job is not mistaken for a stalled one.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::error::{QueueError, SyncError};
use crate::queue::{Broker, JobRecord, Lease, QueueName, QueueSettings};

/// Floor for timer periods; tokio rejects a zero interval.
const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Processes jobs reserved from one queue.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &JobRecord) -> Result<Value, SyncError>;
}

/// Consume `queue` until `shutdown` fires or the broker closes.
pub async fn run_worker(
    broker: Arc<dyn Broker>,
    queue: QueueName,
    handler: Arc<dyn JobHandler>,
    settings: QueueSettings,
    mut shutdown: broadcast::Receiver<()>,
) {
    let ready = broker.ready(queue);
    let mut stall_check = tokio::time::interval(settings.stalled_interval.max(MIN_PERIOD));
    stall_check.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    tracing::info!(queue = %queue, "worker started");

    loop {
        // Register for wake-ups before looking, so an enqueue that lands in
        // between is not missed.
        let notified = ready.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        match broker.reserve(queue).await {
            Ok(Some(lease)) => {
                process(broker.as_ref(), handler.as_ref(), &lease, settings).await;
                continue;
            }
            Ok(None) => {}
            Err(QueueError::Closed(_)) => break,
            Err(e) => {
                tracing::error!(queue = %queue, error = %e, "reserve failed");
            }
        }

        tokio::select! {
            _ = shutdown.recv() => break,
            _ = &mut notified => {}
            _ = stall_check.tick() => {
                match broker.recover_stalled(queue).await {
                    Ok(requeued) if !requeued.is_empty() => {
                        tracing::warn!(queue = %queue, jobs = ?requeued, "stalled jobs requeued");
                    }
                    Ok(_) => {}
                    Err(QueueError::Closed(_)) => break,
                    Err(e) => tracing::error!(queue = %queue, error = %e, "stall check failed"),
                }
            }
        }
    }

    tracing::info!(queue = %queue, "worker stopped");
}

/// Run the handler for one leased job and settle it with the broker.
pub async fn process(
    broker: &dyn Broker,
    handler: &dyn JobHandler,
    lease: &Lease,
    settings: QueueSettings,
) {
    let job = &lease.job;
    let queue = job.queue;
    tracing::debug!(
        queue = %queue,
        job_id = %job.id,
        provenance = %job.provenance,
        "processing job"
    );

    let renew_every = (settings.lock_duration / 2).max(MIN_PERIOD);
    let mut renew = tokio::time::interval_at(tokio::time::Instant::now() + renew_every, renew_every);
    let work = handler.handle(job);
    tokio::pin!(work);

    let outcome = loop {
        tokio::select! {
            result = &mut work => break result,
            _ = renew.tick() => {
                if let Err(e) = broker.extend_lock(lease).await {
                    tracing::warn!(queue = %queue, job_id = %job.id, error = %e, "lock renewal failed");
                }
            }
        }
    };

    let settled = match outcome {
        Ok(return_value) => {
            tracing::info!(queue = %queue, job_id = %job.id, "job completed");
            broker.ack(lease, return_value).await
        }
        Err(e) => {
            tracing::error!(queue = %queue, job_id = %job.id, error = %e, "job failed");
            broker.fail(lease, &e.to_string()).await
        }
    };

    match settled {
        Ok(()) => {}
        Err(QueueError::LeaseLost(id)) => {
            tracing::warn!(queue = %queue, job_id = %id, "job was redelivered before it finished");
        }
        Err(e) => {
            tracing::error!(queue = %queue, job_id = %job.id, error = %e, "could not settle job");
        }
    }
}
