//! Job queue contract and the in-process broker.
//!
//! ## Delivery model
//!
//! - Two independently named queues, each FIFO; no ordering across queues.
//! - At-least-once: a reserved job holds a lock for `lock_duration`. If the
//!   lock is neither extended nor released, `recover_stalled` moves the job
//!   back to the head of its queue, up to `max_stalled_count` times; after
//!   that the job fails permanently.
//! - Jobs are retained after completion/failure unless their
//!   [`EnqueueOptions`] say otherwise, so they can be inspected.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{broadcast, Notify};
use tokio::time::Instant;

use gridsync_core::{BatchId, Provenance};

use crate::error::QueueError;

/// Failure reason recorded for jobs that exhaust their stall budget.
pub const STALLED_LIMIT_REASON: &str = "job stalled more than allowable limit";

// ---------------------------------------------------------------------------
// Names, ids, settings
// ---------------------------------------------------------------------------

/// The two sync queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum QueueName {
    /// Reconciliation jobs: grid edits applied to the relational store.
    #[serde(rename = "grid-sync")]
    GridToRelational,
    /// Propagation jobs: relational changes replayed onto the grid.
    #[serde(rename = "relational-sync")]
    RelationalToGrid,
}

impl QueueName {
    pub const ALL: [QueueName; 2] = [QueueName::GridToRelational, QueueName::RelationalToGrid];

    pub fn as_str(self) -> &'static str {
        match self {
            QueueName::GridToRelational => "grid-sync",
            QueueName::RelationalToGrid => "relational-sync",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|queue| queue.as_str() == name)
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Lock and stall timings shared by both queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    #[serde(rename = "stalled_interval_ms", with = "millis")]
    pub stalled_interval: Duration,
    pub max_stalled_count: u32,
    #[serde(rename = "lock_duration_ms", with = "millis")]
    pub lock_duration: Duration,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            stalled_interval: Duration::from_secs(30),
            max_stalled_count: 1,
            lock_duration: Duration::from_secs(30),
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        match u64::deserialize(deserializer)? {
            0 => Err(D::Error::custom("duration must be at least 1 ms")),
            ms => Ok(Duration::from_millis(ms)),
        }
    }
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Waiting,
    Active,
    Completed,
    Failed,
}

impl JobState {
    pub fn parse(state: &str) -> Option<Self> {
        match state {
            "waiting" => Some(Self::Waiting),
            "active" => Some(Self::Active),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            JobState::Waiting => "waiting",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Retention policy for a job once it reaches a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EnqueueOptions {
    pub remove_on_complete: bool,
    pub remove_on_fail: bool,
}

impl EnqueueOptions {
    /// Keep the job in both the completed and the failed set.
    pub fn retain() -> Self {
        Self::default()
    }
}

/// What a producer hands to [`Broker::enqueue`].
#[derive(Debug, Clone)]
pub struct NewJob {
    pub provenance: Provenance,
    pub correlation: Option<BatchId>,
    pub payload: Value,
    pub options: EnqueueOptions,
}

/// Broker-side view of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub queue: QueueName,
    pub provenance: Provenance,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation: Option<BatchId>,
    pub payload: Value,
    pub state: JobState,
    pub attempts_made: u32,
    pub stalled_count: u32,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_reason: Option<String>,
}

/// Exclusive claim on an active job. Only the current holder may extend,
/// ack, or fail it.
#[derive(Debug, Clone)]
pub struct Lease {
    pub job: JobRecord,
    token: u64,
}

impl Lease {
    pub fn job_id(&self) -> JobId {
        self.job.id
    }
}

/// Lifecycle notifications published by the broker.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueEvent {
    Completed {
        queue: QueueName,
        job_id: JobId,
        provenance: Provenance,
        correlation: Option<BatchId>,
        return_value: Value,
    },
    Failed {
        queue: QueueName,
        job_id: JobId,
        provenance: Provenance,
        correlation: Option<BatchId>,
        reason: String,
    },
    Stalled {
        queue: QueueName,
        job_id: JobId,
    },
}

/// Per-state job totals for one queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct JobCounts {
    pub waiting: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
}

// ---------------------------------------------------------------------------
// Broker contract
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Broker: Send + Sync {
    async fn enqueue(&self, queue: QueueName, job: NewJob) -> Result<JobId, QueueError>;

    /// Claim the job at the head of `queue`, if any, and lock it.
    async fn reserve(&self, queue: QueueName) -> Result<Option<Lease>, QueueError>;

    /// Push the lock expiry of a held job out by another `lock_duration`.
    async fn extend_lock(&self, lease: &Lease) -> Result<(), QueueError>;

    async fn ack(&self, lease: &Lease, return_value: Value) -> Result<(), QueueError>;

    async fn fail(&self, lease: &Lease, reason: &str) -> Result<(), QueueError>;

    /// Requeue (or permanently fail) active jobs whose lock expired.
    async fn recover_stalled(&self, queue: QueueName) -> Result<Vec<JobId>, QueueError>;

    async fn job(&self, queue: QueueName, id: JobId) -> Result<Option<JobRecord>, QueueError>;

    /// Jobs on `queue`, oldest first, optionally filtered by state.
    async fn jobs(
        &self,
        queue: QueueName,
        state: Option<JobState>,
    ) -> Result<Vec<JobRecord>, QueueError>;

    async fn counts(&self, queue: QueueName) -> Result<JobCounts, QueueError>;

    fn events(&self) -> broadcast::Receiver<QueueEvent>;

    /// Signalled whenever a job becomes available on `queue`.
    fn ready(&self, queue: QueueName) -> Arc<Notify>;

    /// Stop accepting and handing out jobs.
    async fn close(&self);
}

// ---------------------------------------------------------------------------
// In-process broker
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct StoredJob {
    record: JobRecord,
    options: EnqueueOptions,
    lease: Option<(u64, Instant)>,
}

#[derive(Debug, Default)]
struct QueueState {
    wait: VecDeque<JobId>,
    jobs: BTreeMap<JobId, StoredJob>,
}

#[derive(Debug, Default)]
struct BrokerState {
    next_job: u64,
    next_token: u64,
    closed: bool,
    queues: HashMap<QueueName, QueueState>,
}

#[derive(Debug)]
struct BrokerInner {
    settings: QueueSettings,
    state: Mutex<BrokerState>,
    events: broadcast::Sender<QueueEvent>,
    ready: HashMap<QueueName, Arc<Notify>>,
}

/// In-process broker. Jobs live for the lifetime of the process.
#[derive(Debug, Clone)]
pub struct MemoryBroker {
    inner: Arc<BrokerInner>,
}

impl MemoryBroker {
    pub fn new(settings: QueueSettings) -> Self {
        let (events, _) = broadcast::channel(256);
        let ready = QueueName::ALL
            .into_iter()
            .map(|queue| (queue, Arc::new(Notify::new())))
            .collect();
        Self {
            inner: Arc::new(BrokerInner {
                settings,
                state: Mutex::new(BrokerState::default()),
                events,
                ready,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, event: QueueEvent) {
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }

    fn wake(&self, queue: QueueName) {
        if let Some(notify) = self.inner.ready.get(&queue) {
            notify.notify_one();
        }
    }

    /// Look up the job a lease refers to and verify the lease is current.
    fn leased<'a>(
        state: &'a mut BrokerState,
        lease: &Lease,
    ) -> Result<&'a mut StoredJob, QueueError> {
        let queue = lease.job.queue;
        let job = state
            .queues
            .get_mut(&queue)
            .and_then(|q| q.jobs.get_mut(&lease.job.id))
            .ok_or(QueueError::JobNotFound {
                queue,
                job: lease.job.id,
            })?;
        match job.lease {
            Some((token, _)) if token == lease.token && job.record.state == JobState::Active => {
                Ok(job)
            }
            _ => Err(QueueError::LeaseLost(lease.job.id)),
        }
    }

    fn finish(
        &self,
        lease: &Lease,
        outcome: Result<Value, String>,
    ) -> Result<QueueEvent, QueueError> {
        let mut state = self.lock();
        let job = Self::leased(&mut state, lease)?;
        job.lease = None;
        job.record.attempts_made += 1;
        job.record.finished_at = Some(Utc::now());

        let record = &mut job.record;
        let (event, remove) = match outcome {
            Ok(return_value) => {
                record.state = JobState::Completed;
                record.return_value = Some(return_value.clone());
                let event = QueueEvent::Completed {
                    queue: record.queue,
                    job_id: record.id,
                    provenance: record.provenance,
                    correlation: record.correlation,
                    return_value,
                };
                (event, job.options.remove_on_complete)
            }
            Err(reason) => {
                record.state = JobState::Failed;
                record.failed_reason = Some(reason.clone());
                let event = QueueEvent::Failed {
                    queue: record.queue,
                    job_id: record.id,
                    provenance: record.provenance,
                    correlation: record.correlation,
                    reason,
                };
                (event, job.options.remove_on_fail)
            }
        };

        if remove {
            if let Some(queue) = state.queues.get_mut(&lease.job.queue) {
                queue.jobs.remove(&lease.job.id);
            }
        }
        Ok(event)
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn enqueue(&self, queue: QueueName, job: NewJob) -> Result<JobId, QueueError> {
        let id = {
            let mut state = self.lock();
            if state.closed {
                return Err(QueueError::Closed(queue));
            }
            state.next_job += 1;
            let id = JobId(state.next_job);
            let record = JobRecord {
                id,
                queue,
                provenance: job.provenance,
                correlation: job.correlation,
                payload: job.payload,
                state: JobState::Waiting,
                attempts_made: 0,
                stalled_count: 0,
                created_at: Utc::now(),
                processed_at: None,
                finished_at: None,
                return_value: None,
                failed_reason: None,
            };
            let q = state.queues.entry(queue).or_default();
            q.jobs.insert(
                id,
                StoredJob {
                    record,
                    options: job.options,
                    lease: None,
                },
            );
            q.wait.push_back(id);
            id
        };
        self.wake(queue);
        tracing::debug!(queue = %queue, job_id = %id, "job enqueued");
        Ok(id)
    }

    async fn reserve(&self, queue: QueueName) -> Result<Option<Lease>, QueueError> {
        let mut state = self.lock();
        if state.closed {
            return Err(QueueError::Closed(queue));
        }
        state.next_token += 1;
        let token = state.next_token;
        let locked_until = Instant::now() + self.inner.settings.lock_duration;

        let Some(q) = state.queues.get_mut(&queue) else {
            return Ok(None);
        };
        while let Some(id) = q.wait.pop_front() {
            let Some(job) = q.jobs.get_mut(&id) else {
                continue;
            };
            if job.record.state != JobState::Waiting {
                continue;
            }
            job.record.state = JobState::Active;
            job.record.processed_at = Some(Utc::now());
            job.lease = Some((token, locked_until));
            return Ok(Some(Lease {
                job: job.record.clone(),
                token,
            }));
        }
        Ok(None)
    }

    async fn extend_lock(&self, lease: &Lease) -> Result<(), QueueError> {
        let lock_duration = self.inner.settings.lock_duration;
        let mut state = self.lock();
        let job = Self::leased(&mut state, lease)?;
        job.lease = Some((lease.token, Instant::now() + lock_duration));
        Ok(())
    }

    async fn ack(&self, lease: &Lease, return_value: Value) -> Result<(), QueueError> {
        let event = self.finish(lease, Ok(return_value))?;
        self.publish(event);
        Ok(())
    }

    async fn fail(&self, lease: &Lease, reason: &str) -> Result<(), QueueError> {
        let event = self.finish(lease, Err(reason.to_owned()))?;
        self.publish(event);
        Ok(())
    }

    async fn recover_stalled(&self, queue: QueueName) -> Result<Vec<JobId>, QueueError> {
        let now = Instant::now();
        let max_stalled = self.inner.settings.max_stalled_count;
        let mut events = Vec::new();
        let mut requeued = Vec::new();
        {
            let mut state = self.lock();
            let Some(q) = state.queues.get_mut(&queue) else {
                return Ok(Vec::new());
            };
            // Oldest first so redelivery keeps enqueue order.
            let mut expired: Vec<JobId> = q
                .jobs
                .values()
                .filter(|job| matches!(job.lease, Some((_, until)) if until <= now))
                .map(|job| job.record.id)
                .collect();
            expired.sort();

            for id in expired.into_iter().rev() {
                let Some(job) = q.jobs.get_mut(&id) else {
                    continue;
                };
                job.lease = None;
                job.record.stalled_count += 1;
                if job.record.stalled_count > max_stalled {
                    job.record.state = JobState::Failed;
                    job.record.failed_reason = Some(STALLED_LIMIT_REASON.to_string());
                    job.record.finished_at = Some(Utc::now());
                    events.push(QueueEvent::Failed {
                        queue,
                        job_id: id,
                        provenance: job.record.provenance,
                        correlation: job.record.correlation,
                        reason: STALLED_LIMIT_REASON.to_string(),
                    });
                    if job.options.remove_on_fail {
                        q.jobs.remove(&id);
                    }
                } else {
                    job.record.state = JobState::Waiting;
                    q.wait.push_front(id);
                    events.push(QueueEvent::Stalled { queue, job_id: id });
                    requeued.push(id);
                }
            }
        }

        for event in events.into_iter().rev() {
            self.publish(event);
        }
        if !requeued.is_empty() {
            self.wake(queue);
        }
        requeued.reverse();
        Ok(requeued)
    }

    async fn job(&self, queue: QueueName, id: JobId) -> Result<Option<JobRecord>, QueueError> {
        let state = self.lock();
        Ok(state
            .queues
            .get(&queue)
            .and_then(|q| q.jobs.get(&id))
            .map(|job| job.record.clone()))
    }

    async fn jobs(
        &self,
        queue: QueueName,
        filter: Option<JobState>,
    ) -> Result<Vec<JobRecord>, QueueError> {
        let state = self.lock();
        Ok(state
            .queues
            .get(&queue)
            .map(|q| {
                q.jobs
                    .values()
                    .filter(|job| filter.map_or(true, |s| job.record.state == s))
                    .map(|job| job.record.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn counts(&self, queue: QueueName) -> Result<JobCounts, QueueError> {
        let state = self.lock();
        let mut counts = JobCounts::default();
        if let Some(q) = state.queues.get(&queue) {
            for job in q.jobs.values() {
                match job.record.state {
                    JobState::Waiting => counts.waiting += 1,
                    JobState::Active => counts.active += 1,
                    JobState::Completed => counts.completed += 1,
                    JobState::Failed => counts.failed += 1,
                }
            }
        }
        Ok(counts)
    }

    fn events(&self) -> broadcast::Receiver<QueueEvent> {
        self.inner.events.subscribe()
    }

    fn ready(&self, queue: QueueName) -> Arc<Notify> {
        self.inner
            .ready
            .get(&queue)
            .cloned()
            .unwrap_or_else(|| Arc::new(Notify::new()))
    }

    async fn close(&self) {
        self.lock().closed = true;
        for notify in self.inner.ready.values() {
            notify.notify_waiters();
        }
        tracing::info!("queues closed");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
