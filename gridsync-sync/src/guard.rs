//! Loop prevention between the two sync directions.
//!
//! Every grid-originated batch gets a [`BatchId`] that its relational
//! transaction stamps onto each change notification. A notification whose
//! origin is a batch that is in flight, or finished recently, is an echo
//! of our own write and must not be propagated back to the grid.
//!
//! Notifications without an origin fall back to a single provenance slot:
//! while the slot reads `Grid`, untagged changes are treated as echoes too.

use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use gridsync_core::{BatchId, Provenance};

/// Finished batches remembered for late echoes.
pub const DEFAULT_RECENT_CAPACITY: usize = 64;

#[derive(Debug)]
struct GuardState {
    slot: Option<Provenance>,
    in_flight: HashSet<BatchId>,
    recent: VecDeque<BatchId>,
    capacity: usize,
}

impl GuardState {
    fn retire(&mut self, batch: BatchId) {
        if !self.in_flight.remove(&batch) {
            return;
        }
        if self.capacity == 0 {
            return;
        }
        if self.recent.len() == self.capacity {
            self.recent.pop_front();
        }
        self.recent.push_back(batch);
    }
}

/// Point-in-time view of the guard, for status reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GuardSnapshot {
    pub slot: Option<Provenance>,
    pub in_flight: usize,
    pub recent: usize,
}

#[derive(Debug)]
pub struct ProvenanceGuard {
    state: Mutex<GuardState>,
}

impl Default for ProvenanceGuard {
    fn default() -> Self {
        Self::new(DEFAULT_RECENT_CAPACITY)
    }
}

impl ProvenanceGuard {
    pub fn new(recent_capacity: usize) -> Self {
        Self {
            state: Mutex::new(GuardState {
                slot: None,
                in_flight: HashSet::new(),
                recent: VecDeque::with_capacity(recent_capacity),
                capacity: recent_capacity,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, GuardState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The legacy single-slot provenance.
    pub fn current(&self) -> Option<Provenance> {
        self.lock().slot
    }

    /// A grid batch is about to be enqueued.
    pub fn enter_batch(&self, batch: BatchId) {
        let mut state = self.lock();
        state.slot = Some(Provenance::Grid);
        state.in_flight.insert(batch);
    }

    /// Register a batch for a direct relational write without touching the
    /// provenance slot.
    pub fn track(&self, batch: BatchId) {
        self.lock().in_flight.insert(batch);
    }

    /// A tracked direct write finished; its echoes may still arrive.
    pub fn finish(&self, batch: BatchId) {
        self.lock().retire(batch);
    }

    /// The batch never reached the queue.
    pub fn abandon(&self, batch: BatchId) {
        let mut state = self.lock();
        state.in_flight.remove(&batch);
        if state.in_flight.is_empty() {
            state.slot = None;
        }
    }

    /// A job on either queue completed or failed permanently. Clears the
    /// slot and moves its batch to the recent ring.
    pub fn release(&self, correlation: Option<BatchId>) {
        let mut state = self.lock();
        if let Some(batch) = correlation {
            state.retire(batch);
        }
        state.slot = None;
    }

    /// Whether a relational change with this origin is an echo of a grid
    /// batch and must be dropped.
    pub fn suppresses(&self, origin: Option<BatchId>) -> bool {
        let state = self.lock();
        match origin {
            Some(batch) => state.in_flight.contains(&batch) || state.recent.contains(&batch),
            None => state.slot == Some(Provenance::Grid),
        }
    }

    pub fn snapshot(&self) -> GuardSnapshot {
        let state = self.lock();
        GuardSnapshot {
            slot: state.slot,
            in_flight: state.in_flight.len(),
            recent: state.recent.len(),
        }
    }
}
