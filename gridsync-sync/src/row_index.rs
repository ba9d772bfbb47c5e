//! Bidirectional map between record ids and grid row numbers.
//!
//! Without an explicit binding a record lives at `id + 1`. Bindings record
//! where a record actually is when that differs, e.g. after a propagated
//! insert was appended below the last filled row.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use gridsync_core::RecordId;

#[derive(Debug, Default, Clone)]
struct Maps {
    by_id: BTreeMap<RecordId, u32>,
    by_row: BTreeMap<u32, RecordId>,
}

impl Maps {
    fn bind(&mut self, id: RecordId, row: u32) {
        if let Some(old_row) = self.by_id.insert(id, row) {
            self.by_row.remove(&old_row);
        }
        if let Some(old_id) = self.by_row.insert(row, id) {
            if old_id != id {
                self.by_id.remove(&old_id);
            }
        }
    }

    fn unbind(&mut self, id: RecordId) {
        if let Some(row) = self.by_id.remove(&id) {
            self.by_row.remove(&row);
        }
    }

    fn apply(&mut self, changes: &[IndexChange]) {
        for change in changes {
            match *change {
                IndexChange::Bind(id, row) => self.bind(id, row),
                IndexChange::Unbind(id) => self.unbind(id),
            }
        }
    }

    fn record_at(&self, row: u32) -> Option<RecordId> {
        if let Some(id) = self.by_row.get(&row) {
            return Some(*id);
        }
        let id = RecordId(i64::from(row) - 1);
        id.default_row()?;
        match self.by_id.get(&id) {
            Some(bound) if *bound != row => None,
            _ => Some(id),
        }
    }
}

/// Staged index changes, applied only once the surrounding write commits.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IndexDelta {
    changes: Vec<IndexChange>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum IndexChange {
    Bind(RecordId, u32),
    Unbind(RecordId),
}

impl IndexDelta {
    pub fn bind(&mut self, id: RecordId, row: u32) {
        self.changes.push(IndexChange::Bind(id, row));
    }

    pub fn unbind(&mut self, id: RecordId) {
        self.changes.push(IndexChange::Unbind(id));
    }
}

#[derive(Debug, Default)]
pub struct RowIndex {
    maps: Mutex<Maps>,
}

impl RowIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Maps> {
        self.maps.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Row holding `id`. `None` when the default row is taken by another
    /// record or the id has no valid default row.
    pub fn position_of(&self, id: RecordId) -> Option<u32> {
        let maps = self.lock();
        if let Some(row) = maps.by_id.get(&id) {
            return Some(*row);
        }
        let row = id.default_row()?;
        match maps.by_row.get(&row) {
            Some(other) if *other != id => None,
            _ => Some(row),
        }
    }

    /// Record occupying `row`. `None` for the header row or when the
    /// implied id is bound elsewhere.
    pub fn record_at(&self, row: u32) -> Option<RecordId> {
        self.lock().record_at(row)
    }

    /// [`record_at`](Self::record_at) as it will read once `delta` is
    /// applied.
    pub fn record_at_staged(&self, row: u32, delta: &IndexDelta) -> Option<RecordId> {
        let mut view = self.lock().clone();
        view.apply(&delta.changes);
        view.record_at(row)
    }

    pub fn bind(&self, id: RecordId, row: u32) {
        self.lock().bind(id, row);
    }

    pub fn unbind(&self, id: RecordId) {
        self.lock().unbind(id);
    }

    pub fn apply(&self, delta: IndexDelta) {
        self.lock().apply(&delta.changes);
    }

    /// Explicit bindings, ordered by id.
    pub fn bindings(&self) -> Vec<(RecordId, u32)> {
        self.lock().by_id.iter().map(|(id, row)| (*id, *row)).collect()
    }
}
