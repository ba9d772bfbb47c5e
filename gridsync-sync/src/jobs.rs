//! Job payloads and results carried through the queues.

use serde::{Deserialize, Serialize};

use gridsync_core::types::deserialize_cells;
use gridsync_core::{BatchId, ChangeNotice, GridRow, Operation, Provenance, RowRange};

use crate::queue::JobId;

/// An external edit to the grid: the touched range plus the whole sheet
/// as it looked afterwards. `sheet_data[0]` is the header row, so sheet row
/// `r` is `sheet_data[r - 1]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SheetTrigger {
    pub range: RowRange,
    #[serde(rename = "sheetData", deserialize_with = "deserialize_cells", default)]
    pub sheet_data: Vec<GridRow>,
}

impl SheetTrigger {
    /// Snapshot cells of a 1-based sheet row.
    pub fn row(&self, row_number: u32) -> Option<&GridRow> {
        let index = usize::try_from(row_number).ok()?.checked_sub(1)?;
        self.sheet_data.get(index)
    }
}

/// Payload of a grid → relational job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileJob {
    #[serde(flatten)]
    pub trigger: SheetTrigger,
    pub batch: BatchId,
}

/// Payload of a relational → grid job. The operation is resolved by the
/// producer and always present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropagateJob {
    pub operation: Operation,
    pub notice: ChangeNotice,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChangeCounts {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
}

/// Return value stored on a finished job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOutcome {
    pub message: String,
    #[serde(rename = "provenanceTag")]
    pub provenance: Provenance,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch: Option<BatchId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changes: Option<ChangeCounts>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub skipped: bool,
}

impl JobOutcome {
    pub fn synced(message: impl Into<String>, provenance: Provenance) -> Self {
        Self {
            message: message.into(),
            provenance,
            batch: None,
            changes: None,
            skipped: false,
        }
    }

    pub fn skipped(provenance: Provenance) -> Self {
        Self {
            message: "Sync skipped".to_string(),
            provenance,
            batch: None,
            changes: None,
            skipped: true,
        }
    }
}

/// Acknowledgement returned to whoever asked for a sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProduceAck {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch: Option<BatchId>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub skipped: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn trigger_accepts_mixed_cell_types() {
        let trigger: SheetTrigger = serde_json::from_value(json!({
            "range": {"startRow": 2, "endRow": 2},
            "sheetData": [["id", "name", "age", "city"], [3, "Ann", 30, null]]
        }))
        .expect("parse");

        assert_eq!(trigger.range, RowRange::new(2, 2));
        assert_eq!(trigger.row(2).unwrap(), &vec!["3", "Ann", "30", ""]);
        assert!(trigger.row(3).is_none());
        assert!(trigger.row(0).is_none());
    }

    #[test]
    fn skipped_outcome_wire_shape() {
        let value = serde_json::to_value(JobOutcome::skipped(Provenance::Relational)).unwrap();
        assert_eq!(
            value,
            json!({"message": "Sync skipped", "provenanceTag": "relational", "skipped": true})
        );
    }
}
