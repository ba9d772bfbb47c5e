//! Domain types shared by the grid and relational sides.
//!
//! Grid rows are addressed by 1-based sheet row numbers. Row 1 is the
//! header; data starts at row 2, and an unindexed record lives at `id + 1`.

use std::fmt;
use std::ops::RangeInclusive;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Sheet row holding the column names.
pub const HEADER_ROW: u32 = 1;

/// First sheet row holding data.
pub const DATA_START_ROW: u32 = 2;

/// Column names used when a grid is created from scratch.
pub const DEFAULT_COLUMNS: [&str; 4] = ["id", "name", "age", "city"];

/// Ordered cell values of one grid row.
pub type GridRow = Vec<String>;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Primary key of a relational record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub i64);

impl RecordId {
    /// Row number the record occupies when no explicit binding exists.
    pub fn default_row(self) -> Option<u32> {
        u32::try_from(self.0)
            .ok()
            .and_then(|id| id.checked_add(1))
            .filter(|row| *row >= DATA_START_ROW)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<i64> for RecordId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Correlation token attached to a grid-originated batch and every
/// relational change it causes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(pub Uuid);

impl BatchId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Side of the system a change originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    Grid,
    Relational,
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provenance::Grid => write!(f, "grid"),
            Provenance::Relational => write!(f, "relational"),
        }
    }
}

/// Kind of relational mutation carried by a propagation job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Insert,
    Update,
    Delete,
    /// Anything the trigger sends that is not one of the above.
    #[serde(other)]
    Unknown,
}

impl Operation {
    /// Explicit operation wins; otherwise `UPDATE` when an id is present,
    /// `INSERT` when it is not.
    pub fn infer(explicit: Option<Operation>, id: Option<RecordId>) -> Operation {
        match (explicit, id) {
            (Some(op), _) => op,
            (None, Some(_)) => Operation::Update,
            (None, None) => Operation::Insert,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Insert => write!(f, "INSERT"),
            Operation::Update => write!(f, "UPDATE"),
            Operation::Delete => write!(f, "DELETE"),
            Operation::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A row of the relational `users` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    pub name: String,
    pub age: Option<i64>,
    pub city: String,
}

impl Record {
    pub fn new(id: i64, name: &str, age: Option<i64>, city: &str) -> Self {
        Self {
            id: RecordId(id),
            name: name.to_owned(),
            age,
            city: city.to_owned(),
        }
    }

    /// Cells in default column order (`id, name, age, city`).
    pub fn to_row(&self) -> GridRow {
        vec![
            self.id.to_string(),
            self.name.clone(),
            self.age.map(|age| age.to_string()).unwrap_or_default(),
            self.city.clone(),
        ]
    }
}

/// A record built from grid cells before it has been validated.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CandidateRecord {
    pub id: Option<i64>,
    pub name: String,
    pub age: Option<i64>,
    pub city: String,
}

impl CandidateRecord {
    /// `None` when the id cell did not coerce to an integer.
    pub fn into_record(self) -> Option<Record> {
        Some(Record {
            id: RecordId(self.id?),
            name: self.name,
            age: self.age,
            city: self.city,
        })
    }
}

/// Integer coercion used for the `id` and `age` cells.
///
/// Blank, non-numeric and fractional values coerce to `None`.
pub fn coerce_integer(cell: &str) -> Option<i64> {
    let cell = cell.trim();
    if cell.is_empty() {
        return None;
    }
    if let Ok(value) = cell.parse::<i64>() {
        return Some(value);
    }
    let value = cell.parse::<f64>().ok().filter(|v| v.is_finite())?;
    if value.fract() != 0.0 || value < i64::MIN as f64 || value > i64::MAX as f64 {
        return None;
    }
    Some(value as i64)
}

// ---------------------------------------------------------------------------
// Header
// ---------------------------------------------------------------------------

/// Column names read from the header row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Header(pub Vec<String>);

impl Header {
    pub fn from_row(row: &[String]) -> Self {
        Self(row.to_vec())
    }

    pub fn default_columns() -> Self {
        Self(DEFAULT_COLUMNS.iter().map(|c| (*c).to_owned()).collect())
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|c| c.trim().is_empty())
    }

    pub fn columns(&self) -> &[String] {
        &self.0
    }

    /// Map header names onto cell values. Missing cells read as `""`;
    /// unknown columns are ignored.
    pub fn candidate(&self, row: &[String]) -> CandidateRecord {
        let mut candidate = CandidateRecord::default();
        for (index, column) in self.0.iter().enumerate() {
            let cell = row.get(index).map(String::as_str).unwrap_or("");
            match column.trim().to_ascii_lowercase().as_str() {
                "id" => candidate.id = coerce_integer(cell),
                "name" => candidate.name = cell.to_owned(),
                "age" => candidate.age = coerce_integer(cell),
                "city" => candidate.city = cell.to_owned(),
                _ => {}
            }
        }
        candidate
    }

    /// Header-keyed JSON object for one data row.
    pub fn structure(&self, row: &[String]) -> serde_json::Map<String, Value> {
        self.0
            .iter()
            .enumerate()
            .map(|(index, column)| {
                let cell = row.get(index).cloned().unwrap_or_default();
                (column.clone(), Value::String(cell))
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Wire payloads
// ---------------------------------------------------------------------------

/// Inclusive range of 1-based sheet rows touched by an external edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowRange {
    #[serde(rename = "startRow", alias = "start_row")]
    pub start_row: u32,
    #[serde(rename = "endRow", alias = "end_row")]
    pub end_row: u32,
}

impl RowRange {
    pub fn new(start_row: u32, end_row: u32) -> Self {
        Self { start_row, end_row }
    }

    /// Data rows covered by the range; header rows are never included.
    pub fn data_rows(&self) -> RangeInclusive<u32> {
        self.start_row.max(DATA_START_ROW)..=self.end_row
    }

    pub fn is_inverted(&self) -> bool {
        self.end_row < self.start_row
    }
}

impl fmt::Display for RowRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.start_row, self.end_row)
    }
}

/// Payload of a relational change notification.
///
/// `origin` is set when the change was written by a transaction opened on
/// behalf of a grid-originated batch.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChangeNotice {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<Operation>,
    #[serde(default)]
    pub id: Option<RecordId>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub age: Option<i64>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<BatchId>,
}

impl ChangeNotice {
    pub fn from_record(operation: Operation, record: &Record, origin: Option<BatchId>) -> Self {
        Self {
            operation: Some(operation),
            id: Some(record.id),
            name: Some(record.name.clone()),
            age: record.age,
            city: Some(record.city.clone()),
            origin,
        }
    }

    pub fn resolved_operation(&self) -> Operation {
        Operation::infer(self.operation, self.id)
    }

    /// Cells in default column order.
    pub fn to_row(&self) -> GridRow {
        vec![
            self.id.map(|id| id.to_string()).unwrap_or_default(),
            self.name.clone().unwrap_or_default(),
            self.age.map(|age| age.to_string()).unwrap_or_default(),
            self.city.clone().unwrap_or_default(),
        ]
    }
}

/// Accept a matrix of arbitrary JSON scalars and render every cell as text,
/// the way the grid would display it.
pub fn deserialize_cells<'de, D>(deserializer: D) -> Result<Vec<GridRow>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Vec<Vec<Value>> = Vec::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|row| row.into_iter().map(cell_text).collect())
        .collect())
}

fn cell_text(value: Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s,
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn cells(values: &[&str]) -> GridRow {
        values.iter().map(|v| (*v).to_owned()).collect()
    }

    #[test]
    fn default_row_is_id_plus_one() {
        assert_eq!(RecordId(7).default_row(), Some(8));
        assert_eq!(RecordId(1).default_row(), Some(2));
        assert_eq!(RecordId(0).default_row(), None, "row 1 is the header");
        assert_eq!(RecordId(-3).default_row(), None);
    }

    #[test]
    fn operation_inference() {
        assert_eq!(Operation::infer(None, Some(RecordId(5))), Operation::Update);
        assert_eq!(Operation::infer(None, None), Operation::Insert);
        assert_eq!(
            Operation::infer(Some(Operation::Delete), Some(RecordId(5))),
            Operation::Delete
        );
        assert_eq!(Operation::infer(Some(Operation::Insert), None), Operation::Insert);
    }

    #[test]
    fn unknown_operation_string_deserializes() {
        let notice: ChangeNotice =
            serde_json::from_str(r#"{"operation":"TRUNCATE","id":1}"#).expect("parse");
        assert_eq!(notice.operation, Some(Operation::Unknown));
    }

    #[test]
    fn coercion_accepts_only_integral_numbers() {
        assert_eq!(coerce_integer("30"), Some(30));
        assert_eq!(coerce_integer(" 42 "), Some(42));
        assert_eq!(coerce_integer("4e1"), Some(40));
        assert_eq!(coerce_integer("3.5"), None);
        assert_eq!(coerce_integer("abc"), None);
        assert_eq!(coerce_integer(""), None);
    }

    #[test]
    fn candidate_maps_by_header_name() {
        let header = Header::from_row(&cells(&["city", "ID", "name", "age"]));
        let candidate = header.candidate(&cells(&["NYC", "3", "Ann", "thirty"]));
        assert_eq!(candidate.id, Some(3));
        assert_eq!(candidate.name, "Ann");
        assert_eq!(candidate.age, None);
        assert_eq!(candidate.city, "NYC");
    }

    #[test]
    fn candidate_missing_cells_are_blank() {
        let header = Header::default_columns();
        let candidate = header.candidate(&cells(&["9"]));
        assert_eq!(candidate.id, Some(9));
        assert_eq!(candidate.name, "");
        assert!(candidate.clone().into_record().is_some());
        assert_eq!(CandidateRecord::default().into_record(), None);
    }

    #[test]
    fn range_skips_header_row() {
        let range = RowRange::new(1, 3);
        assert_eq!(range.data_rows().collect::<Vec<_>>(), vec![2, 3]);
        assert!(RowRange::new(5, 4).is_inverted());
    }

    #[test]
    fn range_uses_camel_case_on_the_wire() {
        let range: RowRange = serde_json::from_str(r#"{"startRow":2,"endRow":4}"#).expect("parse");
        assert_eq!(range, RowRange::new(2, 4));
        let json = serde_json::to_value(range).expect("encode");
        assert_eq!(json["startRow"], 2);
    }

    #[test]
    fn record_row_blank_age() {
        let record = Record::new(3, "Ann", None, "NYC");
        assert_eq!(record.to_row(), cells(&["3", "Ann", "", "NYC"]));
    }

    #[test]
    fn provenance_display() {
        assert_eq!(Provenance::Grid.to_string(), "grid");
        assert_eq!(Provenance::Relational.to_string(), "relational");
    }
}
