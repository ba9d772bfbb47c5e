use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::error::StoreError;
use crate::store::{GridRange, GridStore};
use crate::types::{GridRow, Header, DATA_START_ROW, HEADER_ROW};

/// Largest sheet row the grid will hold.
pub const MAX_ROWS: u32 = 1_000_000;

pub const DEFAULT_SHEET: &str = "Sheet1";

#[derive(Debug, Default)]
struct GridState {
    /// Index 0 is sheet row 1.
    rows: Vec<GridRow>,
    failures: VecDeque<String>,
}

/// In-memory grid. Row 1 holds the header.
#[derive(Debug, Clone)]
pub struct MemoryGrid {
    state: Arc<Mutex<GridState>>,
    sheet: Arc<str>,
}

impl Default for MemoryGrid {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryGrid {
    /// Grid containing only the default `id, name, age, city` header.
    pub fn new() -> Self {
        Self::with_header(&Header::default_columns())
    }

    pub fn with_header(header: &Header) -> Self {
        Self::from_rows(vec![header.columns().to_vec()])
    }

    /// Grid seeded with raw rows; `rows[0]` is the header.
    pub fn from_rows(rows: Vec<GridRow>) -> Self {
        Self {
            state: Arc::new(Mutex::new(GridState {
                rows,
                failures: VecDeque::new(),
            })),
            sheet: Arc::from(DEFAULT_SHEET),
        }
    }

    /// Name used when ranges are reported in A1 notation.
    pub fn with_sheet(mut self, sheet: &str) -> Self {
        self.sheet = Arc::from(sheet);
        self
    }

    pub fn sheet(&self) -> &str {
        &self.sheet
    }

    /// Every row including the header, exactly as stored.
    pub fn snapshot(&self) -> Vec<GridRow> {
        self.lock().rows.clone()
    }

    /// Cells of one sheet row; `None` when the row was never written.
    pub fn row(&self, row_number: u32) -> Option<GridRow> {
        let index = usize::try_from(row_number).ok()?.checked_sub(1)?;
        self.lock().rows.get(index).cloned()
    }

    /// Make the next store call fail with a backend error.
    pub fn fail_next(&self, message: impl Into<String>) {
        self.lock().failures.push_back(message.into());
    }

    fn lock(&self) -> MutexGuard<'_, GridState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Index of a sheet row, or a constraint error naming `range` on this sheet.
    fn row_index(
        &self,
        row_number: u32,
        range: GridRange,
        state: &GridState,
    ) -> Result<usize, StoreError> {
        if !(HEADER_ROW..=MAX_ROWS).contains(&row_number) {
            let width = state.rows.first().map_or(0, Vec::len);
            return Err(StoreError::Constraint(format!(
                "{} is outside the grid (rows 1..={MAX_ROWS})",
                range.a1(&self.sheet, last_column(width))
            )));
        }
        Ok(row_number as usize - 1)
    }

    fn take_failure(state: &mut GridState) -> Result<(), StoreError> {
        match state.failures.pop_front() {
            Some(message) => Err(StoreError::Backend(message)),
            None => Ok(()),
        }
    }
}

fn is_blank(row: &[String]) -> bool {
    row.iter().all(|cell| cell.trim().is_empty())
}

fn trim_row(row: &[String]) -> GridRow {
    let len = row
        .iter()
        .rposition(|cell| !cell.is_empty())
        .map_or(0, |last| last + 1);
    row[..len].to_vec()
}

/// Letter of the last header column, `D` for the default four.
fn last_column(width: usize) -> char {
    let offset = u8::try_from(width.clamp(1, 26) - 1).unwrap_or(0);
    char::from(b'A' + offset)
}

#[async_trait]
impl GridStore for MemoryGrid {
    async fn get(&self, range: GridRange) -> Result<Vec<GridRow>, StoreError> {
        let mut state = self.lock();
        Self::take_failure(&mut state)?;

        let start = self.row_index(range.start_row, range, &state)?;
        let end = match range.end_row {
            Some(end) => (end as usize).min(state.rows.len()),
            None => state
                .rows
                .iter()
                .rposition(|row| !is_blank(row))
                .map_or(0, |last| last + 1),
        };
        if start >= end {
            return Ok(Vec::new());
        }
        Ok(state.rows[start..end].iter().map(|r| trim_row(r)).collect())
    }

    async fn append(&self, row: GridRow) -> Result<u32, StoreError> {
        let mut state = self.lock();
        Self::take_failure(&mut state)?;

        let last_filled = state
            .rows
            .iter()
            .rposition(|row| !is_blank(row))
            .map_or(0, |last| last + 1);
        let index = last_filled.max(DATA_START_ROW as usize - 1);
        if index >= MAX_ROWS as usize {
            return Err(StoreError::Constraint("grid is full".to_string()));
        }
        if state.rows.len() <= index {
            state.rows.resize(index + 1, Vec::new());
        }
        state.rows[index] = row;
        u32::try_from(index + 1).map_err(|_| StoreError::Constraint("grid is full".to_string()))
    }

    async fn update(&self, row_number: u32, row: GridRow) -> Result<(), StoreError> {
        let mut state = self.lock();
        Self::take_failure(&mut state)?;

        let index = self.row_index(row_number, GridRange::row(row_number), &state)?;
        if state.rows.len() <= index {
            state.rows.resize(index + 1, Vec::new());
        }
        state.rows[index] = row;
        Ok(())
    }

    async fn clear(&self, row_number: u32) -> Result<(), StoreError> {
        let mut state = self.lock();
        Self::take_failure(&mut state)?;

        let index = self.row_index(row_number, GridRange::row(row_number), &state)?;
        if let Some(row) = state.rows.get_mut(index) {
            row.clear();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cells(values: &[&str]) -> GridRow {
        values.iter().map(|v| (*v).to_owned()).collect()
    }

    #[tokio::test]
    async fn append_goes_after_last_filled_row() {
        let grid = MemoryGrid::new();
        assert_eq!(grid.append(cells(&["1", "A", "", "X"])).await.unwrap(), 2);
        assert_eq!(grid.append(cells(&["2", "B", "", "Y"])).await.unwrap(), 3);

        grid.clear(3).await.unwrap();
        assert_eq!(
            grid.append(cells(&["3", "C", "", "Z"])).await.unwrap(),
            3,
            "trailing blank rows are reused"
        );
    }

    #[tokio::test]
    async fn get_trims_trailing_blanks() {
        let grid = MemoryGrid::new();
        grid.update(4, cells(&["3", "Ann", "", ""])).await.unwrap();

        let rows = grid.get(GridRange::data()).await.unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows[0].is_empty());
        assert_eq!(rows[2], cells(&["3", "Ann"]));

        let header = grid.get(GridRange::header()).await.unwrap();
        assert_eq!(header[0][0], "id");
    }

    #[tokio::test]
    async fn injected_failure_leaves_grid_untouched() {
        let grid = MemoryGrid::new();
        grid.fail_next("quota exceeded");
        let err = grid.update(2, cells(&["1"])).await.unwrap_err();
        assert!(err.to_string().contains("quota exceeded"));
        assert_eq!(grid.snapshot().len(), 1);
        grid.update(2, cells(&["1"])).await.expect("second call succeeds");
    }

    #[tokio::test]
    async fn rows_past_the_limit_are_rejected() {
        let grid = MemoryGrid::new();
        let err = grid.update(3_000_001, cells(&["3000000", "Far"])).await.unwrap_err();
        assert!(matches!(err, StoreError::Constraint(_)), "{err}");
        assert!(err.to_string().contains("Sheet1!A3000001:D3000001"), "{err}");
        assert_eq!(grid.snapshot().len(), 1, "nothing allocated");

        grid.update(MAX_ROWS, cells(&["x"])).await.expect("last row is writable");
        let err = grid.append(cells(&["y"])).await.unwrap_err();
        assert_eq!(err.to_string(), "constraint violation: grid is full");
    }

    #[tokio::test]
    async fn errors_name_the_configured_sheet() {
        let grid = MemoryGrid::with_header(&Header(cells(&["id", "name", "age", "city", "team"])))
            .with_sheet("Users");
        assert_eq!(grid.sheet(), "Users");
        let err = grid.clear(0).await.unwrap_err();
        assert!(err.to_string().contains("Users!A0:E0"), "{err}");
    }
}
