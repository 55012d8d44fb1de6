//! In-memory view of a spreadsheet table.
//!
//! A [`Table`] is a header row plus an ordered list of data rows. Rows are
//! addressed positionally by their zero-based offset below the header; cell
//! values are the text the spreadsheet holds. Rows may be ragged: a missing
//! trailing cell reads as the empty string.

mod schema;

pub use schema::TableSchema;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// A single data row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row(pub Vec<String>);

impl Row {
    /// Create a row from anything that yields cell values.
    pub fn new<I, S>(cells: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(cells.into_iter().map(Into::into).collect())
    }

    /// Cell text at `index`, or `""` past the end of a ragged row.
    pub fn get(&self, index: usize) -> &str {
        self.0.get(index).map(String::as_str).unwrap_or("")
    }

    /// Set the cell at `index`, padding the row with empty cells if needed.
    pub fn set(&mut self, index: usize, value: impl Into<String>) {
        if self.0.len() <= index {
            self.0.resize(index + 1, String::new());
        }
        self.0[index] = value.into();
    }

    /// Insert a cell at `index`, shifting later cells right.
    pub fn insert(&mut self, index: usize, value: impl Into<String>) {
        if self.0.len() < index {
            self.0.resize(index, String::new());
        }
        self.0.insert(index, value.into());
    }

    /// Remove the cell at `index` if present.
    pub fn remove(&mut self, index: usize) {
        if index < self.0.len() {
            self.0.remove(index);
        }
    }

    /// Number of cells physically present.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the row has no cells at all.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Cell values.
    pub fn cells(&self) -> &[String] {
        &self.0
    }
}

/// A named table: header row plus data rows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    /// Table (sheet) name.
    pub name: String,
    /// Header row.
    pub header: Vec<String>,
    /// Data rows in sheet order.
    pub rows: Vec<Row>,
}

impl Table {
    /// Create an empty table with the given header.
    pub fn new<I, S>(name: impl Into<String>, header: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            header: header.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    /// Append a row, builder style.
    pub fn with_row<I, S>(mut self, cells: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rows.push(Row::new(cells));
        self
    }

    /// Resolve the header into a schema, requiring the given columns.
    pub fn schema(&self, required: &[&str]) -> Result<TableSchema, Error> {
        TableSchema::resolve(&self.name, &self.header, required)
    }

    /// Iterate over live rows (non-empty value in `key_index`) with their offsets.
    pub fn live_rows(&self, key_index: usize) -> impl Iterator<Item = (usize, &Row)> {
        self.rows
            .iter()
            .enumerate()
            .filter(move |(_, row)| is_live_key(row.get(key_index)))
    }

    /// Number of data rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table has no data rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Whether a key cell identifies a live row.
///
/// Whitespace-only cells count as blank placeholders.
pub fn is_live_key(value: &str) -> bool {
    !value.trim().is_empty()
}

/// 1-based spreadsheet row number for a data-row offset (the header is row 1).
pub fn sheet_row(offset: usize) -> usize {
    offset + 2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ragged_row_reads_empty() {
        let row = Row::new(["a", "b"]);
        assert_eq!(row.get(1), "b");
        assert_eq!(row.get(5), "");
    }

    #[test]
    fn test_set_pads_row() {
        let mut row = Row::new(["a"]);
        row.set(3, "d");
        assert_eq!(row.cells(), &["a", "", "", "d"]);
    }

    #[test]
    fn test_insert_and_remove_cell() {
        let mut row = Row::new(["id", "name"]);
        row.insert(1, "legacy");
        assert_eq!(row.cells(), &["id", "legacy", "name"]);
        row.remove(1);
        assert_eq!(row.cells(), &["id", "name"]);
        row.remove(10);
        assert_eq!(row.len(), 2);
    }

    #[test]
    fn test_live_rows_skip_blank_keys() {
        let table = Table::new("students", ["StudentId", "Name"])
            .with_row(["S1", "Ann"])
            .with_row(["", "placeholder"])
            .with_row(["  ", "whitespace"])
            .with_row(["S2", "Bob"]);

        let offsets: Vec<usize> = table.live_rows(0).map(|(offset, _)| offset).collect();
        assert_eq!(offsets, vec![0, 3]);
    }

    #[test]
    fn test_sheet_row_numbering() {
        assert_eq!(sheet_row(0), 2);
        assert_eq!(sheet_row(9), 11);
    }
}
