//! Tabular store adapter.
//!
//! The production store is a remote spreadsheet; every call may be a network
//! round trip, so the trait is async. Retries belong to the adapter
//! implementation, never to its callers.

mod memory;
mod sled_store;

pub use memory::MemoryStore;
pub use sled_store::SledTableStore;

use async_trait::async_trait;

use crate::error::Error;
use crate::table::{Row, Table};

/// Row-oriented table storage.
#[async_trait]
pub trait TableStore: Send + Sync {
    /// Names of every table in the store.
    async fn list_tables(&self) -> Result<Vec<String>, Error>;

    /// Read a table with its header row.
    async fn read_table(&self, name: &str) -> Result<Table, Error>;

    /// Overwrite rows starting at `start_offset`, extending the table if needed.
    async fn write_rows(&self, name: &str, start_offset: usize, rows: &[Row]) -> Result<(), Error>;

    /// Insert a new column directly after `after_index`.
    async fn insert_column(&self, name: &str, after_index: usize, header: &str)
        -> Result<(), Error>;

    /// Delete the column at `index`.
    async fn delete_column(&self, name: &str, index: usize) -> Result<(), Error>;

    /// Delete `count` rows starting at `start_offset`, shifting later rows up.
    async fn delete_rows(&self, name: &str, start_offset: usize, count: usize)
        -> Result<(), Error>;

    /// Replace a table's header and rows wholesale, creating it if absent.
    async fn replace_table(&self, table: &Table) -> Result<(), Error>;
}

pub(crate) fn apply_write_rows(table: &mut Table, start_offset: usize, rows: &[Row]) {
    let end = start_offset + rows.len();
    if table.rows.len() < end {
        table.rows.resize(end, Row::default());
    }
    for (i, row) in rows.iter().enumerate() {
        table.rows[start_offset + i] = row.clone();
    }
}

pub(crate) fn apply_insert_column(
    table: &mut Table,
    after_index: usize,
    header: &str,
) -> Result<(), Error> {
    if after_index >= table.header.len() {
        return Err(Error::OutOfRange {
            table: table.name.clone(),
            offset: after_index,
            len: table.header.len(),
        });
    }
    let at = after_index + 1;
    table.header.insert(at, header.to_string());
    for row in &mut table.rows {
        // Short ragged rows already read as empty in the new column.
        if row.len() > at {
            row.insert(at, "");
        }
    }
    Ok(())
}

pub(crate) fn apply_delete_column(table: &mut Table, index: usize) -> Result<(), Error> {
    if index >= table.header.len() {
        return Err(Error::OutOfRange {
            table: table.name.clone(),
            offset: index,
            len: table.header.len(),
        });
    }
    table.header.remove(index);
    for row in &mut table.rows {
        row.remove(index);
    }
    Ok(())
}

pub(crate) fn apply_delete_rows(
    table: &mut Table,
    start_offset: usize,
    count: usize,
) -> Result<(), Error> {
    let end = start_offset + count;
    if end > table.rows.len() {
        return Err(Error::OutOfRange {
            table: table.name.clone(),
            offset: end,
            len: table.rows.len(),
        });
    }
    table.rows.drain(start_offset..end);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Table {
        Table::new("t", ["Id", "Name"])
            .with_row(["1", "a"])
            .with_row(["2"])
            .with_row(["3", "c"])
    }

    #[test]
    fn test_write_rows_extends_table() {
        let mut table = sample();
        apply_write_rows(&mut table, 4, &[Row::new(["5", "e"])]);
        assert_eq!(table.len(), 5);
        assert!(table.rows[3].is_empty());
        assert_eq!(table.rows[4].get(0), "5");
    }

    #[test]
    fn test_insert_column_keeps_ragged_rows() {
        let mut table = sample();
        apply_insert_column(&mut table, 0, "LegacyId").unwrap();
        assert_eq!(table.header, vec!["Id", "LegacyId", "Name"]);
        assert_eq!(table.rows[0].cells(), &["1", "", "a"]);
        assert_eq!(table.rows[1].cells(), &["2"]);
    }

    #[test]
    fn test_insert_column_out_of_range() {
        let mut table = sample();
        assert!(matches!(
            apply_insert_column(&mut table, 2, "X"),
            Err(Error::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_delete_column_and_rows() {
        let mut table = sample();
        apply_delete_column(&mut table, 1).unwrap();
        assert_eq!(table.header, vec!["Id"]);
        assert_eq!(table.rows[2].cells(), &["3"]);

        apply_delete_rows(&mut table, 0, 2).unwrap();
        assert_eq!(table.len(), 1);
        assert!(apply_delete_rows(&mut table, 0, 2).is_err());
    }
}
