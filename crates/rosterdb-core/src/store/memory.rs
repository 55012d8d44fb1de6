//! In-memory table store.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{apply_delete_column, apply_delete_rows, apply_insert_column, apply_write_rows, TableStore};
use crate::error::Error;
use crate::table::{Row, Table};

/// Table store held entirely in memory.
///
/// Used by tests and for previewing workbook files before they are loaded
/// into a persistent store. Writes to tables registered with
/// [`MemoryStore::reject_writes`] fail, which lets callers exercise
/// partial-failure paths.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<BTreeMap<String, Table>>,
    rejected: RwLock<HashSet<String>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a table, builder style.
    pub fn with_table(self, table: Table) -> Self {
        self.insert_table(table);
        self
    }

    /// Insert or replace a table.
    pub fn insert_table(&self, table: Table) {
        self.tables.write().insert(table.name.clone(), table);
    }

    /// Copy of a table's current contents.
    pub fn table(&self, name: &str) -> Option<Table> {
        self.tables.read().get(name).cloned()
    }

    /// Make every subsequent mutation of `name` fail.
    pub fn reject_writes(&self, name: &str) {
        self.rejected.write().insert(name.to_string());
    }

    /// Allow mutations of `name` again.
    pub fn accept_writes(&self, name: &str) {
        self.rejected.write().remove(name);
    }

    fn mutate<F>(&self, name: &str, op: F) -> Result<(), Error>
    where
        F: FnOnce(&mut Table) -> Result<(), Error>,
    {
        if self.rejected.read().contains(name) {
            return Err(Error::WriteFailed {
                table: name.to_string(),
                message: "writes rejected".to_string(),
            });
        }
        let mut tables = self.tables.write();
        let table = tables
            .get_mut(name)
            .ok_or_else(|| Error::TableNotFound(name.to_string()))?;
        op(table)
    }
}

#[async_trait]
impl TableStore for MemoryStore {
    async fn list_tables(&self) -> Result<Vec<String>, Error> {
        Ok(self.tables.read().keys().cloned().collect())
    }

    async fn read_table(&self, name: &str) -> Result<Table, Error> {
        self.table(name)
            .ok_or_else(|| Error::TableNotFound(name.to_string()))
    }

    async fn write_rows(&self, name: &str, start_offset: usize, rows: &[Row]) -> Result<(), Error> {
        self.mutate(name, |table| {
            apply_write_rows(table, start_offset, rows);
            Ok(())
        })
    }

    async fn insert_column(
        &self,
        name: &str,
        after_index: usize,
        header: &str,
    ) -> Result<(), Error> {
        self.mutate(name, |table| apply_insert_column(table, after_index, header))
    }

    async fn delete_column(&self, name: &str, index: usize) -> Result<(), Error> {
        self.mutate(name, |table| apply_delete_column(table, index))
    }

    async fn delete_rows(
        &self,
        name: &str,
        start_offset: usize,
        count: usize,
    ) -> Result<(), Error> {
        self.mutate(name, |table| apply_delete_rows(table, start_offset, count))
    }

    async fn replace_table(&self, table: &Table) -> Result<(), Error> {
        if self.rejected.read().contains(&table.name) {
            return Err(Error::WriteFailed {
                table: table.name.clone(),
                message: "writes rejected".to_string(),
            });
        }
        self.insert_table(table.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_missing_table() {
        let store = MemoryStore::new();
        let err = store.read_table("nope").await.unwrap_err();
        assert!(matches!(err, Error::TableNotFound(_)));
    }

    #[tokio::test]
    async fn test_write_and_read() {
        let store = MemoryStore::new().with_table(Table::new("t", ["Id"]).with_row(["1"]));
        store.write_rows("t", 0, &[Row::new(["9"])]).await.unwrap();
        let table = store.read_table("t").await.unwrap();
        assert_eq!(table.rows[0].get(0), "9");
    }

    #[tokio::test]
    async fn test_rejected_writes() {
        let store = MemoryStore::new().with_table(Table::new("t", ["Id"]).with_row(["1"]));
        store.reject_writes("t");
        let err = store.write_rows("t", 0, &[Row::new(["9"])]).await.unwrap_err();
        assert!(matches!(err, Error::WriteFailed { .. }));

        store.accept_writes("t");
        store.write_rows("t", 0, &[Row::new(["9"])]).await.unwrap();
    }

    #[tokio::test]
    async fn test_list_tables_sorted() {
        let store = MemoryStore::new()
            .with_table(Table::new("students", ["StudentId"]))
            .with_table(Table::new("parents", ["ParentId"]));
        assert_eq!(store.list_tables().await.unwrap(), vec!["parents", "students"]);
    }
}
