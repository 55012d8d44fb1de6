//! Local workbook store backed by sled.
//!
//! Each table is one record in the `workbook:tables` tree, keyed by table
//! name and encoded with rkyv. Every mutation rewrites the table record, which
//! matches the whole-range writes the spreadsheet adapter performs.

use async_trait::async_trait;
use rkyv::util::AlignedVec;
use rkyv::{Archive, Deserialize, Serialize};
use tracing::debug;

use super::{apply_delete_column, apply_delete_rows, apply_insert_column, apply_write_rows, TableStore};
use crate::error::Error;
use crate::table::{Row, Table};

#[derive(Debug, Clone, Archive, Serialize, Deserialize)]
struct StoredTable {
    header: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl StoredTable {
    fn from_table(table: &Table) -> Self {
        Self {
            header: table.header.clone(),
            rows: table.rows.iter().map(|row| row.0.clone()).collect(),
        }
    }

    fn into_table(self, name: &str) -> Table {
        Table {
            name: name.to_string(),
            header: self.header,
            rows: self.rows.into_iter().map(Row).collect(),
        }
    }

    fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map(|v| v.to_vec())
            .map_err(|e| Error::Serialization(e.to_string()))
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        // sled hands back unaligned buffers.
        let mut aligned = AlignedVec::<16>::with_capacity(bytes.len());
        aligned.extend_from_slice(bytes);
        rkyv::from_bytes::<Self, rkyv::rancor::Error>(&aligned)
            .map_err(|e| Error::Deserialization(e.to_string()))
    }
}

/// Persistent table store for a local workbook.
pub struct SledTableStore {
    tree: sled::Tree,
}

impl SledTableStore {
    /// Tree name for workbook tables.
    pub const TREE_NAME: &'static str = "workbook:tables";

    /// Open or create the workbook tree in an existing database.
    pub fn open(db: &sled::Db) -> Result<Self, Error> {
        let tree = db.open_tree(Self::TREE_NAME)?;
        Ok(Self { tree })
    }

    /// Flush pending writes to disk.
    pub fn flush(&self) -> Result<(), Error> {
        self.tree.flush()?;
        Ok(())
    }

    fn load(&self, name: &str) -> Result<Table, Error> {
        match self.tree.get(name.as_bytes())? {
            Some(bytes) => Ok(StoredTable::from_bytes(&bytes)?.into_table(name)),
            None => Err(Error::TableNotFound(name.to_string())),
        }
    }

    fn save(&self, table: &Table) -> Result<(), Error> {
        let bytes = StoredTable::from_table(table).to_bytes()?;
        self.tree.insert(table.name.as_bytes(), bytes)?;
        debug!(table = %table.name, rows = table.rows.len(), "saved table");
        Ok(())
    }

    fn mutate<F>(&self, name: &str, op: F) -> Result<(), Error>
    where
        F: FnOnce(&mut Table) -> Result<(), Error>,
    {
        let mut table = self.load(name)?;
        op(&mut table)?;
        self.save(&table)
    }
}

#[async_trait]
impl TableStore for SledTableStore {
    async fn list_tables(&self) -> Result<Vec<String>, Error> {
        let mut names = Vec::new();
        for key in self.tree.iter().keys() {
            let key = key?;
            names.push(String::from_utf8_lossy(&key).into_owned());
        }
        Ok(names)
    }

    async fn read_table(&self, name: &str) -> Result<Table, Error> {
        self.load(name)
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
        self.save(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_temp() -> (SledTableStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path()).unwrap();
        (SledTableStore::open(&db).unwrap(), dir)
    }

    #[tokio::test]
    async fn test_replace_and_read() {
        let (store, _dir) = open_temp();
        let table = Table::new("parents", ["ParentId", "Email"])
            .with_row(["P1", "a@x.com"])
            .with_row(["", ""]);

        store.replace_table(&table).await.unwrap();
        let loaded = store.read_table("parents").await.unwrap();

        assert_eq!(loaded, table);
        assert_eq!(store.list_tables().await.unwrap(), vec!["parents"]);
    }

    #[tokio::test]
    async fn test_column_operations_persist() {
        let (store, _dir) = open_temp();
        store
            .replace_table(&Table::new("t", ["Id", "Name"]).with_row(["1", "a"]))
            .await
            .unwrap();

        store.insert_column("t", 0, "LegacyId").await.unwrap();
        store.write_rows("t", 0, &[Row::new(["u", "1", "a"])]).await.unwrap();
        let table = store.read_table("t").await.unwrap();
        assert_eq!(table.header, vec!["Id", "LegacyId", "Name"]);
        assert_eq!(table.rows[0].get(1), "1");

        store.delete_column("t", 1).await.unwrap();
        let table = store.read_table("t").await.unwrap();
        assert_eq!(table.header, vec!["Id", "Name"]);
    }

    #[tokio::test]
    async fn test_missing_table() {
        let (store, _dir) = open_temp();
        assert!(matches!(
            store.read_table("ghost").await,
            Err(Error::TableNotFound(_))
        ));
    }
}
