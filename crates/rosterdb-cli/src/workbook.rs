//! JSON workbook import and export.

use std::path::Path;

use rosterdb_core::{Table, TableStore};
use serde::{Deserialize, Serialize};

/// Every table of a workbook, in one JSON document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workbook {
    /// Tables in the order they are listed.
    pub tables: Vec<Table>,
}

impl Workbook {
    /// Read a workbook file.
    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let json = std::fs::read_to_string(path)?;
        let workbook: Workbook = serde_json::from_str(&json)?;
        for table in &workbook.tables {
            table.schema(&[])?;
        }
        Ok(workbook)
    }

    /// Write a workbook file.
    pub fn save(&self, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Snapshot every table in `store`.
    pub async fn read_from(store: &dyn TableStore) -> Result<Self, rosterdb_core::Error> {
        let mut tables = Vec::new();
        for name in store.list_tables().await? {
            tables.push(store.read_table(&name).await?);
        }
        Ok(Self { tables })
    }

    /// Replace each listed table in `store`; other tables are left alone.
    pub async fn write_to(&self, store: &dyn TableStore) -> Result<usize, rosterdb_core::Error> {
        for table in &self.tables {
            store.replace_table(table).await?;
        }
        Ok(self.tables.len())
    }
}
