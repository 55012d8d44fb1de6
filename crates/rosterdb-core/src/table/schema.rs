//! Column descriptors resolved from a header row.

use std::collections::HashMap;

use crate::error::Error;

/// Column name to index mapping for one table read.
///
/// Resolved once from the header row and validated against the columns the
/// caller needs, so later lookups cannot silently miss.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    table: String,
    columns: Vec<String>,
    index: HashMap<String, usize>,
}

impl TableSchema {
    /// Resolve a header row, failing on duplicate headers or missing required columns.
    ///
    /// Header text is compared after trimming surrounding whitespace. Blank
    /// header cells are allowed and never match a column name.
    pub fn resolve(table: &str, header: &[String], required: &[&str]) -> Result<Self, Error> {
        let mut index = HashMap::with_capacity(header.len());
        let mut columns = Vec::with_capacity(header.len());

        for (position, raw) in header.iter().enumerate() {
            let name = raw.trim().to_string();
            if !name.is_empty() && index.insert(name.clone(), position).is_some() {
                return Err(Error::SchemaMismatch {
                    table: table.to_string(),
                    message: format!("duplicate header '{}'", name),
                });
            }
            columns.push(name);
        }

        let schema = Self {
            table: table.to_string(),
            columns,
            index,
        };

        for column in required {
            schema.column(column)?;
        }

        Ok(schema)
    }

    /// Index of a column that must exist.
    pub fn column(&self, name: &str) -> Result<usize, Error> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| Error::ColumnNotFound {
                table: self.table.clone(),
                column: name.to_string(),
            })
    }

    /// Index of a column that may be absent.
    pub fn find(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Table this schema was resolved for.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Trimmed column names in header order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Number of header cells.
    pub fn width(&self) -> usize {
        self.columns.len()
    }
}
