//! Foreign-key propagation.
//!
//! After every plan table has new keys, each declared foreign-key column is
//! rewritten through the run's [`IdMapping`]. Values the mapping does not
//! know are left alone: they may point at rows outside this migration.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::definition::{ForeignKeyDefinition, MigrationDefinition};
use super::error::MigrationError;
use crate::identity::IdMapping;
use crate::store::TableStore;
use crate::table::{Row, Table};

/// Rewrite counts for one foreign key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemapCount {
    /// Source table.
    pub table: String,
    /// Source column.
    pub column: String,
    /// Referenced table.
    pub references: String,
    /// Rows whose cell changed.
    pub rows_updated: usize,
    /// Individual references replaced (differs from rows for delimited cells).
    pub values_rewritten: usize,
}

/// A foreign key that could not be rewritten.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemapFailure {
    /// Source table.
    pub table: String,
    /// Source column.
    pub column: String,
    /// Why it failed.
    pub reason: String,
}

impl From<&RemapFailure> for MigrationError {
    fn from(failure: &RemapFailure) -> Self {
        MigrationError::RemapFailed {
            table: failure.table.clone(),
            column: failure.column.clone(),
            reason: failure.reason.clone(),
        }
    }
}

/// Outcome of a remap pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemapReport {
    /// Per-foreign-key counts for definitions that were processed.
    pub counts: Vec<RemapCount>,
    /// Definitions that failed; the rest were still processed.
    pub failures: Vec<RemapFailure>,
}

impl RemapReport {
    /// Total rows updated across all foreign keys.
    pub fn rows_updated(&self) -> usize {
        self.counts.iter().map(|c| c.rows_updated).sum()
    }

    /// Whether every foreign key was processed.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Rewrites foreign-key columns through an id mapping.
pub struct ForeignKeyRemapper<'a> {
    store: &'a dyn TableStore,
}

impl<'a> ForeignKeyRemapper<'a> {
    /// Create a remapper over `store`.
    pub fn new(store: &'a dyn TableStore) -> Self {
        Self { store }
    }

    /// Rewrite every foreign key declared by `definition`.
    ///
    /// Failures are collected per foreign key rather than aborting the pass.
    pub async fn remap(&self, definition: &MigrationDefinition, mapping: &IdMapping) -> RemapReport {
        let mut report = RemapReport::default();

        for fk in &definition.foreign_keys {
            match self.remap_one(definition, fk, mapping).await {
                Ok(count) => {
                    debug!(
                        foreign_key = %fk,
                        rows = count.rows_updated,
                        values = count.values_rewritten,
                        "remapped foreign key"
                    );
                    report.counts.push(count);
                }
                Err(e) => {
                    warn!(foreign_key = %fk, error = %e, "foreign key remap failed");
                    report.failures.push(RemapFailure {
                        table: fk.table.clone(),
                        column: fk.column.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!(
            migration = %definition.id,
            rows = report.rows_updated(),
            failures = report.failures.len(),
            "foreign key remap finished"
        );
        report
    }

    async fn remap_one(
        &self,
        definition: &MigrationDefinition,
        fk: &ForeignKeyDefinition,
        mapping: &IdMapping,
    ) -> Result<RemapCount, MigrationError> {
        let mut count = RemapCount {
            table: fk.table.clone(),
            column: fk.column.clone(),
            references: fk.references.clone(),
            rows_updated: 0,
            values_rewritten: 0,
        };

        if mapping.table_len(&fk.references) == 0 {
            return Ok(count);
        }

        let spec = definition.table_spec(&fk.table).ok_or_else(|| {
            MigrationError::configuration(format!("foreign key {} has no table contract", fk))
        })?;

        let mut table = self.store.read_table(&fk.table).await?;
        let schema = table.schema(&[spec.primary_key.as_str(), fk.column.as_str()])?;
        let key_index = schema.column(&spec.primary_key)?;
        let column_index = schema.column(&fk.column)?;

        let mut dirty = Vec::new();
        for (offset, row) in table.rows.iter_mut().enumerate() {
            if !crate::table::is_live_key(row.get(key_index)) {
                continue;
            }
            let rewritten =
                fk.rewrite(row.get(column_index), |v| mapping.lookup(&fk.references, v));
            if let Some((cell, replaced)) = rewritten {
                row.set(column_index, cell);
                dirty.push(offset);
                count.values_rewritten += replaced;
            }
        }
        count.rows_updated = dirty.len();

        write_dirty_runs(self.store, &table, &dirty).await?;
        Ok(count)
    }
}

/// Write back only the given row offsets, one call per contiguous run.
pub(crate) async fn write_dirty_runs(
    store: &dyn TableStore,
    table: &Table,
    dirty: &[usize],
) -> Result<(), MigrationError> {
    for (start, end) in contiguous_runs(dirty) {
        let rows: &[Row] = &table.rows[start..end];
        store.write_rows(&table.name, start, rows).await?;
    }
    Ok(())
}

/// Half-open `[start, end)` ranges covering sorted offsets.
fn contiguous_runs(offsets: &[usize]) -> Vec<(usize, usize)> {
    let mut runs: Vec<(usize, usize)> = Vec::new();
    for &offset in offsets {
        match runs.last_mut() {
            Some((_, end)) if *end == offset => *end += 1,
            _ => runs.push((offset, offset + 1)),
        }
    }
    runs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::definition::TableSpec;
    use crate::store::MemoryStore;

    fn definition() -> MigrationDefinition {
        MigrationDefinition::new("family-ids")
            .migrate(TableSpec::new("parents", "ParentId"))
            .migrate(TableSpec::new("students", "StudentId"))
            .with_foreign_key(ForeignKeyDefinition::new("students", "Parent1Id", "parents"))
            .with_foreign_key(
                ForeignKeyDefinition::new("students", "GuardianIds", "parents").delimited(";"),
            )
    }

    fn store() -> MemoryStore {
        MemoryStore::new().with_table(
            Table::new("students", ["StudentId", "Parent1Id", "GuardianIds"])
                .with_row(["S1", "P1", "P1;P2"])
                .with_row(["", "P1", ""])
                .with_row(["S2", "EXT-9", ""])
                .with_row(["S3", "P2", "P2"]),
        )
    }

    fn mapping() -> IdMapping {
        let mut mapping = IdMapping::new();
        mapping.record("parents", "P1", "u1");
        mapping.record("parents", "P2", "u2");
        mapping
    }

    #[test]
    fn test_contiguous_runs() {
        assert_eq!(contiguous_runs(&[0, 1, 2, 5, 7, 8]), vec![(0, 3), (5, 6), (7, 9)]);
        assert!(contiguous_runs(&[]).is_empty());
    }

    #[tokio::test]
    async fn test_remap_rewrites_known_values_only() {
        let store = store();
        let report = ForeignKeyRemapper::new(&store)
            .remap(&definition(), &mapping())
            .await;

        assert!(report.is_clean());
        let students = store.table("students").unwrap();
        assert_eq!(students.rows[0].get(1), "u1");
        // blank-key row untouched
        assert_eq!(students.rows[1].get(1), "P1");
        // unknown reference passes through
        assert_eq!(students.rows[2].get(1), "EXT-9");
        assert_eq!(students.rows[3].get(1), "u2");

        assert_eq!(students.rows[0].get(2), "u1;u2");
        assert_eq!(report.counts[0].rows_updated, 2);
        assert_eq!(report.counts[1].rows_updated, 2);
        assert_eq!(report.counts[1].values_rewritten, 3);
    }

    #[tokio::test]
    async fn test_remap_failure_is_collected() {
        let store = store();
        store.reject_writes("students");

        let report = ForeignKeyRemapper::new(&store)
            .remap(&definition(), &mapping())
            .await;

        assert_eq!(report.failures.len(), 2);
        assert_eq!(report.failures[0].column, "Parent1Id");
        assert!(!report.is_clean());
    }

    #[tokio::test]
    async fn test_empty_mapping_skips_reads() {
        let store = MemoryStore::new();
        let report = ForeignKeyRemapper::new(&store)
            .remap(&definition(), &IdMapping::new())
            .await;
        assert!(report.is_clean());
        assert_eq!(report.rows_updated(), 0);
    }
}
