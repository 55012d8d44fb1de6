//! Read-only migration preview.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::definition::{ForeignKeyDefinition, MigrationDefinition};
use crate::error::Error;
use crate::identity::{IdClassification, ShapeCounts};
use crate::snapshot::BackupInfo;
use crate::table::Table;

/// What a migration would find in one plan table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TablePreview {
    /// Table name.
    pub table: String,
    /// Primary-key column.
    pub primary_key: String,
    /// Data rows, including blank-key rows.
    pub total_rows: usize,
    /// Rows with a non-empty primary key.
    pub live_rows: usize,
    /// Rows that would be skipped.
    pub blank_rows: usize,
    /// Key shape counts over live rows.
    pub shape: ShapeCounts,
    /// Overall key shape.
    pub classification: IdClassification,
    /// Whether the LegacyId column already exists.
    pub legacy_column_present: bool,
    /// Whether this table keeps legacy keys.
    pub preserve_legacy: bool,
    /// Rows an execute would assign new keys to under the current re-run policy.
    pub pending: usize,
    /// Tables this one references.
    pub depends_on: Vec<String>,
    /// Tables referencing this one.
    pub referenced_by: Vec<String>,
}

impl TablePreview {
    pub(crate) fn build(
        definition: &MigrationDefinition,
        table: &Table,
        primary_key: &str,
        preserve_legacy: bool,
        legacy_column: &str,
        skip_already_migrated: bool,
    ) -> Result<Self, Error> {
        let schema = table.schema(&[primary_key])?;
        let key_index = schema.column(primary_key)?;
        let live: Vec<&str> = table
            .live_rows(key_index)
            .map(|(_, row)| row.get(key_index).trim())
            .collect();
        let shape = ShapeCounts::tally(live.iter().copied());
        let pending = if skip_already_migrated {
            shape.legacy
        } else {
            live.len()
        };

        debug!(table = %table.name, live = live.len(), classification = %shape.classification(), "previewed table");

        Ok(Self {
            table: table.name.clone(),
            primary_key: primary_key.to_string(),
            total_rows: table.len(),
            live_rows: live.len(),
            blank_rows: table.len() - live.len(),
            shape,
            classification: shape.classification(),
            legacy_column_present: schema.find(legacy_column).is_some(),
            preserve_legacy,
            pending,
            depends_on: definition.depends_on(&table.name),
            referenced_by: definition.referenced_by(&table.name),
        })
    }

}

/// Dry-run report for a migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewReport {
    /// Migration previewed.
    pub migration_id: String,
    /// Human-readable summary of the migration.
    pub description: String,
    /// One entry per plan table, in plan order.
    pub tables: Vec<TablePreview>,
    /// Foreign keys that would be rewritten.
    pub foreign_keys: Vec<ForeignKeyDefinition>,
    /// Latest snapshot already stored for this migration.
    pub existing_backup: Option<BackupInfo>,
    /// Whether every plan table already has identifier-shaped keys.
    pub already_optimal: bool,
}

impl PreviewReport {
    /// Total keys an execute would reassign.
    pub fn pending(&self) -> usize {
        self.tables.iter().map(|t| t.pending).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::definition::TableSpec;

    #[test]
    fn test_table_preview_counts() {
        let definition = MigrationDefinition::new("family-ids")
            .migrate(TableSpec::new("parents", "ParentId").preserving_legacy())
            .migrate(TableSpec::new("students", "StudentId"))
            .with_foreign_key(ForeignKeyDefinition::new("students", "Parent1Id", "parents"));
        let table = Table::new("parents", ["ParentId", "Name"])
            .with_row(["P1", "Ada"])
            .with_row(["", "draft"])
            .with_row(["11111111-1111-4111-8111-111111111111", "Grace"]);

        let preview = TablePreview::build(&definition, &table, "ParentId", true, "LegacyId", true).unwrap();

        assert_eq!(preview.total_rows, 3);
        assert_eq!(preview.live_rows, 2);
        assert_eq!(preview.blank_rows, 1);
        assert_eq!(preview.classification, IdClassification::Mixed);
        assert_eq!(preview.pending, 1);
        assert!(!preview.legacy_column_present);
        assert_eq!(preview.referenced_by, vec!["students"]);
        assert!(preview.depends_on.is_empty());
    }

    #[test]
    fn test_reassign_everything_counts_shaped_keys() {
        let definition = MigrationDefinition::new("m").migrate(TableSpec::new("parents", "ParentId"));
        let table = Table::new("parents", ["ParentId"])
            .with_row(["11111111-1111-4111-8111-111111111111"])
            .with_row(["22222222-2222-4222-9222-222222222222"])
            .with_row([""]);

        let skipping = TablePreview::build(&definition, &table, "ParentId", false, "LegacyId", true).unwrap();
        assert_eq!(skipping.pending, 0);

        let forced = TablePreview::build(&definition, &table, "ParentId", false, "LegacyId", false).unwrap();
        assert_eq!(forced.pending, 2);
        assert_eq!(forced.classification, IdClassification::AlreadyMigrated);
    }

    #[test]
    fn test_missing_key_column() {
        let definition = MigrationDefinition::new("m").migrate(TableSpec::new("parents", "ParentId"));
        let table = Table::new("parents", ["Id"]);
        assert!(matches!(
            TablePreview::build(&definition, &table, "ParentId", false, "LegacyId", true),
            Err(Error::ColumnNotFound { .. })
        ));
    }
}
