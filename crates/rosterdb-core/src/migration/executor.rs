//! Migration executor - orchestrates the identity migration workflow.
//!
//! Coordinates the preflight, snapshot, key assignment, remap and validate
//! phases. Store and snapshot calls are awaited one at a time, in plan order.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use super::definition::{MigrationDefinition, TableSpec};
use super::error::MigrationError;
use super::preview::{PreviewReport, TablePreview};
use super::remap::{write_dirty_runs, ForeignKeyRemapper, RemapReport};
use super::rollback::{RollbackManager, RollbackResult};
use super::state::{MigrationState, MigrationStatus};
use super::validator::{MigrationValidator, ValidationIssue, ValidationReport};
use crate::error::Error;
use crate::identity::{is_valid_id, IdGenerator, IdMapping, UuidGenerator};
use crate::snapshot::{BackupInfo, SnapshotProvider};
use crate::store::TableStore;
use crate::table::{sheet_row, Table};

/// Default name of the column holding pre-migration keys.
pub const DEFAULT_LEGACY_COLUMN: &str = "LegacyId";

/// Migration executor configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Header of the column holding pre-migration keys.
    pub legacy_column: String,
    /// Leave keys that already have the identifier shape alone.
    pub skip_already_migrated: bool,
    /// Delete the snapshot once it has been restored.
    pub delete_backup_after_restore: bool,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            legacy_column: DEFAULT_LEGACY_COLUMN.to_string(),
            skip_already_migrated: true,
            delete_backup_after_restore: false,
        }
    }
}

impl MigrationConfig {
    /// Use a different LegacyId header.
    pub fn legacy_column(mut self, name: impl Into<String>) -> Self {
        self.legacy_column = name.into();
        self
    }

    /// Set the re-run policy.
    pub fn skip_already_migrated(mut self, skip: bool) -> Self {
        self.skip_already_migrated = skip;
        self
    }

    /// Delete snapshots once restored.
    pub fn delete_backup_after_restore(mut self, delete: bool) -> Self {
        self.delete_backup_after_restore = delete;
        self
    }
}

/// Per-table change counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMigrationSummary {
    /// Table name.
    pub table: String,
    /// Rows given a new key.
    pub rows_migrated: usize,
    /// Live rows whose key already had the identifier shape.
    pub already_migrated: usize,
    /// Whether the LegacyId column was created by this run.
    pub legacy_column_created: bool,
}

/// Result of a migration execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationResult {
    /// Migration ID.
    pub migration_id: String,
    /// Final status.
    pub status: MigrationStatus,
    /// State machine trail.
    pub state: MigrationState,
    /// Snapshot taken before mutation; `None` when there was nothing to migrate.
    pub backup: Option<BackupInfo>,
    /// Per-table key assignment counts, in plan order.
    pub tables: Vec<TableMigrationSummary>,
    /// Foreign-key rewrite counts and failures.
    pub remap: RemapReport,
    /// Post-migration validation.
    pub validation: ValidationReport,
    /// Any warnings generated.
    pub warnings: Vec<String>,
}

impl MigrationResult {
    /// Total rows given a new key.
    pub fn rows_migrated(&self) -> usize {
        self.tables.iter().map(|t| t.rows_migrated).sum()
    }

    /// Validation failures found after the run.
    pub fn issues(&self) -> &[ValidationIssue] {
        &self.validation.issues
    }

    /// Whether the run finished without remap or validation failures.
    pub fn is_clean(&self) -> bool {
        self.status == MigrationStatus::Completed
    }
}

/// What preflight learned about the plan tables.
struct Preflight {
    /// Mapping with every existing identifier reserved.
    mapping: IdMapping,
    /// Per plan table counts before any change; `rows_migrated` holds the
    /// rows that would get a new key.
    tables: Vec<TableMigrationSummary>,
}

impl Preflight {
    fn pending(&self) -> usize {
        self.tables.iter().map(|t| t.rows_migrated).sum()
    }
}

/// Migration executor - orchestrates the migration workflow.
pub struct MigrationExecutor {
    store: Arc<dyn TableStore>,
    snapshots: Arc<dyn SnapshotProvider>,
    generator: Mutex<Box<dyn IdGenerator>>,
    config: MigrationConfig,
}

impl MigrationExecutor {
    /// Create a new migration executor issuing random v4 identifiers.
    pub fn new(
        store: Arc<dyn TableStore>,
        snapshots: Arc<dyn SnapshotProvider>,
        config: MigrationConfig,
    ) -> Self {
        Self {
            store,
            snapshots,
            generator: Mutex::new(Box::new(UuidGenerator)),
            config,
        }
    }

    /// Replace the identifier generator.
    pub fn with_generator(mut self, generator: Box<dyn IdGenerator>) -> Self {
        self.generator = Mutex::new(generator);
        self
    }

    /// Executor configuration.
    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// Report what `execute` would do, without mutating anything.
    #[instrument(skip(self, definition), fields(migration = %definition.id))]
    pub async fn preview(
        &self,
        definition: &MigrationDefinition,
    ) -> Result<PreviewReport, MigrationError> {
        definition.validate()?;

        let mut tables = Vec::with_capacity(definition.plan.len());
        for spec in &definition.plan {
            let table = self.read_declared(spec).await?;
            let preview = TablePreview::build(
                definition,
                &table,
                &spec.primary_key,
                spec.preserve_legacy,
                &self.config.legacy_column,
                self.config.skip_already_migrated,
            )
            .map_err(configuration_error)?;
            tables.push(preview);
        }

        let existing_backup = self.snapshots.find_latest_backup(&definition.id).await?;
        let already_optimal = tables.iter().all(|t| t.pending == 0);

        info!(
            tables = tables.len(),
            already_optimal,
            has_backup = existing_backup.is_some(),
            "preview finished"
        );

        Ok(PreviewReport {
            migration_id: definition.id.clone(),
            description: definition.description.clone(),
            tables,
            foreign_keys: definition.foreign_keys.clone(),
            existing_backup,
            already_optimal,
        })
    }

    /// Run the migration.
    ///
    /// Configuration and snapshot failures abort before any row changes. A
    /// run with no key to reassign takes no snapshot and changes nothing,
    /// and a run that would reassign keys while a snapshot for the migration
    /// is still stored is refused, so the pre-migration snapshot is never
    /// shadowed. A failed write while assigning keys aborts the run and
    /// leaves the snapshot in place. Remap and validation failures do not
    /// abort; they end the run as `CompletedWithErrors` and the caller
    /// decides whether to roll back.
    #[instrument(skip(self, definition), fields(migration = %definition.id))]
    pub async fn execute(
        &self,
        definition: &MigrationDefinition,
    ) -> Result<MigrationResult, MigrationError> {
        let preflight = self.preflight(definition).await?;
        let mut state = MigrationState::new(&definition.id);

        if preflight.pending() == 0 {
            info!("no keys to reassign, skipping snapshot");
            let validation = self.verify_unchecked(definition, None).await?;
            state.advance(MigrationStatus::Validated)?;
            let status = if validation.passed() {
                MigrationStatus::Completed
            } else {
                MigrationStatus::CompletedWithErrors
            };
            state.advance(status)?;
            return Ok(MigrationResult {
                migration_id: definition.id.clone(),
                status,
                state,
                backup: None,
                tables: preflight.tables,
                remap: RemapReport::default(),
                validation,
                warnings: Vec::new(),
            });
        }

        if let Some(existing) = self.snapshots.find_latest_backup(&definition.id).await? {
            return Err(MigrationError::BackupExists {
                migration_id: definition.id.clone(),
                backup_id: existing.backup_id,
            });
        }

        let mut mapping = preflight.mapping;
        let mut warnings = Vec::new();

        let backup = self
            .snapshots
            .create_backup(
                self.store.as_ref(),
                &definition.id,
                &definition.snapshot_tables(),
            )
            .await
            .map_err(|source| MigrationError::BackupFailed {
                migration_id: definition.id.clone(),
                source,
            })?;
        state.advance(MigrationStatus::BackedUp)?;
        info!(backup_id = %backup.backup_id, tables = backup.tables.len(), "snapshot taken");

        state.advance(MigrationStatus::Migrating)?;
        let mut tables = Vec::with_capacity(definition.plan.len());
        for spec in &definition.plan {
            let summary = self
                .migrate_table(spec, &mut mapping, &mut warnings)
                .await
                .map_err(|e| {
                    warn!(
                        table = %spec.name,
                        error = %e,
                        backup_id = %backup.backup_id,
                        "key assignment failed; snapshot kept for rollback"
                    );
                    e
                })?;
            tables.push(summary);
        }

        state.advance(MigrationStatus::Remapping)?;
        let remap = ForeignKeyRemapper::new(self.store.as_ref())
            .remap(definition, &mapping)
            .await;
        for failure in &remap.failures {
            warnings.push(MigrationError::from(failure).to_string());
        }

        let validation = self.verify_unchecked(definition, Some(&mapping)).await?;
        state.advance(MigrationStatus::Validated)?;

        let status = if remap.is_clean() && validation.passed() {
            MigrationStatus::Completed
        } else {
            warnings.push(format!(
                "migration '{}' finished with errors; snapshot {} kept, run rollback to revert",
                definition.id, backup.backup_id
            ));
            MigrationStatus::CompletedWithErrors
        };
        state.advance(status)?;

        info!(
            %status,
            rows = tables.iter().map(|t: &TableMigrationSummary| t.rows_migrated).sum::<usize>(),
            foreign_keys = remap.rows_updated(),
            failures = validation.failure_count(),
            "migration finished"
        );

        Ok(MigrationResult {
            migration_id: definition.id.clone(),
            status,
            state,
            backup: Some(backup),
            tables,
            remap,
            validation,
            warnings,
        })
    }

    /// Validate the current store contents against `definition`.
    #[instrument(skip(self, definition), fields(migration = %definition.id))]
    pub async fn verify(
        &self,
        definition: &MigrationDefinition,
    ) -> Result<ValidationReport, MigrationError> {
        self.preflight(definition).await?;
        self.verify_unchecked(definition, None).await
    }

    /// Undo a migration from its snapshot, or from legacy keys if none exists.
    pub async fn rollback(
        &self,
        definition: &MigrationDefinition,
    ) -> Result<RollbackResult, MigrationError> {
        RollbackManager::new(self.store.as_ref(), self.snapshots.as_ref(), &self.config)
            .rollback(definition)
            .await
    }

    /// Restore the latest snapshot for `migration_id`.
    pub async fn restore_from_backup(
        &self,
        migration_id: &str,
    ) -> Result<RollbackResult, MigrationError> {
        RollbackManager::new(self.store.as_ref(), self.snapshots.as_ref(), &self.config)
            .restore_from_backup(migration_id)
            .await
    }

    async fn verify_unchecked(
        &self,
        definition: &MigrationDefinition,
        mapping: Option<&IdMapping>,
    ) -> Result<ValidationReport, MigrationError> {
        let validator = MigrationValidator::new(self.store.as_ref(), &self.config.legacy_column);
        match mapping {
            Some(mapping) => validator.with_mapping(mapping).validate(definition).await,
            None => validator.validate(definition).await,
        }
    }

    /// Check the definition against the store before anything is touched.
    ///
    /// Reserves every existing identifier-shaped key, so new keys never
    /// collide with keys already in the plan tables, and counts the rows
    /// each plan table would reassign.
    async fn preflight(&self, definition: &MigrationDefinition) -> Result<Preflight, MigrationError> {
        definition.validate()?;

        let mut mapping = IdMapping::new();
        let mut tables = Vec::with_capacity(definition.plan.len());
        for spec in definition.plan.iter().chain(&definition.related) {
            let table = self.read_declared(spec).await?;

            let mut required = vec![spec.primary_key.as_str()];
            for fk in definition.foreign_keys.iter().filter(|fk| fk.table == spec.name) {
                required.push(fk.column.as_str());
            }
            let schema = table.schema(&required).map_err(configuration_error)?;

            if definition.is_planned(&spec.name) {
                let key_index = schema.column(&spec.primary_key)?;
                let mut summary = TableMigrationSummary {
                    table: spec.name.clone(),
                    rows_migrated: 0,
                    already_migrated: 0,
                    legacy_column_created: false,
                };
                for (_, row) in table.live_rows(key_index) {
                    let key = row.get(key_index).trim();
                    if is_valid_id(key) {
                        mapping.reserve(key);
                    }
                    if self.needs_new_key(key) {
                        summary.rows_migrated += 1;
                    } else {
                        summary.already_migrated += 1;
                    }
                }
                tables.push(summary);
            }
        }
        Ok(Preflight { mapping, tables })
    }

    async fn read_declared(&self, spec: &TableSpec) -> Result<Table, MigrationError> {
        self.store
            .read_table(&spec.name)
            .await
            .map_err(configuration_error)
    }

    async fn migrate_table(
        &self,
        spec: &TableSpec,
        mapping: &mut IdMapping,
        warnings: &mut Vec<String>,
    ) -> Result<TableMigrationSummary, MigrationError> {
        let legacy_column = self.config.legacy_column.as_str();
        let mut table = self.store.read_table(&spec.name).await?;
        let schema = table.schema(&[spec.primary_key.as_str()])?;
        let key_index = schema.column(&spec.primary_key)?;
        let mut legacy_index = schema.find(legacy_column);

        let pending = table
            .live_rows(key_index)
            .filter(|(_, row)| self.needs_new_key(row.get(key_index)))
            .count();

        let mut legacy_column_created = false;
        if spec.preserve_legacy && legacy_index.is_none() && pending > 0 {
            self.store
                .insert_column(&spec.name, key_index, legacy_column)
                .await?;
            table = self.store.read_table(&spec.name).await?;
            legacy_index = Some(
                table
                    .schema(&[spec.primary_key.as_str(), legacy_column])?
                    .column(legacy_column)?,
            );
            legacy_column_created = true;
            info!(table = %spec.name, column = legacy_column, "created legacy column");
        }
        let legacy_index = legacy_index.filter(|_| spec.preserve_legacy);

        let mut dirty = Vec::with_capacity(pending);
        let mut already_migrated = 0;
        {
            let mut generator = self.generator.lock();
            for (offset, row) in table.rows.iter_mut().enumerate() {
                let legacy = row.get(key_index).trim().to_string();
                if legacy.is_empty() {
                    continue;
                }
                if !self.needs_new_key(&legacy) {
                    already_migrated += 1;
                    continue;
                }

                let new_id = mapping.issue(&mut **generator);
                if !mapping.record(&spec.name, &legacy, &new_id) {
                    warnings.push(format!(
                        "{} row {}: duplicate legacy key '{}'; references keep the first row's id",
                        spec.name,
                        sheet_row(offset),
                        legacy
                    ));
                }
                row.set(key_index, new_id);
                if let Some(index) = legacy_index {
                    row.set(index, legacy);
                }
                dirty.push(offset);
            }
        }

        write_dirty_runs(self.store.as_ref(), &table, &dirty).await?;

        info!(
            table = %spec.name,
            migrated = dirty.len(),
            already_migrated,
            "assigned new keys"
        );

        Ok(TableMigrationSummary {
            table: spec.name.clone(),
            rows_migrated: dirty.len(),
            already_migrated,
            legacy_column_created,
        })
    }

    fn needs_new_key(&self, key: &str) -> bool {
        !(self.config.skip_already_migrated && is_valid_id(key.trim()))
    }
}

/// Missing tables and columns found before mutation are configuration errors.
fn configuration_error(err: Error) -> MigrationError {
    match err {
        Error::TableNotFound(_) | Error::ColumnNotFound { .. } | Error::SchemaMismatch { .. } => {
            MigrationError::configuration(err.to_string())
        }
        other => MigrationError::Store(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::SequenceGenerator;
    use crate::migration::definition::ForeignKeyDefinition;
    use crate::snapshot::MemorySnapshotProvider;
    use crate::store::MemoryStore;

    fn definition() -> MigrationDefinition {
        MigrationDefinition::new("staff-ids")
            .migrate(TableSpec::new("staff", "StaffId").preserving_legacy())
            .with_foreign_key(ForeignKeyDefinition::new("staff", "ManagerId", "staff"))
    }

    fn executor(store: Arc<MemoryStore>) -> MigrationExecutor {
        MigrationExecutor::new(
            store,
            Arc::new(MemorySnapshotProvider::new()),
            MigrationConfig::default(),
        )
        .with_generator(Box::new(SequenceGenerator::starting_at(1)))
    }

    #[test]
    fn test_config_builder() {
        let config = MigrationConfig::default()
            .legacy_column("OldId")
            .skip_already_migrated(false)
            .delete_backup_after_restore(true);
        assert_eq!(config.legacy_column, "OldId");
        assert!(!config.skip_already_migrated);
        assert!(config.delete_backup_after_restore);
    }

    #[tokio::test]
    async fn test_self_referencing_table() {
        let store = Arc::new(MemoryStore::new().with_table(
            Table::new("staff", ["StaffId", "Name", "ManagerId"])
                .with_row(["S1", "Ada", ""])
                .with_row(["S2", "Grace", "S1"]),
        ));

        let result = executor(Arc::clone(&store))
            .execute(&definition())
            .await
            .unwrap();

        assert!(result.is_clean(), "{:?}", result.issues());
        let staff = store.table("staff").unwrap();
        assert_eq!(staff.header, vec!["StaffId", "LegacyId", "Name", "ManagerId"]);
        assert_eq!(staff.rows[0].get(0), "00000000-0000-4000-8000-000000000001");
        assert_eq!(staff.rows[0].get(1), "S1");
        assert_eq!(staff.rows[1].get(3), staff.rows[0].get(0));
        assert!(result.tables[0].legacy_column_created);
    }

    #[tokio::test]
    async fn test_new_keys_avoid_existing_ones() {
        let taken = "00000000-0000-4000-8000-000000000001";
        let store = Arc::new(MemoryStore::new().with_table(
            Table::new("staff", ["StaffId", "LegacyId", "ManagerId"])
                .with_row([taken, "S0", ""])
                .with_row(["S2", "", ""]),
        ));

        let result = executor(Arc::clone(&store))
            .execute(&definition())
            .await
            .unwrap();

        assert_eq!(result.tables[0].already_migrated, 1);
        assert_eq!(result.tables[0].rows_migrated, 1);
        let staff = store.table("staff").unwrap();
        assert_eq!(staff.rows[1].get(0), "00000000-0000-4000-8000-000000000002");
    }

    #[tokio::test]
    async fn test_duplicate_legacy_key_warns() {
        let store = Arc::new(MemoryStore::new().with_table(
            Table::new("staff", ["StaffId", "ManagerId"])
                .with_row(["S1", ""])
                .with_row(["S1", ""]),
        ));

        let result = executor(Arc::clone(&store))
            .execute(&definition())
            .await
            .unwrap();

        assert_eq!(result.tables[0].rows_migrated, 2);
        assert!(result.warnings.iter().any(|w| w.contains("duplicate legacy key 'S1'")));
        let staff = store.table("staff").unwrap();
        assert_ne!(staff.rows[0].get(0), staff.rows[1].get(0));
    }

    #[tokio::test]
    async fn test_preview_follows_rerun_policy() {
        let shaped = "00000000-0000-4000-8000-000000000009";
        let store = Arc::new(MemoryStore::new().with_table(
            Table::new("staff", ["StaffId", "LegacyId", "ManagerId"]).with_row([shaped, "S9", ""]),
        ));

        let skipping = executor(Arc::clone(&store)).preview(&definition()).await.unwrap();
        assert!(skipping.already_optimal);
        assert_eq!(skipping.pending(), 0);

        let forced = MigrationExecutor::new(
            Arc::clone(&store) as Arc<dyn TableStore>,
            Arc::new(MemorySnapshotProvider::new()),
            MigrationConfig::default().skip_already_migrated(false),
        )
        .with_generator(Box::new(SequenceGenerator::starting_at(1)));
        let preview = forced.preview(&definition()).await.unwrap();
        assert!(!preview.already_optimal);
        assert_eq!(preview.pending(), 1);

        let result = forced.execute(&definition()).await.unwrap();
        assert_eq!(result.rows_migrated(), preview.pending());
        assert!(result.backup.is_some());
        assert_ne!(store.table("staff").unwrap().rows[0].get(0), shaped);
    }

    #[tokio::test]
    async fn test_missing_column_is_configuration_error() {
        let store = Arc::new(
            MemoryStore::new().with_table(Table::new("staff", ["StaffId"]).with_row(["S1"])),
        );

        let err = executor(Arc::clone(&store))
            .execute(&definition())
            .await
            .unwrap_err();

        assert!(matches!(err, MigrationError::Configuration { .. }));
        assert!(err.is_pre_mutation());
        assert_eq!(store.table("staff").unwrap().rows[0].get(0), "S1");
    }
}
