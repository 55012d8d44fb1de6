//! Rollback of identity migrations.
//!
//! The snapshot taken before mutation is authoritative. When none exists and
//! the definition keeps legacy keys, the migration is reversed in place from
//! the LegacyId column; that path is reported as degraded because rows added
//! after the migration, and any table without legacy keys, are not restored.
//!
//! Legacy reversal rewrites foreign keys first, then primary keys, and drops
//! LegacyId last. If any foreign key cannot be reverted it stops before the
//! primary keys are touched, so the new-to-legacy mapping survives in the
//! store and a retry picks up where it failed.

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use super::definition::MigrationDefinition;
use super::error::MigrationError;
use super::executor::MigrationConfig;
use super::remap::{write_dirty_runs, ForeignKeyRemapper, RemapReport};
use super::state::MigrationStatus;
use crate::error::SnapshotError;
use crate::identity::IdMapping;
use crate::snapshot::SnapshotProvider;
use crate::store::TableStore;

/// How a rollback was carried out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RollbackPath {
    /// Tables restored from a snapshot.
    Snapshot {
        /// Snapshot that was restored.
        backup_id: String,
    },
    /// Keys copied back from the LegacyId column.
    LegacyReversal,
}

impl std::fmt::Display for RollbackPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RollbackPath::Snapshot { backup_id } => write!(f, "snapshot {}", backup_id),
            RollbackPath::LegacyReversal => write!(f, "legacy reversal"),
        }
    }
}

/// Outcome of a rollback or restore.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackResult {
    /// Migration rolled back.
    pub migration_id: String,
    /// Recovery path used.
    pub path: RollbackPath,
    /// Tables whose contents were restored.
    pub restored_tables: Vec<String>,
    /// Whether recovery was partial (legacy reversal).
    pub degraded: bool,
    /// Primary keys copied back from LegacyId; zero for snapshot restores.
    pub keys_restored: usize,
    /// Foreign-key reversal counts; empty for snapshot restores.
    pub remap: RemapReport,
    /// Always [`MigrationStatus::RolledBack`].
    pub status: MigrationStatus,
}

/// Chooses and runs a rollback path.
pub struct RollbackManager<'a> {
    store: &'a dyn TableStore,
    snapshots: &'a dyn SnapshotProvider,
    config: &'a MigrationConfig,
}

impl<'a> RollbackManager<'a> {
    /// Create a manager over a store and snapshot provider.
    pub fn new(
        store: &'a dyn TableStore,
        snapshots: &'a dyn SnapshotProvider,
        config: &'a MigrationConfig,
    ) -> Self {
        Self {
            store,
            snapshots,
            config,
        }
    }

    /// Roll back `definition`, preferring its snapshot.
    #[instrument(skip(self, definition), fields(migration = %definition.id))]
    pub async fn rollback(
        &self,
        definition: &MigrationDefinition,
    ) -> Result<RollbackResult, MigrationError> {
        if self.snapshots.find_latest_backup(&definition.id).await?.is_some() {
            return self.restore_from_backup(&definition.id).await;
        }

        if !definition.allow_legacy_reversal {
            return Err(MigrationError::RollbackUnavailable {
                migration_id: definition.id.clone(),
                reason: "no snapshot exists and legacy reversal is disabled".to_string(),
            });
        }
        if !definition.preserves_legacy() {
            return Err(MigrationError::RollbackUnavailable {
                migration_id: definition.id.clone(),
                reason: "no snapshot exists and no table keeps legacy keys".to_string(),
            });
        }

        warn!("no snapshot found, reversing from legacy keys");
        self.reverse_legacy(definition).await
    }

    /// Restore the latest snapshot for `migration_id`.
    #[instrument(skip(self))]
    pub async fn restore_from_backup(
        &self,
        migration_id: &str,
    ) -> Result<RollbackResult, MigrationError> {
        let info = self
            .snapshots
            .find_latest_backup(migration_id)
            .await?
            .ok_or_else(|| MigrationError::BackupNotFound(migration_id.to_string()))?;

        let restored_tables = self
            .snapshots
            .restore_backup(
                self.store,
                migration_id,
                self.config.delete_backup_after_restore,
            )
            .await
            .map_err(|e| match e {
                SnapshotError::NotFound(id) => MigrationError::BackupNotFound(id),
                other => MigrationError::Snapshot(other),
            })?;

        info!(
            backup_id = %info.backup_id,
            tables = restored_tables.len(),
            deleted = self.config.delete_backup_after_restore,
            "restored snapshot"
        );

        Ok(RollbackResult {
            migration_id: migration_id.to_string(),
            path: RollbackPath::Snapshot {
                backup_id: info.backup_id,
            },
            restored_tables,
            degraded: false,
            keys_restored: 0,
            remap: RemapReport::default(),
            status: MigrationStatus::RolledBack,
        })
    }

    async fn reverse_legacy(
        &self,
        definition: &MigrationDefinition,
    ) -> Result<RollbackResult, MigrationError> {
        let legacy_column = self.config.legacy_column.as_str();
        let specs: Vec<_> = definition.plan.iter().filter(|s| s.preserve_legacy).collect();

        // Read and check every table before writing anything.
        let mut reverse = IdMapping::new();
        let mut legacy_tables = Vec::new();
        for spec in &specs {
            let table = self.store.read_table(&spec.name).await?;
            let schema = table.schema(&[spec.primary_key.as_str()])?;
            let key_index = schema.column(&spec.primary_key)?;
            let Some(legacy_index) = schema.find(legacy_column) else {
                warn!(table = %spec.name, "no legacy column, table left as is");
                continue;
            };
            for (_, row) in table.live_rows(key_index) {
                let legacy = row.get(legacy_index).trim();
                let current = row.get(key_index).trim();
                if !legacy.is_empty() && legacy != current {
                    reverse.record(&spec.name, current, legacy);
                }
            }
            legacy_tables.push(spec.name.clone());
        }

        let populated = reverse.len();
        if legacy_tables.is_empty() || populated == 0 {
            return Err(MigrationError::RollbackUnavailable {
                migration_id: definition.id.clone(),
                reason: "no snapshot exists and no legacy keys are recorded".to_string(),
            });
        }

        let remap = ForeignKeyRemapper::new(self.store).remap(definition, &reverse).await;
        if !remap.is_clean() {
            warn!(
                failures = remap.failures.len(),
                "foreign keys not reverted, primary keys and legacy columns kept"
            );
            return Err(MigrationError::RollbackIncomplete {
                migration_id: definition.id.clone(),
                failures: remap.failures,
            });
        }

        // Re-read: the remap may have rewritten foreign keys inside these tables.
        let mut keys_restored = 0;
        let mut legacy_indices = Vec::with_capacity(legacy_tables.len());
        for spec in specs.iter().filter(|s| legacy_tables.contains(&s.name)) {
            let mut table = self.store.read_table(&spec.name).await?;
            let schema = table.schema(&[spec.primary_key.as_str(), legacy_column])?;
            let key_index = schema.column(&spec.primary_key)?;
            let legacy_index = schema.column(legacy_column)?;

            let mut dirty = Vec::new();
            for (offset, row) in table.rows.iter_mut().enumerate() {
                let legacy = row.get(legacy_index).trim().to_string();
                let current = row.get(key_index).trim();
                if current.is_empty() || legacy.is_empty() || legacy == current {
                    continue;
                }
                row.set(key_index, legacy);
                dirty.push(offset);
            }
            write_dirty_runs(self.store, &table, &dirty).await?;
            keys_restored += dirty.len();
            legacy_indices.push((spec.name.clone(), legacy_index));
        }

        for (table, legacy_index) in &legacy_indices {
            self.store.delete_column(table, *legacy_index).await?;
        }

        info!(
            keys = keys_restored,
            foreign_keys = remap.rows_updated(),
            "reversed migration from legacy keys"
        );

        Ok(RollbackResult {
            migration_id: definition.id.clone(),
            path: RollbackPath::LegacyReversal,
            restored_tables: legacy_tables,
            degraded: true,
            keys_restored,
            remap,
            status: MigrationStatus::RolledBack,
        })
    }
}
