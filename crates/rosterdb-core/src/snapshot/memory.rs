//! In-memory snapshot provider.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use tracing::info;

use super::{backup_id, BackupInfo, SnapshotProvider};
use crate::error::SnapshotError;
use crate::store::TableStore;
use crate::table::Table;

struct StoredBackup {
    info: BackupInfo,
    tables: Vec<Table>,
}

/// Snapshot provider that keeps table copies in memory.
#[derive(Default)]
pub struct MemorySnapshotProvider {
    backups: RwLock<HashMap<String, Vec<StoredBackup>>>,
    fail_creates: AtomicBool,
}

impl MemorySnapshotProvider {
    /// Create an empty provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent `create_backup` calls fail (or succeed again).
    pub fn set_fail_creates(&self, fail: bool) {
        self.fail_creates.store(fail, Ordering::SeqCst);
    }

    /// Number of snapshots held for a migration.
    pub fn backup_count(&self, migration_id: &str) -> usize {
        self.backups
            .read()
            .get(migration_id)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

#[async_trait]
impl SnapshotProvider for MemorySnapshotProvider {
    async fn create_backup(
        &self,
        store: &dyn TableStore,
        migration_id: &str,
        tables: &[String],
    ) -> Result<BackupInfo, SnapshotError> {
        if self.fail_creates.load(Ordering::SeqCst) {
            return Err(SnapshotError::CreateFailed {
                migration_id: migration_id.to_string(),
                reason: "provider unavailable".to_string(),
            });
        }

        let mut copies = Vec::with_capacity(tables.len());
        for name in tables {
            let table = store
                .read_table(name)
                .await
                .map_err(|e| SnapshotError::CreateFailed {
                    migration_id: migration_id.to_string(),
                    reason: e.to_string(),
                })?;
            copies.push(table);
        }

        let created_at = Utc::now();
        let info = BackupInfo {
            backup_id: backup_id(migration_id, created_at),
            migration_id: migration_id.to_string(),
            created_at,
            tables: tables.to_vec(),
        };

        self.backups
            .write()
            .entry(migration_id.to_string())
            .or_default()
            .push(StoredBackup {
                info: info.clone(),
                tables: copies,
            });

        info!(backup_id = %info.backup_id, tables = tables.len(), "created in-memory backup");
        Ok(info)
    }

    async fn restore_backup(
        &self,
        store: &dyn TableStore,
        migration_id: &str,
        delete_after_restore: bool,
    ) -> Result<Vec<String>, SnapshotError> {
        let tables = {
            let backups = self.backups.read();
            let latest = backups
                .get(migration_id)
                .and_then(|list| list.last())
                .ok_or_else(|| SnapshotError::NotFound(migration_id.to_string()))?;
            latest.tables.clone()
        };

        let mut restored = Vec::with_capacity(tables.len());
        for table in &tables {
            store.replace_table(table).await?;
            restored.push(table.name.clone());
        }

        if delete_after_restore {
            self.backups.write().remove(migration_id);
        }

        Ok(restored)
    }

    async fn find_latest_backup(
        &self,
        migration_id: &str,
    ) -> Result<Option<BackupInfo>, SnapshotError> {
        Ok(self
            .backups
            .read()
            .get(migration_id)
            .and_then(|list| list.last())
            .map(|b| b.info.clone()))
    }

    async fn delete_backup(&self, migration_id: &str) -> Result<bool, SnapshotError> {
        Ok(self.backups.write().remove(migration_id).is_some())
    }
}
