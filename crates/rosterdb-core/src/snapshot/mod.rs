//! Backup/snapshot provider interface.
//!
//! A snapshot is a named, restorable copy of a set of tables taken right
//! before a migration starts mutating them. The engine refers to snapshots
//! only by migration id; the provider owns their storage.

mod memory;

pub use memory::MemorySnapshotProvider;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SnapshotError;
use crate::store::TableStore;

/// Description of a stored snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupInfo {
    /// Unique backup identifier.
    pub backup_id: String,
    /// Migration the backup was taken for.
    pub migration_id: String,
    /// When the backup was taken.
    pub created_at: DateTime<Utc>,
    /// Tables captured in the backup.
    pub tables: Vec<String>,
}

/// Creates, restores and discards table snapshots.
#[async_trait]
pub trait SnapshotProvider: Send + Sync {
    /// Snapshot `tables` from `store` under `migration_id`.
    async fn create_backup(
        &self,
        store: &dyn TableStore,
        migration_id: &str,
        tables: &[String],
    ) -> Result<BackupInfo, SnapshotError>;

    /// Restore the latest snapshot for `migration_id` into `store`.
    ///
    /// Returns the names of the restored tables.
    async fn restore_backup(
        &self,
        store: &dyn TableStore,
        migration_id: &str,
        delete_after_restore: bool,
    ) -> Result<Vec<String>, SnapshotError>;

    /// Latest snapshot taken for `migration_id`, if any.
    async fn find_latest_backup(&self, migration_id: &str)
        -> Result<Option<BackupInfo>, SnapshotError>;

    /// Delete every snapshot for `migration_id`. Returns whether anything was deleted.
    async fn delete_backup(&self, migration_id: &str) -> Result<bool, SnapshotError>;
}

/// Backup identifier for a migration at a point in time.
///
/// Identifiers sort chronologically for the same migration.
pub fn backup_id(migration_id: &str, at: DateTime<Utc>) -> String {
    format!("{}-{}", migration_id, at.format("%Y%m%dT%H%M%S%.6fZ"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_backup_id_format() {
        let at = Utc.with_ymd_and_hms(2026, 1, 5, 9, 30, 0).unwrap();
        assert_eq!(
            backup_id("registration-ids", at),
            "registration-ids-20260105T093000.000000Z"
        );
    }

    #[test]
    fn test_backup_ids_sort_chronologically() {
        let early = Utc.with_ymd_and_hms(2026, 1, 5, 9, 30, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2026, 1, 5, 10, 0, 0).unwrap();
        assert!(backup_id("m", early) < backup_id("m", late));
    }
}
