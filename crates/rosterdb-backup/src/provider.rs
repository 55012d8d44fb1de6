//! Snapshot provider over any `object_store` backend.
//!
//! Layout under the configured prefix:
//!
//! ```text
//! <prefix>/<migration_id>/<backup_id>/manifest.json
//! <prefix>/<migration_id>/<backup_id>/tables/<table>.json.gz
//! ```

use std::path::Path as FsPath;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::TryStreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use rosterdb_core::snapshot::backup_id;
use rosterdb_core::{BackupInfo, SnapshotError, SnapshotProvider, Table, TableStore};
use tracing::{debug, info, warn};

use crate::codec::{decode_table, encode_table};
use crate::error::{BackupError, Result};
use crate::manifest::{BackupManifest, ManifestEntry};

const MANIFEST_FILE: &str = "manifest.json";
const TABLES_DIR: &str = "tables";

/// Stores snapshots as gzip'd JSON objects with a checksummed manifest.
#[derive(Debug, Clone)]
pub struct ObjectStoreSnapshotProvider {
    store: Arc<dyn ObjectStore>,
    prefix: Path,
}

impl ObjectStoreSnapshotProvider {
    /// Use `store`, keeping every object under `prefix`.
    pub fn new(store: Arc<dyn ObjectStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: Path::from(prefix.into()),
        }
    }

    /// Snapshots kept in memory; lost when dropped.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemory::new()), "backups")
    }

    /// Snapshots under a local directory, created if missing.
    pub fn local(dir: impl AsRef<FsPath>) -> Result<Self> {
        std::fs::create_dir_all(dir.as_ref())?;
        let fs = LocalFileSystem::new_with_prefix(dir.as_ref())?;
        Ok(Self::new(Arc::new(fs), "backups"))
    }

    /// Snapshots in an S3-compatible bucket; credentials and endpoint come
    /// from the usual `AWS_*` environment variables.
    pub fn s3(bucket: &str, prefix: &str) -> Result<Self> {
        let s3 = AmazonS3Builder::from_env()
            .with_bucket_name(bucket)
            .build()?;
        Ok(Self::new(Arc::new(s3), prefix))
    }

    fn migration_dir(&self, migration_id: &str) -> Path {
        self.prefix.child(migration_id)
    }

    fn backup_dir(&self, migration_id: &str, backup_id: &str) -> Path {
        self.migration_dir(migration_id).child(backup_id)
    }

    fn object_path(&self, migration_id: &str, backup_id: &str, object: &str) -> Path {
        object
            .split('/')
            .fold(self.backup_dir(migration_id, backup_id), |path, part| path.child(part))
    }

    /// Every complete backup for `migration_id`, oldest first.
    pub async fn list_backups(&self, migration_id: &str) -> Result<Vec<BackupInfo>> {
        let mut manifests = Vec::new();
        for id in self.backup_ids(migration_id).await? {
            if let Some(manifest) = self.read_manifest(migration_id, &id).await? {
                manifests.push(manifest.info());
            }
        }
        Ok(manifests)
    }

    /// Backup directory names, sorted; ids sort chronologically.
    async fn backup_ids(&self, migration_id: &str) -> Result<Vec<String>> {
        let listing = self
            .store
            .list_with_delimiter(Some(&self.migration_dir(migration_id)))
            .await?;
        let mut ids: Vec<String> = listing
            .common_prefixes
            .iter()
            .filter_map(|p| p.filename().map(str::to_string))
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn read_manifest(
        &self,
        migration_id: &str,
        backup_id: &str,
    ) -> Result<Option<BackupManifest>> {
        let path = self.object_path(migration_id, backup_id, MANIFEST_FILE);
        match self.store.get(&path).await {
            Ok(result) => {
                let bytes = result.bytes().await?;
                Ok(Some(BackupManifest::from_slice(backup_id, &bytes)?))
            }
            Err(object_store::Error::NotFound { .. }) => {
                warn!(%migration_id, %backup_id, "ignoring backup without manifest");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn latest_manifest(&self, migration_id: &str) -> Result<Option<BackupManifest>> {
        for id in self.backup_ids(migration_id).await?.iter().rev() {
            if let Some(manifest) = self.read_manifest(migration_id, id).await? {
                return Ok(Some(manifest));
            }
        }
        Ok(None)
    }

    async fn write_backup(
        &self,
        store: &dyn TableStore,
        migration_id: &str,
        tables: &[String],
    ) -> Result<BackupManifest> {
        let created_at = Utc::now();
        let mut manifest = BackupManifest::new(backup_id(migration_id, created_at), migration_id, created_at);

        for name in tables {
            let table = store.read_table(name).await?;
            let encoded = encode_table(&table)?;
            let object = format!("{}/{}.json.gz", TABLES_DIR, name);
            let path = self.object_path(migration_id, &manifest.backup_id, &object);

            self.store
                .put(&path, PutPayload::from(encoded.bytes.clone()))
                .await?;
            debug!(table = %name, bytes = encoded.bytes.len(), "stored table payload");

            manifest.tables.push(ManifestEntry {
                table: name.clone(),
                object,
                rows: table.len(),
                size: encoded.bytes.len(),
                sha256: encoded.sha256,
            });
        }

        let path = self.object_path(migration_id, &manifest.backup_id, MANIFEST_FILE);
        self.store.put(&path, PutPayload::from(manifest.to_vec()?)).await?;
        Ok(manifest)
    }

    /// Fetch and verify every table of a backup.
    async fn read_tables(&self, manifest: &BackupManifest) -> Result<Vec<Table>> {
        let mut tables = Vec::with_capacity(manifest.tables.len());
        for entry in &manifest.tables {
            let path = self.object_path(&manifest.migration_id, &manifest.backup_id, &entry.object);
            let bytes = self.store.get(&path).await?.bytes().await?;
            let table = decode_table(&manifest.backup_id, &entry.table, &bytes, &entry.sha256)?;
            if table.name != entry.table {
                return Err(BackupError::InvalidManifest {
                    backup_id: manifest.backup_id.clone(),
                    reason: format!("payload for '{}' holds table '{}'", entry.table, table.name),
                });
            }
            tables.push(table);
        }
        Ok(tables)
    }

    async fn remove_all(&self, migration_id: &str) -> Result<usize> {
        let locations: Vec<Path> = self
            .store
            .list(Some(&self.migration_dir(migration_id)))
            .map_ok(|meta| meta.location)
            .try_collect()
            .await?;
        for location in &locations {
            self.store.delete(location).await?;
        }
        Ok(locations.len())
    }
}

#[async_trait]
impl SnapshotProvider for ObjectStoreSnapshotProvider {
    async fn create_backup(
        &self,
        store: &dyn TableStore,
        migration_id: &str,
        tables: &[String],
    ) -> std::result::Result<BackupInfo, SnapshotError> {
        let manifest = self
            .write_backup(store, migration_id, tables)
            .await
            .map_err(|e| SnapshotError::CreateFailed {
                migration_id: migration_id.to_string(),
                reason: e.to_string(),
            })?;

        info!(
            backup_id = %manifest.backup_id,
            tables = manifest.tables.len(),
            rows = manifest.tables.iter().map(|e| e.rows).sum::<usize>(),
            "created backup"
        );
        Ok(manifest.info())
    }

    async fn restore_backup(
        &self,
        store: &dyn TableStore,
        migration_id: &str,
        delete_after_restore: bool,
    ) -> std::result::Result<Vec<String>, SnapshotError> {
        let manifest = self
            .latest_manifest(migration_id)
            .await?
            .ok_or_else(|| SnapshotError::NotFound(migration_id.to_string()))?;

        // Nothing is written until every payload has been verified.
        let tables = self.read_tables(&manifest).await?;

        let mut restored = Vec::with_capacity(tables.len());
        for table in &tables {
            store
                .replace_table(table)
                .await
                .map_err(|e| SnapshotError::RestoreFailed {
                    migration_id: migration_id.to_string(),
                    reason: format!("table '{}': {}", table.name, e),
                })?;
            restored.push(table.name.clone());
        }

        info!(backup_id = %manifest.backup_id, tables = restored.len(), "restored backup");

        if delete_after_restore {
            let removed = self.remove_all(migration_id).await?;
            debug!(%migration_id, objects = removed, "deleted restored backup");
        }
        Ok(restored)
    }

    async fn find_latest_backup(
        &self,
        migration_id: &str,
    ) -> std::result::Result<Option<BackupInfo>, SnapshotError> {
        Ok(self
            .latest_manifest(migration_id)
            .await?
            .map(|manifest| manifest.info()))
    }

    async fn delete_backup(&self, migration_id: &str) -> std::result::Result<bool, SnapshotError> {
        let removed = self.remove_all(migration_id).await?;
        if removed > 0 {
            info!(%migration_id, objects = removed, "deleted backups");
        }
        Ok(removed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rosterdb_core::MemoryStore;

    fn workbook() -> MemoryStore {
        MemoryStore::new()
            .with_table(
                Table::new("parents", ["ParentId", "Name"])
                    .with_row(["P1", "Ada"])
                    .with_row(["P2", "Grace"]),
            )
            .with_table(Table::new("students", ["StudentId", "Parent1Id"]).with_row(["S1", "P1"]))
    }

    fn tables() -> Vec<String> {
        vec!["parents".to_string(), "students".to_string()]
    }

    #[tokio::test]
    async fn test_backup_and_restore() {
        let provider = ObjectStoreSnapshotProvider::in_memory();
        let store = workbook();

        let info = provider.create_backup(&store, "family-ids", &tables()).await.unwrap();
        assert_eq!(info.tables, tables());
        assert!(info.backup_id.starts_with("family-ids-"));

        store.insert_table(Table::new("parents", ["ParentId"]).with_row(["changed"]));
        let restored = provider.restore_backup(&store, "family-ids", false).await.unwrap();

        assert_eq!(restored, tables());
        assert_eq!(store.table("parents"), workbook().table("parents"));
        assert_eq!(
            provider.find_latest_backup("family-ids").await.unwrap(),
            Some(info)
        );
    }

    #[tokio::test]
    async fn test_latest_backup_wins() {
        let provider = ObjectStoreSnapshotProvider::in_memory();
        let store = workbook();

        provider.create_backup(&store, "family-ids", &tables()).await.unwrap();
        store.insert_table(Table::new("parents", ["ParentId"]).with_row(["second"]));
        let second = provider.create_backup(&store, "family-ids", &tables()).await.unwrap();

        let backups = provider.list_backups("family-ids").await.unwrap();
        assert_eq!(backups.len(), 2);
        assert_eq!(backups[1], second);

        store.insert_table(Table::new("parents", ["ParentId"]));
        provider.restore_backup(&store, "family-ids", true).await.unwrap();
        assert_eq!(store.table("parents").unwrap().rows[0].get(0), "second");
        assert!(provider.find_latest_backup("family-ids").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupted_payload_detected() {
        let object_store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let provider = ObjectStoreSnapshotProvider::new(Arc::clone(&object_store), "snapshots");
        let store = workbook();

        let info = provider.create_backup(&store, "family-ids", &tables()).await.unwrap();
        let path = Path::from(format!(
            "snapshots/family-ids/{}/tables/parents.json.gz",
            info.backup_id
        ));
        object_store
            .put(&path, PutPayload::from(b"not gzip".to_vec()))
            .await
            .unwrap();

        store.insert_table(Table::new("parents", ["ParentId"]).with_row(["kept"]));
        let err = provider.restore_backup(&store, "family-ids", false).await.unwrap_err();

        assert!(matches!(err, SnapshotError::Corrupted { .. }));
        // nothing restored
        assert_eq!(store.table("parents").unwrap().rows[0].get(0), "kept");
        assert_eq!(store.table("students"), workbook().table("students"));
    }

    #[tokio::test]
    async fn test_backup_without_manifest_ignored() {
        let object_store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let provider = ObjectStoreSnapshotProvider::new(Arc::clone(&object_store), "snapshots");
        object_store
            .put(
                &Path::from("snapshots/family-ids/family-ids-partial/tables/parents.json.gz"),
                PutPayload::from(b"x".to_vec()),
            )
            .await
            .unwrap();

        assert!(provider.find_latest_backup("family-ids").await.unwrap().is_none());
        assert!(matches!(
            provider.restore_backup(&workbook(), "family-ids", false).await,
            Err(SnapshotError::NotFound(_))
        ));
        assert!(provider.delete_backup("family-ids").await.unwrap());
        assert!(!provider.delete_backup("family-ids").await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_table_fails_create() {
        let provider = ObjectStoreSnapshotProvider::in_memory();
        let err = provider
            .create_backup(&workbook(), "family-ids", &["ghosts".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, SnapshotError::CreateFailed { .. }));
        assert!(provider.find_latest_backup("family-ids").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_local_directory() {
        let dir = tempfile::tempdir().unwrap();
        let provider = ObjectStoreSnapshotProvider::local(dir.path().join("snapshots")).unwrap();
        let store = workbook();

        provider.create_backup(&store, "family-ids", &tables()).await.unwrap();
        let reopened = ObjectStoreSnapshotProvider::local(dir.path().join("snapshots")).unwrap();
        assert!(reopened.find_latest_backup("family-ids").await.unwrap().is_some());
    }
}
