//! Backup manifest.
//!
//! The manifest is written after every table payload, so a backup without
//! one is incomplete and ignored.

use chrono::{DateTime, Utc};
use rosterdb_core::BackupInfo;
use serde::{Deserialize, Serialize};

use crate::error::{BackupError, Result};

/// Current manifest format.
pub const MANIFEST_VERSION: u32 = 1;

/// One table captured in a backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Table name.
    pub table: String,
    /// Object key of the payload, relative to the backup directory.
    pub object: String,
    /// Data rows captured.
    pub rows: usize,
    /// Compressed payload size.
    pub size: usize,
    /// Hex SHA-256 of the compressed payload.
    pub sha256: String,
}

/// Description of a stored backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupManifest {
    /// Manifest format version.
    pub version: u32,
    /// Backup identifier.
    pub backup_id: String,
    /// Migration the backup belongs to.
    pub migration_id: String,
    /// When the backup was taken.
    pub created_at: DateTime<Utc>,
    /// Tables in the order they were captured.
    pub tables: Vec<ManifestEntry>,
}

impl BackupManifest {
    /// Start a manifest.
    pub fn new(
        backup_id: impl Into<String>,
        migration_id: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            version: MANIFEST_VERSION,
            backup_id: backup_id.into(),
            migration_id: migration_id.into(),
            created_at,
            tables: Vec::new(),
        }
    }

    /// Parse and check a manifest.
    pub fn from_slice(backup_id: &str, data: &[u8]) -> Result<Self> {
        let manifest: BackupManifest = serde_json::from_slice(data).map_err(|e| {
            BackupError::InvalidManifest {
                backup_id: backup_id.to_string(),
                reason: e.to_string(),
            }
        })?;
        if manifest.version != MANIFEST_VERSION {
            return Err(BackupError::InvalidManifest {
                backup_id: backup_id.to_string(),
                reason: format!(
                    "unsupported version {} (expected {})",
                    manifest.version, MANIFEST_VERSION
                ),
            });
        }
        if manifest.backup_id != backup_id {
            return Err(BackupError::InvalidManifest {
                backup_id: backup_id.to_string(),
                reason: format!("manifest names backup {}", manifest.backup_id),
            });
        }
        Ok(manifest)
    }

    /// Serialize for storage.
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Summary exposed through the snapshot interface.
    pub fn info(&self) -> BackupInfo {
        BackupInfo {
            backup_id: self.backup_id.clone(),
            migration_id: self.migration_id.clone(),
            created_at: self.created_at,
            tables: self.tables.iter().map(|e| e.table.clone()).collect(),
        }
    }
}
