//! Backup error types.

use rosterdb_core::SnapshotError;
use thiserror::Error;

/// Errors raised while writing or reading object-store snapshots.
#[derive(Debug, Error)]
pub enum BackupError {
    /// Object store operation failed.
    #[error("object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    /// Compression or decompression failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Manifest or table payload could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No complete snapshot exists for the migration.
    #[error("no backup found for {0}")]
    NotFound(String),

    /// A table payload does not match the digest recorded in the manifest.
    #[error("checksum mismatch for table '{table}' in backup {backup_id}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Backup being read.
        backup_id: String,
        /// Table whose payload is damaged.
        table: String,
        /// Digest recorded in the manifest.
        expected: String,
        /// Digest of the payload read back.
        actual: String,
    },

    /// The manifest is unreadable or inconsistent.
    #[error("invalid manifest for backup {backup_id}: {reason}")]
    InvalidManifest {
        /// Backup being read.
        backup_id: String,
        /// What is wrong with it.
        reason: String,
    },

    /// Reading from or writing to the table store failed.
    #[error("table store error: {0}")]
    Store(#[from] rosterdb_core::Error),
}

impl From<BackupError> for SnapshotError {
    fn from(err: BackupError) -> Self {
        match err {
            BackupError::NotFound(migration_id) => SnapshotError::NotFound(migration_id),
            BackupError::ChecksumMismatch { ref backup_id, .. }
            | BackupError::InvalidManifest { ref backup_id, .. } => SnapshotError::Corrupted {
                backup_id: backup_id.clone(),
                reason: err.to_string(),
            },
            BackupError::Store(e) => SnapshotError::Store(e),
            other => SnapshotError::Backend(other.to_string()),
        }
    }
}

/// Result type for backup operations.
pub type Result<T> = std::result::Result<T, BackupError>;
