//! Core error types.

use thiserror::Error;

/// Tabular store and table-level errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Local workbook storage error.
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// The named table does not exist in the store.
    #[error("table not found: {0}")]
    TableNotFound(String),

    /// A column required by the caller is absent from the header row.
    #[error("column '{column}' not found in table '{table}'")]
    ColumnNotFound {
        /// Table whose header was searched.
        table: String,
        /// Missing column name.
        column: String,
    },

    /// The header row does not describe a usable schema.
    #[error("schema mismatch in table '{table}': {message}")]
    SchemaMismatch {
        /// Table whose header was rejected.
        table: String,
        /// What was wrong with it.
        message: String,
    },

    /// A row or column offset fell outside the table.
    #[error("offset {offset} out of range for table '{table}' ({len} available)")]
    OutOfRange {
        /// Table being addressed.
        table: String,
        /// Requested offset.
        offset: usize,
        /// Number of rows or columns present.
        len: usize,
    },

    /// The store rejected a write.
    #[error("write to '{table}' failed: {message}")]
    WriteFailed {
        /// Table being written.
        table: String,
        /// Reason reported by the store.
        message: String,
    },
}

/// Snapshot provider errors.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// The snapshot could not be created.
    #[error("backup creation failed for {migration_id}: {reason}")]
    CreateFailed {
        /// Migration the snapshot was requested for.
        migration_id: String,
        /// Reason for failure.
        reason: String,
    },

    /// No snapshot exists for the migration.
    #[error("no backup found for {0}")]
    NotFound(String),

    /// The snapshot exists but could not be restored.
    #[error("restore failed for {migration_id}: {reason}")]
    RestoreFailed {
        /// Migration whose snapshot was being restored.
        migration_id: String,
        /// Reason for failure.
        reason: String,
    },

    /// Snapshot payload failed an integrity check.
    #[error("backup {backup_id} is corrupted: {reason}")]
    Corrupted {
        /// Backup identifier.
        backup_id: String,
        /// What failed to verify.
        reason: String,
    },

    /// Reading from or writing to the store failed during a snapshot operation.
    #[error("store error during snapshot: {0}")]
    Store(#[from] Error),

    /// Provider backend error.
    #[error("snapshot backend error: {0}")]
    Backend(String),
}
