//! Migration-specific error types.

use thiserror::Error;

use super::remap::RemapFailure;
use super::state::MigrationStatus;
use crate::error::{Error, SnapshotError};

/// Migration-specific errors.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// A required table or column is absent, or the definition is inconsistent.
    ///
    /// Always raised before any row is mutated.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the problem.
        message: String,
    },

    /// No definition is registered under the requested id.
    #[error("unknown migration: {0}")]
    UnknownMigration(String),

    /// The pre-migration snapshot could not be created; nothing was mutated.
    #[error("backup failed for {migration_id}: {source}")]
    BackupFailed {
        /// Migration whose snapshot failed.
        migration_id: String,
        /// Provider error.
        #[source]
        source: SnapshotError,
    },

    /// A snapshot for this migration already exists and would be shadowed by a new one.
    ///
    /// Raised before any row is mutated.
    #[error("backup {backup_id} already exists for {migration_id}; delete it before migrating again")]
    BackupExists {
        /// Migration being executed.
        migration_id: String,
        /// Snapshot already stored.
        backup_id: String,
    },

    /// Writing rewritten foreign keys failed.
    #[error("remap of {table}.{column} failed: {reason}")]
    RemapFailed {
        /// Table being rewritten.
        table: String,
        /// Foreign-key column.
        column: String,
        /// Reason for failure.
        reason: String,
    },

    /// One or more validation passes failed.
    #[error(
        "validation failed: {identity} identity, {uniqueness} uniqueness, {referential} referential failure(s)"
    )]
    ValidationFailed {
        /// Identity-shape failures.
        identity: usize,
        /// Uniqueness failures.
        uniqueness: usize,
        /// Referential failures.
        referential: usize,
    },

    /// Neither a snapshot nor legacy identifiers are available to roll back with.
    #[error("rollback unavailable for {migration_id}: {reason}; manual restoration required")]
    RollbackUnavailable {
        /// Migration being rolled back.
        migration_id: String,
        /// Why no recovery path applies.
        reason: String,
    },

    /// Legacy reversal could not revert every foreign key.
    ///
    /// Primary keys and LegacyId columns are left untouched, so the rollback
    /// can be retried once the failing tables accept writes again.
    #[error(
        "legacy reversal of {migration_id} incomplete: {} foreign key(s) not reverted; LegacyId kept, retry rollback",
        .failures.len()
    )]
    RollbackIncomplete {
        /// Migration being rolled back.
        migration_id: String,
        /// Foreign keys that could not be reverted.
        failures: Vec<RemapFailure>,
    },

    /// A restore was requested but no snapshot exists.
    #[error("no backup found for {0}")]
    BackupNotFound(String),

    /// The run attempted an illegal state transition.
    #[error("invalid migration transition from {from} to {to}")]
    InvalidTransition {
        /// Current status.
        from: MigrationStatus,
        /// Requested status.
        to: MigrationStatus,
    },

    /// Store error.
    #[error("store error: {0}")]
    Store(#[from] Error),

    /// Snapshot provider error outside of backup creation.
    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),
}

impl MigrationError {
    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        MigrationError::Configuration {
            message: message.into(),
        }
    }

    /// Whether the error was raised before any row could have been mutated.
    pub fn is_pre_mutation(&self) -> bool {
        matches!(
            self,
            MigrationError::Configuration { .. }
                | MigrationError::UnknownMigration(_)
                | MigrationError::BackupFailed { .. }
                | MigrationError::BackupExists { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MigrationError::RemapFailed {
            table: "students".to_string(),
            column: "Parent1Id".to_string(),
            reason: "quota exceeded".to_string(),
        };
        assert!(err.to_string().contains("students.Parent1Id"));
    }

    #[test]
    fn test_rollback_unavailable_mentions_manual_restore() {
        let err = MigrationError::RollbackUnavailable {
            migration_id: "registration-ids".to_string(),
            reason: "no backup and no LegacyId column".to_string(),
        };
        assert!(err.to_string().contains("manual restoration required"));
    }

    #[test]
    fn test_rollback_incomplete_counts_failures() {
        let err = MigrationError::RollbackIncomplete {
            migration_id: "family-ids".to_string(),
            failures: vec![RemapFailure {
                table: "registrations".to_string(),
                column: "StudentId".to_string(),
                reason: "quota exceeded".to_string(),
            }],
        };
        assert!(err.to_string().contains("1 foreign key(s) not reverted"));
        assert!(!err.is_pre_mutation());
    }

    #[test]
    fn test_pre_mutation_classification() {
        assert!(MigrationError::configuration("missing table").is_pre_mutation());
        assert!(MigrationError::BackupFailed {
            migration_id: "m".to_string(),
            source: SnapshotError::Backend("down".to_string()),
        }
        .is_pre_mutation());
        assert!(MigrationError::BackupExists {
            migration_id: "m".to_string(),
            backup_id: "m-1".to_string(),
        }
        .is_pre_mutation());
        assert!(!MigrationError::BackupNotFound("m".to_string()).is_pre_mutation());
    }
}
