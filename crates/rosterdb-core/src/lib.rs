//! RosterDB Core - identity migrations for spreadsheet-backed tables.
//!
//! This crate provides the table model, the store and snapshot interfaces
//! with in-memory and sled implementations, and the migration engine.

pub mod error;
pub mod identity;
pub mod migration;
pub mod snapshot;
pub mod store;
pub mod table;

pub use error::{Error, SnapshotError};
pub use identity::{
    is_valid_id, IdClassification, IdGenerator, IdMapping, SequenceGenerator, ShapeCounts,
    UuidGenerator,
};
pub use migration::{
    DefinitionRegistry, ForeignKeyDefinition, MigrationConfig, MigrationDefinition,
    MigrationError, MigrationExecutor, MigrationResult, MigrationState, MigrationStatus,
    PreviewReport, RollbackPath, RollbackResult, TableSpec, ValidationReport,
};
pub use snapshot::{BackupInfo, MemorySnapshotProvider, SnapshotProvider};
pub use store::{MemoryStore, SledTableStore, TableStore};
pub use table::{Row, Table, TableSchema};
