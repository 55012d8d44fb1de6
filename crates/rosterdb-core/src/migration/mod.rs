//! Identity migration engine.
//!
//! Changes the primary-key scheme of several interdependent tables while
//! keeping every reference between them intact:
//! - Snapshot of every touched table before the first write
//! - Key assignment per table, in the declared plan order
//! - Foreign-key remapping through the run's id mapping
//! - Identity, uniqueness and referential validation
//! - Rollback from the snapshot, or from preserved legacy keys
//!
//! One snapshot is kept per migration. A re-run with nothing to reassign
//! takes none, and a re-run that would reassign keys while the snapshot is
//! still stored is refused until that snapshot is deleted.
//!
//! # Lifecycle
//!
//! | Status | Meaning |
//! |--------|---------|
//! | `NotStarted` | Preflight only; nothing touched |
//! | `BackedUp` | Snapshot taken |
//! | `Migrating` | Primary keys being replaced |
//! | `Remapping` | Foreign keys being rewritten |
//! | `Validated` | Validation has run; entered directly when no key needs reassigning |
//! | `Completed` / `CompletedWithErrors` | Final; errors never roll back on their own |
//! | `RolledBack` | Reverted by an explicit rollback |
//!
//! # Example
//!
//! ```ignore
//! use rosterdb_core::migration::{DefinitionRegistry, MigrationConfig, MigrationExecutor};
//!
//! let registry = DefinitionRegistry::builtin();
//! let definition = registry.get("family-ids")?;
//! let executor = MigrationExecutor::new(store, snapshots, MigrationConfig::default());
//!
//! let preview = executor.preview(definition).await?;
//! if !preview.already_optimal {
//!     let result = executor.execute(definition).await?;
//!     if !result.is_clean() {
//!         executor.rollback(definition).await?;
//!     }
//! }
//! ```

pub mod builtin;
pub mod definition;
pub mod error;
pub mod executor;
pub mod preview;
pub mod remap;
pub mod rollback;
pub mod state;
pub mod validator;

// Definition types
pub use definition::{DefinitionRegistry, ForeignKeyDefinition, MigrationDefinition, TableSpec};

// Error types
pub use error::MigrationError;

// Executor types
pub use executor::{
    MigrationConfig, MigrationExecutor, MigrationResult, TableMigrationSummary,
    DEFAULT_LEGACY_COLUMN,
};

// Report types
pub use preview::{PreviewReport, TablePreview};
pub use remap::{ForeignKeyRemapper, RemapCount, RemapFailure, RemapReport};
pub use rollback::{RollbackManager, RollbackPath, RollbackResult};
pub use validator::{
    MigrationValidator, PassTally, RowRef, ValidationIssue, ValidationPass, ValidationReport,
};

// State types
pub use state::{MigrationState, MigrationStatus, StatusChange};
