//! Subcommand handling.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Subcommand;
use rosterdb_backup::ObjectStoreSnapshotProvider;
use rosterdb_core::migration::{
    DefinitionRegistry, MigrationConfig, MigrationError, MigrationExecutor,
};
use rosterdb_core::{SledTableStore, SnapshotProvider};
use tracing::info;

use crate::formatter::{Formatter, TableSummary};
use crate::workbook::Workbook;

/// Operations on the local workbook.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// List known migrations
    List,

    /// List workbook tables with their sizes
    Tables,

    /// Show what a migration would change, without changing anything
    Preview {
        /// Migration id
        migration: String,
    },

    /// Snapshot, migrate, remap and validate
    Execute {
        /// Migration id
        migration: String,
    },

    /// Validate the workbook against a migration's invariants
    Verify {
        /// Migration id
        migration: String,
    },

    /// Undo a migration from its snapshot, or from legacy ids
    Rollback {
        /// Migration id
        migration: String,
    },

    /// Restore a migration's latest snapshot
    Restore {
        /// Migration id
        migration: String,
    },

    /// Load tables from a JSON workbook file, replacing same-named tables
    Import {
        /// Workbook file
        file: PathBuf,
    },

    /// Write every table to a JSON workbook file
    Export {
        /// Workbook file
        file: PathBuf,
    },

    /// Show stored snapshots for a migration
    Backups {
        /// Migration id
        migration: String,
    },

    /// Delete every snapshot of a migration
    DropBackup {
        /// Migration id
        migration: String,
    },
}

/// Collaborators shared by every command.
pub struct Context {
    pub store: Arc<SledTableStore>,
    pub snapshots: Arc<ObjectStoreSnapshotProvider>,
    pub registry: DefinitionRegistry,
    pub config: MigrationConfig,
}

impl Context {
    fn executor(&self) -> MigrationExecutor {
        MigrationExecutor::new(
            self.store.clone(),
            self.snapshots.clone(),
            self.config.clone(),
        )
    }
}

/// Outcome of a command.
pub struct CommandOutput {
    /// Rendered output.
    pub text: String,
    /// Whether the command succeeded; failed validations exit non-zero.
    pub success: bool,
}

impl CommandOutput {
    fn ok(text: String) -> Self {
        Self {
            text,
            success: true,
        }
    }
}

/// Run a command against the workbook.
pub async fn run(
    command: Command,
    ctx: &Context,
    formatter: &dyn Formatter,
) -> Result<CommandOutput, Box<dyn std::error::Error>> {
    let output = match command {
        Command::List => CommandOutput::ok(formatter.format_definitions(ctx.registry.definitions())),

        Command::Tables => {
            let workbook = Workbook::read_from(ctx.store.as_ref()).await?;
            let tables: Vec<TableSummary> = workbook
                .tables
                .iter()
                .map(|t| TableSummary {
                    name: t.name.clone(),
                    columns: t.header.len(),
                    rows: t.len(),
                })
                .collect();
            CommandOutput::ok(formatter.format_tables(&tables))
        }

        Command::Preview { migration } => {
            let definition = ctx.registry.get(&migration)?;
            let report = ctx.executor().preview(definition).await?;
            CommandOutput::ok(formatter.format_preview(&report))
        }

        Command::Execute { migration } => {
            let definition = ctx.registry.get(&migration)?;
            let result = ctx.executor().execute(definition).await?;
            ctx.store.flush()?;
            CommandOutput {
                text: formatter.format_result(&result),
                success: result.is_clean(),
            }
        }

        Command::Verify { migration } => {
            let definition = ctx.registry.get(&migration)?;
            let report = ctx.executor().verify(definition).await?;
            CommandOutput {
                text: formatter.format_validation(&report),
                success: report.passed(),
            }
        }

        Command::Rollback { migration } => {
            let definition = ctx.registry.get(&migration)?;
            let result = ctx.executor().rollback(definition).await?;
            ctx.store.flush()?;
            CommandOutput::ok(formatter.format_rollback(&result))
        }

        Command::Restore { migration } => {
            let result = ctx.executor().restore_from_backup(&migration).await?;
            ctx.store.flush()?;
            CommandOutput::ok(formatter.format_rollback(&result))
        }

        Command::Import { file } => {
            let workbook = Workbook::load(&file)?;
            let count = workbook.write_to(ctx.store.as_ref()).await?;
            ctx.store.flush()?;
            info!(file = %file.display(), tables = count, "imported workbook");
            CommandOutput::ok(formatter.format_message(&format!(
                "Imported {} table(s) from {}",
                count,
                file.display()
            )))
        }

        Command::Export { file } => {
            let workbook = Workbook::read_from(ctx.store.as_ref()).await?;
            workbook.save(&file)?;
            CommandOutput::ok(formatter.format_message(&format!(
                "Exported {} table(s) to {}",
                workbook.tables.len(),
                file.display()
            )))
        }

        Command::Backups { migration } => {
            let backups = ctx.snapshots.list_backups(&migration).await?;
            CommandOutput::ok(formatter.format_backups(&backups))
        }

        Command::DropBackup { migration } => {
            let message = if ctx.snapshots.delete_backup(&migration).await? {
                format!("Deleted backups for {}", migration)
            } else {
                format!("No backups for {}", migration)
            };
            CommandOutput::ok(formatter.format_message(&message))
        }
    };
    Ok(output)
}

/// Known migrations: the built-ins plus any from `definitions`.
pub fn load_registry(definitions: Option<&PathBuf>) -> Result<DefinitionRegistry, MigrationError> {
    let mut registry = DefinitionRegistry::builtin();
    if let Some(path) = definitions {
        let count = registry.extend_from_file(path)?;
        info!(path = %path.display(), count, "loaded migration definitions");
    }
    Ok(registry)
}

/// Open the workbook store.
pub fn open_store(db: &sled::Db) -> Result<Arc<SledTableStore>, rosterdb_core::Error> {
    Ok(Arc::new(SledTableStore::open(db)?))
}
