//! RosterDB Command-Line Client
//!
//! Runs identity migrations against a local workbook.

mod commands;
mod formatter;
mod workbook;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use commands::{Command, Context};
use formatter::OutputFormat;
use rosterdb_backup::ObjectStoreSnapshotProvider;
use rosterdb_core::migration::{MigrationConfig, DEFAULT_LEGACY_COLUMN};

/// RosterDB Command-Line Client
#[derive(Parser, Debug)]
#[command(name = "rosterdb")]
#[command(version, about = "Identity migrations for the registration workbook")]
pub struct Args {
    /// Workbook database directory
    #[arg(long, default_value = "rosterdb-data", global = true)]
    pub data_path: PathBuf,

    /// Local snapshot directory (defaults to <data-path>/backups)
    #[arg(long, global = true)]
    pub backup_dir: Option<PathBuf>,

    /// Keep snapshots in this S3 bucket instead of a local directory
    #[arg(long, global = true)]
    pub s3_bucket: Option<String>,

    /// Key prefix inside the S3 bucket
    #[arg(long, default_value = "rosterdb/backups", global = true)]
    pub s3_prefix: String,

    /// JSON file with additional migration definitions
    #[arg(long, global = true)]
    pub definitions: Option<PathBuf>,

    /// Header of the column holding pre-migration keys
    #[arg(long, default_value = DEFAULT_LEGACY_COLUMN, global = true)]
    pub legacy_column: String,

    /// Delete a snapshot once it has been restored
    #[arg(long, global = true)]
    pub delete_backup_after_restore: bool,

    /// Output format
    #[arg(long, default_value = "table", value_enum, global = true)]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Command,
}

impl Args {
    fn migration_config(&self) -> MigrationConfig {
        MigrationConfig::default()
            .legacy_column(self.legacy_column.clone())
            .delete_backup_after_restore(self.delete_backup_after_restore)
    }

    fn snapshot_provider(&self) -> Result<ObjectStoreSnapshotProvider, rosterdb_backup::BackupError> {
        match &self.s3_bucket {
            Some(bucket) => ObjectStoreSnapshotProvider::s3(bucket, &self.s3_prefix),
            None => {
                let dir = self
                    .backup_dir
                    .clone()
                    .unwrap_or_else(|| self.data_path.join("backups"));
                ObjectStoreSnapshotProvider::local(dir)
            }
        }
    }
}

#[tokio::main]
async fn main() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("rosterdb=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match run(args).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(2),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

async fn run(args: Args) -> Result<bool, Box<dyn std::error::Error>> {
    let db = sled::open(args.data_path.join("workbook"))?;
    let ctx = Context {
        store: commands::open_store(&db)?,
        snapshots: Arc::new(args.snapshot_provider()?),
        registry: commands::load_registry(args.definitions.as_ref())?,
        config: args.migration_config(),
    };
    let formatter = formatter::create_formatter(args.format);

    let output = commands::run(args.command, &ctx, &*formatter).await?;
    println!("{}", output.text);
    Ok(output.success)
}
