//! forsuredb-migrate CLI
//!
//! Command-line tool for applying migration manifests.

use std::path::PathBuf;
use std::str::FromStr;

use clap::{Parser, Subcommand};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use forsuredb_core::migration::{load_manifest, MigrationSet};
use forsuredb_core::state::replay;
use forsuredb_migrate::prelude::*;

/// Applies forsuredb migration manifests to SQLite databases.
#[derive(Parser)]
#[command(name = "forsuredb-migrate")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Database URL (SQLite path or connection string).
    #[arg(short, long, env = "DATABASE_URL", default_value = "sqlite:db.sqlite3")]
    database: String,

    /// Migration manifest (JSON).
    #[arg(short, long, env = "FORSUREDB_MANIFEST", default_value = "migrations.json")]
    manifest: PathBuf,

    /// Enable verbose output.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the migrations system (create history table).
    Init,

    /// Apply pending versions.
    Migrate {
        /// Highest version to apply (all if not specified).
        #[arg(short, long)]
        to: Option<u32>,

        /// Show SQL without executing (dry run).
        #[arg(long)]
        dry_run: bool,
    },

    /// Show the planned SQL without executing it.
    Sql {
        /// Version to show (all if not specified).
        #[arg(short = 'n', long)]
        version: Option<u32>,
    },

    /// Show applied versions.
    Show,

    /// Print the schema reconstructed from the manifest as JSON.
    Schema {
        /// Version to reconstruct (latest if not specified).
        #[arg(short = 'n', long)]
        version: Option<u32>,
    },
}

fn sets_up_to(sets: Vec<MigrationSet>, version: Option<u32>) -> Result<Vec<MigrationSet>> {
    let Some(version) = version else {
        return Ok(sets);
    };
    if !sets.iter().any(|s| s.db_version == version) {
        return Err(MigrateError::UnknownVersion(version));
    }
    Ok(sets.into_iter().filter(|s| s.db_version <= version).collect())
}

async fn connect(database: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database)?.create_if_missing(true);
    Ok(SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Init => {
            info!("Initializing migrations system...");
            MigrationExecutor::new(connect(&cli.database).await?).init().await?;
            info!("Migrations table created successfully.");
        }

        Commands::Migrate { to, dry_run } => {
            let sets = load_manifest(&cli.manifest)?;
            info!(
                manifest = %cli.manifest.display(),
                versions = sets.len(),
                "Loaded manifest"
            );
            if dry_run {
                info!("Dry run mode - SQL will be printed but not executed.");
            }

            let executor = MigrationExecutor::new(connect(&cli.database).await?).dry_run(dry_run);
            let applied = executor.migrate(&sets, to).await?;
            info!(applied = ?applied, "Migration complete");
        }

        Commands::Sql { version } => {
            let sets = load_manifest(&cli.manifest)?;
            for script in MigrationExecutor::sql_for(&sets, version)? {
                println!("-- version {}", script.db_version);
                for sql in &script.statements {
                    println!("{sql}");
                }
            }
        }

        Commands::Show => {
            let executor = MigrationExecutor::new(connect(&cli.database).await?);
            let applied = executor.history().get_applied().await?;

            if applied.is_empty() {
                info!("No versions have been applied yet.");
            } else {
                println!("\nApplied versions:");
                println!("{:-<60}", "");
                for version in &applied {
                    println!(
                        " [X] {:>6} {:>4} statements ({})",
                        version.db_version,
                        version.statement_count,
                        version.applied_at.format("%Y-%m-%d %H:%M:%S")
                    );
                }
                println!();
            }
        }

        Commands::Schema { version } => {
            let sets = sets_up_to(load_manifest(&cli.manifest)?, version)?;
            let schema = replay(&sets)?;
            println!("{}", serde_json::to_string_pretty(&schema)?);
        }
    }

    Ok(())
}
