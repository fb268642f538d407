//! Netmigrate CLI
//!
//! Drives network migrations from a source cloud to an infrastructure-as-code
//! target and inspects their checkpoints.

use anyhow::Result;
use clap::{Parser, Subcommand};
use netmigrate_core::config::CONFIG_FILE;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod runner;

/// Netmigrate - resumable cloud network migration
#[derive(Parser)]
#[command(name = "netmigrate")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file or directory
    #[arg(short, long, default_value = CONFIG_FILE)]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default netmigrate.yaml
    Init {
        /// Directory to initialize (defaults to current directory)
        #[arg(default_value = ".")]
        path: String,

        /// Project name (defaults to directory name)
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Run a migration
    Migrate(commands::migrate::MigrateArgs),

    /// Resume a failed or interrupted run from its checkpoint
    Resume {
        /// Run identifier
        run_id: String,

        #[command(flatten)]
        credentials: runner::CredentialArgs,
    },

    /// Show a stored checkpoint, or list stored runs
    Status {
        /// Run identifier
        run_id: Option<String>,
    },

    /// Transform and validate an inventory file offline
    Validate {
        /// Source inventory JSON file
        inventory: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let registry = tracing_subscriber::registry().with(filter);
    if cli.json_logs {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    match cli.command {
        Commands::Init { path, name } => {
            commands::init::run(&path, name.as_deref()).await?;
        }
        Commands::Migrate(args) => {
            commands::migrate::run(&cli.config, args).await?;
        }
        Commands::Resume {
            run_id,
            credentials,
        } => {
            commands::resume::run(&cli.config, &run_id, credentials).await?;
        }
        Commands::Status { run_id } => {
            commands::status::run(&cli.config, run_id.as_deref()).await?;
        }
        Commands::Validate { inventory } => {
            commands::validate::run(&inventory).await?;
        }
    }

    Ok(())
}
