//! Run a migration

use anyhow::Result;
use clap::Args;
use netmigrate_core::{MigrationRequest, RunId, SourceSelector};
use netmigrate_runtime::EngineSettings;

use crate::runner::{self, CredentialArgs, Runner};

/// Arguments of the migrate command
#[derive(Args, Debug)]
pub struct MigrateArgs {
    /// Name of the generated target project
    #[arg(long)]
    pub project_name: String,

    /// Directory the target project is generated into
    #[arg(long, default_value = "./output")]
    pub target_dir: String,

    /// Source network to migrate; without it the default inventory is used
    #[arg(long)]
    pub vpc_id: Option<String>,

    /// Source region
    #[arg(long, default_value = "cn-hangzhou")]
    pub region: String,

    #[command(flatten)]
    pub credentials: CredentialArgs,

    /// Run identifier (generated when omitted)
    #[arg(long)]
    pub run_id: Option<String>,

    /// Never fall back to the default inventory
    #[arg(long)]
    pub no_fallback: bool,
}

/// Run the migrate command
pub async fn run(config_path: &str, args: MigrateArgs) -> Result<()> {
    let config = runner::load_config(config_path)?;

    let run_id = match args.run_id {
        Some(id) => RunId::new(id)?,
        None => RunId::new(uuid::Uuid::new_v4().to_string())?,
    };
    let request = MigrationRequest {
        run_id,
        source: SourceSelector {
            network_id: args.vpc_id,
            region: args.region,
        },
        target_project_name: args.project_name,
        target_directory: args.target_dir,
        credentials: args.credentials.source(),
    };

    let mut settings = EngineSettings::from_config(&config.migration);
    if args.no_fallback {
        settings.fallback_enabled = false;
    }

    tracing::info!(
        run_id = %request.run_id,
        project = %request.target_project_name,
        region = %request.source.region,
        network_id = ?request.source.network_id,
        "Starting migration"
    );

    let runner = Runner::new(&config, &args.credentials, settings);
    let outcome = runner.engine().run(request).await;
    runner.finish(outcome).await
}
