//! Resume a run from its checkpoint

use anyhow::Result;
use netmigrate_core::RunId;
use netmigrate_runtime::EngineSettings;

use crate::runner::{self, CredentialArgs, Runner};

/// Run the resume command
pub async fn run(config_path: &str, run_id: &str, credentials: CredentialArgs) -> Result<()> {
    let config = runner::load_config(config_path)?;
    let run_id = RunId::new(run_id)?;

    tracing::info!(run_id = %run_id, "Resuming migration");

    let settings = EngineSettings::from_config(&config.migration);
    let runner = Runner::new(&config, &credentials, settings);
    let outcome = runner.engine().resume(&run_id).await;
    runner.finish(outcome).await
}
