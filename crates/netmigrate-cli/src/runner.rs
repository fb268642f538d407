//! Plumbing shared by the commands that drive the workflow engine

use anyhow::{Context, Result};
use clap::Args;
use netmigrate_core::config::CONFIG_FILE;
use netmigrate_core::{Config, CredentialSource};
use netmigrate_runtime::{
    ClientManager, EngineSettings, FileCheckpointStore, MigrationError, ProcessDialer, RunReport,
    Stage, StageStatus, WorkflowEngine,
};
use std::path::Path;
use std::sync::Arc;

/// Environment variables the source inventory server reads its keys from
const ACCESS_KEY_ID_VAR: &str = "ALIBABA_CLOUD_ACCESS_KEY_ID";
const ACCESS_KEY_SECRET_VAR: &str = "ALIBABA_CLOUD_ACCESS_KEY_SECRET";

/// Source credential override flags
#[derive(Args, Debug)]
pub struct CredentialArgs {
    /// Source access key id (defaults to ALIBABA_CLOUD_ACCESS_KEY_ID)
    #[arg(long)]
    pub ak_id: Option<String>,

    /// Source access key secret (defaults to ALIBABA_CLOUD_ACCESS_KEY_SECRET)
    #[arg(long)]
    pub ak_secret: Option<String>,
}

impl CredentialArgs {
    /// Where the run's credentials come from
    pub fn source(&self) -> CredentialSource {
        if self.ak_id.is_some() || self.ak_secret.is_some() {
            CredentialSource::CommandLine
        } else {
            CredentialSource::Environment
        }
    }

    /// Dialer for the configured servers with the overrides injected
    fn dialer(&self, config: &Config) -> ProcessDialer {
        let mut dialer = ProcessDialer::new(config.migration.servers.clone());
        if let Some(id) = &self.ak_id {
            dialer = dialer.with_env(ACCESS_KEY_ID_VAR, id);
        }
        if let Some(secret) = &self.ak_secret {
            dialer = dialer.with_env(ACCESS_KEY_SECRET_VAR, secret);
        }
        dialer
    }
}

/// Load configuration. A missing file at the default location means the
/// built-in defaults.
pub fn load_config(config_path: &str) -> Result<Config> {
    let path = Path::new(config_path);
    if config_path == CONFIG_FILE && !path.exists() {
        tracing::debug!("No {CONFIG_FILE} found, using built-in defaults");
        return Ok(Config::with_defaults("."));
    }
    Config::load(path).with_context(|| format!("Failed to load configuration from {config_path}"))
}

/// Checkpoint store configured for the project
pub fn checkpoint_store(config: &Config) -> FileCheckpointStore {
    FileCheckpointStore::new(config.checkpoint_dir())
}

/// A workflow engine together with the connections it owns
pub struct Runner {
    manager: Arc<ClientManager>,
    engine: WorkflowEngine,
}

impl Runner {
    /// Wire the process dialer, client manager and checkpoint store together
    pub fn new(config: &Config, credentials: &CredentialArgs, settings: EngineSettings) -> Self {
        let manager = Arc::new(ClientManager::new(Arc::new(credentials.dialer(config))));
        let store = Arc::new(checkpoint_store(config));
        let engine = WorkflowEngine::new(manager.clone(), store, settings);
        Self { manager, engine }
    }

    /// The engine
    pub fn engine(&self) -> &WorkflowEngine {
        &self.engine
    }

    /// Close every tool server connection, print the outcome and turn a
    /// failed run into an error.
    pub async fn finish(self, outcome: std::result::Result<RunReport, MigrationError>) -> Result<()> {
        self.manager.shutdown().await;
        let report = outcome.context("Run could not proceed")?;
        print_report(&report);

        if report.is_success() {
            return Ok(());
        }
        let stage = report.failed_stage.map(Stage::as_str).unwrap_or("unknown stage");
        match &report.error {
            Some(error) => anyhow::bail!(
                "Run {} failed at {stage}: {error} (resume with `netmigrate resume {}`)",
                report.run_id,
                report.run_id
            ),
            None => anyhow::bail!("Run {} failed at {stage}", report.run_id),
        }
    }
}

fn print_report(report: &RunReport) {
    println!("Run {}: {}", report.run_id, report.state);
    for result in &report.stage_results {
        let status = match result.status {
            StageStatus::Success => "ok",
            StageStatus::Failed => "FAILED",
            StageStatus::Skipped => "skipped",
        };
        println!(
            "  {:<16} {:<8} attempts={}",
            result.stage.as_str(),
            status,
            result.attempts
        );
    }

    if let Some(extracted) = report.extract_output()
        && extracted.fallback
    {
        println!(
            "  note: default inventory used ({})",
            extracted.fallback_reason.as_deref().unwrap_or("no reason recorded")
        );
    }
    if let Some(location) = report
        .outputs
        .get(&Stage::Generate)
        .and_then(|output| output.get("location"))
        .and_then(|location| location.as_str())
    {
        println!("  project: {location}");
    }
}
