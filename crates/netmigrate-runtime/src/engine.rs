//! Workflow engine
//!
//! Drives one migration run through the linear stage pipeline:
//!
//! ```text
//! extract → transform → validate_source → generate → validate_target → deploy
//! ```
//!
//! After every stage the checkpoint is saved before the next stage starts.
//! A crash after that save never repeats the stage; a crash before it
//! repeats the stage from scratch. Re-running with the same run id skips
//! every stage whose output is already recorded.
//!
//! Extract and deploy retry transient failures with exponential backoff.
//! Extraction may fall back to a built-in inventory when no source network
//! is selected or the source server stays unreachable; the fallback is
//! logged and recorded in the stage output.

use chrono::{DateTime, Utc};
use netmigrate_core::brief::{render_brief, stack_class_name};
use netmigrate_core::config::{MigrationConfig, OnSuccess, RetryConfig, StageBindings, TimeoutConfig};
use netmigrate_core::inventory::{parse_network, parse_security_groups, parse_subnets};
use netmigrate_core::{
    CanonicalSpec, MigrationRequest, RunId, SourceInventory, Transformed, ValidationMode,
    ValidationReport,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tokio::time::Instant;

use crate::checkpoint::{CheckpointStore, Stage, WorkflowCheckpoint, WorkflowState};
use crate::error::{MigrationError, Result};
use crate::manager::ToolInvoker;
use crate::protocol::{ParamValue, Parameters};

// ============================================================================
// Settings
// ============================================================================

/// Engine policy, usually derived from `netmigrate.yaml`
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Server and tool bindings for the remote stages
    pub stages: StageBindings,

    /// Retry policy for extract and deploy
    pub retry: RetryConfig,

    /// Call and checkpoint deadlines
    pub timeouts: TimeoutConfig,

    /// Whether extraction may fall back to the built-in inventory
    pub fallback_enabled: bool,

    /// Whether validation violations fail the run
    pub fail_on_violations: bool,

    /// What happens to the checkpoint of a completed run
    pub on_success: OnSuccess,
}

impl EngineSettings {
    /// Settings from a parsed configuration
    pub fn from_config(config: &MigrationConfig) -> Self {
        Self {
            stages: config.stages.clone(),
            retry: config.retry,
            timeouts: config.timeouts,
            fallback_enabled: config.fallback.enabled,
            fail_on_violations: config.validation.fail_on_violations,
            on_success: config.checkpoint.on_success,
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_config(&MigrationConfig::default())
    }
}

// ============================================================================
// Stage outputs and reports
// ============================================================================

/// Output of the extract stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractOutput {
    /// The source inventory the run continues with
    pub inventory: SourceInventory,

    /// Whether `inventory` is the built-in default
    pub fallback: bool,

    /// Why the fallback was taken
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
}

/// Output of the generate stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateOutput {
    /// Where the generated project lives
    pub location: String,

    /// Generated stack class
    pub stack_name: String,

    /// Digest of the spec the project was generated from
    pub spec_digest: String,
}

/// Output of the deploy stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployOutput {
    /// Project that was deployed
    pub location: String,

    /// Deployed stack class
    pub stack_name: String,

    /// Raw result from the deploy tool
    pub result: Value,
}

/// How a stage execution ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Ran and succeeded
    Success,
    /// Ran and failed
    Failed,
    /// Already complete in the checkpoint
    Skipped,
}

/// Outcome of one stage within one engine invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    /// Stage
    pub stage: Stage,

    /// Outcome
    pub status: StageStatus,

    /// Stage output, recorded or freshly produced
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,

    /// Error text when failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Attempts spent in this invocation
    pub attempts: u32,

    /// When the stage finished
    pub timestamp: DateTime<Utc>,
}

impl StageResult {
    fn new(stage: Stage, status: StageStatus, output: Option<Value>, error: Option<String>, attempts: u32) -> Self {
        Self {
            stage,
            status,
            output,
            error,
            attempts,
            timestamp: Utc::now(),
        }
    }
}

/// Terminal outcome of an engine invocation
#[derive(Debug)]
pub struct RunReport {
    /// Run identifier
    pub run_id: RunId,

    /// Completed or Failed
    pub state: WorkflowState,

    /// Per-stage outcomes in pipeline order
    pub stage_results: Vec<StageResult>,

    /// Stage that failed
    pub failed_stage: Option<Stage>,

    /// Error that failed the run
    pub error: Option<MigrationError>,

    /// Outputs of every completed stage
    pub outputs: BTreeMap<Stage, Value>,
}

impl RunReport {
    /// Whether the run completed
    pub fn is_success(&self) -> bool {
        self.state == WorkflowState::Completed
    }

    /// Canonical spec produced by the transform stage, if it ran
    pub fn spec(&self) -> Option<CanonicalSpec> {
        let output = self.outputs.get(&Stage::Transform)?;
        serde_json::from_value::<Transformed>(output.clone())
            .ok()
            .map(|t| t.spec)
    }

    /// Extract stage output, if it ran
    pub fn extract_output(&self) -> Option<ExtractOutput> {
        let output = self.outputs.get(&Stage::Extract)?;
        serde_json::from_value(output.clone()).ok()
    }
}

// ============================================================================
// Engine
// ============================================================================

/// The stage pipeline state machine
pub struct WorkflowEngine {
    invoker: Arc<dyn ToolInvoker>,
    store: Arc<dyn CheckpointStore>,
    settings: EngineSettings,
}

impl WorkflowEngine {
    /// Create an engine over a tool invoker and a checkpoint store
    pub fn new(
        invoker: Arc<dyn ToolInvoker>,
        store: Arc<dyn CheckpointStore>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            invoker,
            store,
            settings,
        }
    }

    /// Run a migration, resuming from its checkpoint if one exists.
    ///
    /// Stage failures produce a Failed [`RunReport`]; `Err` is returned only
    /// when the run cannot proceed at all (checkpoint I/O, reused run id).
    pub async fn run(&self, request: MigrationRequest) -> Result<RunReport> {
        let run_id = request.run_id.clone();
        let checkpoint = match self.load(&run_id).await? {
            Some(existing) if existing.request != request => {
                return Err(MigrationError::RequestMismatch { run_id });
            }
            Some(existing) => {
                tracing::info!(
                    run_id = %run_id,
                    status = %existing.status,
                    next_stage = ?existing.next_stage(),
                    "resuming run from checkpoint"
                );
                existing
            }
            None => {
                tracing::info!(run_id = %run_id, "starting new run");
                WorkflowCheckpoint::new(request)
            }
        };
        self.drive(checkpoint).await
    }

    /// Resume a run using the request stored in its checkpoint.
    pub async fn resume(&self, run_id: &RunId) -> Result<RunReport> {
        let checkpoint = self
            .load(run_id)
            .await?
            .ok_or_else(|| MigrationError::NoCheckpoint {
                run_id: run_id.clone(),
            })?;
        tracing::info!(
            run_id = %run_id,
            status = %checkpoint.status,
            next_stage = ?checkpoint.next_stage(),
            "resuming run"
        );
        self.drive(checkpoint).await
    }

    async fn drive(&self, mut checkpoint: WorkflowCheckpoint) -> Result<RunReport> {
        let run_id = checkpoint.run_id.clone();
        let mut results = Vec::with_capacity(Stage::ALL.len());

        for stage in Stage::ALL {
            if let Some(output) = checkpoint.output(stage) {
                tracing::debug!(run_id = %run_id, stage = %stage, "stage already complete, skipping");
                results.push(StageResult::new(stage, StageStatus::Skipped, Some(output.clone()), None, 0));
                continue;
            }

            checkpoint.status = stage.state();
            tracing::info!(run_id = %run_id, stage = %stage, "stage started");
            let (outcome, attempts) = self.run_stage(stage, &checkpoint).await;

            match outcome {
                Ok(output) => {
                    checkpoint.record_success(stage, output.clone(), attempts);
                    self.save(&checkpoint).await?;
                    tracing::info!(run_id = %run_id, stage = %stage, attempts, "stage completed");
                    results.push(StageResult::new(stage, StageStatus::Success, Some(output), None, attempts));
                }
                Err(error) => {
                    tracing::error!(
                        run_id = %run_id,
                        stage = %stage,
                        attempts,
                        kind = error.kind(),
                        error = %error,
                        "stage failed"
                    );
                    checkpoint.record_failure(stage, &error, attempts);
                    if let Err(save_error) = self.save(&checkpoint).await {
                        let cause = match save_error {
                            MigrationError::Checkpoint { message } => message,
                            other => other.to_string(),
                        };
                        return Err(MigrationError::Checkpoint {
                            message: format!("{cause} (after {stage} failed: {error})"),
                        });
                    }
                    tracing::info!(run_id = %run_id, stage = %stage, "failure recorded, run can be resumed");
                    results.push(StageResult::new(
                        stage,
                        StageStatus::Failed,
                        None,
                        Some(error.to_string()),
                        attempts,
                    ));
                    return Ok(RunReport {
                        run_id,
                        state: WorkflowState::Failed,
                        stage_results: results,
                        failed_stage: Some(stage),
                        error: Some(error),
                        outputs: checkpoint.accumulated_outputs,
                    });
                }
            }
        }

        checkpoint.status = WorkflowState::Completed;
        checkpoint.updated_at = Utc::now();
        match self.settings.on_success {
            OnSuccess::Clear => {
                let id = run_id.clone();
                self.blocking(move |store| store.clear(&id)).await?;
            }
            OnSuccess::Archive => {
                self.save(&checkpoint).await?;
                let id = run_id.clone();
                self.blocking(move |store| store.archive(&id)).await?;
            }
        }
        tracing::info!(run_id = %run_id, "run completed");

        Ok(RunReport {
            run_id,
            state: WorkflowState::Completed,
            stage_results: results,
            failed_stage: None,
            error: None,
            outputs: checkpoint.accumulated_outputs,
        })
    }

    /// Execute one stage with its retry policy; returns attempts spent.
    async fn run_stage(&self, stage: Stage, checkpoint: &WorkflowCheckpoint) -> (Result<Value>, u32) {
        let run_id = &checkpoint.run_id;
        match stage {
            Stage::Extract => self.extract_stage(&checkpoint.request).await,
            Stage::Transform => (self.transform_stage(checkpoint), 1),
            Stage::ValidateSource => (
                self.validate_stage(checkpoint, stage, ValidationMode::PreTransform),
                1,
            ),
            Stage::Generate => (self.generate_stage(checkpoint).await, 1),
            Stage::ValidateTarget => (
                self.validate_stage(checkpoint, stage, ValidationMode::PostTransform),
                1,
            ),
            Stage::Deploy => {
                self.with_retry(run_id, stage, || self.deploy_stage(checkpoint))
                    .await
            }
        }
    }

    /// Retry transient failures up to the configured attempt bound.
    async fn with_retry<F, Fut>(&self, run_id: &RunId, stage: Stage, mut op: F) -> (Result<Value>, u32)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Value>>,
    {
        let max_attempts = self.settings.retry.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return (Ok(value), attempt),
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let delay = self.settings.retry.backoff(attempt);
                    tracing::warn!(
                        run_id = %run_id,
                        stage = %stage,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return (Err(e), attempt),
            }
        }
    }

    // ------------------------------------------------------------------------
    // Stages
    // ------------------------------------------------------------------------

    async fn extract_stage(&self, request: &MigrationRequest) -> (Result<Value>, u32) {
        let fallback = self.settings.fallback_enabled;
        if fallback && request.source.network_id.is_none() {
            return (self.fallback(request, "no source network selected".to_string()), 1);
        }

        let (outcome, attempts) = self
            .with_retry(&request.run_id, Stage::Extract, || self.extract(request))
            .await;
        match outcome {
            Err(e) if fallback && e.is_transient() => {
                (self.fallback(request, format!("source unreachable after {attempts} attempt(s): {e}")), attempts)
            }
            other => (other, attempts),
        }
    }

    fn fallback(&self, request: &MigrationRequest, reason: String) -> Result<Value> {
        tracing::warn!(
            run_id = %request.run_id,
            region = %request.source.region,
            reason = %reason,
            "using built-in default inventory"
        );
        to_output(&ExtractOutput {
            inventory: SourceInventory::fallback(&request.source.region),
            fallback: true,
            fallback_reason: Some(reason),
        })
    }

    async fn extract(&self, request: &MigrationRequest) -> Result<Value> {
        let binding = &self.settings.stages.extract;
        let server = binding.server.as_str();
        let region = request.source.region.as_str();

        let mut params = Parameters::new();
        params.insert("RegionId".to_string(), ParamValue::from(region));

        // Without an explicit network the describe result decides which one
        let (known_network, network_id) = match &request.source.network_id {
            Some(id) => (None, id.clone()),
            None => {
                let payload = self.call(server, &binding.network_tool, params.clone()).await?;
                let record = parse_network(&payload, None).map_err(|e| payload_error(server, e))?;
                (Some(payload), record.network_id)
            }
        };
        params.insert("VpcId".to_string(), ParamValue::from(network_id.as_str()));

        let network = async {
            match &known_network {
                Some(payload) => Ok(payload.clone()),
                None => self.call(server, &binding.network_tool, params.clone()).await,
            }
        };
        let subnets = self.call(server, &binding.subnets_tool, params.clone());
        let groups = self.call(server, &binding.firewall_tool, params.clone());
        let (network, subnets, groups) = futures::join!(network, subnets, groups);

        let record = parse_network(&network?, Some(&network_id)).map_err(|e| payload_error(server, e))?;
        let subnets = parse_subnets(&subnets?).map_err(|e| payload_error(server, e))?;
        let groups = parse_security_groups(&groups?).map_err(|e| payload_error(server, e))?;

        let inventory = SourceInventory::assemble(record, region, subnets, groups);
        tracing::info!(
            run_id = %request.run_id,
            network_id = %inventory.network_id,
            subnets = inventory.subnets.len(),
            security_groups = inventory.security_groups.len(),
            "source inventory extracted"
        );
        to_output(&ExtractOutput {
            inventory,
            fallback: false,
            fallback_reason: None,
        })
    }

    fn transform_stage(&self, checkpoint: &WorkflowCheckpoint) -> Result<Value> {
        let extracted: ExtractOutput = stage_output(checkpoint, Stage::Extract)?;
        let transformed = netmigrate_core::transform(&extracted.inventory).map_err(|e| match e {
            netmigrate_core::Error::Transformation { message } => MigrationError::Transformation { message },
            other => MigrationError::Core(other),
        })?;
        tracing::info!(
            run_id = %checkpoint.run_id,
            digest = %transformed.spec.digest(),
            subnets = transformed.spec.subnets.len(),
            ingress_rules = transformed.spec.ingress_rules.len(),
            diagnostics = transformed.diagnostics.len(),
            "canonical spec produced"
        );
        to_output(&transformed)
    }

    fn validate_stage(&self, checkpoint: &WorkflowCheckpoint, stage: Stage, mode: ValidationMode) -> Result<Value> {
        let transformed: Transformed = stage_output(checkpoint, Stage::Transform)?;
        let report: ValidationReport = netmigrate_core::validate(&transformed.spec, mode);
        if !report.is_valid {
            for violation in &report.violations {
                tracing::warn!(
                    run_id = %checkpoint.run_id,
                    stage = %stage,
                    field = %violation.field_path,
                    rule = %violation.rule_name,
                    "{}",
                    violation.message
                );
            }
            if self.settings.fail_on_violations {
                return Err(MigrationError::Validation { stage, report });
            }
        }
        to_output(&report)
    }

    async fn generate_stage(&self, checkpoint: &WorkflowCheckpoint) -> Result<Value> {
        let binding = &self.settings.stages.generate;
        let request = &checkpoint.request;
        let transformed: Transformed = stage_output(checkpoint, Stage::Transform)?;
        let spec = &transformed.spec;

        let stack_name = stack_class_name(&request.target_project_name);
        let mut params = Parameters::new();
        params.insert(
            "spec".to_string(),
            ParamValue::Text(serde_json::to_string(spec).map_err(|e| MigrationError::Core(e.into()))?),
        );
        params.insert(
            "brief".to_string(),
            ParamValue::Text(render_brief(&request.target_project_name, spec)?),
        );
        params.insert("project_name".to_string(), ParamValue::from(request.target_project_name.as_str()));
        params.insert("target_dir".to_string(), ParamValue::from(request.target_directory.as_str()));
        params.insert("stack_name".to_string(), ParamValue::from(stack_name.as_str()));

        let result = self.call(&binding.server, &binding.tool, params).await?;
        let location = result
            .get("location")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| MigrationError::Protocol {
                server: binding.server.clone(),
                message: "generation result carries no location".to_string(),
            })?;

        tracing::info!(run_id = %checkpoint.run_id, location, stack = %stack_name, "target project generated");
        to_output(&GenerateOutput {
            location: location.to_string(),
            stack_name,
            spec_digest: spec.digest(),
        })
    }

    async fn deploy_stage(&self, checkpoint: &WorkflowCheckpoint) -> Result<Value> {
        let binding = &self.settings.stages.deploy;
        let generated: GenerateOutput = stage_output(checkpoint, Stage::Generate)?;

        let mut params = Parameters::new();
        params.insert("location".to_string(), ParamValue::from(generated.location.as_str()));
        params.insert("stack_name".to_string(), ParamValue::from(generated.stack_name.as_str()));

        let result = match self.call(&binding.server, &binding.tool, params).await {
            Ok(result) => result,
            Err(MigrationError::ToolFailed { code, message, .. }) => {
                return Err(MigrationError::Deployment {
                    message: format!("{code}: {message}"),
                });
            }
            Err(e) => return Err(e),
        };

        tracing::info!(run_id = %checkpoint.run_id, stack = %generated.stack_name, "stack deployed");
        to_output(&DeployOutput {
            location: generated.location,
            stack_name: generated.stack_name,
            result,
        })
    }

    // ------------------------------------------------------------------------
    // Suspension points
    // ------------------------------------------------------------------------

    async fn call(&self, server: &str, tool: &str, params: Parameters) -> Result<Value> {
        let deadline = Instant::now() + self.settings.timeouts.call();
        self.invoker.invoke(server, tool, params, deadline).await
    }

    async fn load(&self, run_id: &RunId) -> Result<Option<WorkflowCheckpoint>> {
        let id = run_id.clone();
        self.blocking(move |store| store.load(&id)).await
    }

    async fn save(&self, checkpoint: &WorkflowCheckpoint) -> Result<()> {
        let checkpoint = checkpoint.clone();
        self.blocking(move |store| store.save(&checkpoint)).await
    }

    /// Run a store operation off the async threads, bounded by the
    /// checkpoint deadline.
    async fn blocking<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn CheckpointStore) -> Result<T> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let task = tokio::task::spawn_blocking(move || op(store.as_ref()));
        match tokio::time::timeout(self.settings.timeouts.checkpoint(), task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(MigrationError::Checkpoint {
                message: format!("checkpoint task failed: {e}"),
            }),
            Err(_) => Err(MigrationError::Checkpoint {
                message: format!(
                    "checkpoint I/O exceeded {}ms",
                    self.settings.timeouts.checkpoint_ms
                ),
            }),
        }
    }
}

fn to_output<T: Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| MigrationError::Core(e.into()))
}

fn stage_output<T: DeserializeOwned>(checkpoint: &WorkflowCheckpoint, stage: Stage) -> Result<T> {
    let output = checkpoint
        .output(stage)
        .ok_or_else(|| MigrationError::Checkpoint {
            message: format!("{stage} has no recorded output"),
        })?;
    serde_json::from_value(output.clone()).map_err(|e| MigrationError::Checkpoint {
        message: format!("recorded output of {stage} is unreadable: {e}"),
    })
}

fn payload_error(server: &str, error: netmigrate_core::Error) -> MigrationError {
    MigrationError::Protocol {
        server: server.to_string(),
        message: error.to_string(),
    }
}
