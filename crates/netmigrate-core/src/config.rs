//! Configuration parsing and validation
//!
//! This module handles loading the `netmigrate.yaml` project file. Every
//! section has defaults, so an empty file (or no file at all) describes a
//! working setup that talks to the stock tool servers.
//!
//! # Example
//!
//! ```yaml
//! name: hangzhou-to-aws
//! servers:
//!   source-inventory:
//!     command: uvx
//!     args: ["alibaba-cloud-ops-mcp-server@latest"]
//! retry:
//!   max_attempts: 5
//! fallback:
//!   enabled: false
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Default configuration file name
pub const CONFIG_FILE: &str = "netmigrate.yaml";

/// Root configuration from `netmigrate.yaml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Project name
    #[serde(default = "default_name")]
    pub name: String,

    /// Tool servers by id
    #[serde(default = "default_servers")]
    pub servers: BTreeMap<String, ServerConfig>,

    /// Which server and tools each remote stage uses
    #[serde(default)]
    pub stages: StageBindings,

    /// Retry policy for retryable stages
    #[serde(default)]
    pub retry: RetryConfig,

    /// Deadlines
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Fallback-to-default-inventory policy
    #[serde(default)]
    pub fallback: FallbackConfig,

    /// Checkpoint storage
    #[serde(default)]
    pub checkpoint: CheckpointConfig,

    /// Validation policy
    #[serde(default)]
    pub validation: ValidationConfig,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            servers: default_servers(),
            stages: StageBindings::default(),
            retry: RetryConfig::default(),
            timeouts: TimeoutConfig::default(),
            fallback: FallbackConfig::default(),
            checkpoint: CheckpointConfig::default(),
            validation: ValidationConfig::default(),
        }
    }
}

fn default_name() -> String {
    "network-migration".to_string()
}

fn default_servers() -> BTreeMap<String, ServerConfig> {
    let uvx = |package: &str, env: &[(&str, &str)]| ServerConfig {
        command: "uvx".to_string(),
        args: vec![package.to_string()],
        env: env
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        connect_timeout_ms: default_connect_timeout_ms(),
    };
    BTreeMap::from([
        (
            "source-inventory".to_string(),
            uvx("alibaba-cloud-ops-mcp-server@latest", &[]),
        ),
        (
            "codegen".to_string(),
            uvx("awslabs.cdk-mcp-server@latest", &[("FASTMCP_LOG_LEVEL", "ERROR")]),
        ),
        (
            "deploy".to_string(),
            uvx("awslabs.cdk-deploy-mcp-server@latest", &[("AWS_REGION", "us-east-1")]),
        ),
    ])
}

/// How to launch one tool server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Executable to spawn
    pub command: String,

    /// Arguments
    #[serde(default)]
    pub args: Vec<String>,

    /// Extra environment variables
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Deadline for spawn + handshake
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl ServerConfig {
    /// Handshake deadline as a `Duration`
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

fn default_connect_timeout_ms() -> u64 {
    30_000
}

/// Server/tool bindings for the remote stages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageBindings {
    /// Extraction tools
    #[serde(default)]
    pub extract: ExtractBinding,

    /// Code generation tool
    #[serde(default = "default_generate_binding")]
    pub generate: ToolBinding,

    /// Deployment tool
    #[serde(default = "default_deploy_binding")]
    pub deploy: ToolBinding,
}

impl Default for StageBindings {
    fn default() -> Self {
        Self {
            extract: ExtractBinding::default(),
            generate: default_generate_binding(),
            deploy: default_deploy_binding(),
        }
    }
}

/// Extraction issues three calls against one server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractBinding {
    /// Server id
    pub server: String,

    /// Tool describing the network itself
    pub network_tool: String,

    /// Tool listing sub-networks
    pub subnets_tool: String,

    /// Tool listing security groups
    pub firewall_tool: String,
}

impl Default for ExtractBinding {
    fn default() -> Self {
        Self {
            server: "source-inventory".to_string(),
            network_tool: "VPC_DescribeVpcs".to_string(),
            subnets_tool: "VPC_DescribeVSwitches".to_string(),
            firewall_tool: "ECS_DescribeSecurityGroups".to_string(),
        }
    }
}

/// A single tool on a single server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolBinding {
    /// Server id
    pub server: String,

    /// Tool name
    pub tool: String,
}

fn default_generate_binding() -> ToolBinding {
    ToolBinding {
        server: "codegen".to_string(),
        tool: "generate_vpc_stack".to_string(),
    }
}

fn default_deploy_binding() -> ToolBinding {
    ToolBinding {
        server: "deploy".to_string(),
        tool: "deploy_stack".to_string(),
    }
}

/// Retry policy for the extract and deploy stages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the second attempt; doubles each time
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound on any single delay
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryConfig {
    /// Delay to wait after the given failed attempt (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        let delay_ms = self.base_delay_ms.saturating_mul(factor);
        Duration::from_millis(delay_ms.min(self.max_delay_ms))
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    10_000
}

/// Deadlines for the two suspension points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Deadline for one tool invocation
    #[serde(default = "default_call_ms")]
    pub call_ms: u64,

    /// Deadline for one checkpoint write
    #[serde(default = "default_checkpoint_ms")]
    pub checkpoint_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            call_ms: default_call_ms(),
            checkpoint_ms: default_checkpoint_ms(),
        }
    }
}

impl TimeoutConfig {
    /// Tool call deadline
    pub fn call(&self) -> Duration {
        Duration::from_millis(self.call_ms)
    }

    /// Checkpoint write deadline
    pub fn checkpoint(&self) -> Duration {
        Duration::from_millis(self.checkpoint_ms)
    }
}

fn default_call_ms() -> u64 {
    120_000
}

fn default_checkpoint_ms() -> u64 {
    5_000
}

/// Fallback-to-default-inventory policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackConfig {
    /// Use the built-in inventory when no source network is selected or the
    /// source server stays unreachable after retries
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// What happens to a checkpoint once its run completes
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OnSuccess {
    /// Delete the checkpoint
    #[default]
    Clear,
    /// Move it under `archive/`
    Archive,
}

/// Checkpoint storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Directory holding one JSON file per run
    #[serde(default = "default_checkpoint_dir")]
    pub dir: PathBuf,

    /// Disposal on completion
    #[serde(default)]
    pub on_success: OnSuccess,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            dir: default_checkpoint_dir(),
            on_success: OnSuccess::default(),
        }
    }
}

fn default_checkpoint_dir() -> PathBuf {
    PathBuf::from(".netmigrate/checkpoints")
}

/// Validation policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Fail the run when a validate stage reports violations
    #[serde(default = "default_true")]
    pub fail_on_violations: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            fail_on_violations: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Main configuration container
#[derive(Debug, Clone)]
pub struct Config {
    /// Parsed configuration
    pub migration: MigrationConfig,

    /// Directory the configuration was loaded from; relative paths resolve
    /// against it
    pub base_path: PathBuf,
}

impl Config {
    /// Load configuration from a directory or a `netmigrate.yaml` file
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let config = Config::load("./migration")?;
    /// println!("Project: {}", config.migration.name);
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let (config_path, base_path) = if path.is_dir() {
            (path.join(CONFIG_FILE), path.to_path_buf())
        } else {
            (
                path.to_path_buf(),
                path.parent().unwrap_or(Path::new(".")).to_path_buf(),
            )
        };

        if !config_path.exists() {
            return Err(Error::ConfigNotFound {
                path: config_path.display().to_string(),
            });
        }

        let contents = std::fs::read_to_string(&config_path)?;
        let migration: MigrationConfig = serde_yaml::from_str(&contents)?;
        let config = Self {
            migration,
            base_path,
        };
        config.check()?;
        Ok(config)
    }

    /// Built-in defaults rooted at `base_path`
    pub fn with_defaults(base_path: impl Into<PathBuf>) -> Self {
        Self {
            migration: MigrationConfig::default(),
            base_path: base_path.into(),
        }
    }

    /// Checkpoint directory resolved against the base path
    pub fn checkpoint_dir(&self) -> PathBuf {
        let dir = &self.migration.checkpoint.dir;
        if dir.is_absolute() {
            dir.clone()
        } else {
            self.base_path.join(dir)
        }
    }

    /// Cross-field checks serde cannot express
    fn check(&self) -> Result<()> {
        let m = &self.migration;
        if m.retry.max_attempts == 0 {
            return Err(Error::ConfigInvalid {
                message: "retry.max_attempts must be at least 1".to_string(),
            });
        }
        let bound = [
            ("stages.extract", &m.stages.extract.server),
            ("stages.generate", &m.stages.generate.server),
            ("stages.deploy", &m.stages.deploy.server),
        ];
        for (section, server) in bound {
            if !m.servers.contains_key(server.as_str()) {
                return Err(Error::ConfigInvalid {
                    message: format!("{section} refers to unknown server '{server}'"),
                });
            }
        }
        Ok(())
    }
}
