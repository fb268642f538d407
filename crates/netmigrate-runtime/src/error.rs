//! Runtime error types
//!
//! Every failure a migration run can hit, classified as transient (retried
//! by the workflow engine within a stage) or permanent (fails the stage at
//! once).

use netmigrate_core::{RunId, ValidationReport};
use thiserror::Error;

use crate::checkpoint::Stage;
use crate::protocol::ErrorCode;

/// Result type for runtime operations
pub type Result<T> = std::result::Result<T, MigrationError>;

/// Errors raised while running a migration
#[derive(Error, Debug)]
pub enum MigrationError {
    /// First connection to a tool server failed
    #[error("cannot connect to tool server '{server}': {message}")]
    Connection {
        /// Server id
        server: String,
        /// Underlying cause
        message: String,
    },

    /// A previously working tool server was lost and could not be reached again
    #[error("tool server '{server}' unavailable: {message}")]
    ServerUnavailable {
        /// Server id
        server: String,
        /// Underlying cause
        message: String,
    },

    /// Call deadline expired before a response arrived
    #[error("call to {server}/{tool} timed out")]
    ToolInvocationTimeout {
        /// Server id
        server: String,
        /// Tool name
        tool: String,
    },

    /// Tool is not advertised by the server, or the parameters do not match
    /// its schema
    #[error("tool {server}/{tool} not available: {reason}")]
    ToolNotAvailable {
        /// Server id
        server: String,
        /// Tool name
        tool: String,
        /// Why the call was rejected
        reason: String,
    },

    /// Server answered with a structured error
    #[error("tool {server}/{tool} failed ({code}): {message}")]
    ToolFailed {
        /// Server id
        server: String,
        /// Tool name
        tool: String,
        /// Error class reported by the server
        code: ErrorCode,
        /// Server message
        message: String,
    },

    /// Source data could not be mapped
    #[error("transformation failed: {message}")]
    Transformation {
        /// Description of the error
        message: String,
    },

    /// A validate stage found violations
    #[error("{stage} found {} violation(s): {}", .report.violations.len(), summarize(.report))]
    Validation {
        /// Stage that ran the validation
        stage: Stage,
        /// Full report
        report: ValidationReport,
    },

    /// Deployment tool reported a failure
    #[error("deployment failed: {message}")]
    Deployment {
        /// Description of the error
        message: String,
    },

    /// Server broke the wire protocol or returned an unusable payload
    #[error("protocol error from '{server}': {message}")]
    Protocol {
        /// Server id
        server: String,
        /// Description of the error
        message: String,
    },

    /// Checkpoint could not be read or written
    #[error("checkpoint error: {message}")]
    Checkpoint {
        /// Description of the error
        message: String,
    },

    /// No checkpoint exists for a run being resumed
    #[error("no checkpoint found for run '{run_id}'")]
    NoCheckpoint {
        /// Run identifier
        run_id: RunId,
    },

    /// A run id was reused with a different request
    #[error("run '{run_id}' was started with a different request")]
    RequestMismatch {
        /// Run identifier
        run_id: RunId,
    },

    /// Server id is not configured
    #[error("unknown tool server '{server}'")]
    UnknownServer {
        /// Server id
        server: String,
    },

    /// Error from the core library
    #[error(transparent)]
    Core(#[from] netmigrate_core::Error),
}

impl MigrationError {
    /// Whether the failed operation may succeed if attempted again
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Connection { .. }
            | Self::ServerUnavailable { .. }
            | Self::ToolInvocationTimeout { .. }
            | Self::Deployment { .. } => true,
            Self::ToolFailed { code, .. } => code.is_transient(),
            _ => false,
        }
    }

    /// Short error class name for logs and checkpoints
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connection { .. } => "connection",
            Self::ServerUnavailable { .. } => "server_unavailable",
            Self::ToolInvocationTimeout { .. } => "tool_invocation_timeout",
            Self::ToolNotAvailable { .. } => "tool_not_available",
            Self::ToolFailed { .. } => "tool_failed",
            Self::Transformation { .. } => "transformation",
            Self::Validation { .. } => "validation",
            Self::Deployment { .. } => "deployment",
            Self::Protocol { .. } => "protocol",
            Self::Checkpoint { .. } => "checkpoint",
            Self::NoCheckpoint { .. } => "no_checkpoint",
            Self::RequestMismatch { .. } => "request_mismatch",
            Self::UnknownServer { .. } => "unknown_server",
            Self::Core(_) => "core",
        }
    }
}

fn summarize(report: &ValidationReport) -> String {
    report
        .violations
        .iter()
        .map(|v| format!("{} [{}] {}", v.field_path, v.rule_name, v.message))
        .collect::<Vec<_>>()
        .join("; ")
}
