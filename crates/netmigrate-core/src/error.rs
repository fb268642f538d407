//! Error types for netmigrate-core

use thiserror::Error;

/// Result type alias for netmigrate-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in netmigrate-core
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file could not be found
    #[error("configuration file not found: {path}")]
    ConfigNotFound {
        /// Path that was searched
        path: String,
    },

    /// Failed to parse YAML configuration
    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    /// Invalid configuration value
    #[error("invalid configuration: {message}")]
    ConfigInvalid {
        /// Description of what's invalid
        message: String,
    },

    /// Source inventory could not be mapped to a canonical spec
    #[error("transformation error: {message}")]
    Transformation {
        /// Description of the error
        message: String,
    },

    /// Source payload returned by a tool server has an unexpected shape
    #[error("malformed {what} payload: {message}")]
    MalformedPayload {
        /// Which payload (network, subnets, security groups)
        what: &'static str,
        /// Description of the error
        message: String,
    },

    /// Address range could not be parsed
    #[error("invalid CIDR '{value}': {reason}")]
    InvalidCidr {
        /// The offending text
        value: String,
        /// Why it was rejected
        reason: &'static str,
    },

    /// Run identifier is not usable as a checkpoint key
    #[error("invalid run id '{value}': {reason}")]
    InvalidRunId {
        /// The offending identifier
        value: String,
        /// Why it was rejected
        reason: &'static str,
    },

    /// Template rendering error
    #[error("template error: {0}")]
    TemplateError(#[from] minijinja::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
