//! Migration request and run identifiers

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

/// Identifier of one migration run.
///
/// Used verbatim as the checkpoint key, so it is restricted to ASCII
/// alphanumerics, `-`, `_` and `.`, and may not start with `.`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RunId(String);

impl RunId {
    /// Validate and wrap a run identifier
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        let invalid = |reason| Error::InvalidRunId {
            value: value.clone(),
            reason,
        };
        if value.is_empty() {
            return Err(invalid("must not be empty"));
        }
        if value.len() > 128 {
            return Err(invalid("must be at most 128 characters"));
        }
        if value.starts_with('.') {
            return Err(invalid("must not start with '.'"));
        }
        if !value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(invalid("only ASCII letters, digits, '-', '_' and '.' are allowed"));
        }
        Ok(Self(value))
    }

    /// Borrow as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for RunId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<RunId> for String {
    fn from(value: RunId) -> Self {
        value.0
    }
}

/// Which source network to migrate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSelector {
    /// Source network identifier; `None` means no network was selected
    #[serde(default)]
    pub network_id: Option<String>,

    /// Source region
    pub region: String,
}

/// Where the source credentials come from.
///
/// Secrets themselves never enter the request, so a request can be stored in
/// a checkpoint verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CredentialSource {
    /// Inherited from the process environment
    #[default]
    Environment,
    /// Overridden on the command line
    CommandLine,
}

/// A request to migrate one network. Immutable once a run starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationRequest {
    /// Unique run identifier
    pub run_id: RunId,

    /// Source network selection
    pub source: SourceSelector,

    /// Name of the generated target project
    pub target_project_name: String,

    /// Directory the target project is generated into
    pub target_directory: String,

    /// Credential provenance
    #[serde(default)]
    pub credentials: CredentialSource,
}
