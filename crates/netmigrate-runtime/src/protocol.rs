//! Tool server wire protocol
//!
//! Frames are single-line JSON documents separated by `\n`. The client sends
//! [`Request`] frames and the server answers each with a [`Response`] frame
//! carrying the same `id`. Responses may arrive in any order.
//!
//! ```text
//! → {"id":1,"method":"tools/call","params":{"tool_name":"VPC_DescribeVpcs","parameters":{"RegionId":"cn-hangzhou"}}}
//! ← {"id":1,"result":{"Vpcs":{"Vpc":[...]}}}
//! ← {"id":2,"error":{"error_code":"unavailable","message":"throttled"}}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Typed tool parameters
pub type Parameters = BTreeMap<String, ParamValue>;

/// A scalar or string-list parameter value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// Boolean
    Bool(bool),
    /// Integer
    Int(i64),
    /// Floating point number
    Number(f64),
    /// String
    Text(String),
    /// List of strings
    List(Vec<String>),
}

impl ParamValue {
    /// The kind this value satisfies
    pub fn kind(&self) -> ParamKind {
        match self {
            Self::Bool(_) => ParamKind::Bool,
            Self::Int(_) => ParamKind::Integer,
            Self::Number(_) => ParamKind::Number,
            Self::Text(_) => ParamKind::String,
            Self::List(_) => ParamKind::StringList,
        }
    }

    fn satisfies(&self, kind: ParamKind) -> bool {
        self.kind() == kind || (kind == ParamKind::Number && matches!(self, Self::Int(_)))
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<Vec<String>> for ParamValue {
    fn from(value: Vec<String>) -> Self {
        Self::List(value)
    }
}

/// Declared type of a tool parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    /// `true` / `false`
    Bool,
    /// Whole number
    Integer,
    /// Any number
    Number,
    /// String
    String,
    /// List of strings
    StringList,
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Bool => "bool",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::String => "string",
            Self::StringList => "string_list",
        })
    }
}

/// One declared parameter of a tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamSchema {
    /// Parameter name
    pub name: String,

    /// Expected kind
    pub kind: ParamKind,

    /// Whether callers must supply it
    #[serde(default)]
    pub required: bool,
}

/// A tool as advertised during capability discovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSchema {
    /// Tool name
    pub tool_name: String,

    /// Declared parameters
    #[serde(default)]
    pub parameter_schema: Vec<ParamSchema>,
}

impl ToolSchema {
    /// Check call parameters against the declared schema.
    ///
    /// Returns a description of the first mismatch.
    pub fn check(&self, parameters: &Parameters) -> Result<(), String> {
        for param in &self.parameter_schema {
            match parameters.get(&param.name) {
                Some(value) if !value.satisfies(param.kind) => {
                    return Err(format!(
                        "parameter '{}' must be {}, got {}",
                        param.name,
                        param.kind,
                        value.kind()
                    ));
                }
                None if param.required => {
                    return Err(format!("missing required parameter '{}'", param.name));
                }
                _ => {}
            }
        }
        if let Some(unknown) = parameters
            .keys()
            .find(|name| !self.parameter_schema.iter().any(|p| &p.name == *name))
        {
            return Err(format!("unknown parameter '{unknown}'"));
        }
        Ok(())
    }
}

/// Result of `tools/list`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ToolList {
    /// Advertised tools
    #[serde(default)]
    pub tools: Vec<ToolSchema>,
}

/// Result of `initialize`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Server name
    pub server_name: String,

    /// Server version, if reported
    #[serde(default)]
    pub server_version: Option<String>,
}

/// Request method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Method {
    /// Handshake
    #[serde(rename = "initialize")]
    Initialize,
    /// Capability discovery
    #[serde(rename = "tools/list")]
    ListTools,
    /// Tool invocation
    #[serde(rename = "tools/call")]
    CallTool,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Initialize => "initialize",
            Self::ListTools => "tools/list",
            Self::CallTool => "tools/call",
        })
    }
}

/// Parameters of `tools/call`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallParams {
    /// Tool to invoke
    pub tool_name: String,

    /// Typed parameters
    #[serde(default)]
    pub parameters: Parameters,
}

/// Client → server frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Correlation id
    pub id: u64,

    /// Method
    pub method: Method,

    /// Method parameters
    #[serde(default)]
    pub params: Value,
}

/// Server → client frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Correlation id of the request being answered
    pub id: u64,

    /// Success payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Structured failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Response {
    /// Successful response
    pub fn success(id: u64, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Failed response
    pub fn failure(id: u64, error_code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            id,
            result: None,
            error: Some(ErrorBody {
                error_code,
                message: message.into(),
            }),
        }
    }
}

/// Structured error returned by a tool server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Error class
    pub error_code: ErrorCode,

    /// Human-readable message
    pub message: String,
}

/// Tool server error classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Parameters rejected by the server
    InvalidParams,
    /// Unknown tool or missing resource
    NotFound,
    /// Backend temporarily unavailable
    Unavailable,
    /// Backend timed out
    Timeout,
    /// Server bug
    Internal,
    /// Tool ran and failed
    Failed,
}

impl ErrorCode {
    /// Whether retrying the same call may succeed
    pub fn is_transient(self) -> bool {
        matches!(self, Self::Unavailable | Self::Timeout)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::InvalidParams => "invalid_params",
            Self::NotFound => "not_found",
            Self::Unavailable => "unavailable",
            Self::Timeout => "timeout",
            Self::Internal => "internal",
            Self::Failed => "failed",
        })
    }
}

/// Serialize a frame followed by the `\n` delimiter.
pub fn encode_frame<T: Serialize>(frame: &T) -> serde_json::Result<Vec<u8>> {
    let mut bytes = serde_json::to_vec(frame)?;
    bytes.push(b'\n');
    Ok(bytes)
}
