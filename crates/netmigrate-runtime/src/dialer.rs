//! Establishing byte streams to tool servers
//!
//! The client manager does not know how a tool server is reached; it asks a
//! [`Dialer`]. [`ProcessDialer`] spawns the configured command and talks
//! over its stdin/stdout. Tests substitute in-memory streams.

use async_trait::async_trait;
use netmigrate_core::config::ServerConfig;
use std::collections::BTreeMap;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::process::{Child, Command};

use crate::error::{MigrationError, Result};

/// Read half of a tool server stream
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Write half of a tool server stream
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Handshake deadline used when a dialer does not specify one
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// An established, not yet initialized, connection
pub struct Connection {
    /// Responses from the server
    pub reader: BoxedReader,
    /// Requests to the server
    pub writer: BoxedWriter,
    /// Server process, owned by the connection
    pub child: Option<Child>,
}

/// Opens connections to tool servers by id
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Open a fresh connection to `server_id`.
    async fn dial(&self, server_id: &str) -> Result<Connection>;

    /// Deadline for the initialize + discovery handshake
    fn handshake_timeout(&self, _server_id: &str) -> Duration {
        DEFAULT_HANDSHAKE_TIMEOUT
    }
}

/// Spawns each tool server as a child process speaking over stdio
#[derive(Debug, Clone)]
pub struct ProcessDialer {
    servers: BTreeMap<String, ServerConfig>,
    env: BTreeMap<String, String>,
}

impl ProcessDialer {
    /// Create a dialer for the configured servers
    pub fn new(servers: BTreeMap<String, ServerConfig>) -> Self {
        Self {
            servers,
            env: BTreeMap::new(),
        }
    }

    /// Add an environment variable passed to every server, overriding the
    /// per-server configuration (used for credential overrides).
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

#[async_trait]
impl Dialer for ProcessDialer {
    async fn dial(&self, server_id: &str) -> Result<Connection> {
        let config = self
            .servers
            .get(server_id)
            .ok_or_else(|| MigrationError::UnknownServer {
                server: server_id.to_string(),
            })?;

        tracing::debug!(server = server_id, command = %config.command, args = ?config.args, "spawning tool server");

        let mut child = Command::new(&config.command)
            .args(&config.args)
            .envs(&config.env)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| MigrationError::Connection {
                server: server_id.to_string(),
                message: format!("failed to spawn '{}': {e}", config.command),
            })?;

        let missing = |what: &str| MigrationError::Connection {
            server: server_id.to_string(),
            message: format!("child process has no {what}"),
        };
        let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;

        if let Some(stderr) = child.stderr.take() {
            let server = server_id.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(server = %server, "{line}");
                }
            });
        }

        Ok(Connection {
            reader: Box::new(stdout),
            writer: Box::new(stdin),
            child: Some(child),
        })
    }

    fn handshake_timeout(&self, server_id: &str) -> Duration {
        self.servers
            .get(server_id)
            .map(ServerConfig::connect_timeout)
            .unwrap_or(DEFAULT_HANDSHAKE_TIMEOUT)
    }
}
