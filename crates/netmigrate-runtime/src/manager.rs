//! Tool Server Client Manager
//!
//! Owns one logical connection per tool server. The first call for a server
//! dials it, performs the `initialize` handshake and caches the tool list
//! returned by `tools/list`. Every later call is checked against that cache
//! before anything is sent.
//!
//! Calls to the same server run concurrently over the shared link. A lost
//! link is replaced on the next call; if the server cannot be reached again
//! the call fails with [`MigrationError::ServerUnavailable`].

use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::time::Instant;

use crate::dialer::Dialer;
use crate::error::{MigrationError, Result};
use crate::link::{LinkError, ServerLink};
use crate::protocol::{CallParams, Method, Parameters, ServerInfo, ToolList, ToolSchema};

/// Uniform "invoke a tool" operation, usable concurrently.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    /// Invoke `tool_name` on `server_id`, giving up at `deadline`.
    ///
    /// Never retries; retry policy belongs to the caller.
    async fn invoke(
        &self,
        server_id: &str,
        tool_name: &str,
        parameters: Parameters,
        deadline: Instant,
    ) -> Result<Value>;
}

/// A link together with the capabilities discovered on it
struct Session {
    link: ServerLink,
    tools: HashMap<String, ToolSchema>,
}

#[derive(Default)]
struct Slot {
    session: Option<Arc<Session>>,
    connected_before: bool,
}

/// Connection-owning client for all tool servers
pub struct ClientManager {
    dialer: Arc<dyn Dialer>,
    slots: Mutex<HashMap<String, Arc<tokio::sync::Mutex<Slot>>>>,
}

impl ClientManager {
    /// Create a manager that reaches servers through `dialer`
    pub fn new(dialer: Arc<dyn Dialer>) -> Self {
        Self {
            dialer,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Names of the tools a server advertises, connecting if needed
    pub async fn tools(&self, server_id: &str) -> Result<Vec<String>> {
        let deadline = Instant::now() + self.dialer.handshake_timeout(server_id);
        let session = self.session(server_id, deadline).await?;
        let mut names: Vec<String> = session.tools.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    /// Close every open connection.
    pub async fn shutdown(&self) {
        let slots: Vec<_> = self
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();
        for (server_id, slot) in slots {
            if let Some(session) = slot.lock().await.session.take() {
                tracing::debug!(server = %server_id, "closing tool server connection");
                session.link.close().await;
            }
        }
    }

    fn slot(&self, server_id: &str) -> Arc<tokio::sync::Mutex<Slot>> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry(server_id.to_string()).or_default())
    }

    /// Current session for a server, (re)connecting when there is none.
    ///
    /// The slot lock is held while dialing so concurrent first callers share
    /// one connection. The handshake gives up at `deadline` at the latest.
    async fn session(&self, server_id: &str, deadline: Instant) -> Result<Arc<Session>> {
        let slot = self.slot(server_id);
        let mut slot = slot.lock().await;

        if let Some(session) = &slot.session {
            if !session.link.is_closed() {
                return Ok(Arc::clone(session));
            }
            tracing::info!(server = server_id, "connection lost, reconnecting");
        }
        slot.session = None;

        match self.connect(server_id, deadline).await {
            Ok(session) => {
                let session = Arc::new(session);
                slot.session = Some(Arc::clone(&session));
                slot.connected_before = true;
                Ok(session)
            }
            Err(e) if slot.connected_before => Err(MigrationError::ServerUnavailable {
                server: server_id.to_string(),
                message: format!("reconnect failed: {e}"),
            }),
            Err(e @ MigrationError::UnknownServer { .. }) => Err(e),
            Err(e @ MigrationError::Connection { .. }) => Err(e),
            Err(e) => Err(MigrationError::Connection {
                server: server_id.to_string(),
                message: e.to_string(),
            }),
        }
    }

    async fn connect(&self, server_id: &str, deadline: Instant) -> Result<Session> {
        let deadline = deadline.min(Instant::now() + self.dialer.handshake_timeout(server_id));
        let connection = self.dialer.dial(server_id).await?;
        let link = ServerLink::start(server_id, connection);

        let info = link
            .request(
                Method::Initialize,
                json!({
                    "client_name": env!("CARGO_PKG_NAME"),
                    "client_version": env!("CARGO_PKG_VERSION"),
                }),
                deadline,
            )
            .await
            .map_err(|e| handshake_error(server_id, "initialize", e))?;
        let info: ServerInfo = serde_json::from_value(info).map_err(|e| MigrationError::Protocol {
            server: server_id.to_string(),
            message: format!("bad initialize result: {e}"),
        })?;

        let listed = link
            .request(Method::ListTools, Value::Null, deadline)
            .await
            .map_err(|e| handshake_error(server_id, "tools/list", e))?;
        let listed: ToolList = serde_json::from_value(listed).map_err(|e| MigrationError::Protocol {
            server: server_id.to_string(),
            message: format!("bad tools/list result: {e}"),
        })?;

        tracing::info!(
            server = server_id,
            server_name = %info.server_name,
            tools = listed.tools.len(),
            "connected to tool server"
        );

        Ok(Session {
            link,
            tools: listed
                .tools
                .into_iter()
                .map(|tool| (tool.tool_name.clone(), tool))
                .collect(),
        })
    }
}

fn handshake_error(server_id: &str, step: &str, error: LinkError) -> MigrationError {
    let message = match error {
        LinkError::Closed(reason) => format!("{step}: {reason}"),
        LinkError::Timeout => format!("{step} timed out"),
        LinkError::Remote(body) => format!("{step} rejected ({}): {}", body.error_code, body.message),
        LinkError::Malformed(reason) => format!("{step}: {reason}"),
    };
    MigrationError::Connection {
        server: server_id.to_string(),
        message,
    }
}

#[async_trait]
impl ToolInvoker for ClientManager {
    async fn invoke(
        &self,
        server_id: &str,
        tool_name: &str,
        parameters: Parameters,
        deadline: Instant,
    ) -> Result<Value> {
        let timed_out = || MigrationError::ToolInvocationTimeout {
            server: server_id.to_string(),
            tool: tool_name.to_string(),
        };
        // Waiting for the slot and the handshake both count against the call
        let session = match tokio::time::timeout_at(deadline, self.session(server_id, deadline)).await {
            Ok(Ok(session)) => session,
            Ok(Err(e)) if Instant::now() < deadline => return Err(e),
            Ok(Err(e)) => {
                tracing::debug!(server = server_id, tool = tool_name, error = %e, "connect used up the call deadline");
                return Err(timed_out());
            }
            Err(_) => return Err(timed_out()),
        };

        let schema = session
            .tools
            .get(tool_name)
            .ok_or_else(|| MigrationError::ToolNotAvailable {
                server: server_id.to_string(),
                tool: tool_name.to_string(),
                reason: "not advertised by the server".to_string(),
            })?;
        schema
            .check(&parameters)
            .map_err(|reason| MigrationError::ToolNotAvailable {
                server: server_id.to_string(),
                tool: tool_name.to_string(),
                reason,
            })?;

        let params = serde_json::to_value(CallParams {
            tool_name: tool_name.to_string(),
            parameters,
        })
        .map_err(|e| MigrationError::Protocol {
            server: server_id.to_string(),
            message: e.to_string(),
        })?;

        tracing::debug!(server = server_id, tool = tool_name, "invoking tool");
        match session.link.request(Method::CallTool, params, deadline).await {
            Ok(result) => Ok(result),
            Err(LinkError::Timeout) => Err(timed_out()),
            Err(LinkError::Closed(reason)) => Err(MigrationError::ServerUnavailable {
                server: server_id.to_string(),
                message: reason,
            }),
            Err(LinkError::Remote(body)) => Err(MigrationError::ToolFailed {
                server: server_id.to_string(),
                tool: tool_name.to_string(),
                code: body.error_code,
                message: body.message,
            }),
            Err(LinkError::Malformed(message)) => Err(MigrationError::Protocol {
                server: server_id.to_string(),
                message,
            }),
        }
    }
}
