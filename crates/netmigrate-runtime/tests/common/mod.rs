//! Shared fixtures: in-memory tool servers speaking the real wire protocol
//! over `tokio::io::duplex`, and a dialer that connects to them.

#![allow(dead_code)]

use async_trait::async_trait;
use netmigrate_core::config::{RetryConfig, TimeoutConfig};
use netmigrate_core::{CredentialSource, MigrationRequest, RunId, SourceSelector};
use netmigrate_runtime::checkpoint::{CheckpointStore, FileCheckpointStore, WorkflowCheckpoint};
use netmigrate_runtime::dialer::{Connection, Dialer};
use netmigrate_runtime::engine::EngineSettings;
use netmigrate_runtime::protocol::{
    CallParams, ErrorCode, Method, ParamKind, ParamSchema, ParamValue, Parameters, Request,
    Response, ToolSchema, encode_frame,
};
use netmigrate_runtime::{MigrationError, Result};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, WriteHalf};

pub const SOURCE: &str = "source-inventory";
pub const CODEGEN: &str = "codegen";
pub const DEPLOY: &str = "deploy";

// =============================================================================
// Fake tool server
// =============================================================================

/// What a fake server does with one `tools/call`
pub enum Behavior {
    /// Answer at once
    Reply(Value),
    /// Answer after a delay
    Delay(Duration, Value),
    /// Answer with a structured error
    Fail(ErrorCode, &'static str),
    /// Never answer
    Hang,
    /// Drop the connection
    Drop,
}

type Handler = Arc<dyn Fn(&str, &Parameters) -> Behavior + Send + Sync>;

#[derive(Clone)]
pub struct FakeServer {
    tools: Vec<ToolSchema>,
    handler: Handler,
}

impl FakeServer {
    pub fn new(
        tools: Vec<ToolSchema>,
        handler: impl Fn(&str, &Parameters) -> Behavior + Send + Sync + 'static,
    ) -> Self {
        Self {
            tools,
            handler: Arc::new(handler),
        }
    }
}

pub fn tool(name: &str, params: &[(&str, ParamKind, bool)]) -> ToolSchema {
    ToolSchema {
        tool_name: name.to_string(),
        parameter_schema: params
            .iter()
            .map(|(name, kind, required)| ParamSchema {
                name: name.to_string(),
                kind: *kind,
                required: *required,
            })
            .collect(),
    }
}

pub fn text(params: &Parameters, key: &str) -> String {
    match params.get(key) {
        Some(ParamValue::Text(s)) => s.clone(),
        _ => String::new(),
    }
}

#[derive(Default)]
pub struct Stats {
    dials: AtomicUsize,
    open: AtomicUsize,
    calls: Mutex<Vec<(String, String)>>,
}

/// Dialer connecting to in-memory fake servers
pub struct DuplexDialer {
    servers: HashMap<String, FakeServer>,
    max_dials: Option<usize>,
    stats: Arc<Stats>,
}

impl DuplexDialer {
    pub fn new() -> Self {
        Self {
            servers: HashMap::new(),
            max_dials: None,
            stats: Arc::new(Stats::default()),
        }
    }

    pub fn with_server(mut self, id: &str, server: FakeServer) -> Self {
        self.servers.insert(id.to_string(), server);
        self
    }

    /// Refuse every dial after the first `n`
    pub fn max_dials(mut self, n: usize) -> Self {
        self.max_dials = Some(n);
        self
    }

    pub fn stats(&self) -> Arc<Stats> {
        Arc::clone(&self.stats)
    }
}

impl Stats {
    pub fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }

    pub fn open(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    /// Number of `tools/call` requests the servers received for `tool`
    pub fn calls(&self, tool: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, t)| t == tool)
            .count()
    }

    /// Number of `tools/call` requests a server received
    pub fn server_calls(&self, server: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(s, _)| s == server)
            .count()
    }
}

#[async_trait]
impl Dialer for DuplexDialer {
    async fn dial(&self, server_id: &str) -> Result<Connection> {
        let n = self.stats.dials.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(max) = self.max_dials
            && n > max
        {
            return Err(MigrationError::Connection {
                server: server_id.to_string(),
                message: "connection refused".to_string(),
            });
        }
        let server = self
            .servers
            .get(server_id)
            .cloned()
            .ok_or_else(|| MigrationError::UnknownServer {
                server: server_id.to_string(),
            })?;

        let (client, remote) = tokio::io::duplex(64 * 1024);
        self.stats.open.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(serve(server_id.to_string(), server, remote, Arc::clone(&self.stats)));

        let (reader, writer) = tokio::io::split(client);
        Ok(Connection {
            reader: Box::new(reader),
            writer: Box::new(writer),
            child: None,
        })
    }

    fn handshake_timeout(&self, _server_id: &str) -> Duration {
        Duration::from_secs(2)
    }
}

/// Accepts connections but never answers anything, not even `initialize`
#[derive(Default)]
pub struct SilentDialer {
    remotes: Mutex<Vec<DuplexStream>>,
    dials: AtomicUsize,
}

impl SilentDialer {
    pub fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Dialer for SilentDialer {
    async fn dial(&self, _server_id: &str) -> Result<Connection> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        let (client, remote) = tokio::io::duplex(64 * 1024);
        // Keep the remote end open so the stream never reaches EOF
        self.remotes.lock().unwrap().push(remote);
        let (reader, writer) = tokio::io::split(client);
        Ok(Connection {
            reader: Box::new(reader),
            writer: Box::new(writer),
            child: None,
        })
    }
}

type SharedWriter = Arc<tokio::sync::Mutex<WriteHalf<DuplexStream>>>;

async fn send(writer: &SharedWriter, response: &Response) {
    let frame = encode_frame(response).unwrap();
    let _ = writer.lock().await.write_all(&frame).await;
}

async fn serve(server_id: String, server: FakeServer, stream: DuplexStream, stats: Arc<Stats>) {
    let (read, write) = tokio::io::split(stream);
    let write: SharedWriter = Arc::new(tokio::sync::Mutex::new(write));
    let mut lines = BufReader::new(read).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let Ok(request) = serde_json::from_str::<Request>(&line) else {
            continue;
        };
        let id = request.id;
        let response = match request.method {
            Method::Initialize => Response::success(id, json!({"server_name": server_id})),
            Method::ListTools => Response::success(id, json!({"tools": server.tools})),
            Method::CallTool => {
                let call: CallParams = serde_json::from_value(request.params).unwrap();
                stats
                    .calls
                    .lock()
                    .unwrap()
                    .push((server_id.clone(), call.tool_name.clone()));
                match (server.handler)(&call.tool_name, &call.parameters) {
                    Behavior::Reply(value) => Response::success(id, value),
                    Behavior::Fail(code, message) => Response::failure(id, code, message),
                    Behavior::Delay(delay, value) => {
                        let writer = Arc::clone(&write);
                        tokio::spawn(async move {
                            tokio::time::sleep(delay).await;
                            send(&writer, &Response::success(id, value)).await;
                        });
                        continue;
                    }
                    Behavior::Hang => continue,
                    Behavior::Drop => break,
                }
            }
        };
        send(&write, &response).await;
    }

    stats.open.fetch_sub(1, Ordering::SeqCst);
}

// =============================================================================
// Standard migration servers
// =============================================================================

pub fn source_tools() -> Vec<ToolSchema> {
    let params = [
        ("RegionId", ParamKind::String, true),
        ("VpcId", ParamKind::String, false),
    ];
    vec![
        tool("VPC_DescribeVpcs", &params),
        tool("VPC_DescribeVSwitches", &params),
        tool("ECS_DescribeSecurityGroups", &params),
    ]
}

/// Provider-shaped answers describing a two-zone network
pub fn source_reply(tool: &str, params: &Parameters) -> Behavior {
    let region = text(params, "RegionId");
    match tool {
        "VPC_DescribeVpcs" => {
            let vpc_id = match text(params, "VpcId") {
                id if id.is_empty() => "vpc-demo".to_string(),
                id => id,
            };
            Behavior::Reply(json!({"body": {"Vpcs": {"Vpc": [
                {"VpcId": vpc_id, "VpcName": "demo-vpc", "CidrBlock": "10.0.0.0/16"}
            ]}}}))
        }
        "VPC_DescribeVSwitches" => Behavior::Reply(json!({"body": {"VSwitches": {"VSwitch": [
            {"VSwitchId": "vsw-a", "VSwitchName": "web-a", "CidrBlock": "10.0.1.0/24", "ZoneId": format!("{region}-a")},
            {"VSwitchId": "vsw-b", "VSwitchName": "web-b", "CidrBlock": "10.0.2.0/24", "ZoneId": format!("{region}-b")}
        ]}}})),
        "ECS_DescribeSecurityGroups" => Behavior::Reply(json!({"body": {"SecurityGroups": {"SecurityGroup": [{
            "SecurityGroupId": "sg-1",
            "SecurityGroupName": "web",
            "Permissions": {"Permission": [
                {"IpProtocol": "TCP", "PortRange": "80/80", "SourceCidrIp": "0.0.0.0/0", "Direction": "ingress"}
            ]}
        }]}}})),
        _ => Behavior::Fail(ErrorCode::NotFound, "unknown tool"),
    }
}

pub fn source_server() -> FakeServer {
    FakeServer::new(source_tools(), source_reply)
}

pub fn codegen_tools() -> Vec<ToolSchema> {
    vec![tool(
        "generate_vpc_stack",
        &[
            ("spec", ParamKind::String, true),
            ("brief", ParamKind::String, true),
            ("project_name", ParamKind::String, true),
            ("target_dir", ParamKind::String, true),
            ("stack_name", ParamKind::String, true),
        ],
    )]
}

pub fn codegen_reply(_tool: &str, params: &Parameters) -> Behavior {
    Behavior::Reply(json!({
        "location": format!("{}/{}", text(params, "target_dir"), text(params, "project_name")),
    }))
}

pub fn codegen_server() -> FakeServer {
    FakeServer::new(codegen_tools(), codegen_reply)
}

pub fn deploy_tools() -> Vec<ToolSchema> {
    vec![tool(
        "deploy_stack",
        &[
            ("location", ParamKind::String, true),
            ("stack_name", ParamKind::String, true),
        ],
    )]
}

pub fn deploy_reply(_tool: &str, params: &Parameters) -> Behavior {
    Behavior::Reply(json!({"status": "deployed", "stack": text(params, "stack_name")}))
}

pub fn deploy_server() -> FakeServer {
    FakeServer::new(deploy_tools(), deploy_reply)
}

pub fn standard_dialer() -> DuplexDialer {
    DuplexDialer::new()
        .with_server(SOURCE, source_server())
        .with_server(CODEGEN, codegen_server())
        .with_server(DEPLOY, deploy_server())
}

// =============================================================================
// Requests, settings, stores
// =============================================================================

pub fn request(run_id: &str, network_id: Option<&str>) -> MigrationRequest {
    MigrationRequest {
        run_id: RunId::new(run_id).unwrap(),
        source: SourceSelector {
            network_id: network_id.map(str::to_string),
            region: "cn-hangzhou".to_string(),
        },
        target_project_name: "demo-migration".to_string(),
        target_directory: "./output".to_string(),
        credentials: CredentialSource::Environment,
    }
}

/// Default policy with millisecond backoff and short call deadlines
pub fn fast_settings() -> EngineSettings {
    EngineSettings {
        retry: RetryConfig {
            max_attempts: 3,
            base_delay_ms: 1,
            max_delay_ms: 5,
        },
        timeouts: TimeoutConfig {
            call_ms: 2_000,
            checkpoint_ms: 5_000,
        },
        ..EngineSettings::default()
    }
}

/// File store that stops working after a fixed number of saves, simulating a
/// crash right after the last successful checkpoint.
pub struct CrashingStore {
    inner: FileCheckpointStore,
    saves_allowed: usize,
    saves: AtomicUsize,
}

impl CrashingStore {
    pub fn new(inner: FileCheckpointStore, saves_allowed: usize) -> Self {
        Self {
            inner,
            saves_allowed,
            saves: AtomicUsize::new(0),
        }
    }

    fn crashed(&self) -> bool {
        self.saves.load(Ordering::SeqCst) >= self.saves_allowed
    }

    fn crash() -> MigrationError {
        MigrationError::Checkpoint {
            message: "injected crash".to_string(),
        }
    }
}

impl CheckpointStore for CrashingStore {
    fn save(&self, checkpoint: &WorkflowCheckpoint) -> Result<()> {
        if self.crashed() {
            return Err(Self::crash());
        }
        self.inner.save(checkpoint)?;
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn load(&self, run_id: &RunId) -> Result<Option<WorkflowCheckpoint>> {
        self.inner.load(run_id)
    }

    fn clear(&self, run_id: &RunId) -> Result<()> {
        if self.crashed() {
            return Err(Self::crash());
        }
        self.inner.clear(run_id)
    }

    fn archive(&self, run_id: &RunId) -> Result<()> {
        if self.crashed() {
            return Err(Self::crash());
        }
        self.inner.archive(run_id)
    }

    fn list(&self) -> Result<Vec<RunId>> {
        self.inner.list()
    }
}
