//! MCP client (C13): connects to an external MCP server (stdio subprocess
//! or SSE), performs the initialization handshake, discovers tools, and
//! multiplexes concurrent `tools/call` requests by request id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::error::McpError;
use crate::protocol::{JsonRpcResponse, McpTool, RequestId, MCP_PROTOCOL_VERSION};
use crate::transport::{ProcessTransport, SseTransport, Transport};

const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Information about the connected MCP server.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
    pub protocol_version: String,
}

enum WriterJob {
    Message(String),
}

/// MCP client owning a background task that reads the transport and
/// dispatches responses by correlation id, so multiple `call_tool`
/// invocations can be in flight concurrently over a single connection.
pub struct McpClient {
    next_id: AtomicI64,
    outgoing: mpsc::Sender<WriterJob>,
    pending: Arc<Mutex<HashMap<RequestId, oneshot::Sender<JsonRpcResponse>>>>,
    server_info: Mutex<Option<ServerInfo>>,
    available_tools: Mutex<Vec<McpTool>>,
    reader_task: tokio::task::JoinHandle<()>,
    child: Mutex<Option<tokio::process::Child>>,
}

impl McpClient {
    /// Connect to a server reachable over SSE (used for the local Hub,
    /// which is reached over HTTP at `MCP_HUB_URL`).
    pub async fn connect_sse(url: &str) -> Result<Self, McpError> {
        let transport = SseTransport::connect(url).await?;
        let mut client = Self::from_transport(Box::new(transport));
        client.initialize().await?;
        Ok(client)
    }

    /// Spawn `command` and connect over its stdio pipes (used by the Hub's
    /// external-server registry for `stdio`-configured MCP servers). The
    /// spawned child is owned by the client and killed on [`Self::close`].
    pub async fn connect_stdio(
        command: &str,
        args: &[String],
        env: &std::collections::HashMap<String, String>,
    ) -> Result<Self, McpError> {
        let (transport, child) = ProcessTransport::spawn(command, args, env).await?;
        let mut client = Self::from_transport(Box::new(transport));
        client.child = Mutex::new(Some(child));
        client.initialize().await?;
        Ok(client)
    }

    fn from_transport(mut transport: Box<dyn Transport>) -> Self {
        let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<WriterJob>(64);
        let pending: Arc<Mutex<HashMap<RequestId, oneshot::Sender<JsonRpcResponse>>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let pending_for_task = pending.clone();

        let reader_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    job = outgoing_rx.recv() => {
                        match job {
                            Some(WriterJob::Message(msg)) => {
                                if let Err(err) = transport.write_message(&msg).await {
                                    warn!("mcp client write failed: {err}");
                                    break;
                                }
                            }
                            None => break,
                        }
                    }
                    read = transport.read_message() => {
                        match read {
                            Ok(Some(raw)) => {
                                debug!(raw = %raw, "mcp client received message");
                                if let Ok(response) = serde_json::from_str::<JsonRpcResponse>(&raw) {
                                    if let Some(sender) = pending_for_task.lock().unwrap().remove(&response.id) {
                                        let _ = sender.send(response);
                                    }
                                }
                            }
                            Ok(None) => break,
                            Err(err) => {
                                warn!("mcp client read failed: {err}");
                                break;
                            }
                        }
                    }
                }
            }
            for (_, sender) in pending_for_task.lock().unwrap().drain() {
                drop(sender);
            }
        });

        Self {
            next_id: AtomicI64::new(1),
            outgoing: outgoing_tx,
            pending,
            server_info: Mutex::new(None),
            available_tools: Mutex::new(Vec::new()),
            reader_task,
            child: Mutex::new(None),
        }
    }

    fn next_id(&self) -> RequestId {
        RequestId::Number(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn server_info(&self) -> Option<ServerInfo> {
        self.server_info.lock().unwrap().clone()
    }

    pub fn available_tools(&self) -> Vec<McpTool> {
        self.available_tools.lock().unwrap().clone()
    }

    async fn send_request(
        &self,
        id: RequestId,
        method: &str,
        params: serde_json::Value,
        timeout: Duration,
    ) -> Result<JsonRpcResponse, McpError> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(id.clone(), tx);

        let request = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });
        self.outgoing
            .send(WriterJob::Message(serde_json::to_string(&request).unwrap()))
            .await
            .map_err(|_| McpError::TransportError {
                message: "mcp client writer task gone".into(),
            })?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(McpError::Canceled),
            Err(_) => {
                self.pending.lock().unwrap().remove(&id);
                Err(McpError::Timeout {
                    timeout_secs: timeout.as_secs(),
                })
            }
        }
    }

    async fn initialize(&mut self) -> Result<ServerInfo, McpError> {
        let id = self.next_id();
        let response = self
            .send_request(
                id,
                "initialize",
                json!({
                    "protocolVersion": MCP_PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": { "name": "noteforge", "version": env!("CARGO_PKG_VERSION") }
                }),
                DEFAULT_CALL_TIMEOUT,
            )
            .await?;

        let result = response.result.ok_or_else(|| McpError::InternalError {
            message: "initialize response has no result".into(),
        })?;

        let server_info = ServerInfo {
            name: result["serverInfo"]["name"].as_str().unwrap_or("unknown").into(),
            version: result["serverInfo"]["version"].as_str().unwrap_or("0.0.0").into(),
            protocol_version: result["protocolVersion"].as_str().unwrap_or(MCP_PROTOCOL_VERSION).into(),
        };

        info!(server = %server_info.name, version = %server_info.version, "mcp client initialized");

        self.outgoing
            .send(WriterJob::Message(
                serde_json::to_string(&json!({
                    "jsonrpc": "2.0",
                    "method": "notifications/initialized"
                }))
                .unwrap(),
            ))
            .await
            .ok();

        *self.server_info.lock().unwrap() = Some(server_info.clone());
        Ok(server_info)
    }

    pub async fn list_tools(&self) -> Result<Vec<McpTool>, McpError> {
        let id = self.next_id();
        let response = self
            .send_request(id, "tools/list", json!({}), DEFAULT_CALL_TIMEOUT)
            .await?;
        let result = response.result.ok_or_else(|| McpError::InternalError {
            message: "tools/list response has no result".into(),
        })?;
        let tools: Vec<McpTool> = serde_json::from_value(result["tools"].clone()).map_err(|e| {
            McpError::InternalError {
                message: format!("malformed tools/list result: {e}"),
            }
        })?;
        *self.available_tools.lock().unwrap() = tools.clone();
        Ok(tools)
    }

    /// Call a tool, with an optional override of the default 10s timeout
    /// (used for long-running calls like `reindex_vector`).
    pub async fn call_tool(
        &self,
        tool_name: &str,
        arguments: serde_json::Value,
        timeout: Option<Duration>,
    ) -> Result<serde_json::Value, McpError> {
        let id = self.next_id();
        let response = self
            .send_request(
                id,
                "tools/call",
                json!({ "name": tool_name, "arguments": arguments }),
                timeout.unwrap_or(DEFAULT_CALL_TIMEOUT),
            )
            .await?;

        if let Some(error) = response.error {
            return Err(McpError::ToolError {
                message: format!("tool '{tool_name}' failed: {} (code {})", error.message, error.code),
            });
        }

        response.result.ok_or_else(|| McpError::InternalError {
            message: format!("tool '{tool_name}' returned no result"),
        })
    }

    /// Abort pending calls with [`McpError::Canceled`] and tear down the
    /// reader/writer task and any owned subprocess.
    pub async fn close(&self) {
        for (_, sender) in self.pending.lock().unwrap().drain() {
            drop(sender);
        }
        self.reader_task.abort();
        if let Some(mut child) = self.child.lock().unwrap().take() {
            let _ = child.start_kill();
        }
    }
}
