//! Axum HTTP/SSE gateway (C15), adapted from the teacher's WebSocket
//! gateway: `GET /sse` streams JSON-RPC responses, `POST /sse` accepts a
//! JSON-RPC request body and processes it against the [`ToolRegistry`].

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::sse::{Event, Sse};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use futures::stream::Stream;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt as _;
use tracing::warn;

use crate::hub::registry::ToolRegistry;
use crate::protocol::{
    CallToolParams, IncomingMessage, JsonRpcResponse, RequestId, MCP_PROTOCOL_VERSION,
};
use crate::McpError;

/// Shared state for the Hub's axum handlers.
pub struct AppState {
    pub registry: Arc<ToolRegistry>,
    pub server_name: String,
    pub server_version: String,
    sse_tx: broadcast::Sender<String>,
}

impl AppState {
    pub fn new(registry: Arc<ToolRegistry>, server_name: impl Into<String>, server_version: impl Into<String>) -> Self {
        let (sse_tx, _) = broadcast::channel(256);
        Self {
            registry,
            server_name: server_name.into(),
            server_version: server_version.into(),
            sse_tx,
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/sse", get(sse_handler).post(rpc_handler))
        .route("/health", get(health_handler))
        .route("/config/client/{client_type}", get(client_config_handler))
        .with_state(state)
}

async fn sse_handler(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.sse_tx.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|msg| match msg {
        Ok(payload) => Some(Ok(Event::default().data(payload))),
        Err(_) => None,
    });
    Sse::new(stream)
}

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "healthy" }))
}

async fn client_config_handler(
    Path(client_type): Path<String>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let body = match client_type.as_str() {
        "standard" => {
            let mut servers = serde_json::Map::new();
            servers.insert(
                state.server_name.clone(),
                serde_json::json!({ "url": "http://127.0.0.1:8765/sse", "timeoutMs": 10_000 }),
            );
            serde_json::json!({ "mcpServers": servers })
        }
        "lmstudio" => {
            let mut servers = serde_json::Map::new();
            servers.insert(
                state.server_name.clone(),
                serde_json::json!({ "url": "http://127.0.0.1:8765/sse" }),
            );
            serde_json::json!({ "mcp": { "servers": servers } })
        }
        other => {
            return (
                axum::http::StatusCode::NOT_FOUND,
                Json(serde_json::json!({ "error": format!("unknown client type '{other}'") })),
            );
        }
    };
    (axum::http::StatusCode::OK, Json(body))
}

async fn rpc_handler(State(state): State<Arc<AppState>>, body: axum::body::Bytes) -> impl IntoResponse {
    let raw = String::from_utf8_lossy(&body).to_string();
    let incoming: IncomingMessage = match serde_json::from_str(&raw) {
        Ok(msg) => msg,
        Err(e) => {
            warn!("hub received malformed json-rpc: {e}");
            return axum::http::StatusCode::BAD_REQUEST;
        }
    };

    let Some(id) = incoming.id.clone() else {
        // Notifications (e.g. "notifications/initialized") get no response.
        return axum::http::StatusCode::ACCEPTED;
    };

    let response = dispatch(&state, id, &incoming.method, incoming.params).await;
    if let Ok(payload) = serde_json::to_string(&response) {
        let _ = state.sse_tx.send(payload);
    }
    axum::http::StatusCode::ACCEPTED
}

async fn dispatch(
    state: &AppState,
    id: RequestId,
    method: &str,
    params: serde_json::Value,
) -> JsonRpcResponse {
    match method {
        "initialize" => JsonRpcResponse::success(
            id,
            serde_json::json!({
                "protocolVersion": MCP_PROTOCOL_VERSION,
                "capabilities": { "tools": { "listChanged": false } },
                "serverInfo": { "name": state.server_name, "version": state.server_version }
            }),
        ),
        "tools/list" => JsonRpcResponse::success(
            id,
            serde_json::json!({ "tools": state.registry.list_tools() }),
        ),
        "tools/call" => {
            let params: CallToolParams = match serde_json::from_value(params) {
                Ok(p) => p,
                Err(e) => {
                    return JsonRpcResponse::from_mcp_error(
                        id,
                        McpError::InvalidParams {
                            message: e.to_string(),
                        },
                    )
                }
            };
            match state
                .registry
                .call(&params.name, params.arguments.unwrap_or(serde_json::Value::Null))
                .await
            {
                Ok(result) => JsonRpcResponse::success(id, serde_json::to_value(result).unwrap()),
                Err(err) => JsonRpcResponse::from_mcp_error(id, err),
            }
        }
        other => JsonRpcResponse::from_mcp_error(
            id,
            McpError::MethodNotFound {
                method: other.to_string(),
            },
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::registry::Tool;
    use crate::protocol::CallToolResult;
    use async_trait::async_trait;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "echoes input"
        }
        fn input_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }
        async fn call(&self, arguments: serde_json::Value) -> Result<CallToolResult, McpError> {
            Ok(CallToolResult::text(arguments["text"].as_str().unwrap_or("").to_string()))
        }
    }

    fn test_state() -> Arc<AppState> {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        Arc::new(AppState::new(Arc::new(registry), "noteforge-hub", "0.1.0"))
    }

    #[tokio::test]
    async fn health_reports_healthy() {
        let state = test_state();
        let resp = health_handler().await.into_response();
        assert_eq!(resp.status(), 200);
        let _ = state;
    }

    #[tokio::test]
    async fn dispatch_tools_list_returns_registered_tools() {
        let state = test_state();
        let response = dispatch(&state, RequestId::Number(1), "tools/list", serde_json::Value::Null).await;
        let tools = response.result.unwrap();
        assert_eq!(tools["tools"][0]["name"], "echo");
    }

    #[tokio::test]
    async fn dispatch_tools_call_routes_to_tool() {
        let state = test_state();
        let response = dispatch(
            &state,
            RequestId::Number(2),
            "tools/call",
            serde_json::json!({ "name": "echo", "arguments": { "text": "hi" } }),
        )
        .await;
        let result = response.result.unwrap();
        assert_eq!(result["content"][0]["text"], "hi");
    }

    #[tokio::test]
    async fn dispatch_unknown_method_is_method_not_found() {
        let state = test_state();
        let response = dispatch(&state, RequestId::Number(3), "bogus", serde_json::Value::Null).await;
        assert!(response.error.is_some());
    }
}
