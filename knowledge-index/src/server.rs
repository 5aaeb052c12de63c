//! Loopback HTTP endpoint exposing the reference service as MCP tools.
//!
//! Speaks the JSON-RPC subset the model provider's MCP connector uses:
//! `initialize`, `tools/list`, `tools/call` and `ping`. Notifications are
//! acknowledged with `202 Accepted`.

use crate::service::ReferenceService;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const PROTOCOL_VERSION: &str = "2025-03-26";
pub const SEARCH_TOOL: &str = "search_docs";
pub const READ_TOOL: &str = "read_doc";

#[derive(Debug, Clone, Deserialize)]
pub struct RpcRequest {
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct RpcResponse {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl RpcResponse {
    fn ok(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    fn err(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
            }),
        }
    }
}

#[derive(Clone)]
pub struct ServerState {
    service: Arc<Mutex<ReferenceService>>,
    server_name: String,
}

impl ServerState {
    pub fn new(service: ReferenceService, server_name: impl Into<String>) -> Self {
        Self {
            service: Arc::new(Mutex::new(service)),
            server_name: server_name.into(),
        }
    }
}

pub fn router(state: ServerState, path: &str) -> Router {
    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };
    Router::new()
        .route(&path, post(handle_rpc))
        .with_state(state)
}

/// Serves until `shutdown` is cancelled.
pub async fn serve(
    state: ServerState,
    addr: SocketAddr,
    path: &str,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Reference server listening on http://{}{}", addr, path);
    axum::serve(listener, router(state, path))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
}

async fn handle_rpc(State(state): State<ServerState>, Json(request): Json<RpcRequest>) -> Response {
    match dispatch(&state, request).await {
        Some(response) => Json(response).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

/// Handles one JSON-RPC message. Notifications (no id) produce no response.
pub async fn dispatch(state: &ServerState, request: RpcRequest) -> Option<RpcResponse> {
    let id = request.id?;
    debug!("Reference server request: {}", request.method);

    let response = match request.method.as_str() {
        "initialize" => {
            let version = request
                .params
                .get("protocolVersion")
                .and_then(Value::as_str)
                .unwrap_or(PROTOCOL_VERSION);
            RpcResponse::ok(
                id,
                json!({
                    "protocolVersion": version,
                    "capabilities": { "tools": {} },
                    "serverInfo": { "name": state.server_name, "version": env!("CARGO_PKG_VERSION") },
                }),
            )
        }
        "ping" => RpcResponse::ok(id, json!({})),
        "tools/list" => RpcResponse::ok(id, json!({ "tools": tool_definitions() })),
        "tools/call" => match call_tool(state, &request.params).await {
            Ok(text) => RpcResponse::ok(
                id,
                json!({ "content": [{ "type": "text", "text": text }], "isError": false }),
            ),
            Err(message) => RpcResponse::ok(
                id,
                json!({ "content": [{ "type": "text", "text": message }], "isError": true }),
            ),
        },
        other => RpcResponse::err(id, -32601, format!("Method not found: {other}")),
    };
    Some(response)
}

async fn call_tool(state: &ServerState, params: &Value) -> Result<String, String> {
    let name = params.get("name").and_then(Value::as_str).unwrap_or_default();
    let args = params.get("arguments").cloned().unwrap_or_else(|| json!({}));
    let int_arg = |key: &str, default: usize| {
        args.get(key)
            .and_then(Value::as_u64)
            .map(|v| v as usize)
            .unwrap_or(default)
    };

    match name {
        SEARCH_TOOL => {
            let query = args.get("query").and_then(Value::as_str).unwrap_or_default();
            let mut service = state.service.lock().await;
            Ok(service.search(query, int_arg("top_k", 5), int_arg("max_chars", 12_000)))
        }
        READ_TOOL => {
            let file_name = args
                .get("file_name")
                .and_then(Value::as_str)
                .unwrap_or_default();
            let service = state.service.lock().await;
            service
                .read(file_name, int_arg("start_line", 1), int_arg("max_lines", 250))
                .map_err(|e| e.to_string())
        }
        other => Err(format!("Unknown tool: {other}")),
    }
}

fn tool_definitions() -> Value {
    json!([
        {
            "name": SEARCH_TOOL,
            "description": "Search references from the local knowledge folder.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "query": { "type": "string" },
                    "top_k": { "type": "integer", "minimum": 1, "maximum": 20 },
                    "max_chars": { "type": "integer", "minimum": 500, "maximum": 30000 }
                },
                "required": ["query"]
            }
        },
        {
            "name": READ_TOOL,
            "description": "Read a specific .md or .js file from the local knowledge folder.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "file_name": { "type": "string" },
                    "start_line": { "type": "integer", "minimum": 1 },
                    "max_lines": { "type": "integer", "minimum": 1, "maximum": 1000 }
                },
                "required": ["file_name"]
            }
        }
    ])
}
