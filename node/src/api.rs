//! # HTTP + WebSocket API
//!
//! The axum router in front of a [`Node`]. The protocol crate's RPC
//! dispatcher does the work; this module only speaks JSON-RPC 2.0 around
//! it and streams observer events.
//!
//! ## Endpoints
//!
//! | Method | Path       | Description                              |
//! |--------|------------|------------------------------------------|
//! | GET    | `/health`  | Liveness probe                           |
//! | GET    | `/status`  | `cerera.getInfo` without the envelope    |
//! | POST   | `/rpc`     | JSON-RPC 2.0 gateway                     |
//! | GET    | `/ws`      | Live [`NodeEvent`] stream as JSON text   |
//! | GET    | `/metrics` | Prometheus text exposition               |
//!
//! ## Error codes
//!
//! | Code     | When                                        |
//! |----------|---------------------------------------------|
//! | `-32700` | Body is not JSON                            |
//! | `-32600` | Not a JSON-RPC 2.0 request object           |
//! | `-32601` | Method not supported                        |
//! | `-32000` | Method ran and failed; message says why     |

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use cerera_protocol::events::NodeEvent;
use cerera_protocol::network::rpc::positional;
use cerera_protocol::network::RpcResult;
use cerera_protocol::Node;

use crate::metrics::{metrics_handler, NodeMetrics};

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared state for every handler. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub node: Arc<Node>,
    pub metrics: NodeMetrics,
}

/// Builds the router with CORS and request tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/rpc", post(rpc_handler))
        .route("/ws", get(ws_handler))
        .route("/metrics", get(metrics_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// JSON-RPC Types
// ---------------------------------------------------------------------------

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const SERVER_ERROR: i64 = -32000;

/// A JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub id: Value,
}

/// A JSON-RPC 2.0 response. Exactly one of `result` or `error` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<RpcResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    pub id: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
}

impl JsonRpcResponse {
    fn ok(id: Value, result: RpcResult) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            result: Some(result),
            error: None,
            id,
        }
    }

    fn err(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
            }),
            id,
        }
    }

    /// Maps a dispatcher result onto the envelope.
    fn from_result(id: Value, result: RpcResult) -> Self {
        match result {
            RpcResult::MethodNotSupported { method } => {
                Self::err(id, METHOD_NOT_FOUND, format!("method not supported: {method}"))
            }
            RpcResult::Error { message } => Self::err(id, SERVER_ERROR, message),
            other => Self::ok(id, other),
        }
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /health`.
async fn health_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "ok",
            "timestamp": chrono::Utc::now().to_rfc3339(),
        })),
    )
}

/// `GET /status`.
async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    match state.node.rpc().execute("cerera.getInfo", &[]) {
        RpcResult::Info(info) => (StatusCode::OK, Json(serde_json::to_value(info).unwrap_or(Value::Null))),
        other => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::to_value(other).unwrap_or(Value::Null)),
        ),
    }
}

/// `POST /rpc`.
///
/// Always answers 200 with a JSON-RPC body, including for malformed input.
async fn rpc_handler(State(state): State<AppState>, body: Bytes) -> Json<JsonRpcResponse> {
    let raw: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            return Json(JsonRpcResponse::err(
                Value::Null,
                PARSE_ERROR,
                format!("parse error: {e}"),
            ))
        }
    };
    let id = raw.get("id").cloned().unwrap_or(Value::Null);
    let req: JsonRpcRequest = match serde_json::from_value(raw) {
        Ok(r) => r,
        Err(e) => {
            return Json(JsonRpcResponse::err(
                id,
                INVALID_REQUEST,
                format!("invalid request: {e}"),
            ))
        }
    };
    if req.jsonrpc != "2.0" {
        return Json(JsonRpcResponse::err(
            req.id,
            INVALID_REQUEST,
            "invalid request: jsonrpc must be \"2.0\"",
        ));
    }

    let params = positional(req.params);
    let node = Arc::clone(&state.node);
    let method = req.method.clone();
    // Vault writes hit the disk; keep them off the reactor.
    let result = match tokio::task::spawn_blocking(move || node.rpc().execute(&method, &params))
        .await
    {
        Ok(result) => result,
        Err(e) => {
            tracing::error!(method = %req.method, error = %e, "rpc task failed");
            return Json(JsonRpcResponse::err(req.id, SERVER_ERROR, "internal error"));
        }
    };

    if result.is_error() {
        tracing::debug!(method = %req.method, "rpc call failed");
    }
    Json(JsonRpcResponse::from_result(req.id, result))
}

/// `GET /ws`.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    let rx = state.node.events().subscribe();
    ws.on_upgrade(move |socket| forward_events(socket, rx))
}

/// Pushes events to one socket until either side goes away. Client
/// messages are read and ignored.
async fn forward_events(mut socket: WebSocket, mut rx: broadcast::Receiver<NodeEvent>) {
    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Ok(ev) => {
                    let payload = match serde_json::to_string(&ev) {
                        Ok(s) => s,
                        Err(e) => {
                            tracing::warn!(error = %e, "failed to serialize ws event");
                            continue;
                        }
                    };
                    if socket.send(Message::Text(payload)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "ws subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            msg = socket.recv() => match msg {
                Some(Ok(_)) => {}
                _ => break,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use cerera_protocol::config::NodeConfig;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_state(dir: &std::path::Path) -> AppState {
        let config = NodeConfig {
            listen: "127.0.0.1:0".parse().unwrap(),
            key_path: dir.join("node.pem"),
            peers_path: dir.join("swarm.ddd"),
            in_memory: true,
            ..NodeConfig::default()
        };
        let node = Arc::new(Node::new(config).unwrap());
        let metrics = NodeMetrics::new(node.registry()).unwrap();
        AppState { node, metrics }
    }

    async fn get(router: &Router, path: &str) -> (StatusCode, Vec<u8>) {
        let req = Request::builder().uri(path).body(Body::empty()).unwrap();
        let resp = router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let body = resp.into_body().collect().await.unwrap().to_bytes().to_vec();
        (status, body)
    }

    async fn post_raw(router: &Router, body: impl Into<Body>) -> Value {
        let req = Request::builder()
            .method("POST")
            .uri("/rpc")
            .header("content-type", "application/json")
            .body(body.into())
            .unwrap();
        let resp = router.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn call(router: &Router, method: &str, params: Value) -> Value {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1,
        });
        post_raw(router, serde_json::to_vec(&body).unwrap()).await
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let dir = tempfile::tempdir().unwrap();
        let router = create_router(test_state(dir.path()));
        let (status, body) = get(&router, "/health").await;
        assert_eq!(status, StatusCode::OK);
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn status_reports_chain_info() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        let address = state.node.address();
        let router = create_router(state);

        let (status, body) = get(&router, "/status").await;
        assert_eq!(status, StatusCode::OK);
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["height"], 0);
        assert_eq!(json["accounts"], 3);
        assert_eq!(json["primary"], serde_json::to_value(address).unwrap());
    }

    #[tokio::test]
    async fn rpc_returns_tagged_result() {
        let dir = tempfile::tempdir().unwrap();
        let router = create_router(test_state(dir.path()));

        let resp = call(&router, "account.getCount", Value::Null).await;
        assert_eq!(resp["jsonrpc"], "2.0");
        assert_eq!(resp["id"], 1);
        assert_eq!(resp["result"]["kind"], "count");
        assert_eq!(resp["result"]["value"], 3);
        assert!(resp.get("error").is_none());
    }

    #[tokio::test]
    async fn rpc_create_then_count() {
        let dir = tempfile::tempdir().unwrap();
        let router = create_router(test_state(dir.path()));

        let created = call(&router, "account.create", serde_json::json!(["pw"])).await;
        assert_eq!(created["result"]["kind"], "created");
        let mnemonic = created["result"]["value"]["mnemonic"].as_str().unwrap();
        assert_eq!(mnemonic.split_whitespace().count(), 24);

        let count = call(&router, "account.getCount", serde_json::json!([])).await;
        assert_eq!(count["result"]["value"], 4);
    }

    #[tokio::test]
    async fn unsupported_method_maps_to_32601() {
        let dir = tempfile::tempdir().unwrap();
        let router = create_router(test_state(dir.path()));
        let resp = call(&router, "eth_blockNumber", Value::Null).await;
        assert_eq!(resp["error"]["code"], METHOD_NOT_FOUND);
        assert!(resp.get("result").is_none());
    }

    #[tokio::test]
    async fn failed_call_maps_to_server_error() {
        let dir = tempfile::tempdir().unwrap();
        let router = create_router(test_state(dir.path()));
        let resp = call(&router, "account.getBalance", serde_json::json!(["not an address"])).await;
        assert_eq!(resp["error"]["code"], SERVER_ERROR);
    }

    #[tokio::test]
    async fn malformed_bodies_are_rejected_in_envelope() {
        let dir = tempfile::tempdir().unwrap();
        let router = create_router(test_state(dir.path()));

        let resp = post_raw(&router, "{not json").await;
        assert_eq!(resp["error"]["code"], PARSE_ERROR);
        assert_eq!(resp["id"], Value::Null);

        let resp = post_raw(&router, r#"{"jsonrpc":"1.0","method":"x","id":9}"#).await;
        assert_eq!(resp["error"]["code"], INVALID_REQUEST);
        assert_eq!(resp["id"], 9);

        let resp = post_raw(&router, r#"{"jsonrpc":"2.0","id":"a"}"#).await;
        assert_eq!(resp["error"]["code"], INVALID_REQUEST);
        assert_eq!(resp["id"], "a");
    }

    #[tokio::test]
    async fn metrics_endpoint_exposes_node_and_consensus_series() {
        let dir = tempfile::tempdir().unwrap();
        let router = create_router(test_state(dir.path()));
        let (status, body) = get(&router, "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        let text = String::from_utf8(body).unwrap();
        assert!(text.contains("vault_accounts 3"));
        assert!(text.contains("validator_set_size 1"));
        assert!(text.contains("consensus_rounds_started_total 0"));
    }
}
