//! JSON-RPC request handlers, split by domain.

mod status;
mod tunnels;

use crate::server::AppState;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use burrow_core::BurrowError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error, warn};

// ============================================================================
// JSON-RPC types
// ============================================================================

/// JSON-RPC 2.0 request structure.
#[derive(Debug, Deserialize)]
#[allow(dead_code)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
    pub id: Option<Value>,
}

/// JSON-RPC 2.0 response structure.
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    pub id: Option<Value>,
}

/// JSON-RPC 2.0 error structure.
#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Method name not recognized.
const METHOD_NOT_FOUND: i32 = -32601;

impl JsonRpcResponse {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn error(id: Option<Value>, code: i32, message: String) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(JsonRpcError {
                code,
                message,
                data: None,
            }),
            id,
        }
    }
}

// ============================================================================
// Parameter extraction helpers
// ============================================================================

/// Extract a required port parameter, supporting both snake_case and camelCase.
///
/// Zero is accepted; callers that need a non-zero port check it themselves.
pub(crate) fn require_port_param(
    params: &Value,
    snake: &str,
    camel: &str,
) -> burrow_core::Result<u16> {
    let value = params
        .get(snake)
        .or_else(|| params.get(camel))
        .ok_or_else(|| BurrowError::Validation {
            field: snake.to_string(),
            message: "missing required parameter".into(),
        })?;

    value
        .as_u64()
        .and_then(|n| u16::try_from(n).ok())
        .ok_or_else(|| BurrowError::Validation {
            field: snake.to_string(),
            message: format!("expected a port number, got {}", value),
        })
}

// ============================================================================
// Endpoints
// ============================================================================

/// Health check endpoint.
pub async fn handle_health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

/// Main JSON-RPC handler.
pub async fn handle_rpc(
    State(state): State<Arc<AppState>>,
    Json(request): Json<JsonRpcRequest>,
) -> impl IntoResponse {
    let method = request.method.as_str();
    let params = request.params.unwrap_or(Value::Object(Default::default()));
    let id = request.id;

    debug!("RPC call: {}({:?})", method, params);

    if method == "health_check" {
        return (
            StatusCode::OK,
            Json(JsonRpcResponse::success(id, json!({"status": "ok"}))),
        );
    }

    let Some(result) = dispatch_method(&state, method, &params).await else {
        warn!("Unknown RPC method: {}", method);
        return (
            StatusCode::OK,
            Json(JsonRpcResponse::error(
                id,
                METHOD_NOT_FOUND,
                format!("Method not found: {}", method),
            )),
        );
    };

    match result {
        Ok(value) => (StatusCode::OK, Json(JsonRpcResponse::success(id, value))),
        Err(e) => {
            error!("RPC error for {}: {}", method, e);
            let code = e.to_rpc_error_code();
            (
                StatusCode::OK,
                Json(JsonRpcResponse::error(id, code, e.to_string())),
            )
        }
    }
}

// ============================================================================
// Method dispatcher
// ============================================================================

/// Dispatch a method call to the appropriate domain handler.
///
/// Returns `None` for unknown methods.
async fn dispatch_method(
    state: &AppState,
    method: &str,
    params: &Value,
) -> Option<burrow_core::Result<Value>> {
    let result = match method {
        // Tunnels
        "set_tunnel" => tunnels::set_tunnel(state, params).await,
        "list_tunnels" => tunnels::list_tunnels(state, params).await,
        "sync_status" => tunnels::sync_status(state, params).await,
        "register_target" => tunnels::register_target(state, params).await,
        "remove_target" => tunnels::remove_target(state, params).await,

        // Status
        "get_status" => status::get_status(state, params).await,

        _ => return None,
    };
    Some(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::router;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use burrow_core::platform::{OsSurface, ProcessEntry, SpawnRequest};
    use burrow_core::{SqliteMappingStore, Supervisor, SupervisorConfig};
    use std::sync::Mutex;
    use tempfile::TempDir;
    use tower::ServiceExt;

    /// Process table that only knows about what it spawned.
    #[derive(Default)]
    struct RecordingOs {
        processes: Mutex<Vec<ProcessEntry>>,
    }

    #[async_trait]
    impl OsSurface for RecordingOs {
        async fn find_processes(&self, binary_name: &str) -> burrow_core::Result<Vec<ProcessEntry>> {
            Ok(self
                .processes
                .lock()
                .unwrap()
                .iter()
                .filter(|p| p.is_instance_of(binary_name))
                .cloned()
                .collect())
        }

        async fn port_has_listener(&self, port: u16) -> burrow_core::Result<bool> {
            let needle = format!(":{}", port);
            Ok(self
                .processes
                .lock()
                .unwrap()
                .iter()
                .any(|p| p.args.get(2) == Some(&needle)))
        }

        async fn spawn_detached(&self, request: SpawnRequest) -> burrow_core::Result<u32> {
            let mut processes = self.processes.lock().unwrap();
            let pid = 100 + processes.len() as u32;
            let mut args = vec![request.program.to_string_lossy().into_owned()];
            args.extend(request.args);
            processes.push(ProcessEntry {
                pid,
                name: "server_linux_amd64".into(),
                args,
            });
            Ok(pid)
        }

        async fn terminate(&self, pid: u32) -> burrow_core::Result<()> {
            self.processes.lock().unwrap().retain(|p| p.pid != pid);
            Ok(())
        }
    }

    struct TestApp {
        app: axum::Router,
        _install_dir: TempDir,
    }

    fn test_app(with_binary: bool, init: bool) -> TestApp {
        let install_dir = TempDir::new().unwrap();
        if with_binary {
            std::fs::write(install_dir.path().join("server_linux_amd64"), b"").unwrap();
        }

        let store = SqliteMappingStore::open_in_memory().unwrap();
        store.register_target(8388).unwrap();

        let config = SupervisorConfig {
            install_dir: install_dir.path().to_path_buf(),
            ..Default::default()
        };
        let supervisor = Arc::new(Supervisor::new(
            Arc::new(store.clone()),
            Arc::new(RecordingOs::default()),
            config,
        ));
        if init {
            supervisor.init();
        }

        TestApp {
            app: router(AppState { supervisor, store }),
            _install_dir: install_dir,
        }
    }

    async fn call(app: &axum::Router, method: &str, params: Value) -> Value {
        let body = json!({"jsonrpc": "2.0", "method": method, "params": params, "id": 1});
        let request = Request::builder()
            .method("POST")
            .uri("/rpc")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn error_code(response: &Value) -> Option<i64> {
        response["error"]["code"].as_i64()
    }

    #[test]
    fn test_require_port_param() {
        let params = json!({"target_port": 8388, "tunnelPort": 9001, "bad": 70000});
        assert_eq!(
            require_port_param(&params, "target_port", "targetPort").unwrap(),
            8388
        );
        assert_eq!(
            require_port_param(&params, "tunnel_port", "tunnelPort").unwrap(),
            9001
        );
        assert!(require_port_param(&params, "bad", "bad").is_err());
        assert!(require_port_param(&params, "missing", "missing").is_err());
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let t = test_app(false, false);
        let request = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let response = t.app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_check_method() {
        let t = test_app(false, false);
        let response = call(&t.app, "health_check", json!({})).await;
        assert_eq!(response["result"]["status"], "ok");
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let t = test_app(false, false);
        let response = call(&t.app, "launch_rockets", json!({})).await;
        assert_eq!(error_code(&response), Some(METHOD_NOT_FOUND as i64));
    }

    #[tokio::test]
    async fn test_set_tunnel_before_init_is_not_ready() {
        let t = test_app(true, false);
        let response = call(
            &t.app,
            "set_tunnel",
            json!({"target_port": 8388, "tunnel_port": 9001}),
        )
        .await;
        assert_eq!(error_code(&response), Some(-32002));
    }

    #[tokio::test]
    async fn test_set_tunnel_unknown_target() {
        let t = test_app(true, true);
        let response = call(
            &t.app,
            "set_tunnel",
            json!({"target_port": 9999, "tunnel_port": 9001}),
        )
        .await;
        assert_eq!(error_code(&response), Some(-32001));
    }

    #[tokio::test]
    async fn test_set_tunnel_missing_param() {
        let t = test_app(true, true);
        let response = call(&t.app, "set_tunnel", json!({"target_port": 8388})).await;
        assert_eq!(error_code(&response), Some(-32005));
    }

    #[tokio::test]
    async fn test_set_tunnel_then_list() {
        let t = test_app(true, true);

        let response = call(
            &t.app,
            "set_tunnel",
            json!({"targetPort": 8388, "tunnelPort": 9001}),
        )
        .await;
        assert_eq!(response["result"]["tunnel_port"], 9001);
        assert_eq!(response["result"]["started"]["status"], "spawned");

        let response = call(&t.app, "list_tunnels", json!({})).await;
        let tunnels = response["result"]["tunnels"].as_array().unwrap();
        assert_eq!(tunnels.len(), 1);
        assert_eq!(tunnels[0]["live"], true);
    }

    #[tokio::test]
    async fn test_register_target() {
        let t = test_app(true, true);

        let response = call(&t.app, "register_target", json!({"target_port": 443})).await;
        assert_eq!(response["result"]["created"], true);

        let response = call(&t.app, "register_target", json!({"target_port": 443})).await;
        assert_eq!(response["result"]["created"], false);

        let response = call(&t.app, "register_target", json!({"target_port": 0})).await;
        assert_eq!(error_code(&response), Some(-32005));

        let response = call(&t.app, "remove_target", json!({"target_port": 443})).await;
        assert_eq!(response["result"]["removed"], true);
        assert_eq!(response["result"]["stopped"], 0);

        let response = call(&t.app, "remove_target", json!({"target_port": 443})).await;
        assert_eq!(response["result"]["removed"], false);

        let response = call(&t.app, "list_tunnels", json!({})).await;
        assert_eq!(response["result"]["tunnels"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_sync_status_reports_readiness() {
        let t = test_app(false, true);
        let response = call(&t.app, "sync_status", json!({})).await;
        assert_eq!(response["result"]["ready"], false);

        let t = test_app(true, true);
        let response = call(&t.app, "sync_status", json!({})).await;
        assert_eq!(response["result"]["ready"], true);
        assert!(response["result"]["report"].is_object());
    }

    #[tokio::test]
    async fn test_get_status() {
        let t = test_app(false, true);
        let response = call(&t.app, "get_status", json!({})).await;
        assert_eq!(response["result"]["disabled"], true);
        assert_eq!(response["result"]["ready"], false);
        assert_eq!(response["result"]["success"], true);
    }
}
