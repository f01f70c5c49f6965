//! HTTP route handlers for the conversation tools.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::mirror::storage::status::MirrorStatus;
use crate::tools::dispatch::{ToolDefinition, ToolReply};

use super::state::AppState;

/// Create the API router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/tools", get(list_tools))
        .route("/api/tools/call", post(call_tool))
        .route("/api/status", get(status))
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "fastintercom",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Tool catalog response.
#[derive(Debug, Serialize)]
pub struct ToolsResponse {
    /// Advertised tools.
    pub tools: Vec<ToolDefinition>,
}

async fn list_tools(State(state): State<Arc<AppState>>) -> Json<ToolsResponse> {
    Json(ToolsResponse {
        tools: state.dispatcher.definitions(),
    })
}

/// Tool call request.
#[derive(Debug, Deserialize)]
pub struct ToolCallRequest {
    /// Tool name.
    pub name: String,
    /// Tool arguments.
    #[serde(default)]
    pub arguments: Value,
}

async fn call_tool(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ToolCallRequest>,
) -> Json<ToolReply> {
    Json(state.dispatcher.call(&request.name, &request.arguments).await)
}

async fn status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<MirrorStatus>, (StatusCode, String)> {
    state
        .engine()
        .status()
        .await
        .map(Json)
        .map_err(|e| (StatusCode::SERVICE_UNAVAILABLE, format!("Status error: {e}")))
}

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::mirror::core::config::MirrorConfig;

    async fn router(dir: &tempfile::TempDir) -> Router {
        let mut config = MirrorConfig::default();
        config.storage.database_path = dir.path().join("data.db");
        config.storage.pool_size = 2;
        create_router(AppState::from_config(config).await.unwrap())
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_and_tools() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(&dir).await;

        let health = app
            .clone()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(health.status(), StatusCode::OK);
        assert_eq!(json_body(health).await["service"], "fastintercom");

        let tools = app
            .oneshot(Request::get("/api/tools").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(json_body(tools).await["tools"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_call_and_status() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(&dir).await;

        let call = app
            .clone()
            .oneshot(
                Request::post("/api/tools/call")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"name":"unknown_tool"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        let reply = json_body(call).await;
        assert_eq!(reply["is_error"], true);
        assert_eq!(reply["text"], "Unknown tool: unknown_tool");

        let status = app
            .oneshot(Request::get("/api/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(status.status(), StatusCode::OK);
        assert_eq!(json_body(status).await["total_conversations"], 0);
    }
}
