//! HTTP request handlers

use std::sync::Arc;

use axum::{
    extract::{ws::WebSocketUpgrade, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::server::session;
use crate::server::state::ServerState;
use crate::spec::parse_intent;
use crate::spec::template::RenderContext;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub connected_hosts: usize,
}

/// Health check handler
pub async fn health_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "flotilla".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        connected_hosts: state.registry.connected().await.len(),
    })
}

/// Error response for rejected task submissions
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Deploy task handler. Accepts an intent document, runs it to completion
/// and returns the aggregated outcome.
pub async fn deploy_handler(
    State(state): State<Arc<ServerState>>,
    Json(doc): Json<Value>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorResponse>)> {
    let intent = parse_intent(&doc).map_err(|e| {
        (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ErrorResponse {
                error: e.to_string(),
            }),
        )
    })?;

    let task_id = Uuid::new_v4().to_string();
    let mut ctx = render_context(&doc, &intent.app.name);
    ctx.insert("task_id", task_id.clone());
    if let Some(repo) = &intent.app.repo {
        ctx.insert("app_repo", repo.clone());
    }

    info!("Accepted deploy task {} for {}", task_id, intent.app.name);
    let outcome = state.coordinator.run(&task_id, &intent, &ctx).await;
    Ok(Json(outcome))
}

/// Build the template render context: caller-supplied `context` variables
/// plus the app name.
fn render_context(doc: &Value, app_name: &str) -> RenderContext {
    let mut ctx = RenderContext::new().with("app_name", app_name);
    if let Some(vars) = doc.get("context").and_then(Value::as_object) {
        for (key, value) in vars {
            match value {
                Value::String(s) => ctx.insert(key, s.clone()),
                other => ctx.insert(key, other.to_string()),
            }
        }
    }
    ctx
}

/// Control channel handler: upgrades the connection and hands it to the
/// session loop with whatever token the peer presented.
pub async fn channel_handler(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let token = agent_token(&headers);
    ws.on_upgrade(move |socket| session::run(state, socket, token))
}

fn agent_token(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
        if let Some(token) = value.strip_prefix("Bearer ") {
            return Some(token.to_string());
        }
    }
    headers
        .get("x-agent-token")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_render_context_includes_app_name_and_vars() {
        let doc = json!({
            "context": {"tag": "2.0", "replicas": 3},
        });
        let ctx = render_context(&doc, "billing");
        assert_eq!(ctx.get("app_name"), Some("billing"));
        assert_eq!(ctx.get("tag"), Some("2.0"));
        assert_eq!(ctx.get("replicas"), Some("3"));
    }

    #[test]
    fn test_agent_token_sources() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer abc".parse().unwrap());
        assert_eq!(agent_token(&headers).as_deref(), Some("abc"));

        let mut headers = HeaderMap::new();
        headers.insert("x-agent-token", "xyz".parse().unwrap());
        assert_eq!(agent_token(&headers).as_deref(), Some("xyz"));

        assert_eq!(agent_token(&HeaderMap::new()), None);
    }
}
