//! Bearer-token guard for the MCP endpoint

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Token expected on `/mcp`; `None` disables the check.
#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    token: Option<Arc<str>>,
}

impl AuthConfig {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: token.filter(|t| !t.is_empty()).map(Arc::from),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.token.is_some()
    }
}

fn json_rpc_error(status: StatusCode, code: i64, message: &str) -> Response {
    let body = json!({
        "jsonrpc": "2.0",
        "error": { "code": code, "message": message },
        "id": null,
    });
    (status, Json(body)).into_response()
}

/// Accepts `Authorization: Bearer <token>` or the raw token.
pub async fn require_token(State(auth): State<AuthConfig>, request: Request, next: Next) -> Response {
    let Some(expected) = auth.token.as_deref() else {
        return next.run(request).await;
    };

    let Some(value) = request.headers().get(header::AUTHORIZATION) else {
        tracing::debug!("rejecting MCP request without Authorization header");
        return json_rpc_error(
            StatusCode::UNAUTHORIZED,
            -32001,
            "Authentication required. Please provide Authorization header.",
        );
    };

    let presented = value.to_str().ok().map(|v| v.strip_prefix("Bearer ").unwrap_or(v));
    if presented != Some(expected) {
        tracing::warn!("rejecting MCP request with invalid token");
        return json_rpc_error(StatusCode::FORBIDDEN, -32002, "Invalid authentication token.");
    }

    next.run(request).await
}
