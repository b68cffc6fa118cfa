//! HTTP route definitions

use std::sync::Arc;

use axum::http::HeaderName;
use axum::{middleware, routing::get, Router};
use rmcp::transport::streamable_http_server::{
    session::local::LocalSessionManager, StreamableHttpServerConfig, StreamableHttpService,
};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::auth::{require_token, AuthConfig};
use crate::mcp::FigmaServer;

/// Router with `/health` and the stateless MCP endpoint at `/mcp`.
pub fn create_router(server: FigmaServer, auth: AuthConfig, ct: CancellationToken) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([HeaderName::from_static("mcp-session-id")]);

    let config = StreamableHttpServerConfig {
        stateful_mode: false,
        cancellation_token: ct,
        ..Default::default()
    };

    let mcp_service = StreamableHttpService::new(
        move || Ok(server.clone()),
        Arc::new(LocalSessionManager::default()),
        config,
    );

    let mcp = Router::new()
        .nest_service("/mcp", mcp_service)
        .layer(middleware::from_fn_with_state(auth, require_token));

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .merge(mcp)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Run the HTTP server until Ctrl-C
pub async fn serve(server: FigmaServer, auth: AuthConfig, port: u16) -> anyhow::Result<()> {
    let ct = CancellationToken::new();
    let auth_enabled = auth.is_enabled();
    let app = create_router(server, auth, ct.clone());

    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Figma MCP server running at http://{}/mcp", addr);
    tracing::info!("Health check available at http://{}/health", addr);
    if !auth_enabled {
        tracing::warn!("MCP_AUTH_TOKEN not set, /mcp accepts unauthenticated requests");
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Shutting down...");
            ct.cancel();
        })
        .await?;

    Ok(())
}
