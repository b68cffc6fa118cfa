//! Integration tests for the HTTP transport
//! Drives the axum router in-process with tower::ServiceExt::oneshot

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use figma_rest_mcp::config::{FigmaConfig, QueryConfig};
use figma_rest_mcp::figma::FigmaClient;
use figma_rest_mcp::http::{create_router, AuthConfig};
use figma_rest_mcp::mcp::FigmaServer;
use figma_rest_mcp::query::QueryEngine;

fn router(token: Option<&str>) -> Router {
    let config = FigmaConfig {
        access_token: "unused".to_string(),
        base_url: "http://127.0.0.1:9".to_string(),
    };
    let client = FigmaClient::new(&config).expect("Failed to create client");
    let server = FigmaServer::new(Arc::new(client), QueryEngine::new(&QueryConfig::default()));
    create_router(
        server,
        AuthConfig::new(token.map(str::to_string)),
        CancellationToken::new(),
    )
}

fn initialize_request(authorization: Option<&str>) -> Request<Body> {
    let body = json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "initialize",
        "params": {
            "protocolVersion": "2025-03-26",
            "capabilities": {},
            "clientInfo": {"name": "test", "version": "0.0.0"}
        }
    });
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri("/mcp")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::ACCEPT, "application/json, text/event-stream");
    if let Some(value) = authorization {
        builder = builder.header(header::AUTHORIZATION, value);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

mod auth_tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_header_is_401() {
        let response = router(Some("secret")).oneshot(initialize_request(None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let body = json_body(response).await;
        assert_eq!(body["error"]["code"], -32001);
        assert_eq!(
            body["error"]["message"],
            "Authentication required. Please provide Authorization header."
        );
        assert_eq!(body["id"], Value::Null);
    }

    #[tokio::test]
    async fn test_wrong_token_is_403() {
        let response = router(Some("secret"))
            .oneshot(initialize_request(Some("Bearer nope")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let body = json_body(response).await;
        assert_eq!(body["error"]["code"], -32002);
        assert_eq!(body["error"]["message"], "Invalid authentication token.");
    }

    #[tokio::test]
    async fn test_bearer_and_raw_tokens_pass() {
        for value in ["Bearer secret", "secret"] {
            let response = router(Some("secret"))
                .oneshot(initialize_request(Some(value)))
                .await
                .unwrap();
            let status = response.status();
            assert_ne!(status, StatusCode::UNAUTHORIZED, "{}", value);
            assert_ne!(status, StatusCode::FORBIDDEN, "{}", value);
        }
    }

    #[tokio::test]
    async fn test_auth_disabled_without_token() {
        let response = router(None).oneshot(initialize_request(None)).await.unwrap();
        assert_ne!(response.status(), StatusCode::UNAUTHORIZED);
        assert_ne!(response.status(), StatusCode::FORBIDDEN);
    }
}

mod route_tests {
    use super::*;

    #[tokio::test]
    async fn test_health_is_open() {
        let response = router(Some("secret"))
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"ok");
    }

    #[tokio::test]
    async fn test_cors_exposes_session_header() {
        let response = router(None)
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .header(header::ORIGIN, "https://example.com")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let headers = response.headers();
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        let exposed = headers[header::ACCESS_CONTROL_EXPOSE_HEADERS].to_str().unwrap();
        assert!(exposed.to_ascii_lowercase().contains("mcp-session-id"));
    }

    #[tokio::test]
    async fn test_preflight_skips_auth() {
        let response = router(Some("secret"))
            .oneshot(
                Request::builder()
                    .method(Method::OPTIONS)
                    .uri("/mcp")
                    .header(header::ORIGIN, "https://example.com")
                    .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
