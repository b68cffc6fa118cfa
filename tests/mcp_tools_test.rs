//! Integration tests for the MCP tools
//! Runs every tool against a wiremock stand-in for the Figma REST API

use std::sync::Arc;

use rmcp::handler::server::wrapper::Parameters;
use serde_json::{json, Value};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use figma_rest_mcp::config::{FigmaConfig, QueryConfig};
use figma_rest_mcp::figma::FigmaClient;
use figma_rest_mcp::mcp::server::{
    ExportImagesParams, ListFilesParams, ListProjectsParams, NodeDetailsParams, QueryFileParams,
};
use figma_rest_mcp::mcp::FigmaServer;
use figma_rest_mcp::query::QueryEngine;
use figma_rest_mcp::types::ImageFormat;

const TOKEN: &str = "test-token";

/// Figma stub plus a server wired to it
struct FigmaFixture {
    pub mock: MockServer,
    pub server: FigmaServer,
}

impl FigmaFixture {
    async fn new() -> Self {
        Self::with_timeout(2000).await
    }

    async fn with_timeout(timeout_ms: u64) -> Self {
        let mock = MockServer::start().await;
        let config = FigmaConfig {
            access_token: TOKEN.to_string(),
            base_url: mock.uri(),
        };
        let client = FigmaClient::new(&config).expect("Failed to create client");
        let engine = QueryEngine::new(&QueryConfig {
            timeout_ms,
            max_result_depth: 50,
        });
        let server = FigmaServer::new(Arc::new(client), engine);
        Self { mock, server }
    }

    /// Respond to `GET /v1{route}` when the token header is present
    async fn stub(&self, route: &str, status: u16, body: Value) {
        Mock::given(method("GET"))
            .and(path(format!("/v1{}", route)))
            .and(header("X-Figma-Token", TOKEN))
            .respond_with(ResponseTemplate::new(status).set_body_json(body))
            .mount(&self.mock)
            .await;
    }
}

fn design_file() -> Value {
    json!({
        "name": "Design System",
        "lastModified": "2024-05-01T10:00:00Z",
        "document": {
            "id": "0:0",
            "name": "Document",
            "type": "DOCUMENT",
            "children": [{
                "id": "1:1",
                "name": "Page 1",
                "type": "CANVAS",
                "children": [
                    {
                        "id": "2:1",
                        "name": "Hero",
                        "type": "FRAME",
                        "fillGeometry": [{"path": "M0 0L10 10"}],
                        "children": [
                            {"id": "3:1", "name": "Headline", "type": "TEXT", "characters": "Hello"},
                            {"id": "3:2", "name": "Draft", "type": "TEXT", "characters": "secret", "visible": false}
                        ]
                    },
                    {"id": "2:2", "name": "Button", "type": "COMPONENT", "strokeGeometry": []}
                ]
            }]
        }
    })
}

// ============================================================================
// Listing tools
// ============================================================================

mod listing_tests {
    use super::*;

    #[tokio::test]
    async fn test_list_teams() {
        let fixture = FigmaFixture::new().await;
        fixture
            .stub(
                "/me",
                200,
                json!({"id": "u1", "email": "dev@example.com", "teams": [
                    {"id": "t1", "name": "Design"},
                    {"id": "t2", "name": "Brand"}
                ]}),
            )
            .await;

        let output = fixture.server.list_teams().await;
        assert_eq!(
            output,
            "User: dev@example.com\nID: u1\n\nTeams:\nName: Design\nID: t1\n\nName: Brand\nID: t2"
        );
    }

    #[tokio::test]
    async fn test_list_teams_without_teams() {
        let fixture = FigmaFixture::new().await;
        fixture.stub("/me", 200, json!({"id": "u1"})).await;

        let output = fixture.server.list_teams().await;
        assert!(output.starts_with("User: N/A\nID: u1\n\nNo teams found."));
    }

    #[tokio::test]
    async fn test_list_teams_surfaces_status() {
        let fixture = FigmaFixture::new().await;
        fixture.stub("/me", 403, json!({"status": 403, "err": "Invalid token"})).await;

        let output = fixture.server.list_teams().await;
        assert_eq!(output, "Error accessing Figma API: Figma API error: 403 Forbidden");
    }

    #[tokio::test]
    async fn test_token_header_is_sent() {
        let fixture = FigmaFixture::new().await;
        Mock::given(method("GET"))
            .and(path("/v1/me"))
            .and(header("X-Figma-Token", TOKEN))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "u1"})))
            .expect(1)
            .mount(&fixture.mock)
            .await;

        fixture.server.list_teams().await;
        fixture.mock.verify().await;
    }

    #[tokio::test]
    async fn test_list_projects_trims_team_id() {
        let fixture = FigmaFixture::new().await;
        fixture
            .stub(
                "/teams/t1/projects",
                200,
                json!({"name": "Design", "projects": [{"id": 7, "name": "Web"}, {"id": "8", "name": "App"}]}),
            )
            .await;

        let output = fixture
            .server
            .list_projects(Parameters(ListProjectsParams {
                team_id: "  t1 ".to_string(),
            }))
            .await;
        assert_eq!(output, "Name: Web\nID: 7\n\nName: App\nID: 8");
    }

    #[tokio::test]
    async fn test_list_projects_empty() {
        let fixture = FigmaFixture::new().await;
        fixture.stub("/teams/t1/projects", 200, json!({"projects": []})).await;

        let output = fixture
            .server
            .list_projects(Parameters(ListProjectsParams {
                team_id: "t1".to_string(),
            }))
            .await;
        assert_eq!(output, "No projects found in this team.");
    }

    #[tokio::test]
    async fn test_list_files_in_project() {
        let fixture = FigmaFixture::new().await;
        fixture
            .stub(
                "/projects/p1/files",
                200,
                json!({"files": [{
                    "key": "abc",
                    "name": "Landing",
                    "last_modified": "2024-01-01T00:00:00Z",
                    "thumbnail_url": null
                }]}),
            )
            .await;

        let output = fixture
            .server
            .list_files(Parameters(ListFilesParams {
                project_id: Some("p1".to_string()),
            }))
            .await;
        assert_eq!(
            output,
            "Name: Landing\nKey: abc\nLast Modified: 2024-01-01T00:00:00Z\nThumbnail: N/A"
        );
    }

    #[tokio::test]
    async fn test_list_files_empty_project() {
        let fixture = FigmaFixture::new().await;
        fixture.stub("/projects/p1/files", 200, json!({"files": []})).await;

        let output = fixture
            .server
            .list_files(Parameters(ListFilesParams {
                project_id: Some("p1".to_string()),
            }))
            .await;
        assert_eq!(output, "No files found in this project.");
    }

    #[tokio::test]
    async fn test_list_files_without_project_explains_discovery() {
        let fixture = FigmaFixture::new().await;
        fixture
            .stub("/me", 200, json!({"id": "u1", "email": "dev@example.com", "handle": "dev"}))
            .await;

        // blank ids count as absent
        let output = fixture
            .server
            .list_files(Parameters(ListFilesParams {
                project_id: Some("   ".to_string()),
            }))
            .await;
        assert!(output.starts_with("Email: dev@example.com\nID: u1\nHandle: dev\n\n"));
        assert!(output.contains("2. Use list_projects with team_id to get project IDs\n"));
    }
}

// ============================================================================
// query_file
// ============================================================================

mod query_tests {
    use super::*;

    async fn query(fixture: &FigmaFixture, file_key: &str, query: &str) -> String {
        fixture
            .server
            .query_file(Parameters(QueryFileParams {
                file_key: file_key.to_string(),
                query: query.to_string(),
            }))
            .await
    }

    #[tokio::test]
    async fn test_expression_query() {
        let fixture = FigmaFixture::new().await;
        fixture.stub("/files/abc", 200, design_file()).await;

        let output = query(&fixture, "abc", "getAllText()").await;
        assert_eq!(
            output,
            r#"{"file_name":"Design System","file_key":"abc","result":[{"id":"3:1","name":"Headline","text":"Hello"}]}"#
        );
    }

    #[tokio::test]
    async fn test_statement_query_with_url_key() {
        let fixture = FigmaFixture::new().await;
        fixture.stub("/files/abc", 200, design_file()).await;

        let output = query(
            &fixture,
            "https://www.figma.com/design/abc/Design-System?node-id=0-1",
            "const frames = getAllFrames(); return frames.map(f => ({ name: f.name, kids: f.children.length }));",
        )
        .await;
        let payload: Value = serde_json::from_str(&output).unwrap();
        assert_eq!(payload["file_key"], "abc");
        assert_eq!(payload["result"], json!([{"name": "Hero", "kids": 2}]));
    }

    #[tokio::test]
    async fn test_geometry_is_stripped_from_results() {
        let fixture = FigmaFixture::new().await;
        fixture.stub("/files/abc", 200, design_file()).await;

        let output = query(&fixture, "abc", "findById('2:1')").await;
        let payload: Value = serde_json::from_str(&output).unwrap();
        assert_eq!(payload["result"]["fillGeometry"], "[Geometry data removed]");
        assert_eq!(payload["result"]["children"][0]["characters"], "Hello");
    }

    #[tokio::test]
    async fn test_undefined_result_is_omitted() {
        let fixture = FigmaFixture::new().await;
        fixture.stub("/files/abc", 200, design_file()).await;

        let output = query(&fixture, "abc", "const x = 1;").await;
        assert_eq!(output, r#"{"file_name":"Design System","file_key":"abc"}"#);
    }

    #[tokio::test]
    async fn test_query_deeply_nested_file() {
        let fixture = FigmaFixture::new().await;
        let mut node = json!({"id": "leaf", "name": "Caption", "type": "TEXT", "characters": "deep"});
        for i in (0..100).rev() {
            let mut frame = serde_json::Map::new();
            frame.insert("id".into(), json!(format!("f{}", i)));
            frame.insert("type".into(), json!("FRAME"));
            frame.insert("children".into(), Value::Array(vec![node]));
            node = Value::Object(frame);
        }
        fixture
            .stub("/files/deep", 200, json!({"name": "Deep", "document": node}))
            .await;

        let output = query(&fixture, "deep", "({ count: getAllNodes().length, text: getAllText() })").await;
        let payload: Value = serde_json::from_str(&output).unwrap();
        assert_eq!(payload["result"]["count"], 101);
        assert_eq!(
            payload["result"]["text"],
            json!([{"id": "leaf", "name": "Caption", "text": "deep"}])
        );
    }

    #[tokio::test]
    async fn test_runtime_error() {
        let fixture = FigmaFixture::new().await;
        fixture.stub("/files/abc", 200, design_file()).await;

        let output = query(&fixture, "abc", "missingHelper()").await;
        assert_eq!(output, "Error executing query: missingHelper is not defined");

        let output = query(&fixture, "abc", "findById('nope').name").await;
        assert_eq!(
            output,
            "Error executing query: Cannot read properties of undefined (reading 'name')"
        );
    }

    #[tokio::test]
    async fn test_timeout() {
        let fixture = FigmaFixture::with_timeout(200).await;
        fixture.stub("/files/abc", 200, design_file()).await;

        let output = query(&fixture, "abc", "while (true) {}").await;
        assert_eq!(
            output,
            "Query timeout: execution took longer than 0.2 seconds. Try a simpler query."
        );
    }

    #[tokio::test]
    async fn test_fetch_failure_includes_details() {
        let fixture = FigmaFixture::new().await;
        fixture
            .stub("/files/missing", 404, json!({"status": 404, "err": "Not found"}))
            .await;

        let output = query(&fixture, "missing", "document").await;
        assert_eq!(
            output,
            r#"Error executing query: Figma API error: 404 Not Found. Details: {"status":404,"err":"Not found"}"#
        );
    }
}

// ============================================================================
// Node details and image export
// ============================================================================

mod node_tests {
    use super::*;

    #[tokio::test]
    async fn test_get_node_details() {
        let fixture = FigmaFixture::new().await;
        Mock::given(method("GET"))
            .and(path("/v1/files/abc"))
            .and(query_param("ids", "2:1,9:9"))
            .respond_with(ResponseTemplate::new(200).set_body_json(design_file()))
            .mount(&fixture.mock)
            .await;

        let output = fixture
            .server
            .get_node_details(Parameters(NodeDetailsParams {
                file_key: "abc".to_string(),
                node_ids: vec![" 2:1 ".to_string(), "".to_string(), "9:9".to_string()],
            }))
            .await;
        let payload: Value = serde_json::from_str(&output).unwrap();
        assert_eq!(
            payload,
            json!({
                "name": "Design System",
                "nodes": {
                    "2:1": {
                        "id": "2:1",
                        "name": "Hero",
                        "type": "FRAME",
                        "children_count": 2,
                        "children_ids": [
                            {"id": "3:1", "name": "Headline", "type": "TEXT"},
                            {"id": "3:2", "name": "Draft", "type": "TEXT"}
                        ]
                    }
                }
            })
        );
    }

    #[tokio::test]
    async fn test_get_node_details_requires_ids() {
        let fixture = FigmaFixture::new().await;
        let output = fixture
            .server
            .get_node_details(Parameters(NodeDetailsParams {
                file_key: "abc".to_string(),
                node_ids: vec!["  ".to_string()],
            }))
            .await;
        assert_eq!(output, "Error fetching node details: At least one node_id is required");
    }

    #[tokio::test]
    async fn test_export_images() {
        let fixture = FigmaFixture::new().await;
        Mock::given(method("GET"))
            .and(path("/v1/images/abc"))
            .and(query_param("ids", "2:1,2:2"))
            .and(query_param("format", "svg"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "err": null,
                "images": {"2:1": "https://cdn/2-1.svg", "2:2": "https://cdn/2-2.svg"}
            })))
            .mount(&fixture.mock)
            .await;

        let output = fixture
            .server
            .export_images(Parameters(ExportImagesParams {
                file_key: "abc".to_string(),
                node_ids: vec!["2:1".to_string(), "2:2".to_string()],
                format: Some(ImageFormat::Svg),
            }))
            .await;
        assert_eq!(output, "2:1: https://cdn/2-1.svg\n2:2: https://cdn/2-2.svg\n");
    }

    #[tokio::test]
    async fn test_export_images_reports_render_error() {
        let fixture = FigmaFixture::new().await;
        Mock::given(method("GET"))
            .and(path("/v1/images/abc"))
            .and(query_param("format", "png"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "err": "Render timeout",
                "images": {"2:1": null}
            })))
            .mount(&fixture.mock)
            .await;

        let output = fixture
            .server
            .export_images(Parameters(ExportImagesParams {
                file_key: "abc".to_string(),
                node_ids: vec!["2:1".to_string()],
                format: None,
            }))
            .await;
        assert_eq!(output, "Error: Render timeout\n2:1: null\n");
    }

    #[tokio::test]
    async fn test_export_images_requires_ids() {
        let fixture = FigmaFixture::new().await;
        let output = fixture
            .server
            .export_images(Parameters(ExportImagesParams {
                file_key: "abc".to_string(),
                node_ids: vec![],
                format: None,
            }))
            .await;
        assert_eq!(output, "Error fetching nodes: node_ids are required for image exports");
    }
}

// ============================================================================
// Server metadata
// ============================================================================

mod server_tests {
    use super::*;

    #[tokio::test]
    async fn test_server_get_info() {
        let fixture = FigmaFixture::new().await;

        use rmcp::ServerHandler;
        let info = fixture.server.get_info();

        assert_eq!(info.server_info.name, "figma-rest-mcp");
        assert!(info.capabilities.tools.is_some(), "Should have tools capability");
    }

    #[tokio::test]
    async fn test_registered_tools() {
        let fixture = FigmaFixture::new().await;
        let mut names: Vec<String> = fixture
            .server
            .tools()
            .into_iter()
            .map(|tool| tool.name.to_string())
            .collect();
        names.sort();
        assert_eq!(
            names,
            vec![
                "export_images",
                "get_node_details",
                "list_files",
                "list_projects",
                "list_teams",
                "query_file"
            ]
        );
    }
}
