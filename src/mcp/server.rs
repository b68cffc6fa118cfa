//! MCP server implementation

use rmcp::handler::server::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::{tool, tool_handler, tool_router, ServerHandler, ServiceExt};
use schemars::JsonSchema;
use serde::Deserialize;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::Instrument;

use crate::error::Error;
use crate::figma::{clean_ids, normalize_file_key, FigmaApi};
use crate::query::QueryEngine;
use crate::types::{ImageFormat, NodeDetailsResponse};

/// MCP server for the Figma REST API
#[derive(Clone)]
pub struct FigmaServer {
    api: Arc<dyn FigmaApi>,
    engine: QueryEngine,
    tool_router: ToolRouter<Self>,
}

// Tool parameter types

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListProjectsParams {
    /// Team ID to list projects from
    pub team_id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListFilesParams {
    /// Project ID to list files from
    pub project_id: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct QueryFileParams {
    /// Figma file key or URL
    pub file_key: String,
    /// JavaScript code to query the design data. Use `document` to access the root node, or use
    /// helper functions like findByType(), findByName(), findById(), getAllText()
    pub query: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct NodeDetailsParams {
    /// Figma file key or URL
    pub file_key: String,
    /// Array of node IDs to retrieve (required)
    pub node_ids: Vec<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ExportImagesParams {
    /// Figma file key or URL
    pub file_key: String,
    /// Node IDs to export as images (required)
    pub node_ids: Vec<String>,
    /// Image export format (default: png)
    pub format: Option<ImageFormat>,
}

// Server implementation

#[tool_router]
impl FigmaServer {
    pub fn new(api: Arc<dyn FigmaApi>, engine: QueryEngine) -> Self {
        Self {
            api,
            engine,
            tool_router: Self::tool_router(),
        }
    }

    /// Registered tools, in registration order
    pub fn tools(&self) -> Vec<rmcp::model::Tool> {
        self.tool_router.list_all()
    }

    /// List teams the authenticated user has access to
    #[tool(description = "List teams that the authenticated user has access to. Returns user information and team IDs.")]
    pub async fn list_teams(&self) -> String {
        tracing::info!(tool = "list_teams", "tool call");
        match self.render_teams().await {
            Ok(text) => text,
            Err(e) => format!("Error accessing Figma API: {}", e),
        }
    }

    /// List projects in a team
    #[tool(description = "List all projects in a Figma team. Requires team_id from list_teams.")]
    pub async fn list_projects(&self, Parameters(params): Parameters<ListProjectsParams>) -> String {
        tracing::info!(tool = "list_projects", team_id = %params.team_id, "tool call");
        match self.render_projects(params.team_id.trim()).await {
            Ok(text) => text,
            Err(e) => format!("Error accessing Figma API: {}", e),
        }
    }

    /// List files in a project, or explain how to discover project ids
    #[tool(description = "List Figma files in a project. If no project_id is provided, returns user information and instructions. Use list_teams and list_projects to discover IDs.")]
    pub async fn list_files(&self, Parameters(params): Parameters<ListFilesParams>) -> String {
        let project_id = params
            .project_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty());
        tracing::info!(tool = "list_files", project_id = ?project_id, "tool call");

        let rendered = match project_id {
            Some(project_id) => self.render_files(project_id).await,
            None => self.render_account().await,
        };
        match rendered {
            Ok(text) => text,
            Err(e) => format!("Error accessing Figma API: {}", e),
        }
    }

    /// Run a query program against a file's document
    #[tool(description = "Execute JavaScript code to query Figma design data. Returns only the data you specify. Hidden nodes (visible: false) are automatically excluded.

Available helpers:
- document: Root node of the design
- findById(id): Find node by ID
- findByType(type): Find all nodes of type (e.g., 'FRAME', 'TEXT', 'COMPONENT')
- findByName(name): Find nodes by exact name
- findByNameContains(substring): Find nodes whose name contains substring
- getAllText(): Get all text content
- getAllComponents(): Get all components
- getAllInstances(): Get all component instances
- getAllFrames(): Get all frames
- getChildren(nodeId): Get direct children of a node
- search(predicate): Search with custom function
- getAllNodes(): Get all nodes for advanced queries

Example queries (single expression):
- findByType('TEXT').map(n => ({ name: n.name, text: n.characters }))
- document.children.map(page => ({ name: page.name, frameCount: page.children.length }))

Example queries (multi-line with return):
- const buttons = findByNameContains('Button'); return buttons.map(b => b.name);
- const frame = findById('123:456'); return frame.children.filter(n => n.type === 'TEXT');")]
    pub async fn query_file(&self, Parameters(params): Parameters<QueryFileParams>) -> String {
        let request_id = uuid::Uuid::new_v4();
        let span = tracing::info_span!("query_file", %request_id);
        async move {
            let file_key = normalize_file_key(&params.file_key);
            tracing::info!(file_key = %file_key, query_len = params.query.len(), "tool call");

            match self.run_query(&file_key, &params.query).await {
                Ok(text) => text,
                Err(e @ Error::QueryTimeout { .. }) => {
                    tracing::warn!("query timed out");
                    e.to_string()
                }
                Err(e) => {
                    tracing::warn!(error = %e, "query failed");
                    format!("Error executing query: {}", e)
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Node properties without nested children
    #[tool(description = "Get JSON details for specific nodes WITHOUT nested children. Returns node properties, styles, and child IDs only. Children are replaced with count and ID list to prevent context explosion.")]
    pub async fn get_node_details(&self, Parameters(params): Parameters<NodeDetailsParams>) -> String {
        tracing::info!(tool = "get_node_details", nodes = params.node_ids.len(), "tool call");
        match self.render_node_details(&params.file_key, &params.node_ids).await {
            Ok(text) => text,
            Err(e) => format!("Error fetching node details: {}", e),
        }
    }

    /// Export nodes as rendered images
    #[tool(description = "Export Figma nodes as images (SVG, PNG, JPG). Requires node_ids. Returns image URLs for download.")]
    pub async fn export_images(&self, Parameters(params): Parameters<ExportImagesParams>) -> String {
        tracing::info!(tool = "export_images", nodes = params.node_ids.len(), "tool call");
        let format = params.format.unwrap_or_default();
        match self.render_images(&params.file_key, &params.node_ids, format).await {
            Ok(text) => text,
            Err(e) => format!("Error fetching nodes: {}", e),
        }
    }
}

// Rendering of tool payloads

impl FigmaServer {
    async fn render_teams(&self) -> crate::error::Result<String> {
        let user = self.api.me().await?;

        let mut output = format!(
            "User: {}\nID: {}\n\n",
            user.email.as_deref().unwrap_or("N/A"),
            user.id.as_deref().unwrap_or("N/A")
        );
        if user.teams.is_empty() {
            output.push_str("No teams found. Personal Figma accounts may not have team access. You can still access files directly if you have the file key.\n");
        } else {
            output.push_str("Teams:\n");
            for team in &user.teams {
                let _ = write!(output, "Name: {}\nID: {}\n\n", team.name, team.id);
            }
        }
        Ok(output.trim().to_string())
    }

    async fn render_projects(&self, team_id: &str) -> crate::error::Result<String> {
        let projects = self.api.team_projects(team_id).await?.projects;
        if projects.is_empty() {
            return Ok("No projects found in this team.".into());
        }

        let mut output = String::new();
        for project in &projects {
            let _ = write!(output, "Name: {}\nID: {}\n\n", project.name, project.id);
        }
        Ok(output.trim().to_string())
    }

    async fn render_files(&self, project_id: &str) -> crate::error::Result<String> {
        let files = self.api.project_files(project_id).await?.files;
        if files.is_empty() {
            return Ok("No files found in this project.".into());
        }

        let mut output = String::new();
        for file in &files {
            let _ = write!(
                output,
                "Name: {}\nKey: {}\nLast Modified: {}\nThumbnail: {}\n\n",
                file.name,
                file.key,
                file.last_modified.as_deref().unwrap_or("N/A"),
                file.thumbnail_url.as_deref().unwrap_or("N/A")
            );
        }
        Ok(output.trim().to_string())
    }

    async fn render_account(&self) -> crate::error::Result<String> {
        let user = self.api.me().await?;

        let mut output = format!(
            "Email: {}\nID: {}\nHandle: {}\n\n",
            user.email.as_deref().unwrap_or("N/A"),
            user.id.as_deref().unwrap_or("N/A"),
            user.handle.as_deref().unwrap_or("N/A")
        );
        if user.id.is_some() {
            output.push_str("To list files:\n");
            output.push_str("1. Use list_teams to get team IDs\n");
            output.push_str("2. Use list_projects with team_id to get project IDs\n");
            output.push_str("3. Use list_files with project_id to get files\n");
        }
        Ok(output)
    }

    async fn run_query(&self, file_key: &str, query: &str) -> crate::error::Result<String> {
        let file = self.api.file(file_key, None).await?;
        let response = self.engine.query_file(file, file_key, query).await?;
        Ok(serde_json::to_string(&response)?)
    }

    async fn render_node_details(&self, file_key: &str, node_ids: &[String]) -> crate::error::Result<String> {
        let node_ids = clean_ids(node_ids);
        if node_ids.is_empty() {
            return Err(Error::Validation("At least one node_id is required".into()));
        }
        let file_key = normalize_file_key(file_key);

        let file = self.api.file(&file_key, Some(&node_ids)).await?;
        let mut nodes = serde_json::Map::new();
        for id in &node_ids {
            if let Some(node) = find_node(&file.document, id) {
                nodes.insert(id.clone(), flatten_node(node));
            }
        }

        let response = NodeDetailsResponse {
            name: file.name,
            nodes,
        };
        Ok(serde_json::to_string(&response)?)
    }

    async fn render_images(&self, file_key: &str, node_ids: &[String], format: ImageFormat) -> crate::error::Result<String> {
        let node_ids = clean_ids(node_ids);
        let file_key = normalize_file_key(file_key);
        if node_ids.is_empty() {
            return Err(Error::Validation("node_ids are required for image exports".into()));
        }

        let images = self.api.images(&file_key, &node_ids, format).await?;
        let mut output = String::new();
        if let Some(err) = images.err.as_deref().filter(|e| !e.is_empty()) {
            let _ = writeln!(output, "Error: {}", err);
        }
        for (id, url) in &images.images {
            let _ = writeln!(output, "{}: {}", id, url.as_deref().unwrap_or("null"));
        }
        Ok(output)
    }
}

/// Pre-order search of the raw document, hidden nodes included.
fn find_node<'a>(root: &'a serde_json::Value, id: &str) -> Option<&'a serde_json::Value> {
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if node.get("id").and_then(|v| v.as_str()) == Some(id) {
            return Some(node);
        }
        if let Some(children) = node.get("children").and_then(|c| c.as_array()) {
            stack.extend(children.iter().rev());
        }
    }
    None
}

/// Copy of a node without geometry, its `children` reduced to a count and id summaries.
fn flatten_node(node: &serde_json::Value) -> serde_json::Value {
    let Some(map) = node.as_object() else {
        return node.clone();
    };

    let mut out = serde_json::Map::new();
    for (key, value) in map {
        match key.as_str() {
            "fillGeometry" | "strokeGeometry" => {}
            "children" => {
                let children = value.as_array().map(Vec::as_slice).unwrap_or_default();
                if children.is_empty() {
                    continue;
                }
                out.insert("children_count".into(), children.len().into());
                let ids = children
                    .iter()
                    .map(|child| {
                        let mut summary = serde_json::Map::new();
                        for field in ["id", "name", "type"] {
                            if let Some(v) = child.get(field) {
                                summary.insert(field.into(), v.clone());
                            }
                        }
                        serde_json::Value::Object(summary)
                    })
                    .collect();
                out.insert("children_ids".into(), serde_json::Value::Array(ids));
            }
            _ => {
                out.insert(key.clone(), value.clone());
            }
        }
    }
    serde_json::Value::Object(out)
}

#[tool_handler]
impl ServerHandler for FigmaServer {
    fn get_info(&self) -> rmcp::model::ServerInfo {
        rmcp::model::ServerInfo {
            protocol_version: rmcp::model::ProtocolVersion::default(),
            capabilities: rmcp::model::ServerCapabilities::builder()
                .enable_tools()
                .build(),
            server_info: rmcp::model::Implementation {
                name: "figma-rest-mcp".into(),
                title: Some("Figma REST API".into()),
                version: env!("CARGO_PKG_VERSION").into(),
                icons: None,
                website_url: None,
            },
            instructions: Some("Browse Figma teams, projects and files. Use query_file to filter large design documents with JavaScript, get_node_details for single nodes, and export_images for rendered assets.".into()),
        }
    }
}

/// Run the MCP server on stdio
pub async fn serve_stdio(server: FigmaServer) -> anyhow::Result<()> {
    tracing::info!("Starting MCP server on stdio...");
    let service = server.serve(rmcp::transport::stdio()).await?;
    service.waiting().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_find_node_includes_hidden() {
        let doc = json!({"id": "0", "children": [{"id": "1", "visible": false, "children": [{"id": "2"}]}]});
        assert!(find_node(&doc, "2").is_some());
        assert!(find_node(&doc, "3").is_none());
    }

    #[test]
    fn test_flatten_node() {
        let node = json!({
            "id": "1:1",
            "fillGeometry": [{"path": "M0"}],
            "children": [{"id": "2:1", "name": "A", "type": "TEXT", "characters": "x"}],
            "name": "Frame",
            "strokeGeometry": []
        });
        let flat = flatten_node(&node);
        assert_eq!(
            flat,
            json!({
                "id": "1:1",
                "children_count": 1,
                "children_ids": [{"id": "2:1", "name": "A", "type": "TEXT"}],
                "name": "Frame"
            })
        );
        let keys: Vec<_> = flat.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["id", "children_count", "children_ids", "name"]);
    }

    #[test]
    fn test_flatten_node_without_children() {
        let flat = flatten_node(&json!({"id": "1", "children": []}));
        assert_eq!(flat, json!({"id": "1"}));
    }
}
