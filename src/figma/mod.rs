//! Figma REST API access

mod client;

pub use client::FigmaClient;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{FileResponse, ImageFormat, ImagesResponse, ProjectFiles, TeamProjects, User};

/// Remote operations the MCP tools depend on.
#[async_trait]
pub trait FigmaApi: Send + Sync {
    /// `GET /v1/me`
    async fn me(&self) -> Result<User>;

    /// `GET /v1/teams/{team_id}/projects`
    async fn team_projects(&self, team_id: &str) -> Result<TeamProjects>;

    /// `GET /v1/projects/{project_id}/files`
    async fn project_files(&self, project_id: &str) -> Result<ProjectFiles>;

    /// `GET /v1/files/{key}`, optionally restricted to `ids`
    async fn file(&self, key: &str, ids: Option<&[String]>) -> Result<FileResponse>;

    /// `GET /v1/images/{key}`
    async fn images(&self, key: &str, ids: &[String], format: ImageFormat) -> Result<ImagesResponse>;
}

/// Accept either a bare file key or a Figma URL (`/file/<key>/...` or `/design/<key>/...`).
pub fn normalize_file_key(input: &str) -> String {
    let trimmed = input.trim();
    if !trimmed.contains("figma.com") {
        return trimmed.to_string();
    }

    let start = ["file/", "design/"]
        .iter()
        .filter_map(|marker| trimmed.find(marker).map(|pos| pos + marker.len()))
        .min();

    if let Some(start) = start {
        let key: String = trimmed[start..]
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric())
            .collect();
        if !key.is_empty() {
            return key;
        }
    }
    trimmed.to_string()
}

/// Trim ids and drop the empty ones.
pub fn clean_ids(ids: &[String]) -> Vec<String> {
    ids.iter()
        .map(|id| id.trim())
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_key_is_trimmed() {
        assert_eq!(normalize_file_key("  abc123  "), "abc123");
    }

    #[test]
    fn test_file_url() {
        assert_eq!(
            normalize_file_key("https://www.figma.com/file/AbC123xyz/My-Design?node-id=1%3A2"),
            "AbC123xyz"
        );
    }

    #[test]
    fn test_design_url() {
        assert_eq!(
            normalize_file_key("https://www.figma.com/design/Key987/Title"),
            "Key987"
        );
    }

    #[test]
    fn test_unrecognized_url_falls_back_to_text() {
        let url = "https://www.figma.com/community/plugin/1";
        assert_eq!(normalize_file_key(url), url);
    }

    #[test]
    fn test_clean_ids() {
        let ids = vec![" 1:2 ".to_string(), "".to_string(), "  ".to_string(), "3:4".to_string()];
        assert_eq!(clean_ids(&ids), vec!["1:2", "3:4"]);
    }
}
