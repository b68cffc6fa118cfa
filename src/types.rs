//! Figma REST API response types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// `GET /v1/me`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct User {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub handle: Option<String>,
    #[serde(default)]
    pub img_url: Option<String>,
    /// Present only for accounts with team memberships
    #[serde(default)]
    pub teams: Vec<Team>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Team {
    pub id: String,
    pub name: String,
}

/// `GET /v1/teams/{team_id}/projects`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TeamProjects {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub projects: Vec<Project>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub name: String,
}

/// `GET /v1/projects/{project_id}/files`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectFiles {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub files: Vec<FileSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileSummary {
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub last_modified: Option<String>,
}

/// `GET /v1/files/{key}`. The document tree stays untyped: node attributes are open-ended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileResponse {
    pub name: String,
    pub document: serde_json::Value,
    #[serde(default, rename = "lastModified")]
    pub last_modified: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

/// `GET /v1/images/{key}`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImagesResponse {
    #[serde(default)]
    pub err: Option<String>,
    /// Node id to rendered image URL; `None` when a node failed to render
    #[serde(default)]
    pub images: BTreeMap<String, Option<String>>,
}

/// Export format accepted by `GET /v1/images/{key}`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Svg,
    #[default]
    Png,
    Jpg,
}

impl ImageFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            ImageFormat::Svg => "svg",
            ImageFormat::Png => "png",
            ImageFormat::Jpg => "jpg",
        }
    }
}

impl std::fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ImageFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "svg" => Ok(ImageFormat::Svg),
            "png" => Ok(ImageFormat::Png),
            "jpg" | "jpeg" => Ok(ImageFormat::Jpg),
            other => Err(format!("Unsupported image format: {}", other)),
        }
    }
}

/// Payload of a successful `query_file` call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub file_name: String,
    pub file_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

/// Payload of a successful `get_node_details` call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDetailsResponse {
    pub name: String,
    pub nodes: serde_json::Map<String, serde_json::Value>,
}

// Figma returns project ids as numbers on some endpoints and strings on others.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_user_without_teams() {
        let user: User = serde_json::from_value(json!({"id": "1", "email": "a@b.c"})).unwrap();
        assert_eq!(user.email.as_deref(), Some("a@b.c"));
        assert!(user.teams.is_empty());
    }

    #[test]
    fn test_numeric_project_id() {
        let projects: TeamProjects =
            serde_json::from_value(json!({"projects": [{"id": 42, "name": "Web"}]})).unwrap();
        assert_eq!(projects.projects[0].id, "42");
    }

    #[test]
    fn test_images_with_null_entry() {
        let images: ImagesResponse =
            serde_json::from_value(json!({"err": null, "images": {"1:2": "https://x/1.png", "1:3": null}}))
                .unwrap();
        assert!(images.err.is_none());
        assert_eq!(images.images["1:2"].as_deref(), Some("https://x/1.png"));
        assert!(images.images["1:3"].is_none());
    }

    #[test]
    fn test_query_response_omits_undefined_result() {
        let response = QueryResponse {
            file_name: "F".into(),
            file_key: "k".into(),
            result: None,
        };
        assert_eq!(
            serde_json::to_string(&response).unwrap(),
            r#"{"file_name":"F","file_key":"k"}"#
        );
    }

    #[test]
    fn test_image_format_parsing() {
        assert_eq!("SVG".parse::<ImageFormat>().unwrap(), ImageFormat::Svg);
        assert_eq!(ImageFormat::default().as_str(), "png");
        assert!("gif".parse::<ImageFormat>().is_err());
    }
}
