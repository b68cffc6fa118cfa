//! Configuration for figma-rest-mcp

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Figma REST API settings
    #[serde(default)]
    pub figma: FigmaConfig,

    /// HTTP transport settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Query evaluator settings
    #[serde(default)]
    pub query: QueryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FigmaConfig {
    /// Personal access token sent as `X-Figma-Token`
    #[serde(default)]
    pub access_token: String,

    /// API base URL, without the `/v1` suffix
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Bearer token required on `/mcp` when set
    #[serde(default)]
    pub auth_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Wall-clock budget of one query evaluation
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Nesting depth past which results are replaced by a placeholder
    #[serde(default = "default_max_result_depth")]
    pub max_result_depth: usize,
}

impl Default for FigmaConfig {
    fn default() -> Self {
        Self {
            access_token: String::new(),
            base_url: default_base_url(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            auth_token: None,
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            max_result_depth: default_max_result_depth(),
        }
    }
}

impl Config {
    /// Load config: defaults, then the TOML file, then `.env` and the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let _ = dotenvy::dotenv();

        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => Config::default(),
            },
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Parse a TOML config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Overlay environment variables, read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(token) = lookup("FIGMA_ACCESS_TOKEN") {
            self.figma.access_token = token;
        }
        if let Some(url) = lookup("FIGMA_BASE_URL") {
            self.figma.base_url = url;
        }
        if let Some(token) = lookup("MCP_AUTH_TOKEN").filter(|t| !t.is_empty()) {
            self.server.auth_token = Some(token);
        }
        if let Some(port) = lookup("PORT") {
            self.server.port = port
                .trim()
                .parse()
                .map_err(|_| Error::Config(format!("Invalid PORT value: {}", port)))?;
        }
        if let Some(timeout) = lookup("QUERY_TIMEOUT_MS") {
            self.query.timeout_ms = timeout
                .trim()
                .parse()
                .map_err(|_| Error::Config(format!("Invalid QUERY_TIMEOUT_MS value: {}", timeout)))?;
        }
        Ok(())
    }

    /// Check the settings needed to reach Figma
    pub fn validate(&self) -> Result<()> {
        if self.figma.access_token.trim().is_empty() {
            return Err(Error::Config(
                "FIGMA_ACCESS_TOKEN environment variable is required".into(),
            ));
        }
        Ok(())
    }

    /// `<config_dir>/figma-rest-mcp/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("figma-rest-mcp").join("config.toml"))
    }
}

// Default value functions

fn default_base_url() -> String {
    "https://api.figma.com".to_string()
}

fn default_port() -> u16 {
    4202
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_max_result_depth() -> usize {
    50
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.figma.base_url, "https://api.figma.com");
        assert_eq!(config.server.port, 4202);
        assert_eq!(config.query.timeout_ms, 5000);
        assert_eq!(config.query.max_result_depth, 50);
        assert!(config.server.auth_token.is_none());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[figma]\naccess_token = \"abc\"\n\n[query]\ntimeout_ms = 250").unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.figma.access_token, "abc");
        assert_eq!(config.figma.base_url, "https://api.figma.com");
        assert_eq!(config.query.timeout_ms, 250);
        assert_eq!(config.query.max_result_depth, 50);
        assert_eq!(config.server.port, 4202);
    }

    #[test]
    fn test_env_overrides_file() {
        let env: HashMap<&str, &str> = [
            ("FIGMA_ACCESS_TOKEN", "from-env"),
            ("MCP_AUTH_TOKEN", "secret"),
            ("PORT", "8080"),
            ("QUERY_TIMEOUT_MS", "1000"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.figma.access_token = "from-file".into();
        config
            .apply_env(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.figma.access_token, "from-env");
        assert_eq!(config.server.auth_token.as_deref(), Some("secret"));
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.query.timeout_ms, 1000);
    }

    #[test]
    fn test_invalid_port_is_config_error() {
        let mut config = Config::default();
        let err = config
            .apply_env(|key| (key == "PORT").then(|| "abc".to_string()))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_validate_requires_token() {
        let mut config = Config::default();
        let err = config.validate().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Config error: FIGMA_ACCESS_TOKEN environment variable is required"
        );

        config.figma.access_token = "t".into();
        assert!(config.validate().is_ok());
    }
}
