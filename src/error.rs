//! Error types for figma-rest-mcp

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Figma API error: {status} {reason}{}", details_suffix(.details))]
    FigmaApi {
        status: u16,
        reason: String,
        details: Option<String>,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("{0}")]
    Validation(String),

    #[error("Query timeout: execution took longer than {} seconds. Try a simpler query.", format_seconds(.budget_ms))]
    QueryTimeout { budget_ms: u64 },

    #[error("{0}")]
    Query(String),

    #[error("MCP error: {0}")]
    Mcp(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

fn details_suffix(details: &Option<String>) -> String {
    match details {
        Some(body) if !body.is_empty() => format!(". Details: {}", body),
        _ => String::new(),
    }
}

fn format_seconds(ms: &u64) -> String {
    let ms = *ms;
    if ms % 1000 == 0 {
        (ms / 1000).to_string()
    } else {
        format!("{}", ms as f64 / 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_figma_api_error_display() {
        let err = Error::FigmaApi {
            status: 404,
            reason: "Not Found".into(),
            details: None,
        };
        assert_eq!(err.to_string(), "Figma API error: 404 Not Found");

        let err = Error::FigmaApi {
            status: 403,
            reason: "Forbidden".into(),
            details: Some(r#"{"err":"Invalid token"}"#.into()),
        };
        assert_eq!(
            err.to_string(),
            r#"Figma API error: 403 Forbidden. Details: {"err":"Invalid token"}"#
        );
    }

    #[test]
    fn test_query_timeout_display() {
        let err = Error::QueryTimeout { budget_ms: 5000 };
        assert_eq!(
            err.to_string(),
            "Query timeout: execution took longer than 5 seconds. Try a simpler query."
        );
        assert!(Error::QueryTimeout { budget_ms: 1500 }.to_string().contains("1.5 seconds"));
    }
}
