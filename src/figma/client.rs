//! `reqwest` implementation of [`FigmaApi`]

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::FigmaApi;
use crate::config::FigmaConfig;
use crate::error::{Error, Result};
use crate::types::{FileResponse, ImageFormat, ImagesResponse, ProjectFiles, TeamProjects, User};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Stack for decoding file bodies, whose node trees may nest thousands of levels deep.
const DECODE_STACK_SIZE: usize = 256 * 1024 * 1024;

/// Figma REST API client authenticated with a personal access token
#[derive(Debug, Clone)]
pub struct FigmaClient {
    http: Client,
    base_url: String,
    token: String,
}

impl FigmaClient {
    pub fn new(config: &FigmaConfig) -> Result<Self> {
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.access_token.clone(),
        })
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.http
            .get(format!("{}/v1{}", self.base_url, path))
            .header("X-Figma-Token", &self.token)
    }

    /// Send and check the status. `with_details` appends the error body on failure.
    async fn send(&self, request: RequestBuilder, path: &str, with_details: bool) -> Result<Response> {
        tracing::debug!(path, "Figma request");
        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let reason = status.canonical_reason().unwrap_or_default().to_string();
            let details = if with_details {
                Some(response.text().await.unwrap_or_default())
            } else {
                None
            };
            tracing::warn!(path, status = status.as_u16(), "Figma API request failed");
            return Err(Error::FigmaApi {
                status: status.as_u16(),
                reason,
                details,
            });
        }
        Ok(response)
    }

    async fn fetch<T: DeserializeOwned>(&self, request: RequestBuilder, path: &str, with_details: bool) -> Result<T> {
        Ok(self.send(request, path, with_details).await?.json().await?)
    }
}

/// Decode without serde_json's nesting limit of 128.
fn decode_unbounded<T: DeserializeOwned>(bytes: &[u8]) -> serde_json::Result<T> {
    let mut de = serde_json::Deserializer::from_slice(bytes);
    de.disable_recursion_limit();
    let value = T::deserialize(&mut de)?;
    de.end()?;
    Ok(value)
}

/// Run [`decode_unbounded`] on a dedicated thread with a large stack.
async fn decode_deep<T: DeserializeOwned + Send + 'static>(bytes: Vec<u8>) -> Result<T> {
    let (tx, rx) = tokio::sync::oneshot::channel();
    std::thread::Builder::new()
        .name("figma-decode".into())
        .stack_size(DECODE_STACK_SIZE)
        .spawn(move || {
            let _ = tx.send(decode_unbounded::<T>(&bytes));
        })?;
    let decoded = rx
        .await
        .map_err(|_| Error::Other("Figma response decoding ended unexpectedly".into()))?;
    Ok(decoded?)
}

#[async_trait]
impl FigmaApi for FigmaClient {
    async fn me(&self) -> Result<User> {
        self.fetch(self.get("/me"), "/me", false).await
    }

    async fn team_projects(&self, team_id: &str) -> Result<TeamProjects> {
        let path = format!("/teams/{}/projects", team_id);
        self.fetch(self.get(&path), &path, false).await
    }

    async fn project_files(&self, project_id: &str) -> Result<ProjectFiles> {
        let path = format!("/projects/{}/files", project_id);
        self.fetch(self.get(&path), &path, false).await
    }

    async fn file(&self, key: &str, ids: Option<&[String]>) -> Result<FileResponse> {
        let path = format!("/files/{}", key);
        let mut request = self.get(&path);
        if let Some(ids) = ids {
            request = request.query(&[("ids", ids.join(","))]);
        }
        let body = self.send(request, &path, true).await?.bytes().await?;
        decode_deep(body.to_vec()).await
    }

    async fn images(&self, key: &str, ids: &[String], format: ImageFormat) -> Result<ImagesResponse> {
        let path = format!("/images/{}", key);
        let request = self
            .get(&path)
            .query(&[("ids", ids.join(",")), ("format", format.to_string())]);
        self.fetch(request, &path, false).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nested_file(depth: usize) -> String {
        let mut body = String::from(r#"{"name":"Deep","document":"#);
        for i in 0..depth {
            body.push_str(&format!(r#"{{"id":"{}","type":"FRAME","children":["#, i));
        }
        body.push_str(r#"{"id":"leaf","type":"TEXT"}"#);
        for _ in 0..depth {
            body.push_str("]}");
        }
        body.push('}');
        body
    }

    #[test]
    fn test_default_limit_rejects_deep_files() {
        assert!(serde_json::from_str::<FileResponse>(&nested_file(70)).is_err());
    }

    #[tokio::test]
    async fn test_decode_deep_file() {
        let file: FileResponse = decode_deep(nested_file(5_000).into_bytes()).await.unwrap();
        assert_eq!(file.name, "Deep");
        assert_eq!(file.document["id"], "0");
        // the tree is dropped on a large stack as well
        let handle = std::thread::Builder::new()
            .stack_size(DECODE_STACK_SIZE)
            .spawn(move || drop(file))
            .unwrap();
        handle.join().unwrap();
    }

    #[tokio::test]
    async fn test_decode_reports_malformed_body() {
        let err = decode_deep::<FileResponse>(b"{\"name\":".to_vec()).await.unwrap_err();
        assert!(matches!(err, Error::Json(_)));
    }
}
