//! Client for the content-management API used to seed rooms.
//!
//! When a room is created from an existing content item, the handler
//! fetches that item's current title and body server-to-server. The base
//! URL comes from `CONTENT_API_URL` and falls back to a local default.

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

/// Default base URL when `CONTENT_API_URL` is unset.
pub const DEFAULT_CONTENT_API_URL: &str = "http://localhost:3000";

#[derive(Error, Debug)]
pub enum ContentError {
    #[error("Content request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Content not found: {0}")]
    NotFound(String),
}

/// Title/body pair of a content item, used to seed a room.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceContent {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
}

#[derive(Clone)]
pub struct ContentClient {
    base_url: String,
    http: reqwest::Client,
}

impl ContentClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    /// Base URL from `CONTENT_API_URL`, falling back to the local
    /// default.
    pub fn from_env() -> Self {
        let base_url =
            std::env::var("CONTENT_API_URL").unwrap_or_else(|_| DEFAULT_CONTENT_API_URL.into());
        Self::new(base_url)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetch the current title/content of a content item.
    pub async fn fetch_source(&self, content_id: &str) -> Result<SourceContent, ContentError> {
        let url = format!("{}/api/content/{}", self.base_url, content_id);
        debug!("Fetching seed content from {}", url);

        let response = self.http.get(&url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ContentError::NotFound(content_id.to_string()));
        }

        let source = response.error_for_status()?.json::<SourceContent>().await?;
        Ok(source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailing_slash_is_trimmed() {
        let client = ContentClient::new("http://content.internal/");
        assert_eq!(client.base_url(), "http://content.internal");
    }

    #[test]
    fn test_source_content_fields_default() {
        let source: SourceContent = serde_json::from_str("{}").unwrap();
        assert_eq!(source.title, "");
        assert_eq!(source.content, "");

        let source: SourceContent =
            serde_json::from_str(r#"{"title":"T","content":"C","extra":1}"#).unwrap();
        assert_eq!(source.title, "T");
        assert_eq!(source.content, "C");
    }
}
