//! Serper (Google results over HTTP) search provider.

use async_trait::async_trait;
use deepsearch_core::error::SearchError;
use deepsearch_core::search::SearchProvider;
use std::time::Duration;
use tracing::{debug, warn};

pub const SERPER_API_URL: &str = "https://google.serper.dev/search";

pub struct SerperSearchProvider {
    api_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl SerperSearchProvider {
    pub fn new(api_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self, SearchError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| SearchError::NotConfigured(format!("HTTP client: {e}")))?;

        Ok(Self {
            api_url: api_url.into(),
            api_key: api_key.into(),
            client,
        })
    }

    fn request_body(query: &str, limit: usize) -> serde_json::Value {
        serde_json::json!({ "q": query, "num": limit })
    }

    /// Pull the `organic` hits out of a Serper response body.
    fn organic_results(mut body: serde_json::Value) -> Vec<serde_json::Value> {
        match body.get_mut("organic").map(serde_json::Value::take) {
            Some(serde_json::Value::Array(items)) => items,
            _ => Vec::new(),
        }
    }
}

#[async_trait]
impl SearchProvider for SerperSearchProvider {
    fn name(&self) -> &str {
        "serper"
    }

    async fn search(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<serde_json::Value>, SearchError> {
        debug!(query, limit, "Querying Serper");
        let response = self
            .client
            .post(&self.api_url)
            .header("X-API-KEY", &self.api_key)
            .json(&Self::request_body(query, limit))
            .send()
            .await
            .map_err(|e| SearchError::Provider(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), body = %body, "Serper returned error");
            return Err(SearchError::Provider(format!("HTTP {}", status.as_u16())));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| SearchError::Provider(format!("Invalid response body: {e}")))?;
        Ok(Self::organic_results(body))
    }
}
