//! Web search contract.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SearchError;

/// A search hit as shown to the model.
///
/// Deserializing a raw provider result into this type keeps exactly these
/// three fields; ranking metadata, sitelinks and the like are dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    #[serde(default)]
    pub title: String,
    pub link: String,
    #[serde(default)]
    pub snippet: String,
}

/// An external web search backend.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Run `query`, asking for at most `limit` results, best first.
    ///
    /// Results are returned raw so callers decide what to keep.
    async fn search(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<serde_json::Value>, SearchError>;
}
