//! Web search as the agent sees it.
//!
//! Wraps a [`SearchProvider`], keeps only `{title, link, snippet}` from each
//! hit and caps the list. Cancellation wins over a slow provider.

use std::sync::Arc;

use deepsearch_core::error::SearchError;
use deepsearch_core::search::{SearchProvider, SearchResult};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Most results ever returned for one query.
pub const MAX_SEARCH_RESULTS: usize = 10;

#[derive(Clone)]
pub struct SearchTool {
    provider: Arc<dyn SearchProvider>,
}

impl SearchTool {
    pub fn new(provider: Arc<dyn SearchProvider>) -> Self {
        Self { provider }
    }

    /// Run one search. No retries.
    ///
    /// Returns [`SearchError::Cancelled`] as soon as `cancel` fires, without
    /// waiting for the provider.
    pub async fn search(
        &self,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<SearchResult>, SearchError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(SearchError::InvalidQuery("query must not be empty".into()));
        }
        if cancel.is_cancelled() {
            return Err(SearchError::Cancelled);
        }

        let raw = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SearchError::Cancelled),
            res = self.provider.search(query, MAX_SEARCH_RESULTS) => res?,
        };

        let mut results = Vec::with_capacity(raw.len().min(MAX_SEARCH_RESULTS));
        for value in raw.into_iter().take(MAX_SEARCH_RESULTS) {
            match serde_json::from_value::<SearchResult>(value) {
                Ok(result) => results.push(result),
                Err(e) => warn!(provider = self.provider.name(), error = %e, "Skipping malformed search hit"),
            }
        }

        debug!(query, results = results.len(), "Search complete");
        Ok(results)
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::MockSearchProvider;
    use super::*;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    #[tokio::test]
    async fn projects_and_truncates() {
        let provider = Arc::new(MockSearchProvider::returning(25));
        let tool = SearchTool::new(provider.clone());
        let results = tool.search("rust", &CancellationToken::new()).await.unwrap();

        assert_eq!(results.len(), MAX_SEARCH_RESULTS);
        assert_eq!(provider.last_limit.load(Ordering::SeqCst), MAX_SEARCH_RESULTS);
        assert_eq!(results[0].link, "https://example.com/0");
        let value = serde_json::to_value(&results[0]).unwrap();
        assert!(value.get("position").is_none());
        assert!(value.get("sitelinks").is_none());
    }

    #[tokio::test]
    async fn empty_query_is_rejected_without_calling_provider() {
        let provider = Arc::new(MockSearchProvider::returning(3));
        let tool = SearchTool::new(provider.clone());
        let err = tool.search("   ", &CancellationToken::new()).await.unwrap_err();

        assert!(matches!(err, SearchError::InvalidQuery(_)));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn provider_failure_is_surfaced() {
        let provider = Arc::new(MockSearchProvider::failing(SearchError::Provider(
            "HTTP 500".into(),
        )));
        let tool = SearchTool::new(provider);
        let err = tool.search("rust", &CancellationToken::new()).await.unwrap_err();
        assert_eq!(err, SearchError::Provider("HTTP 500".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_slow_provider() {
        let provider = Arc::new(MockSearchProvider::slow(Duration::from_secs(30)));
        let tool = SearchTool::new(provider);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = tokio::time::Instant::now();
        let err = tool.search("rust", &cancel).await.unwrap_err();
        assert_eq!(err, SearchError::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn already_cancelled_token_short_circuits() {
        let provider = Arc::new(MockSearchProvider::returning(3));
        let tool = SearchTool::new(provider.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = tool.search("rust", &cancel).await.unwrap_err();
        assert_eq!(err, SearchError::Cancelled);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }
}
