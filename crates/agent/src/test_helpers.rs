//! Scripted providers and search backends for agent and gateway tests.

use async_trait::async_trait;
use deepsearch_core::error::{ProviderError, SearchError};
use deepsearch_core::message::{Message, MessageToolCall};
use deepsearch_core::provider::{
    ChunkReceiver, FinishReason, Provider, ProviderRequest, ProviderResponse, StreamChunk,
};
use deepsearch_core::search::SearchProvider;
use std::sync::Mutex;
use std::time::Duration;

/// One scripted model call.
pub enum ScriptedTurn {
    /// Chunks delivered in order on the stream.
    Stream(Vec<Result<StreamChunk, ProviderError>>),
    /// `stream()` itself fails.
    Reject(ProviderError),
}

/// A mock provider that answers each call with the next scripted turn.
///
/// Calls past the end of the script fail with an API error. Every request
/// is recorded for inspection.
pub struct SequentialMockProvider {
    turns: Mutex<Vec<ScriptedTurn>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl SequentialMockProvider {
    pub fn new(mut turns: Vec<ScriptedTurn>) -> Self {
        turns.reverse();
        Self {
            turns: Mutex::new(turns),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// A provider that answers once with plain text split into `deltas`.
    pub fn single_text(deltas: &[&str]) -> Self {
        Self::new(vec![text_turn(deltas)])
    }

    /// A provider that asks for `searchWeb` on every call, forever.
    pub fn always_searching() -> Self {
        let turns = (0..64)
            .map(|i| tool_turn(vec![search_call(&format!("call_{i}"), "rust")]))
            .collect();
        Self::new(turns)
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next_turn(&self, request: ProviderRequest) -> ScriptedTurn {
        let mut requests = self.requests.lock().unwrap();
        requests.push(request);
        let call = requests.len();
        self.turns.lock().unwrap().pop().unwrap_or_else(|| {
            ScriptedTurn::Reject(ProviderError::ApiError {
                status_code: 500,
                message: format!("SequentialMockProvider: no response scripted for call #{call}"),
            })
        })
    }
}

#[async_trait]
impl Provider for SequentialMockProvider {
    fn name(&self) -> &str {
        "sequential_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let chunks = match self.next_turn(request) {
            ScriptedTurn::Reject(e) => return Err(e),
            ScriptedTurn::Stream(chunks) => chunks,
        };
        let mut content = String::new();
        let mut tool_calls = Vec::new();
        let mut finish_reason = None;
        for chunk in chunks {
            let chunk = chunk?;
            if let Some(text) = chunk.content {
                content.push_str(&text);
            }
            tool_calls.extend(chunk.tool_calls);
            finish_reason = chunk.finish_reason.or(finish_reason);
        }
        Ok(ProviderResponse {
            message: Message::assistant_with_tool_calls(content, tool_calls),
            usage: None,
            model: "mock-model".into(),
            finish_reason,
        })
    }

    async fn stream(&self, request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
        let chunks = match self.next_turn(request) {
            ScriptedTurn::Reject(e) => return Err(e),
            ScriptedTurn::Stream(chunks) => chunks,
        };
        let (tx, rx) = tokio::sync::mpsc::channel(chunks.len().max(1));
        for chunk in chunks {
            let _ = tx.send(chunk).await;
        }
        Ok(rx)
    }
}

/// A turn that streams `deltas` as text and then stops.
pub fn text_turn(deltas: &[&str]) -> ScriptedTurn {
    let mut chunks: Vec<Result<StreamChunk, ProviderError>> =
        deltas.iter().map(|d| Ok(StreamChunk::text(*d))).collect();
    chunks.push(Ok(StreamChunk {
        done: true,
        finish_reason: Some(FinishReason::Stop),
        ..StreamChunk::default()
    }));
    ScriptedTurn::Stream(chunks)
}

/// A turn that requests `calls` and ends with `tool_calls`.
pub fn tool_turn(calls: Vec<MessageToolCall>) -> ScriptedTurn {
    ScriptedTurn::Stream(vec![Ok(StreamChunk {
        tool_calls: calls,
        done: true,
        finish_reason: Some(FinishReason::ToolCalls),
        ..StreamChunk::default()
    })])
}

/// A `searchWeb` call as the model would emit it.
pub fn search_call(id: &str, query: &str) -> MessageToolCall {
    MessageToolCall {
        id: id.to_string(),
        name: "searchWeb".to_string(),
        arguments: serde_json::json!({ "query": query }).to_string(),
    }
}

/// A search backend with fixed links, optionally slow.
pub struct StaticSearchProvider {
    links: Vec<String>,
    delay: Option<Duration>,
}

impl StaticSearchProvider {
    pub fn new(links: &[&str]) -> Self {
        Self {
            links: links.iter().map(|l| l.to_string()).collect(),
            delay: None,
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::new(&["https://example.com/slow"])
        }
    }
}

#[async_trait]
impl SearchProvider for StaticSearchProvider {
    fn name(&self) -> &str {
        "static"
    }

    async fn search(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<serde_json::Value>, SearchError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self
            .links
            .iter()
            .take(limit)
            .map(|link| {
                serde_json::json!({
                    "title": format!("{query} at {link}"),
                    "link": link,
                    "snippet": "Result snippet",
                    "position": 1
                })
            })
            .collect())
    }
}
