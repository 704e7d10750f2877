//! OpenAI-compatible provider implementation.
//!
//! Works with OpenAI, OpenRouter, Gemini's OpenAI endpoint, Ollama, vLLM,
//! and any other `/v1/chat/completions` server.
//!
//! Supports:
//! - Chat completions (non-streaming and streaming SSE)
//! - Tool use / function calling, with tool call deltas reassembled in
//!   the order the model emitted them
//! - Finish reason mapping (`stop`, `tool_calls`, `length`)

use async_trait::async_trait;
use deepsearch_core::error::ProviderError;
use deepsearch_core::message::{Message, MessageToolCall, Role};
use deepsearch_core::provider::*;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// An OpenAI-compatible LLM provider.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider.
    ///
    /// Only the connect phase has a timeout; the overall request budget is
    /// enforced by the caller's cancellation token.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {e}")))?;

        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        })
    }

    /// Create an OpenAI provider (convenience constructor).
    pub fn openai(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        Self::new("openai", "https://api.openai.com/v1", api_key)
    }

    /// Convert our Message types to OpenAI API format.
    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: match m.role {
                    Role::User => "user".into(),
                    Role::Assistant => "assistant".into(),
                    Role::System => "system".into(),
                    Role::Tool => "tool".into(),
                },
                content: Some(m.content.clone()),
                tool_calls: if m.tool_calls.is_empty() {
                    None
                } else {
                    Some(
                        m.tool_calls
                            .iter()
                            .map(|tc| ApiToolCall {
                                id: tc.id.clone(),
                                r#type: "function".into(),
                                function: ApiFunction {
                                    name: tc.name.clone(),
                                    arguments: tc.arguments.clone(),
                                },
                            })
                            .collect(),
                    )
                },
                tool_call_id: m.tool_call_id.clone(),
            })
            .collect()
    }

    /// Convert tool definitions to OpenAI API format.
    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<ApiToolDefinition> {
        tools
            .iter()
            .map(|t| ApiToolDefinition {
                r#type: "function".into(),
                function: ApiToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect()
    }

    fn request_body(request: &ProviderRequest, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "temperature": request.temperature,
            "stream": stream,
        });
        if stream {
            body["stream_options"] = serde_json::json!({ "include_usage": true });
        }
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
        }
        body
    }

    async fn post(
        &self,
        body: &serde_json::Value,
        accept: &str,
    ) -> Result<reqwest::Response, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Accept", accept)
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        match response.status().as_u16() {
            200 => Ok(response),
            429 => Err(ProviderError::RateLimited {
                retry_after_secs: 5,
            }),
            401 | 403 => Err(ProviderError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            )),
            status => {
                let error_body = response.text().await.unwrap_or_default();
                warn!(provider = %self.name, status, body = %error_body, "Provider returned error");
                Err(ProviderError::ApiError {
                    status_code: status,
                    message: error_body,
                })
            }
        }
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        debug!(provider = %self.name, model = %request.model, "Sending completion request");
        let body = Self::request_body(&request, false);
        let response = self.post(&body, "application/json").await?;

        let api_response: ApiResponse =
            response.json().await.map_err(|e| ProviderError::ApiError {
                status_code: 200,
                message: format!("Failed to parse response: {e}"),
            })?;

        let choice =
            api_response
                .choices
                .into_iter()
                .next()
                .ok_or_else(|| ProviderError::ApiError {
                    status_code: 200,
                    message: "No choices in response".into(),
                })?;

        let tool_calls: Vec<MessageToolCall> = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| MessageToolCall {
                id: tc.id,
                name: tc.function.name,
                arguments: tc.function.arguments,
            })
            .collect();

        let message = Message::assistant_with_tool_calls(
            choice.message.content.unwrap_or_default(),
            tool_calls,
        );

        Ok(ProviderResponse {
            message,
            usage: api_response.usage.map(Usage::from),
            model: api_response.model,
            finish_reason: choice.finish_reason.as_deref().and_then(map_finish_reason),
        })
    }

    async fn stream(&self, request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
        debug!(provider = %self.name, model = %request.model, "Sending streaming request");
        let body = Self::request_body(&request, true);
        let response = self.post(&body, "text/event-stream").await?;

        let (tx, rx) = tokio::sync::mpsc::channel(64);
        let provider_name = self.name.clone();

        // Read the SSE byte stream; stop as soon as the receiver is gone.
        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut decoder = StreamDecoder::default();

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx
                            .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                            .await;
                        return;
                    }
                };

                for chunk in decoder.feed(&bytes, &provider_name) {
                    if tx.send(Ok(chunk)).await.is_err() {
                        return;
                    }
                }
                if decoder.is_done() {
                    break;
                }
            }

            if !decoder.completed() {
                warn!(provider = %provider_name, "Stream ended before [DONE]");
                let _ = tx
                    .send(Err(ProviderError::StreamInterrupted(
                        "response ended before completion".into(),
                    )))
                    .await;
                return;
            }
            let _ = tx.send(Ok(decoder.finish())).await;
        });

        Ok(rx)
    }
}

fn map_finish_reason(reason: &str) -> Option<FinishReason> {
    match reason {
        "stop" => Some(FinishReason::Stop),
        "tool_calls" | "function_call" => Some(FinishReason::ToolCalls),
        "length" => Some(FinishReason::Length),
        _ => None,
    }
}

// --- Streaming decoder ---

/// Incremental parser for an OpenAI SSE response.
///
/// Text deltas are surfaced as they arrive. Tool call fragments are merged
/// by their `index` and only released in the final chunk, ordered by index.
#[derive(Default)]
struct StreamDecoder {
    buffer: Vec<u8>,
    tool_calls: BTreeMap<u32, ToolCallAccumulator>,
    finish_reason: Option<FinishReason>,
    usage: Option<Usage>,
    done: bool,
}

impl StreamDecoder {
    /// Consume raw bytes; return any text chunks completed by them.
    fn feed(&mut self, bytes: &[u8], provider: &str) -> Vec<StreamChunk> {
        self.buffer.extend_from_slice(bytes);
        let mut out = Vec::new();

        // Split on raw bytes so multi-byte characters cut across reads survive.
        while let Some(line_end) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=line_end).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\r', '\n']);

            // Skip empty lines and SSE comments
            if line.is_empty() || line.starts_with(':') {
                continue;
            }
            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim();

            if data == "[DONE]" {
                self.done = true;
                break;
            }

            match serde_json::from_str::<StreamResponse>(data) {
                Ok(resp) => {
                    if let Some(text) = self.apply(resp) {
                        out.push(StreamChunk::text(text));
                    }
                }
                Err(e) => {
                    trace!(provider = %provider, data = %data, error = %e, "Ignoring unparseable SSE chunk");
                }
            }
        }
        out
    }

    fn apply(&mut self, resp: StreamResponse) -> Option<String> {
        if let Some(usage) = resp.usage {
            self.usage = Some(usage.into());
        }
        let choice = resp.choices.into_iter().next()?;

        for delta in choice.delta.tool_calls.unwrap_or_default() {
            let acc = self.tool_calls.entry(delta.index).or_default();
            if let Some(id) = delta.id {
                acc.id = id;
            }
            if let Some(func) = delta.function {
                if let Some(name) = func.name {
                    acc.name = name;
                }
                if let Some(args) = func.arguments {
                    acc.arguments.push_str(&args);
                }
            }
        }

        if let Some(reason) = choice.finish_reason.as_deref().and_then(map_finish_reason) {
            self.finish_reason = Some(reason);
        }

        choice.delta.content.filter(|c| !c.is_empty())
    }

    fn is_done(&self) -> bool {
        self.done
    }

    /// Whether the server signalled the end of the turn, either with
    /// `[DONE]` or with a finish reason.
    fn completed(&self) -> bool {
        self.done || self.finish_reason.is_some()
    }

    /// The closing chunk: accumulated tool calls plus the finish reason.
    fn finish(self) -> StreamChunk {
        let tool_calls: Vec<MessageToolCall> = self
            .tool_calls
            .into_values()
            .map(ToolCallAccumulator::into_tool_call)
            .collect();
        let finish_reason = self
            .finish_reason
            .unwrap_or_else(|| FinishReason::infer(&tool_calls));

        StreamChunk {
            content: None,
            tool_calls,
            done: true,
            finish_reason: Some(finish_reason),
            usage: self.usage,
        }
    }
}

/// Accumulates incremental tool call deltas into a complete tool call.
#[derive(Default)]
struct ToolCallAccumulator {
    id: String,
    name: String,
    arguments: String,
}

impl ToolCallAccumulator {
    fn into_tool_call(self) -> MessageToolCall {
        MessageToolCall {
            id: self.id,
            name: self.name,
            arguments: self.arguments,
        }
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    id: String,
    r#type: String,
    function: ApiFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolDefinition {
    r#type: String,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    model: String,
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

impl From<ApiUsage> for Usage {
    fn from(u: ApiUsage) -> Self {
        Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }
    }
}

/// A single SSE `data: {...}` chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<StreamToolCallDelta>>,
}

/// A tool call delta. Arrives incrementally across chunks.
#[derive(Debug, Deserialize)]
struct StreamToolCallDelta {
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<StreamFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sse(lines: &[&str]) -> String {
        lines.iter().map(|l| format!("data: {l}\n\n")).collect()
    }

    #[test]
    fn openai_constructor() {
        let provider = OpenAiCompatProvider::openai("sk-test").unwrap();
        assert_eq!(provider.name(), "openai");
        assert!(provider.base_url.contains("api.openai.com"));
    }

    #[test]
    fn base_url_trailing_slash_trimmed() {
        let provider = OpenAiCompatProvider::new("local", "http://localhost:11434/v1/", "x").unwrap();
        assert_eq!(provider.base_url, "http://localhost:11434/v1");
    }

    #[test]
    fn message_conversion() {
        let messages = vec![Message::system("You are helpful"), Message::user("Hello")];
        let api_messages = OpenAiCompatProvider::to_api_messages(&messages);
        assert_eq!(api_messages.len(), 2);
        assert_eq!(api_messages[0].role, "system");
        assert_eq!(api_messages[1].role, "user");
    }

    #[test]
    fn message_conversion_with_tool_calls() {
        let msg = Message::assistant_with_tool_calls(
            "",
            vec![MessageToolCall {
                id: "call_1".into(),
                name: "searchWeb".into(),
                arguments: r#"{"query":"rust"}"#.into(),
            }],
        );
        let api_msgs = OpenAiCompatProvider::to_api_messages(&[msg]);
        let tc = api_msgs[0].tool_calls.as_ref().unwrap();
        assert_eq!(tc.len(), 1);
        assert_eq!(tc[0].function.name, "searchWeb");
    }

    #[test]
    fn message_conversion_tool_response() {
        let msg = Message::tool_result("call_1", "[]");
        let api_msgs = OpenAiCompatProvider::to_api_messages(&[msg]);
        assert_eq!(api_msgs[0].role, "tool");
        assert_eq!(api_msgs[0].tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn streaming_body_requests_usage_and_tools() {
        let request = ProviderRequest {
            model: "gpt-4o-mini".into(),
            messages: vec![Message::user("hi")],
            temperature: 0.2,
            max_tokens: Some(256),
            tools: vec![ToolDefinition {
                name: "searchWeb".into(),
                description: "Search the web".into(),
                parameters: serde_json::json!({"type": "object"}),
            }],
            stream: true,
        };
        let body = OpenAiCompatProvider::request_body(&request, true);
        assert_eq!(body["stream"], true);
        assert_eq!(body["stream_options"]["include_usage"], true);
        assert_eq!(body["max_tokens"], 256);
        assert_eq!(body["tools"][0]["function"]["name"], "searchWeb");
    }

    #[test]
    fn decoder_emits_text_deltas() {
        let mut decoder = StreamDecoder::default();
        let chunks = decoder.feed(
            sse(&[
                r#"{"choices":[{"delta":{"content":"Hel"},"finish_reason":null}]}"#,
                r#"{"choices":[{"delta":{"content":"lo"},"finish_reason":null}]}"#,
                r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#,
                "[DONE]",
            ])
            .as_bytes(),
            "test",
        );
        let text: Vec<_> = chunks.iter().filter_map(|c| c.content.clone()).collect();
        assert_eq!(text, vec!["Hel", "lo"]);
        assert!(decoder.is_done());

        let last = decoder.finish();
        assert!(last.done);
        assert_eq!(last.finish_reason, Some(FinishReason::Stop));
        assert!(last.tool_calls.is_empty());
    }

    #[test]
    fn decoder_handles_lines_split_across_reads() {
        let mut decoder = StreamDecoder::default();
        let payload = sse(&[r#"{"choices":[{"delta":{"content":"Hello"},"finish_reason":null}]}"#]);
        let (a, b) = payload.split_at(20);
        assert!(decoder.feed(a.as_bytes(), "test").is_empty());
        let chunks = decoder.feed(b.as_bytes(), "test");
        assert_eq!(chunks[0].content.as_deref(), Some("Hello"));
    }

    #[test]
    fn decoder_merges_tool_call_fragments_in_index_order() {
        let mut decoder = StreamDecoder::default();
        decoder.feed(
            sse(&[
                r#"{"choices":[{"delta":{"tool_calls":[{"index":1,"id":"call_b","function":{"name":"searchWeb","arguments":"{\"query\":"}}]},"finish_reason":null}]}"#,
                r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_a","function":{"name":"searchWeb","arguments":"{\"query\":\"A\"}"}}]},"finish_reason":null}]}"#,
                r#"{"choices":[{"delta":{"tool_calls":[{"index":1,"function":{"arguments":"\"B\"}"}}]},"finish_reason":"tool_calls"}]}"#,
                r#"{"choices":[],"usage":{"prompt_tokens":10,"completion_tokens":5,"total_tokens":15}}"#,
            ])
            .as_bytes(),
            "test",
        );

        let last = decoder.finish();
        assert_eq!(last.finish_reason, Some(FinishReason::ToolCalls));
        assert_eq!(last.tool_calls.len(), 2);
        assert_eq!(last.tool_calls[0].id, "call_a");
        assert_eq!(last.tool_calls[1].id, "call_b");
        assert_eq!(last.tool_calls[1].arguments, r#"{"query":"B"}"#);
        assert_eq!(last.usage.unwrap().total_tokens, 15);
    }

    #[test]
    fn decoder_infers_finish_reason_when_missing() {
        let mut decoder = StreamDecoder::default();
        decoder.feed(
            sse(&[
                r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"c","function":{"name":"searchWeb","arguments":"{}"}}]}}]}"#,
                "[DONE]",
            ])
            .as_bytes(),
            "test",
        );
        assert!(decoder.completed());
        assert_eq!(decoder.finish().finish_reason, Some(FinishReason::ToolCalls));
    }

    #[test]
    fn decoder_without_done_or_finish_reason_is_incomplete() {
        let mut decoder = StreamDecoder::default();
        let chunks = decoder.feed(
            sse(&[r#"{"choices":[{"delta":{"content":"Partial ans"},"finish_reason":null}]}"#]).as_bytes(),
            "test",
        );
        assert_eq!(chunks.len(), 1);
        assert!(!decoder.completed());

        decoder.feed(
            sse(&[r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#]).as_bytes(),
            "test",
        );
        assert!(decoder.completed());
        assert!(!decoder.is_done());
    }

    #[test]
    fn decoder_keeps_multibyte_text_split_across_reads() {
        let mut decoder = StreamDecoder::default();
        let payload = sse(&[r#"{"choices":[{"delta":{"content":"héllo"},"finish_reason":null}]}"#]);
        let bytes = payload.as_bytes();
        let split = payload.find('é').unwrap() + 1;
        assert!(decoder.feed(&bytes[..split], "test").is_empty());
        let chunks = decoder.feed(&bytes[split..], "test");
        assert_eq!(chunks[0].content.as_deref(), Some("héllo"));
    }

    #[test]
    fn decoder_skips_garbage_and_comments() {
        let mut decoder = StreamDecoder::default();
        let chunks = decoder.feed(b": keep-alive\n\ndata: not-json\n\nevent: ping\n", "test");
        assert!(chunks.is_empty());
        assert!(!decoder.is_done());
    }

    #[test]
    fn finish_reason_mapping() {
        assert_eq!(map_finish_reason("stop"), Some(FinishReason::Stop));
        assert_eq!(map_finish_reason("tool_calls"), Some(FinishReason::ToolCalls));
        assert_eq!(map_finish_reason("length"), Some(FinishReason::Length));
        assert_eq!(map_finish_reason("content_filter"), None);
    }
}
