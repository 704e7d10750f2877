//! Turns the agent's event channel into a chunked HTTP body.
//!
//! The body pulls one event at a time, so a slow client applies
//! backpressure all the way to the agent. The multiplexer also owns the
//! request deadline and turns client disconnects into cancellation.

use std::convert::Infallible;
use std::pin::Pin;
use std::time::Duration;

use axum::body::Bytes;
use deepsearch_agent::StreamEvent;
use deepsearch_config::StreamFormat;
use futures::Stream;
use tokio::sync::mpsc;
use tokio::time::Sleep;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, warn};

/// The only error text a client ever sees.
pub const GENERIC_ERROR: &str = "Oops, an error occurred!";

pub const DATA_STREAM_HEADER: &str = "x-vercel-ai-data-stream";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    /// `<prefix>:<json>\n` lines.
    DataStream,
    /// `event: <type>\ndata: <json>\n\n` frames.
    Sse,
}

impl From<StreamFormat> for WireFormat {
    fn from(format: StreamFormat) -> Self {
        match format {
            StreamFormat::DataStream => Self::DataStream,
            StreamFormat::Sse => Self::Sse,
        }
    }
}

impl WireFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::DataStream => "text/plain; charset=utf-8",
            Self::Sse => "text/event-stream",
        }
    }
}

/// Stateful event encoder. Source parts get sequential ids.
struct Encoder {
    format: WireFormat,
    sources: u32,
}

impl Encoder {
    fn new(format: WireFormat) -> Self {
        Self { format, sources: 0 }
    }

    fn encode(&mut self, event: &StreamEvent) -> String {
        match self.format {
            WireFormat::DataStream => self.encode_data_stream(event),
            WireFormat::Sse => {
                let data = serde_json::to_string(event).unwrap_or_else(|_| "{}".into());
                format!("event: {}\ndata: {data}\n\n", event.event_type())
            }
        }
    }

    fn encode_data_stream(&mut self, event: &StreamEvent) -> String {
        let (prefix, value) = match event {
            StreamEvent::TextDelta { text } => ('0', serde_json::json!(text)),
            StreamEvent::ToolCallStarted(call) => (
                '9',
                serde_json::json!({
                    "toolCallId": call.id,
                    "toolName": call.name,
                    "args": call.arguments,
                }),
            ),
            StreamEvent::ToolResult(result) => (
                'a',
                serde_json::json!({
                    "toolCallId": result.tool_call_id,
                    "result": result.payload,
                }),
            ),
            StreamEvent::SourceCited { url } => {
                self.sources += 1;
                (
                    'h',
                    serde_json::json!({
                        "sourceType": "url",
                        "id": format!("source-{}", self.sources),
                        "url": url,
                    }),
                )
            }
            StreamEvent::Finished { .. } => ('d', serde_json::json!({ "finishReason": "stop" })),
            StreamEvent::Errored { message } => ('3', serde_json::json!(message)),
        };
        format!("{prefix}:{value}\n")
    }
}

pub struct StreamMultiplexer {
    format: WireFormat,
    timeout: Duration,
}

struct BodyState {
    rx: mpsc::Receiver<StreamEvent>,
    encoder: Encoder,
    deadline: Pin<Box<Sleep>>,
    timeout: Duration,
    cancel: CancellationToken,
    guard: Option<DropGuard>,
    done: bool,
}

impl StreamMultiplexer {
    pub fn new(format: WireFormat, timeout: Duration) -> Self {
        Self { format, timeout }
    }

    /// Encode events from `rx` until the first terminal event.
    ///
    /// Dropping the returned stream before it ends cancels `cancel`.
    pub fn into_body_stream(
        self,
        rx: mpsc::Receiver<StreamEvent>,
        cancel: CancellationToken,
    ) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
        let state = BodyState {
            rx,
            encoder: Encoder::new(self.format),
            deadline: Box::pin(tokio::time::sleep(self.timeout)),
            timeout: self.timeout,
            guard: Some(cancel.clone().drop_guard()),
            cancel,
            done: false,
        };

        futures::stream::unfold(state, |mut state| async move {
            if state.done {
                return None;
            }

            let event = tokio::select! {
                biased;
                _ = &mut state.deadline => {
                    warn!(timeout_secs = state.timeout.as_secs(), "Request deadline exceeded");
                    state.cancel.cancel();
                    StreamEvent::errored("deadline exceeded")
                }
                event = state.rx.recv() => event.unwrap_or_else(|| {
                    warn!("Agent stopped without a terminal event");
                    StreamEvent::errored("event channel closed")
                }),
            };

            let event = match event {
                StreamEvent::Errored { .. } => StreamEvent::errored(GENERIC_ERROR),
                other => other,
            };
            if event.is_terminal() {
                debug!(event = event.event_type(), "Response stream complete");
                state.done = true;
                if let Some(guard) = state.guard.take() {
                    let _ = guard.disarm();
                }
            }

            let bytes = Bytes::from(state.encoder.encode(&event));
            Some((Ok(bytes), state))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deepsearch_core::tool::{ToolCall, ToolResult};
    use futures::StreamExt;

    async fn run(
        format: WireFormat,
        events: Vec<StreamEvent>,
        close: bool,
    ) -> (Vec<String>, CancellationToken) {
        let (tx, rx) = mpsc::channel(16);
        for event in events {
            tx.send(event).await.unwrap();
        }
        if close {
            drop(tx);
        } else {
            std::mem::forget(tx);
        }
        let cancel = CancellationToken::new();
        let chunks: Vec<String> = StreamMultiplexer::new(format, Duration::from_secs(60))
            .into_body_stream(rx, cancel.clone())
            .map(|chunk| String::from_utf8(chunk.unwrap().to_vec()).unwrap())
            .collect()
            .await;
        (chunks, cancel)
    }

    #[tokio::test]
    async fn hello_scenario_data_stream() {
        let (chunks, cancel) = run(
            WireFormat::DataStream,
            vec![StreamEvent::text("Hello"), StreamEvent::Finished { steps: 1 }],
            true,
        )
        .await;

        assert_eq!(chunks, vec!["0:\"Hello\"\n", "d:{\"finishReason\":\"stop\"}\n"]);
        assert!(!cancel.is_cancelled());
    }

    #[tokio::test]
    async fn tool_and_source_parts() {
        let (chunks, _) = run(
            WireFormat::DataStream,
            vec![
                StreamEvent::ToolCallStarted(ToolCall {
                    id: "call_1".into(),
                    name: "searchWeb".into(),
                    arguments: serde_json::json!({"query": "rust"}),
                }),
                StreamEvent::ToolResult(ToolResult {
                    tool_call_id: "call_1".into(),
                    success: true,
                    payload: serde_json::json!([]),
                }),
                StreamEvent::SourceCited {
                    url: "https://www.rust-lang.org/".into(),
                },
                StreamEvent::Finished { steps: 2 },
            ],
            true,
        )
        .await;

        let call: serde_json::Value = serde_json::from_str(chunks[0].strip_prefix("9:").unwrap()).unwrap();
        assert_eq!(call["toolCallId"], "call_1");
        assert_eq!(call["toolName"], "searchWeb");
        assert_eq!(call["args"]["query"], "rust");

        let result: serde_json::Value = serde_json::from_str(chunks[1].strip_prefix("a:").unwrap()).unwrap();
        assert_eq!(result["toolCallId"], "call_1");
        assert!(result["result"].is_array());

        let source: serde_json::Value = serde_json::from_str(chunks[2].strip_prefix("h:").unwrap()).unwrap();
        assert_eq!(source["sourceType"], "url");
        assert_eq!(source["id"], "source-1");
        assert_eq!(source["url"], "https://www.rust-lang.org/");
        assert!(chunks.iter().all(|c| c.ends_with('\n')));
    }

    #[tokio::test]
    async fn internal_error_text_is_replaced() {
        let (chunks, _) = run(
            WireFormat::DataStream,
            vec![
                StreamEvent::text("Partial"),
                StreamEvent::errored("Provider error: invalid api key sk-123"),
            ],
            true,
        )
        .await;

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1], "3:\"Oops, an error occurred!\"\n");
        assert!(!chunks.concat().contains("sk-123"));
    }

    #[tokio::test]
    async fn closed_channel_appends_generic_error() {
        let (chunks, _) = run(WireFormat::DataStream, vec![StreamEvent::text("Hi")], true).await;
        assert_eq!(chunks, vec!["0:\"Hi\"\n", "3:\"Oops, an error occurred!\"\n"]);
    }

    #[tokio::test]
    async fn events_after_terminal_are_discarded() {
        let (chunks, _) = run(
            WireFormat::DataStream,
            vec![
                StreamEvent::Finished { steps: 1 },
                StreamEvent::text("late"),
                StreamEvent::errored("late"),
            ],
            true,
        )
        .await;
        assert_eq!(chunks, vec!["d:{\"finishReason\":\"stop\"}\n"]);
    }

    #[tokio::test]
    async fn sse_frames_carry_type() {
        let (chunks, _) = run(
            WireFormat::Sse,
            vec![StreamEvent::text("Hello"), StreamEvent::errored("secret")],
            true,
        )
        .await;

        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].starts_with("event: text_delta\ndata: "));
        assert!(chunks[0].ends_with("\n\n"));
        assert!(chunks[1].starts_with("event: error\n"));
        assert!(chunks[1].contains(GENERIC_ERROR));
        assert!(!chunks[1].contains("secret"));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_cancels_and_writes_error() {
        let (chunks, cancel) = run(WireFormat::DataStream, vec![StreamEvent::text("a")], false).await;

        assert_eq!(chunks, vec!["0:\"a\"\n", "3:\"Oops, an error occurred!\"\n"]);
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn dropping_body_cancels_request() {
        let (tx, rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let mut body = Box::pin(
            StreamMultiplexer::new(WireFormat::DataStream, Duration::from_secs(60))
                .into_body_stream(rx, cancel.clone()),
        );

        tx.send(StreamEvent::text("first")).await.unwrap();
        let first = body.next().await.unwrap().unwrap();
        assert_eq!(&first[..], b"0:\"first\"\n");
        assert!(!cancel.is_cancelled());

        drop(body);
        assert!(cancel.is_cancelled());
        assert!(tx.is_closed());
    }

    #[test]
    fn content_types() {
        assert_eq!(WireFormat::DataStream.content_type(), "text/plain; charset=utf-8");
        assert_eq!(WireFormat::Sse.content_type(), "text/event-stream");
        assert_eq!(WireFormat::from(StreamFormat::Sse), WireFormat::Sse);
    }
}
