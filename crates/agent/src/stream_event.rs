//! Events emitted by the agent while answering one request.
//!
//! A stream is any number of non-terminal events followed by at most one
//! terminal event (`finished` or `error`), which is always last.

use deepsearch_core::tool::{ToolCall, ToolResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Partial answer text from the model.
    TextDelta { text: String },

    /// The agent is about to run a tool.
    #[serde(rename = "tool_call")]
    ToolCallStarted(ToolCall),

    /// A tool finished. Its id matches an earlier `tool_call`.
    ToolResult(ToolResult),

    /// A link the answer may cite, reported once per request.
    #[serde(rename = "source")]
    SourceCited { url: String },

    /// The answer is complete after `steps` model calls.
    Finished { steps: u32 },

    /// The request failed. The message is internal and never sent to clients.
    #[serde(rename = "error")]
    Errored { message: String },
}

impl StreamEvent {
    pub fn text(text: impl Into<String>) -> Self {
        Self::TextDelta { text: text.into() }
    }

    pub fn errored(message: impl Into<String>) -> Self {
        Self::Errored {
            message: message.into(),
        }
    }

    /// Wire name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::TextDelta { .. } => "text_delta",
            Self::ToolCallStarted(_) => "tool_call",
            Self::ToolResult(_) => "tool_result",
            Self::SourceCited { .. } => "source",
            Self::Finished { .. } => "finished",
            Self::Errored { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished { .. } | Self::Errored { .. })
    }
}
