//! Tool call and tool result value types.
//!
//! The set of tools is closed and lives in `deepsearch-tools`; these are the
//! shapes that flow between the model, the dispatcher, and the client stream.

use serde::{Deserialize, Serialize};

/// A request from the model to execute a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique call ID (matches the LLM's tool_call.id)
    pub id: String,

    /// Name of the tool to execute
    pub name: String,

    /// Arguments as a JSON value
    pub arguments: serde_json::Value,
}

/// The result of a tool execution, fed back to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// The call ID this result is for
    pub tool_call_id: String,

    /// Whether the tool executed successfully
    pub success: bool,

    /// Structured output shown to the model
    pub payload: serde_json::Value,
}

impl ToolResult {
    /// A failed result whose payload describes the failure to the model.
    pub fn failure(tool_call_id: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            success: false,
            payload: serde_json::json!({ "error": reason.to_string() }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_payload_carries_reason() {
        let result = ToolResult::failure("call_1", "search provider unavailable");
        assert!(!result.success);
        assert_eq!(result.tool_call_id, "call_1");
        assert_eq!(result.payload["error"], "search provider unavailable");
    }
}
