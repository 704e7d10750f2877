//! The agent's tools.
//!
//! The tool set is closed: [`AgentTool`] lists every tool the model may call,
//! each variant carrying its parsed arguments. [`ToolBox`] advertises their
//! definitions to the model and dispatches calls by `match`, so the agent
//! loop never needs to know tool names.

pub mod search;
pub mod serper;

pub use search::{MAX_SEARCH_RESULTS, SearchTool};
pub use serper::SerperSearchProvider;

use std::sync::Arc;

use deepsearch_config::SearchConfig;
use deepsearch_core::error::{SearchError, ToolError};
use deepsearch_core::provider::ToolDefinition;
use deepsearch_core::search::SearchProvider;
use deepsearch_core::tool::{ToolCall, ToolResult};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub const SEARCH_WEB: &str = "searchWeb";

/// A parsed tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentTool {
    SearchWeb { query: String },
}

#[derive(Deserialize)]
struct SearchWebArgs {
    query: String,
}

impl AgentTool {
    /// Parse a model-issued call into a tool invocation.
    ///
    /// Arguments that arrived as a JSON-encoded string are decoded first.
    pub fn parse(name: &str, arguments: &serde_json::Value) -> Result<Self, ToolError> {
        let decoded;
        let arguments = match arguments {
            serde_json::Value::String(raw) => {
                decoded = serde_json::from_str::<serde_json::Value>(raw).map_err(|e| {
                    ToolError::InvalidArguments {
                        tool_name: name.to_string(),
                        reason: e.to_string(),
                    }
                })?;
                &decoded
            }
            other => other,
        };

        match name {
            SEARCH_WEB => {
                let args: SearchWebArgs =
                    serde_json::from_value(arguments.clone()).map_err(|e| {
                        ToolError::InvalidArguments {
                            tool_name: name.to_string(),
                            reason: e.to_string(),
                        }
                    })?;
                Ok(Self::SearchWeb { query: args.query })
            }
            other => Err(ToolError::NotFound(other.to_string())),
        }
    }

    /// Definitions for every tool, in the shape sent to the model.
    pub fn definitions() -> Vec<ToolDefinition> {
        vec![ToolDefinition {
            name: SEARCH_WEB.into(),
            description: "Search the web for up-to-date information. Returns up to 10 results \
                          with title, link and snippet."
                .into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "The query to search the web for"
                    }
                },
                "required": ["query"]
            }),
        }]
    }
}

/// What one dispatched call produced.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    pub result: ToolResult,

    /// Links the result cites, in result order.
    pub sources: Vec<String>,
}

impl ToolOutcome {
    fn failed(call_id: &str, reason: impl std::fmt::Display) -> Self {
        Self {
            result: ToolResult::failure(call_id, reason),
            sources: Vec::new(),
        }
    }
}

/// Holds the tool implementations and runs calls against them.
#[derive(Clone)]
pub struct ToolBox {
    search: SearchTool,
}

impl ToolBox {
    pub fn new(search: SearchTool) -> Self {
        Self { search }
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        AgentTool::definitions()
    }

    /// Execute one call.
    ///
    /// Tool-level failures come back as an unsuccessful [`ToolOutcome`] so the
    /// model can react to them. The only error is [`ToolError::Cancelled`],
    /// returned when the request itself has been cancelled.
    pub async fn dispatch(
        &self,
        call: &ToolCall,
        cancel: &CancellationToken,
    ) -> Result<ToolOutcome, ToolError> {
        let tool = match AgentTool::parse(&call.name, &call.arguments) {
            Ok(tool) => tool,
            Err(e) => {
                warn!(tool = %call.name, error = %e, "Rejected tool call");
                return Ok(ToolOutcome::failed(&call.id, e));
            }
        };

        match tool {
            AgentTool::SearchWeb { query } => match self.search.search(&query, cancel).await {
                Ok(results) => {
                    debug!(tool = SEARCH_WEB, query = %query, results = results.len(), "Tool executed");
                    let sources = results.iter().map(|r| r.link.clone()).collect();
                    Ok(match serde_json::to_value(&results) {
                        Ok(payload) => ToolOutcome {
                            result: ToolResult {
                                tool_call_id: call.id.clone(),
                                success: true,
                                payload,
                            },
                            sources,
                        },
                        Err(e) => ToolOutcome::failed(&call.id, e),
                    })
                }
                Err(SearchError::Cancelled) if cancel.is_cancelled() => {
                    Err(ToolError::Cancelled(SEARCH_WEB.into()))
                }
                Err(e) => {
                    warn!(tool = SEARCH_WEB, error = %e, "Tool failed");
                    Ok(ToolOutcome::failed(&call.id, e))
                }
            },
        }
    }
}

/// Build the search provider named by configuration.
pub fn build_search_provider(
    config: &SearchConfig,
) -> Result<Arc<dyn SearchProvider>, SearchError> {
    let api_key = config
        .api_key
        .as_deref()
        .filter(|k| !k.is_empty())
        .ok_or_else(|| SearchError::NotConfigured("no search API key (set SERPER_API_KEY)".into()))?;
    Ok(Arc::new(SerperSearchProvider::new(&config.api_url, api_key)?))
}
