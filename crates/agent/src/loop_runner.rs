//! The step-bounded research loop.
//!
//! Each request gets its own task. The task works on a private copy of the
//! conversation, alternating between streaming a model turn and running the
//! tools that turn asked for, and reports progress as [`StreamEvent`]s on a
//! bounded channel. A slow consumer therefore slows the loop down instead
//! of buffering without limit.

use std::collections::HashSet;
use std::sync::Arc;

use deepsearch_config::AgentConfig;
use deepsearch_core::message::{Conversation, Message, MessageToolCall};
use deepsearch_core::provider::{FinishReason, Provider, ProviderRequest};
use deepsearch_core::tool::ToolCall;
use deepsearch_tools::ToolBox;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::stream_event::StreamEvent;

/// Model and loop parameters for one [`AgentLoop`].
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,

    /// Upper bound on model calls per request.
    pub max_steps: u32,

    pub system_prompt: String,

    /// Capacity of the event channel to the client stream.
    pub event_buffer: usize,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self::from(&AgentConfig::default())
    }
}

impl From<&AgentConfig> for AgentSettings {
    fn from(config: &AgentConfig) -> Self {
        Self {
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_steps: config.max_steps,
            system_prompt: config.system_prompt.clone(),
            event_buffer: config.event_buffer,
        }
    }
}

/// Drives a provider and a tool box to answer chat requests.
#[derive(Clone)]
pub struct AgentLoop {
    provider: Arc<dyn Provider>,
    toolbox: ToolBox,
    settings: Arc<AgentSettings>,
}

impl AgentLoop {
    pub fn new(provider: Arc<dyn Provider>, toolbox: ToolBox, settings: AgentSettings) -> Self {
        Self {
            provider,
            toolbox,
            settings: Arc::new(settings),
        }
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    /// Start answering `conversation`.
    ///
    /// The returned receiver yields events until exactly one terminal event
    /// (`Finished` or `Errored`) or until the loop notices nobody is listening.
    /// Cancelling `cancel` stops in-flight model and search calls.
    pub fn run(
        &self,
        conversation: &Conversation,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<StreamEvent> {
        let (tx, rx) = mpsc::channel(self.settings.event_buffer.max(1));

        let run = Run {
            provider: self.provider.clone(),
            toolbox: self.toolbox.clone(),
            settings: self.settings.clone(),
            messages: self.working_messages(conversation),
            cited: HashSet::new(),
            tx,
            cancel,
        };
        tokio::spawn(run.drive());
        rx
    }

    /// System prompt first, then the request's messages untouched.
    fn working_messages(&self, conversation: &Conversation) -> Vec<Message> {
        let mut messages = Vec::with_capacity(conversation.messages.len() + 1);
        messages.push(Message::system(&self.settings.system_prompt));
        messages.extend(conversation.messages.iter().cloned());
        messages
    }
}

enum RunError {
    /// The request cannot continue; the message is for logs only.
    Failed(String),
    /// The event receiver is gone.
    Disconnected,
}

enum Turn {
    Stop,
    ToolCalls {
        content: String,
        calls: Vec<MessageToolCall>,
    },
}

/// State of one request.
struct Run {
    provider: Arc<dyn Provider>,
    toolbox: ToolBox,
    settings: Arc<AgentSettings>,
    messages: Vec<Message>,
    cited: HashSet<String>,
    tx: mpsc::Sender<StreamEvent>,
    cancel: CancellationToken,
}

impl Run {
    async fn drive(mut self) {
        let terminal = match self.execute().await {
            Ok(steps) => {
                info!(steps, "Agent finished");
                StreamEvent::Finished { steps }
            }
            Err(RunError::Disconnected) => {
                debug!("Event receiver dropped, stopping agent");
                return;
            }
            Err(RunError::Failed(message)) => {
                error!(error = %message, "Agent failed");
                StreamEvent::errored(message)
            }
        };
        let _ = self.tx.send(terminal).await;
    }

    async fn execute(&mut self) -> Result<u32, RunError> {
        let max_steps = self.settings.max_steps.max(1);
        let mut step = 0u32;
        loop {
            match self.generate(step).await? {
                Turn::Stop => return Ok(step + 1),
                Turn::ToolCalls { content, calls } => {
                    self.messages
                        .push(Message::assistant_with_tool_calls(content, calls.clone()));
                    for call in calls {
                        self.run_tool(call).await?;
                    }

                    step += 1;
                    if step >= max_steps {
                        warn!(step, max_steps, "Step limit reached, finishing");
                        return Ok(step);
                    }
                }
            }
        }
    }

    /// Stream one model turn, forwarding text as it arrives.
    async fn generate(&mut self, step: u32) -> Result<Turn, RunError> {
        let request = ProviderRequest {
            model: self.settings.model.clone(),
            messages: self.messages.clone(),
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
            tools: self.toolbox.definitions(),
            stream: true,
        };
        debug!(step, provider = self.provider.name(), messages = request.messages.len(), "Calling model");

        let mut chunks = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(cancelled()),
            res = self.provider.stream(request) => {
                res.map_err(|e| RunError::Failed(format!("Provider error: {e}")))?
            }
        };

        let mut content = String::new();
        let mut calls: Vec<MessageToolCall> = Vec::new();
        let mut finish_reason = None;
        let mut completed = false;

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(cancelled()),
                next = chunks.recv() => next,
            };
            let Some(chunk) = next else { break };
            let chunk = chunk.map_err(|e| RunError::Failed(format!("Stream error: {e}")))?;

            if let Some(text) = chunk.content
                && !text.is_empty()
            {
                content.push_str(&text);
                self.emit(StreamEvent::TextDelta { text }).await?;
            }
            for delta in chunk.tool_calls {
                merge_tool_call(&mut calls, delta);
            }
            if chunk.finish_reason.is_some() {
                finish_reason = chunk.finish_reason;
            }
            if chunk.done {
                completed = true;
                break;
            }
        }
        if !completed {
            return Err(RunError::Failed("Model stream ended without finishing".into()));
        }

        let reason = finish_reason.unwrap_or_else(|| FinishReason::infer(&calls));
        debug!(step, ?reason, tool_calls = calls.len(), "Model turn complete");
        match reason {
            FinishReason::ToolCalls if !calls.is_empty() => Ok(Turn::ToolCalls { content, calls }),
            _ => {
                self.messages.push(Message::assistant(content));
                Ok(Turn::Stop)
            }
        }
    }

    async fn run_tool(&mut self, call: MessageToolCall) -> Result<(), RunError> {
        let arguments = serde_json::from_str(&call.arguments)
            .unwrap_or(serde_json::Value::String(call.arguments));
        let call = ToolCall {
            id: call.id,
            name: call.name,
            arguments,
        };
        self.emit(StreamEvent::ToolCallStarted(call.clone())).await?;

        let outcome = self
            .toolbox
            .dispatch(&call, &self.cancel)
            .await
            .map_err(|e| RunError::Failed(e.to_string()))?;
        debug!(tool = %call.name, success = outcome.result.success, "Tool call complete");

        self.messages.push(Message::tool_result(
            &call.id,
            outcome.result.payload.to_string(),
        ));
        self.emit(StreamEvent::ToolResult(outcome.result)).await?;

        for url in outcome.sources {
            if self.cited.insert(url.clone()) {
                self.emit(StreamEvent::SourceCited { url }).await?;
            }
        }
        Ok(())
    }

    async fn emit(&self, event: StreamEvent) -> Result<(), RunError> {
        self.tx.send(event).await.map_err(|_| {
            self.cancel.cancel();
            RunError::Disconnected
        })
    }
}

fn cancelled() -> RunError {
    RunError::Failed("Request cancelled".into())
}

/// Fold a streamed tool call into the calls seen so far.
///
/// An entry whose id matches an earlier call extends that call. Any other
/// entry, including one without an id, is a new call and gets an id here.
fn merge_tool_call(calls: &mut Vec<MessageToolCall>, delta: MessageToolCall) {
    let existing = if delta.id.is_empty() {
        None
    } else {
        calls.iter_mut().find(|c| c.id == delta.id)
    };
    match existing {
        Some(call) => {
            if call.name.is_empty() {
                call.name = delta.name;
            }
            call.arguments.push_str(&delta.arguments);
        }
        None => calls.push(with_call_id(delta)),
    }
}

fn with_call_id(mut call: MessageToolCall) -> MessageToolCall {
    if call.id.is_empty() {
        call.id = format!("call_{}", uuid::Uuid::new_v4().simple());
    }
    call
}
