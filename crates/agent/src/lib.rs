//! The research agent.
//!
//! [`AgentLoop`] answers one chat request at a time:
//!
//! 1. Prepend the system prompt to a private copy of the conversation
//! 2. Stream a model turn, forwarding text deltas as they arrive
//! 3. If the model asked for tools: run them in order, append the results,
//!    report new sources, and go back to step 2
//! 4. Otherwise finish
//!
//! The loop stops after `max_steps` model calls, on any model failure, or
//! when the request is cancelled.

pub mod loop_runner;
pub mod stream_event;

#[cfg(any(test, feature = "test-util"))]
pub mod test_helpers;

pub use loop_runner::{AgentLoop, AgentSettings};
pub use stream_event::StreamEvent;
