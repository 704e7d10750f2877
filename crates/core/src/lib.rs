//! # DeepSearch Core
//!
//! Domain types, collaborator traits, and error definitions for the
//! DeepSearch chat gateway. This crate has **no framework dependencies**:
//! it defines the domain model that every other crate implements against.
//!
//! ## Collaborators
//!
//! Everything the request path talks to is a trait here:
//! - [`IdentityProvider`] and [`UserDirectory`] resolve the caller
//! - [`QuotaStore`] counts and records requests
//! - [`Provider`] streams model output
//! - [`SearchProvider`] answers web searches
//!
//! Implementations live in their own crates, which keeps the agent loop and
//! access gate testable with in-process mocks.

pub mod error;
pub mod identity;
pub mod message;
pub mod provider;
pub mod quota;
pub mod search;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{ProviderError, SearchError, StoreError, ToolError};
pub use identity::{IdentityProvider, Session, UserDirectory, UserIdentity};
pub use message::{Conversation, Message, MessageToolCall, Role};
pub use provider::{
    ChunkReceiver, FinishReason, Provider, ProviderRequest, ProviderResponse, StreamChunk,
    ToolDefinition, Usage,
};
pub use quota::{QuotaStore, RequestRecord};
pub use search::{SearchProvider, SearchResult};
pub use tool::{ToolCall, ToolResult};
