//! # LearnPath Core
//!
//! Domain types, traits, and error definitions for the LearnPath learning
//! coach. This crate has **no framework dependencies**: it defines the domain
//! model that all other crates implement against.
//!
//! The two seams of the system live here:
//! - [`Provider`]: the language model
//! - [`ToolGateway`]: the external tool server
//!
//! Everything else (store, orchestrator, batch agent, HTTP) is written
//! against these traits, so tests swap in scripted stubs.

pub mod error;
pub mod event;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{ConnectionError, Error, ProviderError, Result, SummarizationError, ToolError};
pub use event::{DomainEvent, EventBus};
pub use message::{
    Content, ContentBlock, ConversationHistory, PairingViolation, Role, Turn, UserId,
    pairing_violations,
};
pub use provider::{Provider, ProviderRequest, ProviderResponse, Usage};
pub use tool::{ToolCatalog, ToolDescriptor, ToolGateway, ToolInvocation, ToolInvocationResult};
