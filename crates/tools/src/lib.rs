//! Tool gateway implementations for LearnPath.
//!
//! The model reads and writes learning data through tools hosted by an
//! external MCP server. This crate owns that channel:
//! - [`mcp`]: the MCP client implementing `learnpath_core::ToolGateway`
//! - [`schema`]: argument validation against each tool's input schema
//! - [`bootstrap`]: retried acquisition of the channel at startup

pub mod bootstrap;
pub mod mcp;
pub mod schema;

pub use bootstrap::{RetryPolicy, acquire_gateway};
pub use mcp::McpGateway;
