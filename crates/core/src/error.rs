//! Error types for the LearnPath domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; the top-level [`Error`]
//! is what request-level callers (HTTP handlers, CLI, batch agent) see.

use thiserror::Error;

/// The top-level error type for all LearnPath operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Model errors ---
    #[error("Model call failed: {0}")]
    Model(#[from] ProviderError),

    // --- Tool channel errors ---
    #[error("Tool channel error: {0}")]
    Connection(#[from] ConnectionError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Compaction errors ---
    #[error("Summarization error: {0}")]
    Summarization(#[from] SummarizationError),

    // --- Orchestration ---
    #[error("Tool-call loop did not converge within {rounds} rounds")]
    LoopLimitExceeded { rounds: u32 },

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Failure of a generation call against the language model.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// The tool server could not be reached or the channel is unusable.
#[derive(Debug, Clone, Error)]
pub enum ConnectionError {
    #[error("Tool server unreachable at {endpoint}: {reason}")]
    Unreachable { endpoint: String, reason: String },

    #[error("Handshake with tool server failed: {0}")]
    Handshake(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Tool channel is not connected")]
    NotConnected,
}

/// One tool call failed. Always recovered into an error-flagged tool result.
#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Invalid arguments for {tool_name}: {}", violations.join("; "))]
    InvalidArguments {
        tool_name: String,
        violations: Vec<String>,
    },

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },
}

/// The summarizing call used by compaction failed.
#[derive(Debug, Clone, Error)]
pub enum SummarizationError {
    #[error("summary model call failed: {0}")]
    Model(#[from] ProviderError),

    #[error("summary model returned no text")]
    Empty,
}
