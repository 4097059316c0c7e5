//! Error types for the Ironloop domain.
//!
//! Uses `thiserror` for ergonomic error definitions, one enum per bounded
//! context. The error taxonomy mirrors the loop's recovery policy:
//! provider transport errors and a second context overflow are fatal for a
//! run, while tool-level failures are degraded to tool output and never
//! cross a dispatch boundary uncaught.

use thiserror::Error;

/// The top-level error type for all Ironloop operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Planning error: {0}")]
    Planning(#[from] PlanningError),

    #[error("A run is already active on this agent instance")]
    RunActive,
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// The conversation no longer fits the model's context window.
    /// Distinguished so the loop can attempt compaction exactly once.
    #[error("Context window exceeded: {0}")]
    ContextOverflow(String),

    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

impl ProviderError {
    /// Whether this error is the distinguished context-overflow condition.
    pub fn is_context_overflow(&self) -> bool {
        matches!(self, Self::ContextOverflow(_))
    }
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name} — {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error("Permission denied: {tool_name} — {reason}")]
    PermissionDenied { tool_name: String, reason: String },
}

#[derive(Debug, Error)]
pub enum PlanningError {
    #[error("Planner returned no tool call after {attempts} attempts")]
    NoToolCall { attempts: u32 },
}
