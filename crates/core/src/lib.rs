//! # Ironloop Core
//!
//! Domain types, traits, and error definitions for the Ironloop coding
//! agent. This crate has **zero framework dependencies** — it defines the
//! domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator is a trait here: [`Provider`] for the
//! completion endpoint, [`Tool`] for capabilities. Implementations live in
//! their respective crates, so the orchestration loop can be tested
//! entirely against mocks and the dependency graph stays inward-facing.

pub mod cancel;
pub mod error;
pub mod message;
pub mod provider;
pub mod todo;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use cancel::CancelToken;
pub use error::{Error, PlanningError, ProviderError, Result, ToolError};
pub use message::{Message, MessageToolCall, Role};
pub use provider::{Provider, ProviderRequest, ProviderResponse, ToolDefinition, Usage};
pub use todo::{TodoItem, TodoList, TodoStatus};
pub use tool::{Tool, ToolCall, ToolControl, ToolRegistry, ToolResult};
