//! ironloop-agent — the orchestration loop.
//!
//! This crate drives a run end to end: the planning hand-off, the
//! conversation assembly fed to each completion call, tool-call dispatch,
//! context-overflow recovery, and cancellation. The entry point is
//! [`AgentLoop::run`].

pub mod assembler;
pub mod compaction;
pub mod dispatcher;
pub mod loop_runner;
pub mod observers;
pub mod planner;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use assembler::{ConversationAssembler, SystemContext, DEFAULT_MAX_MESSAGES};
pub use compaction::ContextRecoveryPolicy;
pub use dispatcher::{DispatchOutcome, ToolCallDispatcher, DEFAULT_TERMINAL_FAILURE_CEILING};
pub use loop_runner::{
    AgentLoop, AgentResult, RunConfig, RunStatus, DEFAULT_MAX_ITERATIONS,
    DEFAULT_NO_TOOL_REPLY_BUDGET,
};
pub use observers::RunObservers;
pub use planner::{PlanOutcome, PlanningCoordinator};
