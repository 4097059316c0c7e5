//! Per-run observer callbacks.
//!
//! Observers are handed to each `run()` call rather than installed on the
//! agent, so two callers can never race over shared callback slots. Every
//! slot is optional; an unset slot is a no-op. The approval hook is the
//! one slot that returns a value: when consulted, `false` denies the tool
//! call (an unset hook approves everything).

use ironloop_core::message::{Message, MessageToolCall};
use ironloop_core::todo::TodoList;
use ironloop_core::tool::ToolResult;

use crate::loop_runner::AgentResult;

type Slot<T> = Option<Box<dyn Fn(&T) + Send + Sync>>;

/// Callback slots for one run. Build with the `on_*` methods.
#[derive(Default)]
pub struct RunObservers {
    on_message: Slot<Message>,
    on_tool_call_started: Slot<MessageToolCall>,
    on_tool_result: Slot<ToolResult>,
    on_todo_update: Slot<TodoList>,
    on_complete: Slot<AgentResult>,
    on_error: Option<Box<dyn Fn(&str) + Send + Sync>>,
    on_ask_user: Option<Box<dyn Fn(&MessageToolCall) -> bool + Send + Sync>>,
}

impl RunObservers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called for every message appended during the run.
    pub fn on_message(mut self, f: impl Fn(&Message) + Send + Sync + 'static) -> Self {
        self.on_message = Some(Box::new(f));
        self
    }

    /// Called just before a tool call is dispatched.
    pub fn on_tool_call_started(
        mut self,
        f: impl Fn(&MessageToolCall) + Send + Sync + 'static,
    ) -> Self {
        self.on_tool_call_started = Some(Box::new(f));
        self
    }

    /// Called with every tool result, success or failure.
    pub fn on_tool_result(mut self, f: impl Fn(&ToolResult) + Send + Sync + 'static) -> Self {
        self.on_tool_result = Some(Box::new(f));
        self
    }

    /// Called whenever the task list is replaced or cleared.
    pub fn on_todo_update(mut self, f: impl Fn(&TodoList) + Send + Sync + 'static) -> Self {
        self.on_todo_update = Some(Box::new(f));
        self
    }

    /// Called exactly once, with the final result, before `run` returns.
    pub fn on_complete(mut self, f: impl Fn(&AgentResult) + Send + Sync + 'static) -> Self {
        self.on_complete = Some(Box::new(f));
        self
    }

    /// Called when a run ends in failure, with the error text.
    pub fn on_error(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }

    /// Approval hook, consulted per tool call when approval is required.
    pub fn on_ask_user(
        mut self,
        f: impl Fn(&MessageToolCall) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.on_ask_user = Some(Box::new(f));
        self
    }

    pub(crate) fn message(&self, msg: &Message) {
        if let Some(f) = &self.on_message {
            f(msg);
        }
    }

    pub(crate) fn tool_call_started(&self, call: &MessageToolCall) {
        if let Some(f) = &self.on_tool_call_started {
            f(call);
        }
    }

    pub(crate) fn tool_result(&self, result: &ToolResult) {
        if let Some(f) = &self.on_tool_result {
            f(result);
        }
    }

    pub(crate) fn todo_update(&self, todos: &TodoList) {
        if let Some(f) = &self.on_todo_update {
            f(todos);
        }
    }

    pub(crate) fn complete(&self, result: &AgentResult) {
        if let Some(f) = &self.on_complete {
            f(result);
        }
    }

    pub(crate) fn error(&self, message: &str) {
        if let Some(f) = &self.on_error {
            f(message);
        }
    }

    /// Ask the user to approve a tool call. No hook means approve.
    pub(crate) fn ask_user(&self, call: &MessageToolCall) -> bool {
        match &self.on_ask_user {
            Some(f) => f(call),
            None => true,
        }
    }
}
