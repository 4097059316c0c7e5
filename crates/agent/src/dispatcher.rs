//! Tool-call dispatch — turns requested tool calls into capability
//! invocations and tool-result messages.
//!
//! For each call, in request order: parse the raw JSON arguments
//! (malformed JSON degrades to a tool-role error message, never a run
//! failure), sanitize stray markup artifacts from string arguments,
//! invoke the named capability, and append exactly one tool message keyed
//! by the originating call id. Individual tool failures are surfaced to
//! the model as tool output, not escalated.
//!
//! The terminal capability is special-cased through its tagged
//! [`ToolControl::Terminal`] result: success ends the run immediately
//! (remaining queued calls are not executed); failure increments a
//! dedicated counter, and at the ceiling the run force-terminates with
//! the best available partial message so a model that never terminates
//! cleanly cannot spin forever.

use ironloop_core::cancel::CancelToken;
use ironloop_core::message::{Message, MessageToolCall};
use ironloop_core::todo::{TodoItem, TodoList};
use ironloop_core::tool::{ToolCall, ToolRegistry, ToolResult};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use crate::observers::RunObservers;

/// Default ceiling on consecutive terminal-capability failures.
pub const DEFAULT_TERMINAL_FAILURE_CEILING: u32 = 3;

/// What the loop should do after a dispatched batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Feed the results back to the model and keep iterating.
    Continue,
    /// The terminal capability succeeded; `final_text` is the answer.
    Terminal { final_text: String },
    /// The terminal capability failed too many times; force-terminate
    /// with the best available partial message.
    Forced { final_text: String },
    /// Cancellation was observed before a dispatch.
    Aborted,
}

/// Per-run tool-call dispatcher.
pub struct ToolCallDispatcher {
    registry: Arc<ToolRegistry>,
    terminal_failures: u32,
    failure_ceiling: u32,
    require_approval: bool,
}

impl ToolCallDispatcher {
    pub fn new(registry: Arc<ToolRegistry>, failure_ceiling: u32) -> Self {
        Self {
            registry,
            terminal_failures: 0,
            failure_ceiling,
            require_approval: false,
        }
    }

    /// Require the approval hook to confirm each tool call.
    pub fn with_approval_required(mut self, required: bool) -> Self {
        self.require_approval = required;
        self
    }

    /// How many times the terminal capability has failed this run.
    pub fn terminal_failures(&self) -> u32 {
        self.terminal_failures
    }

    /// Dispatch one assistant turn's tool calls, in request order.
    ///
    /// Appends exactly one tool message per executed call to `messages`
    /// and records every result in `history`. `fallback_text` is the best
    /// partial message available should the run need to force-terminate.
    /// Each tool's output is visible in `messages` before the next tool
    /// runs.
    #[allow(clippy::too_many_arguments)]
    pub async fn dispatch_batch(
        &mut self,
        calls: &[MessageToolCall],
        messages: &mut Vec<Message>,
        history: &mut Vec<ToolResult>,
        todos: &mut TodoList,
        observers: &RunObservers,
        cancel: &CancelToken,
        fallback_text: &str,
    ) -> DispatchOutcome {
        for call in calls {
            if cancel.is_cancelled() {
                return DispatchOutcome::Aborted;
            }

            observers.tool_call_started(call);
            let result = if self.require_approval && !observers.ask_user(call) {
                debug!(tool = %call.name, "Tool call denied by the user");
                ToolResult::failure(&call.id, format!("The user denied the '{}' call", call.name))
            } else {
                self.dispatch_one(call).await
            };
            observers.tool_result(&result);

            apply_todo_update(&result, todos, observers);

            let tool_message = Message::tool_result(&call.id, &result.output);
            messages.push(tool_message.clone());
            observers.message(&tool_message);

            let terminal_success = result.is_terminal();
            let terminal_failure =
                result.control == ironloop_core::tool::ToolControl::Terminal && !result.success;
            let final_text = result.output.clone();
            history.push(result);

            if terminal_success {
                debug!("Terminal capability succeeded, ending run");
                return DispatchOutcome::Terminal { final_text };
            }

            if terminal_failure {
                self.terminal_failures += 1;
                warn!(
                    failures = self.terminal_failures,
                    ceiling = self.failure_ceiling,
                    "Terminal capability failed"
                );
                if self.terminal_failures >= self.failure_ceiling {
                    return DispatchOutcome::Forced {
                        final_text: fallback_text.to_string(),
                    };
                }
            }
        }

        DispatchOutcome::Continue
    }

    /// Dispatch a single call. Never returns an error: parse failures and
    /// unknown capabilities degrade to failure results.
    async fn dispatch_one(&self, call: &MessageToolCall) -> ToolResult {
        let arguments = match parse_arguments(&call.arguments) {
            Ok(value) => sanitize_arguments(value),
            Err(reason) => {
                warn!(tool = %call.name, %reason, "Malformed tool-call arguments");
                return ToolResult::failure(
                    &call.id,
                    format!("Invalid JSON arguments for '{}': {}", call.name, reason),
                );
            }
        };

        let tool_call = ToolCall {
            id: call.id.clone(),
            name: call.name.clone(),
            arguments,
        };

        let start = Instant::now();
        let outcome = self.registry.execute(&tool_call).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(result) => {
                debug!(
                    tool = %call.name,
                    success = result.success,
                    duration_ms,
                    "Tool executed"
                );
                result
            }
            Err(err) => {
                warn!(tool = %call.name, error = %err, duration_ms, "Tool execution failed");
                ToolResult::failure(&call.id, format!("Error: {err}"))
            }
        }
    }
}

/// Parse raw JSON argument text. An empty argument string means "no
/// arguments" and parses to an empty object.
fn parse_arguments(raw: &str) -> Result<serde_json::Value, String> {
    let trimmed = strip_code_fence(raw.trim());
    if trimmed.is_empty() {
        return Ok(serde_json::json!({}));
    }
    serde_json::from_str(trimmed).map_err(|e| e.to_string())
}

/// Strip a wrapping Markdown code fence — a common model artifact around
/// JSON arguments.
fn strip_code_fence(s: &str) -> &str {
    let s = s.trim();
    let Some(rest) = s.strip_prefix("```") else {
        return s;
    };
    // Skip an optional language tag on the opening fence line.
    let rest = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

/// Sanitize string arguments in place: models occasionally leak tool-call
/// markup fragments (stray XML-ish tags) into argument values. This is a
/// deliberately narrow heuristic; anything else passes through untouched.
fn sanitize_arguments(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::String(s) => serde_json::Value::String(sanitize_string(&s)),
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.into_iter().map(sanitize_arguments).collect())
        }
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, sanitize_arguments(v)))
                .collect(),
        ),
        other => other,
    }
}

/// Markup fragments stripped from the edges of string arguments.
const MARKUP_ARTIFACTS: &[&str] = &[
    "</tool_call>",
    "<tool_call>",
    "</invoke>",
    "</parameter>",
    "</arguments>",
];

fn sanitize_string(s: &str) -> String {
    let mut out = s.trim().to_string();
    let mut changed = true;
    while changed {
        changed = false;
        for artifact in MARKUP_ARTIFACTS {
            if let Some(stripped) = out.strip_suffix(artifact) {
                out = stripped.trim_end().to_string();
                changed = true;
            }
            if let Some(stripped) = out.strip_prefix(artifact) {
                out = stripped.trim_start().to_string();
                changed = true;
            }
        }
    }
    out
}

/// If a tool result carries a replacement task list in its structured
/// data (`{"todos": [...]}`), apply the whole-list replacement and notify
/// the observer. Identified by data shape, not by tool name.
fn apply_todo_update(result: &ToolResult, todos: &mut TodoList, observers: &RunObservers) {
    let Some(data) = &result.data else { return };
    let Some(raw) = data.get("todos") else { return };
    match serde_json::from_value::<Vec<TodoItem>>(raw.clone()) {
        Ok(items) => {
            todos.replace(items);
            observers.todo_update(todos);
        }
        Err(err) => {
            warn!(error = %err, "Tool returned an unparseable todo list, ignoring");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ironloop_core::error::ToolError;
    use ironloop_core::message::Role;
    use ironloop_core::tool::{Tool, ToolControl};

    struct UpperTool;

    #[async_trait]
    impl Tool for UpperTool {
        fn name(&self) -> &str {
            "upper"
        }
        fn description(&self) -> &str {
            "Uppercases text"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object", "properties": {"text": {"type": "string"}}})
        }
        async fn execute(&self, call: &ToolCall) -> Result<ToolResult, ToolError> {
            let text = call.arguments["text"].as_str().unwrap_or("");
            Ok(ToolResult::ok(&call.id, text.to_uppercase()))
        }
    }

    struct FinishTool {
        fail: bool,
    }

    #[async_trait]
    impl Tool for FinishTool {
        fn name(&self) -> &str {
            "finish"
        }
        fn description(&self) -> &str {
            "Deliver the final answer"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object", "properties": {"answer": {"type": "string"}}})
        }
        async fn execute(&self, call: &ToolCall) -> Result<ToolResult, ToolError> {
            if self.fail {
                let mut result = ToolResult::failure(&call.id, "answer missing");
                result.control = ToolControl::Terminal;
                Ok(result)
            } else {
                let answer = call.arguments["answer"].as_str().unwrap_or("").to_string();
                Ok(ToolResult::terminal(&call.id, answer))
            }
        }
    }

    fn registry_with(tools: Vec<Box<dyn Tool>>) -> Arc<ToolRegistry> {
        let mut registry = ToolRegistry::new();
        for tool in tools {
            registry.register(tool);
        }
        Arc::new(registry)
    }

    fn mk_call(id: &str, name: &str, args: &str) -> MessageToolCall {
        MessageToolCall::new(id, name, args)
    }

    async fn run_batch(
        dispatcher: &mut ToolCallDispatcher,
        calls: &[MessageToolCall],
    ) -> (DispatchOutcome, Vec<Message>, Vec<ToolResult>) {
        let mut messages = Vec::new();
        let mut history = Vec::new();
        let mut todos = TodoList::new();
        let outcome = dispatcher
            .dispatch_batch(
                calls,
                &mut messages,
                &mut history,
                &mut todos,
                &RunObservers::default(),
                &CancelToken::new(),
                "partial answer",
            )
            .await;
        (outcome, messages, history)
    }

    #[tokio::test]
    async fn one_tool_message_per_call_in_order() {
        let mut dispatcher = ToolCallDispatcher::new(
            registry_with(vec![Box::new(UpperTool)]),
            DEFAULT_TERMINAL_FAILURE_CEILING,
        );
        let calls = vec![
            mk_call("c1", "upper", r#"{"text": "one"}"#),
            mk_call("c2", "upper", r#"{"text": "two"}"#),
            mk_call("c3", "upper", r#"{"text": "three"}"#),
        ];

        let (outcome, messages, history) = run_batch(&mut dispatcher, &calls).await;
        assert_eq!(outcome, DispatchOutcome::Continue);
        assert_eq!(messages.len(), 3);
        assert_eq!(history.len(), 3);
        for (msg, call) in messages.iter().zip(&calls) {
            assert_eq!(msg.role, Role::Tool);
            assert_eq!(msg.tool_call_id.as_deref(), Some(call.id.as_str()));
        }
        assert_eq!(messages[0].content, "ONE");
        assert_eq!(messages[2].content, "THREE");
    }

    #[tokio::test]
    async fn malformed_json_degrades_to_error_message() {
        let mut dispatcher = ToolCallDispatcher::new(
            registry_with(vec![Box::new(UpperTool)]),
            DEFAULT_TERMINAL_FAILURE_CEILING,
        );
        let calls = vec![mk_call("c1", "upper", "{broken json")];

        let (outcome, messages, history) = run_batch(&mut dispatcher, &calls).await;
        assert_eq!(outcome, DispatchOutcome::Continue);
        assert_eq!(messages.len(), 1);
        assert!(messages[0].content.contains("Invalid JSON arguments"));
        assert!(!history[0].success);
    }

    #[tokio::test]
    async fn unknown_tool_is_not_fatal() {
        let mut dispatcher = ToolCallDispatcher::new(
            registry_with(vec![]),
            DEFAULT_TERMINAL_FAILURE_CEILING,
        );
        let calls = vec![mk_call("c1", "no_such_tool", "{}")];

        let (outcome, messages, _) = run_batch(&mut dispatcher, &calls).await;
        assert_eq!(outcome, DispatchOutcome::Continue);
        assert!(messages[0].content.contains("no_such_tool"));
    }

    #[tokio::test]
    async fn terminal_success_stops_mid_batch() {
        let mut dispatcher = ToolCallDispatcher::new(
            registry_with(vec![Box::new(UpperTool), Box::new(FinishTool { fail: false })]),
            DEFAULT_TERMINAL_FAILURE_CEILING,
        );
        let calls = vec![
            mk_call("c1", "finish", r#"{"answer": "all done"}"#),
            mk_call("c2", "upper", r#"{"text": "never runs"}"#),
        ];

        let (outcome, messages, history) = run_batch(&mut dispatcher, &calls).await;
        assert_eq!(
            outcome,
            DispatchOutcome::Terminal {
                final_text: "all done".into()
            }
        );
        // The queued second call was not executed
        assert_eq!(messages.len(), 1);
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn terminal_failures_force_terminate_at_ceiling() {
        let mut dispatcher =
            ToolCallDispatcher::new(registry_with(vec![Box::new(FinishTool { fail: true })]), 3);

        for expected_failures in 1..=2u32 {
            let calls = vec![mk_call("c", "finish", "{}")];
            let (outcome, _, _) = run_batch(&mut dispatcher, &calls).await;
            assert_eq!(outcome, DispatchOutcome::Continue);
            assert_eq!(dispatcher.terminal_failures(), expected_failures);
        }

        // Third failure hits the ceiling
        let calls = vec![mk_call("c", "finish", "{}")];
        let (outcome, _, _) = run_batch(&mut dispatcher, &calls).await;
        assert_eq!(
            outcome,
            DispatchOutcome::Forced {
                final_text: "partial answer".into()
            }
        );
        assert_eq!(dispatcher.terminal_failures(), 3);
    }

    #[tokio::test]
    async fn cancellation_stops_before_dispatch() {
        let mut dispatcher = ToolCallDispatcher::new(
            registry_with(vec![Box::new(UpperTool)]),
            DEFAULT_TERMINAL_FAILURE_CEILING,
        );
        let cancel = CancelToken::new();
        cancel.cancel();

        let mut messages = Vec::new();
        let mut history = Vec::new();
        let mut todos = TodoList::new();
        let outcome = dispatcher
            .dispatch_batch(
                &[mk_call("c1", "upper", r#"{"text": "x"}"#)],
                &mut messages,
                &mut history,
                &mut todos,
                &RunObservers::default(),
                &cancel,
                "",
            )
            .await;
        assert_eq!(outcome, DispatchOutcome::Aborted);
        assert!(messages.is_empty());
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn todo_data_replaces_list() {
        struct TodoTool;

        #[async_trait]
        impl Tool for TodoTool {
            fn name(&self) -> &str {
                "todo_write"
            }
            fn description(&self) -> &str {
                "Rewrites the task list"
            }
            fn parameters_schema(&self) -> serde_json::Value {
                serde_json::json!({"type": "object"})
            }
            async fn execute(&self, call: &ToolCall) -> Result<ToolResult, ToolError> {
                let items = vec![TodoItem::new("task one"), TodoItem::new("task two")];
                Ok(ToolResult::ok(&call.id, "updated").with_data(
                    serde_json::json!({ "todos": serde_json::to_value(&items).unwrap() }),
                ))
            }
        }

        let mut dispatcher = ToolCallDispatcher::new(
            registry_with(vec![Box::new(TodoTool)]),
            DEFAULT_TERMINAL_FAILURE_CEILING,
        );
        let mut messages = Vec::new();
        let mut history = Vec::new();
        let mut todos = TodoList::new();
        let outcome = dispatcher
            .dispatch_batch(
                &[mk_call("c1", "todo_write", "{}")],
                &mut messages,
                &mut history,
                &mut todos,
                &RunObservers::default(),
                &CancelToken::new(),
                "",
            )
            .await;
        assert_eq!(outcome, DispatchOutcome::Continue);
        assert_eq!(todos.len(), 2);
        assert_eq!(todos.items()[0].title, "task one");
    }

    #[tokio::test]
    async fn denied_call_becomes_failure_result() {
        let mut dispatcher = ToolCallDispatcher::new(
            registry_with(vec![Box::new(UpperTool)]),
            DEFAULT_TERMINAL_FAILURE_CEILING,
        )
        .with_approval_required(true);

        let observers = RunObservers::new().on_ask_user(|_| false);
        let mut messages = Vec::new();
        let mut history = Vec::new();
        let mut todos = TodoList::new();
        let outcome = dispatcher
            .dispatch_batch(
                &[mk_call("c1", "upper", r#"{"text": "x"}"#)],
                &mut messages,
                &mut history,
                &mut todos,
                &observers,
                &CancelToken::new(),
                "",
            )
            .await;
        assert_eq!(outcome, DispatchOutcome::Continue);
        assert!(!history[0].success);
        assert!(messages[0].content.contains("denied"));
    }

    #[test]
    fn strip_code_fence_variants() {
        assert_eq!(strip_code_fence("{\"a\": 1}"), "{\"a\": 1}");
        assert_eq!(strip_code_fence("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_code_fence("```\n{}\n```"), "{}");
    }

    #[test]
    fn sanitize_strips_markup_artifacts() {
        let value = serde_json::json!({
            "path": "src/main.rs</tool_call>",
            "nested": { "cmd": "<tool_call>ls -la" },
            "count": 3
        });
        let clean = sanitize_arguments(value);
        assert_eq!(clean["path"], "src/main.rs");
        assert_eq!(clean["nested"]["cmd"], "ls -la");
        assert_eq!(clean["count"], 3);
    }
}
