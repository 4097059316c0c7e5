//! Planning hand-off — turns a user request into a task list or a direct
//! reply before any tool-execution iterations begin.
//!
//! The planning completion call is constrained to exactly two tool
//! schemas: `create_plan` and `respond_directly`. A text-only reply is an
//! error and is retried (up to 3 attempts) with an escalating corrective
//! message carrying the previous failure. Exhausting the retries falls
//! back to a single synthetic task derived verbatim from the user request:
//! planning never hard-fails the outer loop.
//!
//! A second, lightweight decision call — should a documentation-search
//! task be prepended? — runs in parallel with the planning call via
//! `tokio::join!`, and is skipped entirely by a keyword pre-filter when
//! the request contains no documentation-related term.

use ironloop_core::error::PlanningError;
use ironloop_core::message::{Message, Role};
use ironloop_core::provider::{Provider, ProviderRequest, ToolDefinition};
use ironloop_core::todo::TodoItem;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// Maximum planning attempts before the verbatim fallback.
const MAX_PLAN_ATTEMPTS: u32 = 3;

/// How many trailing history messages are summarized into the planning
/// prompt for context.
const HISTORY_CONTEXT_MESSAGES: usize = 6;

/// Terms that make the docs-decision call worth its latency. False
/// negatives only skip a best-effort optimization.
const DOCS_KEYWORDS: &[&str] = &[
    "docs",
    "documentation",
    "api",
    "library",
    "crate",
    "sdk",
    "reference",
    "usage",
    "example",
];

/// The outcome of the planning hand-off.
#[derive(Debug, Clone)]
pub struct PlanOutcome {
    /// Ordered task list. Empty when `direct_response` is set.
    pub todos: Vec<TodoItem>,

    /// When present, the outer loop short-circuits: no tool iterations.
    pub direct_response: Option<String>,

    /// Whether a documentation-search task was prepended.
    pub docs_search_needed: bool,
}

#[derive(Debug, Deserialize)]
struct CreatePlanArgs {
    tasks: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RespondDirectlyArgs {
    response: String,
}

/// The planning coordinator.
pub struct PlanningCoordinator {
    provider: Arc<dyn Provider>,
    model: String,
}

impl PlanningCoordinator {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }

    /// Produce a plan (or a direct reply) for the user request.
    ///
    /// The docs-decision call runs in parallel with the planning call.
    /// Planning errors degrade to the verbatim single-task fallback.
    pub async fn plan(&self, request: &str, history: &[Message]) -> PlanOutcome {
        let (planned, docs_needed) = tokio::join!(
            self.plan_with_retries(request, history),
            self.decide_docs_search(request),
        );

        let mut outcome = match planned {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(error = %err, "Planning failed, falling back to a single verbatim task");
                PlanOutcome {
                    todos: vec![TodoItem::new(request)],
                    direct_response: None,
                    docs_search_needed: false,
                }
            }
        };

        if docs_needed && outcome.direct_response.is_none() {
            outcome.todos.insert(
                0,
                TodoItem::new("Search the project documentation for context relevant to the request"),
            );
            outcome.docs_search_needed = true;
        }

        outcome
    }

    /// The constrained planning call with escalating retries.
    async fn plan_with_retries(
        &self,
        request: &str,
        history: &[Message],
    ) -> Result<PlanOutcome, ironloop_core::Error> {
        let mut messages = vec![
            Message::system(Self::planning_prompt(history)),
            Message::user(request),
        ];

        let mut last_error = String::new();
        for attempt in 1..=MAX_PLAN_ATTEMPTS {
            let req = ProviderRequest::new(&self.model, messages.clone())
                .with_tools(Self::planning_tools())
                .with_temperature(0.3);

            let response = self.provider.complete(req).await?;
            let turn = response.message;

            match Self::interpret_turn(&turn) {
                Ok(outcome) => {
                    debug!(
                        attempt,
                        tasks = outcome.todos.len(),
                        direct = outcome.direct_response.is_some(),
                        "Planning call succeeded"
                    );
                    return Ok(outcome);
                }
                Err(reason) => {
                    warn!(attempt, %reason, "Planning call returned no usable tool call");
                    last_error = reason.clone();
                    messages.push(turn);
                    messages.push(Message::user(Self::corrective_message(attempt, &reason)));
                }
            }
        }

        debug!(%last_error, "All planning attempts exhausted");
        Err(PlanningError::NoToolCall {
            attempts: MAX_PLAN_ATTEMPTS,
        }
        .into())
    }

    /// Interpret one planning turn. A turn is usable only if it invokes
    /// one of the two permitted tools with parseable arguments.
    fn interpret_turn(turn: &Message) -> Result<PlanOutcome, String> {
        let Some(call) = turn.tool_calls.first() else {
            return Err("reply contained no tool call".into());
        };

        match call.name.as_str() {
            "create_plan" => {
                let args: CreatePlanArgs = serde_json::from_str(&call.arguments)
                    .map_err(|e| format!("create_plan arguments were not valid JSON: {e}"))?;
                if args.tasks.is_empty() {
                    return Err("create_plan returned an empty task list".into());
                }
                Ok(PlanOutcome {
                    todos: args.tasks.into_iter().map(TodoItem::new).collect(),
                    direct_response: None,
                    docs_search_needed: false,
                })
            }
            "respond_directly" => {
                let args: RespondDirectlyArgs = serde_json::from_str(&call.arguments)
                    .map_err(|e| format!("respond_directly arguments were not valid JSON: {e}"))?;
                Ok(PlanOutcome {
                    todos: Vec::new(),
                    direct_response: Some(args.response),
                    docs_search_needed: false,
                })
            }
            other => Err(format!("unknown tool '{other}' — only create_plan and respond_directly are permitted")),
        }
    }

    /// The lightweight parallel decision: should a documentation-search
    /// task be prepended? Skipped by the keyword pre-filter; any error
    /// degrades to "no".
    async fn decide_docs_search(&self, request: &str) -> bool {
        if !docs_keywords_present(request) {
            return false;
        }

        let messages = vec![
            Message::system(
                "You decide whether a coding request needs a documentation \
                 search before work begins. Reply with exactly YES or NO.",
            ),
            Message::user(request),
        ];
        let req = ProviderRequest::new(&self.model, messages).with_temperature(0.0);

        match self.provider.complete(req).await {
            Ok(response) => {
                let answer = response.message.content.trim().to_uppercase();
                answer.starts_with("YES")
            }
            Err(err) => {
                warn!(error = %err, "Docs-decision call failed, skipping docs task");
                false
            }
        }
    }

    fn planning_prompt(history: &[Message]) -> String {
        let mut prompt = String::from(
            "You are the planning stage of a coding assistant. Decide how to \
             handle the user's request by calling exactly one of the two \
             available tools:\n\
             - create_plan: break the request into an ordered list of concrete tasks\n\
             - respond_directly: answer immediately when no tools or code changes are needed\n\
             Never reply with plain text.",
        );

        let tail: Vec<&Message> = history
            .iter()
            .filter(|m| m.role != Role::System)
            .rev()
            .take(HISTORY_CONTEXT_MESSAGES)
            .collect();
        if !tail.is_empty() {
            prompt.push_str("\n\nRecent conversation:\n");
            for msg in tail.iter().rev() {
                let who = match msg.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                    Role::Tool => "tool",
                    Role::System => continue,
                };
                let preview: String = msg.content.chars().take(200).collect();
                prompt.push_str(&format!("{who}: {preview}\n"));
            }
        }
        prompt
    }

    fn corrective_message(attempt: u32, reason: &str) -> String {
        match attempt {
            1 => format!(
                "Your reply was not usable: {reason}. You must call either \
                 create_plan or respond_directly. Do not reply with plain text."
            ),
            2 => format!(
                "Second failure: {reason}. This is your last chance to comply. \
                 Call create_plan with a JSON array of task strings, or \
                 respond_directly with a response string. Any other reply \
                 will be discarded."
            ),
            _ => format!(
                "Final attempt failed: {reason}. Call create_plan or \
                 respond_directly now."
            ),
        }
    }

    /// The two permitted planning tool schemas.
    fn planning_tools() -> Vec<ToolDefinition> {
        vec![
            ToolDefinition {
                name: "create_plan".into(),
                description: "Break the user's request into an ordered list of concrete tasks.".into(),
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "tasks": {
                            "type": "array",
                            "items": { "type": "string" },
                            "description": "Ordered task descriptions"
                        }
                    },
                    "required": ["tasks"]
                }),
            },
            ToolDefinition {
                name: "respond_directly".into(),
                description: "Answer the user immediately; no tasks or tool use are needed.".into(),
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "response": {
                            "type": "string",
                            "description": "The complete reply to the user"
                        }
                    },
                    "required": ["response"]
                }),
            },
        ]
    }
}

/// Keyword pre-filter for the docs-decision call.
fn docs_keywords_present(request: &str) -> bool {
    let lower = request.to_lowercase();
    DOCS_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::*;
    use ironloop_core::error::ProviderError;
    use ironloop_core::message::MessageToolCall;

    fn plan_call(tasks: &[&str]) -> MessageToolCall {
        MessageToolCall::new(
            "call_plan",
            "create_plan",
            serde_json::json!({ "tasks": tasks }).to_string(),
        )
    }

    #[tokio::test]
    async fn plan_from_create_plan_call() {
        let provider = Arc::new(ScriptedProvider::new(vec![scripted_tool_response(
            vec![plan_call(&["read the file", "fix the bug"])],
            "",
        )]));
        let planner = PlanningCoordinator::new(provider, "mock-model");

        let outcome = planner.plan("fix the bug in parser.rs", &[]).await;
        assert!(outcome.direct_response.is_none());
        assert_eq!(outcome.todos.len(), 2);
        assert_eq!(outcome.todos[0].title, "read the file");
        assert!(!outcome.docs_search_needed);
    }

    #[tokio::test]
    async fn direct_response_short_circuits() {
        let provider = Arc::new(ScriptedProvider::new(vec![scripted_tool_response(
            vec![MessageToolCall::new(
                "call_1",
                "respond_directly",
                serde_json::json!({ "response": "Hello! How can I help?" }).to_string(),
            )],
            "",
        )]));
        let planner = PlanningCoordinator::new(provider, "mock-model");

        let outcome = planner.plan("hello", &[]).await;
        assert_eq!(outcome.direct_response.as_deref(), Some("Hello! How can I help?"));
        assert!(outcome.todos.is_empty());
    }

    #[tokio::test]
    async fn text_only_reply_is_retried() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            scripted_text_response("I think we should refactor first."),
            scripted_tool_response(vec![plan_call(&["refactor"])], ""),
        ]));
        let planner = PlanningCoordinator::new(provider.clone(), "mock-model");

        let outcome = planner.plan("refactor this module", &[]).await;
        assert_eq!(outcome.todos.len(), 1);
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn exhausted_retries_fall_back_to_verbatim_task() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            scripted_text_response("no tool call 1"),
            scripted_text_response("no tool call 2"),
            scripted_text_response("no tool call 3"),
        ]));
        let planner = PlanningCoordinator::new(provider, "mock-model");

        let outcome = planner.plan("migrate the build to bazel", &[]).await;
        assert!(outcome.direct_response.is_none());
        assert_eq!(outcome.todos.len(), 1);
        assert_eq!(outcome.todos[0].title, "migrate the build to bazel");
    }

    #[tokio::test]
    async fn provider_error_falls_back_to_verbatim_task() {
        let provider = Arc::new(ScriptedProvider::new(vec![scripted_error(
            ProviderError::Network("connection refused".into()),
        )]));
        let planner = PlanningCoordinator::new(provider, "mock-model");

        let outcome = planner.plan("rename the module", &[]).await;
        assert_eq!(outcome.todos.len(), 1);
        assert_eq!(outcome.todos[0].title, "rename the module");
    }

    #[tokio::test]
    async fn docs_task_prepended_when_decision_says_yes() {
        // Keyword "api" passes the pre-filter, so two calls run: planning
        // and the docs decision. The scripted provider serves them in call
        // order; join! polls the planning future first.
        let provider = Arc::new(ScriptedProvider::new(vec![
            scripted_tool_response(vec![plan_call(&["wire up the endpoint"])], ""),
            scripted_text_response("YES"),
        ]));
        let planner = PlanningCoordinator::new(provider, "mock-model");

        let outcome = planner.plan("add an api endpoint for uploads", &[]).await;
        assert!(outcome.docs_search_needed);
        assert_eq!(outcome.todos.len(), 2);
        assert!(outcome.todos[0].title.to_lowercase().contains("documentation"));
        assert_eq!(outcome.todos[1].title, "wire up the endpoint");
    }

    #[tokio::test]
    async fn prefilter_skips_docs_decision_entirely() {
        let provider = Arc::new(ScriptedProvider::new(vec![scripted_tool_response(
            vec![plan_call(&["fix typo"])],
            "",
        )]));
        let planner = PlanningCoordinator::new(provider.clone(), "mock-model");

        let outcome = planner.plan("fix the typo in the greeting", &[]).await;
        assert!(!outcome.docs_search_needed);
        // Only the planning call was made
        assert_eq!(provider.call_count(), 1);
    }

    #[test]
    fn keyword_prefilter_matches() {
        assert!(docs_keywords_present("how do I use this library?"));
        assert!(docs_keywords_present("check the API reference"));
        assert!(!docs_keywords_present("fix the typo in the greeting"));
    }

    #[test]
    fn unknown_tool_is_rejected() {
        let turn = Message::assistant_with_calls(
            "",
            vec![MessageToolCall::new("c", "make_coffee", "{}")],
        );
        let err = PlanningCoordinator::interpret_turn(&turn).unwrap_err();
        assert!(err.contains("make_coffee"));
    }

    #[test]
    fn malformed_arguments_are_rejected() {
        let turn = Message::assistant_with_calls(
            "",
            vec![MessageToolCall::new("c", "create_plan", "{not json")],
        );
        let err = PlanningCoordinator::interpret_turn(&turn).unwrap_err();
        assert!(err.contains("valid JSON"));
    }
}
