//! The agent loop — drives a run from instruction to terminal state.
//!
//! Lifecycle: planning hand-off (optional), then bounded tool-execution
//! iterations. Each iteration sends the conversation plus the tool schema
//! list to the provider, appends the assistant turn, and dispatches any
//! tool calls. A run ends in exactly one of three states:
//!
//! - `Completed` — the terminal capability succeeded, planning answered
//!   directly, or a degraded completion was accepted (no-tool-reply budget,
//!   terminal-failure ceiling, or iteration ceiling exhausted with usable
//!   text in hand).
//! - `Aborted` — the cancel token fired. Checked before planning, at the
//!   top of every iteration, and before each tool dispatch; in-flight
//!   completion calls are raced against the token. The task list is
//!   cleared on abort.
//! - `Failed` — a provider transport error or a second context overflow.
//!
//! Only one run may be active per agent instance; a concurrent `run()`
//! call is rejected with [`Error::RunActive`] rather than queued.

use ironloop_core::cancel::CancelToken;
use ironloop_core::error::{Error, Result};
use ironloop_core::message::Message;
use ironloop_core::provider::{Provider, ProviderRequest};
use ironloop_core::todo::{TodoItem, TodoList};
use ironloop_core::tool::{ToolRegistry, ToolResult};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::assembler::{system_context_for, ConversationAssembler, DEFAULT_MAX_MESSAGES};
use crate::compaction::ContextRecoveryPolicy;
use crate::dispatcher::{
    DispatchOutcome, ToolCallDispatcher, DEFAULT_TERMINAL_FAILURE_CEILING,
};
use crate::observers::RunObservers;
use crate::planner::PlanningCoordinator;

/// Default iteration ceiling per run.
pub const DEFAULT_MAX_ITERATIONS: u32 = 50;

/// Default budget of consecutive assistant turns without tool calls.
pub const DEFAULT_NO_TOOL_REPLY_BUDGET: u32 = 3;

/// Configuration for one agent run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Model identifier passed to the provider.
    pub model: String,
    /// Sampling temperature for iteration completion calls.
    pub temperature: f32,
    /// Hard ceiling on tool-execution iterations.
    pub max_iterations: u32,
    /// Working directory reported in the synthesized system message.
    pub working_directory: PathBuf,
    /// Whether the working directory is a git repository.
    pub is_git_repo: bool,
    /// Run the planning hand-off before iterating.
    pub enable_planning: bool,
    /// Resume with `initial_todos` instead of planning afresh.
    pub resume_existing_plan: bool,
    /// Task list used when resuming.
    pub initial_todos: Vec<TodoItem>,
    /// Consecutive no-tool-call replies tolerated before accepting the
    /// text as a degraded completion.
    pub no_tool_reply_budget: u32,
    /// Consecutive terminal-capability failures before force-terminating.
    pub terminal_failure_ceiling: u32,
    /// Message-count ceiling for conversation assembly.
    pub max_messages: usize,
    /// Consult the approval hook before every tool call.
    pub require_approval: bool,
}

impl RunConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            temperature: 0.7,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            working_directory: PathBuf::from("."),
            is_git_repo: false,
            enable_planning: true,
            resume_existing_plan: false,
            initial_todos: Vec::new(),
            no_tool_reply_budget: DEFAULT_NO_TOOL_REPLY_BUDGET,
            terminal_failure_ceiling: DEFAULT_TERMINAL_FAILURE_CEILING,
            max_messages: DEFAULT_MAX_MESSAGES,
            require_approval: false,
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Completed,
    Aborted,
    Failed,
}

/// The final result of a run.
#[derive(Debug, Clone)]
pub struct AgentResult {
    pub status: RunStatus,
    /// Whether usable final text was produced. Degraded completions
    /// (forced termination, exhausted reply budget) still report true.
    pub success: bool,
    /// The final answer text, empty when none was produced.
    pub final_text: String,
    /// The full conversation as of run end.
    pub messages: Vec<Message>,
    /// Every tool result produced during the run, in execution order.
    pub tool_call_history: Vec<ToolResult>,
    /// Iterations consumed.
    pub iterations: u32,
    /// Failure or abort reason.
    pub error: Option<String>,
}

/// The agent loop. One instance serves one run at a time.
pub struct AgentLoop {
    provider: Arc<dyn Provider>,
    registry: Arc<ToolRegistry>,
    config: RunConfig,
    run_gate: Mutex<()>,
}

impl AgentLoop {
    pub fn new(provider: Arc<dyn Provider>, registry: Arc<ToolRegistry>, config: RunConfig) -> Self {
        Self {
            provider,
            registry,
            config,
            run_gate: Mutex::new(()),
        }
    }

    /// Execute one run.
    ///
    /// `prior` is earlier conversation to continue from (repaired and
    /// truncated during assembly). The only error this returns is
    /// [`Error::RunActive`]; every other outcome is an [`AgentResult`].
    pub async fn run(
        &self,
        instruction: &str,
        prior: &[Message],
        observers: RunObservers,
        cancel: CancelToken,
    ) -> Result<AgentResult> {
        let _guard = self.run_gate.try_lock().map_err(|_| Error::RunActive)?;

        info!(model = %self.config.model, "Starting agent run");
        let mut state = RunState::new(&self.config);

        // Cancellation checkpoint: before planning.
        if cancel.is_cancelled() {
            return Ok(state.abort(&observers));
        }

        if self.config.resume_existing_plan {
            state.todos.replace(self.config.initial_todos.clone());
            observers.todo_update(&state.todos);
        } else if self.config.enable_planning {
            let planner = PlanningCoordinator::new(self.provider.clone(), &self.config.model);
            let outcome = tokio::select! {
                outcome = planner.plan(instruction, prior) => outcome,
                _ = cancel.cancelled() => return Ok(state.abort(&observers)),
            };

            if let Some(reply) = outcome.direct_response {
                debug!("Planning answered directly, skipping iterations");
                state.assemble(instruction, prior, self.capability_names());
                let assistant = Message::assistant(&reply);
                observers.message(&assistant);
                state.messages.push(assistant);
                return Ok(state.complete(reply, &observers));
            }

            state.todos.replace(outcome.todos);
            observers.todo_update(&state.todos);
        }

        state.assemble(instruction, prior, self.capability_names());
        self.iterate(&mut state, &observers, &cancel).await
    }

    fn capability_names(&self) -> Vec<String> {
        self.registry.names().iter().map(|n| n.to_string()).collect()
    }

    /// The tool-execution iterations.
    async fn iterate(
        &self,
        state: &mut RunState,
        observers: &RunObservers,
        cancel: &CancelToken,
    ) -> Result<AgentResult> {
        let mut dispatcher =
            ToolCallDispatcher::new(self.registry.clone(), self.config.terminal_failure_ceiling)
                .with_approval_required(self.config.require_approval);
        let recovery = ContextRecoveryPolicy::new(self.provider.clone(), &self.config.model);

        let mut no_tool_replies = 0u32;
        let mut recovered_once = false;

        for iteration in 1..=self.config.max_iterations {
            state.iterations = iteration;

            // Cancellation checkpoint: top of each iteration.
            if cancel.is_cancelled() {
                return Ok(state.abort(observers));
            }

            // The compacted retry stays inside this iteration, so recovery on
            // the final iteration still gets its one retried call.
            let turn = loop {
                let request = ProviderRequest::new(&self.config.model, state.messages.clone())
                    .with_tools(self.registry.definitions())
                    .with_temperature(self.config.temperature);

                let response = tokio::select! {
                    res = self.provider.complete(request) => res,
                    _ = cancel.cancelled() => return Ok(state.abort(observers)),
                };

                match response {
                    Ok(response) => break response.message,
                    Err(err) if err.is_context_overflow() && !recovered_once => {
                        info!("Context overflow, attempting one-shot compaction");
                        recovered_once = true;
                        match recovery.compact(&state.messages).await {
                            Ok(compacted) => state.messages = compacted,
                            Err(compact_err) => {
                                warn!(error = %compact_err, "Compaction failed, re-raising overflow");
                                return Ok(state.fail(err.to_string(), observers));
                            }
                        }
                    }
                    Err(err) => {
                        return Ok(state.fail(err.to_string(), observers));
                    }
                }
            };

            observers.message(&turn);
            state.messages.push(turn.clone());
            if !turn.content.trim().is_empty() {
                state.last_text = turn.content.clone();
            }

            if turn.tool_calls.is_empty() {
                no_tool_replies += 1;
                // The budget counts tolerated corrective rounds; the reply
                // after the last one ends the run with its text.
                if no_tool_replies > self.config.no_tool_reply_budget {
                    debug!(
                        replies = no_tool_replies,
                        "Reply budget exhausted, accepting text as completion"
                    );
                    return Ok(state.complete(state.last_text.clone(), observers));
                }

                let nudge = Message::user(no_tool_corrective(
                    no_tool_replies,
                    detect_inline_tool_markup(&turn.content),
                ));
                observers.message(&nudge);
                state.messages.push(nudge);
                continue;
            }

            no_tool_replies = 0;
            let fallback = state.last_text.clone();
            let outcome = dispatcher
                .dispatch_batch(
                    &turn.tool_calls,
                    &mut state.messages,
                    &mut state.tool_call_history,
                    &mut state.todos,
                    observers,
                    cancel,
                    &fallback,
                )
                .await;

            match outcome {
                DispatchOutcome::Continue => {}
                DispatchOutcome::Terminal { final_text } => {
                    return Ok(state.complete(final_text, observers));
                }
                DispatchOutcome::Forced { final_text } => {
                    warn!("Terminal capability kept failing, forcing completion");
                    return Ok(state.complete(final_text, observers));
                }
                DispatchOutcome::Aborted => {
                    return Ok(state.abort(observers));
                }
            }
        }

        // Iteration exhaustion is a degraded completion, not a failure:
        // accumulated work is still returned to the caller.
        warn!(
            max = self.config.max_iterations,
            "Iteration ceiling reached without a terminal result"
        );
        Ok(state.complete("Maximum iterations reached".into(), observers))
    }
}

/// Mutable state for one run, with the terminal-state constructors.
struct RunState {
    messages: Vec<Message>,
    todos: TodoList,
    tool_call_history: Vec<ToolResult>,
    iterations: u32,
    last_text: String,
    assembler: ConversationAssembler,
    config: RunConfig,
}

impl RunState {
    fn new(config: &RunConfig) -> Self {
        Self {
            messages: Vec::new(),
            todos: TodoList::new(),
            tool_call_history: Vec::new(),
            iterations: 0,
            last_text: String::new(),
            assembler: ConversationAssembler::new(config.max_messages),
            config: config.clone(),
        }
    }

    fn assemble(&mut self, instruction: &str, prior: &[Message], capability_names: Vec<String>) {
        let context = system_context_for(
            &self.config.working_directory,
            self.config.is_git_repo,
            capability_names,
        );
        self.messages = self
            .assembler
            .assemble(prior, instruction, &context, &self.todos);
    }

    fn complete(&mut self, final_text: String, observers: &RunObservers) -> AgentResult {
        self.finish(RunStatus::Completed, true, final_text, None, observers)
    }

    fn abort(&mut self, observers: &RunObservers) -> AgentResult {
        // A stale plan must not leak into the next run.
        self.todos.clear();
        observers.todo_update(&self.todos);
        observers.error("run cancelled");
        self.finish(
            RunStatus::Aborted,
            false,
            String::new(),
            Some("run cancelled".into()),
            observers,
        )
    }

    fn fail(&mut self, error: String, observers: &RunObservers) -> AgentResult {
        observers.error(&error);
        self.finish(RunStatus::Failed, false, self.last_text.clone(), Some(error), observers)
    }

    fn finish(
        &mut self,
        status: RunStatus,
        success: bool,
        final_text: String,
        error: Option<String>,
        observers: &RunObservers,
    ) -> AgentResult {
        let result = AgentResult {
            status,
            success,
            final_text,
            messages: std::mem::take(&mut self.messages),
            tool_call_history: std::mem::take(&mut self.tool_call_history),
            iterations: self.iterations,
            error,
        };
        info!(status = ?result.status, iterations = result.iterations, "Run finished");
        observers.complete(&result);
        result
    }
}

/// Fragments that suggest the model emitted tool-call markup as plain
/// text instead of a structured call.
const INLINE_MARKUP_HINTS: &[&str] = &["<tool_call", "</tool_call", "<invoke", "\"tool_calls\""];

fn detect_inline_tool_markup(text: &str) -> bool {
    INLINE_MARKUP_HINTS.iter().any(|hint| text.contains(hint))
}

fn no_tool_corrective(reply_count: u32, had_markup: bool) -> String {
    if had_markup {
        return "Your reply contained tool-call markup as plain text instead of a \
                structured tool call. Use the tool-calling interface: invoke one \
                of the available tools, or call `finish` with your final answer."
            .into();
    }
    match reply_count {
        1 => "You replied without calling any tool. Invoke one of the available \
              tools to make progress, or call `finish` with your final answer."
            .into(),
        _ => "You are still replying without tool calls. This is your last \
              chance: call a tool now, or call `finish` to deliver your answer."
            .into(),
    }
}
