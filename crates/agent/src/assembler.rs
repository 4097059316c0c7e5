//! Conversation assembly — builds and repairs the message list fed to
//! each completion call.
//!
//! The assembler takes prior messages (possibly supplied by a
//! caller-controlled store) plus a new user instruction and produces a
//! well-formed list:
//!
//! 1. Tool-result messages whose call id has no matching preceding
//!    assistant tool call are dropped, as are duplicate result ids — one
//!    malformed turn must not corrupt history.
//! 2. History past a fixed message ceiling is truncated from the oldest
//!    end, always preserving a leading system message.
//! 3. Exactly one system message is present: one is injected (built from
//!    working-directory, repo-type, and capability context) if none exists.
//! 4. When a plan exists, the current TODO rendering is appended to the
//!    user's message so the model sees live task status without a second
//!    round trip.
//!
//! Assembly is deterministic: identical inputs produce identical outputs.

use ironloop_core::message::{Message, Role};
use ironloop_core::todo::TodoList;
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, warn};

/// Default ceiling on the number of messages kept in history.
pub const DEFAULT_MAX_MESSAGES: usize = 100;

/// Context used to synthesize the system message when none exists.
#[derive(Debug, Clone, Default)]
pub struct SystemContext {
    /// Absolute working directory of the session.
    pub working_directory: String,
    /// Whether the working directory is a git repository.
    pub is_git_repo: bool,
    /// Names of the enabled capabilities.
    pub capability_names: Vec<String>,
}

impl SystemContext {
    /// Render the synthesized system prompt.
    pub fn render(&self) -> String {
        let repo_kind = if self.is_git_repo {
            "a git repository"
        } else {
            "not a git repository"
        };
        let mut prompt = format!(
            "You are an autonomous coding assistant working in {} ({}). \
             Work step by step and invoke exactly one or more of the \
             available tools on every turn. When the task is finished, call \
             the `finish` tool with your final answer.",
            display_dir(&self.working_directory),
            repo_kind,
        );
        if !self.capability_names.is_empty() {
            prompt.push_str(&format!(
                "\nAvailable tools: {}.",
                self.capability_names.join(", ")
            ));
        }
        prompt
    }
}

fn display_dir(dir: &str) -> &str {
    if dir.is_empty() {
        "an unspecified directory"
    } else {
        dir
    }
}

/// The conversation assembler. Stateless — create one and reuse it.
pub struct ConversationAssembler {
    max_messages: usize,
}

impl ConversationAssembler {
    pub fn new(max_messages: usize) -> Self {
        Self { max_messages }
    }

    /// Assemble a well-formed message list for the next completion call.
    ///
    /// `prior` is repaired and truncated; `instruction` becomes the final
    /// user message, with `todos` rendered into it when a plan exists.
    pub fn assemble(
        &self,
        prior: &[Message],
        instruction: &str,
        context: &SystemContext,
        todos: &TodoList,
    ) -> Vec<Message> {
        let mut messages = self.repair(prior);

        if !messages.iter().any(|m| m.role == Role::System) {
            messages.insert(0, Message::system(context.render()));
        }

        let user_text = if todos.is_empty() {
            instruction.to_string()
        } else {
            format!("{}\n\n{}", instruction, todos.render())
        };
        messages.push(Message::user(user_text));

        // Truncate last so the ceiling holds for the list actually sent,
        // new user message included.
        self.truncate(messages)
    }

    /// Drop tool messages that do not pair with a preceding assistant tool
    /// call, and duplicate tool results for the same call id.
    pub fn repair(&self, messages: &[Message]) -> Vec<Message> {
        let mut seen_calls: HashSet<&str> = HashSet::new();
        let mut answered: HashSet<&str> = HashSet::new();
        let mut repaired = Vec::with_capacity(messages.len());
        let mut dropped = 0usize;

        for msg in messages {
            match msg.role {
                Role::Tool => {
                    let keep = match msg.tool_call_id.as_deref() {
                        Some(id) => seen_calls.contains(id) && answered.insert(id),
                        None => false,
                    };
                    if keep {
                        repaired.push(msg.clone());
                    } else {
                        dropped += 1;
                    }
                }
                _ => {
                    for call in &msg.tool_calls {
                        seen_calls.insert(call.id.as_str());
                    }
                    repaired.push(msg.clone());
                }
            }
        }

        if dropped > 0 {
            warn!(dropped, "Dropped orphaned or duplicate tool results");
        }
        repaired
    }

    /// Truncate from the oldest end past the ceiling, preserving a leading
    /// system message. Idempotent.
    pub fn truncate(&self, mut messages: Vec<Message>) -> Vec<Message> {
        if messages.len() <= self.max_messages {
            return messages;
        }

        let overflow = messages.len() - self.max_messages;
        let has_leading_system = messages
            .first()
            .is_some_and(|m| m.role == Role::System);

        if has_leading_system {
            // Keep index 0, drain the oldest non-system messages after it.
            messages.drain(1..1 + overflow);
        } else {
            messages.drain(0..overflow);
        }

        debug!(
            dropped = overflow,
            remaining = messages.len(),
            "Truncated conversation history"
        );

        // Truncation can strand tool results whose assistant turn was cut.
        self.repair(&messages)
    }
}

impl Default for ConversationAssembler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGES)
    }
}

/// Render the system context for a given path, convenience for callers
/// holding a `Path` rather than a string.
pub fn system_context_for(
    working_directory: &Path,
    is_git_repo: bool,
    capability_names: Vec<String>,
) -> SystemContext {
    SystemContext {
        working_directory: working_directory.display().to_string(),
        is_git_repo,
        capability_names,
    }
}
