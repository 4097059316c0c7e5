//! Shared test doubles for the agent crate.
//!
//! [`ScriptedProvider`] serves a fixed queue of completion outcomes in
//! call order, so a test can script an entire run: planning turns, tool
//! turns, provider errors, overflow conditions. Exhausting the script is
//! a test bug and panics with the call number.

use ironloop_core::error::ProviderError;
use ironloop_core::message::{Message, MessageToolCall};
use ironloop_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

type ScriptedOutcome = Result<ProviderResponse, ProviderError>;

pub struct ScriptedProvider {
    script: Mutex<VecDeque<ScriptedOutcome>>,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(script: Vec<ScriptedOutcome>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
        }
    }

    /// How many completion calls have been made.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(
        &self,
        _request: ProviderRequest,
    ) -> Result<ProviderResponse, ProviderError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| panic!("scripted provider exhausted at call {call}"))
    }
}

/// A scripted text-only assistant turn.
pub fn scripted_text_response(text: &str) -> ScriptedOutcome {
    Ok(response(Message::assistant(text)))
}

/// A scripted assistant turn carrying tool calls.
pub fn scripted_tool_response(calls: Vec<MessageToolCall>, text: &str) -> ScriptedOutcome {
    Ok(response(Message::assistant_with_calls(text, calls)))
}

/// A scripted provider failure.
pub fn scripted_error(err: ProviderError) -> ScriptedOutcome {
    Err(err)
}

fn response(message: Message) -> ProviderResponse {
    ProviderResponse {
        message,
        usage: Some(Usage {
            prompt_tokens: 100,
            completion_tokens: 20,
            total_tokens: 120,
        }),
        model: "mock-model".into(),
    }
}
