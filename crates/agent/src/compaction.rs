//! Context-overflow recovery — compacts history so the run can continue.
//!
//! Invoked at most once per run, when the provider reports the
//! distinguished context-overflow condition. The older portion of the
//! conversation is summarized by a separate completion call; the system
//! message (if any) is preserved and prepended, the summary follows, and
//! the most recent turns are kept verbatim. On failure the caller
//! re-raises the original overflow error — bounding recovery to one
//! attempt prevents an infinite compact/overflow cycle.

use crate::assembler::ConversationAssembler;
use ironloop_core::error::ProviderError;
use ironloop_core::message::{Message, Role};
use ironloop_core::provider::{Provider, ProviderRequest};
use std::sync::Arc;
use tracing::{debug, info};

/// How many trailing messages survive compaction verbatim.
const DEFAULT_KEEP_RECENT: usize = 10;

/// The context recovery policy.
pub struct ContextRecoveryPolicy {
    provider: Arc<dyn Provider>,
    model: String,
    keep_recent: usize,
}

impl ContextRecoveryPolicy {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            keep_recent: DEFAULT_KEEP_RECENT,
        }
    }

    /// Override how many trailing messages are kept verbatim.
    pub fn with_keep_recent(mut self, keep: usize) -> Self {
        self.keep_recent = keep;
        self
    }

    /// Compact the conversation.
    ///
    /// Returns the replacement message list; the caller swaps it in
    /// wholesale. Errors propagate so the caller can re-raise the
    /// original overflow.
    pub async fn compact(
        &self,
        messages: &[Message],
    ) -> Result<Vec<Message>, ProviderError> {
        let system: Option<&Message> = messages.first().filter(|m| m.role == Role::System);
        let body: &[Message] = if system.is_some() {
            &messages[1..]
        } else {
            messages
        };

        if body.len() <= self.keep_recent {
            // Nothing old enough to summarize; keep the list as-is. The
            // caller's retry will surface a second overflow if the window
            // is genuinely too small.
            debug!(len = body.len(), "Nothing to compact, history already short");
            return Ok(messages.to_vec());
        }

        let split = body.len() - self.keep_recent;
        let (older, recent) = body.split_at(split);

        let summary = self.summarize(older).await?;

        let mut compacted = Vec::with_capacity(self.keep_recent + 2);
        if let Some(sys) = system {
            compacted.push(sys.clone());
        }
        compacted.push(Message::user(format!(
            "Summary of the earlier conversation (compacted to fit the \
             context window):\n{summary}"
        )));
        compacted.extend(recent.iter().cloned());

        // The split can strand tool results whose assistant turn was
        // summarized away.
        let compacted = ConversationAssembler::default().repair(&compacted);

        info!(
            before = messages.len(),
            after = compacted.len(),
            "Compacted conversation history"
        );
        Ok(compacted)
    }

    /// Summarize the older history with a dedicated completion call.
    async fn summarize(&self, older: &[Message]) -> Result<String, ProviderError> {
        let mut transcript = String::new();
        for msg in older {
            let who = match msg.role {
                Role::System => continue,
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::Tool => "tool",
            };
            let preview: String = msg.content.chars().take(600).collect();
            transcript.push_str(&format!("{who}: {preview}\n"));
            for call in &msg.tool_calls {
                transcript.push_str(&format!("assistant called {}\n", call.name));
            }
        }

        let messages = vec![
            Message::system(
                "Summarize this coding-assistant session transcript. Keep \
                 every fact needed to continue the work: files touched, \
                 decisions made, errors seen, remaining tasks. Be dense and \
                 factual.",
            ),
            Message::user(transcript),
        ];

        let req = ProviderRequest::new(&self.model, messages).with_temperature(0.2);
        let response = self.provider.complete(req).await?;
        Ok(response.message.content)
    }
}
