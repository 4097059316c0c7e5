//! LLM provider implementations for Ironloop.
//!
//! One implementation covers the vast majority of backends: anything with
//! an OpenAI-compatible chat-completions endpoint.

pub mod openai_compat;

pub use openai_compat::OpenAiCompatProvider;
