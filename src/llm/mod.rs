//! Language-model access.
//!
//! `LlmProvider` is the narrow interface the pipeline consumes: one bounded
//! chat completion and one embedding call. `OpenAiProvider` speaks the
//! OpenAI-compatible HTTP surface.

mod openai;
mod provider;
mod types;

pub use openai::OpenAiProvider;
pub use provider::LlmProvider;
pub use types::{ChatMessage, ChatRequest};
