//! Upstream LLM clients
//!
//! One wire client per vendor (OpenAI chat completions, Anthropic messages,
//! Gemini generateContent). All implement [`LlmProvider`] with a non-streaming
//! `complete` and an SSE-backed `stream`.

pub mod anthropic;
pub mod google;
pub mod openai;
pub mod sse;
pub mod types;

pub use anthropic::AnthropicProvider;
pub use google::GoogleProvider;
pub use openai::OpenAiProvider;
pub use types::{DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE, LlmProvider, TextStream};
