//! Provider trait shared by the upstream wire clients

use anyhow::Result;
use async_trait::async_trait;
use futures_util::stream::BoxStream;

/// A stream of text deltas from one upstream call
pub type TextStream = BoxStream<'static, Result<String>>;

/// Default sampling temperature for every upstream
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Default completion budget for every upstream
pub const DEFAULT_MAX_TOKENS: u32 = 1000;

/// Trait that all upstream LLM clients implement
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Human-readable provider name (e.g. "anthropic", "openai")
    fn provider_name(&self) -> &str;

    /// Model identifier (e.g. "claude-3-haiku-20240307", "gpt-4-turbo")
    fn model(&self) -> &str;

    /// Single non-streaming call returning the complete text
    async fn complete(&self, system: &str, prompt: &str) -> Result<String>;

    /// Streaming call yielding text deltas in arrival order
    async fn stream(&self, system: &str, prompt: &str) -> Result<TextStream>;
}
