//! Provider adapter: one upstream call exposed as cumulative increments
//!
//! The adapter hides which strategy produced the text (upstream stream,
//! single upstream call, or the mock generator) and never surfaces upstream
//! failures: callers always receive a complete [`Generation`], tagged with
//! its [`Source`]. The only error is [`BoardroomError::Cancelled`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{BoardroomError, BoardroomResult};
use crate::fallback::{fallback_text, word_increments};
use crate::providers::LlmProvider;
use crate::types::{CompletionRequest, Generation, Increment, ProviderId, Source};

/// Default per-call upstream timeout
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default pause between simulated words
pub const DEFAULT_MOCK_WORD_DELAY_MS: u64 = 50;

/// How an adapter obtains its text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdapterMode {
    /// Upstream streaming API, one increment per delta
    #[default]
    Stream,
    /// One non-streaming upstream call, one increment
    Single,
    /// No network; generator text streamed word by word
    Mock,
}

impl AdapterMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stream => "stream",
            Self::Single => "single",
            Self::Mock => "mock",
        }
    }

    /// Whether this mode talks to an upstream at all
    pub fn is_live(&self) -> bool {
        !matches!(self, Self::Mock)
    }
}

impl std::fmt::Display for AdapterMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AdapterMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "stream" => Ok(Self::Stream),
            "single" => Ok(Self::Single),
            "mock" => Ok(Self::Mock),
            other => Err(format!("unknown adapter mode: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AdapterOptions {
    pub mode: AdapterMode,
    pub timeout: Duration,
    pub mock_word_delay: Duration,
}

impl Default for AdapterOptions {
    fn default() -> Self {
        Self {
            mode: AdapterMode::default(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            mock_word_delay: Duration::from_millis(DEFAULT_MOCK_WORD_DELAY_MS),
        }
    }
}

/// Adapter for one provider. Stateless apart from its injected upstream.
pub struct ProviderAdapter {
    id: ProviderId,
    upstream: Option<Arc<dyn LlmProvider>>,
    options: AdapterOptions,
}

impl std::fmt::Debug for ProviderAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderAdapter")
            .field("id", &self.id)
            .field("upstream", &self.upstream.as_ref().map(|u| u.model().to_string()))
            .field("options", &self.options)
            .finish()
    }
}

impl ProviderAdapter {
    /// Adapter backed by a live upstream client
    pub fn new(id: ProviderId, upstream: Arc<dyn LlmProvider>, options: AdapterOptions) -> Self {
        Self {
            id,
            upstream: Some(upstream),
            options,
        }
    }

    /// Adapter with no upstream; every call is served by the generator
    pub fn offline(id: ProviderId, options: AdapterOptions) -> Self {
        Self {
            id,
            upstream: None,
            options,
        }
    }

    pub fn id(&self) -> ProviderId {
        self.id
    }

    pub fn mode(&self) -> AdapterMode {
        self.options.mode
    }

    pub fn has_upstream(&self) -> bool {
        self.upstream.is_some()
    }

    pub fn model(&self) -> Option<&str> {
        self.upstream.as_ref().map(|u| u.model())
    }

    /// Run one call, reporting cumulative increments to `on_increment`.
    ///
    /// Content passed to `on_increment` never shrinks and the last increment
    /// is final. Upstream failures are recovered here.
    pub async fn generate<F>(
        &self,
        request: &CompletionRequest,
        cancel: &CancellationToken,
        mut on_increment: F,
    ) -> BoardroomResult<Generation>
    where
        F: FnMut(Increment) + Send,
    {
        if cancel.is_cancelled() {
            return Err(BoardroomError::Cancelled);
        }

        let upstream = match (&self.upstream, self.options.mode) {
            (Some(upstream), mode) if mode.is_live() => upstream.clone(),
            _ => return self.simulate(request, cancel, &mut on_increment).await,
        };

        let mut accumulated = String::new();
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(BoardroomError::Cancelled),
            res = tokio::time::timeout(
                self.options.timeout,
                self.call_upstream(upstream.as_ref(), request, cancel, &mut accumulated, &mut on_increment),
            ) => res,
        };

        if cancel.is_cancelled() {
            return Err(BoardroomError::Cancelled);
        }

        let failure = match outcome {
            Ok(Ok(())) if !accumulated.is_empty() => None,
            Ok(Ok(())) => Some(anyhow!("empty response")),
            Ok(Err(e)) => Some(e),
            Err(_) => Some(anyhow!(
                "timed out after {}s",
                self.options.timeout.as_secs_f32()
            )),
        };

        match failure {
            None => {
                debug!(
                    "{} round {} complete: {} chars",
                    self.id,
                    request.round,
                    accumulated.len()
                );
                Ok(self.finish(accumulated, Source::Live, &mut on_increment))
            }
            Some(e) if !accumulated.is_empty() => {
                warn!(
                    "{} round {} failed mid-stream via {}, keeping {} chars of live text: {:#}",
                    self.id,
                    request.round,
                    upstream.provider_name(),
                    accumulated.len(),
                    e
                );
                Ok(self.finish(accumulated, Source::Live, &mut on_increment))
            }
            Some(e) => {
                warn!(
                    "{} round {} failed via {}, using fallback text: {:#}",
                    self.id,
                    request.round,
                    upstream.provider_name(),
                    e
                );
                self.simulate(request, cancel, &mut on_increment).await
            }
        }
    }

    async fn call_upstream<F>(
        &self,
        upstream: &dyn LlmProvider,
        request: &CompletionRequest,
        cancel: &CancellationToken,
        accumulated: &mut String,
        on_increment: &mut F,
    ) -> anyhow::Result<()>
    where
        F: FnMut(Increment) + Send,
    {
        if self.options.mode == AdapterMode::Single {
            let text = upstream.complete(&request.system, &request.prompt).await?;
            accumulated.push_str(&text);
            return Ok(());
        }

        let mut deltas = upstream.stream(&request.system, &request.prompt).await?;
        while let Some(delta) = deltas.next().await {
            let delta = delta?;
            if delta.is_empty() {
                continue;
            }
            accumulated.push_str(&delta);
            on_increment(Increment {
                content: accumulated.clone(),
                is_final: false,
                source: Source::Live,
            });
            if cancel.is_cancelled() {
                break;
            }
        }
        Ok(())
    }

    /// Serve the call from the generator, tagged `fallback`
    async fn simulate<F>(
        &self,
        request: &CompletionRequest,
        cancel: &CancellationToken,
        on_increment: &mut F,
    ) -> BoardroomResult<Generation>
    where
        F: FnMut(Increment) + Send,
    {
        let text = fallback_text(&request.question, request.round, self.id);

        if self.options.mode != AdapterMode::Single {
            let mut prefixes = word_increments(&text);
            // The full text goes out as the final increment below.
            prefixes.pop();
            for prefix in prefixes {
                if !self.options.mock_word_delay.is_zero() {
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(BoardroomError::Cancelled),
                        _ = tokio::time::sleep(self.options.mock_word_delay) => {}
                    }
                }
                if cancel.is_cancelled() {
                    return Err(BoardroomError::Cancelled);
                }
                on_increment(Increment {
                    content: prefix,
                    is_final: false,
                    source: Source::Fallback,
                });
            }
        }

        if cancel.is_cancelled() {
            return Err(BoardroomError::Cancelled);
        }
        Ok(self.finish(text, Source::Fallback, on_increment))
    }

    fn finish<F>(&self, text: String, source: Source, on_increment: &mut F) -> Generation
    where
        F: FnMut(Increment) + Send,
    {
        on_increment(Increment {
            content: text.clone(),
            is_final: true,
            source,
        });
        Generation { text, source }
    }
}

/// The three adapters, one per provider
#[derive(Debug, Clone)]
pub struct ProviderSet {
    adapters: [Arc<ProviderAdapter>; 3],
}

impl ProviderSet {
    /// Build one adapter per provider in boardroom order
    pub fn from_fn(mut build: impl FnMut(ProviderId) -> ProviderAdapter) -> Self {
        Self {
            adapters: ProviderId::ALL.map(|id| Arc::new(build(id))),
        }
    }

    /// All adapters offline, in mock mode
    pub fn mock(mock_word_delay: Duration) -> Self {
        let options = AdapterOptions {
            mode: AdapterMode::Mock,
            mock_word_delay,
            ..Default::default()
        };
        Self::from_fn(|id| ProviderAdapter::offline(id, options))
    }

    pub fn get(&self, id: ProviderId) -> &Arc<ProviderAdapter> {
        &self.adapters[id.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ProviderAdapter>> {
        self.adapters.iter()
    }
}
