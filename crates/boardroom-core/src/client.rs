//! HTTP client for a running boardroom gateway
//!
//! [`GatewayClient`] calls the per-provider NDJSON endpoints and feeds the
//! body through the stream consumer. [`GatewayProvider`] wraps it as an
//! [`LlmProvider`] so the orchestrator can run against a remote gateway.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::consumer::{NdjsonDecoder, StreamRecord, consume_response};
use crate::providers::{LlmProvider, TextStream};
use crate::types::{ProviderId, Round, Source, StreamChunk};

/// Default client-facing API base
pub const DEFAULT_API_BASE: &str = "http://127.0.0.1:3001/api";

/// Body of `POST {api_base}/{provider}`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderCall<'a> {
    pub prompt: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    pub system_prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub round: Option<Round>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Clone)]
pub struct GatewayClient {
    http: Client,
    api_base: String,
}

impl GatewayClient {
    pub fn new(api_base: impl Into<String>, timeout: Duration) -> Self {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to build HTTP client");

        Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    /// `GET {api_base}/health`
    pub async fn health(&self) -> Result<serde_json::Value> {
        let url = format!("{}/health", self.api_base);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Failed to reach gateway at {}", url))?;
        let response = Self::check(response).await?;
        response
            .json()
            .await
            .context("Failed to parse gateway health response")
    }

    /// Open a provider stream; the body is NDJSON on success
    pub async fn open(&self, provider: ProviderId, call: &ProviderCall<'_>) -> Result<reqwest::Response> {
        let url = format!("{}/{}", self.api_base, provider);
        debug!("Gateway request: {} round={:?}", url, call.round);

        let response = self
            .http
            .post(&url)
            .json(call)
            .send()
            .await
            .with_context(|| format!("Failed to send request to gateway at {}", url))?;

        Self::check(response).await
    }

    /// Run one provider call, reporting every chunk, and return the terminal chunk
    pub async fn stream_provider<F>(
        &self,
        provider: ProviderId,
        call: &ProviderCall<'_>,
        on_chunk: F,
    ) -> Result<StreamChunk>
    where
        F: FnMut(&StreamChunk),
    {
        let response = self.open(provider, call).await?;
        let terminal = consume_response(response, on_chunk).await?;
        Ok(terminal)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        let message = serde_json::from_str::<ErrorBody>(&text)
            .map(|body| body.error)
            .unwrap_or(text);
        Err(anyhow!(
            "Gateway request failed with status {}: {}",
            status,
            message
        ))
    }
}

/// [`LlmProvider`] backed by a remote gateway's per-provider endpoint.
///
/// Text the gateway had to serve from its own fallback is reported as an
/// error so the local adapter falls back with its own round context.
pub struct GatewayProvider {
    client: Arc<GatewayClient>,
    provider: ProviderId,
}

impl std::fmt::Debug for GatewayProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayProvider")
            .field("api_base", &self.client.api_base)
            .field("provider", &self.provider)
            .finish()
    }
}

impl GatewayProvider {
    pub fn new(client: Arc<GatewayClient>, provider: ProviderId) -> Self {
        Self { client, provider }
    }
}

#[async_trait]
impl LlmProvider for GatewayProvider {
    fn provider_name(&self) -> &str {
        "gateway"
    }

    fn model(&self) -> &str {
        self.provider.as_str()
    }

    async fn complete(&self, system: &str, prompt: &str) -> Result<String> {
        let mut deltas = self.stream(system, prompt).await?;
        let mut text = String::new();
        while let Some(delta) = deltas.next().await {
            text.push_str(&delta?);
        }
        Ok(text)
    }

    async fn stream(&self, system: &str, prompt: &str) -> Result<TextStream> {
        let call = ProviderCall {
            prompt,
            system_prompt: system,
            round: None,
        };
        let response = self.client.open(self.provider, &call).await?;
        let body = response
            .bytes_stream()
            .map(|bytes| bytes.map(|b| b.to_vec()).map_err(anyhow::Error::from))
            .boxed();
        Ok(delta_stream(body))
    }
}

/// Converts cumulative NDJSON chunks back into text deltas
struct DeltaState {
    body: BoxStream<'static, Result<Vec<u8>>>,
    decoder: NdjsonDecoder,
    last: String,
    queue: VecDeque<Result<String>>,
    done: bool,
}

impl DeltaState {
    fn absorb(&mut self, records: impl IntoIterator<Item = StreamRecord>) {
        for record in records {
            if self.done {
                return;
            }
            match record {
                StreamRecord::Failure { error, .. } => self.fail(anyhow!("Gateway error: {}", error)),
                StreamRecord::Chunk(chunk) => self.absorb_chunk(chunk),
            }
        }
    }

    fn absorb_chunk(&mut self, chunk: StreamChunk) {
        if chunk.source == Some(Source::Fallback) {
            self.fail(anyhow!("Gateway served fallback text"));
            return;
        }
        match chunk.content.strip_prefix(self.last.as_str()) {
            Some(delta) if !delta.is_empty() => self.queue.push_back(Ok(delta.to_string())),
            Some(_) => {}
            None => {
                self.fail(anyhow!("Gateway content was not cumulative"));
                return;
            }
        }
        self.last = chunk.content;
        if chunk.done {
            self.done = true;
        }
    }

    fn fail(&mut self, error: anyhow::Error) {
        self.queue.push_back(Err(error));
        self.done = true;
    }
}

fn delta_stream(body: BoxStream<'static, Result<Vec<u8>>>) -> TextStream {
    let state = DeltaState {
        body,
        decoder: NdjsonDecoder::new(),
        last: String::new(),
        queue: VecDeque::new(),
        done: false,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(item) = st.queue.pop_front() {
                return Some((item, st));
            }
            if st.done {
                return None;
            }
            match st.body.next().await {
                Some(Ok(bytes)) => match st.decoder.feed(&bytes) {
                    Ok(records) => st.absorb(records),
                    Err(e) => st.fail(e.into()),
                },
                Some(Err(e)) => st.fail(e),
                None => {
                    match st.decoder.finish() {
                        Ok(record) => st.absorb(record),
                        Err(e) => st.fail(e.into()),
                    }
                    st.done = true;
                }
            }
        }
    })
    .boxed()
}
