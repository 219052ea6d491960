//! Anthropic Claude provider

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::sse::{SseFrame, text_or_skip, text_stream};
use super::types::{DEFAULT_TEMPERATURE, LlmProvider, TextStream};

pub const DEFAULT_MODEL: &str = "claude-3-haiku-20240307";
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic Claude provider
pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl std::fmt::Debug for AnthropicProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicProvider")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl AnthropicProvider {
    pub fn new(api_key: String, model: String, base_url: String, max_tokens: u32) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            max_tokens,
            temperature: DEFAULT_TEMPERATURE,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    fn request_body(&self, system: &str, prompt: &str, stream: bool) -> AnthropicRequest {
        AnthropicRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            system: (!system.is_empty()).then(|| system.to_string()),
            messages: vec![AnthropicMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            stream,
        }
    }

    async fn send(&self, body: &AnthropicRequest) -> Result<reqwest::Response> {
        let url = format!("{}/v1/messages", self.base_url);

        debug!(
            "Anthropic request: model={}, system={}, stream={}",
            self.model,
            body.system.is_some(),
            body.stream
        );

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await
            .context("Failed to send request to Anthropic API")?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(anyhow!(
                "Anthropic API request failed with status {}: {}",
                status,
                error_text
            ));
        }

        Ok(response)
    }

    fn response_text(resp: AnthropicApiResponse) -> Result<String> {
        let text: String = resp
            .content
            .into_iter()
            .filter_map(|block| match block {
                AnthropicContentBlock::Text { text } => Some(text),
                AnthropicContentBlock::Other => None,
            })
            .collect();

        if text.is_empty() {
            return Err(anyhow!("Anthropic response had no text content"));
        }
        Ok(text)
    }

    /// Interpret one streaming event. The event name is duplicated in the
    /// payload's `type` field, which is what we dispatch on.
    fn parse_frame(data: &str) -> Result<SseFrame> {
        if data.trim().is_empty() {
            return Ok(SseFrame::Skip);
        }

        let event: AnthropicStreamEvent =
            serde_json::from_str(data).context("Failed to parse Anthropic stream event")?;

        match event {
            AnthropicStreamEvent::ContentBlockDelta { delta } => Ok(text_or_skip(delta.text)),
            AnthropicStreamEvent::MessageStop => Ok(SseFrame::Done),
            AnthropicStreamEvent::Error { error } => {
                Err(anyhow!("Anthropic stream error: {}", error.message))
            }
            AnthropicStreamEvent::Other => Ok(SseFrame::Skip),
        }
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn provider_name(&self) -> &str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: &str, prompt: &str) -> Result<String> {
        let body = self.request_body(system, prompt, false);
        let response = self.send(&body).await?;

        let api_response: AnthropicApiResponse = response
            .json()
            .await
            .context("Failed to parse Anthropic API response")?;

        debug!(
            "Anthropic response: blocks={}, stop_reason={:?}",
            api_response.content.len(),
            api_response.stop_reason
        );

        Self::response_text(api_response)
    }

    async fn stream(&self, system: &str, prompt: &str) -> Result<TextStream> {
        let body = self.request_body(system, prompt, true);
        let response = self.send(&body).await?;
        Ok(text_stream(response, "Anthropic", |event| {
            Self::parse_frame(&event.data)
        }))
    }
}

// ── Anthropic wire types ──

#[derive(Debug, Clone, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct AnthropicApiResponse {
    content: Vec<AnthropicContentBlock>,
    stop_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicContentBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicStreamEvent {
    ContentBlockDelta {
        delta: AnthropicDelta,
    },
    MessageStop,
    Error {
        error: AnthropicError,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
struct AnthropicDelta {
    text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct AnthropicError {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::DEFAULT_MAX_TOKENS;
    use axum::Router;
    use axum::http::{HeaderMap, StatusCode, header};
    use axum::response::IntoResponse;
    use axum::routing::post;
    use futures_util::StreamExt;

    async fn spawn_upstream(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn provider(base_url: String) -> AnthropicProvider {
        AnthropicProvider::new(
            "sk-ant-test".to_string(),
            DEFAULT_MODEL.to_string(),
            base_url,
            DEFAULT_MAX_TOKENS,
        )
    }

    #[test]
    fn test_request_body_shape() {
        let p = provider("http://localhost".to_string());
        let body = serde_json::to_value(p.request_body("Be brief.", "hello", true)).unwrap();
        assert_eq!(body["model"], "claude-3-haiku-20240307");
        assert_eq!(body["system"], "Be brief.");
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["stream"], true);

        let body = serde_json::to_value(p.request_body("", "hello", false)).unwrap();
        assert!(body.get("system").is_none());
        assert!(body.get("stream").is_none());
    }

    #[test]
    fn test_parse_frame() {
        let frame = AnthropicProvider::parse_frame(
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hi"}}"#,
        )
        .unwrap();
        assert_eq!(frame, SseFrame::Text("Hi".to_string()));

        let frame = AnthropicProvider::parse_frame(r#"{"type":"message_start","message":{}}"#)
            .unwrap();
        assert_eq!(frame, SseFrame::Skip);

        let frame = AnthropicProvider::parse_frame(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(frame, SseFrame::Skip);

        let frame = AnthropicProvider::parse_frame(r#"{"type":"message_stop"}"#).unwrap();
        assert_eq!(frame, SseFrame::Done);

        let err = AnthropicProvider::parse_frame(
            r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("Overloaded"));
    }

    #[test]
    fn test_response_text_joins_text_blocks() {
        let resp: AnthropicApiResponse = serde_json::from_str(
            r#"{"content":[{"type":"text","text":"Hello"},{"type":"text","text":" there"}],"stop_reason":"end_turn"}"#,
        )
        .unwrap();
        assert_eq!(AnthropicProvider::response_text(resp).unwrap(), "Hello there");

        let empty: AnthropicApiResponse =
            serde_json::from_str(r#"{"content":[],"stop_reason":null}"#).unwrap();
        assert!(AnthropicProvider::response_text(empty).is_err());
    }

    #[tokio::test]
    async fn test_complete_sends_version_header() {
        let app = Router::new().route(
            "/v1/messages",
            post(|headers: HeaderMap| async move {
                let ok = headers.get("anthropic-version").and_then(|v| v.to_str().ok())
                    == Some(ANTHROPIC_VERSION)
                    && headers.get("x-api-key").is_some();
                if !ok {
                    return (StatusCode::BAD_REQUEST, "missing headers").into_response();
                }
                (
                    [(header::CONTENT_TYPE, "application/json")],
                    r#"{"content":[{"type":"text","text":"ok"}],"stop_reason":"end_turn"}"#,
                )
                    .into_response()
            }),
        );
        let base = spawn_upstream(app).await;

        assert_eq!(provider(base).complete("", "hi").await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn test_stream_stops_at_message_stop() {
        let sse = concat!(
            "event: message_start\ndata: {\"type\":\"message_start\",\"message\":{}}\n\n",
            "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"delta\":{\"text\":\"A\"}}\n\n",
            "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"delta\":{\"text\":\"B\"}}\n\n",
            "event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n",
            "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"delta\":{\"text\":\"C\"}}\n\n",
        );
        let app = Router::new().route(
            "/v1/messages",
            post(move || async move { ([(header::CONTENT_TYPE, "text/event-stream")], sse) }),
        );
        let base = spawn_upstream(app).await;

        let deltas: Vec<String> = provider(base)
            .stream("", "hi")
            .await
            .unwrap()
            .map(|d| d.unwrap())
            .collect()
            .await;
        assert_eq!(deltas, ["A", "B"]);
    }

    #[test]
    fn test_anthropic_provider_debug_hides_key() {
        let debug = format!("{:?}", provider("http://localhost".to_string()));
        assert!(!debug.contains("sk-ant-test"));
    }
}
