//! Google Gemini provider

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::sse::{SseFrame, text_or_skip, text_stream};
use super::types::{DEFAULT_TEMPERATURE, LlmProvider, TextStream};

pub const DEFAULT_MODEL: &str = "gemini-1.5-pro";
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Google Gemini provider
pub struct GoogleProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl std::fmt::Debug for GoogleProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoogleProvider")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl GoogleProvider {
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

    fn request_body(&self, system: &str, prompt: &str) -> GeminiRequest {
        GeminiRequest {
            contents: vec![GeminiContent {
                role: Some("user".to_string()),
                parts: vec![GeminiPart {
                    text: Some(prompt.to_string()),
                }],
            }],
            system_instruction: (!system.is_empty()).then(|| GeminiContent {
                role: None,
                parts: vec![GeminiPart {
                    text: Some(system.to_string()),
                }],
            }),
            generation_config: GeminiGenerationConfig {
                temperature: self.temperature,
                max_output_tokens: self.max_tokens,
            },
        }
    }

    async fn send(&self, method: &str, body: &GeminiRequest) -> Result<reqwest::Response> {
        let url = format!(
            "{}/v1beta/models/{}:{}",
            self.base_url, self.model, method
        );

        debug!("Gemini request: model={}, method={}", self.model, method);

        let response = self
            .client
            .post(&url)
            .query(&Self::method_query(method))
            .header("x-goog-api-key", self.api_key.as_str())
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| e.without_url())
            .context("Failed to send request to Gemini API")?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(anyhow!(
                "Gemini API request failed with status {}: {}",
                status,
                error_text
            ));
        }

        Ok(response)
    }

    fn method_query(method: &str) -> Vec<(&'static str, &'static str)> {
        if method == "streamGenerateContent" {
            vec![("alt", "sse")]
        } else {
            Vec::new()
        }
    }

    /// Concatenated text of the first candidate, if any
    fn candidate_text(resp: GeminiApiResponse) -> Option<String> {
        let candidate = resp.candidates.into_iter().next()?;
        let text: String = candidate
            .content?
            .parts
            .into_iter()
            .filter_map(|p| p.text)
            .collect();
        Some(text)
    }

    fn response_text(resp: GeminiApiResponse) -> Result<String> {
        match Self::candidate_text(resp) {
            Some(text) if !text.is_empty() => Ok(text),
            Some(_) => Err(anyhow!("Gemini response had no text content")),
            None => Err(anyhow!("Gemini response had no candidates")),
        }
    }

    fn parse_frame(data: &str) -> Result<SseFrame> {
        if data.trim().is_empty() {
            return Ok(SseFrame::Skip);
        }

        let chunk: GeminiApiResponse =
            serde_json::from_str(data).context("Failed to parse Gemini stream chunk")?;

        if let Some(error) = chunk.error {
            return Err(anyhow!("Gemini stream error: {}", error.message));
        }

        Ok(text_or_skip(Self::candidate_text(chunk)))
    }
}

#[async_trait]
impl LlmProvider for GoogleProvider {
    fn provider_name(&self) -> &str {
        "google"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: &str, prompt: &str) -> Result<String> {
        let body = self.request_body(system, prompt);
        let response = self.send("generateContent", &body).await?;

        let api_response: GeminiApiResponse = response
            .json()
            .await
            .context("Failed to parse Gemini API response")?;

        debug!(
            "Gemini response: candidates={}",
            api_response.candidates.len()
        );

        Self::response_text(api_response)
    }

    async fn stream(&self, system: &str, prompt: &str) -> Result<TextStream> {
        let body = self.request_body(system, prompt);
        let response = self.send("streamGenerateContent", &body).await?;
        Ok(text_stream(response, "Gemini", |event| {
            Self::parse_frame(&event.data)
        }))
    }
}

// ── Gemini wire types ──

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct GeminiApiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    error: Option<GeminiError>,
}

#[derive(Debug, Clone, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Debug, Clone, Deserialize)]
struct GeminiError {
    message: String,
}
