//! Gateway HTTP protocol: JSON bodies and stream records

use std::collections::BTreeMap;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use boardroom_core::{AdapterMode, BoardroomEvent, ProviderId, Round, Source, Step, Transcript};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

// ── Error messages ──

pub const ERR_PROMPT_REQUIRED: &str = "Prompt is required";
pub const ERR_INVALID_JSON: &str = "Invalid JSON body";
pub const ERR_METHOD_NOT_ALLOWED: &str = "Method not allowed";

/// Step id of the terminal boardroom event
pub const STEP_COMPLETE: &str = "complete";
/// Step id of a boardroom run that aborted
pub const STEP_ERROR: &str = "error";

/// Body of `POST /api/{provider}`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderRequest {
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub round: Option<Round>,
}

/// Body of `POST /api/boardroom`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BoardroomRequest {
    #[serde(default)]
    pub prompt: Option<String>,
}

/// Parse a request body; an empty body is a request with no fields set
pub fn parse_body<T: DeserializeOwned + Default>(body: &[u8]) -> Result<T, serde_json::Error> {
    if body.trim_ascii().is_empty() {
        return Ok(T::default());
    }
    serde_json::from_slice(body)
}

/// Non-blank prompt, if any
pub fn required_prompt(prompt: Option<String>) -> Option<String> {
    prompt.filter(|p| !p.trim().is_empty())
}

/// Error body: `{"error": "..."}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

pub fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
        .into_response()
}

/// Which upstream credentials are configured. Never carries the values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyAvailability {
    pub openai_key_available: bool,
    pub anthropic_key_available: bool,
    pub gemini_key_available: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub message: String,
    pub mode: AdapterMode,
    pub uptime_secs: u64,
    pub environment: KeyAvailability,
}

// ── Boardroom SSE records ──

#[derive(Debug, Clone, Serialize)]
pub struct StepData<'a> {
    pub provider: ProviderId,
    pub round: Round,
    pub content: &'a str,
    pub source: Source,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepSummary<'a> {
    pub content: &'a str,
    pub source: Source,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepEvent<T> {
    pub step: &'static str,
    pub data: T,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorEvent<'a> {
    pub step: &'static str,
    pub error: &'a str,
}

/// JSON payload for an orchestrator event, if it is reported to clients
pub fn step_payload(event: &BoardroomEvent) -> Option<serde_json::Result<String>> {
    match event {
        BoardroomEvent::StepCompleted { step, generation } => {
            Some(serde_json::to_string(&StepEvent {
                step: step.id(),
                data: StepData {
                    provider: step.provider,
                    round: step.round,
                    content: &generation.text,
                    source: generation.source,
                },
            }))
        }
        BoardroomEvent::Complete { transcript } => Some(complete_payload(transcript)),
        BoardroomEvent::StepStarted { .. } | BoardroomEvent::Increment { .. } => None,
    }
}

fn complete_payload(transcript: &Transcript) -> serde_json::Result<String> {
    let data: BTreeMap<&'static str, StepSummary<'_>> = transcript
        .results
        .iter()
        .map(|r| {
            (
                r.step.id(),
                StepSummary {
                    content: &r.text,
                    source: r.source,
                },
            )
        })
        .collect();
    serde_json::to_string(&StepEvent {
        step: STEP_COMPLETE,
        data,
    })
}

pub fn error_payload(message: &str) -> serde_json::Result<String> {
    serde_json::to_string(&ErrorEvent {
        step: STEP_ERROR,
        error: message,
    })
}
