//! Shared types for boardroom-core

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One of the three upstream text-generation capabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    Gpt,
    Claude,
    Gemini,
}

impl ProviderId {
    /// All providers in boardroom order
    pub const ALL: [ProviderId; 3] = [Self::Gpt, Self::Claude, Self::Gemini];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gpt => "gpt",
            Self::Claude => "claude",
            Self::Gemini => "gemini",
        }
    }

    /// Name shown to users and inside prompts
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Gpt => "GPT-4",
            Self::Claude => "Claude",
            Self::Gemini => "Gemini",
        }
    }

    /// Environment variable holding the upstream credential
    pub fn credential_var(&self) -> &'static str {
        match self {
            Self::Gpt => "OPENAI_API_KEY",
            Self::Claude => "ANTHROPIC_API_KEY",
            Self::Gemini => "GEMINI_API_KEY",
        }
    }

    /// Position in boardroom order (0..3)
    pub fn index(&self) -> usize {
        match self {
            Self::Gpt => 0,
            Self::Claude => 1,
            Self::Gemini => 2,
        }
    }

    /// The two other providers, in boardroom order
    pub fn others(&self) -> [ProviderId; 2] {
        match self {
            Self::Gpt => [Self::Claude, Self::Gemini],
            Self::Claude => [Self::Gpt, Self::Gemini],
            Self::Gemini => [Self::Gpt, Self::Claude],
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = String;

    /// Accepts the wire names plus the vendor aliases used in URLs
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gpt" | "gpt4" | "openai" => Ok(Self::Gpt),
            "claude" | "anthropic" => Ok(Self::Claude),
            "gemini" | "google" => Ok(Self::Gemini),
            other => Err(format!("Unknown provider: {}", other)),
        }
    }
}

/// Boardroom round. Serialized as the integers 1 and 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Round {
    Initial,
    Refinement,
}

impl Round {
    pub fn number(&self) -> u8 {
        match self {
            Self::Initial => 1,
            Self::Refinement => 2,
        }
    }
}

impl From<Round> for u8 {
    fn from(round: Round) -> Self {
        round.number()
    }
}

impl TryFrom<u8> for Round {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Initial),
            2 => Ok(Self::Refinement),
            n => Err(format!("round must be 1 or 2, got {}", n)),
        }
    }
}

impl fmt::Display for Round {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.number())
    }
}

/// Where a piece of text came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    #[default]
    Live,
    Fallback,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Live => f.write_str("live"),
            Self::Fallback => f.write_str("fallback"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One message in the client-side conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub id: String,
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub producer_model: Option<ProviderId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub round: Option<Round>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
    pub pending: bool,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: format!("user-{}", Uuid::new_v4()),
            role: Role::User,
            content: content.into(),
            producer_model: None,
            round: None,
            source: None,
            pending: false,
        }
    }

    /// A pending, empty assistant turn for one dispatched step
    pub fn assistant(provider: ProviderId, round: Round) -> Self {
        Self {
            id: format!("{}-r{}-{}", provider, round.number(), Uuid::new_v4()),
            role: Role::Assistant,
            content: String::new(),
            producer_model: Some(provider),
            round: Some(round),
            source: None,
            pending: true,
        }
    }
}

/// Wire record of the chunk relay. `content` is cumulative, not a delta.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamChunk {
    pub content: String,
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
}

impl StreamChunk {
    pub fn partial(content: impl Into<String>, source: Source) -> Self {
        Self {
            content: content.into(),
            done: false,
            source: Some(source),
        }
    }

    pub fn terminal(content: impl Into<String>, source: Source) -> Self {
        Self {
            content: content.into(),
            done: true,
            source: Some(source),
        }
    }
}

/// One cumulative update delivered by a provider adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Increment {
    pub content: String,
    pub is_final: bool,
    pub source: Source,
}

/// Resolved value of one adapter call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Generation {
    pub text: String,
    pub source: Source,
}

/// Inputs for one upstream call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    pub system: String,
    pub prompt: String,
    pub round: Round,
    /// The user's question as typed; quoted by fallback text. Equals
    /// `prompt` unless the prompt was composed from earlier rounds.
    pub question: String,
}

impl CompletionRequest {
    pub fn new(system: impl Into<String>, prompt: impl Into<String>, round: Round) -> Self {
        let prompt = prompt.into();
        Self {
            system: system.into(),
            question: prompt.clone(),
            prompt,
            round,
        }
    }

    pub fn with_question(mut self, question: impl Into<String>) -> Self {
        self.question = question.into();
        self
    }
}

/// Parameter bundle used to build the next provider's prompt
#[derive(Debug, Clone, Default)]
pub struct RoundContext {
    pub prompt: String,
    /// Round-1 outputs by provider
    pub initial: BTreeMap<ProviderId, String>,
    /// Round-2 outputs produced so far
    pub refined: BTreeMap<ProviderId, String>,
}

impl RoundContext {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn record(&mut self, round: Round, provider: ProviderId, text: impl Into<String>) {
        let outputs = match round {
            Round::Initial => &mut self.initial,
            Round::Refinement => &mut self.refined,
        };
        outputs.insert(provider, text.into());
    }
}

/// One of the six orchestration steps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Step {
    pub round: Round,
    pub provider: ProviderId,
}

impl Step {
    /// The fixed execution order
    pub const ORDER: [Step; 6] = [
        Step::new(Round::Initial, ProviderId::Gpt),
        Step::new(Round::Initial, ProviderId::Claude),
        Step::new(Round::Initial, ProviderId::Gemini),
        Step::new(Round::Refinement, ProviderId::Gpt),
        Step::new(Round::Refinement, ProviderId::Claude),
        Step::new(Round::Refinement, ProviderId::Gemini),
    ];

    pub const fn new(round: Round, provider: ProviderId) -> Self {
        Self { round, provider }
    }

    /// Wire id used in orchestration events
    pub fn id(&self) -> &'static str {
        match (self.round, self.provider) {
            (Round::Initial, ProviderId::Gpt) => "gpt4",
            (Round::Initial, ProviderId::Claude) => "claude",
            (Round::Initial, ProviderId::Gemini) => "gemini",
            (Round::Refinement, ProviderId::Gpt) => "gpt4-round2",
            (Round::Refinement, ProviderId::Claude) => "claude-round2",
            (Round::Refinement, ProviderId::Gemini) => "gemini-round2",
        }
    }

    /// Position in [`Step::ORDER`]
    pub fn index(&self) -> usize {
        let offset = match self.round {
            Round::Initial => 0,
            Round::Refinement => 3,
        };
        offset + self.provider.index()
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}
