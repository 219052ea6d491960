//! Client stream consumer
//!
//! Decodes the NDJSON bodies written by the chunk relay and folds the
//! cumulative chunks into client-side conversation state.

use std::fmt::Display;

use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::types::{ChatTurn, ProviderId, Round, StreamChunk};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Stream line is not valid UTF-8")]
    InvalidUtf8,

    #[error("Malformed stream line {line:?}: {reason}")]
    MalformedLine { line: String, reason: String },

    #[error("Server reported an error: {0}")]
    Remote(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Unknown turn: {0}")]
    UnknownTurn(String),

    #[error("Turn {0} already received its final chunk")]
    AfterTerminal(String),

    #[error("Turn {id} content shrank from {previous} to {next} bytes")]
    Shrinking {
        id: String,
        previous: usize,
        next: usize,
    },
}

/// One decoded NDJSON record
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum StreamRecord {
    Failure {
        error: String,
        #[serde(default)]
        done: bool,
    },
    Chunk(StreamChunk),
}

/// Incremental line decoder. Lines may be split anywhere across fed chunks,
/// including inside a multi-byte character.
#[derive(Debug, Default)]
pub struct NdjsonDecoder {
    buf: Vec<u8>,
}

impl NdjsonDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes and return every record completed by them
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<StreamRecord>, DecodeError> {
        self.buf.extend_from_slice(bytes);
        let mut records = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            if let Some(record) = Self::parse_line(&line[..pos])? {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Parse whatever is left after the body ended (an unterminated last line)
    pub fn finish(&mut self) -> Result<Option<StreamRecord>, DecodeError> {
        let rest = std::mem::take(&mut self.buf);
        Self::parse_line(&rest)
    }

    fn parse_line(line: &[u8]) -> Result<Option<StreamRecord>, DecodeError> {
        let text = std::str::from_utf8(line).map_err(|_| DecodeError::InvalidUtf8)?;
        let text = text.trim();
        if text.is_empty() {
            return Ok(None);
        }
        serde_json::from_str(text)
            .map(Some)
            .map_err(|e| DecodeError::MalformedLine {
                line: text.to_string(),
                reason: e.to_string(),
            })
    }
}

/// Drive a body byte stream through the decoder.
///
/// Calls `on_chunk` for every chunk and returns the terminal one. A body that
/// ends without a terminal record is closed with the last content seen.
pub async fn consume_stream<S, B, E, F>(body: S, mut on_chunk: F) -> Result<StreamChunk, DecodeError>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
    F: FnMut(&StreamChunk),
{
    let mut body = std::pin::pin!(body);
    let mut decoder = NdjsonDecoder::new();
    let mut last = String::new();

    while let Some(bytes) = body.next().await {
        let bytes = bytes.map_err(|e| DecodeError::Transport(e.to_string()))?;
        for record in decoder.feed(bytes.as_ref())? {
            if let Some(terminal) = deliver(record, &mut last, &mut on_chunk)? {
                return Ok(terminal);
            }
        }
    }

    if let Some(record) = decoder.finish()? {
        if let Some(terminal) = deliver(record, &mut last, &mut on_chunk)? {
            return Ok(terminal);
        }
    }

    debug!("Stream ended without a terminal record, closing with last content");
    let terminal = StreamChunk {
        content: last,
        done: true,
        source: None,
    };
    on_chunk(&terminal);
    Ok(terminal)
}

fn deliver<F>(
    record: StreamRecord,
    last: &mut String,
    on_chunk: &mut F,
) -> Result<Option<StreamChunk>, DecodeError>
where
    F: FnMut(&StreamChunk),
{
    match record {
        StreamRecord::Failure { error, .. } => Err(DecodeError::Remote(error)),
        StreamRecord::Chunk(chunk) => {
            on_chunk(&chunk);
            if chunk.done {
                return Ok(Some(chunk));
            }
            last.clone_from(&chunk.content);
            Ok(None)
        }
    }
}

/// Drive a streaming `reqwest` response through the decoder
pub async fn consume_response<F>(
    response: reqwest::Response,
    on_chunk: F,
) -> Result<StreamChunk, DecodeError>
where
    F: FnMut(&StreamChunk),
{
    consume_stream(response.bytes_stream(), on_chunk).await
}

/// Client-side conversation: user turns and the assistant turns they spawn
#[derive(Debug, Clone, Default)]
pub struct TurnLog {
    turns: Vec<ChatTurn>,
}

impl TurnLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn turns(&self) -> &[ChatTurn] {
        &self.turns
    }

    pub fn get(&self, id: &str) -> Option<&ChatTurn> {
        self.turns.iter().find(|t| t.id == id)
    }

    /// Append a user turn, returning its id
    pub fn push_user(&mut self, content: impl Into<String>) -> String {
        let turn = ChatTurn::user(content);
        let id = turn.id.clone();
        self.turns.push(turn);
        id
    }

    /// Append a pending, empty assistant turn, returning its id
    pub fn open_assistant(&mut self, provider: ProviderId, round: Round) -> String {
        let turn = ChatTurn::assistant(provider, round);
        let id = turn.id.clone();
        self.turns.push(turn);
        id
    }

    /// Replace a turn's content with a newer cumulative chunk
    pub fn apply(&mut self, id: &str, chunk: &StreamChunk) -> Result<(), DecodeError> {
        let turn = self
            .turns
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| DecodeError::UnknownTurn(id.to_string()))?;

        if !turn.pending {
            return Err(DecodeError::AfterTerminal(id.to_string()));
        }
        if chunk.content.len() < turn.content.len() {
            return Err(DecodeError::Shrinking {
                id: id.to_string(),
                previous: turn.content.len(),
                next: chunk.content.len(),
            });
        }

        turn.content.clone_from(&chunk.content);
        if chunk.done {
            turn.pending = false;
            turn.source = chunk.source;
        }
        Ok(())
    }

    /// Close a pending turn after an error record or transport failure
    pub fn close_with_error(&mut self, id: &str, message: &str) -> Result<(), DecodeError> {
        let turn = self
            .turns
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| DecodeError::UnknownTurn(id.to_string()))?;
        if !turn.pending {
            return Err(DecodeError::AfterTerminal(id.to_string()));
        }
        if turn.content.is_empty() {
            turn.content = format!("Error: {}", message);
        }
        turn.pending = false;
        Ok(())
    }

    /// Assistant turns still waiting for a terminal chunk
    pub fn pending(&self) -> impl Iterator<Item = &ChatTurn> {
        self.turns.iter().filter(|t| t.pending)
    }
}
