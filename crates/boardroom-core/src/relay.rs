//! Chunk relay: frames cumulative text as NDJSON lines or SSE `data:` frames

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::types::{Increment, Source, StreamChunk};

/// Wire framing of relay records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Framing {
    /// One JSON object per line
    #[default]
    Ndjson,
    /// `data: {json}` followed by a blank line
    Sse,
}

impl Framing {
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Ndjson => "application/json",
            Self::Sse => "text/event-stream",
        }
    }

    pub fn frame(&self, json: &str) -> String {
        match self {
            Self::Ndjson => format!("{}\n", json),
            Self::Sse => format!("data: {}\n\n", json),
        }
    }
}

/// Destination of framed records, usually an HTTP response body
pub trait ChunkSink: Send {
    /// Write one framed record. Returns `false` once the reader is gone.
    fn write(&mut self, frame: String) -> bool;
}

impl ChunkSink for mpsc::UnboundedSender<String> {
    fn write(&mut self, frame: String) -> bool {
        self.send(frame).is_ok()
    }
}

/// Terminal record of a relay that failed before producing any content
#[derive(Debug, Clone, Serialize)]
struct ErrorRecord<'a> {
    error: &'a str,
    done: bool,
}

/// Writes one turn's chunks in order and terminates exactly once.
///
/// After the terminal record, or once the sink reports a closed reader,
/// every write is a no-op.
pub struct ChunkRelay<S> {
    sink: S,
    framing: Framing,
    content: String,
    source: Source,
    terminated: bool,
    closed: bool,
}

impl<S: ChunkSink> ChunkRelay<S> {
    pub fn new(sink: S, framing: Framing) -> Self {
        Self {
            sink,
            framing,
            content: String::new(),
            source: Source::Live,
            terminated: false,
            closed: false,
        }
    }

    /// Reader disconnected; producers may stop early
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Last content written
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Write a non-terminal `{content, done:false, source}` record
    pub fn push(&mut self, content: impl Into<String>, source: Source) {
        if self.is_terminated() || self.closed {
            return;
        }
        let content = content.into();
        if content.len() < self.content.len() {
            debug!(
                "Relay dropped shrinking content ({} < {} bytes)",
                content.len(),
                self.content.len()
            );
            return;
        }
        self.emit(&StreamChunk::partial(content.clone(), source));
        self.content = content;
        self.source = source;
    }

    /// Write the terminal `{content, done:true, source}` record
    pub fn finish(&mut self, content: impl Into<String>, source: Source) {
        if self.is_terminated() || self.closed {
            return;
        }
        let content = content.into();
        self.emit(&StreamChunk::terminal(content.clone(), source));
        self.content = content;
        self.terminated = true;
    }

    /// Terminate on error.
    ///
    /// Writes `{error, done:true}` if nothing was written yet, otherwise closes
    /// with the content already delivered so the reader never sees it shrink.
    pub fn fail(&mut self, message: &str) {
        if self.is_terminated() || self.closed {
            return;
        }
        if self.content.is_empty() {
            self.emit(&ErrorRecord {
                error: message,
                done: true,
            });
        } else {
            let content = self.content.clone();
            self.emit(&StreamChunk::terminal(content, self.source));
        }
        self.terminated = true;
    }

    /// Forward one adapter increment
    pub fn apply(&mut self, increment: Increment) {
        if increment.is_final {
            self.finish(increment.content, increment.source);
        } else {
            self.push(increment.content, increment.source);
        }
    }

    fn emit<T: Serialize>(&mut self, record: &T) {
        let json = match serde_json::to_string(record) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize relay record: {}", e);
                return;
            }
        };
        if !self.sink.write(self.framing.frame(&json)) {
            debug!("Relay reader disconnected");
            self.closed = true;
        }
    }
}
