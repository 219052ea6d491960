//! Server-sent-event decoding shared by the streaming upstream clients

use anyhow::{Result, anyhow};
use eventsource_stream::{Event, Eventsource};
use futures_util::{StreamExt, future};
use tracing::trace;

use super::types::TextStream;

/// Interpretation of one upstream SSE frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseFrame {
    /// A text delta
    Text(String),
    /// Keep-alive, metadata, or an empty delta
    Skip,
    /// Upstream signalled the end of the message
    Done,
}

/// Turn a streaming HTTP response into a text delta stream.
///
/// `parse` maps each SSE frame; an `Err` from it ends the call as a failure.
/// The stream stops at the first [`SseFrame::Done`] or when the body ends.
pub fn text_stream<F>(response: reqwest::Response, label: &'static str, parse: F) -> TextStream
where
    F: Fn(&Event) -> Result<SseFrame> + Send + 'static,
{
    response
        .bytes_stream()
        .eventsource()
        .map(move |event| match event {
            Ok(event) => {
                trace!("{} SSE: event={:?} data={:?}", label, event.event, event.data);
                parse(&event)
            }
            Err(e) => Err(anyhow!("{} SSE stream error: {}", label, e)),
        })
        .take_while(|frame| future::ready(!matches!(frame, Ok(SseFrame::Done))))
        .filter_map(|frame| {
            future::ready(match frame {
                Ok(SseFrame::Text(text)) => Some(Ok(text)),
                Ok(_) => None,
                Err(e) => Some(Err(e)),
            })
        })
        .boxed()
}

/// Non-empty text or [`SseFrame::Skip`]
pub fn text_or_skip(text: Option<String>) -> SseFrame {
    match text {
        Some(text) if !text.is_empty() => SseFrame::Text(text),
        _ => SseFrame::Skip,
    }
}
