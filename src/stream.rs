//! Stream consumer
//!
//! Parses SSE frames from the generation service into typed events and
//! accumulates the streamed reply for one turn. All event handling goes
//! through [`StreamConsumer::dispatch`], so the order in which events are
//! applied is the order in which they arrived.

use crate::api::{detail_message, ApiError, SseFrame};
use crate::state_machine::Event;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Frames of one open streaming connection
pub type FrameStream = BoxStream<'static, Result<SseFrame, ApiError>>;

/// Event carried in the `data` field of a frame: `{type, message}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "message", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Partial text delta
    Stream(String),
    /// Final text delta; the reply is complete
    End(String),
    /// Side-channel document reference
    Doc(Value),
    /// Failure reported in-band by the service
    Error(Value),
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::End(_) | StreamEvent::Error(_))
    }

    /// Readable text of an `error` event
    pub fn failure_message(&self) -> Option<String> {
        match self {
            StreamEvent::Error(payload) => Some(error_message(payload)),
            _ => None,
        }
    }
}

/// Result of parsing one frame
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedFrame {
    Events(Vec<StreamEvent>),
    /// `event: error` frame from the transport
    TransportError(String),
    /// Data that does not match `{type, message}` objects
    Malformed(String),
}

const BOUNDARY: &str = "data:";

/// Parse the events of one frame.
///
/// A frame's data may hold several JSON objects, separated by `data:`
/// markers or simply concatenated. Anything else makes the whole frame
/// malformed, as does a frame with no events at all.
pub fn parse_frame(frame: &SseFrame) -> ParsedFrame {
    if frame.is_error() {
        return ParsedFrame::TransportError(detail_message(&frame.data));
    }

    let mut events = Vec::new();
    let mut rest = frame.data.as_str();
    loop {
        rest = rest.trim_start();
        if let Some(after) = rest.strip_prefix(BOUNDARY) {
            rest = after;
            continue;
        }
        if rest.is_empty() {
            break;
        }

        let mut objects = serde_json::Deserializer::from_str(rest).into_iter::<StreamEvent>();
        match objects.next() {
            Some(Ok(event)) => {
                events.push(event);
                let consumed = objects.byte_offset();
                rest = rest.get(consumed..).unwrap_or_default();
            }
            Some(Err(e)) => {
                tracing::debug!(error = %e, data = %frame.data, "Frame did not match stream event structure");
                return ParsedFrame::Malformed(frame.data.clone());
            }
            None => break,
        }
    }

    if events.is_empty() {
        ParsedFrame::Malformed(frame.data.clone())
    } else {
        ParsedFrame::Events(events)
    }
}

/// What the session must publish after an event
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// New visible content of the temporary reply
    Publish(String),
    /// Full content of the finished reply
    Finalize(String),
    /// Diagnostic side-channel payload
    Document(Value),
    /// Service-reported failure
    Failed(String),
}

/// Per-turn accumulator
#[derive(Debug)]
pub struct StreamConsumer {
    turn: u64,
    accumulator: String,
    events: usize,
}

impl StreamConsumer {
    pub fn new(turn: u64) -> Self {
        Self {
            turn,
            accumulator: String::new(),
            events: 0,
        }
    }

    pub fn turn(&self) -> u64 {
        self.turn
    }

    /// Apply one event; the accumulator only ever grows
    pub fn dispatch(&mut self, event: StreamEvent) -> Dispatch {
        self.events += 1;
        match event {
            StreamEvent::Stream(delta) => {
                self.accumulator.push_str(&delta);
                Dispatch::Publish(self.accumulator.clone())
            }
            StreamEvent::End(delta) => {
                self.accumulator.push_str(&delta);
                tracing::debug!(turn = self.turn, events = self.events, chars = self.accumulator.len(), "Stream finished");
                Dispatch::Finalize(self.accumulator.clone())
            }
            StreamEvent::Doc(payload) => {
                tracing::debug!(turn = self.turn, payload = %payload, "Document event");
                Dispatch::Document(payload)
            }
            StreamEvent::Error(payload) => {
                tracing::debug!(turn = self.turn, payload = %payload, "Error event");
                Dispatch::Failed(error_message(&payload))
            }
        }
    }
}

fn error_message(payload: &Value) -> String {
    match payload {
        Value::String(s) => s.clone(),
        Value::Object(map) => map
            .get("detail")
            .or_else(|| map.get("message"))
            .map_or_else(
                || payload.to_string(),
                |v| v.as_str().map_or_else(|| v.to_string(), str::to_string),
            ),
        other => other.to_string(),
    }
}

/// Forward a connection's frames into the session's event channel.
///
/// Runs until the stream ends, a terminal event is forwarded, or `cancel`
/// fires. Closing the connection is the only way to stop a stream early.
pub async fn forward_frames(
    mut frames: FrameStream,
    turn: u64,
    tx: mpsc::Sender<Event>,
    cancel: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            () = cancel.cancelled() => {
                tracing::debug!(turn, "Stream closed by session");
                return;
            }
            next = frames.next() => next,
        };

        let events = match next {
            Some(Ok(frame)) => match parse_frame(&frame) {
                ParsedFrame::Events(events) => events
                    .into_iter()
                    .map(|event| Event::Stream { turn, event })
                    .collect(),
                ParsedFrame::TransportError(message) => vec![Event::TransportError { turn, message }],
                ParsedFrame::Malformed(raw) => vec![Event::StreamMalformed { turn, raw }],
            },
            Some(Err(e)) => vec![Event::TransportError {
                turn,
                message: e.message,
            }],
            None => vec![Event::StreamClosed { turn }],
        };

        for event in events {
            let terminal = event.ends_stream();
            if tx.send(event).await.is_err() {
                return;
            }
            if terminal {
                return;
            }
        }
    }
}

#[cfg(test)]
mod proptests;
