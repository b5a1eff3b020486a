//! Events that can occur in a session

use crate::api::ChatRecord;
use crate::conversation::DocumentRef;
use crate::stream::StreamEvent;
use crate::sync::SyncOutcome;

/// Events that trigger state transitions
#[derive(Debug, Clone)]
pub enum Event {
    // User events
    UserSubmit {
        text: String,
        images: Vec<String>,
        sources: Vec<DocumentRef>,
    },
    Regenerate {
        index: usize,
    },
    Reset,
    ChatLoaded {
        record: ChatRecord,
    },
    ChatDeleted {
        id: String,
    },

    // Stream events, tagged with the turn that opened the stream
    Stream {
        turn: u64,
        event: StreamEvent,
    },
    StreamMalformed {
        turn: u64,
        raw: String,
    },
    TransportError {
        turn: u64,
        message: String,
    },
    /// Connection ended without an `end` event
    StreamClosed {
        turn: u64,
    },

    // Persistence events
    SyncComplete {
        turn: u64,
        outcome: SyncOutcome,
    },
    SyncFailed {
        turn: u64,
        message: String,
    },
}

impl Event {
    pub fn user(text: impl Into<String>) -> Self {
        Event::UserSubmit {
            text: text.into(),
            images: vec![],
            sources: vec![],
        }
    }

    /// Turn an asynchronous result belongs to; `None` for user events
    pub fn turn(&self) -> Option<u64> {
        match self {
            Event::Stream { turn, .. }
            | Event::StreamMalformed { turn, .. }
            | Event::TransportError { turn, .. }
            | Event::StreamClosed { turn }
            | Event::SyncComplete { turn, .. }
            | Event::SyncFailed { turn, .. } => Some(*turn),
            _ => None,
        }
    }

    /// No further events follow this one on the same connection
    pub fn ends_stream(&self) -> bool {
        match self {
            Event::Stream { event, .. } => event.is_terminal(),
            Event::StreamMalformed { .. }
            | Event::TransportError { .. }
            | Event::StreamClosed { .. } => true,
            _ => false,
        }
    }
}
