//! Session state types

use serde::{Deserialize, Serialize};

/// Classification of failures surfaced to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Stream data did not match the expected event structure
    MalformedStreamFrame,
    /// Connection-level failure, or a failure reported by the stream itself
    StreamTransport,
    /// Create/update of the stored conversation failed (non-fatal)
    Persistence,
    /// Request rejected before any state changed
    Precondition,
}

/// Session lifecycle state
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionState {
    /// Ready for input, nothing submitted yet
    #[default]
    Idle,

    /// Request sent, waiting for the first stream event
    Submitting,

    /// Stream events arriving
    Streaming,

    /// Reply finalized, persistence sync in flight
    Finalizing,

    /// Turn complete; ready for input
    Done,

    /// Turn failed; ready for input
    Errored { message: String, kind: ErrorKind },
}

impl SessionState {
    /// A turn is in flight and a new one must not start
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            SessionState::Submitting | SessionState::Streaming | SessionState::Finalizing
        )
    }

    /// The stream of the current turn is still open
    pub fn is_streaming(&self) -> bool {
        matches!(self, SessionState::Submitting | SessionState::Streaming)
    }

    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Submitting => "submitting",
            SessionState::Streaming => "streaming",
            SessionState::Finalizing => "finalizing",
            SessionState::Done => "done",
            SessionState::Errored { .. } => "errored",
        }
    }
}

/// Snapshot of the session passed to every transition
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    /// Most recently started turn
    pub turn: u64,
    /// Number of messages currently in the conversation
    pub history_len: usize,
    /// Identifier of the stored conversation, once persisted
    pub session_id: Option<String>,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_turn(mut self, turn: u64) -> Self {
        self.turn = turn;
        self
    }

    #[must_use]
    pub fn with_history(mut self, history_len: usize) -> Self {
        self.history_len = history_len;
        self
    }

    #[must_use]
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}
