//! Pure state transition function

use super::state::{ErrorKind, SessionContext, SessionState};
use super::{Effect, Event};
use crate::conversation::Message;
use crate::stream::StreamEvent;
use crate::sync::SyncOutcome;
use thiserror::Error;

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult {
    pub new_state: SessionState,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(state: SessionState) -> Self {
        Self {
            new_state: state,
            effects: vec![],
        }
    }

    #[must_use]
    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    /// Append a state notification for the new state
    #[must_use]
    pub fn notifying(self) -> Self {
        let notify = Effect::notify_state(&self.new_state);
        self.with_effect(notify)
    }
}

/// Errors that can occur during transition
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("A reply is still in progress, wait for it to finish")]
    TurnInFlight,
    #[error("{0}")]
    Precondition(String),
}

impl TransitionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransitionError::TurnInFlight | TransitionError::Precondition(_) => ErrorKind::Precondition,
        }
    }
}

/// Pure transition function
///
/// Given the same inputs it always produces the same outputs; all I/O is
/// described by the returned effects.
pub fn transition(
    state: &SessionState,
    context: &SessionContext,
    event: Event,
) -> Result<TransitionResult, TransitionError> {
    match (state, event) {
        // ============================================================
        // Submission
        // ============================================================
        // Finalizing only waits on persistence; the stream is already closed
        (
            SessionState::Idle
            | SessionState::Done
            | SessionState::Errored { .. }
            | SessionState::Finalizing,
            Event::UserSubmit { text, images, sources },
        ) => {
            if text.trim().is_empty() {
                return Err(TransitionError::Precondition("Message is empty".to_string()));
            }
            let user = Message::user(text).with_images(images).with_sources(sources);
            Ok(TransitionResult::new(SessionState::Submitting)
                .with_effect(Effect::RequestStream { user: user.clone() })
                .with_effect(Effect::AppendMessage { message: user })
                .with_effect(Effect::BeginReply)
                .notifying())
        }

        // Single-flight: one turn at a time
        (SessionState::Submitting | SessionState::Streaming, Event::UserSubmit { .. }) => {
            Err(TransitionError::TurnInFlight)
        }

        // History edits wait for the stored copy to catch up
        (
            SessionState::Submitting | SessionState::Streaming | SessionState::Finalizing,
            Event::Regenerate { .. } | Event::ChatLoaded { .. },
        ) => Err(TransitionError::TurnInFlight),

        // ============================================================
        // Stream events
        // ============================================================
        (SessionState::Submitting | SessionState::Streaming, Event::Stream { event, .. }) => {
            match event {
                StreamEvent::Stream(_) | StreamEvent::Doc(_) => {
                    let result = TransitionResult::new(SessionState::Streaming)
                        .with_effect(Effect::Dispatch { event });
                    if *state == SessionState::Submitting {
                        Ok(result.notifying())
                    } else {
                        Ok(result)
                    }
                }
                StreamEvent::End(_) => Ok(TransitionResult::new(SessionState::Finalizing)
                    .with_effect(Effect::Dispatch { event })
                    .with_effect(Effect::CloseStream)
                    .with_effect(Effect::SyncConversation)
                    .notifying()),
                StreamEvent::Error(_) => Ok(stream_failed(
                    ErrorKind::StreamTransport,
                    event.failure_message().unwrap_or_default(),
                )),
            }
        }

        (SessionState::Submitting | SessionState::Streaming, Event::StreamMalformed { .. }) => {
            Ok(stream_failed(
                ErrorKind::MalformedStreamFrame,
                "Received a response the client could not read".to_string(),
            ))
        }

        (SessionState::Submitting | SessionState::Streaming, Event::TransportError { message, .. }) => {
            Ok(stream_failed(ErrorKind::StreamTransport, message))
        }

        (SessionState::Submitting | SessionState::Streaming, Event::StreamClosed { .. }) => {
            Ok(stream_failed(
                ErrorKind::StreamTransport,
                "Connection closed before the reply finished".to_string(),
            ))
        }

        // Leftovers from a stream that already ended
        (
            _,
            Event::Stream { .. }
            | Event::StreamMalformed { .. }
            | Event::TransportError { .. }
            | Event::StreamClosed { .. },
        ) => Ok(TransitionResult::new(state.clone())),

        // ============================================================
        // Persistence
        // ============================================================
        (_, Event::SyncComplete { turn, outcome }) => {
            let (result, finished) = sync_settled(state, context, turn);
            let result = match outcome {
                SyncOutcome::Created { session_id } => {
                    result.with_effect(Effect::AdoptSessionId { session_id })
                }
                SyncOutcome::Updated => result,
            };
            Ok(if finished { result.notifying() } else { result })
        }

        // Persistence failure never rolls back what the user has seen
        (_, Event::SyncFailed { turn, message }) => {
            let (result, finished) = sync_settled(state, context, turn);
            let result = result.with_effect(Effect::notice(
                ErrorKind::Persistence,
                format!("Conversation was not saved: {message}"),
            ));
            Ok(if finished { result.notifying() } else { result })
        }

        // ============================================================
        // History management
        // ============================================================
        (
            SessionState::Idle | SessionState::Done | SessionState::Errored { .. },
            Event::Regenerate { index },
        ) => {
            if index == 0 {
                return Err(TransitionError::Precondition(
                    "Cannot regenerate from the first message.".to_string(),
                ));
            }
            if index > context.history_len {
                return Err(TransitionError::Precondition(format!(
                    "No message at position {index}"
                )));
            }
            Ok(TransitionResult::new(SessionState::Idle)
                .with_effect(Effect::TruncateForRegenerate { index })
                .notifying())
        }

        // Reset is always allowed; it closes any open stream
        (_, Event::Reset) => Ok(reset(state)),

        (_, Event::ChatDeleted { id }) => {
            if context.session_id.as_deref() == Some(id.as_str()) {
                Ok(reset(state))
            } else {
                Ok(TransitionResult::new(state.clone()))
            }
        }

        (
            SessionState::Idle | SessionState::Done | SessionState::Errored { .. },
            Event::ChatLoaded { record },
        ) => Ok(TransitionResult::new(SessionState::Idle)
            .with_effect(Effect::LoadConversation { record })
            .notifying()),
    }
}

fn stream_failed(kind: ErrorKind, message: String) -> TransitionResult {
    TransitionResult::new(SessionState::Errored {
        message: message.clone(),
        kind,
    })
    .with_effect(Effect::CloseStream)
    .with_effect(Effect::DiscardReply)
    .with_effect(Effect::notice(kind, message))
    .notifying()
}

/// A sync result finishes the session's turn only when it belongs to the
/// current one; results of an earlier turn leave the state alone.
fn sync_settled(state: &SessionState, context: &SessionContext, turn: u64) -> (TransitionResult, bool) {
    if *state == SessionState::Finalizing && turn == context.turn {
        (TransitionResult::new(SessionState::Done), true)
    } else {
        (TransitionResult::new(state.clone()), false)
    }
}

fn reset(state: &SessionState) -> TransitionResult {
    let mut result = TransitionResult::new(SessionState::Idle);
    if state.is_streaming() {
        result = result.with_effect(Effect::CloseStream);
    }
    result.with_effect(Effect::ResetConversation).notifying()
}
