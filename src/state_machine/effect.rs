//! Effects produced by state transitions

use super::state::{ErrorKind, SessionState};
use crate::api::ChatRecord;
use crate::conversation::Message;
use crate::stream::StreamEvent;

/// Effects to be executed after a state transition, in order
#[derive(Debug, Clone)]
pub enum Effect {
    /// Build the payload from current history plus `user` and open a stream
    RequestStream { user: Message },

    /// Append a message to the conversation
    AppendMessage { message: Message },

    /// Append the temporary assistant reply
    BeginReply,

    /// Run a stream event through the consumer and publish the result
    Dispatch { event: StreamEvent },

    /// Close the open stream connection, if any
    CloseStream,

    /// Drop the temporary reply of a failed turn
    DiscardReply,

    /// Create or update the stored conversation
    SyncConversation,

    /// Record the stored conversation's identifier
    AdoptSessionId { session_id: String },

    /// Truncate for regeneration and re-seed the input
    TruncateForRegenerate { index: usize },

    /// Clear the conversation
    ResetConversation,

    /// Replace the conversation with a stored one
    LoadConversation { record: ChatRecord },

    /// Notify subscribers of the new state
    NotifyState { state: SessionState },

    /// Show a notice to the user
    Notice { kind: ErrorKind, message: String },
}

impl Effect {
    pub fn notify_state(state: &SessionState) -> Self {
        Effect::NotifyState {
            state: state.clone(),
        }
    }

    pub fn notice(kind: ErrorKind, message: impl Into<String>) -> Self {
        Effect::Notice {
            kind,
            message: message.into(),
        }
    }
}
