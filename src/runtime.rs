//! Session runtime
//!
//! Owns the conversation and drives the state machine: events arrive on an
//! mpsc channel and are applied in order, effects run against the
//! generation and persistence services, and every visible change is
//! broadcast as a [`SessionUpdate`].

mod executor;
pub mod traits;


pub use executor::{RuntimeError, SessionRuntime};
pub use traits::*;

use crate::api::{ApiError, ChatRecord};
use crate::conversation::{DocumentRef, Message};
use crate::state_machine::{ErrorKind, Event, SessionState};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

/// Changes broadcast to subscribers
#[derive(Debug, Clone)]
pub enum SessionUpdate {
    StateChange {
        state: SessionState,
    },
    /// A user message or the temporary assistant reply was appended
    MessageAppended {
        index: usize,
        message: Message,
    },
    /// Current content of the temporary reply
    Partial {
        content: String,
    },
    Finalized {
        index: usize,
        message: Message,
    },
    ReplyDiscarded,
    Document {
        payload: Value,
    },
    /// History was truncated for regeneration; `text` goes back in the input
    InputSeeded {
        text: String,
        history_len: usize,
    },
    SessionAssigned {
        session_id: String,
    },
    Notice {
        kind: ErrorKind,
        message: String,
    },
    ConversationReset,
    ConversationLoaded {
        session_id: String,
        messages: Vec<Message>,
    },
}

/// Handle to interact with a running session
pub struct SessionHandle<S: ChatStore + 'static> {
    event_tx: mpsc::Sender<Event>,
    broadcast_tx: broadcast::Sender<SessionUpdate>,
    store: Arc<S>,
    shutdown: CancellationToken,
}

impl<S: ChatStore + 'static> Clone for SessionHandle<S> {
    fn clone(&self) -> Self {
        Self {
            event_tx: self.event_tx.clone(),
            broadcast_tx: self.broadcast_tx.clone(),
            store: self.store.clone(),
            shutdown: self.shutdown.clone(),
        }
    }
}

impl<S: ChatStore + 'static> SessionHandle<S> {
    pub fn subscribe(&self) -> broadcast::Receiver<SessionUpdate> {
        self.broadcast_tx.subscribe()
    }

    async fn send(&self, event: Event) -> Result<(), ApiError> {
        self.event_tx
            .send(event)
            .await
            .map_err(|e| ApiError::unknown(format!("Session stopped: {e}")))
    }

    pub async fn submit(
        &self,
        text: impl Into<String>,
        images: Vec<String>,
        sources: Vec<DocumentRef>,
    ) -> Result<(), ApiError> {
        self.send(Event::UserSubmit {
            text: text.into(),
            images,
            sources,
        })
        .await
    }

    pub async fn regenerate(&self, index: usize) -> Result<(), ApiError> {
        self.send(Event::Regenerate { index }).await
    }

    pub async fn reset(&self) -> Result<(), ApiError> {
        self.send(Event::Reset).await
    }

    /// Fetch a stored chat and make it the current conversation
    pub async fn load_chat(&self, id: &str) -> Result<(), ApiError> {
        let record = self.store.find(id).await?;
        self.send(Event::ChatLoaded { record }).await
    }

    pub async fn delete_chat(&self, id: &str) -> Result<(), ApiError> {
        self.store.delete(id).await?;
        tracing::info!(chat_id = %id, "Deleted stored chat");
        self.send(Event::ChatDeleted { id: id.to_string() }).await
    }

    pub async fn list_chats(&self) -> Result<Vec<ChatRecord>, ApiError> {
        self.store.list().await
    }

    /// Stop the runtime; `run` returns the final configuration
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

/// Read-only mirror of the conversation built from updates
#[derive(Debug, Clone, Default)]
pub struct SessionView {
    pub messages: Vec<Message>,
    pub state: SessionState,
    pub session_id: Option<String>,
}

impl SessionView {
    pub fn apply(&mut self, update: &SessionUpdate) {
        match update {
            SessionUpdate::StateChange { state } => self.state = state.clone(),
            SessionUpdate::MessageAppended { index, message }
            | SessionUpdate::Finalized { index, message } => {
                if *index < self.messages.len() {
                    self.messages[*index] = message.clone();
                } else {
                    self.messages.push(message.clone());
                }
            }
            SessionUpdate::Partial { content } => {
                if let Some(last) = self.messages.last_mut() {
                    last.content.clone_from(content);
                }
            }
            SessionUpdate::ReplyDiscarded => {
                self.messages.pop();
            }
            SessionUpdate::InputSeeded { history_len, .. } => self.messages.truncate(*history_len),
            SessionUpdate::SessionAssigned { session_id } => self.session_id = Some(session_id.clone()),
            SessionUpdate::ConversationReset => {
                self.messages.clear();
                self.session_id = None;
            }
            SessionUpdate::ConversationLoaded {
                session_id,
                messages,
            } => {
                self.messages.clone_from(messages);
                self.session_id = Some(session_id.clone());
            }
            SessionUpdate::Document { .. } | SessionUpdate::Notice { .. } => {}
        }
    }

    /// Document attached to message `index` (1-based, as displayed)
    pub fn source(&self, index: usize, source: usize) -> Option<&DocumentRef> {
        self.messages
            .get(index.checked_sub(1)?)?
            .sources
            .get(source.checked_sub(1)?)
    }
}
