//! Conversation store
//!
//! Ordered message history for one session. The only in-place mutation the
//! store allows is swapping the temporary assistant reply for its finalized
//! counterpart, once, at the same index.

use crate::api::{ChatFields, ChatRecord};
use crate::config::{RetrievalConfig, SessionConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// Reference to a document attached to a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub src: String,
    /// MIME type of the referenced content
    #[serde(rename = "type")]
    pub media_type: String,
}

/// A single chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<DocumentRef>,
    /// Model that produced the message (assistant messages only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            images: vec![],
            sources: vec![],
            model: None,
        }
    }

    pub fn assistant(content: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            images: vec![],
            sources: vec![],
            model: Some(model.into()),
        }
    }

    #[must_use]
    pub fn with_images(mut self, images: Vec<String>) -> Self {
        self.images = images;
        self
    }

    #[must_use]
    pub fn with_sources(mut self, sources: Vec<DocumentRef>) -> Self {
        self.sources = sources;
        self
    }
}

/// Conversation store invariant violations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("An assistant reply is still pending")]
    ReplyPending,
    #[error("No assistant reply is pending")]
    NoPendingReply,
    #[error("Streamed content may only grow")]
    ContentRewound,
    #[error("Message index {index} is out of range (history has {len} messages)")]
    OutOfRange { index: usize, len: usize },
}

/// Ordered message history plus the settings stored alongside it
#[derive(Debug, Clone, PartialEq)]
pub struct Conversation {
    session_id: Option<String>,
    pub system_prompt: String,
    messages: Vec<Message>,
    pub retrieval: RetrievalConfig,
    pub tools: Vec<String>,
    /// Index of the unresolved temporary assistant message
    placeholder: Option<usize>,
}

impl Conversation {
    pub fn new(system_prompt: impl Into<String>, retrieval: RetrievalConfig, tools: Vec<String>) -> Self {
        Self {
            session_id: None,
            system_prompt: system_prompt.into(),
            messages: vec![],
            retrieval,
            tools,
            placeholder: None,
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(
            config.system_prompt.clone(),
            config.retrieval.clone(),
            config.tools.clone(),
        )
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn set_session_id(&mut self, id: impl Into<String>) {
        self.session_id = Some(id.into());
    }

    /// All messages, including an unresolved placeholder
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn has_pending_reply(&self) -> bool {
        self.placeholder.is_some()
    }

    /// Append a message to the history
    pub fn push(&mut self, message: Message) -> Result<usize, StoreError> {
        if self.placeholder.is_some() {
            return Err(StoreError::ReplyPending);
        }
        self.messages.push(message);
        Ok(self.messages.len() - 1)
    }

    /// Append the temporary assistant message for a new turn
    pub fn begin_reply(&mut self, model: &str) -> Result<usize, StoreError> {
        let index = self.push(Message::assistant("", model))?;
        self.placeholder = Some(index);
        Ok(index)
    }

    /// Make accumulated stream content visible in the placeholder
    pub fn publish_partial(&mut self, content: &str) -> Result<(), StoreError> {
        let index = self.placeholder.ok_or(StoreError::NoPendingReply)?;
        let slot = &mut self.messages[index];
        if !content.starts_with(slot.content.as_str()) {
            return Err(StoreError::ContentRewound);
        }
        slot.content = content.to_string();
        Ok(())
    }

    /// Swap the placeholder for its finalized message
    pub fn finalize_reply(&mut self, message: Message) -> Result<usize, StoreError> {
        let index = self.placeholder.take().ok_or(StoreError::NoPendingReply)?;
        self.messages[index] = message;
        Ok(index)
    }

    /// Drop the placeholder of a turn that failed
    pub fn discard_reply(&mut self) -> Option<Message> {
        let index = self.placeholder.take()?;
        Some(self.messages.remove(index))
    }

    /// Truncate history to just before message `index - 1` and return that
    /// message's content so it can be re-entered.
    pub fn truncate_for_regenerate(&mut self, index: usize) -> Result<String, StoreError> {
        if self.placeholder.is_some() {
            return Err(StoreError::ReplyPending);
        }
        let len = self.messages.len();
        if index == 0 || index > len {
            return Err(StoreError::OutOfRange { index, len });
        }
        let seed = self.messages[index - 1].content.clone();
        self.messages.truncate(index - 1);
        Ok(seed)
    }

    /// Return to a blank conversation, keeping the prompt and tool selection
    pub fn reset(&mut self) {
        self.messages.clear();
        self.placeholder = None;
        self.session_id = None;
        self.retrieval.index_name.clear();
    }

    /// Replace everything with a stored chat
    pub fn load(&mut self, record: ChatRecord) {
        self.session_id = Some(record.id);
        self.system_prompt = record.system;
        self.messages = record.messages;
        if let Some(retrieval) = record.retrieval {
            self.retrieval = retrieval;
        }
        self.tools = record.tools;
        self.placeholder = None;
    }

    /// Fields sent to the persistence service
    pub fn chat_fields(&self) -> ChatFields {
        let messages = match self.placeholder {
            Some(index) => self
                .messages
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != index)
                .map(|(_, m)| m.clone())
                .collect(),
            None => self.messages.clone(),
        };
        ChatFields {
            system: self.system_prompt.clone(),
            messages,
            retrieval: self.retrieval.clone(),
            tools: self.tools.clone(),
        }
    }
}
