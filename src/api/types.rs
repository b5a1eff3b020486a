//! Wire types for the generation and persistence services

use crate::config::RetrievalConfig;
use crate::conversation::Message;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Body of a streaming generation request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub tools: Vec<String>,
    pub retrieval: RetrievalConfig,
    pub temperature: f32,
    pub streaming: bool,
    /// System prompt carried outside the message list
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
}

/// Model advertised by the generation service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub model_name: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ModelInfo {
    pub fn named(model_name: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
            extra: serde_json::Map::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ModelList {
    pub models: Vec<ModelInfo>,
}

/// Fields written on create and update
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatFields {
    pub system: String,
    pub messages: Vec<Message>,
    pub retrieval: RetrievalConfig,
    pub tools: Vec<String>,
}

/// A stored conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRecord {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub system: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub retrieval: Option<RetrievalConfig>,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ChatRecord {
    pub fn from_fields(id: impl Into<String>, fields: &ChatFields) -> Self {
        Self {
            id: id.into(),
            system: fields.system.clone(),
            messages: fields.messages.clone(),
            retrieval: Some(fields.retrieval.clone()),
            tools: fields.tools.clone(),
            updated_at: None,
        }
    }

    /// Short label for history listings
    pub fn title(&self) -> String {
        let first = self
            .messages
            .iter()
            .find(|m| m.role == crate::conversation::Role::User)
            .map_or("(empty)", |m| m.content.as_str());
        let mut title: String = first.chars().take(48).collect();
        if first.chars().count() > 48 {
            title.push('…');
        }
        title
    }
}

/// `{chat: {...}}`
#[derive(Debug, Deserialize)]
pub struct ChatEnvelope {
    pub chat: ChatRecord,
}

/// `{chats: [...]}`
#[derive(Debug, Deserialize)]
pub struct ChatListEnvelope {
    pub chats: Vec<ChatRecord>,
}
