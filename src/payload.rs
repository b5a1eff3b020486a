//! Payload builder
//!
//! Pure derivation of a generation request from the conversation, the
//! pending user message and the session configuration.

use crate::api::ChatRequest;
use crate::config::{RetrievalConfig, SessionConfig};
use crate::conversation::{Conversation, Message, Role};
use std::fmt::Write;

/// Models that take a system message alongside retrieval-augmented prompts
pub const NATIVE_SYSTEM_MESSAGE_MODELS: &[&str] = &[
    "gpt-4o",
    "gpt-4o-mini",
    "gpt-4-turbo",
    "gpt-4",
    "gpt-3.5-turbo",
    "claude-3-5-sonnet-20240620",
    "claude-3-opus-20240229",
    "claude-3-haiku-20240307",
];

pub fn accepts_native_system_message(model: &str) -> bool {
    NATIVE_SYSTEM_MESSAGE_MODELS.contains(&model)
}

/// Everything the request is derived from
#[derive(Debug, Clone, Copy)]
pub struct PayloadInput<'a> {
    pub model: &'a str,
    pub temperature: f32,
    pub system_prompt: &'a str,
    pub history: &'a [Message],
    pub retrieval: &'a RetrievalConfig,
    pub tools: &'a [String],
}

impl<'a> PayloadInput<'a> {
    /// Model settings from `config`, everything else from `conversation`
    pub fn new(config: &'a SessionConfig, conversation: &'a Conversation) -> Self {
        Self {
            model: &config.model,
            temperature: config.temperature,
            system_prompt: &conversation.system_prompt,
            history: conversation.messages(),
            retrieval: &conversation.retrieval,
            tools: &conversation.tools,
        }
    }
}

/// Build the streaming request for `user`.
///
/// With a retrieval index and a model outside
/// [`NATIVE_SYSTEM_MESSAGE_MODELS`], the system prompt and prior turns are
/// folded into one user message. Otherwise history passes through and the
/// system prompt travels in `system`.
pub fn build_request(input: PayloadInput<'_>, user: &Message) -> ChatRequest {
    let precombine = input.retrieval.is_enabled() && !accepts_native_system_message(input.model);

    let (messages, system) = if precombine {
        (vec![combine_prompts(input.system_prompt, input.history, user)], None)
    } else {
        let mut messages = input.history.to_vec();
        messages.push(user.clone());
        (messages, Some(input.system_prompt.to_string()))
    };

    ChatRequest {
        model: input.model.to_string(),
        messages,
        tools: input.tools.to_vec(),
        retrieval: input.retrieval.clone(),
        temperature: input.temperature,
        streaming: true,
        system,
    }
}

/// Fold the system prompt and a transcript of prior turns into the pending
/// user message. Attachments of the pending message are kept.
pub fn combine_prompts(system_prompt: &str, history: &[Message], user: &Message) -> Message {
    let mut content = String::new();
    if !system_prompt.trim().is_empty() {
        content.push_str(system_prompt.trim_end());
        content.push_str("\n\n");
    }

    let turns: Vec<_> = history.iter().filter(|m| m.role != Role::System).collect();
    if !turns.is_empty() {
        content.push_str("Conversation so far:\n");
        for message in turns {
            let _ = writeln!(content, "{}: {}", message.role.as_str(), message.content);
        }
        content.push('\n');
    }

    content.push_str("Question: ");
    content.push_str(&user.content);

    Message {
        role: Role::User,
        content,
        images: user.images.clone(),
        sources: user.sources.clone(),
        model: None,
    }
}
