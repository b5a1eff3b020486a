//! Chat session client
//!
//! Drives one conversation with a streaming text-generation service: sends
//! the user's turn, renders the reply as it streams in, and keeps a
//! persisted copy of the conversation in step with what the user sees.

pub mod api;
pub mod config;
pub mod conversation;
pub mod payload;
pub mod preview;
pub mod runtime;
pub mod state_machine;
pub mod stream;
pub mod sync;
