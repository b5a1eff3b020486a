//! Client side of the chat API
//!
//! Wire types, SSE decoding and the HTTP transport for the generation,
//! persistence and model-listing endpoints.

mod error;
mod http;
mod sse;
mod types;

pub use error::{detail_message, ApiError, ApiErrorKind};
pub use http::{decode_frames, HttpApi};
pub use sse::{SseDecoder, SseFrame};
pub use types::*;

use crate::runtime::GenerationClient;

/// Fetch the available models, sorted by name for display
pub async fn load_models<G: GenerationClient + ?Sized>(client: &G) -> Result<Vec<ModelInfo>, ApiError> {
    let mut models = client.list_models().await?;
    sort_models(&mut models);
    tracing::info!(count = models.len(), "Loaded models");
    Ok(models)
}

/// Case-insensitive by `model_name`, exact name breaking ties
pub fn sort_models(models: &mut [ModelInfo]) {
    models.sort_by(|a, b| {
        a.model_name
            .to_lowercase()
            .cmp(&b.model_name.to_lowercase())
            .then_with(|| a.model_name.cmp(&b.model_name))
    });
}

/// Whether `name` is among the listed models
pub fn has_model(models: &[ModelInfo], name: &str) -> bool {
    models.iter().any(|m| m.model_name == name)
}
