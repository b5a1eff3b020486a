//! Trait abstractions for runtime I/O
//!
//! These traits enable testing the runtime with mock implementations.

use crate::api::{ApiError, ChatFields, ChatRecord, ChatRequest, ModelInfo};
use crate::stream::FrameStream;
use async_trait::async_trait;
use std::sync::Arc;

/// Client for the generation service
#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// Send a request and open its event stream
    async fn open_stream(&self, request: &ChatRequest) -> Result<FrameStream, ApiError>;

    /// Models the service can answer with
    async fn list_models(&self) -> Result<Vec<ModelInfo>, ApiError>;
}

/// Persistence service for conversations
#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn create(&self, fields: &ChatFields) -> Result<ChatRecord, ApiError>;

    async fn update(&self, id: &str, fields: &ChatFields) -> Result<ChatRecord, ApiError>;

    async fn list(&self) -> Result<Vec<ChatRecord>, ApiError>;

    async fn delete(&self, id: &str) -> Result<(), ApiError>;

    async fn find(&self, id: &str) -> Result<ChatRecord, ApiError>;
}

// ============================================================================
// Arc implementations for trait objects
// ============================================================================

#[async_trait]
impl<T: GenerationClient + ?Sized> GenerationClient for Arc<T> {
    async fn open_stream(&self, request: &ChatRequest) -> Result<FrameStream, ApiError> {
        (**self).open_stream(request).await
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>, ApiError> {
        (**self).list_models().await
    }
}

#[async_trait]
impl<T: ChatStore + ?Sized> ChatStore for Arc<T> {
    async fn create(&self, fields: &ChatFields) -> Result<ChatRecord, ApiError> {
        (**self).create(fields).await
    }

    async fn update(&self, id: &str, fields: &ChatFields) -> Result<ChatRecord, ApiError> {
        (**self).update(id, fields).await
    }

    async fn list(&self) -> Result<Vec<ChatRecord>, ApiError> {
        (**self).list().await
    }

    async fn delete(&self, id: &str) -> Result<(), ApiError> {
        (**self).delete(id).await
    }

    async fn find(&self, id: &str) -> Result<ChatRecord, ApiError> {
        (**self).find(id).await
    }
}
