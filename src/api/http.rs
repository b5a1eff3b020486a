//! reqwest transport for the generation and persistence services

use super::error::ApiError;
use super::sse::{SseDecoder, SseFrame};
use super::types::{
    ChatEnvelope, ChatFields, ChatListEnvelope, ChatRecord, ChatRequest, ModelInfo, ModelList,
};
use crate::config::ClientConfig;
use crate::preview::DocumentFetcher;
use crate::runtime::{ChatStore, GenerationClient};
use crate::stream::FrameStream;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use std::collections::VecDeque;
use std::fmt::Display;
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Applies to every call except the streaming one
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// HTTP client for one API deployment
#[derive(Debug, Clone)]
pub struct HttpApi {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpApi {
    pub fn new(config: &ClientConfig) -> Result<Self, ApiError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| ApiError::unknown(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> Result<String, ApiError> {
        let response = self
            .authorize(builder)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ApiError::network(format!("Failed to read response: {e}")))?;

        if !status.is_success() {
            return Err(ApiError::from_status(status.as_u16(), &body));
        }
        Ok(body)
    }

    async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, ApiError> {
        let body = self.send(builder).await?;
        serde_json::from_str(&body)
            .map_err(|e| ApiError::unknown(format!("Failed to parse response: {e} - body: {body}")))
    }
}

#[async_trait]
impl GenerationClient for HttpApi {
    async fn open_stream(&self, request: &ChatRequest) -> Result<FrameStream, ApiError> {
        tracing::debug!(model = %request.model, messages = request.messages.len(), "Opening stream");

        let response = self
            .authorize(self.client.post(self.url("/api/v1/chat")))
            .header("Accept", "text/event-stream")
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::from_status(status.as_u16(), &body));
        }

        Ok(decode_frames(response.bytes_stream()))
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>, ApiError> {
        let list: ModelList = self.send_json(self.client.get(self.url("/api/v1/models"))).await?;
        Ok(list.models)
    }
}

#[async_trait]
impl ChatStore for HttpApi {
    async fn create(&self, fields: &ChatFields) -> Result<ChatRecord, ApiError> {
        let envelope: ChatEnvelope = self
            .send_json(self.client.post(self.url("/api/v1/chat/history")).json(fields))
            .await?;
        Ok(envelope.chat)
    }

    async fn update(&self, id: &str, fields: &ChatFields) -> Result<ChatRecord, ApiError> {
        let envelope: ChatEnvelope = self
            .send_json(
                self.client
                    .put(self.url(&format!("/api/v1/chat/history/{id}")))
                    .json(fields),
            )
            .await?;
        Ok(with_id(envelope.chat, id))
    }

    async fn list(&self) -> Result<Vec<ChatRecord>, ApiError> {
        let envelope: ChatListEnvelope = self
            .send_json(self.client.get(self.url("/api/v1/chat/history")))
            .await?;
        Ok(envelope.chats)
    }

    async fn delete(&self, id: &str) -> Result<(), ApiError> {
        self.send(self.client.delete(self.url(&format!("/api/v1/chat/history/{id}"))))
            .await
            .map(|_| ())
    }

    async fn find(&self, id: &str) -> Result<ChatRecord, ApiError> {
        let envelope: ChatEnvelope = self
            .send_json(self.client.get(self.url(&format!("/api/v1/chat/history/{id}"))))
            .await?;
        Ok(with_id(envelope.chat, id))
    }
}

#[async_trait]
impl DocumentFetcher for HttpApi {
    async fn fetch_text(&self, src: &str) -> Result<String, ApiError> {
        let url = if src.starts_with('/') {
            self.url(src)
        } else {
            src.to_string()
        };
        self.send(self.client.get(url)).await
    }
}

/// The service may omit the id from records it returns by id
fn with_id(mut record: ChatRecord, id: &str) -> ChatRecord {
    if record.id.is_empty() {
        record.id = id.to_string();
    }
    record
}

/// Decode an SSE body into frames.
///
/// A read failure ends the stream after one `Err`; a frame left unterminated
/// at end of body is still delivered.
pub fn decode_frames<S, B, E>(body: S) -> FrameStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    struct Decoding<S> {
        body: std::pin::Pin<Box<S>>,
        decoder: SseDecoder,
        pending: VecDeque<SseFrame>,
        finished: bool,
    }

    let state = Decoding {
        body: Box::pin(body),
        decoder: SseDecoder::default(),
        pending: VecDeque::new(),
        finished: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(frame) = state.pending.pop_front() {
                return Some((Ok(frame), state));
            }
            if state.finished {
                return None;
            }
            match state.body.next().await {
                Some(Ok(chunk)) => {
                    let frames = state.decoder.push(chunk.as_ref());
                    state.pending.extend(frames);
                }
                Some(Err(e)) => {
                    state.finished = true;
                    return Some((Err(ApiError::network(format!("Stream interrupted: {e}"))), state));
                }
                None => {
                    state.finished = true;
                    let last = state.decoder.finish();
                    state.pending.extend(last);
                }
            }
        }
    })
    .boxed()
}
