//! Session runtime executor

use super::traits::{ChatStore, GenerationClient};
use super::{SessionHandle, SessionUpdate};

use crate::api::ApiError;
use crate::config::SessionConfig;
use crate::conversation::{Conversation, Message, StoreError};
use crate::payload::{build_request, PayloadInput};
use crate::state_machine::{transition, Effect, Event, SessionContext, SessionState, TransitionError};
use crate::stream::{forward_frames, Dispatch, StreamConsumer};
use crate::sync::sync_conversation;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

/// Longest a create or update may take before it counts as failed
const SYNC_TIMEOUT: Duration = Duration::from_secs(30);

/// Failures while handling one event
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error("Conversation store rejected update: {0}")]
    Store(#[from] StoreError),
}

/// Runtime for one chat session, generic over its service clients
pub struct SessionRuntime<G, S>
where
    G: GenerationClient + 'static,
    S: ChatStore + 'static,
{
    config: SessionConfig,
    conversation: Conversation,
    state: SessionState,
    client: Arc<G>,
    store: Arc<S>,
    /// Consumer of the open stream, if any
    consumer: Option<StreamConsumer>,
    /// Closes the open stream
    stream_cancel: Option<CancellationToken>,
    /// Number of the most recent turn
    turn: u64,
    /// Turn whose sync result is awaited
    pending_sync: Option<u64>,
    /// Turn whose sync waits for `pending_sync` to settle
    deferred_sync: Option<u64>,
    sync_timeout: Duration,
    event_rx: mpsc::Receiver<Event>,
    event_tx: mpsc::Sender<Event>,
    broadcast_tx: broadcast::Sender<SessionUpdate>,
    shutdown: CancellationToken,
}

impl<G, S> SessionRuntime<G, S>
where
    G: GenerationClient + 'static,
    S: ChatStore + 'static,
{
    pub fn new(config: SessionConfig, client: Arc<G>, store: Arc<S>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(64);
        let (broadcast_tx, _) = broadcast::channel(256);
        Self {
            conversation: Conversation::from_config(&config),
            config,
            state: SessionState::Idle,
            client,
            store,
            consumer: None,
            stream_cancel: None,
            turn: 0,
            pending_sync: None,
            deferred_sync: None,
            sync_timeout: SYNC_TIMEOUT,
            event_rx,
            event_tx,
            broadcast_tx,
            shutdown: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn with_sync_timeout(mut self, timeout: Duration) -> Self {
        self.sync_timeout = timeout;
        self
    }

    pub fn handle(&self) -> SessionHandle<S> {
        SessionHandle {
            event_tx: self.event_tx.clone(),
            broadcast_tx: self.broadcast_tx.clone(),
            store: self.store.clone(),
            shutdown: self.shutdown.clone(),
        }
    }

    /// Process events until shut down, then hand back the configuration to
    /// save.
    pub async fn run(mut self) -> SessionConfig {
        tracing::info!(model = %self.config.model, "Starting session runtime");
        let shutdown = self.shutdown.clone();

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                Some(event) = self.event_rx.recv() => {
                    if let Err(e) = self.process_event(event).await {
                        tracing::warn!(error = %e, state = self.state.name(), "Event rejected");
                    }
                }
                else => break,
            }
        }

        self.close_stream();
        self.config.system_prompt.clone_from(&self.conversation.system_prompt);
        self.config.retrieval = self.conversation.retrieval.clone();
        self.config.tools.clone_from(&self.conversation.tools);

        tracing::info!(turns = self.turn, "Session runtime stopped");
        self.config
    }

    fn context(&self) -> SessionContext {
        SessionContext {
            turn: self.turn,
            history_len: self.conversation.len(),
            session_id: self.conversation.session_id().map(str::to_string),
        }
    }

    /// Results of a superseded stream or sync are dropped
    fn is_stale(&self, event: &Event) -> bool {
        let Some(turn) = event.turn() else {
            return false;
        };
        match event {
            Event::SyncComplete { .. } | Event::SyncFailed { .. } => self.pending_sync != Some(turn),
            _ => self.consumer.as_ref().map(StreamConsumer::turn) != Some(turn),
        }
    }

    async fn process_event(&mut self, event: Event) -> Result<(), RuntimeError> {
        if self.is_stale(&event) {
            tracing::debug!(turn = ?event.turn(), current = self.turn, "Dropping stale event");
            return Ok(());
        }
        let settles_sync = matches!(event, Event::SyncComplete { .. } | Event::SyncFailed { .. });
        if settles_sync {
            self.pending_sync = None;
        }

        let result = match transition(&self.state, &self.context(), event) {
            Ok(r) => r,
            Err(e) => {
                // Rejections are user-facing (e.g. "a reply is still in progress")
                self.broadcast(SessionUpdate::Notice {
                    kind: e.kind(),
                    message: e.to_string(),
                });
                return Err(e.into());
            }
        };

        let old_state = std::mem::replace(&mut self.state, result.new_state);
        if old_state != self.state {
            tracing::debug!(from = old_state.name(), to = self.state.name(), "State transition");
        }

        for effect in result.effects {
            self.execute_effect(effect).await?;
        }

        // One create/update at a time, so a later turn sees the adopted id
        if settles_sync {
            if let Some(turn) = self.deferred_sync.take() {
                self.start_sync(turn);
            }
        }
        Ok(())
    }

    fn broadcast(&self, update: SessionUpdate) {
        // No subscribers is fine
        let _ = self.broadcast_tx.send(update);
    }

    /// Write the conversation as it is now, tagged with `turn`
    fn start_sync(&mut self, turn: u64) {
        self.pending_sync = Some(turn);

        let fields = self.conversation.chat_fields();
        let session_id = self.conversation.session_id().map(str::to_string);
        let store = self.store.clone();
        let event_tx = self.event_tx.clone();
        let timeout = self.sync_timeout;
        tokio::spawn(async move {
            let synced = tokio::time::timeout(
                timeout,
                sync_conversation(&*store, session_id.as_deref(), &fields),
            )
            .await
            .unwrap_or_else(|_| {
                tracing::warn!(turn, timeout_ms = %timeout.as_millis(), "Conversation sync timed out");
                Err(ApiError::network(format!(
                    "No response from the server after {}s",
                    timeout.as_secs()
                )))
            });
            let event = match synced {
                Ok(outcome) => Event::SyncComplete { turn, outcome },
                Err(e) => Event::SyncFailed {
                    turn,
                    message: e.message,
                },
            };
            let _ = event_tx.send(event).await;
        });
    }

    fn close_stream(&mut self) {
        if let Some(token) = self.stream_cancel.take() {
            token.cancel();
        }
        self.consumer = None;
    }

    /// Execute an effect
    #[allow(clippy::too_many_lines)] // One arm per effect
    async fn execute_effect(&mut self, effect: Effect) -> Result<(), RuntimeError> {
        match effect {
            Effect::RequestStream { user } => {
                self.turn += 1;
                let turn = self.turn;
                let request = build_request(PayloadInput::new(&self.config, &self.conversation), &user);

                let cancel = CancellationToken::new();
                self.stream_cancel = Some(cancel.clone());
                self.consumer = Some(StreamConsumer::new(turn));

                let client = self.client.clone();
                let event_tx = self.event_tx.clone();
                tokio::spawn(async move {
                    tracing::info!(turn, model = %request.model, "Requesting stream (background)");

                    let opened = tokio::select! {
                        biased;
                        () = cancel.cancelled() => return,
                        opened = client.open_stream(&request) => opened,
                    };
                    match opened {
                        Ok(frames) => forward_frames(frames, turn, event_tx, cancel).await,
                        Err(e) => {
                            tracing::warn!(turn, error = %e, kind = ?e.kind, "Failed to open stream");
                            let _ = event_tx
                                .send(Event::TransportError {
                                    turn,
                                    message: e.message,
                                })
                                .await;
                        }
                    }
                });
            }

            Effect::AppendMessage { message } => {
                let index = self.conversation.push(message.clone())?;
                self.broadcast(SessionUpdate::MessageAppended { index, message });
            }

            Effect::BeginReply => {
                let index = self.conversation.begin_reply(&self.config.model)?;
                self.broadcast(SessionUpdate::MessageAppended {
                    index,
                    message: self.conversation.messages()[index].clone(),
                });
            }

            Effect::Dispatch { event } => {
                let Some(consumer) = self.consumer.as_mut() else {
                    tracing::warn!("Stream event with no open stream");
                    return Ok(());
                };
                match consumer.dispatch(event) {
                    Dispatch::Publish(content) => {
                        self.conversation.publish_partial(&content)?;
                        self.broadcast(SessionUpdate::Partial { content });
                    }
                    Dispatch::Finalize(content) => {
                        let message = Message::assistant(content, self.config.model.clone());
                        let index = self.conversation.finalize_reply(message.clone())?;
                        tracing::info!(turn = self.turn, chars = message.content.len(), "Reply finalized");
                        self.broadcast(SessionUpdate::Finalized { index, message });
                    }
                    Dispatch::Document(payload) => {
                        if self.config.surface_documents {
                            self.broadcast(SessionUpdate::Document { payload });
                        }
                    }
                    Dispatch::Failed(message) => {
                        tracing::warn!(turn = self.turn, %message, "Stream reported failure");
                    }
                }
            }

            Effect::CloseStream => self.close_stream(),

            Effect::DiscardReply => {
                if self.conversation.discard_reply().is_some() {
                    self.broadcast(SessionUpdate::ReplyDiscarded);
                }
            }

            Effect::SyncConversation => {
                if let Some(pending) = self.pending_sync {
                    tracing::debug!(turn = self.turn, pending, "Sync deferred until the previous one settles");
                    self.deferred_sync = Some(self.turn);
                } else {
                    self.start_sync(self.turn);
                }
            }

            Effect::AdoptSessionId { session_id } => {
                tracing::info!(%session_id, "Conversation stored");
                self.conversation.set_session_id(session_id.clone());
                self.broadcast(SessionUpdate::SessionAssigned { session_id });
            }

            Effect::TruncateForRegenerate { index } => {
                let text = self.conversation.truncate_for_regenerate(index)?;
                self.broadcast(SessionUpdate::InputSeeded {
                    text,
                    history_len: self.conversation.len(),
                });
            }

            Effect::ResetConversation => {
                self.close_stream();
                self.pending_sync = None;
                self.deferred_sync = None;
                self.conversation.reset();
                self.broadcast(SessionUpdate::ConversationReset);
            }

            Effect::LoadConversation { record } => {
                let session_id = record.id.clone();
                // Results for the replaced conversation must not land on this one
                self.pending_sync = None;
                self.deferred_sync = None;
                self.conversation.load(record);
                tracing::info!(%session_id, messages = self.conversation.len(), "Conversation loaded");
                self.broadcast(SessionUpdate::ConversationLoaded {
                    session_id,
                    messages: self.conversation.messages().to_vec(),
                });
            }

            Effect::NotifyState { state } => {
                self.broadcast(SessionUpdate::StateChange { state });
            }

            Effect::Notice { kind, message } => {
                tracing::warn!(?kind, %message, "Session notice");
                self.broadcast(SessionUpdate::Notice { kind, message });
            }
        }
        Ok(())
    }
}
