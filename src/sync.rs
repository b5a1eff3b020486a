//! Persistence synchronizer
//!
//! Writes a finished turn to the persistence service: the first successful
//! turn of a conversation creates the stored record, later turns update it.

use crate::api::{ApiError, ChatFields};
use crate::runtime::ChatStore;
use std::time::Instant;

/// What a successful sync did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// A record was created; the session adopts its id
    Created { session_id: String },
    Updated,
}

/// Create or update the stored conversation
pub async fn sync_conversation<S: ChatStore + ?Sized>(
    store: &S,
    session_id: Option<&str>,
    fields: &ChatFields,
) -> Result<SyncOutcome, ApiError> {
    let start = Instant::now();
    let result = match session_id {
        None => store.create(fields).await.and_then(|record| {
            if record.id.is_empty() {
                Err(ApiError::unknown("Create response carried no chat id"))
            } else {
                Ok(SyncOutcome::Created {
                    session_id: record.id,
                })
            }
        }),
        Some(id) => store.update(id, fields).await.map(|_| SyncOutcome::Updated),
    };

    match &result {
        Ok(outcome) => tracing::info!(
            ?outcome,
            messages = fields.messages.len(),
            duration_ms = %start.elapsed().as_millis(),
            "Conversation synced"
        ),
        Err(e) => tracing::warn!(
            session_id = session_id.unwrap_or("-"),
            error = %e,
            kind = ?e.kind,
            "Conversation sync failed"
        ),
    }

    result
}
