//! Conversation history access and pending-request recovery.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::agent::extract::ParameterExtractor;
use crate::agent::pending::{PendingKind, PendingRequest};
use crate::agent::signal::{Reply, prompt_marker, resolved_marker};
use crate::error::HistoryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// One stored message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub role: Role,
    pub text: String,
    /// Action labels attached to assistant replies (`prompt:transfer`, ...).
    #[serde(default)]
    pub actions: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl HistoryMessage {
    pub fn user(text: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            actions: Vec::new(),
            timestamp,
        }
    }

    pub fn assistant(reply: &Reply, timestamp: DateTime<Utc>) -> Self {
        Self {
            role: Role::Assistant,
            text: reply.text.clone(),
            actions: reply.markers.clone(),
            timestamp,
        }
    }

    fn has_action(&self, action: &str) -> bool {
        self.actions.iter().any(|a| a == action)
    }
}

/// Read access to a session's recent messages.
#[async_trait]
pub trait ConversationHistory: Send + Sync {
    /// Up to `limit` most recent messages, oldest first.
    async fn recent(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<HistoryMessage>, HistoryError>;
}

/// Process-local history, used by the REPL and tests.
#[derive(Default)]
pub struct InMemoryHistory {
    sessions: RwLock<HashMap<String, Vec<HistoryMessage>>>,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, session_id: &str, message: HistoryMessage) {
        self.sessions
            .write()
            .await
            .entry(session_id.to_string())
            .or_default()
            .push(message);
    }

    pub async fn record_user(&self, session_id: &str, text: &str) {
        self.record(session_id, HistoryMessage::user(text, Utc::now()))
            .await;
    }

    pub async fn record_reply(&self, session_id: &str, reply: &Reply) {
        self.record(session_id, HistoryMessage::assistant(reply, Utc::now()))
            .await;
    }
}

#[async_trait]
impl ConversationHistory for InMemoryHistory {
    async fn recent(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<HistoryMessage>, HistoryError> {
        let sessions = self.sessions.read().await;
        let messages = sessions.get(session_id).map(Vec::as_slice).unwrap_or(&[]);
        let start = messages.len().saturating_sub(limit);
        Ok(messages[start..].to_vec())
    }
}

/// Rebuild the pending request of `kind` from history, if one is still open.
///
/// Walks backwards from the newest message. A `resolved:<kind>` action ends
/// the search empty-handed. The newest `prompt:<kind>` action wins; its
/// parameters are re-extracted from the user message right before it, never
/// from the prompt text. The rebuilt request is dated at the prompt.
pub fn recover_pending(
    kind: PendingKind,
    messages: &[HistoryMessage],
    extractor: &ParameterExtractor,
) -> Option<PendingRequest> {
    let prompt = prompt_marker(kind);
    let resolved = resolved_marker(kind);

    let (index, prompt_message) = messages
        .iter()
        .enumerate()
        .rev()
        .filter(|(_, message)| message.role == Role::Assistant)
        .find(|(_, message)| message.has_action(&resolved) || message.has_action(&prompt))?;
    if prompt_message.has_action(&resolved) {
        return None;
    }

    let original = messages[..index]
        .iter()
        .rev()
        .find(|message| message.role == Role::User)?;
    match extractor.extract(kind, &original.text) {
        Ok(request) if PendingKind::of(&request) == kind => Some(PendingRequest::new(
            original.text.clone(),
            request,
            prompt_message.timestamp,
        )),
        Ok(_) => None,
        Err(error) => {
            tracing::debug!(%kind, %error, "prompted message no longer extracts");
            None
        }
    }
}
