//! The two-phase confirmation protocol.
//!
//! A trigger message becomes a [`PendingRequest`] and a prompt. A later
//! accept or reject resolves it: the request is taken out of the session
//! before anything runs, so it executes at most once even if execution
//! re-enters the engine. When the live slot is empty the engine falls back to
//! rebuilding the request from conversation history.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::agent::extract::ParameterExtractor;
use crate::agent::history::{ConversationHistory, recover_pending};
use crate::agent::pending::{PendingKind, PendingRequest, Session};
use crate::agent::signal::{Decision, InboundSignal, NormalizedInput, Reply};
use crate::ops::OperationExecutor;

/// Default lifetime of an unanswered prompt.
pub const DEFAULT_PENDING_TTL: Duration = Duration::from_secs(300);
/// Default number of history messages scanned during recovery.
pub const DEFAULT_HISTORY_SCAN_LIMIT: usize = 20;

#[derive(Debug, Clone)]
pub struct ConfirmationConfig {
    pub pending_ttl: Duration,
    pub history_scan_limit: usize,
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            pending_ttl: DEFAULT_PENDING_TTL,
            history_scan_limit: DEFAULT_HISTORY_SCAN_LIMIT,
        }
    }
}

pub struct ConfirmationEngine {
    extractor: ParameterExtractor,
    executor: Arc<dyn OperationExecutor>,
    history: Option<Arc<dyn ConversationHistory>>,
    config: ConfirmationConfig,
}

impl ConfirmationEngine {
    pub fn new(
        extractor: ParameterExtractor,
        executor: Arc<dyn OperationExecutor>,
        config: ConfirmationConfig,
    ) -> Self {
        Self {
            extractor,
            executor,
            history: None,
            config,
        }
    }

    /// Enable recovery of pending requests from `history`.
    pub fn with_history(mut self, history: Arc<dyn ConversationHistory>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn config(&self) -> &ConfirmationConfig {
        &self.config
    }

    /// Process one inbound signal for `session`.
    ///
    /// Returns `None` when the message is neither a decision nor a trigger,
    /// leaving it to whoever handles ordinary conversation.
    pub async fn handle(
        &self,
        session: &Arc<Mutex<Session>>,
        signal: &InboundSignal,
    ) -> Option<Reply> {
        let input = NormalizedInput::from_signal(signal);
        let now = Utc::now();

        // A decision outranks a trigger in the same message.
        if let Some(decision) = input.decision {
            if let Some(reply) = self.resolve(session, &input, decision, now).await {
                return Some(reply);
            }
            if input.exact || input.scope.is_some() {
                return Some(Reply::nothing_pending(decision));
            }
        }

        self.start(session, &input, now).await
    }

    /// NONE -> AWAITING_CONFIRMATION.
    async fn start(
        &self,
        session: &Arc<Mutex<Session>>,
        input: &NormalizedInput,
        now: DateTime<Utc>,
    ) -> Option<Reply> {
        let kind = self.extractor.detect_trigger(&input.text)?;
        let request = match self.extractor.extract(kind, &input.text) {
            Ok(request) => request,
            Err(error) => {
                tracing::info!(%kind, %error, "trigger rejected during extraction");
                return Some(Reply::validation_error(kind, &error));
            }
        };

        let pending = PendingRequest::new(input.text.clone(), request, now);
        let mut state = session.lock().await;
        if let Some(replaced) = state.put(pending.clone()) {
            tracing::info!(
                session = %state.id,
                %kind,
                replaced = %replaced.id,
                "pending request superseded by a new one"
            );
        }
        tracing::info!(
            session = %state.id,
            %kind,
            pending = %pending.id,
            operation = pending.request.label(),
            "awaiting confirmation"
        );
        Some(Reply::prompt(&pending))
    }

    /// AWAITING_CONFIRMATION -> EXECUTING | CANCELLED.
    async fn resolve(
        &self,
        session: &Arc<Mutex<Session>>,
        input: &NormalizedInput,
        decision: Decision,
        now: DateTime<Utc>,
    ) -> Option<Reply> {
        let (session_id, live) = {
            let mut state = session.lock().await;
            let kind = state.most_recent(input.scope).map(|request| request.kind);
            let live = kind.and_then(|kind| state.take(kind, now));
            (state.id.clone(), live)
        };

        let pending = match live {
            Some(pending) if pending.is_expired(now, self.config.pending_ttl) => {
                tracing::info!(
                    session = %session_id,
                    kind = %pending.kind,
                    pending = %pending.id,
                    "pending request expired before confirmation"
                );
                return Some(Reply::expired(&pending));
            }
            Some(pending) => pending,
            None => self.recover(session, &session_id, input.scope, now).await?,
        };

        Some(match decision {
            Decision::Reject => {
                tracing::info!(
                    session = %session_id,
                    kind = %pending.kind,
                    pending = %pending.id,
                    "pending request cancelled"
                );
                Reply::cancelled(&pending)
            }
            Decision::Accept => {
                tracing::info!(
                    session = %session_id,
                    kind = %pending.kind,
                    pending = %pending.id,
                    operation = pending.request.label(),
                    "pending request confirmed, executing"
                );
                let result = self.executor.execute(&pending.request).await;
                Reply::completed(&pending, result)
            }
        })
    }

    /// Rebuild the newest still-open request from history and claim it.
    async fn recover(
        &self,
        session: &Arc<Mutex<Session>>,
        session_id: &str,
        scope: Option<PendingKind>,
        now: DateTime<Utc>,
    ) -> Option<PendingRequest> {
        let history = self.history.as_ref()?;
        let messages = match history
            .recent(session_id, self.config.history_scan_limit)
            .await
        {
            Ok(messages) => messages,
            Err(error) => {
                tracing::warn!(session = %session_id, %error, "history unavailable for recovery");
                return None;
            }
        };

        let kinds = match scope {
            Some(kind) => vec![kind],
            None => PendingKind::ALL.to_vec(),
        };
        let recovered = kinds
            .into_iter()
            .filter_map(|kind| recover_pending(kind, &messages, &self.extractor))
            .filter(|request| !request.is_expired(now, self.config.pending_ttl))
            .max_by_key(|request| request.created_at)?;

        let mut state = session.lock().await;
        if !state.claim_recovered(&recovered, now) {
            tracing::debug!(
                session = %session_id,
                kind = %recovered.kind,
                "recovered request already resolved, ignoring"
            );
            return None;
        }
        tracing::info!(
            session = %session_id,
            kind = %recovered.kind,
            pending = %recovered.id,
            "pending request recovered from history"
        );
        Some(recovered)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use alloy_primitives::Address;
    use async_trait::async_trait;

    use super::*;
    use crate::agent::history::InMemoryHistory;
    use crate::ops::{OperationRequest, OperationResult};

    const SEND: &str = "send 0.1 ETH to 0x742d35Cc6634C0532925a3b844Bc454e4438f44e";

    #[derive(Default)]
    struct RecordingExecutor {
        executed: StdMutex<Vec<OperationRequest>>,
    }

    impl RecordingExecutor {
        fn executed(&self) -> Vec<OperationRequest> {
            self.executed.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl OperationExecutor for RecordingExecutor {
        async fn execute(&self, request: &OperationRequest) -> OperationResult {
            self.executed.lock().unwrap().push(request.clone());
            OperationResult::success(format!("done: {}", request.describe()))
        }
    }

    fn engine(executor: Arc<RecordingExecutor>) -> ConfirmationEngine {
        ConfirmationEngine::new(
            ParameterExtractor::new(Some(Address::repeat_byte(0x0a))),
            executor,
            ConfirmationConfig::default(),
        )
    }

    fn session() -> Arc<Mutex<Session>> {
        Arc::new(Mutex::new(Session::new("s")))
    }

    fn text(s: &str) -> InboundSignal {
        InboundSignal::Text(s.to_string())
    }

    #[tokio::test]
    async fn prompt_then_accept_executes_once() {
        let executor = Arc::new(RecordingExecutor::default());
        let engine = engine(executor.clone());
        let session = session();

        let prompt = engine.handle(&session, &text(SEND)).await.unwrap();
        assert!(prompt.text.contains("0.1 ETH"));
        assert!(executor.executed().is_empty());

        let done = engine.handle(&session, &text("yes")).await.unwrap();
        assert!(done.text.starts_with("done:"));
        assert_eq!(executor.executed().len(), 1);

        let again = engine.handle(&session, &text("yes")).await.unwrap();
        assert_eq!(again.text, "Nothing to confirm.");
        assert_eq!(executor.executed().len(), 1);
    }

    #[tokio::test]
    async fn callback_only_resolves_its_kind() {
        let executor = Arc::new(RecordingExecutor::default());
        let engine = engine(executor.clone());
        let session = session();
        engine.handle(&session, &text(SEND)).await.unwrap();

        let reply = engine
            .handle(&session, &InboundSignal::Callback("confirm:balance".into()))
            .await
            .unwrap();
        assert_eq!(reply.text, "Nothing to confirm.");
        assert!(session.lock().await.pending(PendingKind::Transfer).is_some());

        engine
            .handle(&session, &InboundSignal::Callback("cancel:transfer".into()))
            .await
            .unwrap();
        assert!(session.lock().await.pending(PendingKind::Transfer).is_none());
        assert!(executor.executed().is_empty());
    }

    #[tokio::test]
    async fn validation_error_creates_nothing() {
        let executor = Arc::new(RecordingExecutor::default());
        let engine = engine(executor);
        let session = session();
        let reply = engine.handle(&session, &text("send 1 eth")).await.unwrap();
        assert!(!reply.result.success);
        assert!(session.lock().await.pending_requests().is_empty());
    }

    #[tokio::test]
    async fn zero_address_transfer_is_never_offered() {
        let executor = Arc::new(RecordingExecutor::default());
        let engine = engine(executor.clone());
        let session = session();
        let burn = format!("send 1 eth to {}", Address::ZERO);

        let reply = engine.handle(&session, &text(&burn)).await.unwrap();
        assert!(!reply.result.success);
        let error = reply.result.error.as_ref().unwrap();
        assert_eq!(error.category, crate::classify::ErrorCategory::InvalidAddress);
        assert!(error.reason.contains("zero address"), "{}", error.reason);
        assert!(session.lock().await.pending_requests().is_empty());

        let after = engine.handle(&session, &text("yes")).await.unwrap();
        assert_eq!(after.text, "Nothing to confirm.");
        assert!(executor.executed().is_empty());
    }

    #[tokio::test]
    async fn ordinary_chat_is_ignored() {
        let engine = engine(Arc::new(RecordingExecutor::default()));
        assert!(engine.handle(&session(), &text("hello there")).await.is_none());
    }

    #[tokio::test]
    async fn expired_request_is_not_executed() {
        let executor = Arc::new(RecordingExecutor::default());
        let engine = ConfirmationEngine::new(
            ParameterExtractor::new(None),
            executor.clone(),
            ConfirmationConfig {
                pending_ttl: Duration::ZERO,
                ..ConfirmationConfig::default()
            },
        );
        let session = session();
        {
            let mut state = session.lock().await;
            let request = ParameterExtractor::new(None)
                .extract(PendingKind::Transfer, SEND)
                .unwrap();
            state.put(PendingRequest::new(
                SEND,
                request,
                Utc::now() - chrono::Duration::seconds(5),
            ));
        }
        let reply = engine.handle(&session, &text("yes")).await.unwrap();
        assert_eq!(reply.result.data.get("status"), Some(&"expired".into()));
        assert!(executor.executed().is_empty());
    }

    #[tokio::test]
    async fn recovers_from_history_when_live_state_is_lost() {
        let executor = Arc::new(RecordingExecutor::default());
        let history = Arc::new(InMemoryHistory::new());
        let engine = engine(executor.clone()).with_history(history.clone());

        let first = session();
        history.record_user("s", SEND).await;
        let prompt = engine.handle(&first, &text(SEND)).await.unwrap();
        history.record_reply("s", &prompt).await;

        // A fresh session object stands in for state that was not carried over.
        let second = session();
        let reply = engine.handle(&second, &text("yes")).await.unwrap();
        assert!(reply.text.starts_with("done:"));
        assert_eq!(executor.executed().len(), 1);

        // The recovered request is consumed; it cannot be recovered again.
        let again = engine.handle(&second, &text("yes")).await.unwrap();
        assert_eq!(again.text, "Nothing to confirm.");
        assert_eq!(executor.executed().len(), 1);
    }
}
