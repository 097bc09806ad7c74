//! Per-session pending operations awaiting a yes/no.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::ops::OperationRequest;

/// Confirmation slot an operation occupies. One pending request per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingKind {
    Balance,
    Transfer,
    Nft,
}

impl PendingKind {
    pub const ALL: [PendingKind; 3] = [Self::Balance, Self::Transfer, Self::Nft];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Balance => "balance",
            Self::Transfer => "transfer",
            Self::Nft => "nft",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(raw.trim()))
    }

    /// Operation label used when no concrete request exists yet.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Balance => "Balance query",
            Self::Transfer => "Transfer",
            Self::Nft => "NFT operation",
        }
    }

    /// Slot a request belongs in.
    pub fn of(request: &OperationRequest) -> Self {
        match request {
            OperationRequest::Balance { .. } => Self::Balance,
            OperationRequest::Transfer { .. } => Self::Transfer,
            _ => Self::Nft,
        }
    }
}

impl fmt::Display for PendingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated request waiting for confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRequest {
    pub id: Uuid,
    pub kind: PendingKind,
    pub created_at: DateTime<Utc>,
    pub raw_input: String,
    pub request: OperationRequest,
}

impl PendingRequest {
    pub fn new(
        raw_input: impl Into<String>,
        request: OperationRequest,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: PendingKind::of(&request),
            created_at: now,
            raw_input: raw_input.into(),
            request,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        let age = now.signed_duration_since(self.created_at);
        age.to_std().is_ok_and(|age| age > ttl)
    }
}

/// Pending slots for one conversation.
///
/// `consumed` remembers when each kind was last resolved (confirmed,
/// cancelled or expired). History recovery uses it to refuse resurrecting a
/// request that was already handled.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    #[serde(default)]
    slots: BTreeMap<PendingKind, PendingRequest>,
    #[serde(default)]
    consumed: BTreeMap<PendingKind, DateTime<Utc>>,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn pending(&self, kind: PendingKind) -> Option<&PendingRequest> {
        self.slots.get(&kind)
    }

    /// All pending requests, oldest first.
    pub fn pending_requests(&self) -> Vec<&PendingRequest> {
        let mut requests: Vec<_> = self.slots.values().collect();
        requests.sort_by_key(|request| request.created_at);
        requests
    }

    /// Store `request` in its slot, returning whatever it replaced.
    pub fn put(&mut self, request: PendingRequest) -> Option<PendingRequest> {
        self.slots.insert(request.kind, request)
    }

    /// Remove the request in `kind`'s slot and mark the kind consumed.
    pub fn take(&mut self, kind: PendingKind, now: DateTime<Utc>) -> Option<PendingRequest> {
        let request = self.slots.remove(&kind)?;
        self.consumed.insert(kind, now);
        Some(request)
    }

    /// Most recent pending request, restricted to `scope` when given.
    pub fn most_recent(&self, scope: Option<PendingKind>) -> Option<&PendingRequest> {
        self.slots
            .values()
            .filter(|request| scope.is_none_or(|kind| request.kind == kind))
            .max_by_key(|request| request.created_at)
    }

    /// Claim a request rebuilt from history.
    ///
    /// Refused when a live request already occupies the slot, or when the
    /// kind was resolved at or after the recovered request's prompt.
    pub fn claim_recovered(&mut self, request: &PendingRequest, now: DateTime<Utc>) -> bool {
        if self.slots.contains_key(&request.kind) {
            return false;
        }
        if self
            .consumed
            .get(&request.kind)
            .is_some_and(|consumed_at| *consumed_at >= request.created_at)
        {
            return false;
        }
        self.consumed.insert(request.kind, now);
        true
    }
}

/// Hands out one shared [`Session`] per conversation id.
#[derive(Default)]
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Arc<Mutex<Session>>>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_create_session(&self, id: &str) -> Arc<Mutex<Session>> {
        if let Some(session) = self.sessions.read().await.get(id) {
            return Arc::clone(session);
        }
        let mut sessions = self.sessions.write().await;
        Arc::clone(
            sessions
                .entry(id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(Session::new(id)))),
        )
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::Address;

    use super::*;
    use crate::ops::AddressSource;

    fn balance_request() -> OperationRequest {
        OperationRequest::Balance {
            address: Address::repeat_byte(1),
            source: AddressSource::Own,
        }
    }

    #[test]
    fn one_slot_per_kind() {
        let now = Utc::now();
        let mut session = Session::new("s");
        assert!(session.put(PendingRequest::new("a", balance_request(), now)).is_none());
        let replaced = session.put(PendingRequest::new("b", balance_request(), now));
        assert_eq!(replaced.map(|r| r.raw_input), Some("a".to_string()));
        assert_eq!(session.pending_requests().len(), 1);
    }

    #[test]
    fn expiry_uses_ttl() {
        let created = Utc::now();
        let request = PendingRequest::new("a", balance_request(), created);
        let ttl = Duration::from_secs(300);
        assert!(!request.is_expired(created + chrono::Duration::seconds(299), ttl));
        assert!(request.is_expired(created + chrono::Duration::seconds(301), ttl));
    }

    #[test]
    fn consumed_kind_blocks_older_recoveries() {
        let t0 = Utc::now();
        let mut session = Session::new("s");
        session.put(PendingRequest::new("a", balance_request(), t0));
        session.take(PendingKind::Balance, t0 + chrono::Duration::seconds(5));

        let stale = PendingRequest::new("a", balance_request(), t0 + chrono::Duration::seconds(1));
        assert!(!session.claim_recovered(&stale, t0 + chrono::Duration::seconds(6)));

        let fresh = PendingRequest::new("c", balance_request(), t0 + chrono::Duration::seconds(10));
        assert!(session.claim_recovered(&fresh, t0 + chrono::Duration::seconds(11)));
        // A second claim of the same request is refused.
        assert!(!session.claim_recovered(&fresh, t0 + chrono::Duration::seconds(12)));
    }

    #[test]
    fn scope_limits_most_recent() {
        let t0 = Utc::now();
        let mut session = Session::new("s");
        session.put(PendingRequest::new("bal", balance_request(), t0));
        session.put(PendingRequest::new(
            "send",
            OperationRequest::Transfer {
                to: Address::repeat_byte(2),
                amount: crate::chain::units::EtherAmount::parse("1").unwrap(),
            },
            t0 + chrono::Duration::seconds(1),
        ));
        assert_eq!(session.most_recent(None).map(|r| r.kind), Some(PendingKind::Transfer));
        assert_eq!(
            session.most_recent(Some(PendingKind::Balance)).map(|r| r.kind),
            Some(PendingKind::Balance)
        );
        assert!(session.most_recent(Some(PendingKind::Nft)).is_none());
    }

    #[tokio::test]
    async fn manager_returns_same_session_for_same_id() {
        let manager = SessionManager::new();
        let a = manager.get_or_create_session("chat-1").await;
        let b = manager.get_or_create_session("chat-1").await;
        assert!(Arc::ptr_eq(&a, &b));
        let c = manager.get_or_create_session("chat-2").await;
        assert!(!Arc::ptr_eq(&a, &c));
    }
}
