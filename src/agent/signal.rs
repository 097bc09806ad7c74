//! Inbound signals, yes/no detection, and the reply envelope.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::agent::pending::{PendingKind, PendingRequest};
use crate::classify::classify_operation_error;
use crate::error::OperationError;
use crate::ops::OperationResult;

/// What arrived from the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundSignal {
    /// Free text.
    Text(String),
    /// An opaque token from a tapped button (see [`CallbackToken`]).
    Callback(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Accept,
    Reject,
}

/// Button token: `confirm:<kind>` or `cancel:<kind>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallbackToken {
    pub decision: Decision,
    pub kind: PendingKind,
}

impl CallbackToken {
    pub fn confirm(kind: PendingKind) -> Self {
        Self {
            decision: Decision::Accept,
            kind,
        }
    }

    pub fn cancel(kind: PendingKind) -> Self {
        Self {
            decision: Decision::Reject,
            kind,
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let (action, kind) = raw.trim().split_once(':')?;
        let kind = PendingKind::parse(kind)?;
        match action {
            "confirm" => Some(Self::confirm(kind)),
            "cancel" => Some(Self::cancel(kind)),
            _ => None,
        }
    }
}

impl fmt::Display for CallbackToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let action = match self.decision {
            Decision::Accept => "confirm",
            Decision::Reject => "cancel",
        };
        write!(f, "{action}:{}", self.kind)
    }
}

const ACCEPT_WORDS: &[&str] = &[
    "yes", "y", "yeah", "yep", "yup", "confirm", "confirmed", "ok", "okay", "sure", "proceed",
    "go ahead", "do it", "approve", "确认", "是", "是的", "好", "好的", "确定", "可以",
];

const REJECT_WORDS: &[&str] = &[
    "no", "n", "nope", "nah", "cancel", "stop", "abort", "reject", "deny", "don't", "取消", "不",
    "不要", "否", "算了",
];

/// A message reduced to what the confirmation protocol cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedInput {
    pub text: String,
    pub decision: Option<Decision>,
    /// The whole message is a decision word ("yes", "取消"), not just
    /// starts with one ("ok send 1 eth ...").
    pub exact: bool,
    /// Callbacks only resolve their own kind.
    pub scope: Option<PendingKind>,
}

impl NormalizedInput {
    pub fn from_signal(signal: &InboundSignal) -> Self {
        match signal {
            InboundSignal::Callback(raw) => match CallbackToken::parse(raw) {
                Some(token) => Self {
                    text: raw.trim().to_string(),
                    decision: Some(token.decision),
                    exact: true,
                    scope: Some(token.kind),
                },
                None => Self::from_text(raw),
            },
            InboundSignal::Text(text) => Self::from_text(text),
        }
    }

    fn from_text(text: &str) -> Self {
        let (decision, exact) = match detect_decision(text) {
            Some((decision, exact)) => (Some(decision), exact),
            None => (None, false),
        };
        Self {
            text: text.trim().to_string(),
            decision,
            exact,
            scope: None,
        }
    }
}

/// Recognise an accept/reject word. The flag is true when the whole message
/// is that word.
pub fn detect_decision(text: &str) -> Option<(Decision, bool)> {
    let normalized = text
        .trim()
        .trim_matches(|c: char| c.is_ascii_punctuation() || "。！？，、～ ".contains(c))
        .to_lowercase();
    if normalized.is_empty() {
        return None;
    }

    for (words, decision) in [(ACCEPT_WORDS, Decision::Accept), (REJECT_WORDS, Decision::Reject)] {
        if words.contains(&normalized.as_str()) {
            return Some((decision, true));
        }
    }
    for (words, decision) in [(ACCEPT_WORDS, Decision::Accept), (REJECT_WORDS, Decision::Reject)] {
        if words.iter().any(|word| starts_with_word(&normalized, word)) {
            return Some((decision, false));
        }
    }
    None
}

/// `text` begins with `word` followed by a boundary. Single CJK characters
/// only count as exact matches; they are too common as prefixes.
fn starts_with_word(text: &str, word: &str) -> bool {
    let Some(rest) = text.strip_prefix(word) else {
        return false;
    };
    if word.is_ascii() {
        return rest
            .chars()
            .next()
            .is_none_or(|c| !c.is_alphanumeric() && c != '\'');
    }
    word.chars().count() >= 2
}

/// A button offered alongside a reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Affordance {
    pub label: String,
    pub token: String,
}

/// Everything the engine sends back for one inbound signal.
///
/// `markers` are machine-readable tags for the history collaborator:
/// `prompt:<kind>` on a confirmation prompt, `resolved:<kind>` once that kind
/// has been confirmed, cancelled or expired.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub text: String,
    #[serde(default)]
    pub affordances: Vec<Affordance>,
    pub result: OperationResult,
    #[serde(default)]
    pub markers: Vec<String>,
}

impl Reply {
    fn plain(result: OperationResult) -> Self {
        Self {
            text: result.text.clone(),
            affordances: Vec::new(),
            result,
            markers: Vec::new(),
        }
    }

    /// Ask the user to confirm `pending`.
    pub fn prompt(pending: &PendingRequest) -> Self {
        let text = format!(
            "Please confirm: {}.\nReply \"yes\" to proceed or \"no\" to cancel.",
            pending.request.describe()
        );
        let result = OperationResult::success(text)
            .with_values(pending.request.parameters())
            .with_data("status", "pending")
            .with_data("kind", pending.kind)
            .with_data("pending_id", pending.id);
        Self {
            affordances: vec![
                Affordance {
                    label: "Confirm".to_string(),
                    token: CallbackToken::confirm(pending.kind).to_string(),
                },
                Affordance {
                    label: "Cancel".to_string(),
                    token: CallbackToken::cancel(pending.kind).to_string(),
                },
            ],
            markers: vec![prompt_marker(pending.kind)],
            ..Self::plain(result)
        }
    }

    pub fn cancelled(pending: &PendingRequest) -> Self {
        let result = OperationResult::success(format!(
            "Cancelled. {} will not be performed.",
            pending.request.label()
        ))
        .with_values(pending.request.parameters())
        .with_data("status", "cancelled");
        Self {
            markers: vec![resolved_marker(pending.kind)],
            ..Self::plain(result)
        }
    }

    /// Relay the executor's result for a confirmed request.
    pub fn completed(pending: &PendingRequest, result: OperationResult) -> Self {
        Self {
            markers: vec![resolved_marker(pending.kind)],
            ..Self::plain(result)
        }
    }

    pub fn expired(pending: &PendingRequest) -> Self {
        let result = OperationResult::not_performed(format!(
            "That {} request has expired and was not performed. Please send it again.",
            pending.request.label().to_lowercase()
        ))
        .with_values(pending.request.parameters())
        .with_data("status", "expired");
        Self {
            markers: vec![resolved_marker(pending.kind)],
            ..Self::plain(result)
        }
    }

    /// A bare yes/no with nothing waiting. Not an error.
    pub fn nothing_pending(decision: Decision) -> Self {
        let text = match decision {
            Decision::Accept => "Nothing to confirm.",
            Decision::Reject => "Nothing to cancel.",
        };
        Self::plain(OperationResult::success(text).with_data("status", "nothing_pending"))
    }

    /// Extraction failed; no pending request was created.
    pub fn validation_error(kind: PendingKind, error: &OperationError) -> Self {
        Self::plain(OperationResult::failure(classify_operation_error(
            error,
            kind.label(),
        )))
    }
}

pub fn prompt_marker(kind: PendingKind) -> String {
    format!("prompt:{kind}")
}

pub fn resolved_marker(kind: PendingKind) -> String {
    format!("resolved:{kind}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_words_in_both_languages() {
        assert_eq!(detect_decision("Yes!"), Some((Decision::Accept, true)));
        assert_eq!(detect_decision("  确认 "), Some((Decision::Accept, true)));
        assert_eq!(detect_decision("取消"), Some((Decision::Reject, true)));
        assert_eq!(detect_decision("go ahead."), Some((Decision::Accept, true)));
    }

    #[test]
    fn leading_word_is_a_loose_decision() {
        assert_eq!(
            detect_decision("ok send 1 eth to 0x742d35Cc6634C0532925a3b844Bc454e4438f44e"),
            Some((Decision::Accept, false))
        );
        assert_eq!(detect_decision("no, stop"), Some((Decision::Reject, false)));
    }

    #[test]
    fn word_boundaries_are_respected() {
        assert_eq!(detect_decision("now send 1 eth"), None);
        assert_eq!(detect_decision("yesterday I sent"), None);
        assert_eq!(detect_decision("nft mint"), None);
        // Single-character CJK words only match on their own.
        assert_eq!(detect_decision("不错的nft"), None);
    }

    #[test]
    fn callback_tokens_round_trip_and_scope() {
        let token = CallbackToken::confirm(PendingKind::Transfer);
        assert_eq!(token.to_string(), "confirm:transfer");
        assert_eq!(CallbackToken::parse("confirm:transfer"), Some(token));
        assert_eq!(CallbackToken::parse("confirm:unknown"), None);

        let input = NormalizedInput::from_signal(&InboundSignal::Callback("cancel:nft".into()));
        assert_eq!(input.decision, Some(Decision::Reject));
        assert_eq!(input.scope, Some(PendingKind::Nft));
    }

    #[test]
    fn prompt_offers_both_buttons_and_marks_history() {
        let pending = PendingRequest::new(
            "balance",
            crate::ops::OperationRequest::Balance {
                address: alloy_primitives::Address::repeat_byte(1),
                source: crate::ops::AddressSource::Own,
            },
            chrono::Utc::now(),
        );
        let reply = Reply::prompt(&pending);
        let tokens: Vec<_> = reply.affordances.iter().map(|a| a.token.as_str()).collect();
        assert_eq!(tokens, ["confirm:balance", "cancel:balance"]);
        assert_eq!(reply.markers, ["prompt:balance"]);
        assert_eq!(reply.result.data.get("status"), Some(&"pending".into()));
    }

    #[test]
    fn unknown_callback_is_treated_as_text() {
        let input = NormalizedInput::from_signal(&InboundSignal::Callback("menu:open".into()));
        assert_eq!(input.decision, None);
        assert_eq!(input.scope, None);
    }
}
