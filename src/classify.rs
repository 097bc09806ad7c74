//! Maps raw failures into a closed set of user-facing error categories.
//!
//! Classification is ordered pattern matching over the failure text: the
//! first rule with a matching phrase wins, so more specific rules sit above
//! the generic ones (authorization above ownership, ownership above plain
//! reverts). Matching is case-insensitive.

use std::sync::LazyLock;

use aho_corasick::AhoCorasick;
use serde::{Deserialize, Serialize};

use crate::error::{ChainError, OperationError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    RateLimited,
    InsufficientBalance,
    AuthorizationRequired,
    NotOwner,
    SettlementUnconfirmed,
    ExecutionReverted,
    InvalidAddress,
    InvalidAmount,
    MissingParameter,
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RateLimited => "RATE_LIMITED",
            Self::InsufficientBalance => "INSUFFICIENT_BALANCE",
            Self::AuthorizationRequired => "AUTHORIZATION_REQUIRED",
            Self::NotOwner => "NOT_OWNER",
            Self::SettlementUnconfirmed => "SETTLEMENT_UNCONFIRMED",
            Self::ExecutionReverted => "EXECUTION_REVERTED",
            Self::InvalidAddress => "INVALID_ADDRESS",
            Self::InvalidAmount => "INVALID_AMOUNT",
            Self::MissingParameter => "MISSING_PARAMETER",
            Self::Unknown => "UNKNOWN",
        }
    }

    fn reason(&self) -> &'static str {
        match self {
            Self::RateLimited => "The blockchain node is throttling requests.",
            Self::InsufficientBalance => "The account does not hold enough ETH for this operation.",
            Self::AuthorizationRequired => {
                "The contract is not approved to move this token on your behalf."
            }
            Self::NotOwner => "The account does not own the resource this operation needs.",
            Self::SettlementUnconfirmed => {
                "The transaction was submitted but no confirmation arrived in time."
            }
            Self::ExecutionReverted => "The contract rejected the call.",
            Self::InvalidAddress => "The address is not a valid 20-byte hex address.",
            Self::InvalidAmount => "The amount is not a valid positive number.",
            Self::MissingParameter => "A required parameter was not provided.",
            Self::Unknown => "An unexpected error occurred.",
        }
    }

    fn suggestion(&self) -> &'static str {
        match self {
            Self::RateLimited => "Wait a few seconds and try again.",
            Self::InsufficientBalance => "Top up the account or try a smaller amount.",
            Self::AuthorizationRequired => {
                "Approve the contract for this token manually, then retry."
            }
            Self::NotOwner => {
                "Check the token or loan id and that you are using the right account."
            }
            Self::SettlementUnconfirmed => {
                "Check the transaction hash on a block explorer before retrying."
            }
            Self::ExecutionReverted => {
                "Check the current on-chain state (listing, stake, loan) and retry."
            }
            Self::InvalidAddress => "Use a 0x-prefixed address with 40 hex characters.",
            Self::InvalidAmount => "Use a positive amount such as 0.1.",
            Self::MissingParameter => "Include every detail of the request and send it again.",
            Self::Unknown => {
                "Try again later; if it keeps failing, check the node and contract configuration."
            }
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure ready to show to a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedError {
    pub category: ErrorCategory,
    pub reason: String,
    pub suggestion: String,
    pub user_message: String,
    /// Original failure text, kept for logs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
}

impl ClassifiedError {
    fn build(
        category: ErrorCategory,
        reason: String,
        operation: &str,
        raw: Option<String>,
    ) -> Self {
        let suggestion = category.suggestion().to_string();
        let mut user_message = match category {
            ErrorCategory::SettlementUnconfirmed => {
                format!("{operation} was submitted but is not confirmed yet. {reason}")
            }
            _ => format!("{operation} failed: {reason}"),
        };
        user_message.push_str("\nSuggestion: ");
        user_message.push_str(&suggestion);
        if category == ErrorCategory::Unknown
            && let Some(raw) = raw.as_deref()
        {
            user_message.push_str("\nDetails: ");
            user_message.push_str(raw);
        }
        Self {
            category,
            reason,
            suggestion,
            user_message,
            raw,
        }
    }

    /// Qualifier attached to a submitted-but-unconfirmed operation.
    pub fn settlement_unconfirmed(operation: &str, tx_hash: &str, detail: &str) -> Self {
        let reason = format!(
            "{} Transaction {tx_hash} ({detail}).",
            ErrorCategory::SettlementUnconfirmed.reason()
        );
        Self::build(ErrorCategory::SettlementUnconfirmed, reason, operation, None)
    }
}

struct Rule {
    category: ErrorCategory,
    phrases: &'static [&'static str],
}

const RULES: &[Rule] = &[
    Rule {
        category: ErrorCategory::RateLimited,
        phrases: &["rate limit", "rate-limit", "too many requests", "limit exceeded", "http 429"],
    },
    Rule {
        category: ErrorCategory::InsufficientBalance,
        phrases: &[
            "insufficient funds",
            "insufficient balance",
            "exceeds balance",
            "insufficient eth",
        ],
    },
    Rule {
        category: ErrorCategory::AuthorizationRequired,
        phrases: &[
            "or approved",
            "nor approved",
            "not approved",
            "approval required",
            "missing approval",
            "insufficientapproval",
            "not authorized",
            "unauthorized",
        ],
    },
    Rule {
        category: ErrorCategory::NotOwner,
        phrases: &[
            "not the owner",
            "not owner",
            "not token owner",
            "incorrect owner",
            "invalid owner",
            "not the staker",
            "not staker",
            "not the borrower",
            "not borrower",
        ],
    },
    Rule {
        category: ErrorCategory::SettlementUnconfirmed,
        phrases: &[
            "not yet confirmed",
            "not confirmed",
            "no receipt",
            "settlement timeout",
        ],
    },
    Rule {
        category: ErrorCategory::ExecutionReverted,
        phrases: &["execution reverted", "reverted", "revert", "out of gas", "call exception"],
    },
    Rule {
        category: ErrorCategory::InvalidAddress,
        phrases: &["invalid address", "bad address", "address checksum"],
    },
    Rule {
        category: ErrorCategory::InvalidAmount,
        phrases: &["invalid amount", "invalid value", "amount must be"],
    },
    Rule {
        category: ErrorCategory::MissingParameter,
        phrases: &["missing parameter", "missing argument", "missing required"],
    },
];

static MATCHERS: LazyLock<Vec<(ErrorCategory, AhoCorasick)>> = LazyLock::new(|| {
    RULES
        .iter()
        .filter_map(|rule| {
            AhoCorasick::builder()
                .ascii_case_insensitive(true)
                .build(rule.phrases)
                .ok()
                .map(|matcher| (rule.category, matcher))
        })
        .collect()
});

/// First matching category for `raw`, or [`ErrorCategory::Unknown`].
pub fn category_of(raw: &str) -> ErrorCategory {
    MATCHERS
        .iter()
        .find(|(_, matcher)| matcher.is_match(raw))
        .map(|(category, _)| *category)
        .unwrap_or(ErrorCategory::Unknown)
}

/// Classify free-form failure text raised while running `operation`.
pub fn classify(raw: &str, operation: &str) -> ClassifiedError {
    let category = category_of(raw);
    let mut reason = category.reason().to_string();
    if category == ErrorCategory::ExecutionReverted
        && let Some(detail) = revert_detail(raw)
    {
        reason = format!("{reason} Reason: {detail}.");
    }
    ClassifiedError::build(category, reason, operation, Some(raw.to_string()))
}

/// Classify a chain failure, trusting structured signals over text.
pub fn classify_chain_error(error: &ChainError, operation: &str) -> ClassifiedError {
    if error.is_rate_limited() {
        let category = ErrorCategory::RateLimited;
        return ClassifiedError::build(
            category,
            category.reason().to_string(),
            operation,
            Some(error.to_string()),
        );
    }
    classify(&error.to_string(), operation)
}

/// Turn an operation failure into its user-facing form.
///
/// Validation and precondition failures carry their category already and
/// skip pattern matching.
pub fn classify_operation_error(error: &OperationError, operation: &str) -> ClassifiedError {
    let category = match error {
        OperationError::InvalidAddress(_) => ErrorCategory::InvalidAddress,
        OperationError::InvalidAmount(_) => ErrorCategory::InvalidAmount,
        OperationError::MissingParameter(_) => ErrorCategory::MissingParameter,
        OperationError::NotOwner { .. } => ErrorCategory::NotOwner,
        OperationError::InsufficientBalance { .. } => ErrorCategory::InsufficientBalance,
        OperationError::InvalidState(_) => ErrorCategory::ExecutionReverted,
        OperationError::ManualAuthorizationRequired { .. } => ErrorCategory::AuthorizationRequired,
        OperationError::Chain(chain) => return classify_chain_error(chain, operation),
    };
    ClassifiedError::build(category, error.to_string(), operation, None)
}

fn revert_detail(raw: &str) -> Option<&str> {
    let lowered = raw.to_ascii_lowercase();
    let marker = "reverted:";
    let start = lowered.find(marker)? + marker.len();
    let detail = raw.get(start..)?.trim().trim_end_matches('.');
    (!detail.is_empty()).then_some(detail)
}
