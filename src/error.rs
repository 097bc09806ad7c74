//! Error types for chainpilot.

use std::time::Duration;

use alloy_primitives::Address;

use crate::chain::endpoints::redact_endpoint;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("Operation error: {0}")]
    Operation(#[from] OperationError),

    #[error("History error: {0}")]
    History(#[from] HistoryError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures talking to the remote node or building transactions for it.
///
/// Endpoint URLs are redacted when displayed; the fields keep them intact.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ChainError {
    #[error("Endpoint {} is rate limited: {detail}", redact_endpoint(.endpoint))]
    RateLimited { endpoint: String, detail: String },

    #[error("Endpoint {} returned HTTP {status}: {body}", redact_endpoint(.endpoint))]
    Http {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("Request to {} failed: {reason}", redact_endpoint(.endpoint))]
    Transport { endpoint: String, reason: String },

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Invalid response for {method}: {reason}")]
    InvalidResponse { method: String, reason: String },

    #[error("Execution reverted: {reason}")]
    Reverted { reason: String },

    #[error("Invalid private key: {0}")]
    InvalidKey(String),

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("ABI decoding failed for {call}: {reason}")]
    Abi { call: String, reason: String },

    #[error("No RPC endpoints configured")]
    NoEndpoints,
}

const RATE_LIMIT_MARKERS: &[&str] = &[
    "rate limit",
    "rate-limit",
    "too many requests",
    "limit exceeded",
];
const RATE_LIMIT_RPC_CODES: &[i64] = &[-32005, -32029, 429];
const DUPLICATE_SUBMISSION_MARKERS: &[&str] = &["already known", "known transaction"];

impl ChainError {
    /// Whether this failure is a rate-limit signal that should rotate endpoints.
    pub fn is_rate_limited(&self) -> bool {
        match self {
            Self::RateLimited { .. } => true,
            Self::Http { status, body, .. } => {
                *status == 429 || contains_any(body, RATE_LIMIT_MARKERS)
            }
            Self::Rpc { code, message } => {
                RATE_LIMIT_RPC_CODES.contains(code) || contains_any(message, RATE_LIMIT_MARKERS)
            }
            Self::Transport { reason, .. } => contains_any(reason, RATE_LIMIT_MARKERS),
            _ => false,
        }
    }

    /// Whether the node rejected the call because contract execution reverted.
    pub fn is_execution_revert(&self) -> bool {
        match self {
            Self::Reverted { .. } => true,
            Self::Rpc { code, message } => {
                *code == 3 || message.to_ascii_lowercase().contains("execution reverted")
            }
            _ => false,
        }
    }

    /// Whether a send failed only because the node already holds this exact transaction.
    pub fn is_duplicate_submission(&self) -> bool {
        match self {
            Self::Rpc { message, .. } => contains_any(message, DUPLICATE_SUBMISSION_MARKERS),
            _ => false,
        }
    }

    /// Revert reason as reported by the node, for revert-shaped errors.
    pub fn revert_reason(&self) -> Option<String> {
        match self {
            Self::Reverted { reason } => Some(reason.clone()),
            Self::Rpc { message, .. } if self.is_execution_revert() => Some(message.clone()),
            _ => None,
        }
    }
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    let lowered = haystack.to_ascii_lowercase();
    needles.iter().any(|needle| lowered.contains(needle))
}

/// Why an on-chain operation did not run to completion.
///
/// Validation and precondition variants are already categorized; only
/// [`OperationError::Chain`] needs pattern classification.
#[derive(Debug, Clone, thiserror::Error)]
pub enum OperationError {
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Missing parameter: {0}")]
    MissingParameter(String),

    #[error("{identity} is not the owner of {resource} (owner: {owner})")]
    NotOwner {
        identity: Address,
        resource: String,
        owner: Address,
    },

    #[error("Insufficient balance: need {required} ETH, have {available} ETH")]
    InsufficientBalance { required: String, available: String },

    #[error("Cannot proceed: {0}")]
    InvalidState(String),

    #[error(
        "Authorization for {grantee} on {resource} is still missing \
         after an automatic approval: {reason}"
    )]
    ManualAuthorizationRequired {
        resource: String,
        grantee: Address,
        reason: String,
    },

    #[error(transparent)]
    Chain(#[from] ChainError),
}

/// Conversation-history collaborator errors.
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("History unavailable for session {session}: {reason}")]
    Unavailable { session: String, reason: String },

    #[error("History lookup timed out after {timeout:?}")]
    Timeout { timeout: Duration },
}

/// Front-end channel errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel {name} failed to start: {reason}")]
    StartupFailed { name: String, reason: String },

    #[error("Channel {name} disconnected: {reason}")]
    Disconnected { name: String, reason: String },
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_429_is_rate_limited() {
        let err = ChainError::Http {
            endpoint: "https://rpc.example".to_string(),
            status: 429,
            body: String::new(),
        };
        assert!(err.is_rate_limited());
    }

    #[test]
    fn rpc_rate_limit_detected_by_code_or_message() {
        assert!(
            ChainError::Rpc {
                code: -32005,
                message: "limit".to_string()
            }
            .is_rate_limited()
        );
        assert!(
            ChainError::Rpc {
                code: -32000,
                message: "Too Many Requests, slow down".to_string()
            }
            .is_rate_limited()
        );
        assert!(
            !ChainError::Rpc {
                code: -32000,
                message: "nonce too low".to_string()
            }
            .is_rate_limited()
        );
    }

    #[test]
    fn provider_quota_text_rotates_but_gas_ceiling_does_not() {
        let quota = ChainError::Rpc {
            code: -32000,
            message: "daily request limit exceeded".to_string(),
        };
        assert!(quota.is_rate_limited());
        let gas = ChainError::Rpc {
            code: -32000,
            message: "max fee per gas exceeded the cap".to_string(),
        };
        assert!(!gas.is_rate_limited());
    }

    #[test]
    fn execution_revert_detected_from_rpc_code_3() {
        let err = ChainError::Rpc {
            code: 3,
            message: "execution reverted: Not listed".to_string(),
        };
        assert!(err.is_execution_revert());
        assert_eq!(
            err.revert_reason().as_deref(),
            Some("execution reverted: Not listed")
        );
    }

    #[test]
    fn duplicate_submission_detected() {
        let err = ChainError::Rpc {
            code: -32000,
            message: "already known".to_string(),
        };
        assert!(err.is_duplicate_submission());
        assert!(!err.is_rate_limited());
    }

    #[test]
    fn wraps_into_top_level_error() {
        let err = Error::from(ChainError::NoEndpoints);
        assert_eq!(err.to_string(), "Chain error: No RPC endpoints configured");
    }
}
