//! JSON-RPC transport to EVM nodes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use alloy_primitives::{B256, Bytes, U256};
use alloy_sol_types::{Panic, Revert, SolError};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::chain::contracts::{
    ERC721IncorrectOwner, ERC721InsufficientApproval, ERC721NonexistentToken,
    OwnableUnauthorizedAccount,
};
use crate::chain::endpoints::redact_endpoint;
use crate::error::ChainError;

/// Carries one JSON-RPC request to one endpoint.
///
/// Endpoint choice and failover live above this trait; implementations only
/// translate wire failures into [`ChainError`] faithfully (in particular,
/// HTTP 429 must come back as a rate-limit signal).
#[async_trait]
pub trait RpcTransport: Send + Sync {
    async fn request(
        &self,
        endpoint: &str,
        method: &str,
        params: Value,
    ) -> Result<Value, ChainError>;
}

/// reqwest-backed transport.
pub struct HttpTransport {
    client: reqwest::Client,
    next_id: AtomicU64,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, ChainError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChainError::Transport {
                endpoint: "<client>".to_string(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            next_id: AtomicU64::new(1),
        })
    }
}

#[derive(Debug, Deserialize)]
struct RpcEnvelope {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

impl From<RpcErrorObject> for ChainError {
    fn from(error: RpcErrorObject) -> Self {
        let message = match error.data.as_ref().and_then(decode_revert_data) {
            Some(reason) if !error.message.contains(&reason) => {
                format!("{}: {reason}", error.message)
            }
            _ => error.message,
        };
        ChainError::Rpc {
            code: error.code,
            message,
        }
    }
}

#[async_trait]
impl RpcTransport for HttpTransport {
    async fn request(
        &self,
        endpoint: &str,
        method: &str,
        params: Value,
    ) -> Result<Value, ChainError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        tracing::trace!(endpoint = %redact_endpoint(endpoint), method, id, "JSON-RPC request");

        let response = self
            .client
            .post(endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChainError::Transport {
                endpoint: endpoint.to_string(),
                reason: e.without_url().to_string(),
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let body = response.text().await.unwrap_or_default();
            return Err(ChainError::RateLimited {
                endpoint: endpoint.to_string(),
                detail: format!("HTTP 429 {}", truncate(&body, 200)),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChainError::Http {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                body: truncate(&body, 500),
            });
        }

        let envelope: RpcEnvelope =
            response
                .json()
                .await
                .map_err(|e| ChainError::InvalidResponse {
                    method: method.to_string(),
                    reason: e.without_url().to_string(),
                })?;

        if let Some(error) = envelope.error {
            return Err(error.into());
        }
        Ok(envelope.result.unwrap_or(Value::Null))
    }
}

/// Pull a human-readable reason out of revert data.
///
/// Custom collection errors are phrased so the classifier can tell a missing
/// approval from a wrong owner.
fn decode_revert_data(data: &Value) -> Option<String> {
    let raw = data
        .as_str()
        .or_else(|| data.get("data").and_then(Value::as_str))?;
    let bytes = hex::decode(raw.trim_start_matches("0x")).ok()?;
    decode_revert_bytes(&bytes)
}

fn decode_revert_bytes(bytes: &[u8]) -> Option<String> {
    if let Ok(revert) = Revert::abi_decode(bytes) {
        return Some(revert.reason);
    }
    if let Ok(panic) = Panic::abi_decode(bytes) {
        return Some(format!("panic code 0x{:x}", panic.code));
    }
    if let Ok(e) = ERC721InsufficientApproval::abi_decode(bytes) {
        return Some(format!(
            "ERC721: {} is not approved for token {}",
            e.operator, e.tokenId
        ));
    }
    if let Ok(e) = ERC721IncorrectOwner::abi_decode(bytes) {
        return Some(format!(
            "ERC721: {} is not the owner of token {} (owner {})",
            e.sender, e.tokenId, e.owner
        ));
    }
    if let Ok(e) = ERC721NonexistentToken::abi_decode(bytes) {
        return Some(format!("ERC721: token {} does not exist", e.tokenId));
    }
    if let Ok(e) = OwnableUnauthorizedAccount::abi_decode(bytes) {
        return Some(format!("Ownable: {} is not the owner", e.account));
    }
    None
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{cut}...")
}

fn hex_digits<'a>(raw: &'a str, method: &str) -> Result<&'a str, ChainError> {
    let value = raw.trim();
    value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .ok_or_else(|| invalid(method, format!("expected 0x-prefixed hex, got {value:?}")))
}

fn invalid(method: &str, reason: impl Into<String>) -> ChainError {
    ChainError::InvalidResponse {
        method: method.to_string(),
        reason: reason.into(),
    }
}

fn as_str<'a>(value: &'a Value, method: &str) -> Result<&'a str, ChainError> {
    value
        .as_str()
        .ok_or_else(|| invalid(method, format!("expected hex string, got {value}")))
}

/// Parse a hex quantity (`"0x1a"`) into a `u64`.
pub fn parse_hex_u64(value: &Value, method: &str) -> Result<u64, ChainError> {
    let digits = hex_digits(as_str(value, method)?, method)?;
    if digits.is_empty() {
        return Ok(0);
    }
    u64::from_str_radix(digits, 16).map_err(|e| invalid(method, e.to_string()))
}

/// Parse a hex quantity into a `U256`.
pub fn parse_hex_u256(value: &Value, method: &str) -> Result<U256, ChainError> {
    let digits = hex_digits(as_str(value, method)?, method)?;
    if digits.is_empty() {
        return Ok(U256::ZERO);
    }
    U256::from_str_radix(digits, 16).map_err(|e| invalid(method, e.to_string()))
}

/// Parse hex data (`"0x..."`) into bytes.
pub fn parse_hex_bytes(value: &Value, method: &str) -> Result<Bytes, ChainError> {
    let digits = hex_digits(as_str(value, method)?, method)?;
    hex::decode(digits)
        .map(Bytes::from)
        .map_err(|e| invalid(method, e.to_string()))
}

pub fn parse_hash(value: &Value, method: &str) -> Result<B256, ChainError> {
    let bytes = parse_hex_bytes(value, method)?;
    if bytes.len() != 32 {
        return Err(invalid(
            method,
            format!("expected 32-byte hash, got {} bytes", bytes.len()),
        ));
    }
    Ok(B256::from_slice(&bytes))
}

pub fn quantity(value: U256) -> Value {
    Value::String(format!("0x{value:x}"))
}
