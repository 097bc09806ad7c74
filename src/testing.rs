//! In-process chain doubles for tests.
//!
//! [`ScriptedTransport`] answers JSON-RPC calls from a closure and records
//! every call, so tests can assert on exactly what was sent to the node.

use std::sync::{Arc, Mutex};

use alloy_primitives::{Address, U256, keccak256};
use alloy_sol_types::SolValue;
use async_trait::async_trait;
use serde_json::{Value, json};

use crate::chain::account::Account;
use crate::chain::client::{ChainClient, ChainClientConfig};
use crate::chain::endpoints::EndpointPool;
use crate::chain::rpc::{self, RpcTransport};
use crate::chain::units;
use crate::error::ChainError;

/// First Hardhat/Anvil development key. Never holds real funds.
pub const TEST_PRIVATE_KEY: &str =
    "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

/// Balance reported by [`ScriptedTransport::healthy_chain`] for any address.
pub const DEFAULT_BALANCE_ETHER: u64 = 100;

/// One recorded JSON-RPC call.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub endpoint: String,
    pub method: String,
    pub params: Value,
}

impl RecordedCall {
    /// 4-byte selector of an `eth_call`/`eth_estimateGas` request.
    pub fn selector(&self) -> Option<[u8; 4]> {
        let data = self.params.get(0)?.get("data")?.as_str()?;
        let bytes = hex::decode(data.trim_start_matches("0x")).ok()?;
        bytes.get(..4)?.try_into().ok()
    }

    /// Target address of an `eth_call`/`eth_estimateGas` request.
    pub fn target(&self) -> Option<Address> {
        self.params.get(0)?.get("to")?.as_str()?.parse().ok()
    }

    /// Raw bytes of an `eth_sendRawTransaction` payload.
    pub fn raw_transaction(&self) -> Option<Vec<u8>> {
        if self.method != "eth_sendRawTransaction" {
            return None;
        }
        let raw = self.params.get(0)?.as_str()?;
        hex::decode(raw.trim_start_matches("0x")).ok()
    }
}

type Handler = dyn Fn(&RecordedCall) -> Option<Result<Value, ChainError>> + Send + Sync;

pub struct ScriptedTransport {
    handler: Box<Handler>,
    fill_defaults: bool,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedTransport {
    /// Every call goes to `handler`; nothing is answered implicitly.
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&RecordedCall) -> Result<Value, ChainError> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(move |call| Some(handler(call))),
            fill_defaults: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// A node that accepts everything: 1 gwei gas, 100k gas estimates, nonce 0,
    /// 100 ETH balances, and immediate successful receipts.
    ///
    /// `overrides` sees each call first; returning `None` falls through to
    /// those defaults.
    pub fn healthy_chain<F>(overrides: F) -> Self
    where
        F: Fn(&RecordedCall) -> Option<Result<Value, ChainError>> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(overrides),
            fill_defaults: true,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().clone()
    }

    pub fn count(&self, method: &str) -> usize {
        self.lock().iter().filter(|c| c.method == method).count()
    }

    /// Decoded payloads of every `eth_sendRawTransaction`, in order.
    pub fn sent_transactions(&self) -> Vec<Vec<u8>> {
        self.lock()
            .iter()
            .filter_map(RecordedCall::raw_transaction)
            .collect()
    }

    /// Sent transactions whose calldata carries `selector`.
    pub fn sent_with_selector(&self, selector: [u8; 4]) -> usize {
        self.sent_transactions()
            .iter()
            .filter(|raw| raw.windows(4).any(|w| w == selector))
            .count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<RecordedCall>> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn default_response(call: &RecordedCall) -> Result<Value, ChainError> {
        match call.method.as_str() {
            "eth_gasPrice" => Ok(rpc::quantity(units::gwei(1))),
            "eth_estimateGas" => Ok(rpc::quantity(U256::from(100_000u64))),
            "eth_getTransactionCount" => Ok(rpc::quantity(U256::ZERO)),
            "eth_getBalance" => Ok(rpc::quantity(
                U256::from(DEFAULT_BALANCE_ETHER) * U256::from(10u64).pow(U256::from(18u64)),
            )),
            "eth_sendRawTransaction" => {
                let raw = call.raw_transaction().unwrap_or_default();
                Ok(json!(keccak256(&raw)))
            }
            "eth_getTransactionReceipt" => Ok(json!({"status": "0x1", "blockNumber": "0x1"})),
            other => Err(ChainError::Rpc {
                code: -32601,
                message: format!("scripted chain has no answer for {other}"),
            }),
        }
    }
}

#[async_trait]
impl RpcTransport for ScriptedTransport {
    async fn request(
        &self,
        endpoint: &str,
        method: &str,
        params: Value,
    ) -> Result<Value, ChainError> {
        let call = RecordedCall {
            endpoint: endpoint.to_string(),
            method: method.to_string(),
            params,
        };
        self.lock().push(call.clone());
        match (self.handler)(&call) {
            Some(result) => result,
            None if self.fill_defaults => Self::default_response(&call),
            None => Err(ChainError::Rpc {
                code: -32601,
                message: format!("unscripted call {method}"),
            }),
        }
    }
}

/// ABI-encode `value` as an `eth_call` hex result. Scripted returns are
/// static types, whose tuple and parameter encodings coincide.
pub fn abi_result<T: SolValue>(value: T) -> Value {
    json!(format!("0x{}", hex::encode(value.abi_encode())))
}

pub fn test_account() -> Arc<Account> {
    match Account::from_private_key(TEST_PRIVATE_KEY) {
        Ok(account) => Arc::new(account),
        Err(e) => panic!("test key must parse: {e}"),
    }
}

/// Client signing with [`TEST_PRIVATE_KEY`] over `transport`.
pub fn test_client(transport: Arc<dyn RpcTransport>, endpoints: &[&str]) -> ChainClient {
    let pool = match EndpointPool::new(endpoints.iter().copied()) {
        Ok(pool) => pool,
        Err(e) => panic!("test endpoints must be non-empty: {e}"),
    };
    ChainClient::new(test_account(), pool, transport, ChainClientConfig::default())
}

#[cfg(test)]
mod tests {
    use alloy_sol_types::SolCall;

    use super::*;
    use crate::chain::contracts::INftCollection;

    #[tokio::test]
    async fn healthy_chain_answers_fee_and_nonce_queries() {
        let transport = ScriptedTransport::healthy_chain(|_| None);
        let gas = transport
            .request("https://a", "eth_estimateGas", json!([]))
            .await
            .unwrap();
        assert_eq!(rpc::parse_hex_u64(&gas, "eth_estimateGas").unwrap(), 100_000);
        let nonce = transport
            .request("https://a", "eth_getTransactionCount", json!([]))
            .await
            .unwrap();
        assert_eq!(rpc::parse_hex_u64(&nonce, "eth_getTransactionCount").unwrap(), 0);
    }

    #[test]
    fn abi_result_decodes_as_call_return() {
        let owner = Address::repeat_byte(0x11);
        let encoded = abi_result(owner);
        let raw = hex::decode(encoded.as_str().unwrap().trim_start_matches("0x")).unwrap();
        assert_eq!(INftCollection::ownerOfCall::abi_decode_returns(&raw).unwrap(), owner);
    }
}
