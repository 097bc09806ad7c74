//! Chain access client: reads, fee quoting, signing, submission, settlement.

use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, B256, Bytes, U256};
use alloy_sol_types::SolCall;
use serde_json::{Value, json};

use crate::chain::account::Account;
use crate::chain::endpoints::{EndpointPool, with_failover};
use crate::chain::rpc::{self, RpcTransport};
use crate::chain::tx::Eip1559Transaction;
use crate::chain::units;
use crate::error::ChainError;

/// Tunables for gas, fees and settlement polling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainClientConfig {
    pub chain_id: u64,
    pub settlement_timeout: Duration,
    pub receipt_poll_interval: Duration,
    /// Used when `eth_gasPrice` fails.
    pub fallback_gas_price: U256,
    /// Used when `eth_estimateGas` fails for a reason other than a revert.
    pub fallback_gas_limit: u64,
    pub priority_fee: U256,
}

impl Default for ChainClientConfig {
    fn default() -> Self {
        Self {
            chain_id: 1,
            settlement_timeout: Duration::from_secs(60),
            receipt_poll_interval: Duration::from_secs(2),
            fallback_gas_price: units::gwei(20),
            fallback_gas_limit: 300_000,
            priority_fee: units::gwei(1),
        }
    }
}

/// Ask the pool for its chain id, for when none is configured.
pub async fn fetch_chain_id(
    transport: &dyn RpcTransport,
    endpoints: &EndpointPool,
) -> Result<u64, ChainError> {
    let value = with_failover(endpoints, "eth_chainId", |endpoint| async move {
        transport.request(&endpoint, "eth_chainId", json!([])).await
    })
    .await?;
    rpc::parse_hex_u64(&value, "eth_chainId")
}

/// A read or state-changing call against a remote address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCall {
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
    /// Human label used in logs (`approve(address,uint256)`, `transfer`).
    pub label: String,
}

impl RemoteCall {
    pub fn contract<C: SolCall>(to: Address, call: &C) -> Self {
        Self {
            to,
            data: call.abi_encode().into(),
            value: U256::ZERO,
            label: C::SIGNATURE.to_string(),
        }
    }

    pub fn native_transfer(to: Address, value: U256) -> Self {
        Self {
            to,
            data: Bytes::new(),
            value,
            label: "transfer".to_string(),
        }
    }

    pub fn with_value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }
}

/// Gas and fee parameters chosen for one submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeQuote {
    pub gas_limit: u64,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
}

impl FeeQuote {
    /// Worst-case fee the sender pays for this submission.
    pub fn max_cost(&self) -> U256 {
        U256::from(self.gas_limit) * self.max_fee_per_gas
    }
}

/// A submitted transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxHandle {
    pub hash: B256,
    pub label: String,
}

/// What waiting for a receipt produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    Confirmed { block_number: u64 },
    Reverted { block_number: u64 },
    Unconfirmed { reason: String },
}

pub struct ChainClient {
    account: Arc<Account>,
    endpoints: EndpointPool,
    transport: Arc<dyn RpcTransport>,
    config: ChainClientConfig,
}

impl ChainClient {
    pub fn new(
        account: Arc<Account>,
        endpoints: EndpointPool,
        transport: Arc<dyn RpcTransport>,
        config: ChainClientConfig,
    ) -> Self {
        Self {
            account,
            endpoints,
            transport,
            config,
        }
    }

    /// Address of the signing account.
    pub fn address(&self) -> Address {
        self.account.address()
    }

    pub fn config(&self) -> &ChainClientConfig {
        &self.config
    }

    pub fn endpoints(&self) -> &EndpointPool {
        &self.endpoints
    }

    async fn rpc(&self, method: &str, params: Value) -> Result<Value, ChainError> {
        let transport = &self.transport;
        with_failover(&self.endpoints, method, |endpoint| {
            let params = params.clone();
            async move { transport.request(&endpoint, method, params).await }
        })
        .await
    }

    /// `eth_call` against the latest block.
    pub async fn query_raw(&self, call: &RemoteCall) -> Result<Bytes, ChainError> {
        let mut request = json!({
            "from": self.address(),
            "to": call.to,
            "data": call.data,
        });
        if !call.value.is_zero() {
            request["value"] = rpc::quantity(call.value);
        }
        let result = self
            .rpc("eth_call", json!([request, "latest"]))
            .await
            .map_err(normalize_revert)?;
        rpc::parse_hex_bytes(&result, "eth_call")
    }

    /// Typed read: encode `call`, run it, decode the return values.
    pub async fn query<C: SolCall>(&self, to: Address, call: &C) -> Result<C::Return, ChainError> {
        let raw = self.query_raw(&RemoteCall::contract(to, call)).await?;
        C::abi_decode_returns(&raw).map_err(|e| ChainError::Abi {
            call: C::SIGNATURE.to_string(),
            reason: e.to_string(),
        })
    }

    pub async fn native_balance(&self, address: Address) -> Result<U256, ChainError> {
        let result = self
            .rpc("eth_getBalance", json!([address, "latest"]))
            .await?;
        rpc::parse_hex_u256(&result, "eth_getBalance")
    }

    /// Current gas price, or the configured fallback when the node can't say.
    pub async fn gas_price(&self) -> U256 {
        match self
            .rpc("eth_gasPrice", json!([]))
            .await
            .and_then(|value| rpc::parse_hex_u256(&value, "eth_gasPrice"))
        {
            Ok(price) => price,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    fallback_gwei = %units::format_gwei(self.config.fallback_gas_price),
                    "eth_gasPrice failed, using fallback"
                );
                self.config.fallback_gas_price
            }
        }
    }

    /// Gas estimate for `call`.
    ///
    /// An execution revert is returned as [`ChainError::Reverted`] so the
    /// caller sees the contract's reason before anything is sent. Any other
    /// estimation failure falls back to the configured gas limit.
    pub async fn estimate_gas(&self, call: &RemoteCall) -> Result<u64, ChainError> {
        let request = json!({
            "from": self.address(),
            "to": call.to,
            "data": call.data,
            "value": rpc::quantity(call.value),
        });
        match self.rpc("eth_estimateGas", json!([request])).await {
            Ok(value) => rpc::parse_hex_u64(&value, "eth_estimateGas"),
            Err(e) if e.is_execution_revert() => Err(normalize_revert(e)),
            Err(e) => {
                tracing::warn!(
                    call = %call.label,
                    error = %e,
                    fallback = self.config.fallback_gas_limit,
                    "eth_estimateGas failed, using fallback gas limit"
                );
                Ok(self.config.fallback_gas_limit)
            }
        }
    }

    pub async fn quote_fees(&self, call: &RemoteCall) -> Result<FeeQuote, ChainError> {
        let gas_limit = self.estimate_gas(call).await?;
        let gas_price = self.gas_price().await;
        Ok(FeeQuote {
            gas_limit,
            max_fee_per_gas: gas_price + self.config.priority_fee,
            max_priority_fee_per_gas: self.config.priority_fee,
        })
    }

    /// Quote, sign and send `call`.
    pub async fn submit(&self, call: RemoteCall) -> Result<TxHandle, ChainError> {
        let quote = self.quote_fees(&call).await?;
        self.submit_with_quote(call, &quote).await
    }

    /// Sign and send `call` with an already computed fee quote.
    ///
    /// The transaction is signed once; failover resends the same bytes, and a
    /// node answering "already known" is treated as accepted.
    pub async fn submit_with_quote(
        &self,
        call: RemoteCall,
        quote: &FeeQuote,
    ) -> Result<TxHandle, ChainError> {
        let nonce_value = self
            .rpc(
                "eth_getTransactionCount",
                json!([self.address(), "pending"]),
            )
            .await?;
        let nonce = rpc::parse_hex_u64(&nonce_value, "eth_getTransactionCount")?;

        let tx = Eip1559Transaction {
            chain_id: self.config.chain_id,
            nonce,
            max_priority_fee_per_gas: quote.max_priority_fee_per_gas,
            max_fee_per_gas: quote.max_fee_per_gas,
            gas_limit: quote.gas_limit,
            to: call.to,
            value: call.value,
            input: call.data.clone(),
        };
        let signed = tx.sign(&self.account)?;

        let hash = match self
            .rpc("eth_sendRawTransaction", json!([signed.raw_hex()]))
            .await
        {
            Ok(value) => {
                let reported = rpc::parse_hash(&value, "eth_sendRawTransaction")?;
                if reported != signed.hash {
                    tracing::warn!(
                        local = %signed.hash,
                        reported = %reported,
                        "node reported a different transaction hash"
                    );
                }
                reported
            }
            Err(e) if e.is_duplicate_submission() => {
                tracing::info!(tx_hash = %signed.hash, "node already holds transaction");
                signed.hash
            }
            Err(e) => return Err(normalize_revert(e)),
        };

        tracing::info!(
            tx_hash = %hash,
            call = %call.label,
            nonce,
            gas_limit = quote.gas_limit,
            "transaction submitted"
        );

        Ok(TxHandle {
            hash,
            label: call.label,
        })
    }

    /// Poll for a receipt until one arrives or the settlement timeout passes.
    ///
    /// Transport errors while polling are logged and polling continues.
    pub async fn wait_for_settlement(&self, handle: &TxHandle) -> Settlement {
        let timeout = self.config.settlement_timeout;
        let poll = async {
            loop {
                match self
                    .rpc("eth_getTransactionReceipt", json!([handle.hash]))
                    .await
                {
                    Ok(Value::Null) => {}
                    Ok(receipt) => match parse_receipt(&receipt) {
                        Ok(Some(settlement)) => return settlement,
                        Ok(None) => {
                            tracing::debug!(tx_hash = %handle.hash, "receipt has no block yet")
                        }
                        Err(e) => {
                            tracing::debug!(
                                tx_hash = %handle.hash,
                                error = %e,
                                "unreadable receipt"
                            )
                        }
                    },
                    Err(e) => {
                        tracing::debug!(
                            tx_hash = %handle.hash,
                            error = %e,
                            "receipt poll failed"
                        )
                    }
                }
                tokio::time::sleep(self.config.receipt_poll_interval).await;
            }
        };

        match tokio::time::timeout(timeout, poll).await {
            Ok(settlement) => {
                tracing::info!(
                    tx_hash = %handle.hash,
                    call = %handle.label,
                    ?settlement,
                    "transaction settled"
                );
                settlement
            }
            Err(_) => {
                tracing::warn!(
                    tx_hash = %handle.hash,
                    call = %handle.label,
                    timeout_secs = timeout.as_secs(),
                    "no receipt before settlement timeout"
                );
                Settlement::Unconfirmed {
                    reason: format!("no receipt within {}s", timeout.as_secs()),
                }
            }
        }
    }
}

/// `None` while the receipt is not yet part of a block.
fn parse_receipt(receipt: &Value) -> Result<Option<Settlement>, ChainError> {
    let method = "eth_getTransactionReceipt";
    let block_number = receipt
        .get("blockNumber")
        .filter(|value| !value.is_null())
        .map(|value| rpc::parse_hex_u64(value, method))
        .transpose()?;
    let Some(block_number) = block_number else {
        return Ok(None);
    };
    let status = receipt
        .get("status")
        .map(|value| rpc::parse_hex_u64(value, method))
        .transpose()?
        .unwrap_or(1);
    Ok(Some(if status == 1 {
        Settlement::Confirmed { block_number }
    } else {
        Settlement::Reverted { block_number }
    }))
}

fn normalize_revert(error: ChainError) -> ChainError {
    match error.revert_reason() {
        Some(reason) if !matches!(error, ChainError::Reverted { .. }) => {
            let reason = reason
                .strip_prefix("execution reverted: ")
                .or_else(|| reason.strip_prefix("execution reverted"))
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .unwrap_or(reason.as_str())
                .to_string();
            ChainError::Reverted { reason }
        }
        _ => error,
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;
    use crate::chain::contracts::INftCollection;
    use crate::testing::{ScriptedTransport, test_client};

    fn recipient() -> Address {
        Address::from_str("0x742d35Cc6634C0532925a3b844Bc454e4438f44e").unwrap()
    }

    #[tokio::test]
    async fn typed_query_decodes_owner() {
        let owner = Address::repeat_byte(0x11);
        let transport = Arc::new(ScriptedTransport::healthy_chain(move |call| {
            (call.method == "eth_call").then(|| Ok(crate::testing::abi_result(owner)))
        }));
        let client = test_client(transport, &["https://a"]);

        let found = client
            .query(
                Address::repeat_byte(0x22),
                &INftCollection::ownerOfCall {
                    tokenId: U256::from(1u64),
                },
            )
            .await
            .unwrap();
        assert_eq!(found, owner);
    }

    #[tokio::test]
    async fn gas_price_falls_back_when_node_errors() {
        let transport = Arc::new(ScriptedTransport::healthy_chain(|call| {
            (call.method == "eth_gasPrice").then(|| {
                Err(ChainError::Rpc {
                    code: -32601,
                    message: "method not found".to_string(),
                })
            })
        }));
        let client = test_client(transport, &["https://a"]);
        assert_eq!(client.gas_price().await, units::gwei(20));
    }

    #[tokio::test]
    async fn estimate_falls_back_except_on_revert() {
        let transport = Arc::new(ScriptedTransport::healthy_chain(|call| {
            (call.method == "eth_estimateGas").then(|| {
                Err(ChainError::Rpc {
                    code: -32000,
                    message: "gas required exceeds allowance".to_string(),
                })
            })
        }));
        let client = test_client(transport, &["https://a"]);
        let call = RemoteCall::native_transfer(recipient(), U256::from(1u64));
        assert_eq!(client.estimate_gas(&call).await.unwrap(), 300_000);

        let reverting = Arc::new(ScriptedTransport::healthy_chain(|call| {
            (call.method == "eth_estimateGas").then(|| {
                Err(ChainError::Rpc {
                    code: 3,
                    message: "execution reverted: Not listed".to_string(),
                })
            })
        }));
        let client = test_client(reverting, &["https://a"]);
        match client.estimate_gas(&call).await {
            Err(ChainError::Reverted { reason }) => assert_eq!(reason, "Not listed"),
            other => panic!("expected revert, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn submit_sends_one_signed_transaction() {
        let transport = Arc::new(ScriptedTransport::healthy_chain(|_| None));
        let client = test_client(transport.clone(), &["https://a"]);

        let handle = client
            .submit(RemoteCall::native_transfer(recipient(), U256::from(5u64)))
            .await
            .unwrap();
        assert_eq!(transport.count("eth_sendRawTransaction"), 1);
        assert_eq!(handle.label, "transfer");

        let raw = &transport.sent_transactions()[0];
        assert_eq!(handle.hash, alloy_primitives::keccak256(raw));
    }

    #[tokio::test]
    async fn already_known_counts_as_accepted() {
        let transport = Arc::new(ScriptedTransport::healthy_chain(|call| {
            (call.method == "eth_sendRawTransaction").then(|| {
                Err(ChainError::Rpc {
                    code: -32000,
                    message: "already known".to_string(),
                })
            })
        }));
        let client = test_client(transport.clone(), &["https://a"]);
        let handle = client
            .submit(RemoteCall::native_transfer(recipient(), U256::from(5u64)))
            .await
            .unwrap();
        let raw = &transport.sent_transactions()[0];
        assert_eq!(handle.hash, alloy_primitives::keccak256(raw));
    }

    #[tokio::test]
    async fn settlement_reports_revert_status() {
        let transport = Arc::new(ScriptedTransport::healthy_chain(|call| {
            (call.method == "eth_getTransactionReceipt")
                .then(|| Ok(json!({"status": "0x0", "blockNumber": "0x10"})))
        }));
        let client = test_client(transport, &["https://a"]);
        let handle = TxHandle {
            hash: B256::repeat_byte(1),
            label: "stake(uint256)".to_string(),
        };
        assert_eq!(
            client.wait_for_settlement(&handle).await,
            Settlement::Reverted { block_number: 16 }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn settlement_times_out_as_unconfirmed() {
        let transport = Arc::new(ScriptedTransport::healthy_chain(|call| {
            (call.method == "eth_getTransactionReceipt").then(|| Ok(Value::Null))
        }));
        let client = test_client(transport.clone(), &["https://a"]);
        let handle = TxHandle {
            hash: B256::repeat_byte(2),
            label: "transfer".to_string(),
        };
        match client.wait_for_settlement(&handle).await {
            Settlement::Unconfirmed { reason } => assert!(reason.contains("60s")),
            other => panic!("expected unconfirmed, got {other:?}"),
        }
        assert!(transport.count("eth_getTransactionReceipt") > 1);
    }

    #[tokio::test(start_paused = true)]
    async fn settlement_keeps_polling_through_transport_errors() {
        let polls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let seen = polls.clone();
        let transport = Arc::new(ScriptedTransport::healthy_chain(move |call| {
            if call.method != "eth_getTransactionReceipt" {
                return None;
            }
            let n = seen.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Some(if n < 2 {
                Err(ChainError::Transport {
                    endpoint: call.endpoint.clone(),
                    reason: "connection reset".to_string(),
                })
            } else {
                Ok(json!({"status": "0x1", "blockNumber": "0x2"}))
            })
        }));
        let client = test_client(transport, &["https://a"]);
        let handle = TxHandle {
            hash: B256::repeat_byte(3),
            label: "transfer".to_string(),
        };
        assert_eq!(
            client.wait_for_settlement(&handle).await,
            Settlement::Confirmed { block_number: 2 }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn blockless_receipt_keeps_polling_until_mined() {
        let polls = std::sync::atomic::AtomicUsize::new(0);
        let transport = Arc::new(ScriptedTransport::healthy_chain(move |call| {
            (call.method == "eth_getTransactionReceipt").then(|| {
                // Known to the node but not yet mined for the first two polls.
                let n = polls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                let block = if n < 2 { Value::Null } else { json!("0x5") };
                Ok(json!({"status": "0x1", "blockNumber": block}))
            })
        }));
        let client = test_client(transport.clone(), &["https://a"]);
        let handle = TxHandle {
            hash: B256::repeat_byte(4),
            label: "transfer".to_string(),
        };
        assert_eq!(
            client.wait_for_settlement(&handle).await,
            Settlement::Confirmed { block_number: 5 }
        );
        assert_eq!(transport.count("eth_getTransactionReceipt"), 3);
    }
}
