//! Confirmed on-chain operations.
//!
//! Each operation checks its preconditions against chain state, submits at
//! most what it needs, waits for settlement, and always comes back as a
//! complete [`OperationResult`], success or failure.

pub mod balance;
pub mod loan;
pub mod nft;
pub mod transfer;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::chain::authorization::AutoAuthorizer;
use crate::chain::client::{ChainClient, FeeQuote, RemoteCall, Settlement, TxHandle};
use crate::chain::contracts::{ContractBook, ContractRole};
use crate::chain::preconditions::PreconditionVerifier;
use crate::chain::units::{self, EtherAmount};
use crate::classify::{ClassifiedError, classify_operation_error};
use crate::error::{ChainError, OperationError};

pub use loan::Loan;
pub use nft::{Listing, StakeRecord};

/// Where a balance query's address came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressSource {
    /// Derived from a private key the user pasted.
    PrivateKey,
    /// Given explicitly.
    Explicit,
    /// Nothing given; the process's own account.
    Own,
}

/// A fully validated operation, ready to run once confirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum OperationRequest {
    Balance {
        address: Address,
        source: AddressSource,
    },
    Transfer {
        to: Address,
        amount: EtherAmount,
    },
    Mint {
        to: Address,
        token_uri: String,
    },
    List {
        token_id: U256,
        price: EtherAmount,
    },
    Buy {
        token_id: U256,
    },
    Stake {
        token_id: U256,
    },
    Unstake {
        token_id: U256,
    },
    CreateLoan {
        token_id: U256,
        amount: EtherAmount,
        duration_days: u64,
    },
    RepayLoan {
        loan_id: U256,
    },
}

impl OperationRequest {
    /// Short name used in messages and logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Balance { .. } => "Balance query",
            Self::Transfer { .. } => "Transfer",
            Self::Mint { .. } => "NFT mint",
            Self::List { .. } => "NFT listing",
            Self::Buy { .. } => "NFT purchase",
            Self::Stake { .. } => "NFT staking",
            Self::Unstake { .. } => "NFT unstaking",
            Self::CreateLoan { .. } => "Loan creation",
            Self::RepayLoan { .. } => "Loan repayment",
        }
    }

    /// One-line description of what confirming will do.
    pub fn describe(&self) -> String {
        match self {
            Self::Balance { address, source } => match source {
                AddressSource::PrivateKey => format!(
                    "Check the balance of {address} (derived from the private key you sent)"
                ),
                AddressSource::Explicit => format!("Check the balance of {address}"),
                AddressSource::Own => format!("Check the balance of your account {address}"),
            },
            Self::Transfer { to, amount } => format!("Send {amount} to {to}"),
            Self::Mint { to, token_uri } if token_uri.is_empty() => {
                format!("Mint a new NFT to {to}")
            }
            Self::Mint { to, token_uri } => format!("Mint a new NFT to {to} with URI {token_uri}"),
            Self::List { token_id, price } => {
                format!("List NFT #{token_id} on the marketplace for {price}")
            }
            Self::Buy { token_id } => format!("Buy NFT #{token_id} at its listed price"),
            Self::Stake { token_id } => format!("Stake NFT #{token_id}"),
            Self::Unstake { token_id } => format!("Unstake NFT #{token_id}"),
            Self::CreateLoan {
                token_id,
                amount,
                duration_days,
            } => format!(
                "Borrow {amount} against NFT #{token_id} for {duration_days} day{}",
                if *duration_days == 1 { "" } else { "s" }
            ),
            Self::RepayLoan { loan_id } => format!("Repay loan #{loan_id}"),
        }
    }

    /// The request's parameters as flat JSON values.
    pub fn parameters(&self) -> BTreeMap<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map.into_iter().collect(),
            _ => BTreeMap::new(),
        }
    }
}

/// Outcome of one operation, always fully populated.
///
/// A submitted operation whose settlement could not be confirmed in time is
/// a qualified success: `success` is true and `error` carries the
/// `SETTLEMENT_UNCONFIRMED` qualifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationResult {
    pub success: bool,
    pub text: String,
    #[serde(default)]
    pub values: BTreeMap<String, Value>,
    #[serde(default)]
    pub data: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ClassifiedError>,
}

impl OperationResult {
    pub fn success(text: impl Into<String>) -> Self {
        Self {
            success: true,
            text: text.into(),
            values: BTreeMap::new(),
            data: BTreeMap::new(),
            error: None,
        }
    }

    pub fn failure(error: ClassifiedError) -> Self {
        Self {
            success: false,
            text: error.user_message.clone(),
            values: BTreeMap::new(),
            data: BTreeMap::new(),
            error: Some(error),
        }
    }

    /// Nothing was attempted, and nothing went wrong either.
    pub fn not_performed(text: impl Into<String>) -> Self {
        Self {
            success: false,
            ..Self::success(text)
        }
    }

    pub fn with_data(mut self, key: &str, value: impl Serialize) -> Self {
        self.data.insert(
            key.to_string(),
            serde_json::to_value(value).unwrap_or(Value::Null),
        );
        self
    }

    pub fn with_values(mut self, values: BTreeMap<String, Value>) -> Self {
        self.values.extend(values);
        self
    }

    /// The transaction hash, when the operation submitted one.
    pub fn tx_hash(&self) -> Option<&str> {
        self.data.get("tx_hash").and_then(Value::as_str)
    }
}

/// Runs a confirmed request.
#[async_trait]
pub trait OperationExecutor: Send + Sync {
    async fn execute(&self, request: &OperationRequest) -> OperationResult;
}

/// Executes operations for the process's account against configured contracts.
pub struct Operations {
    client: Arc<ChainClient>,
    verifier: PreconditionVerifier,
    authorizer: AutoAuthorizer,
    contracts: ContractBook,
}

impl Operations {
    pub fn new(
        client: Arc<ChainClient>,
        contracts: ContractBook,
        approval_settle_delay: Duration,
    ) -> Self {
        Self {
            verifier: PreconditionVerifier::new(Arc::clone(&client)),
            authorizer: AutoAuthorizer::new(Arc::clone(&client), approval_settle_delay),
            client,
            contracts,
        }
    }

    pub fn address(&self) -> Address {
        self.client.address()
    }

    pub fn contracts(&self) -> &ContractBook {
        &self.contracts
    }

    fn contract(&self, role: ContractRole) -> Result<Address, OperationError> {
        self.contracts.get(role).ok_or_else(|| {
            OperationError::MissingParameter(format!(
                "{} address (set {})",
                role.as_str(),
                role.env_key()
            ))
        })
    }

    /// Fail unless the account holds at least `required` wei.
    async fn ensure_funds(&self, required: U256) -> Result<(), OperationError> {
        let available = self.client.native_balance(self.address()).await?;
        if available < required {
            return Err(OperationError::InsufficientBalance {
                required: units::format_ether(required),
                available: units::format_ether(available),
            });
        }
        Ok(())
    }

    /// Quote `call`, check the account covers value plus worst-case fees,
    /// then submit it with that same quote.
    async fn submit_funded(&self, call: RemoteCall) -> Result<TxHandle, OperationError> {
        let quote: FeeQuote = self.client.quote_fees(&call).await?;
        self.ensure_funds(call.value + quote.max_cost()).await?;
        Ok(self.client.submit_with_quote(call, &quote).await?)
    }

    /// Wait for `tx` and turn its settlement into a result.
    async fn settle(
        &self,
        operation: &str,
        tx: &TxHandle,
        text: String,
    ) -> Result<OperationResult, OperationError> {
        let settlement = self.client.wait_for_settlement(tx).await;
        settled(operation, tx, settlement, text)
    }
}

fn settled(
    operation: &str,
    tx: &TxHandle,
    settlement: Settlement,
    text: String,
) -> Result<OperationResult, OperationError> {
    let tx_hash = tx.hash.to_string();
    match settlement {
        Settlement::Confirmed { block_number } => Ok(OperationResult::success(format!(
            "{text}\nTransaction: {tx_hash}"
        ))
        .with_data("tx_hash", &tx_hash)
        .with_data("status", "confirmed")
        .with_data("block_number", block_number)),
        Settlement::Reverted { block_number } => Err(ChainError::Reverted {
            reason: format!("transaction {tx_hash} reverted in block {block_number}"),
        }
        .into()),
        Settlement::Unconfirmed { reason } => {
            let qualifier = ClassifiedError::settlement_unconfirmed(operation, &tx_hash, &reason);
            let mut result = OperationResult::success(qualifier.user_message.clone())
                .with_data("tx_hash", &tx_hash)
                .with_data("status", "unconfirmed");
            result.error = Some(qualifier);
            Ok(result)
        }
    }
}

/// Log and package an executor outcome, attaching the request's parameters.
fn finish(
    request: &OperationRequest,
    outcome: Result<OperationResult, OperationError>,
) -> OperationResult {
    let label = request.label();
    let result = match outcome {
        Ok(result) => {
            tracing::info!(
                operation = label,
                tx_hash = result.tx_hash().unwrap_or("-"),
                qualified = result.error.is_some(),
                "operation completed"
            );
            result
        }
        Err(error) => {
            let classified = classify_operation_error(&error, label);
            tracing::warn!(
                operation = label,
                category = %classified.category,
                error = %error,
                "operation failed"
            );
            OperationResult::failure(classified)
        }
    };
    result.with_values(request.parameters())
}

#[async_trait]
impl OperationExecutor for Operations {
    async fn execute(&self, request: &OperationRequest) -> OperationResult {
        let outcome = match request {
            OperationRequest::Balance { address, source } => self.balance(*address, *source).await,
            OperationRequest::Transfer { to, amount } => self.transfer(*to, amount).await,
            OperationRequest::Mint { to, token_uri } => self.mint(*to, token_uri).await,
            OperationRequest::List { token_id, price } => self.list(*token_id, price).await,
            OperationRequest::Buy { token_id } => self.buy(*token_id).await,
            OperationRequest::Stake { token_id } => self.stake(*token_id).await,
            OperationRequest::Unstake { token_id } => self.unstake(*token_id).await,
            OperationRequest::CreateLoan {
                token_id,
                amount,
                duration_days,
            } => self.create_loan(*token_id, amount, *duration_days).await,
            OperationRequest::RepayLoan { loan_id } => self.repay_loan(*loan_id).await,
        };
        finish(request, outcome)
    }
}
