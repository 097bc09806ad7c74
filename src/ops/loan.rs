//! NFT-collateralized loans.

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::chain::client::RemoteCall;
use crate::chain::contracts::{ContractRole, ILending};
use crate::chain::preconditions::{Resource, TokenRef};
use crate::chain::units::{self, EtherAmount};
use crate::error::OperationError;

use super::{OperationResult, Operations};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Loan {
    pub loan_id: U256,
    pub borrower: Address,
    pub lender: Address,
    pub token_id: U256,
    pub amount: U256,
    /// Unix seconds.
    pub due_date: u64,
    pub repaid: bool,
}

impl Loan {
    pub fn exists(&self) -> bool {
        self.borrower != Address::ZERO
    }
}

impl Operations {
    pub async fn loan(&self, loan_id: U256) -> Result<Loan, OperationError> {
        let lending = self.contract(ContractRole::Lending)?;
        let loan = self
            .client
            .query(lending, &ILending::getLoanCall { loanId: loan_id })
            .await?;
        Ok(Loan {
            loan_id,
            borrower: loan.borrower,
            lender: loan.lender,
            token_id: loan.tokenId,
            amount: loan.amount,
            due_date: loan.dueDate.saturating_to::<u64>(),
            repaid: loan.repaid,
        })
    }

    /// Borrow against an owned token. The lending contract takes custody of
    /// the token, so it is approved first if needed.
    pub async fn create_loan(
        &self,
        token_id: U256,
        amount: &EtherAmount,
        duration_days: u64,
    ) -> Result<OperationResult, OperationError> {
        if amount.wei.is_zero() {
            return Err(OperationError::InvalidAmount(
                "loan amount must be greater than zero".to_string(),
            ));
        }
        if duration_days == 0 {
            return Err(OperationError::InvalidAmount(
                "loan duration must be at least one day".to_string(),
            ));
        }
        let token = TokenRef {
            collection: self.contract(ContractRole::Nft)?,
            token_id,
        };
        let lending = self.contract(ContractRole::Lending)?;
        self.verifier
            .ensure_owner(self.address(), &Resource::Token(token))
            .await?;

        let call = RemoteCall::contract(
            lending,
            &ILending::createLoanCall {
                tokenId: token_id,
                amount: amount.wei,
                durationDays: U256::from(duration_days),
            },
        );
        let authorized = self
            .authorizer
            .run_authorized(&token, lending, || self.submit_funded(call.clone()))
            .await?;

        let result = self
            .settle(
                "Loan creation",
                &authorized.value,
                format!(
                    "Created a loan request for {amount} against NFT #{token_id} \
                     over {duration_days} days."
                ),
            )
            .await?;
        Ok(result
            .with_data("token_id", token_id.to_string())
            .with_data("amount_eth", amount.ether.to_string())
            .with_data("duration_days", duration_days)
            .with_data(
                "approval_tx",
                authorized.approval.map(|tx| tx.hash.to_string()),
            ))
    }

    /// Repay an outstanding loan this account borrowed.
    pub async fn repay_loan(&self, loan_id: U256) -> Result<OperationResult, OperationError> {
        let lending = self.contract(ContractRole::Lending)?;
        let loan = self.loan(loan_id).await?;
        if !loan.exists() {
            return Err(OperationError::InvalidState(format!(
                "loan #{loan_id} does not exist"
            )));
        }
        if loan.borrower != self.address() {
            return Err(OperationError::NotOwner {
                identity: self.address(),
                resource: format!("loan #{loan_id}"),
                owner: loan.borrower,
            });
        }
        if loan.repaid {
            return Err(OperationError::InvalidState(format!(
                "loan #{loan_id} is already repaid"
            )));
        }

        let call = RemoteCall::contract(lending, &ILending::repayLoanCall { loanId: loan_id })
            .with_value(loan.amount);
        let tx = self.submit_funded(call).await?;
        let amount = units::format_ether(loan.amount);
        let result = self
            .settle(
                "Loan repayment",
                &tx,
                format!("Repaid loan #{loan_id} ({amount} ETH)."),
            )
            .await?;
        Ok(result
            .with_data("loan_id", loan_id.to_string())
            .with_data("amount_eth", amount)
            .with_data("token_id", loan.token_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use alloy_sol_types::SolCall;

    use super::*;
    use crate::chain::contracts::ContractBook;
    use crate::chain::rpc;
    use crate::testing::{ScriptedTransport, abi_result, test_account, test_client};

    fn ops_with(transport: Arc<ScriptedTransport>) -> Operations {
        Operations::new(
            Arc::new(test_client(transport, &["https://a"])),
            ContractBook {
                nft: Some(Address::repeat_byte(0xc0)),
                lending: Some(Address::repeat_byte(0x1e)),
                ..ContractBook::default()
            },
            Duration::ZERO,
        )
    }

    fn loan_view(borrower: Address, amount: U256, repaid: bool) -> serde_json::Value {
        abi_result((
            borrower,
            Address::repeat_byte(0x0e),
            U256::from(3u64),
            amount,
            U256::from(1_800_000_000u64),
            repaid,
        ))
    }

    #[tokio::test]
    async fn repay_rejects_other_borrowers() {
        let transport = Arc::new(ScriptedTransport::healthy_chain(|call| {
            (call.selector() == Some(ILending::getLoanCall::SELECTOR))
                .then(|| Ok(loan_view(Address::repeat_byte(0x44), U256::from(1u64), false)))
        }));
        let ops = ops_with(transport.clone());
        assert!(matches!(
            ops.repay_loan(U256::from(1u64)).await,
            Err(OperationError::NotOwner { .. })
        ));
        assert_eq!(transport.count("eth_sendRawTransaction"), 0);
    }

    #[tokio::test]
    async fn repay_rejects_settled_loans() {
        let me = test_account().address();
        let transport = Arc::new(ScriptedTransport::healthy_chain(move |call| {
            (call.selector() == Some(ILending::getLoanCall::SELECTOR))
                .then(|| Ok(loan_view(me, U256::from(1u64), true)))
        }));
        let ops = ops_with(transport);
        assert!(matches!(
            ops.repay_loan(U256::from(1u64)).await,
            Err(OperationError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn repay_requires_funds_for_the_loan_amount() {
        let me = test_account().address();
        let transport = Arc::new(ScriptedTransport::healthy_chain(move |call| {
            if call.method == "eth_call" && call.selector() == Some(ILending::getLoanCall::SELECTOR)
            {
                return Some(Ok(loan_view(
                    me,
                    U256::from(2_000_000_000_000_000_000u128),
                    false,
                )));
            }
            (call.method == "eth_getBalance")
                .then(|| Ok(rpc::quantity(U256::from(1_000_000_000_000_000_000u128))))
        }));
        let ops = ops_with(transport.clone());
        assert!(matches!(
            ops.repay_loan(U256::from(1u64)).await,
            Err(OperationError::InsufficientBalance { .. })
        ));
        assert_eq!(transport.count("eth_sendRawTransaction"), 0);
    }

    #[tokio::test]
    async fn repay_sends_loan_amount_as_value() {
        let me = test_account().address();
        let transport = Arc::new(ScriptedTransport::healthy_chain(move |call| {
            (call.method == "eth_call" && call.selector() == Some(ILending::getLoanCall::SELECTOR))
                .then(|| Ok(loan_view(me, U256::from(1_000_000_000_000_000u64), false)))
        }));
        let ops = ops_with(transport.clone());
        let result = ops.repay_loan(U256::from(1u64)).await.unwrap();
        assert!(result.text.contains("0.001 ETH"));
        assert_eq!(
            transport.sent_with_selector(ILending::repayLoanCall::SELECTOR),
            1
        );
    }

    #[tokio::test]
    async fn zero_duration_is_rejected_locally() {
        let transport = Arc::new(ScriptedTransport::healthy_chain(|_| None));
        let ops = ops_with(transport.clone());
        let err = ops
            .create_loan(U256::from(3u64), &EtherAmount::parse("1").unwrap(), 0)
            .await
            .unwrap_err();
        assert!(matches!(err, OperationError::InvalidAmount(_)));
        assert!(transport.calls().is_empty());
    }
}
