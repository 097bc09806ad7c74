use alloy_primitives::Address;

use crate::chain::client::RemoteCall;
use crate::chain::units::EtherAmount;
use crate::error::OperationError;

use super::{OperationResult, Operations};

impl Operations {
    /// Send native ETH to `to`.
    ///
    /// The balance must cover the amount plus the worst-case fee of the quote
    /// actually used for submission.
    pub async fn transfer(
        &self,
        to: Address,
        amount: &EtherAmount,
    ) -> Result<OperationResult, OperationError> {
        if to == Address::ZERO {
            return Err(OperationError::InvalidAddress(
                "refusing to send to the zero address".to_string(),
            ));
        }
        if amount.wei.is_zero() {
            return Err(OperationError::InvalidAmount(
                "amount must be greater than zero".to_string(),
            ));
        }

        let tx = self
            .submit_funded(RemoteCall::native_transfer(to, amount.wei))
            .await?;
        let result = self
            .settle("Transfer", &tx, format!("Sent {amount} to {to}."))
            .await?;
        Ok(result
            .with_data("to", to)
            .with_data("amount_eth", amount.ether.to_string()))
    }
}
