use alloy_primitives::Address;

use crate::chain::units;
use crate::error::OperationError;

use super::{AddressSource, OperationResult, Operations};

impl Operations {
    /// Native balance of `address`.
    pub async fn balance(
        &self,
        address: Address,
        source: AddressSource,
    ) -> Result<OperationResult, OperationError> {
        let wei = self.client.native_balance(address).await?;
        let ether = units::format_ether(wei);
        let note = match source {
            AddressSource::PrivateKey => " (derived from the provided private key)",
            AddressSource::Explicit => "",
            AddressSource::Own => " (your account)",
        };
        Ok(
            OperationResult::success(format!("Balance of {address}{note}: {ether} ETH"))
                .with_data("address", address)
                .with_data("balance_wei", wei.to_string())
                .with_data("balance_eth", &ether),
        )
    }
}
