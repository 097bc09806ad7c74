//! Mint, marketplace and staking operations on the configured collection.

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::chain::client::RemoteCall;
use crate::chain::contracts::{ContractRole, IMarketplace, INftCollection, IStaking};
use crate::chain::preconditions::{Resource, TokenRef};
use crate::chain::units::{self, EtherAmount};
use crate::error::OperationError;

use super::{OperationResult, Operations};

/// Marketplace listing as the contract reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    pub token_id: U256,
    pub seller: Address,
    pub price: U256,
    pub active: bool,
}

/// Staking position for one token. `staker` is zero when the token is not staked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeRecord {
    pub token_id: U256,
    pub staker: Address,
    pub started_at: u64,
    pub rewards: U256,
}

impl StakeRecord {
    pub fn is_staked(&self) -> bool {
        self.staker != Address::ZERO
    }
}

impl Operations {
    fn token(&self, token_id: U256) -> Result<TokenRef, OperationError> {
        Ok(TokenRef {
            collection: self.contract(ContractRole::Nft)?,
            token_id,
        })
    }

    pub async fn listing(&self, token_id: U256) -> Result<Listing, OperationError> {
        let market = self.contract(ContractRole::Marketplace)?;
        let listing = self
            .client
            .query(market, &IMarketplace::getListingCall { tokenId: token_id })
            .await?;
        Ok(Listing {
            token_id,
            seller: listing.seller,
            price: listing.price,
            active: listing.active,
        })
    }

    pub async fn stake_info(&self, token_id: U256) -> Result<StakeRecord, OperationError> {
        let staking = self.contract(ContractRole::Staking)?;
        let info = self
            .client
            .query(staking, &IStaking::getStakeInfoCall { tokenId: token_id })
            .await?;
        Ok(StakeRecord {
            token_id,
            staker: info.staker,
            started_at: info.startTime.saturating_to::<u64>(),
            rewards: info.rewards,
        })
    }

    /// Mint a token to `to`. Only the collection owner may mint.
    pub async fn mint(
        &self,
        to: Address,
        token_uri: &str,
    ) -> Result<OperationResult, OperationError> {
        let nft = self.contract(ContractRole::Nft)?;
        self.verifier
            .ensure_owner(self.address(), &Resource::Contract(nft))
            .await?;

        let call = RemoteCall::contract(
            nft,
            &INftCollection::mintCall {
                to,
                tokenURI: token_uri.to_string(),
            },
        );
        let tx = self.submit_funded(call).await?;
        let result = self
            .settle("NFT mint", &tx, format!("Minted a new NFT to {to}."))
            .await?;
        Ok(result.with_data("to", to).with_data("token_uri", token_uri))
    }

    /// List an owned token on the marketplace, approving the marketplace first
    /// if needed.
    pub async fn list(
        &self,
        token_id: U256,
        price: &EtherAmount,
    ) -> Result<OperationResult, OperationError> {
        if price.wei.is_zero() {
            return Err(OperationError::InvalidAmount(
                "listing price must be greater than zero".to_string(),
            ));
        }
        let token = self.token(token_id)?;
        let market = self.contract(ContractRole::Marketplace)?;
        self.verifier
            .ensure_owner(self.address(), &Resource::Token(token))
            .await?;

        let call = RemoteCall::contract(
            market,
            &IMarketplace::listItemCall {
                tokenId: token_id,
                price: price.wei,
            },
        );
        let authorized = self
            .authorizer
            .run_authorized(&token, market, || self.submit_funded(call.clone()))
            .await?;

        let result = self
            .settle(
                "NFT listing",
                &authorized.value,
                format!("Listed NFT #{token_id} for {price}."),
            )
            .await?;
        Ok(result
            .with_data("token_id", token_id.to_string())
            .with_data("price_eth", price.ether.to_string())
            .with_data(
                "approval_tx",
                authorized.approval.map(|tx| tx.hash.to_string()),
            ))
    }

    /// Buy an active listing at its listed price.
    pub async fn buy(&self, token_id: U256) -> Result<OperationResult, OperationError> {
        let market = self.contract(ContractRole::Marketplace)?;
        let listing = self.listing(token_id).await?;
        if !listing.active {
            return Err(OperationError::InvalidState(format!(
                "NFT #{token_id} is not listed for sale"
            )));
        }
        if listing.seller == self.address() {
            return Err(OperationError::InvalidState(format!(
                "you are the seller of NFT #{token_id} and cannot buy your own listing"
            )));
        }

        let call = RemoteCall::contract(market, &IMarketplace::buyItemCall { tokenId: token_id })
            .with_value(listing.price);
        let tx = self.submit_funded(call).await?;
        let price = units::format_ether(listing.price);
        let result = self
            .settle(
                "NFT purchase",
                &tx,
                format!("Bought NFT #{token_id} for {price} ETH."),
            )
            .await?;
        Ok(result
            .with_data("token_id", token_id.to_string())
            .with_data("price_eth", price)
            .with_data("seller", listing.seller))
    }

    /// Stake an owned token, approving the staking contract first if needed.
    pub async fn stake(&self, token_id: U256) -> Result<OperationResult, OperationError> {
        let token = self.token(token_id)?;
        let staking = self.contract(ContractRole::Staking)?;
        self.verifier
            .ensure_owner(self.address(), &Resource::Token(token))
            .await?;

        let call = RemoteCall::contract(staking, &IStaking::stakeCall { tokenId: token_id });
        let authorized = self
            .authorizer
            .run_authorized(&token, staking, || self.submit_funded(call.clone()))
            .await?;

        let result = self
            .settle("NFT staking", &authorized.value, format!("Staked NFT #{token_id}."))
            .await?;
        Ok(result.with_data("token_id", token_id.to_string()).with_data(
            "approval_tx",
            authorized.approval.map(|tx| tx.hash.to_string()),
        ))
    }

    /// Unstake a token this account staked.
    pub async fn unstake(&self, token_id: U256) -> Result<OperationResult, OperationError> {
        let staking = self.contract(ContractRole::Staking)?;
        let record = self.stake_info(token_id).await?;
        if !record.is_staked() {
            return Err(OperationError::InvalidState(format!(
                "NFT #{token_id} is not staked"
            )));
        }
        if record.staker != self.address() {
            return Err(OperationError::NotOwner {
                identity: self.address(),
                resource: format!("the stake of NFT #{token_id}"),
                owner: record.staker,
            });
        }

        let call = RemoteCall::contract(staking, &IStaking::unstakeCall { tokenId: token_id });
        let tx = self.submit_funded(call).await?;
        let rewards = units::format_ether(record.rewards);
        let result = self
            .settle(
                "NFT unstaking",
                &tx,
                format!("Unstaked NFT #{token_id} (accrued rewards: {rewards} ETH)."),
            )
            .await?;
        Ok(result
            .with_data("token_id", token_id.to_string())
            .with_data("rewards_eth", rewards))
    }
}
