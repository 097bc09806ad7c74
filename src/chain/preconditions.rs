//! Ownership and authorization checks read from chain state.

use std::fmt;
use std::sync::Arc;

use alloy_primitives::{Address, U256};

use crate::chain::client::ChainClient;
use crate::chain::contracts::INftCollection;
use crate::error::{ChainError, OperationError};

/// One token inside a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenRef {
    pub collection: Address,
    pub token_id: U256,
}

impl fmt::Display for TokenRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "token #{} of {}", self.token_id, self.collection)
    }
}

/// Something with an on-chain owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    /// An NFT; owner is `ownerOf(tokenId)`.
    Token(TokenRef),
    /// An `Ownable` contract; owner is `owner()`.
    Contract(Address),
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Token(token) => token.fmt(f),
            Self::Contract(address) => write!(f, "contract {address}"),
        }
    }
}

#[derive(Clone)]
pub struct PreconditionVerifier {
    client: Arc<ChainClient>,
}

impl PreconditionVerifier {
    pub fn new(client: Arc<ChainClient>) -> Self {
        Self { client }
    }

    pub async fn owner_of(&self, resource: &Resource) -> Result<Address, ChainError> {
        match resource {
            Resource::Token(token) => {
                self.client
                    .query(
                        token.collection,
                        &INftCollection::ownerOfCall {
                            tokenId: token.token_id,
                        },
                    )
                    .await
            }
            Resource::Contract(address) => {
                self.client
                    .query(*address, &INftCollection::ownerCall {})
                    .await
            }
        }
    }

    pub async fn is_owner(
        &self,
        identity: Address,
        resource: &Resource,
    ) -> Result<bool, ChainError> {
        Ok(self.owner_of(resource).await? == identity)
    }

    /// Whether `grantee` may move `token` on behalf of `identity`, either via
    /// the per-token approval or operator approval for the whole collection.
    pub async fn is_authorized_for(
        &self,
        identity: Address,
        token: &TokenRef,
        grantee: Address,
    ) -> Result<bool, ChainError> {
        let approved: Address = self
            .client
            .query(
                token.collection,
                &INftCollection::getApprovedCall {
                    tokenId: token.token_id,
                },
            )
            .await?;
        if approved == grantee {
            return Ok(true);
        }
        self.client
            .query(
                token.collection,
                &INftCollection::isApprovedForAllCall {
                    owner: identity,
                    operator: grantee,
                },
            )
            .await
    }

    /// Fail with [`OperationError::NotOwner`] unless `identity` owns `resource`.
    pub async fn ensure_owner(
        &self,
        identity: Address,
        resource: &Resource,
    ) -> Result<(), OperationError> {
        let owner = self.owner_of(resource).await?;
        if owner != identity {
            tracing::info!(%identity, %owner, %resource, "ownership precondition failed");
            return Err(OperationError::NotOwner {
                identity,
                resource: resource.to_string(),
                owner,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use alloy_sol_types::SolCall;

    use super::*;
    use crate::testing::{ScriptedTransport, abi_result, test_client};

    fn collection() -> Address {
        Address::repeat_byte(0xc0)
    }

    fn market() -> Address {
        Address::repeat_byte(0x3a)
    }

    fn token() -> TokenRef {
        TokenRef {
            collection: collection(),
            token_id: U256::from(5u64),
        }
    }

    fn verifier(owner: Address, approved: Address, operator: bool) -> PreconditionVerifier {
        let transport = Arc::new(ScriptedTransport::healthy_chain(move |call| {
            if call.method != "eth_call" {
                return None;
            }
            let selector = call.selector()?;
            Some(Ok(if selector == INftCollection::ownerOfCall::SELECTOR
                || selector == INftCollection::ownerCall::SELECTOR
            {
                abi_result(owner)
            } else if selector == INftCollection::getApprovedCall::SELECTOR {
                abi_result(approved)
            } else {
                abi_result(operator)
            }))
        }));
        PreconditionVerifier::new(Arc::new(test_client(transport, &["https://a"])))
    }

    #[tokio::test]
    async fn non_owner_is_rejected_with_actual_owner() {
        let someone_else = Address::repeat_byte(0x99);
        let verifier = verifier(someone_else, Address::ZERO, false);
        let me = crate::testing::test_account().address();

        match verifier.ensure_owner(me, &Resource::Token(token())).await {
            Err(OperationError::NotOwner { owner, .. }) => assert_eq!(owner, someone_else),
            other => panic!("expected NotOwner, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn contract_owner_checked_via_owner_call() {
        let me = crate::testing::test_account().address();
        let verifier = verifier(me, Address::ZERO, false);
        assert!(
            verifier
                .is_owner(me, &Resource::Contract(collection()))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn per_token_approval_authorizes() {
        let me = crate::testing::test_account().address();
        let verifier = verifier(me, market(), false);
        assert!(verifier.is_authorized_for(me, &token(), market()).await.unwrap());
    }

    #[tokio::test]
    async fn operator_approval_authorizes() {
        let me = crate::testing::test_account().address();
        let verifier = verifier(me, Address::ZERO, true);
        assert!(verifier.is_authorized_for(me, &token(), market()).await.unwrap());
    }

    #[tokio::test]
    async fn no_approval_is_unauthorized() {
        let me = crate::testing::test_account().address();
        let verifier = verifier(me, Address::ZERO, false);
        assert!(!verifier.is_authorized_for(me, &token(), market()).await.unwrap());
    }
}
