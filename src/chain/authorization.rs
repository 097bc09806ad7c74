//! Grants a contract approval over a token on demand, then retries once.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::Address;

use crate::chain::client::{ChainClient, RemoteCall, TxHandle};
use crate::chain::contracts::INftCollection;
use crate::chain::preconditions::{PreconditionVerifier, TokenRef};
use crate::classify::{self, ErrorCategory};
use crate::error::{ChainError, OperationError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationOutcome {
    AlreadyGranted,
    Granted { tx: TxHandle },
}

/// Result of an operation run under [`AutoAuthorizer::run_authorized`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authorized<T> {
    pub value: T,
    /// The approval transaction sent on the way, if one was needed.
    pub approval: Option<TxHandle>,
}

pub struct AutoAuthorizer {
    client: Arc<ChainClient>,
    verifier: PreconditionVerifier,
    settle_delay: Duration,
}

impl AutoAuthorizer {
    /// `settle_delay` is how long to wait after sending an approval before
    /// relying on it.
    pub fn new(client: Arc<ChainClient>, settle_delay: Duration) -> Self {
        let verifier = PreconditionVerifier::new(Arc::clone(&client));
        Self {
            client,
            verifier,
            settle_delay,
        }
    }

    /// Make sure `grantee` may move `token`, sending one approval if not.
    pub async fn ensure_authorized(
        &self,
        token: &TokenRef,
        grantee: Address,
    ) -> Result<AuthorizationOutcome, ChainError> {
        if self
            .verifier
            .is_authorized_for(self.client.address(), token, grantee)
            .await?
        {
            tracing::debug!(%token, %grantee, "authorization already granted");
            return Ok(AuthorizationOutcome::AlreadyGranted);
        }
        let tx = self.grant(token, grantee).await?;
        Ok(AuthorizationOutcome::Granted { tx })
    }

    async fn grant(&self, token: &TokenRef, grantee: Address) -> Result<TxHandle, ChainError> {
        let call = RemoteCall::contract(
            token.collection,
            &INftCollection::approveCall {
                to: grantee,
                tokenId: token.token_id,
            },
        );
        let tx = self.client.submit(call).await?;
        tracing::info!(
            %token,
            %grantee,
            tx_hash = %tx.hash,
            settle_ms = self.settle_delay.as_millis() as u64,
            "approval sent, waiting before use"
        );
        tokio::time::sleep(self.settle_delay).await;
        Ok(tx)
    }

    /// Run `operation` with `grantee` authorized over `token`.
    ///
    /// Authorization is checked (and granted if missing) first. If the
    /// operation still fails for an authorization reason, one more approval is
    /// sent and the operation retried once, but only if no approval was sent
    /// earlier in this call. A second authorization failure ends with
    /// [`OperationError::ManualAuthorizationRequired`].
    pub async fn run_authorized<T, F, Fut>(
        &self,
        token: &TokenRef,
        grantee: Address,
        mut operation: F,
    ) -> Result<Authorized<T>, OperationError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, OperationError>>,
    {
        let mut approval = match self.ensure_authorized(token, grantee).await? {
            AuthorizationOutcome::AlreadyGranted => None,
            AuthorizationOutcome::Granted { tx } => Some(tx),
        };

        let error = match operation().await {
            Ok(value) => return Ok(Authorized { value, approval }),
            Err(e) if is_authorization_failure(&e) => e,
            Err(e) => return Err(e),
        };

        if approval.is_some() {
            return Err(manual_authorization(token, grantee, &error));
        }

        tracing::warn!(
            %token,
            %grantee,
            error = %error,
            "operation reported missing authorization, approving and retrying once"
        );
        approval = Some(self.grant(token, grantee).await?);

        match operation().await {
            Ok(value) => Ok(Authorized { value, approval }),
            Err(e) if is_authorization_failure(&e) => Err(manual_authorization(token, grantee, &e)),
            Err(e) => Err(e),
        }
    }
}

/// Only node/contract failures count; local precondition errors never
/// trigger an approval.
fn is_authorization_failure(error: &OperationError) -> bool {
    match error {
        OperationError::Chain(chain) => {
            classify::classify_chain_error(chain, "").category
                == ErrorCategory::AuthorizationRequired
        }
        _ => false,
    }
}

fn manual_authorization(
    token: &TokenRef,
    grantee: Address,
    error: &OperationError,
) -> OperationError {
    tracing::warn!(%token, %grantee, error = %error, "automatic authorization did not take effect");
    OperationError::ManualAuthorizationRequired {
        resource: token.to_string(),
        grantee,
        reason: error.to_string(),
    }
}
