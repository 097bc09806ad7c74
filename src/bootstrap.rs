//! Startup helpers: env files, logging, and wiring the runtime together.
//!
//! File: `~/.chainpilot/.env` (standard dotenvy format)

use std::path::PathBuf;
use std::sync::Arc;

use secrecy::ExposeSecret;
use tracing_subscriber::EnvFilter;

use crate::agent::{ConfirmationEngine, InMemoryHistory, ParameterExtractor, SessionManager};
use crate::chain::client::{ChainClient, fetch_chain_id};
use crate::chain::{Account, EndpointPool, HttpTransport, RpcTransport};
use crate::config::Config;
use crate::error::Error;
use crate::ops::Operations;

/// `~/.chainpilot`, or `./.chainpilot` without a home directory.
pub fn chainpilot_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".chainpilot")
}

/// Path to the chainpilot-specific `.env` file: `~/.chainpilot/.env`.
pub fn chainpilot_env_path() -> PathBuf {
    chainpilot_dir().join(".env")
}

/// Load env vars from `~/.chainpilot/.env` (in addition to the standard `.env`).
///
/// Call this **after** `dotenvy::dotenv()` so that the standard `./.env`
/// takes priority. dotenvy never overwrites existing env vars, so the
/// effective priority is:
///
///   explicit env vars > `./.env` > `~/.chainpilot/.env`
pub fn load_chainpilot_env() {
    let path = chainpilot_env_path();
    if path.exists() {
        let _ = dotenvy::from_path(&path);
    }
}

/// Install the global subscriber. `RUST_LOG` wins over the default
/// `chainpilot=info`.
pub fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("chainpilot=info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if let Err(e) = result {
        eprintln!("Warning: tracing already initialised: {e}");
    }
}

/// Everything a front end needs, built once per process.
pub struct Runtime {
    pub client: Arc<ChainClient>,
    pub operations: Arc<Operations>,
    pub engine: Arc<ConfirmationEngine>,
    pub history: Arc<InMemoryHistory>,
    pub sessions: SessionManager,
}

impl Runtime {
    /// Wire the runtime over HTTP JSON-RPC.
    pub async fn assemble(config: &Config) -> Result<Self, Error> {
        let transport = Arc::new(HttpTransport::new(config.chain.rpc_timeout)?);
        Self::assemble_with(config, transport).await
    }

    /// Wire the runtime over any transport.
    pub async fn assemble_with(
        config: &Config,
        transport: Arc<dyn RpcTransport>,
    ) -> Result<Self, Error> {
        let account = Arc::new(Account::from_private_key(
            config.chain.private_key.expose_secret(),
        )?);
        let endpoints = EndpointPool::new(config.chain.rpc_urls.iter().cloned())?;

        let chain_id = match config.chain.chain_id {
            Some(id) => id,
            None => {
                let id = fetch_chain_id(transport.as_ref(), &endpoints).await?;
                tracing::info!(chain_id = id, "chain id reported by node");
                id
            }
        };

        let client = Arc::new(ChainClient::new(
            Arc::clone(&account),
            endpoints,
            transport,
            config.chain.client_config(chain_id),
        ));
        let operations = Arc::new(Operations::new(
            Arc::clone(&client),
            config.contracts,
            config.chain.approval_settle_delay,
        ));
        let history = Arc::new(InMemoryHistory::new());
        let engine = Arc::new(
            ConfirmationEngine::new(
                ParameterExtractor::new(Some(account.address())),
                operations.clone(),
                config.confirmation.clone(),
            )
            .with_history(history.clone()),
        );

        tracing::info!(
            address = %account.address(),
            chain_id,
            endpoints = client.endpoints().len(),
            "runtime ready"
        );

        Ok(Self {
            client,
            operations,
            engine,
            history,
            sessions: SessionManager::new(),
        })
    }
}
