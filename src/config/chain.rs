use std::time::Duration;

use secrecy::SecretString;
use url::Url;

use crate::chain::client::ChainClientConfig;
use crate::chain::units;
use crate::config::helpers::{EnvLookup, env_or, list_env, optional_env, parse_optional_env};
use crate::error::ConfigError;
use crate::settings::Settings;

/// Node access and transaction tunables.
#[derive(Debug, Clone)]
pub struct ChainConfig {
    /// Validated endpoint URLs, in priority order.
    pub rpc_urls: Vec<String>,
    /// `None` means ask the node.
    pub chain_id: Option<u64>,
    pub private_key: SecretString,
    pub rpc_timeout: Duration,
    pub settlement_timeout: Duration,
    pub receipt_poll_interval: Duration,
    pub approval_settle_delay: Duration,
    pub fallback_gas_price_gwei: u64,
    pub fallback_gas_limit: u64,
    pub priority_fee_gwei: u64,
}

impl ChainConfig {
    pub(crate) fn resolve(settings: &Settings, env: &dyn EnvLookup) -> Result<Self, ConfigError> {
        let file = &settings.chain;

        let rpc_urls = list_env(env, "CHAIN_RPC_URLS").unwrap_or_else(|| file.rpc_urls.clone());
        if rpc_urls.is_empty() {
            return Err(ConfigError::MissingRequired {
                key: "CHAIN_RPC_URLS".to_string(),
                hint: "Set a comma-separated list of JSON-RPC endpoints.".to_string(),
            });
        }
        for raw in &rpc_urls {
            validate_endpoint(raw)?;
        }

        let private_key = optional_env(env, "WALLET_PRIVATE_KEY")
            .map(SecretString::from)
            .ok_or_else(|| ConfigError::MissingRequired {
                key: "WALLET_PRIVATE_KEY".to_string(),
                hint: "Set the hex private key of the signing account.".to_string(),
            })?;

        let chain_id = parse_optional_env::<u64>(env, "CHAIN_ID")?.or(file.chain_id);

        let fallback_gas_limit = env_or(env, "FALLBACK_GAS_LIMIT", file.fallback_gas_limit)?;
        if fallback_gas_limit == 0 {
            return Err(ConfigError::InvalidValue {
                key: "FALLBACK_GAS_LIMIT".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        Ok(Self {
            rpc_urls,
            chain_id,
            private_key,
            rpc_timeout: Duration::from_millis(env_or(
                env,
                "RPC_TIMEOUT_MS",
                file.rpc_timeout_ms,
            )?),
            settlement_timeout: Duration::from_secs(env_or(
                env,
                "SETTLEMENT_TIMEOUT_SECS",
                file.settlement_timeout_secs,
            )?),
            receipt_poll_interval: Duration::from_millis(env_or(
                env,
                "RECEIPT_POLL_INTERVAL_MS",
                file.receipt_poll_interval_ms,
            )?),
            approval_settle_delay: Duration::from_millis(env_or(
                env,
                "APPROVAL_SETTLE_DELAY_MS",
                file.approval_settle_delay_ms,
            )?),
            fallback_gas_price_gwei: env_or(
                env,
                "FALLBACK_GAS_PRICE_GWEI",
                file.fallback_gas_price_gwei,
            )?,
            fallback_gas_limit,
            priority_fee_gwei: env_or(env, "PRIORITY_FEE_GWEI", file.priority_fee_gwei)?,
        })
    }

    /// Client tunables for a known chain id.
    pub fn client_config(&self, chain_id: u64) -> ChainClientConfig {
        ChainClientConfig {
            chain_id,
            settlement_timeout: self.settlement_timeout,
            receipt_poll_interval: self.receipt_poll_interval,
            fallback_gas_price: units::gwei(self.fallback_gas_price_gwei),
            fallback_gas_limit: self.fallback_gas_limit,
            priority_fee: units::gwei(self.priority_fee_gwei),
        }
    }
}

fn validate_endpoint(raw: &str) -> Result<(), ConfigError> {
    let url = Url::parse(raw).map_err(|e| ConfigError::InvalidValue {
        key: "CHAIN_RPC_URLS".to_string(),
        message: format!("'{raw}' is not a valid URL: {e}"),
    })?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ConfigError::InvalidValue {
            key: "CHAIN_RPC_URLS".to_string(),
            message: format!("'{raw}' uses unsupported scheme '{other}', expected http or https"),
        }),
    }
}
