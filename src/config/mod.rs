//! Configuration for chainpilot.
//!
//! Settings are loaded with priority: env var > TOML file > default.
//! `./.env` and `~/.chainpilot/.env` are loaded via dotenvy early in
//! startup; neither overwrites variables already set.

mod chain;
mod contracts;
pub(crate) mod helpers;

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::agent::engine::ConfirmationConfig;
use crate::chain::contracts::ContractBook;
use crate::error::ConfigError;
use crate::settings::Settings;

pub use self::chain::ChainConfig;
pub use self::helpers::{EnvLookup, ProcessEnv};

/// Main configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub chain: ChainConfig,
    pub contracts: ContractBook,
    pub confirmation: ConfirmationConfig,
}

impl Config {
    /// Load from the process environment with an optional TOML file.
    ///
    /// An explicit `toml_path` must exist; the default
    /// `~/.chainpilot/config.toml` is optional.
    pub fn from_env(toml_path: Option<&Path>) -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        crate::bootstrap::load_chainpilot_env();
        let settings = load_settings(toml_path)?;
        Self::resolve(&settings, &ProcessEnv)
    }

    /// Build config from file settings, overridden by `env`.
    pub fn resolve(settings: &Settings, env: &dyn EnvLookup) -> Result<Self, ConfigError> {
        Ok(Self {
            chain: ChainConfig::resolve(settings, env)?,
            contracts: contracts::resolve_contracts(settings, env)?,
            confirmation: resolve_confirmation(settings, env)?,
        })
    }
}

fn resolve_confirmation(
    settings: &Settings,
    env: &dyn EnvLookup,
) -> Result<ConfirmationConfig, ConfigError> {
    let file = &settings.confirmation;
    let history_scan_limit =
        helpers::env_or(env, "HISTORY_SCAN_LIMIT", file.history_scan_limit)?;
    if history_scan_limit == 0 {
        return Err(ConfigError::InvalidValue {
            key: "HISTORY_SCAN_LIMIT".to_string(),
            message: "must be at least 1".to_string(),
        });
    }
    Ok(ConfirmationConfig {
        pending_ttl: Duration::from_secs(helpers::env_or(
            env,
            "PENDING_TTL_SECS",
            file.pending_ttl_secs,
        )?),
        history_scan_limit,
    })
}

fn load_settings(explicit_path: Option<&Path>) -> Result<Settings, ConfigError> {
    let path = explicit_path
        .map(PathBuf::from)
        .unwrap_or_else(Settings::default_toml_path);

    let mut settings = Settings::default();
    match Settings::load_toml(&path) {
        Ok(Some(from_file)) => {
            settings.merge_from(&from_file);
            tracing::debug!("Loaded TOML config from {}", path.display());
        }
        Ok(None) => {
            if explicit_path.is_some() {
                return Err(ConfigError::ParseError(format!(
                    "Config file not found: {}",
                    path.display()
                )));
            }
        }
        Err(e) => {
            if explicit_path.is_some() {
                return Err(ConfigError::ParseError(e));
            }
            tracing::warn!("Failed to load default config file: {}", e);
        }
    }
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;
    use crate::chain::units;
    use crate::testing::TEST_PRIVATE_KEY;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn minimal() -> HashMap<String, String> {
        env(&[
            ("CHAIN_RPC_URLS", "https://a.example, https://b.example"),
            ("WALLET_PRIVATE_KEY", TEST_PRIVATE_KEY),
        ])
    }

    #[test]
    fn defaults_apply_with_minimal_env() {
        let config = Config::resolve(&Settings::default(), &minimal()).unwrap();
        assert_eq!(
            config.chain.rpc_urls,
            ["https://a.example", "https://b.example"]
        );
        assert_eq!(config.chain.chain_id, None);
        assert_eq!(config.chain.private_key.expose_secret(), TEST_PRIVATE_KEY);
        assert_eq!(config.chain.settlement_timeout, Duration::from_secs(60));
        assert_eq!(config.chain.approval_settle_delay, Duration::from_secs(5));
        assert_eq!(config.confirmation.pending_ttl, Duration::from_secs(300));
        assert_eq!(config.confirmation.history_scan_limit, 20);
        assert_eq!(config.contracts, ContractBook::default());

        let client = config.chain.client_config(31337);
        assert_eq!(client.chain_id, 31337);
        assert_eq!(client.fallback_gas_price, units::gwei(20));
    }

    #[test]
    fn env_overrides_file() {
        let mut settings = Settings::default();
        settings.chain.rpc_urls = vec!["https://file.example".to_string()];
        settings.chain.chain_id = Some(1);
        settings.confirmation.pending_ttl_secs = 60;

        let mut vars = minimal();
        vars.insert("CHAIN_ID".to_string(), "11155111".to_string());
        vars.insert(
            "NFT_CONTRACT_ADDRESS".to_string(),
            "0x00000000000000000000000000000000000000c0".to_string(),
        );

        let config = Config::resolve(&settings, &vars).unwrap();
        assert_eq!(config.chain.rpc_urls.len(), 2);
        assert_eq!(config.chain.chain_id, Some(11155111));
        assert_eq!(config.confirmation.pending_ttl, Duration::from_secs(60));
        assert!(config.contracts.nft.is_some());
    }

    #[test]
    fn missing_endpoints_and_key_are_reported() {
        let err = Config::resolve(&Settings::default(), &env(&[])).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingRequired { ref key, .. } if key == "CHAIN_RPC_URLS"
        ));

        let err = Config::resolve(
            &Settings::default(),
            &env(&[("CHAIN_RPC_URLS", "https://a.example")]),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingRequired { ref key, .. } if key == "WALLET_PRIVATE_KEY"
        ));
    }

    #[test]
    fn invalid_values_name_their_key() {
        let cases = [
            ("CHAIN_RPC_URLS", "ws://a.example"),
            ("CHAIN_ID", "mainnet"),
            ("PENDING_TTL_SECS", "-1"),
            ("HISTORY_SCAN_LIMIT", "0"),
            ("STAKING_CONTRACT_ADDRESS", "0x1234"),
        ];
        for (key, value) in cases {
            let mut vars = minimal();
            vars.insert(key.to_string(), value.to_string());
            match Config::resolve(&Settings::default(), &vars) {
                Err(ConfigError::InvalidValue { key: reported, .. }) => assert_eq!(reported, key),
                other => panic!("{key}={value}: unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn explicit_missing_toml_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_settings(Some(&dir.path().join("absent.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }
}
