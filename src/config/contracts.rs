use std::str::FromStr;

use alloy_primitives::Address;

use crate::chain::contracts::{ContractBook, ContractRole};
use crate::config::helpers::{EnvLookup, optional_env};
use crate::error::ConfigError;
use crate::settings::Settings;

/// Contract addresses, each optional. Operations that need a missing one fail
/// at run time with a pointer to the env var.
pub(crate) fn resolve_contracts(
    settings: &Settings,
    env: &dyn EnvLookup,
) -> Result<ContractBook, ConfigError> {
    let file = &settings.contracts;
    let resolve = |role: ContractRole, from_file: &Option<String>| {
        optional_env(env, role.env_key())
            .or_else(|| from_file.clone())
            .map(|raw| parse_address(role.env_key(), &raw))
            .transpose()
    };
    Ok(ContractBook {
        nft: resolve(ContractRole::Nft, &file.nft)?,
        marketplace: resolve(ContractRole::Marketplace, &file.marketplace)?,
        staking: resolve(ContractRole::Staking, &file.staking)?,
        lending: resolve(ContractRole::Lending, &file.lending)?,
    })
}

fn parse_address(key: &str, raw: &str) -> Result<Address, ConfigError> {
    let trimmed = raw.trim();
    if !trimmed.starts_with("0x") || trimmed.len() != 42 {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("'{trimmed}' is not a 0x-prefixed 40-character hex address"),
        });
    }
    Address::from_str(trimmed).map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("'{trimmed}': {e}"),
    })
}
