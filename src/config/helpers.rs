use std::collections::HashMap;
use std::str::FromStr;

use crate::error::ConfigError;

/// Where configuration reads environment variables from.
pub trait EnvLookup {
    fn var(&self, key: &str) -> Option<String>;
}

/// The real process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvLookup for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl EnvLookup for HashMap<String, String> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

/// Non-empty, trimmed value of `key`.
pub(crate) fn optional_env(env: &dyn EnvLookup, key: &str) -> Option<String> {
    env.var(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub(crate) fn parse_optional_env<T>(
    env: &dyn EnvLookup,
    key: &str,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    optional_env(env, key)
        .map(|raw| {
            raw.parse::<T>().map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("'{raw}': {e}"),
            })
        })
        .transpose()
}

/// `key` from the environment, else `fallback`.
pub(crate) fn env_or<T>(env: &dyn EnvLookup, key: &str, fallback: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    Ok(parse_optional_env(env, key)?.unwrap_or(fallback))
}

/// Comma-separated list; blank entries are dropped.
pub(crate) fn list_env(env: &dyn EnvLookup, key: &str) -> Option<Vec<String>> {
    optional_env(env, key).map(|raw| {
        raw.split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(str::to_string)
            .collect()
    })
}
