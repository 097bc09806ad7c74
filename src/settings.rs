//! File-backed settings.
//!
//! `~/.chainpilot/config.toml` holds everything except the signing key, which
//! only ever comes from the environment. Env vars override these values in
//! [`crate::config`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub chain: ChainSettings,

    #[serde(default)]
    pub contracts: ContractSettings,

    #[serde(default)]
    pub confirmation: ConfirmationSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainSettings {
    /// Node endpoints in priority order.
    #[serde(default)]
    pub rpc_urls: Vec<String>,

    /// Chain id used for signing. Asked from the node when unset.
    #[serde(default)]
    pub chain_id: Option<u64>,

    #[serde(default = "default_rpc_timeout_ms")]
    pub rpc_timeout_ms: u64,

    #[serde(default = "default_settlement_timeout_secs")]
    pub settlement_timeout_secs: u64,

    #[serde(default = "default_receipt_poll_interval_ms")]
    pub receipt_poll_interval_ms: u64,

    /// Pause after sending an approval before relying on it.
    #[serde(default = "default_approval_settle_delay_ms")]
    pub approval_settle_delay_ms: u64,

    #[serde(default = "default_fallback_gas_price_gwei")]
    pub fallback_gas_price_gwei: u64,

    #[serde(default = "default_fallback_gas_limit")]
    pub fallback_gas_limit: u64,

    #[serde(default = "default_priority_fee_gwei")]
    pub priority_fee_gwei: u64,
}

fn default_rpc_timeout_ms() -> u64 {
    10_000
}

fn default_settlement_timeout_secs() -> u64 {
    60
}

fn default_receipt_poll_interval_ms() -> u64 {
    2_000
}

fn default_approval_settle_delay_ms() -> u64 {
    5_000
}

fn default_fallback_gas_price_gwei() -> u64 {
    20
}

fn default_fallback_gas_limit() -> u64 {
    300_000
}

fn default_priority_fee_gwei() -> u64 {
    1
}

impl Default for ChainSettings {
    fn default() -> Self {
        Self {
            rpc_urls: Vec::new(),
            chain_id: None,
            rpc_timeout_ms: default_rpc_timeout_ms(),
            settlement_timeout_secs: default_settlement_timeout_secs(),
            receipt_poll_interval_ms: default_receipt_poll_interval_ms(),
            approval_settle_delay_ms: default_approval_settle_delay_ms(),
            fallback_gas_price_gwei: default_fallback_gas_price_gwei(),
            fallback_gas_limit: default_fallback_gas_limit(),
            priority_fee_gwei: default_priority_fee_gwei(),
        }
    }
}

/// Contract addresses as written in the file; validated in config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ContractSettings {
    #[serde(default)]
    pub nft: Option<String>,
    #[serde(default)]
    pub marketplace: Option<String>,
    #[serde(default)]
    pub staking: Option<String>,
    #[serde(default)]
    pub lending: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationSettings {
    /// Unanswered prompts older than this are discarded.
    #[serde(default = "default_pending_ttl_secs")]
    pub pending_ttl_secs: u64,

    /// Messages scanned when recovering a pending request from history.
    #[serde(default = "default_history_scan_limit")]
    pub history_scan_limit: usize,
}

fn default_pending_ttl_secs() -> u64 {
    300
}

fn default_history_scan_limit() -> usize {
    20
}

impl Default for ConfirmationSettings {
    fn default() -> Self {
        Self {
            pending_ttl_secs: default_pending_ttl_secs(),
            history_scan_limit: default_history_scan_limit(),
        }
    }
}

impl Settings {
    /// Default TOML config file path (~/.chainpilot/config.toml).
    pub fn default_toml_path() -> PathBuf {
        crate::bootstrap::chainpilot_dir().join("config.toml")
    }

    /// Load settings from a TOML file.
    ///
    /// Returns `None` if the file doesn't exist. Returns an error only
    /// if the file exists but can't be parsed.
    pub fn load_toml(path: &Path) -> Result<Option<Self>, String> {
        let data = match std::fs::read_to_string(path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(format!("failed to read {}: {}", path.display(), e)),
        };

        toml::from_str(&data)
            .map(Some)
            .map_err(|e| format!("invalid TOML in {}: {}", path.display(), e))
    }

    /// Write a commented TOML config file with current settings.
    pub fn save_toml(&self, path: &Path) -> Result<(), String> {
        let raw = toml::to_string_pretty(self)
            .map_err(|e| format!("failed to serialize settings: {}", e))?;

        let content = format!(
            "# chainpilot configuration file.\n\
             #\n\
             # Priority: env var > this file > defaults.\n\
             # The signing key is never read from here; set WALLET_PRIVATE_KEY.\n\
             \n\
             {raw}"
        );

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("failed to create {}: {}", parent.display(), e))?;
        }
        std::fs::write(path, content)
            .map_err(|e| format!("failed to write {}: {}", path.display(), e))
    }

    /// Overlay every value in `other` that differs from the default.
    pub fn merge_from(&mut self, other: &Self) {
        let default_json = match serde_json::to_value(Self::default()) {
            Ok(v) => v,
            Err(_) => return,
        };
        let other_json = match serde_json::to_value(other) {
            Ok(v) => v,
            Err(_) => return,
        };
        let mut self_json = match serde_json::to_value(&*self) {
            Ok(v) => v,
            Err(_) => return,
        };

        merge_non_default(&mut self_json, &other_json, &default_json);

        if let Ok(merged) = serde_json::from_value(self_json) {
            *self = merged;
        }
    }

    /// Get a setting value by dotted path (e.g., "chain.fallback_gas_limit").
    pub fn get(&self, path: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let mut current = &json;

        for part in path.split('.') {
            current = current.get(part)?;
        }

        match current {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Null => None,
            other => Some(other.to_string()),
        }
    }
}

fn merge_non_default(
    target: &mut serde_json::Value,
    other: &serde_json::Value,
    defaults: &serde_json::Value,
) {
    match (target, other, defaults) {
        (
            serde_json::Value::Object(t),
            serde_json::Value::Object(o),
            serde_json::Value::Object(d),
        ) => {
            for (key, other_val) in o {
                let default_val = d.get(key).cloned().unwrap_or(serde_json::Value::Null);
                if let Some(target_val) = t.get_mut(key) {
                    merge_non_default(target_val, other_val, &default_val);
                } else if other_val != &default_val {
                    t.insert(key.clone(), other_val.clone());
                }
            }
        }
        (target, other, defaults) => {
            if other != defaults {
                *target = other.clone();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::settings::*;

    #[test]
    fn missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = Settings::load_toml(&dir.path().join("config.toml")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            concat!(
                "[chain]\n",
                "rpc_urls = [\"https://a.example\", \"https://b.example\"]\n",
                "chain_id = 11155111\n\n",
                "[contracts]\n",
                "nft = \"0x00000000000000000000000000000000000000c0\"\n",
            ),
        )
        .unwrap();

        let loaded = Settings::load_toml(&path).unwrap().unwrap();
        assert_eq!(loaded.chain.rpc_urls.len(), 2);
        assert_eq!(loaded.chain.chain_id, Some(11155111));
        assert_eq!(loaded.chain.fallback_gas_limit, 300_000);
        assert_eq!(loaded.confirmation.pending_ttl_secs, 300);
        assert!(loaded.contracts.nft.is_some());
        assert!(loaded.contracts.lending.is_none());
    }

    #[test]
    fn invalid_toml_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[chain\nrpc_urls = 3").unwrap();
        assert!(Settings::load_toml(&path).is_err());
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut settings = Settings::default();
        settings.chain.rpc_urls = vec!["https://rpc.example".to_string()];
        settings.confirmation.history_scan_limit = 50;
        settings.save_toml(&path).unwrap();

        let loaded = Settings::load_toml(&path).unwrap().unwrap();
        assert_eq!(loaded, settings);
    }

    #[test]
    fn merge_only_overrides_non_defaults() {
        let mut base = Settings::default();
        base.chain.fallback_gas_limit = 500_000;

        let mut overlay = Settings::default();
        overlay.chain.priority_fee_gwei = 3;

        base.merge_from(&overlay);
        assert_eq!(base.chain.fallback_gas_limit, 500_000);
        assert_eq!(base.chain.priority_fee_gwei, 3);
    }

    #[test]
    fn get_by_dotted_path() {
        let settings = Settings::default();
        assert_eq!(
            settings.get("confirmation.pending_ttl_secs"),
            Some("300".to_string())
        );
        assert_eq!(settings.get("chain.chain_id"), None);
        assert_eq!(settings.get("nonexistent"), None);
    }

    #[test]
    fn default_toml_path_under_chainpilot() {
        let path = Settings::default_toml_path();
        assert!(path.to_string_lossy().contains(".chainpilot"));
        assert!(path.to_string_lossy().ends_with("config.toml"));
    }
}
