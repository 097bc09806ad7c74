//! `chainpilot doctor` - active health diagnostics.
//!
//! Validates configuration and queries every configured endpoint so problems
//! surface before a confirmed transaction fails. Each check reports
//! pass/fail with actionable guidance on failures.

use std::sync::Arc;

use alloy_primitives::Address;
use secrecy::ExposeSecret;
use serde_json::json;

use crate::chain::endpoints::redact_endpoint;
use crate::chain::rpc::{self, parse_hex_u64};
use crate::chain::{Account, ContractRole, HttpTransport, RpcTransport};
use crate::config::Config;
use crate::error::ConfigError;

const CONTRACT_ROLES: [ContractRole; 4] = [
    ContractRole::Nft,
    ContractRole::Marketplace,
    ContractRole::Staking,
    ContractRole::Lending,
];

/// Run diagnostic checks and print results.
pub async fn run_doctor_command(
    config: Result<Config, ConfigError>,
    strict: bool,
) -> anyhow::Result<()> {
    println!("chainpilot doctor");
    println!("=================\n");

    let mut passed = 0u32;
    let mut failed = 0u32;

    let config = match config {
        Ok(config) => {
            check(
                "Configuration",
                CheckResult::Pass("resolved".to_string()),
                &mut passed,
                &mut failed,
            );
            config
        }
        Err(error) => {
            check("Configuration", CheckResult::Fail(error.to_string()), &mut passed, &mut failed);
            return summarize(passed, failed, strict);
        }
    };

    check("Signing account", check_account(&config), &mut passed, &mut failed);

    let transport: Arc<dyn RpcTransport> = match HttpTransport::new(config.chain.rpc_timeout) {
        Ok(transport) => Arc::new(transport),
        Err(error) => {
            check("HTTP client", CheckResult::Fail(error.to_string()), &mut passed, &mut failed);
            return summarize(passed, failed, strict);
        }
    };

    for endpoint in &config.chain.rpc_urls {
        check(
            &format!("Endpoint {}", redact_endpoint(endpoint)),
            check_endpoint(transport.as_ref(), endpoint, config.chain.chain_id).await,
            &mut passed,
            &mut failed,
        );
    }

    let Some(endpoint) = config.chain.rpc_urls.first() else {
        return summarize(passed, failed, strict);
    };
    for role in CONTRACT_ROLES {
        check(
            role.as_str(),
            check_contract(transport.as_ref(), endpoint, role, config.contracts.get(role)).await,
            &mut passed,
            &mut failed,
        );
    }

    summarize(passed, failed, strict)
}

fn summarize(passed: u32, failed: u32, strict: bool) -> anyhow::Result<()> {
    println!();
    println!("  {passed} passed, {failed} failed");

    if failed > 0 {
        println!("\n  Some checks failed. Operations that depend on them will be refused.");
        if strict {
            anyhow::bail!("doctor strict mode failed with {failed} check(s)");
        }
    }

    Ok(())
}

// ── Individual checks ───────────────────────────────────────

fn check(name: &str, result: CheckResult, passed: &mut u32, failed: &mut u32) {
    match result {
        CheckResult::Pass(detail) => {
            *passed += 1;
            println!("  [pass] {name}: {detail}");
        }
        CheckResult::Fail(detail) => {
            *failed += 1;
            println!("  [FAIL] {name}: {detail}");
        }
        CheckResult::Skip(reason) => {
            println!("  [skip] {name}: {reason}");
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum CheckResult {
    Pass(String),
    Fail(String),
    Skip(String),
}

fn check_account(config: &Config) -> CheckResult {
    match Account::from_private_key(config.chain.private_key.expose_secret()) {
        Ok(account) => CheckResult::Pass(account.address().to_string()),
        Err(e) => CheckResult::Fail(format!("WALLET_PRIVATE_KEY is unusable: {e}")),
    }
}

async fn check_endpoint(
    transport: &dyn RpcTransport,
    endpoint: &str,
    expected_chain_id: Option<u64>,
) -> CheckResult {
    let chain_id = match transport.request(endpoint, "eth_chainId", json!([])).await {
        Ok(value) => match parse_hex_u64(&value, "eth_chainId") {
            Ok(id) => id,
            Err(e) => return CheckResult::Fail(e.to_string()),
        },
        Err(e) => return CheckResult::Fail(format!("unreachable: {e}")),
    };

    if let Some(expected) = expected_chain_id
        && expected != chain_id
    {
        return CheckResult::Fail(format!(
            "reports chain {chain_id} but CHAIN_ID is {expected}"
        ));
    }

    match transport.request(endpoint, "eth_blockNumber", json!([])).await {
        Ok(value) => match parse_hex_u64(&value, "eth_blockNumber") {
            Ok(block) => CheckResult::Pass(format!("chain {chain_id}, block {block}")),
            Err(e) => CheckResult::Fail(e.to_string()),
        },
        Err(e) => CheckResult::Fail(format!("chain {chain_id}, but eth_blockNumber failed: {e}")),
    }
}

async fn check_contract(
    transport: &dyn RpcTransport,
    endpoint: &str,
    role: ContractRole,
    address: Option<Address>,
) -> CheckResult {
    let Some(address) = address else {
        return CheckResult::Skip(format!("{} not set", role.env_key()));
    };
    let code = transport
        .request(endpoint, "eth_getCode", json!([address, "latest"]))
        .await
        .and_then(|value| rpc::parse_hex_bytes(&value, "eth_getCode"));
    match code {
        Ok(code) if code.is_empty() => CheckResult::Fail(format!(
            "no contract deployed at {address}; check {}",
            role.env_key()
        )),
        Ok(code) => CheckResult::Pass(format!("{address} ({} bytes of code)", code.len())),
        Err(e) => CheckResult::Fail(format!("cannot read code at {address}: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedTransport;

    #[tokio::test]
    async fn endpoint_check_flags_chain_mismatch() {
        let transport = ScriptedTransport::healthy_chain(|call| match call.method.as_str() {
            "eth_chainId" => Some(Ok(json!("0x1"))),
            "eth_blockNumber" => Some(Ok(json!("0x10"))),
            _ => None,
        });

        assert_eq!(
            check_endpoint(&transport, "https://a.example", Some(1)).await,
            CheckResult::Pass("chain 1, block 16".to_string())
        );
        assert!(matches!(
            check_endpoint(&transport, "https://a.example", Some(5)).await,
            CheckResult::Fail(detail) if detail.contains("CHAIN_ID is 5")
        ));
    }

    #[tokio::test]
    async fn missing_contract_is_skipped_and_empty_code_fails() {
        let transport = ScriptedTransport::healthy_chain(|call| {
            (call.method == "eth_getCode").then(|| Ok(json!("0x")))
        });

        assert!(matches!(
            check_contract(&transport, "https://a.example", ContractRole::Staking, None).await,
            CheckResult::Skip(reason) if reason.contains("STAKING_CONTRACT_ADDRESS")
        ));
        assert!(matches!(
            check_contract(
                &transport,
                "https://a.example",
                ContractRole::Nft,
                Some(Address::repeat_byte(0xc0)),
            )
            .await,
            CheckResult::Fail(detail) if detail.contains("no contract deployed")
        ));
    }
}
