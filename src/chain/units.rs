//! Ether/gwei/wei conversions.

use std::fmt;
use std::str::FromStr;

use alloy_primitives::U256;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub const ETHER_DECIMALS: u32 = 18;
pub const GWEI_DECIMALS: u32 = 9;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AmountError {
    #[error("'{0}' is not a number")]
    NotANumber(String),

    #[error("amount must be greater than zero")]
    NotPositive,

    #[error("'{0}' has more than 18 decimal places")]
    TooPrecise(String),
}

/// A user-supplied ether amount, kept both as typed and in wei.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EtherAmount {
    pub ether: Decimal,
    pub wei: U256,
}

impl EtherAmount {
    pub fn parse(raw: &str) -> Result<Self, AmountError> {
        let ether = Decimal::from_str(raw.trim())
            .map_err(|_| AmountError::NotANumber(raw.trim().to_string()))?
            .normalize();
        if ether <= Decimal::ZERO {
            return Err(AmountError::NotPositive);
        }
        if ether.scale() > ETHER_DECIMALS {
            return Err(AmountError::TooPrecise(raw.trim().to_string()));
        }
        let mantissa = u128::try_from(ether.mantissa()).map_err(|_| AmountError::NotPositive)?;
        let wei = U256::from(mantissa) * pow10(ETHER_DECIMALS - ether.scale());
        Ok(Self { ether, wei })
    }

    pub fn from_wei(wei: U256) -> Self {
        let ether = Decimal::from_str(&format_ether(wei)).unwrap_or(Decimal::MAX);
        Self { ether, wei }
    }
}

impl fmt::Display for EtherAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ETH", self.ether)
    }
}

/// Parse a decimal ether string into wei.
pub fn parse_ether(raw: &str) -> Result<U256, AmountError> {
    EtherAmount::parse(raw).map(|amount| amount.wei)
}

/// Render wei as a trimmed decimal ether string (`1.5`, `0.000000001`, `3`).
pub fn format_ether(wei: U256) -> String {
    format_units(wei, ETHER_DECIMALS)
}

pub fn gwei(amount: u64) -> U256 {
    U256::from(amount) * pow10(GWEI_DECIMALS)
}

pub fn format_gwei(wei: U256) -> String {
    format_units(wei, GWEI_DECIMALS)
}

fn format_units(value: U256, decimals: u32) -> String {
    let base = pow10(decimals);
    let whole = value / base;
    let fraction = value % base;
    if fraction.is_zero() {
        return whole.to_string();
    }
    let digits = format!("{:0>width$}", fraction.to_string(), width = decimals as usize);
    format!("{whole}.{}", digits.trim_end_matches('0'))
}

fn pow10(exp: u32) -> U256 {
    U256::from(10u64).pow(U256::from(exp))
}
