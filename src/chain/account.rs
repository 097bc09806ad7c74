//! Signing identity derived once from a held private key.

use std::fmt;

use alloy_primitives::{Address, B256, U256};
use k256::ecdsa::SigningKey;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use sha3::{Digest, Keccak256};

use crate::error::ChainError;

/// Hex digits in a private key (32 bytes).
pub const PRIVATE_KEY_HEX_LEN: usize = 64;

/// Hex digits in an address (20 bytes).
pub const ADDRESS_HEX_LEN: usize = 40;

/// The single account this process signs with.
///
/// Built once at startup and shared read-only; there is no way to swap the
/// key afterwards.
pub struct Account {
    signing_key: SigningKey,
    address: Address,
}

/// secp256k1 signature split the way EIP-1559 transactions carry it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoverableSignature {
    pub y_parity: u8,
    pub r: U256,
    pub s: U256,
}

impl Account {
    /// Parse a `0x`-prefixed (or bare) 64-hex-digit private key.
    pub fn from_private_key(raw: &str) -> Result<Self, ChainError> {
        let bytes = decode_private_key(raw)?;
        let signing_key = SigningKey::from_slice(&bytes)
            .map_err(|e| ChainError::InvalidKey(format!("not a valid secp256k1 scalar: {e}")))?;
        let address = address_of(&signing_key);
        Ok(Self {
            signing_key,
            address,
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Sign a 32-byte prehash (already keccak-hashed payload).
    pub fn sign_hash(&self, hash: &B256) -> Result<RecoverableSignature, ChainError> {
        let (signature, recovery_id) = self
            .signing_key
            .sign_prehash_recoverable(hash.as_slice())
            .map_err(|e| ChainError::Signing(e.to_string()))?;
        let bytes = signature.to_bytes();
        Ok(RecoverableSignature {
            y_parity: u8::from(recovery_id.is_y_odd()),
            r: U256::from_be_slice(&bytes[..32]),
            s: U256::from_be_slice(&bytes[32..]),
        })
    }
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("address", &self.address)
            .field("signing_key", &"[REDACTED]")
            .finish()
    }
}

/// Derive the address controlled by a private key without keeping the key.
pub fn address_from_private_key(raw: &str) -> Result<Address, ChainError> {
    Account::from_private_key(raw).map(|account| account.address())
}

fn decode_private_key(raw: &str) -> Result<[u8; 32], ChainError> {
    let trimmed = raw.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    if digits.len() != PRIVATE_KEY_HEX_LEN {
        return Err(ChainError::InvalidKey(format!(
            "expected {PRIVATE_KEY_HEX_LEN} hex digits, got {}",
            digits.len()
        )));
    }
    let mut out = [0u8; 32];
    hex::decode_to_slice(digits, &mut out)
        .map_err(|e| ChainError::InvalidKey(format!("not valid hex: {e}")))?;
    Ok(out)
}

fn address_of(signing_key: &SigningKey) -> Address {
    let public = k256::PublicKey::from(signing_key.verifying_key());
    let uncompressed = public.to_encoded_point(false);
    // Skip the 0x04 SEC1 tag; the address is the last 20 bytes of the hash.
    let digest = Keccak256::digest(&uncompressed.as_bytes()[1..]);
    Address::from_slice(&digest[12..])
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use alloy_primitives::keccak256;

    use super::*;

    const HARDHAT_KEY_0: &str =
        "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    #[test]
    fn derives_well_known_address() {
        let account = Account::from_private_key(HARDHAT_KEY_0).unwrap();
        assert_eq!(
            account.address(),
            Address::from_str("0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266").unwrap()
        );
    }

    #[test]
    fn accepts_unprefixed_key() {
        let bare = HARDHAT_KEY_0.trim_start_matches("0x");
        assert_eq!(
            address_from_private_key(bare).unwrap(),
            address_from_private_key(HARDHAT_KEY_0).unwrap()
        );
    }

    #[test]
    fn rejects_address_shaped_input() {
        let err = Account::from_private_key("0x742d35Cc6634C0532925a3b844Bc454e4438f44e")
            .unwrap_err();
        assert!(matches!(err, ChainError::InvalidKey(_)));
    }

    #[test]
    fn rejects_zero_scalar() {
        let zero = format!("0x{}", "0".repeat(64));
        assert!(Account::from_private_key(&zero).is_err());
    }

    #[test]
    fn debug_output_redacts_key() {
        let account = Account::from_private_key(HARDHAT_KEY_0).unwrap();
        let rendered = format!("{account:?}");
        assert!(rendered.contains("REDACTED"));
        assert!(!rendered.contains("ac0974bec39a17e3"));
    }

    #[test]
    fn signature_recovers_to_account_address() {
        use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};

        let account = Account::from_private_key(HARDHAT_KEY_0).unwrap();
        let hash = keccak256(b"chainpilot");
        let sig = account.sign_hash(&hash).unwrap();

        let mut compact = [0u8; 64];
        compact[..32].copy_from_slice(&sig.r.to_be_bytes::<32>());
        compact[32..].copy_from_slice(&sig.s.to_be_bytes::<32>());
        let signature = Signature::from_slice(&compact).unwrap();
        let recovery_id = RecoveryId::from_byte(sig.y_parity).unwrap();
        let recovered =
            VerifyingKey::recover_from_prehash(hash.as_slice(), &signature, recovery_id).unwrap();

        let public = k256::PublicKey::from(&recovered);
        let point = public.to_encoded_point(false);
        let digest = Keccak256::digest(&point.as_bytes()[1..]);
        assert_eq!(Address::from_slice(&digest[12..]), account.address());
    }
}
