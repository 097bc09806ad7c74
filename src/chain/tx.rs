//! EIP-1559 (type 2) transaction encoding and signing.

use alloy_primitives::{Address, B256, Bytes, U256, keccak256};
use alloy_rlp::{BufMut, Encodable, Header, length_of_length};

use crate::chain::account::{Account, RecoverableSignature};
use crate::error::ChainError;

const EIP1559_TX_TYPE: u8 = 0x02;

/// `rlp([])`: we never send an access list.
const EMPTY_ACCESS_LIST_RLP_LEN: usize = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Eip1559Transaction {
    pub chain_id: u64,
    pub nonce: u64,
    pub max_priority_fee_per_gas: U256,
    pub max_fee_per_gas: U256,
    pub gas_limit: u64,
    pub to: Address,
    pub value: U256,
    pub input: Bytes,
}

/// Wire-ready signed transaction plus the hash the network will know it by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub raw: Vec<u8>,
    pub hash: B256,
}

impl SignedTransaction {
    pub fn raw_hex(&self) -> String {
        format!("0x{}", hex::encode(&self.raw))
    }
}

impl Eip1559Transaction {
    /// Keccak of `0x02 || rlp(unsigned fields)`.
    pub fn signing_hash(&self) -> B256 {
        keccak256(typed(&alloy_rlp::encode(Unsigned(self))))
    }

    pub fn sign(&self, account: &Account) -> Result<SignedTransaction, ChainError> {
        let signature = account.sign_hash(&self.signing_hash())?;
        let raw = typed(&alloy_rlp::encode(Signed {
            tx: self,
            signature,
        }));
        let hash = keccak256(&raw);
        Ok(SignedTransaction { raw, hash })
    }

    fn fields_length(&self) -> usize {
        self.chain_id.length()
            + self.nonce.length()
            + self.max_priority_fee_per_gas.length()
            + self.max_fee_per_gas.length()
            + self.gas_limit.length()
            + self.to.length()
            + self.value.length()
            + self.input.length()
            + EMPTY_ACCESS_LIST_RLP_LEN
    }

    fn encode_fields(&self, out: &mut dyn BufMut) {
        self.chain_id.encode(out);
        self.nonce.encode(out);
        self.max_priority_fee_per_gas.encode(out);
        self.max_fee_per_gas.encode(out);
        self.gas_limit.encode(out);
        self.to.encode(out);
        self.value.encode(out);
        self.input.encode(out);
        Header {
            list: true,
            payload_length: 0,
        }
        .encode(out);
    }
}

struct Unsigned<'a>(&'a Eip1559Transaction);

impl Encodable for Unsigned<'_> {
    fn encode(&self, out: &mut dyn BufMut) {
        Header {
            list: true,
            payload_length: self.0.fields_length(),
        }
        .encode(out);
        self.0.encode_fields(out);
    }

    fn length(&self) -> usize {
        let payload_length = self.0.fields_length();
        payload_length + length_of_length(payload_length)
    }
}

struct Signed<'a> {
    tx: &'a Eip1559Transaction,
    signature: RecoverableSignature,
}

impl Signed<'_> {
    fn payload_length(&self) -> usize {
        self.tx.fields_length()
            + self.signature.y_parity.length()
            + self.signature.r.length()
            + self.signature.s.length()
    }
}

impl Encodable for Signed<'_> {
    fn encode(&self, out: &mut dyn BufMut) {
        Header {
            list: true,
            payload_length: self.payload_length(),
        }
        .encode(out);
        self.tx.encode_fields(out);
        self.signature.y_parity.encode(out);
        self.signature.r.encode(out);
        self.signature.s.encode(out);
    }

    fn length(&self) -> usize {
        let payload_length = self.payload_length();
        payload_length + length_of_length(payload_length)
    }
}

fn typed(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + payload.len());
    out.push(EIP1559_TX_TYPE);
    out.extend_from_slice(payload);
    out
}
