//! Trigger detection and parameter extraction from free text.
//!
//! Extraction either produces a fully validated [`OperationRequest`] or a
//! pre-classified [`OperationError`]; nothing half-parsed is ever stored.

use std::str::FromStr;
use std::sync::LazyLock;

use aho_corasick::AhoCorasick;
use alloy_primitives::{Address, U256};
use regex::Regex;

use crate::agent::pending::PendingKind;
use crate::chain::account::{self, ADDRESS_HEX_LEN, PRIVATE_KEY_HEX_LEN};
use crate::chain::units::EtherAmount;
use crate::error::OperationError;
use crate::ops::{AddressSource, OperationRequest};

/// A hex run found in text, classified by length alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HexToken {
    /// 40 hex digits.
    Address(Address),
    /// 64 hex digits, kept as written.
    PrivateKey(String),
    /// Anything else that looked like hex with a `0x` prefix or 40+ digits.
    Malformed(String),
}

const HEX_TOKEN: &str = r"\b0[xX]([0-9a-fA-F]+)\b|\b([0-9a-fA-F]{40,})\b";
const ETH_AMOUNT: &str = r"(?i)(-?\d+(?:\.\d+)?)\s*(?:eth|ether)\b";
const BARE_NUMBER: &str = r"(?:^|\s)(-?\d+(?:\.\d+)?)(?:\s|$|[,.!?])";
const TOKEN_ID: &str = r"(?i)(?:token\s*(?:id)?|nft|id|#)\s*#?\s*(\d+)";
const PRICE: &str = r"(?i)(?:\bfor|\bprice|\bat|@|价格|售价)\s*(-?\d+(?:\.\d+)?)";
const DURATION_DAYS: &str = r"(?i)(\d+)\s*(?:days?\b|d\b|天)";
const LOAN_ID: &str = r"(?i)(?:loan|贷款|借款)\s*(?:id)?\s*#?\s*(\d+)";
const TOKEN_URI: &str = r"(?:ipfs|ar|https?)://\S+";

/// Every hex run in `text`, in order of appearance.
pub fn scan_hex_tokens(text: &str) -> Vec<HexToken> {
    let Ok(regex) = Regex::new(HEX_TOKEN) else {
        return Vec::new();
    };
    regex
        .captures_iter(text)
        .filter_map(|captures| {
            let digits = captures.get(1).or_else(|| captures.get(2))?.as_str();
            let raw = captures.get(0)?.as_str().to_string();
            Some(match digits.len() {
                PRIVATE_KEY_HEX_LEN => HexToken::PrivateKey(raw),
                ADDRESS_HEX_LEN => match Address::from_str(digits) {
                    Ok(address) => HexToken::Address(address),
                    Err(_) => HexToken::Malformed(raw),
                },
                _ => HexToken::Malformed(raw),
            })
        })
        .collect()
}

const BALANCE_WORDS: &[&str] = &["balance", "余额", "how much eth"];
const TRANSFER_WORDS: &[&str] = &["send", "transfer", "pay", "转账", "发送", "打款", "汇款"];

/// Which NFT operation a message asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NftAction {
    Mint,
    List,
    Buy,
    Stake,
    Unstake,
    CreateLoan,
    RepayLoan,
}

/// Checked in order; the first action with a matching word wins.
const NFT_ACTIONS: &[(NftAction, &[&str])] = &[
    (NftAction::Unstake, &["unstake", "解押", "解除质押"]),
    (NftAction::RepayLoan, &["repay", "还款"]),
    (NftAction::CreateLoan, &["loan", "borrow", "借款", "贷款"]),
    (NftAction::Stake, &["stake", "质押"]),
    (NftAction::Mint, &["mint", "铸造"]),
    (NftAction::Buy, &["buy", "purchase", "购买"]),
    (NftAction::List, &["list", "sell", "上架", "出售", "挂单"]),
];

struct Vocabulary {
    matcher: AhoCorasick,
    /// Owner of each pattern, by pattern index.
    kinds: Vec<PendingKind>,
    /// Pattern text, by pattern index.
    words: Vec<&'static str>,
}

static VOCABULARY: LazyLock<Option<Vocabulary>> = LazyLock::new(|| {
    let mut kinds = Vec::new();
    let mut words = Vec::new();
    let nft_words = NFT_ACTIONS
        .iter()
        .flat_map(|(_, words)| words.iter().copied())
        .chain(["nft"]);
    for (kind, group) in [
        (PendingKind::Balance, BALANCE_WORDS.iter().copied().collect::<Vec<_>>()),
        (PendingKind::Transfer, TRANSFER_WORDS.to_vec()),
        (PendingKind::Nft, nft_words.collect()),
    ] {
        for word in group {
            kinds.push(kind);
            words.push(word);
        }
    }
    let matcher = AhoCorasick::builder()
        .ascii_case_insensitive(true)
        .build(&words)
        .ok()?;
    Some(Vocabulary {
        matcher,
        kinds,
        words,
    })
});

/// The kind of operation `text` asks for, if any. NFT wins over transfer,
/// which wins over balance ("send nft #3" is an NFT request).
pub fn detect_trigger(text: &str) -> Option<PendingKind> {
    let vocabulary = VOCABULARY.as_ref()?;
    let mut found: Option<PendingKind> = None;
    for hit in vocabulary.matcher.find_overlapping_iter(text) {
        let word = vocabulary.words[hit.pattern().as_usize()];
        if !at_word_boundary(text, hit.start(), hit.end(), word) {
            continue;
        }
        let kind = vocabulary.kinds[hit.pattern().as_usize()];
        found = match found {
            Some(current) if rank(current) >= rank(kind) => Some(current),
            _ => Some(kind),
        };
    }
    found
}

fn rank(kind: PendingKind) -> u8 {
    match kind {
        PendingKind::Nft => 2,
        PendingKind::Transfer => 1,
        PendingKind::Balance => 0,
    }
}

/// ASCII words must stand alone; CJK words match anywhere.
fn at_word_boundary(text: &str, start: usize, end: usize, word: &str) -> bool {
    if !word.is_ascii() {
        return true;
    }
    let before = text[..start].chars().next_back();
    let after = text[end..].chars().next();
    let is_word = |c: char| c.is_ascii_alphanumeric() || c == '_';
    !before.is_some_and(is_word) && !after.is_some_and(is_word)
}

fn contains_word(text: &str, word: &str) -> bool {
    let lowered = text.to_lowercase();
    lowered
        .match_indices(word)
        .any(|(start, matched)| at_word_boundary(&lowered, start, start + matched.len(), word))
}

/// The NFT action `text` names, by keyword priority.
pub fn detect_nft_action(text: &str) -> Option<NftAction> {
    NFT_ACTIONS
        .iter()
        .find(|(_, words)| words.iter().any(|word| contains_word(text, word)))
        .map(|(action, _)| *action)
}

/// Turns trigger text into a validated request.
#[derive(Debug, Clone, Default)]
pub struct ParameterExtractor {
    /// The process's own account, used when a balance or mint names no address.
    default_address: Option<Address>,
}

impl ParameterExtractor {
    pub fn new(default_address: Option<Address>) -> Self {
        Self { default_address }
    }

    pub fn detect_trigger(&self, text: &str) -> Option<PendingKind> {
        detect_trigger(text)
    }

    pub fn extract(
        &self,
        kind: PendingKind,
        text: &str,
    ) -> Result<OperationRequest, OperationError> {
        match kind {
            PendingKind::Balance => self.extract_balance(text),
            PendingKind::Transfer => extract_transfer(text),
            PendingKind::Nft => self.extract_nft(text),
        }
    }

    /// A pasted key beats an explicit address, which beats the own account.
    fn extract_balance(&self, text: &str) -> Result<OperationRequest, OperationError> {
        let tokens = scan_hex_tokens(text);
        if let Some(key) = tokens.iter().find_map(|token| match token {
            HexToken::PrivateKey(raw) => Some(raw),
            _ => None,
        }) {
            let address = account::address_from_private_key(key).map_err(|_| {
                OperationError::InvalidAddress(
                    "the 64-character value is not a usable private key".to_string(),
                )
            })?;
            return Ok(OperationRequest::Balance {
                address,
                source: AddressSource::PrivateKey,
            });
        }
        if let Some(address) = first_address(&tokens) {
            return Ok(OperationRequest::Balance {
                address,
                source: AddressSource::Explicit,
            });
        }
        reject_malformed(&tokens)?;
        let address = self.default_address.ok_or_else(|| {
            OperationError::MissingParameter("an address or private key to check".to_string())
        })?;
        Ok(OperationRequest::Balance {
            address,
            source: AddressSource::Own,
        })
    }

    fn extract_nft(&self, text: &str) -> Result<OperationRequest, OperationError> {
        let action = detect_nft_action(text).ok_or_else(|| {
            OperationError::MissingParameter(
                "NFT action (mint, list, buy, stake, unstake, loan or repay)".to_string(),
            )
        })?;
        match action {
            NftAction::Mint => {
                let tokens = scan_hex_tokens(text);
                let to = match first_address(&tokens) {
                    Some(address) => usable_recipient(address)?,
                    None => {
                        reject_malformed(&tokens)?;
                        self.default_address.ok_or_else(|| {
                            OperationError::MissingParameter("recipient address".to_string())
                        })?
                    }
                };
                let token_uri = Regex::new(TOKEN_URI)
                    .ok()
                    .and_then(|regex| regex.find(text).map(|m| m.as_str().to_string()))
                    .unwrap_or_default();
                Ok(OperationRequest::Mint { to, token_uri })
            }
            NftAction::List => {
                let token_id = token_id(text)?;
                let price = capture(PRICE, text)
                    .or_else(|| capture(ETH_AMOUNT, &without_token_id(text)))
                    .ok_or_else(|| OperationError::MissingParameter("listing price".to_string()))?;
                Ok(OperationRequest::List {
                    token_id,
                    price: amount(&price)?,
                })
            }
            NftAction::Buy => Ok(OperationRequest::Buy {
                token_id: token_id(text)?,
            }),
            NftAction::Stake => Ok(OperationRequest::Stake {
                token_id: token_id(text)?,
            }),
            NftAction::Unstake => Ok(OperationRequest::Unstake {
                token_id: token_id(text)?,
            }),
            NftAction::CreateLoan => {
                let token_id = token_id(text)?;
                let raw_amount = capture(ETH_AMOUNT, text)
                    .ok_or_else(|| OperationError::MissingParameter("loan amount".to_string()))?;
                let duration = capture(DURATION_DAYS, text).ok_or_else(|| {
                    OperationError::MissingParameter("loan duration in days".to_string())
                })?;
                let duration_days = duration.parse::<u64>().map_err(|_| {
                    OperationError::InvalidAmount(format!("'{duration}' is not a number of days"))
                })?;
                if duration_days == 0 {
                    return Err(OperationError::InvalidAmount(
                        "loan duration must be at least one day".to_string(),
                    ));
                }
                Ok(OperationRequest::CreateLoan {
                    token_id,
                    amount: amount(&raw_amount)?,
                    duration_days,
                })
            }
            NftAction::RepayLoan => {
                let raw = capture(LOAN_ID, text)
                    .or_else(|| capture(TOKEN_ID, text))
                    .ok_or_else(|| OperationError::MissingParameter("loan id".to_string()))?;
                Ok(OperationRequest::RepayLoan {
                    loan_id: integer(&raw, "loan id")?,
                })
            }
        }
    }
}

fn extract_transfer(text: &str) -> Result<OperationRequest, OperationError> {
    let tokens = scan_hex_tokens(text);
    let to = match first_address(&tokens) {
        Some(address) => usable_recipient(address)?,
        None => {
            reject_malformed(&tokens)?;
            return Err(OperationError::MissingParameter(
                "recipient address".to_string(),
            ));
        }
    };
    let raw = transfer_amount(text)
        .ok_or_else(|| OperationError::MissingParameter("amount to send".to_string()))?;
    Ok(OperationRequest::Transfer {
        to,
        amount: amount(&raw)?,
    })
}

/// `0.1 ETH`, else the first standalone number outside any hex token.
fn transfer_amount(text: &str) -> Option<String> {
    capture(ETH_AMOUNT, text).or_else(|| {
        let hex = Regex::new(HEX_TOKEN).ok()?;
        capture(BARE_NUMBER, &hex.replace_all(text, " "))
    })
}

fn first_address(tokens: &[HexToken]) -> Option<Address> {
    tokens.iter().find_map(|token| match token {
        HexToken::Address(address) => Some(*address),
        _ => None,
    })
}

/// Anything sent to the zero address is burned.
fn usable_recipient(address: Address) -> Result<Address, OperationError> {
    if address == Address::ZERO {
        return Err(OperationError::InvalidAddress(
            "refusing to send to the zero address".to_string(),
        ));
    }
    Ok(address)
}

fn reject_malformed(tokens: &[HexToken]) -> Result<(), OperationError> {
    match tokens.iter().find_map(|token| match token {
        HexToken::Malformed(raw) => Some(raw),
        _ => None,
    }) {
        Some(raw) => Err(OperationError::InvalidAddress(format!(
            "'{raw}' is not a {ADDRESS_HEX_LEN}-character hex address"
        ))),
        None => Ok(()),
    }
}

fn capture(pattern: &str, text: &str) -> Option<String> {
    let regex = Regex::new(pattern).ok()?;
    let captures = regex.captures(text)?;
    Some(captures.get(1)?.as_str().to_string())
}

fn token_id(text: &str) -> Result<U256, OperationError> {
    let raw = capture(TOKEN_ID, text)
        .ok_or_else(|| OperationError::MissingParameter("token id".to_string()))?;
    integer(&raw, "token id")
}

/// `text` with the token id reference blanked, so "nft #5 1 eth" prices at 1.
fn without_token_id(text: &str) -> String {
    match Regex::new(TOKEN_ID) {
        Ok(regex) => regex.replace(text, " ").into_owned(),
        Err(_) => text.to_string(),
    }
}

fn integer(raw: &str, what: &str) -> Result<U256, OperationError> {
    U256::from_str_radix(raw, 10)
        .map_err(|_| OperationError::InvalidAmount(format!("'{raw}' is not a valid {what}")))
}

fn amount(raw: &str) -> Result<EtherAmount, OperationError> {
    EtherAmount::parse(raw).map_err(|e| OperationError::InvalidAmount(e.to_string()))
}
