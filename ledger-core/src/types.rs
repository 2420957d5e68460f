//! Core types for the ledger
//!
//! Addresses are normalised once, at the boundary where they enter the
//! system (configuration, log topics, contract return data, database rows),
//! so every map keyed by [`Address`] is case-insensitive by construction.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Monotonically increasing chain checkpoint
pub type Epoch = u64;

/// Internal account id of the off-chain ledger (one per user and currency)
pub type AccountKey = u64;

const ADDRESS_HEX_LEN: usize = 40;

/// Lower-cased `0x`-prefixed 20-byte account identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    /// The distinguished zero address
    pub const ZERO: &'static str = "0x0000000000000000000000000000000000000000";

    /// Parse and normalise an address.
    ///
    /// Only the shape is validated (`0x` + 40 hex digits); mixed-case
    /// checksums are accepted and folded without being verified.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        let hex_part = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .ok_or_else(|| Error::InvalidAddress(raw.to_string()))?;

        if hex_part.len() != ADDRESS_HEX_LEN || !hex_part.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(Error::InvalidAddress(raw.to_string()));
        }

        Ok(Self(format!("0x{}", hex_part.to_ascii_lowercase())))
    }

    /// Zero address
    pub fn zero() -> Self {
        Self(Self::ZERO.to_string())
    }

    /// Whether this is the zero address
    pub fn is_zero(&self) -> bool {
        self.0 == Self::ZERO
    }

    /// Address from a 32-byte ABI word (right-aligned, 12 bytes of padding)
    pub fn from_word(word: &[u8]) -> Result<Self> {
        if word.len() != 32 {
            return Err(Error::MalformedWord(format!(
                "expected 32 bytes, got {}",
                word.len()
            )));
        }
        Ok(Self(format!("0x{}", hex::encode(&word[12..]))))
    }

    /// Address from an indexed log topic (`0x` + 64 hex digits)
    pub fn from_topic(topic: &str) -> Result<Self> {
        let hex_part = topic
            .strip_prefix("0x")
            .filter(|h| h.len() == 64)
            .ok_or_else(|| Error::MalformedWord(format!("bad topic {}", topic)))?;
        Self::parse(&format!("0x{}", &hex_part[24..]))
    }

    /// 20 raw bytes
    pub fn to_bytes(&self) -> [u8; 20] {
        let mut out = [0u8; 20];
        // Shape was validated on construction, decoding cannot fail.
        let _ = hex::decode_to_slice(&self.0[2..], &mut out);
        out
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Address {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.0
    }
}

fn default_decimals() -> u32 {
    18
}

/// A custodied asset, loaded once from the asset registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    /// Currency name as used by the off-chain ledger
    pub name: String,

    /// Custody contract whose balances are audited
    pub custody_contract: Address,

    /// Underlying token contract backing the custody contract
    pub token_contract: Address,

    /// Bridged from another chain
    #[serde(default)]
    pub cross_chain: bool,

    /// Token decimals (base units per whole token = 10^decimals)
    #[serde(default = "default_decimals")]
    pub decimals: u32,
}
