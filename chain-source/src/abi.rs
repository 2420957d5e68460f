//! Minimal ABI codec for the custody contract surface
//!
//! Only static types are involved (`uint256`, `address`, `address[100]`),
//! so every argument and return value is a sequence of 32-byte words.

use crate::{Error, Result};
use ledger_core::{Address, BigInt};
use num_bigint::{BigUint, Sign};

/// `totalSupply()`
pub const TOTAL_SUPPLY_SELECTOR: [u8; 4] = [0x18, 0x16, 0x0d, 0xdd];
/// `balanceOf(address)`
pub const BALANCE_OF_SELECTOR: [u8; 4] = [0x70, 0xa0, 0x82, 0x31];
/// `accountTotal()`
pub const ACCOUNT_TOTAL_SELECTOR: [u8; 4] = [0xf8, 0xc4, 0xbb, 0xf2];
/// `accountList(uint256)`
pub const ACCOUNT_LIST_SELECTOR: [u8; 4] = [0x4e, 0xa9, 0x8d, 0x16];

/// Entries returned by one `accountList` page
pub const ACCOUNT_PAGE_SIZE: usize = 100;

const WORD: usize = 32;

/// Read-only custody contract call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContractCall {
    /// Total supply of the custody token
    TotalSupply,
    /// Balance of one holder
    BalanceOf(Address),
    /// Number of holders ever enumerated
    AccountTotal,
    /// Page of holders starting at `offset`
    AccountList {
        /// Index of the first holder in the page
        offset: u64,
    },
}

impl ContractCall {
    /// Function selector
    pub fn selector(&self) -> [u8; 4] {
        match self {
            ContractCall::TotalSupply => TOTAL_SUPPLY_SELECTOR,
            ContractCall::BalanceOf(_) => BALANCE_OF_SELECTOR,
            ContractCall::AccountTotal => ACCOUNT_TOTAL_SELECTOR,
            ContractCall::AccountList { .. } => ACCOUNT_LIST_SELECTOR,
        }
    }

    /// Function name, for logs
    pub fn name(&self) -> &'static str {
        match self {
            ContractCall::TotalSupply => "totalSupply",
            ContractCall::BalanceOf(_) => "balanceOf",
            ContractCall::AccountTotal => "accountTotal",
            ContractCall::AccountList { .. } => "accountList",
        }
    }

    /// Calldata: selector followed by encoded arguments
    pub fn encode(&self) -> Vec<u8> {
        let mut data = self.selector().to_vec();
        match self {
            ContractCall::TotalSupply | ContractCall::AccountTotal => {}
            ContractCall::BalanceOf(account) => data.extend_from_slice(&encode_address(account)),
            ContractCall::AccountList { offset } => data.extend_from_slice(&encode_u64(*offset)),
        }
        data
    }
}

/// Left-padded address word
pub fn encode_address(address: &Address) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    word[12..].copy_from_slice(&address.to_bytes());
    word
}

/// Big-endian `uint256` word
pub fn encode_u64(value: u64) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    word[24..].copy_from_slice(&value.to_be_bytes());
    word
}

/// Big-endian `uint256` word; negative or oversized values are rejected
pub fn encode_uint(value: &BigInt) -> Result<[u8; WORD]> {
    let (sign, bytes) = value.to_bytes_be();
    if sign == Sign::Minus || bytes.len() > WORD {
        return Err(Error::Decode(format!("{} does not fit uint256", value)));
    }
    let mut word = [0u8; WORD];
    word[WORD - bytes.len()..].copy_from_slice(&bytes);
    Ok(word)
}

/// First word of `data` as an unsigned integer
pub fn decode_uint(data: &[u8]) -> Result<BigInt> {
    let word = data
        .get(..WORD)
        .ok_or_else(|| Error::Decode(format!("expected a uint256, got {} bytes", data.len())))?;
    Ok(BigInt::from(BigUint::from_bytes_be(word)))
}

/// First word of `data` as a `u64`
pub fn decode_u64(data: &[u8]) -> Result<u64> {
    let value = decode_uint(data)?;
    u64::try_from(&value).map_err(|_| Error::Decode(format!("{} overflows u64", value)))
}

/// Static address array, one word per entry
pub fn decode_address_array(data: &[u8]) -> Result<Vec<Address>> {
    if data.len() % WORD != 0 {
        return Err(Error::Decode(format!(
            "address array length {} is not a multiple of {}",
            data.len(),
            WORD
        )));
    }
    data.chunks(WORD)
        .map(|word| Address::from_word(word).map_err(Error::from))
        .collect()
}

/// Decode `0x`-prefixed hex
pub fn decode_hex(raw: &str) -> Result<Vec<u8>> {
    let stripped = raw.strip_prefix("0x").unwrap_or(raw);
    Ok(hex::decode(stripped)?)
}

/// `0x`-prefixed hex of raw bytes
pub fn to_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}
