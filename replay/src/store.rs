//! Ledger store seam
//!
//! Read-only view of the exchange's relational ledger. Amount columns are
//! carried as decimal text so no precision is lost before fixed-point
//! parsing.

use crate::{Error, Result};
use async_trait::async_trait;
use ledger_core::{AccountKey, Address};
use std::fmt;
use std::str::FromStr;

/// Inclusive range of operator nonces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NonceRange {
    /// First nonce
    pub from: u64,
    /// Last nonce
    pub to: u64,
}

impl NonceRange {
    /// Range from the operator's next nonce before and after the window;
    /// `None` when the window contains no operator transaction.
    pub fn between(next_before: u64, next_after: u64) -> Option<Self> {
        if next_after == 0 || next_before > next_after - 1 {
            return None;
        }
        Some(Self {
            from: next_before,
            to: next_after - 1,
        })
    }
}

impl fmt::Display for NonceRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.from, self.to)
    }
}

/// Taker side of a trade
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeSide {
    /// Taker bought the base currency
    Buy,
    /// Taker sold the base currency
    Sell,
}

impl FromStr for TradeSide {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Buy" => Ok(TradeSide::Buy),
            "Sell" => Ok(TradeSide::Sell),
            other => Err(Error::Decode(format!("unknown trade side '{}'", other))),
        }
    }
}

/// Settled trade
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeRecord {
    /// Trading pair id
    pub product_id: u64,
    /// Order that crossed the book
    pub taker_order_id: u64,
    /// Resting order
    pub maker_order_id: u64,
    /// Quote units per base unit
    pub price: String,
    /// Base amount traded
    pub amount: String,
    /// Taker side, `Buy` or `Sell`
    pub side: String,
    /// Fee paid by the taker, in the currency it received
    pub taker_fee: String,
    /// Fee paid by the maker, in the currency it received
    pub maker_fee: String,
}

/// Trading pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProductRecord {
    /// Currency bought and sold
    pub base_currency_id: u64,
    /// Currency the price is quoted in
    pub quote_currency_id: u64,
}

/// Order owner and fee recipient
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderRecord {
    /// Order owner
    pub user_id: u64,
    /// Address credited with the order's fee
    pub fee_address: String,
}

/// Settled withdrawal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WithdrawalRecord {
    /// Withdrawing user
    pub user_address: String,
    /// Currency name
    pub currency: String,
    /// Amount debited
    pub amount: String,
}

/// Credited deposit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositRecord {
    /// Depositing user
    pub user_address: String,
    /// Currency name
    pub currency: String,
    /// Amount credited
    pub amount: String,
    /// Hash of the crediting transaction
    pub tx_hash: String,
}

/// Settled internal transfer to one or more recipients
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRecord {
    /// Sending user
    pub user_address: String,
    /// Currency name
    pub currency: String,
    /// JSON-like object text, e.g. `{"0xabc…":1.5,"0xdef…":"2"}`
    pub recipients: String,
}

/// Current balance of one user account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceRecord {
    /// Currency name
    pub currency: String,
    /// Available plus held amount
    pub balance: String,
}

/// Relational ledger queries
///
/// Lookups return `Ok(None)` when the row does not exist. Paged queries are
/// ordered by primary key and only return settled records created after the
/// ledger start time.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// User id registered for an address
    async fn user_id(&self, address: &Address) -> Result<Option<u64>>;

    /// Account id of a user for a currency
    async fn account_id(&self, user_id: u64, currency: &str) -> Result<Option<AccountKey>>;

    /// Currency name by id
    async fn currency_name(&self, currency_id: u64) -> Result<Option<String>>;

    /// Trading pair by id
    async fn product(&self, product_id: u64) -> Result<Option<ProductRecord>>;

    /// Order by id
    async fn order(&self, order_id: u64) -> Result<Option<OrderRecord>>;

    /// Settled trades with operator nonce in `range`
    async fn trades(&self, range: NonceRange, offset: u64, limit: u64) -> Result<Vec<TradeRecord>>;

    /// Settled withdrawals with operator nonce in `range`
    async fn withdrawals(&self, range: NonceRange, offset: u64, limit: u64) -> Result<Vec<WithdrawalRecord>>;

    /// Settled transfers with operator nonce in `range`
    async fn transfers(&self, range: NonceRange, offset: u64, limit: u64) -> Result<Vec<TransferRecord>>;

    /// Number of deposits since the ledger start time
    async fn deposit_count(&self) -> Result<u64>;

    /// Deposits since the ledger start time, by row offset
    async fn deposits(&self, offset: u64, limit: u64) -> Result<Vec<DepositRecord>>;

    /// Current balances of every account owned by `address`; empty for an
    /// unknown user
    async fn balances(&self, address: &Address) -> Result<Vec<BalanceRecord>>;
}
