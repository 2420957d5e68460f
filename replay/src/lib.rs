//! Off-chain Replay
//!
//! Rebuilds per-account balance deltas for an epoch window from the
//! exchange's settled off-chain records: trades, withdrawals, transfers and
//! deposits. The result is keyed by the ledger's internal account id so it
//! can be compared with the on-chain view of the same window.
//!
//! Records are located by the operator's nonce range (trades, withdrawals,
//! transfers) or by the execution epoch of their transaction (deposits).

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, missing_debug_implementations)]

pub mod adapter;
pub mod config;
pub mod deposits;
pub mod error;
pub mod mock;
pub mod mysql;
pub mod resolver;
pub mod store;

// Re-exports
pub use adapter::{Leg, ReplayAdapter};
pub use config::StoreConfig;
pub use error::{Error, Result};
pub use mysql::MySqlLedgerStore;
pub use resolver::AccountResolver;
pub use store::{BalanceRecord, LedgerStore, NonceRange, TradeSide};
