//! Ledger Core
//!
//! Exact-arithmetic balance bookkeeping shared by the on-chain and off-chain
//! sides of the reconciliation engine.
//!
//! # Architecture
//!
//! - **Ledger**: address-keyed balances with a zero default and additive merge
//! - **Deltas**: per-window increase/decrease sets and per-account signed maps
//! - **Fixed point**: 18-digit scaled integers for off-chain decimal amounts
//! - **Batching**: bounded fan-out for chain and database reads
//!
//! # Invariants
//!
//! - Conservation: a token's total supply equals the sum of its ledger
//! - No floating point: every amount is a `BigInt`
//! - Addresses are lower-cased at construction, so lookups are case-insensitive

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod amount;
pub mod config;
pub mod delta;
pub mod error;
pub mod executor;
pub mod ledger;
pub mod types;

// Re-exports
pub use amount::FixedAmount;
pub use config::Config;
pub use delta::{DeltaMap, EventDelta};
pub use error::{Error, Result};
pub use executor::BatchExecutor;
pub use ledger::Ledger;
pub use types::{AccountKey, Address, Asset, Epoch};

pub use num_bigint::BigInt;
