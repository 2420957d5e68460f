//! Chain Source
//!
//! Epoch-pinned reads of custody contract state: total supply, point
//! balances, paginated account enumeration and event logs decoded into
//! per-account deltas. Also provides the confirmation gate that keeps every
//! read behind the reorg horizon.
//!
//! The node is reached through the [`ChainClient`] trait. [`JsonRpcClient`]
//! talks to a real node; [`mock::MockChain`] serves tests.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, missing_debug_implementations)]

pub mod abi;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod gate;
pub mod mock;
pub mod onchain;
pub mod rpc;

// Re-exports
pub use abi::ContractCall;
pub use client::{ChainClient, ChainHead, LogFilter, RawLog};
pub use config::{ChainConfig, RpcDialect};
pub use error::{Error, Result};
pub use events::{CustodyEvent, EventWindow, PrivilegedWithdrawal};
pub use gate::EpochGate;
pub use onchain::OnChainSource;
pub use rpc::JsonRpcClient;
