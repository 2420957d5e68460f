//! Chain client seam
//!
//! Everything the auditors need from a node. Retry policy for transport
//! failures belongs to the implementation; callers only retry at the
//! confirmation gate.

use crate::abi::ContractCall;
use crate::Result;
use async_trait::async_trait;
use ledger_core::{Address, Epoch};
use std::sync::Arc;

/// Source of the latest epoch
#[async_trait]
pub trait ChainHead: Send + Sync {
    /// Latest executed epoch
    async fn current_epoch(&self) -> Result<Epoch>;
}

/// Epoch-pinned contract reads and log queries
#[async_trait]
pub trait ChainClient: ChainHead {
    /// Execute a read-only contract call at `epoch`, returning raw return data
    async fn call(&self, contract: &Address, call: &ContractCall, epoch: Epoch) -> Result<Vec<u8>>;

    /// Logs matching `filter`, in chain order
    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>>;

    /// Next nonce of `account` as of `epoch`
    async fn next_nonce(&self, account: &Address, epoch: Epoch) -> Result<u64>;

    /// Epoch in which a transaction was executed
    async fn transaction_epoch(&self, tx_hash: &str) -> Result<Epoch>;
}

#[async_trait]
impl<T: ChainHead + ?Sized> ChainHead for Arc<T> {
    async fn current_epoch(&self) -> Result<Epoch> {
        (**self).current_epoch().await
    }
}

/// Log query over an inclusive epoch window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFilter {
    /// First epoch (inclusive)
    pub from_epoch: Epoch,
    /// Last epoch (inclusive)
    pub to_epoch: Epoch,
    /// Emitting contracts
    pub addresses: Vec<Address>,
    /// Accepted first topics, any when `None`
    pub topics: Option<Vec<String>>,
}

impl LogFilter {
    /// All logs of `addresses` in `[from_epoch, to_epoch]`
    pub fn new(from_epoch: Epoch, to_epoch: Epoch, addresses: Vec<Address>) -> Self {
        Self {
            from_epoch,
            to_epoch,
            addresses,
            topics: None,
        }
    }
}

/// Undecoded log entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLog {
    /// Emitting contract
    pub address: Address,
    /// Hex topics, event signature first
    pub topics: Vec<String>,
    /// Hex-encoded non-indexed data
    pub data: String,
    /// Epoch the log was emitted in, when reported
    pub epoch: Option<Epoch>,
    /// Transaction hash, when reported
    pub transaction_hash: Option<String>,
}
