//! In-memory chain for tests and dry runs
//!
//! State is versioned by epoch: a value set at epoch `e` is visible to every
//! read at `e` or later until overwritten.

use crate::abi::{self, ACCOUNT_PAGE_SIZE};
use crate::client::{ChainClient, ChainHead, LogFilter, RawLog};
use crate::events::TRANSFER_TOPIC;
use crate::{ContractCall, Error, Result};
use async_trait::async_trait;
use ledger_core::{Address, BigInt, Epoch};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// A contract call the mock served
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    /// Target contract
    pub contract: Address,
    /// Call
    pub call: ContractCall,
    /// Pinned epoch
    pub epoch: Epoch,
}

#[derive(Debug, Default)]
struct MockState {
    head: Epoch,
    head_failures: usize,
    head_queries: usize,
    call_failures: usize,
    supply: HashMap<Address, BTreeMap<Epoch, BigInt>>,
    balances: HashMap<(Address, Address), BTreeMap<Epoch, BigInt>>,
    holders: HashMap<Address, Vec<Address>>,
    account_totals: HashMap<Address, u64>,
    pages: HashMap<(Address, u64), Vec<Address>>,
    logs: Vec<RawLog>,
    nonces: HashMap<Address, BTreeMap<Epoch, u64>>,
    tx_epochs: HashMap<String, Epoch>,
    calls: Vec<RecordedCall>,
}

fn as_of<V: Clone>(history: Option<&BTreeMap<Epoch, V>>, epoch: Epoch) -> Option<V> {
    history.and_then(|h| h.range(..=epoch).next_back().map(|(_, v)| v.clone()))
}

/// Scriptable [`ChainClient`]
#[derive(Debug, Default)]
pub struct MockChain {
    state: Mutex<MockState>,
}

impl MockChain {
    /// Empty chain at epoch 0
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the head
    pub fn set_head(&self, epoch: Epoch) {
        self.state.lock().head = epoch;
    }

    /// Fail the next `n` head queries with a transport error
    pub fn fail_next_head_queries(&self, n: usize) {
        self.state.lock().head_failures = n;
    }

    /// Head queries served or failed so far
    pub fn head_queries(&self) -> usize {
        self.state.lock().head_queries
    }

    /// Fail the next `n` contract calls with a transport error
    pub fn fail_next_calls(&self, n: usize) {
        self.state.lock().call_failures = n;
    }

    /// Total supply of `contract` from `epoch` on
    pub fn set_total_supply(&self, contract: &Address, epoch: Epoch, amount: impl Into<BigInt>) {
        self.state
            .lock()
            .supply
            .entry(contract.clone())
            .or_default()
            .insert(epoch, amount.into());
    }

    /// Balance of `account` on `contract` from `epoch` on
    pub fn set_balance(&self, contract: &Address, account: &Address, epoch: Epoch, amount: impl Into<BigInt>) {
        self.state
            .lock()
            .balances
            .entry((contract.clone(), account.clone()))
            .or_default()
            .insert(epoch, amount.into());
    }

    /// Append a holder to the contract's enumeration
    pub fn register_account(&self, contract: &Address, account: &Address) {
        self.state
            .lock()
            .holders
            .entry(contract.clone())
            .or_default()
            .push(account.clone());
    }

    /// Override `accountTotal()`
    pub fn set_account_total(&self, contract: &Address, total: u64) {
        self.state.lock().account_totals.insert(contract.clone(), total);
    }

    /// Override the page returned at `offset` (zero-padded to a full page)
    pub fn set_page(&self, contract: &Address, offset: u64, accounts: Vec<Address>) {
        self.state.lock().pages.insert((contract.clone(), offset), accounts);
    }

    /// Append a log
    pub fn push_log(&self, log: RawLog) {
        self.state.lock().logs.push(log);
    }

    /// Next nonce of `account` from `epoch` on
    pub fn set_next_nonce(&self, account: &Address, epoch: Epoch, nonce: u64) {
        self.state
            .lock()
            .nonces
            .entry(account.clone())
            .or_default()
            .insert(epoch, nonce);
    }

    /// Execution epoch of a transaction
    pub fn set_transaction_epoch(&self, tx_hash: &str, epoch: Epoch) {
        self.state.lock().tx_epochs.insert(tx_hash.to_ascii_lowercase(), epoch);
    }

    /// Every contract call served so far
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.lock().calls.clone()
    }

    /// Number of calls matching `predicate`
    pub fn count_calls(&self, predicate: impl Fn(&ContractCall) -> bool) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| predicate(&c.call))
            .count()
    }

    /// Forget recorded calls
    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// `Transfer(sender, recipient, amount)` log emitted by `contract`
    pub fn transfer_log(
        contract: &Address,
        sender: &Address,
        recipient: &Address,
        amount: impl Into<BigInt>,
        epoch: Epoch,
    ) -> RawLog {
        let topic = |a: &Address| abi::to_hex(&abi::encode_address(a));
        let amount = amount.into();
        let data = abi::encode_uint(&amount).unwrap_or([0u8; 32]);
        RawLog {
            address: contract.clone(),
            topics: vec![TRANSFER_TOPIC.to_string(), topic(sender), topic(recipient)],
            data: abi::to_hex(&data),
            epoch: Some(epoch),
            transaction_hash: None,
        }
    }

    fn page(state: &MockState, contract: &Address, offset: u64) -> Vec<Address> {
        if let Some(page) = state.pages.get(&(contract.clone(), offset)) {
            return page.clone();
        }
        state
            .holders
            .get(contract)
            .map(|holders| {
                holders
                    .iter()
                    .skip(offset as usize)
                    .take(ACCOUNT_PAGE_SIZE)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl ChainHead for MockChain {
    async fn current_epoch(&self) -> Result<Epoch> {
        let mut state = self.state.lock();
        state.head_queries += 1;
        if state.head_failures > 0 {
            state.head_failures -= 1;
            return Err(Error::Transport("mock head unavailable".to_string()));
        }
        Ok(state.head)
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn call(&self, contract: &Address, call: &ContractCall, epoch: Epoch) -> Result<Vec<u8>> {
        let mut state = self.state.lock();
        if state.call_failures > 0 {
            state.call_failures -= 1;
            return Err(Error::Transport("mock call failed".to_string()));
        }
        state.calls.push(RecordedCall {
            contract: contract.clone(),
            call: call.clone(),
            epoch,
        });
        debug!(%contract, call = call.name(), epoch, "Mock call");

        let data = match call {
            ContractCall::TotalSupply => {
                let supply = as_of(state.supply.get(contract), epoch).unwrap_or_default();
                abi::encode_uint(&supply)?.to_vec()
            }
            ContractCall::BalanceOf(account) => {
                let key = (contract.clone(), account.clone());
                let balance = as_of(state.balances.get(&key), epoch).unwrap_or_default();
                abi::encode_uint(&balance)?.to_vec()
            }
            ContractCall::AccountTotal => {
                let total = state.account_totals.get(contract).copied().unwrap_or_else(|| {
                    state.holders.get(contract).map_or(0, |h| h.len() as u64)
                });
                abi::encode_u64(total).to_vec()
            }
            ContractCall::AccountList { offset } => {
                let mut page = Self::page(&state, contract, *offset);
                page.resize(ACCOUNT_PAGE_SIZE, Address::zero());
                page.iter().flat_map(abi::encode_address).collect()
            }
        };
        Ok(data)
    }

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>> {
        let state = self.state.lock();
        let mut logs: Vec<RawLog> = state
            .logs
            .iter()
            .filter(|log| {
                let epoch = log.epoch.unwrap_or_default();
                epoch >= filter.from_epoch
                    && epoch <= filter.to_epoch
                    && filter.addresses.contains(&log.address)
                    && filter.topics.as_ref().map_or(true, |topics| {
                        log.topics.first().map_or(false, |t| topics.contains(t))
                    })
            })
            .cloned()
            .collect();
        logs.sort_by_key(|log| log.epoch);
        Ok(logs)
    }

    async fn next_nonce(&self, account: &Address, epoch: Epoch) -> Result<u64> {
        let state = self.state.lock();
        Ok(as_of(state.nonces.get(account), epoch).unwrap_or_default())
    }

    async fn transaction_epoch(&self, tx_hash: &str) -> Result<Epoch> {
        self.state
            .lock()
            .tx_epochs
            .get(&tx_hash.to_ascii_lowercase())
            .copied()
            .ok_or_else(|| Error::Decode(format!("transaction {} not found", tx_hash)))
    }
}
