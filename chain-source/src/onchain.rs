//! On-chain source adapter
//!
//! Conservation facts about a custody contract, every read pinned to an
//! epoch.

use crate::abi::{self, ACCOUNT_PAGE_SIZE};
use crate::client::{ChainClient, LogFilter};
use crate::events::EventWindow;
use crate::{ContractCall, Error, Result};
use ledger_core::{Address, BatchExecutor, BigInt, Epoch, Ledger};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Typed contract reads over a [`ChainClient`]
#[derive(Clone)]
pub struct OnChainSource {
    client: Arc<dyn ChainClient>,
    executor: BatchExecutor,
}

impl fmt::Debug for OnChainSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OnChainSource")
            .field("executor", &self.executor)
            .finish()
    }
}

impl OnChainSource {
    /// Create an adapter fanning out through `executor`
    pub fn new(client: Arc<dyn ChainClient>, executor: BatchExecutor) -> Self {
        Self { client, executor }
    }

    /// Underlying client
    pub fn client(&self) -> &Arc<dyn ChainClient> {
        &self.client
    }

    /// Executor used for per-account fan-out
    pub fn executor(&self) -> BatchExecutor {
        self.executor
    }

    /// `totalSupply()` at `epoch`
    pub async fn total_supply(&self, contract: &Address, epoch: Epoch) -> Result<BigInt> {
        let data = self
            .client
            .call(contract, &ContractCall::TotalSupply, epoch)
            .await?;
        abi::decode_uint(&data)
    }

    /// `balanceOf(account)` at `epoch`
    pub async fn balance_of(&self, contract: &Address, account: &Address, epoch: Epoch) -> Result<BigInt> {
        let data = self
            .client
            .call(contract, &ContractCall::BalanceOf(account.clone()), epoch)
            .await?;
        abi::decode_uint(&data)
    }

    /// Declared number of enumerable holders at `epoch`
    pub async fn account_count(&self, contract: &Address, epoch: Epoch) -> Result<u64> {
        let data = self
            .client
            .call(contract, &ContractCall::AccountTotal, epoch)
            .await?;
        abi::decode_u64(&data)
    }

    /// One page of holders; collection stops at the first zero address
    pub async fn list_accounts(&self, contract: &Address, offset: u64, epoch: Epoch) -> Result<Vec<Address>> {
        let data = self
            .client
            .call(contract, &ContractCall::AccountList { offset }, epoch)
            .await?;
        let page = abi::decode_address_array(&data)?;
        if page.len() > ACCOUNT_PAGE_SIZE {
            return Err(Error::Decode(format!(
                "accountList returned {} entries",
                page.len()
            )));
        }
        Ok(page.into_iter().take_while(|a| !a.is_zero()).collect())
    }

    /// Every holder at `epoch`, deduplicated, paging until the declared
    /// count is exhausted
    pub async fn list_all(&self, contract: &Address, epoch: Epoch) -> Result<Vec<Address>> {
        let total = self.account_count(contract, epoch).await?;
        let mut seen = HashSet::new();
        let mut accounts = Vec::new();
        let mut offset = 0u64;

        while offset < total {
            let page = self.list_accounts(contract, offset, epoch).await?;
            if page.is_empty() {
                return Err(Error::Decode(format!(
                    "accountList on {} returned an empty page at offset {} of {}",
                    contract, offset, total
                )));
            }
            offset += page.len() as u64;
            for account in page {
                if seen.insert(account.clone()) {
                    accounts.push(account);
                }
            }
        }

        debug!(%contract, epoch, accounts = accounts.len(), "Enumerated holders");
        Ok(accounts)
    }

    /// `balanceOf` for every account, fanned out in bounded batches
    pub async fn balances_of(&self, contract: &Address, accounts: &[Address], epoch: Epoch) -> Result<Ledger> {
        let balances = self
            .executor
            .run(accounts.iter().cloned(), |account| async move {
                let balance = self.balance_of(contract, &account, epoch).await?;
                Ok::<_, Error>((account, balance))
            })
            .await?;
        Ok(balances.into_iter().collect())
    }

    /// Custody events of `contracts` in `[from, to]`, folded per contract
    pub async fn event_window(
        &self,
        from: Epoch,
        to: Epoch,
        contracts: &[Address],
        privileged: &HashSet<Address>,
    ) -> Result<EventWindow> {
        let logs = self
            .client
            .get_logs(&LogFilter::new(from, to, contracts.to_vec()))
            .await?;
        EventWindow::from_logs(&logs, privileged)
    }

    /// Non-zero holders touched by custody events of `contract` in `[from, to]`
    pub async fn touched_accounts(&self, from: Epoch, to: Epoch, contract: &Address) -> Result<BTreeSet<Address>> {
        let window = self
            .event_window(from, to, std::slice::from_ref(contract), &HashSet::new())
            .await?;
        Ok(window.touched_accounts())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockChain;

    fn addr(i: u64) -> Address {
        Address::parse(&format!("0x{:040x}", i)).unwrap()
    }

    fn source(chain: &Arc<MockChain>) -> OnChainSource {
        OnChainSource::new(chain.clone(), BatchExecutor::new(5))
    }

    #[tokio::test]
    async fn test_reads_are_epoch_pinned() {
        let chain = Arc::new(MockChain::new());
        let contract = addr(0xc0);
        chain.set_total_supply(&contract, 10, 500u64);
        chain.set_total_supply(&contract, 20, 700u64);
        chain.set_balance(&contract, &addr(1), 10, 500u64);

        let source = source(&chain);
        assert_eq!(source.total_supply(&contract, 15).await.unwrap(), BigInt::from(500));
        assert_eq!(source.total_supply(&contract, 20).await.unwrap(), BigInt::from(700));
        assert_eq!(source.balance_of(&contract, &addr(1), 9).await.unwrap(), BigInt::from(0));
    }

    #[tokio::test]
    async fn test_sentinel_forces_second_page() {
        let chain = Arc::new(MockChain::new());
        let contract = addr(0xc0);
        // Three holders, but the first page ends at a zero sentinel after two
        chain.set_account_total(&contract, 3);
        chain.set_page(&contract, 0, vec![addr(1), addr(2)]);
        chain.set_page(&contract, 2, vec![addr(3)]);

        let accounts = source(&chain).list_all(&contract, 1).await.unwrap();

        assert_eq!(accounts, vec![addr(1), addr(2), addr(3)]);
        assert!(accounts.iter().all(|a| !a.is_zero()));
        assert!(chain.count_calls(|c| matches!(c, ContractCall::AccountList { .. })) >= 2);
    }

    #[tokio::test]
    async fn test_paging_over_registered_holders() {
        let chain = Arc::new(MockChain::new());
        let contract = addr(0xc0);
        for i in 1..=230 {
            chain.register_account(&contract, &addr(i));
        }

        let accounts = source(&chain).list_all(&contract, 1).await.unwrap();

        assert_eq!(accounts.len(), 230);
        assert_eq!(chain.count_calls(|c| matches!(c, ContractCall::AccountList { .. })), 3);
    }

    #[tokio::test]
    async fn test_empty_page_before_count_fails() {
        let chain = Arc::new(MockChain::new());
        let contract = addr(0xc0);
        chain.set_account_total(&contract, 5);
        chain.set_page(&contract, 0, vec![addr(1)]);
        chain.set_page(&contract, 1, vec![]);

        let err = source(&chain).list_all(&contract, 1).await.unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }

    #[tokio::test]
    async fn test_balances_of_collects_ledger() {
        let chain = Arc::new(MockChain::new());
        let contract = addr(0xc0);
        for i in 1..=12u64 {
            chain.set_balance(&contract, &addr(i), 1, i * 10);
        }
        let accounts: Vec<_> = (1..=12).map(addr).collect();

        let ledger = source(&chain).balances_of(&contract, &accounts, 1).await.unwrap();

        assert_eq!(ledger.len(), 12);
        assert_eq!(ledger.sum(), BigInt::from(780));
    }

    #[tokio::test]
    async fn test_touched_accounts() {
        let chain = Arc::new(MockChain::new());
        let contract = addr(0xc0);
        chain.push_log(MockChain::transfer_log(&contract, &addr(1), &addr(2), 5u64, 7));
        chain.push_log(MockChain::transfer_log(&contract, &addr(3), &Address::zero(), 5u64, 8));
        chain.push_log(MockChain::transfer_log(&addr(0xc1), &addr(4), &addr(5), 5u64, 7));

        let touched = source(&chain).touched_accounts(7, 7, &contract).await.unwrap();

        assert_eq!(touched.into_iter().collect::<Vec<_>>(), vec![addr(1), addr(2)]);
    }
}
