//! Deposit lookup by epoch
//!
//! Deposit rows carry no epoch of their own, only the hash of the chain
//! transaction that credited them. Rows are located by binary search over
//! row offsets, reading each visited row's execution epoch. That requires the
//! rows to be in non-decreasing epoch order, which is checked rather than
//! assumed: the rows around each search result and every row returned are
//! verified, and a violation fails the window.

use crate::store::{DepositRecord, LedgerStore};
use crate::{Error, Result};
use chain_source::ChainClient;
use ledger_core::{BatchExecutor, Epoch};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Finds the deposits credited in an epoch window
#[derive(Clone)]
pub struct DepositLocator {
    store: Arc<dyn LedgerStore>,
    chain: Arc<dyn ChainClient>,
    executor: BatchExecutor,
    page_size: u64,
}

impl fmt::Debug for DepositLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DepositLocator")
            .field("page_size", &self.page_size)
            .finish()
    }
}

impl DepositLocator {
    /// Create a locator
    pub fn new(
        store: Arc<dyn LedgerStore>,
        chain: Arc<dyn ChainClient>,
        executor: BatchExecutor,
        page_size: u64,
    ) -> Self {
        Self {
            store,
            chain,
            executor,
            page_size: page_size.max(1),
        }
    }

    async fn row_epoch(&self, offset: u64) -> Result<Epoch> {
        let row = self
            .store
            .deposits(offset, 1)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::DepositOrdering(format!("deposit row {} disappeared", offset)))?;
        Ok(self.chain.transaction_epoch(&row.tx_hash).await?)
    }

    /// First row offset whose epoch is `>= target`
    async fn lower_bound(&self, target: Epoch, total: u64) -> Result<u64> {
        let (mut lo, mut hi) = (0u64, total);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.row_epoch(mid).await? < target {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }

        if lo > 0 {
            let before = self.row_epoch(lo - 1).await?;
            if before >= target {
                return Err(Error::DepositOrdering(format!(
                    "row {} at epoch {} precedes the first row at or after epoch {}",
                    lo - 1,
                    before,
                    target
                )));
            }
        }
        if lo < total {
            let at = self.row_epoch(lo).await?;
            if at < target {
                return Err(Error::DepositOrdering(format!(
                    "row {} at epoch {} found as first row at or after epoch {}",
                    lo, at, target
                )));
            }
        }
        Ok(lo)
    }

    /// Deposits whose transaction executed in `[from, to]`, in row order
    pub async fn deposits_in_window(&self, from: Epoch, to: Epoch) -> Result<Vec<DepositRecord>> {
        let total = self.store.deposit_count().await?;
        if total == 0 || from > to {
            return Ok(Vec::new());
        }

        let start = self.lower_bound(from, total).await?;
        let end = match to.checked_add(1) {
            Some(next) => self.lower_bound(next, total).await?,
            None => total,
        };
        if start >= end {
            return Ok(Vec::new());
        }

        let mut deposits = Vec::with_capacity((end - start) as usize);
        let mut offset = start;
        while offset < end {
            let limit = self.page_size.min(end - offset);
            let page = self.store.deposits(offset, limit).await?;
            if page.is_empty() {
                return Err(Error::DepositOrdering(format!(
                    "deposit rows {}..{} disappeared",
                    offset, end
                )));
            }
            offset += page.len() as u64;
            deposits.extend(page);
        }

        self.verify_window(&deposits, from, to).await?;
        debug!(from, to, deposits = deposits.len(), "Located deposits");
        Ok(deposits)
    }

    async fn verify_window(&self, deposits: &[DepositRecord], from: Epoch, to: Epoch) -> Result<()> {
        let mut epochs = self
            .executor
            .run(deposits.iter().enumerate(), |(index, deposit)| async move {
                let epoch = self.chain.transaction_epoch(&deposit.tx_hash).await?;
                Ok::<_, Error>((index, epoch))
            })
            .await?;
        epochs.sort_unstable();

        let mut previous = from;
        for (index, epoch) in epochs {
            if epoch < previous || epoch > to {
                return Err(Error::DepositOrdering(format!(
                    "deposit {} executed at epoch {}, expected {}..={} in order",
                    deposits[index].tx_hash, epoch, previous, to
                )));
            }
            previous = epoch;
        }
        Ok(())
    }
}
