//! Confirmation gate
//!
//! No epoch is audited until it is at least `confirmation_margin` epochs
//! behind the head, so audited state cannot be reorganised away.

use crate::client::ChainHead;
use crate::config::ChainConfig;
use crate::Result;
use ledger_core::Epoch;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{trace, warn};

/// Default distance between head and newest audited epoch
pub const DEFAULT_CONFIRMATION_MARGIN: u64 = 10;

/// Blocks callers until an epoch is confirmed
#[derive(Clone)]
pub struct EpochGate {
    head: Arc<dyn ChainHead>,
    margin: u64,
    poll_interval: Duration,
}

impl fmt::Debug for EpochGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EpochGate")
            .field("margin", &self.margin)
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

impl EpochGate {
    /// Gate with explicit margin and polling interval
    pub fn new(head: Arc<dyn ChainHead>, margin: u64, poll_interval: Duration) -> Self {
        Self {
            head,
            margin,
            poll_interval,
        }
    }

    /// Gate configured from the chain section
    pub fn from_config(head: Arc<dyn ChainHead>, config: &ChainConfig) -> Self {
        Self::new(head, config.confirmation_margin, config.poll_interval())
    }

    /// Confirmation margin
    pub fn margin(&self) -> u64 {
        self.margin
    }

    /// Single head query; `head - margin`, saturating at zero
    pub async fn try_confirmed_epoch(&self) -> Result<Epoch> {
        let head = self.head.current_epoch().await?;
        Ok(head.saturating_sub(self.margin))
    }

    /// Current confirmed epoch, retrying head failures forever
    pub async fn confirmed_epoch(&self) -> Epoch {
        loop {
            match self.try_confirmed_epoch().await {
                Ok(confirmed) => return confirmed,
                Err(e) => {
                    warn!(error = %e, "Failed to query chain head, retrying");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
    }

    /// Wait until `target` is confirmed and return the confirmed epoch
    pub async fn await_confirmed(&self, target: Epoch) -> Epoch {
        loop {
            let confirmed = self.confirmed_epoch().await;
            if target <= confirmed {
                return confirmed;
            }
            trace!(target, confirmed, "Waiting for epoch confirmation");
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockChain;

    #[tokio::test]
    async fn test_margin_saturates() {
        let chain = Arc::new(MockChain::new());
        chain.set_head(4);
        let gate = EpochGate::new(chain, 10, Duration::from_secs(1));
        assert_eq!(gate.try_confirmed_epoch().await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_head_to_advance() {
        let chain = Arc::new(MockChain::new());
        chain.set_head(105);
        let gate = EpochGate::new(chain.clone(), 10, Duration::from_secs(1));

        let waiter = tokio::spawn({
            let gate = gate.clone();
            async move { gate.await_confirmed(100).await }
        });

        tokio::time::sleep(Duration::from_millis(3_500)).await;
        assert!(!waiter.is_finished());

        chain.set_head(112);
        let confirmed = waiter.await.unwrap();
        assert_eq!(confirmed, 102);
    }

    #[tokio::test(start_paused = true)]
    async fn test_head_failures_are_retried() {
        let chain = Arc::new(MockChain::new());
        chain.set_head(50);
        chain.fail_next_head_queries(3);
        let gate = EpochGate::new(chain.clone(), 10, Duration::from_secs(1));

        assert_eq!(gate.await_confirmed(40).await, 40);
        assert_eq!(chain.head_queries(), 4);
    }
}
