//! Per-asset conservation checkpoint
//!
//! A checkpoint holds the last verified state of one asset and moves it
//! forward one epoch at a time. Phases:
//!
//! ```text
//! Uninitialized --baseline--> Baselined --advance--> Advancing --advance--> Advancing
//!        any phase --baseline--> Baselined
//!        any failure ---------> Failed (baseline discarded)
//! ```
//!
//! Each checkpoint has exactly one writer: the continuous loop moves it into
//! the task that owns the asset.

use crate::error::{Error, Result, ViolationKind};
use chain_source::{OnChainSource, PrivilegedWithdrawal};
use ledger_core::{Address, Asset, BigInt, Epoch, Ledger};
use num_bigint::Sign;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::slice;
use tracing::{debug, info};

/// Lifecycle of a checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No baseline yet
    Uninitialized,
    /// Full audit passed, no epoch advanced since
    Baselined,
    /// At least one epoch advanced since the last full audit
    Advancing,
    /// Last operation failed; a new baseline is required
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Uninitialized => "uninitialized",
            Phase::Baselined => "baselined",
            Phase::Advancing => "advancing",
            Phase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Last verified state of an asset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Baseline {
    /// Verified epoch
    pub epoch: Epoch,
    /// Custody contract total supply at `epoch`
    pub total_supply: BigInt,
    /// Every holder's balance at `epoch`; sums to `total_supply`
    pub ledger: Ledger,
}

/// Result of one verified epoch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvanceOutcome {
    /// Epoch that was verified
    pub epoch: Epoch,
    /// New balance of every account the epoch touched
    pub touched: BTreeMap<Address, BigInt>,
    /// Burns by privileged accounts in this epoch
    pub privileged_withdrawals: Vec<PrivilegedWithdrawal>,
}

/// Conservation state machine of one asset
#[derive(Debug, Clone)]
pub struct AssetCheckpoint {
    asset: Asset,
    custody_offset: BigInt,
    phase: Phase,
    baseline: Option<Baseline>,
}

impl AssetCheckpoint {
    /// Uninitialized checkpoint for `asset`
    pub fn new(asset: Asset, custody_offset: BigInt) -> Self {
        Self {
            asset,
            custody_offset,
            phase: Phase::Uninitialized,
            baseline: None,
        }
    }

    /// Audited asset
    pub fn asset(&self) -> &Asset {
        &self.asset
    }

    /// Current phase
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Last verified state, if any
    pub fn baseline(&self) -> Option<&Baseline> {
        self.baseline.as_ref()
    }

    /// Epoch of the last verified state
    pub fn epoch(&self) -> Option<Epoch> {
        self.baseline.as_ref().map(|b| b.epoch)
    }

    fn fail(&mut self) {
        self.phase = Phase::Failed;
        self.baseline = None;
    }

    fn violation(&self, epoch: Epoch, kind: ViolationKind) -> Error {
        Error::conservation(&self.asset.name, epoch, kind)
    }

    /// The custody contract's supply must be backed by the tokens it holds,
    /// less the configured out-of-band amount. Returns the custody supply.
    async fn check_custody(&self, source: &OnChainSource, epoch: Epoch) -> Result<BigInt> {
        let custody = &self.asset.custody_contract;
        let custody_supply = source.total_supply(custody, epoch).await?;
        let token_balance = source
            .balance_of(&self.asset.token_contract, custody, epoch)
            .await?;

        let backed = &token_balance - &self.custody_offset;
        if custody_supply != backed {
            return Err(self.violation(
                epoch,
                ViolationKind::CustodyMismatch {
                    diff: &custody_supply - &backed,
                    custody_supply,
                    token_balance,
                    offset: self.custody_offset.clone(),
                },
            ));
        }
        Ok(custody_supply)
    }

    async fn full_audit(&self, source: &OnChainSource, epoch: Epoch) -> Result<Baseline> {
        let custody = &self.asset.custody_contract;
        let total_supply = self.check_custody(source, epoch).await?;

        let accounts = source.list_all(custody, epoch).await?;
        let ledger = source.balances_of(custody, &accounts, epoch).await?;

        let sum = ledger.sum();
        if sum != total_supply {
            return Err(self.violation(
                epoch,
                ViolationKind::SupplyMismatch {
                    diff: &total_supply - &sum,
                    total_supply,
                    sum,
                },
            ));
        }

        Ok(Baseline {
            epoch,
            total_supply,
            ledger,
        })
    }

    /// Full audit at `epoch`; replaces any previous baseline.
    ///
    /// Allowed from every phase, so it doubles as recovery after a failure.
    pub async fn establish_baseline(&mut self, source: &OnChainSource, epoch: Epoch) -> Result<&Baseline> {
        match self.full_audit(source, epoch).await {
            Ok(baseline) => {
                info!(
                    asset = %self.asset.name,
                    epoch,
                    accounts = baseline.ledger.len(),
                    total_supply = %baseline.total_supply,
                    "Baseline established"
                );
                self.phase = Phase::Baselined;
                Ok(&*self.baseline.insert(baseline))
            }
            Err(e) => {
                self.fail();
                Err(e)
            }
        }
    }

    /// Verify the epoch after the baseline and move the baseline onto it.
    ///
    /// Any failure leaves the checkpoint [`Phase::Failed`]; the epoch is
    /// never skipped or retried.
    pub async fn advance_epoch(
        &mut self,
        source: &OnChainSource,
        privileged: &HashSet<Address>,
    ) -> Result<AdvanceOutcome> {
        let Some(mut baseline) = self.baseline.take() else {
            return Err(Error::InvalidState(format!(
                "{} has no baseline to advance (phase {})",
                self.asset.name, self.phase
            )));
        };

        match self.verify_next(source, privileged, &mut baseline).await {
            Ok(outcome) => {
                self.baseline = Some(baseline);
                self.phase = Phase::Advancing;
                Ok(outcome)
            }
            Err(e) => {
                self.fail();
                Err(e)
            }
        }
    }

    async fn verify_next(
        &self,
        source: &OnChainSource,
        privileged: &HashSet<Address>,
        baseline: &mut Baseline,
    ) -> Result<AdvanceOutcome> {
        let custody = &self.asset.custody_contract;
        let epoch = baseline
            .epoch
            .checked_add(1)
            .ok_or_else(|| Error::InvalidState("epoch overflow".to_string()))?;

        let total_supply = self.check_custody(source, epoch).await?;
        let window = source
            .event_window(epoch, epoch, slice::from_ref(custody), privileged)
            .await?;
        let delta = window.delta_for(custody);
        let touched = delta.apply_to(&mut baseline.ledger);

        debug!(
            asset = %self.asset.name,
            epoch,
            logs = window.log_count,
            touched = touched.len(),
            "Applied epoch events"
        );

        if let Some((account, balance)) = touched.iter().find(|(_, b)| b.sign() == Sign::Minus) {
            return Err(self.violation(
                epoch,
                ViolationKind::NegativeBalance {
                    account: account.clone(),
                    balance: balance.clone(),
                },
            ));
        }

        let sum = baseline.ledger.sum();
        if sum != total_supply {
            return Err(self.violation(
                epoch,
                ViolationKind::SupplyMismatch {
                    diff: &total_supply - &sum,
                    total_supply,
                    sum,
                },
            ));
        }

        let accounts: Vec<Address> = touched.keys().cloned().collect();
        let actual = source.balances_of(custody, &accounts, epoch).await?;
        for (account, expected) in &touched {
            let on_chain = actual.get(account);
            if &on_chain != expected {
                return Err(self.violation(
                    epoch,
                    ViolationKind::BalanceMismatch {
                        account: account.clone(),
                        diff: expected - &on_chain,
                        expected: expected.clone(),
                        actual: on_chain,
                    },
                ));
            }
        }

        baseline.epoch = epoch;
        baseline.total_supply = total_supply;
        Ok(AdvanceOutcome {
            epoch,
            touched,
            privileged_withdrawals: window.privileged_withdrawals,
        })
    }
}
