//! Dual-source reconciliation
//!
//! Computes the per-account balance change of an epoch window twice, once
//! from chain state and once by replaying settled off-chain records, and
//! reports every account where they disagree.
//!
//! On-chain side: the holders of each custody contract (all of them in
//! [`AuditMode::Full`], only those touched by in-window events in
//! [`AuditMode::Partial`]) are diffed as `balanceOf(to) - balanceOf(from - 1)`
//! and keyed through the account resolver. Off-chain side: the
//! [`ReplayAdapter`] output for the same window.
//!
//! [`DualSourceReconciler::initial_audit`] compares absolute balances
//! instead, for every enumerable holder at one epoch. It catches balances
//! that were already wrong before delta tracking started.

use crate::escalation::EscalationSink;
use crate::metrics::Metrics;
use crate::{Error, Result};
use chain_source::OnChainSource;
use ledger_core::{AccountKey, Address, Asset, BigInt, DeltaMap, Epoch};
use replay::ReplayAdapter;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use thiserror::Error as ThisError;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Alert module name for divergences
pub const MODULE: &str = "dual_source";

/// Account selection for the on-chain side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditMode {
    /// Every enumerable holder at the end of the window
    Full,
    /// Only holders touched by events inside the window
    Partial,
}

impl fmt::Display for AuditMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditMode::Full => f.write_str("full"),
            AuditMode::Partial => f.write_str("partial"),
        }
    }
}

/// Inclusive epoch window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AuditWindow {
    /// First epoch
    pub from: Epoch,
    /// Last epoch
    pub to: Epoch,
    /// Account selection
    pub mode: AuditMode,
}

impl AuditWindow {
    /// Window `[from, to]`; rejects `from > to`
    pub fn new(from: Epoch, to: Epoch, mode: AuditMode) -> Result<Self> {
        if from > to {
            return Err(Error::Config(format!("empty window {}..={}", from, to)));
        }
        Ok(Self { from, to, mode })
    }
}

impl fmt::Display for AuditWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}..={}", self.mode, self.from, self.to)
    }
}

/// One disagreement between the two sources
#[derive(ThisError, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Divergence {
    /// Different number of changed accounts
    #[error("{onchain} accounts changed on chain, {offchain} off chain")]
    CountMismatch {
        /// Accounts changed on chain
        onchain: usize,
        /// Accounts changed off chain
        offchain: usize,
    },

    /// Account changed on both sides by different amounts
    #[error("account {account} changed by {onchain} on chain, {offchain} off chain (diff {diff})")]
    AmountMismatch {
        /// Ledger account id
        account: AccountKey,
        /// On-chain change
        #[serde(serialize_with = "as_string")]
        onchain: BigInt,
        /// Off-chain change
        #[serde(serialize_with = "as_string")]
        offchain: BigInt,
        /// `onchain - offchain`
        #[serde(serialize_with = "as_string")]
        diff: BigInt,
    },

    /// Account changed on chain with no off-chain record
    #[error("account {account} changed by {onchain} on chain with no off-chain record")]
    MissingOffchain {
        /// Ledger account id
        account: AccountKey,
        /// On-chain change
        #[serde(serialize_with = "as_string")]
        onchain: BigInt,
    },

    /// Off-chain records move an account the chain did not
    #[error("account {account} changed by {offchain} off chain with no on-chain change")]
    MissingOnchain {
        /// Ledger account id
        account: AccountKey,
        /// Off-chain change
        #[serde(serialize_with = "as_string")]
        offchain: BigInt,
    },
}

fn as_string<S: serde::Serializer>(value: &BigInt, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

impl Divergence {
    /// Short label used in metrics
    pub fn label(&self) -> &'static str {
        match self {
            Divergence::CountMismatch { .. } => "count_mismatch",
            Divergence::AmountMismatch { .. } => "amount_mismatch",
            Divergence::MissingOffchain { .. } => "missing_offchain",
            Divergence::MissingOnchain { .. } => "missing_onchain",
        }
    }
}

/// Compare two zero-free delta maps
pub fn compare(onchain: &DeltaMap, offchain: &DeltaMap) -> Vec<Divergence> {
    let mut violations = Vec::new();
    if onchain.len() != offchain.len() {
        violations.push(Divergence::CountMismatch {
            onchain: onchain.len(),
            offchain: offchain.len(),
        });
    }

    let accounts: BTreeSet<AccountKey> = onchain.keys().chain(offchain.keys()).copied().collect();
    for account in accounts {
        match (onchain.get(account), offchain.get(account)) {
            (Some(on), Some(off)) if on != off => violations.push(Divergence::AmountMismatch {
                account,
                onchain: on.clone(),
                offchain: off.clone(),
                diff: on - off,
            }),
            (Some(on), None) => violations.push(Divergence::MissingOffchain {
                account,
                onchain: on.clone(),
            }),
            (None, Some(off)) => violations.push(Divergence::MissingOnchain {
                account,
                offchain: off.clone(),
            }),
            _ => {}
        }
    }
    violations
}

/// Outcome of one reconciled window
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconciliationReport {
    /// Unique id of this run, quoted in alerts
    pub run_id: Uuid,
    /// Reconciled window
    pub window: AuditWindow,
    /// Assets covered
    pub assets: Vec<String>,
    /// Accounts with a non-zero on-chain change
    pub onchain_accounts: usize,
    /// Accounts with a non-zero off-chain change
    pub offchain_accounts: usize,
    /// Every disagreement found
    pub violations: Vec<Divergence>,
}

impl ReconciliationReport {
    /// Whether both sources agree
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }

    /// The report, or a divergence error when any violation was found
    pub fn into_result(self) -> Result<Self> {
        if self.is_clean() {
            Ok(self)
        } else {
            Err(Error::Divergence {
                from: self.window.from,
                to: self.window.to,
                violations: self.violations,
            })
        }
    }
}

/// Holder whose off-chain balance differs from its on-chain balance
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BalanceMismatch {
    /// Holder address
    pub address: Address,
    /// Asset name
    pub asset: String,
    /// Off-chain balance in token base units
    #[serde(serialize_with = "as_string")]
    pub offchain: BigInt,
    /// `balanceOf` at the audited epoch
    #[serde(serialize_with = "as_string")]
    pub onchain: BigInt,
    /// `onchain - offchain`
    #[serde(serialize_with = "as_string")]
    pub diff: BigInt,
}

impl fmt::Display for BalanceMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} holds {} on chain, {} off chain (diff {})",
            self.address, self.asset, self.onchain, self.offchain, self.diff
        )
    }
}

/// Outcome of an absolute balance audit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InitialAuditReport {
    /// Unique id of this run, quoted in alerts
    pub run_id: Uuid,
    /// Audited epoch
    pub epoch: Epoch,
    /// Distinct holders across all assets
    pub holders: usize,
    /// Every mismatch, ordered by address then asset
    pub mismatches: Vec<BalanceMismatch>,
}

impl InitialAuditReport {
    /// Whether every balance matched
    pub fn is_clean(&self) -> bool {
        self.mismatches.is_empty()
    }

    /// The report, or an error when any balance mismatched
    pub fn into_result(self) -> Result<Self> {
        if self.is_clean() {
            Ok(self)
        } else {
            Err(Error::BalanceMismatch {
                epoch: self.epoch,
                mismatches: self.mismatches,
            })
        }
    }
}

/// Compares on-chain and replayed off-chain deltas
#[derive(Clone)]
pub struct DualSourceReconciler {
    source: OnChainSource,
    replay: ReplayAdapter,
    sink: Arc<dyn EscalationSink>,
    metrics: Arc<Metrics>,
    pausable: bool,
}

impl fmt::Debug for DualSourceReconciler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DualSourceReconciler")
            .field("replay", &self.replay)
            .field("pausable", &self.pausable)
            .finish()
    }
}

impl DualSourceReconciler {
    /// Create a reconciler; `pausable` requests a halt for every violation
    pub fn new(
        source: OnChainSource,
        replay: ReplayAdapter,
        sink: Arc<dyn EscalationSink>,
        metrics: Arc<Metrics>,
        pausable: bool,
    ) -> Self {
        Self {
            source,
            replay,
            sink,
            metrics,
            pausable,
        }
    }

    /// Replay adapter, for cache maintenance
    pub fn replay(&self) -> &ReplayAdapter {
        &self.replay
    }

    async fn holders(&self, asset: &Asset, window: &AuditWindow) -> Result<Vec<Address>> {
        let custody = &asset.custody_contract;
        let holders = match window.mode {
            AuditMode::Full => self.source.list_all(custody, window.to).await?,
            AuditMode::Partial => self
                .source
                .touched_accounts(window.from, window.to, custody)
                .await?
                .into_iter()
                .collect(),
        };
        Ok(holders)
    }

    /// Per-account on-chain change of `assets` over `window`
    pub async fn onchain_deltas(&self, assets: &[Asset], window: &AuditWindow) -> Result<DeltaMap> {
        let resolver = self.replay.resolver();
        let mut deltas = DeltaMap::new();

        for asset in assets {
            let custody = &asset.custody_contract;
            let holders = self.holders(asset, window).await?;
            debug!(asset = %asset.name, %window, holders = holders.len(), "Diffing holder balances");

            let changes = self
                .source
                .executor()
                .run(holders, |account| async move {
                    let after = self.source.balance_of(custody, &account, window.to).await?;
                    let before = match window.from.checked_sub(1) {
                        Some(prev) => self.source.balance_of(custody, &account, prev).await?,
                        None => BigInt::from(0),
                    };
                    let change = after - before;
                    if change == BigInt::from(0) {
                        return Ok::<_, Error>(None);
                    }
                    let key = resolver.account_key(&account, &asset.name).await?;
                    Ok(Some((key, change)))
                })
                .await?;

            for (key, change) in changes.into_iter().flatten() {
                deltas.add(key, &change);
            }
        }

        deltas.drop_zero();
        Ok(deltas)
    }

    /// Reconcile `assets` over `[from, to]`.
    ///
    /// Divergences are logged, escalated and returned in the report; only
    /// failures to compute either side are errors.
    pub async fn reconcile_window(
        &self,
        assets: &[Asset],
        from: Epoch,
        to: Epoch,
        mode: AuditMode,
    ) -> Result<ReconciliationReport> {
        let window = AuditWindow::new(from, to, mode)?;
        let run_id = Uuid::new_v4();
        debug!(%run_id, %window, "Reconciling window");

        let offchain = async {
            let mut deltas = self.replay.replay_window(from, to).await?;
            deltas.drop_zero();
            Ok::<_, Error>(deltas)
        };
        let (onchain, offchain) = tokio::try_join!(self.onchain_deltas(assets, &window), offchain)?;

        let report = ReconciliationReport {
            run_id,
            window,
            assets: assets.iter().map(|a| a.name.clone()).collect(),
            onchain_accounts: onchain.len(),
            offchain_accounts: offchain.len(),
            violations: compare(&onchain, &offchain),
        };
        self.metrics
            .windows
            .with_label_values(&[&mode.to_string()])
            .inc();

        if report.is_clean() {
            info!(
                %run_id,
                %window,
                accounts = report.onchain_accounts,
                "Window reconciled"
            );
        } else {
            self.escalate(&report).await;
        }
        Ok(report)
    }

    /// Compare every holder's off-chain balance of `assets` with its
    /// `balanceOf` at `epoch`.
    ///
    /// Holders are the union of each custody contract's enumerated
    /// accounts. A holder with no off-chain row for an asset counts as
    /// holding zero of it. Mismatches are logged, escalated and returned in
    /// the report.
    pub async fn initial_audit(&self, assets: &[Asset], epoch: Epoch) -> Result<InitialAuditReport> {
        let run_id = Uuid::new_v4();
        info!(%run_id, epoch, assets = assets.len(), "Starting initial balance audit");

        let mut holders = BTreeSet::new();
        for asset in assets {
            holders.extend(self.source.list_all(&asset.custody_contract, epoch).await?);
        }
        info!(%run_id, holders = holders.len(), "Holders found for initial audit");

        let per_holder = self
            .source
            .executor()
            .run(holders.iter(), |address| async move {
                let offchain: HashMap<String, BigInt> = self.replay.balances(address).await?;
                let mut mismatches = Vec::new();
                for asset in assets {
                    let onchain = self
                        .source
                        .balance_of(&asset.custody_contract, address, epoch)
                        .await?;
                    let offchain = offchain
                        .get(&asset.name)
                        .cloned()
                        .unwrap_or_else(|| BigInt::from(0));
                    if onchain != offchain {
                        mismatches.push(BalanceMismatch {
                            address: address.clone(),
                            asset: asset.name.clone(),
                            diff: &onchain - &offchain,
                            offchain,
                            onchain,
                        });
                    }
                }
                Ok::<_, Error>(mismatches)
            })
            .await?;

        let mut mismatches: Vec<BalanceMismatch> = per_holder.into_iter().flatten().collect();
        mismatches.sort_by(|a, b| (&a.address, &a.asset).cmp(&(&b.address, &b.asset)));

        let report = InitialAuditReport {
            run_id,
            epoch,
            holders: holders.len(),
            mismatches,
        };
        for mismatch in &report.mismatches {
            error!(%run_id, epoch, "Balance mismatch: {}", mismatch);
            self.metrics
                .divergences
                .with_label_values(&["balance_mismatch"])
                .inc();
            let message = format!("[{}] initial audit at epoch {}: {}", run_id, epoch, mismatch);
            self.sink.notify(MODULE, &message).await;
        }
        if report.is_clean() {
            info!(%run_id, epoch, holders = report.holders, "Initial balance audit passed");
        }
        Ok(report)
    }

    async fn escalate(&self, report: &ReconciliationReport) {
        for violation in &report.violations {
            error!(
                run_id = %report.run_id,
                window = %report.window,
                kind = violation.label(),
                "{}",
                violation
            );
            self.metrics
                .divergences
                .with_label_values(&[violation.label()])
                .inc();

            let message = format!("[{}] epochs {}: {}", report.run_id, report.window, violation);
            self.sink.notify(MODULE, &message).await;
            if self.pausable {
                self.sink.request_halt().await;
            }
        }
    }
}
