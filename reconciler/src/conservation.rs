//! Conservation audit across assets
//!
//! [`CheckpointReconciler`] owns one [`AssetCheckpoint`] per asset. Used
//! directly it runs single baselines and advances; [`start_continuous`]
//! moves every checkpoint into its own task which alternates full audits and
//! epoch-by-epoch advances until it fails or is shut down.
//!
//! [`start_continuous`]: CheckpointReconciler::start_continuous

use crate::checkpoint::{AdvanceOutcome, AssetCheckpoint, Baseline};
use crate::config::AuditorConfig;
use crate::escalation::EscalationSink;
use crate::metrics::Metrics;
use crate::{Error, Result};
use chain_source::{EpochGate, OnChainSource};
use ledger_core::{Address, Asset, BigInt, Epoch};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Alert module name for conservation failures
pub const MODULE: &str = "conservation";

/// Collaborators shared by every asset loop
#[derive(Clone)]
struct AuditContext {
    source: OnChainSource,
    gate: EpochGate,
    sink: Arc<dyn EscalationSink>,
    metrics: Arc<Metrics>,
    privileged: Arc<HashSet<Address>>,
}

impl AuditContext {
    async fn baseline<'a>(&self, checkpoint: &'a mut AssetCheckpoint, epoch: Epoch) -> Result<&'a Baseline> {
        let name = checkpoint.asset().name.clone();
        match checkpoint.establish_baseline(&self.source, epoch).await {
            Ok(baseline) => {
                self.metrics.baselines.with_label_values(&[&name]).inc();
                self.metrics.record_verified(&name, epoch);
                Ok(baseline)
            }
            Err(e) => {
                self.record_failure(&name, &e);
                Err(e)
            }
        }
    }

    async fn advance(&self, checkpoint: &mut AssetCheckpoint) -> Result<AdvanceOutcome> {
        let name = checkpoint.asset().name.clone();
        let outcome = match checkpoint.advance_epoch(&self.source, &self.privileged).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.record_failure(&name, &e);
                return Err(e);
            }
        };

        self.metrics.epochs_advanced.with_label_values(&[&name]).inc();
        self.metrics.record_verified(&name, outcome.epoch);

        for withdrawal in &outcome.privileged_withdrawals {
            let message = format!(
                "privileged account {} withdrew {} {} at epoch {} (tx {})",
                withdrawal.account,
                withdrawal.amount,
                name,
                outcome.epoch,
                withdrawal.transaction_hash.as_deref().unwrap_or("unknown"),
            );
            self.sink.notify(MODULE, &message).await;
        }
        Ok(outcome)
    }

    fn record_failure(&self, asset: &str, err: &Error) {
        if let Error::Conservation(violation) = err {
            self.metrics
                .conservation_failures
                .with_label_values(&[asset, violation.kind.label()])
                .inc();
        }
    }
}

/// Conservation auditor for a set of assets
pub struct CheckpointReconciler {
    ctx: AuditContext,
    checkpoints: BTreeMap<String, AssetCheckpoint>,
}

impl fmt::Debug for CheckpointReconciler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CheckpointReconciler")
            .field("assets", &self.checkpoints.keys().collect::<Vec<_>>())
            .field("privileged", &self.ctx.privileged.len())
            .finish()
    }
}

impl CheckpointReconciler {
    /// Reconciler with no assets
    pub fn new(
        source: OnChainSource,
        gate: EpochGate,
        sink: Arc<dyn EscalationSink>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            ctx: AuditContext {
                source,
                gate,
                sink,
                metrics,
                privileged: Arc::new(HashSet::new()),
            },
            checkpoints: BTreeMap::new(),
        }
    }

    /// Reconciler for every configured asset
    pub fn from_config(
        config: &AuditorConfig,
        source: OnChainSource,
        gate: EpochGate,
        sink: Arc<dyn EscalationSink>,
        metrics: Arc<Metrics>,
    ) -> Result<Self> {
        let mut reconciler = Self::new(source, gate, sink, metrics)
            .with_privileged(config.conservation.privileged_set());
        for asset in &config.assets {
            let offset = config.conservation.custody_offset(&asset.name)?;
            reconciler = reconciler.with_asset(asset.clone(), offset);
        }
        Ok(reconciler)
    }

    /// Audit `asset`, excluding `custody_offset` from the custody check
    pub fn with_asset(mut self, asset: Asset, custody_offset: BigInt) -> Self {
        self.checkpoints.insert(
            asset.name.clone(),
            AssetCheckpoint::new(asset, custody_offset),
        );
        self
    }

    /// Report withdrawals by these accounts
    pub fn with_privileged(mut self, privileged: HashSet<Address>) -> Self {
        self.ctx.privileged = Arc::new(privileged);
        self
    }

    /// Checkpoint of `asset`
    pub fn checkpoint(&self, asset: &str) -> Option<&AssetCheckpoint> {
        self.checkpoints.get(asset)
    }

    fn checkpoint_mut(&mut self, asset: &str) -> Result<&mut AssetCheckpoint> {
        self.checkpoints
            .get_mut(asset)
            .ok_or_else(|| Error::Config(format!("unknown asset {}", asset)))
    }

    /// Full audit of `asset` at `epoch`
    pub async fn establish_baseline(&mut self, asset: &str, epoch: Epoch) -> Result<&Baseline> {
        let ctx = self.ctx.clone();
        let checkpoint = self.checkpoint_mut(asset)?;
        ctx.baseline(checkpoint, epoch).await
    }

    /// Verify the epoch after `asset`'s baseline
    pub async fn advance_epoch(&mut self, asset: &str) -> Result<AdvanceOutcome> {
        let ctx = self.ctx.clone();
        let checkpoint = self.checkpoint_mut(asset)?;
        ctx.advance(checkpoint).await
    }

    /// Run every asset continuously from `epoch_since`.
    ///
    /// Each round establishes a baseline at its first epoch and advances
    /// `interval_epochs - 1` times; the next round starts at the following
    /// epoch. A failing asset is escalated and its loop stops; other assets
    /// keep running. `shutdown` is observed only while waiting for
    /// confirmation, never inside an audit.
    pub fn start_continuous(
        self,
        epoch_since: Epoch,
        interval_epochs: u64,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Vec<JoinHandle<()>>> {
        if interval_epochs == 0 {
            return Err(Error::Config("interval_epochs must be at least 1".to_string()));
        }

        info!(
            assets = self.checkpoints.len(),
            epoch_since, interval_epochs, "Starting continuous conservation audit"
        );
        let handles = self
            .checkpoints
            .into_values()
            .map(|checkpoint| {
                let ctx = self.ctx.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(run_asset(ctx, checkpoint, epoch_since, interval_epochs, shutdown))
            })
            .collect();
        Ok(handles)
    }
}

/// Wait until `target` is confirmed; `false` when shutdown was requested
async fn wait_confirmed(gate: &EpochGate, target: Epoch, shutdown: &mut watch::Receiver<bool>) -> bool {
    let confirmed = gate.await_confirmed(target);
    tokio::pin!(confirmed);
    loop {
        if *shutdown.borrow() {
            return false;
        }
        tokio::select! {
            _ = &mut confirmed => return true,
            changed = shutdown.changed() => {
                if changed.is_err() {
                    // No sender left to request shutdown
                    (&mut confirmed).await;
                    return true;
                }
            }
        }
    }
}

enum RoundEnd {
    Completed,
    Shutdown,
}

async fn run_round(
    ctx: &AuditContext,
    checkpoint: &mut AssetCheckpoint,
    from: Epoch,
    last: Epoch,
    verified: &mut Option<Epoch>,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<RoundEnd> {
    if !wait_confirmed(&ctx.gate, from, shutdown).await {
        return Ok(RoundEnd::Shutdown);
    }
    let mut epoch = ctx.baseline(checkpoint, from).await?.epoch;
    *verified = Some(epoch);

    while epoch < last {
        if !wait_confirmed(&ctx.gate, epoch + 1, shutdown).await {
            return Ok(RoundEnd::Shutdown);
        }
        epoch = ctx.advance(checkpoint).await?.epoch;
        *verified = Some(epoch);
    }
    Ok(RoundEnd::Completed)
}

async fn run_asset(
    ctx: AuditContext,
    mut checkpoint: AssetCheckpoint,
    epoch_since: Epoch,
    interval_epochs: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    let asset = checkpoint.asset().name.clone();
    let mut from = epoch_since;
    let mut verified = None;

    loop {
        let last = from.saturating_add(interval_epochs - 1);
        info!(asset = %asset, from, to = last, "Conservation round started");

        match run_round(&ctx, &mut checkpoint, from, last, &mut verified, &mut shutdown).await {
            Ok(RoundEnd::Completed) => {
                info!(asset = %asset, from, to = last, "Conservation round completed");
            }
            Ok(RoundEnd::Shutdown) => {
                info!(asset = %asset, verified = ?verified, "Conservation audit shut down");
                return;
            }
            Err(e) => {
                error!(asset = %asset, error = %e, "Conservation audit failed");
                let message = match verified {
                    Some(epoch) => format!("{} audit stopped after verified epoch {}: {}", asset, epoch, e),
                    None => format!("{} audit stopped before any verified epoch: {}", asset, e),
                };
                ctx.sink.notify(MODULE, &message).await;
                return;
            }
        }

        from = match last.checked_add(1) {
            Some(next) => next,
            None => {
                warn!(asset = %asset, "Epoch range exhausted");
                return;
            }
        };
    }
}
