//! Continuous dual-source monitor
//!
//! Every poll the monitor either runs one full window, once at least
//! `full_interval` confirmed epochs have accumulated since the last full
//! audit, or catches up on partial one-epoch windows. Divergences are
//! escalated by the reconciler and the monitor carries on; any other error
//! is escalated and stops it.

use crate::config::AuditorConfig;
use crate::dual_source::{AuditMode, DualSourceReconciler, ReconciliationReport, MODULE};
use crate::escalation::EscalationSink;
use crate::{Error, Result};
use chain_source::EpochGate;
use ledger_core::{Asset, Epoch};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info};

/// Epoch given absolutely or relative to the confirmed epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpochSpec {
    /// A fixed epoch
    Absolute(Epoch),
    /// This many epochs before the confirmed epoch (`-N`)
    BehindConfirmed(u64),
}

impl EpochSpec {
    /// Concrete epoch given the current confirmed epoch
    pub fn resolve(&self, confirmed: Epoch) -> Epoch {
        match *self {
            EpochSpec::Absolute(epoch) => epoch,
            EpochSpec::BehindConfirmed(n) => confirmed.saturating_sub(n),
        }
    }
}

impl FromStr for EpochSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let parse = |digits: &str| {
            digits
                .parse::<u64>()
                .map_err(|e| Error::Config(format!("epoch '{}': {}", s, e)))
        };
        match s.strip_prefix('-') {
            Some(behind) => Ok(EpochSpec::BehindConfirmed(parse(behind)?)),
            None => Ok(EpochSpec::Absolute(parse(s)?)),
        }
    }
}

impl fmt::Display for EpochSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EpochSpec::Absolute(epoch) => write!(f, "{}", epoch),
            EpochSpec::BehindConfirmed(n) => write!(f, "-{}", n),
        }
    }
}

/// Next epochs the monitor will audit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorState {
    /// First epoch of the next full window
    pub full_from: Epoch,
    /// Next partial epoch
    pub partial_from: Epoch,
}

/// Polls the chain and reconciles new epochs
pub struct DualSourceMonitor {
    reconciler: DualSourceReconciler,
    gate: EpochGate,
    sink: Arc<dyn EscalationSink>,
    assets: Vec<Asset>,
    full_interval: u64,
    poll_interval: Duration,
    full_from: EpochSpec,
    partial_from: EpochSpec,
}

impl fmt::Debug for DualSourceMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DualSourceMonitor")
            .field("assets", &self.assets.len())
            .field("full_interval", &self.full_interval)
            .field("poll_interval", &self.poll_interval)
            .field("full_from", &self.full_from)
            .field("partial_from", &self.partial_from)
            .finish()
    }
}

impl DualSourceMonitor {
    /// Monitor starting from the given epoch specs
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        reconciler: DualSourceReconciler,
        gate: EpochGate,
        sink: Arc<dyn EscalationSink>,
        assets: Vec<Asset>,
        full_interval: u64,
        poll_interval: Duration,
        full_from: EpochSpec,
        partial_from: EpochSpec,
    ) -> Self {
        Self {
            reconciler,
            gate,
            sink,
            assets,
            full_interval: full_interval.max(1),
            poll_interval,
            full_from,
            partial_from,
        }
    }

    /// Monitor configured from the `dual_source` section
    pub fn from_config(
        config: &AuditorConfig,
        reconciler: DualSourceReconciler,
        gate: EpochGate,
        sink: Arc<dyn EscalationSink>,
    ) -> Result<Self> {
        let section = &config.dual_source;
        Ok(Self::new(
            reconciler,
            gate,
            sink,
            config.assets.clone(),
            section.full_interval,
            section.poll_interval(),
            section.full_from.parse()?,
            section.partial_from.parse()?,
        ))
    }

    /// Starting state for the current confirmed epoch
    pub fn initial_state(&self, confirmed: Epoch) -> MonitorState {
        MonitorState {
            full_from: self.full_from.resolve(confirmed),
            partial_from: self.partial_from.resolve(confirmed),
        }
    }

    /// Audit everything confirmed since `state`, advancing it.
    ///
    /// Returns the reports of every window run this round.
    pub async fn run_round(&self, state: &mut MonitorState, confirmed: Epoch) -> Result<Vec<ReconciliationReport>> {
        let next = confirmed.saturating_add(1);
        let mut reports = Vec::new();

        if next.saturating_sub(state.full_from) >= self.full_interval {
            info!(from = state.full_from, to = confirmed, "Running full reconciliation");
            let report = self
                .reconciler
                .reconcile_window(&self.assets, state.full_from, confirmed, AuditMode::Full)
                .await?;
            reports.push(report);
            state.full_from = next;
            state.partial_from = state.partial_from.max(next);
            return Ok(reports);
        }

        while state.partial_from <= confirmed {
            let epoch = state.partial_from;
            let report = self
                .reconciler
                .reconcile_window(&self.assets, epoch, epoch, AuditMode::Partial)
                .await?;
            reports.push(report);
            state.partial_from = epoch + 1;
        }
        Ok(reports)
    }

    /// Run until shutdown or a non-divergence failure
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let confirmed = self.gate.confirmed_epoch().await;
        let mut state = self.initial_state(confirmed);
        info!(
            confirmed,
            full_from = state.full_from,
            partial_from = state.partial_from,
            "Dual-source monitor started"
        );

        loop {
            if *shutdown.borrow() {
                info!(?state, "Dual-source monitor shut down");
                return Ok(());
            }

            let confirmed = self.gate.confirmed_epoch().await;
            if let Err(e) = self.run_round(&mut state, confirmed).await {
                error!(error = %e, ?state, "Dual-source monitor failed");
                let message = format!(
                    "monitor stopped at partial epoch {} (next full from {}): {}",
                    state.partial_from, state.full_from, e
                );
                self.sink.notify(MODULE, &message).await;
                return Err(e);
            }

            if self.reconciler.replay().resolver().trim_caches() {
                debug!("Resolver caches trimmed");
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        tokio::time::sleep(self.poll_interval).await;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epoch_spec_parse() {
        assert_eq!("1200".parse::<EpochSpec>().unwrap(), EpochSpec::Absolute(1200));
        assert_eq!("-50".parse::<EpochSpec>().unwrap(), EpochSpec::BehindConfirmed(50));
        assert_eq!(" -0 ".parse::<EpochSpec>().unwrap(), EpochSpec::BehindConfirmed(0));
        assert!("latest".parse::<EpochSpec>().is_err());
        assert!("--5".parse::<EpochSpec>().is_err());
    }

    #[test]
    fn test_epoch_spec_resolve() {
        assert_eq!(EpochSpec::Absolute(7).resolve(100), 7);
        assert_eq!(EpochSpec::BehindConfirmed(10).resolve(100), 90);
        assert_eq!(EpochSpec::BehindConfirmed(10).resolve(3), 0);
        assert_eq!(EpochSpec::BehindConfirmed(50).to_string(), "-50");
    }
}
