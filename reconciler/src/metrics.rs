//! Prometheus metrics for the auditor
//!
//! # Metrics
//!
//! - `auditor_epochs_advanced_total{asset}` - Epochs verified incrementally
//! - `auditor_baselines_total{asset}` - Full baselines established
//! - `auditor_conservation_failures_total{asset,kind}` - Failed conservation checks
//! - `auditor_divergences_total{kind}` - Dual-source violations reported
//! - `auditor_windows_total{mode}` - Dual-source windows reconciled
//! - `auditor_last_verified_epoch{asset}` - Newest verified epoch

use prometheus::{Encoder, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};
use std::fmt;

/// Metrics collector with its own registry
#[derive(Clone)]
pub struct Metrics {
    /// Epochs verified incrementally
    pub epochs_advanced: IntCounterVec,

    /// Full baselines established
    pub baselines: IntCounterVec,

    /// Failed conservation checks
    pub conservation_failures: IntCounterVec,

    /// Dual-source violations
    pub divergences: IntCounterVec,

    /// Dual-source windows reconciled
    pub windows: IntCounterVec,

    /// Newest verified epoch per asset
    pub last_verified_epoch: IntGaugeVec,

    registry: Registry,
}

impl fmt::Debug for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

impl Metrics {
    /// Create and register every metric
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let epochs_advanced = IntCounterVec::new(
            Opts::new("auditor_epochs_advanced_total", "Epochs verified incrementally"),
            &["asset"],
        )?;
        registry.register(Box::new(epochs_advanced.clone()))?;

        let baselines = IntCounterVec::new(
            Opts::new("auditor_baselines_total", "Full baselines established"),
            &["asset"],
        )?;
        registry.register(Box::new(baselines.clone()))?;

        let conservation_failures = IntCounterVec::new(
            Opts::new(
                "auditor_conservation_failures_total",
                "Failed conservation checks",
            ),
            &["asset", "kind"],
        )?;
        registry.register(Box::new(conservation_failures.clone()))?;

        let divergences = IntCounterVec::new(
            Opts::new("auditor_divergences_total", "Dual-source violations reported"),
            &["kind"],
        )?;
        registry.register(Box::new(divergences.clone()))?;

        let windows = IntCounterVec::new(
            Opts::new("auditor_windows_total", "Dual-source windows reconciled"),
            &["mode"],
        )?;
        registry.register(Box::new(windows.clone()))?;

        let last_verified_epoch = IntGaugeVec::new(
            Opts::new("auditor_last_verified_epoch", "Newest verified epoch"),
            &["asset"],
        )?;
        registry.register(Box::new(last_verified_epoch.clone()))?;

        Ok(Self {
            epochs_advanced,
            baselines,
            conservation_failures,
            divergences,
            windows,
            last_verified_epoch,
            registry,
        })
    }

    /// Registry holding every metric
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record a verified epoch for `asset`
    pub fn record_verified(&self, asset: &str, epoch: u64) {
        self.last_verified_epoch
            .with_label_values(&[asset])
            .set(i64::try_from(epoch).unwrap_or(i64::MAX));
    }

    /// Render in the Prometheus text format
    pub fn export(&self) -> prometheus::Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer)
            .map_err(|e| prometheus::Error::Msg(format!("metrics are not UTF-8: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_contains_recorded_values() {
        let metrics = Metrics::new().unwrap();
        metrics.epochs_advanced.with_label_values(&["USDT"]).inc();
        metrics.record_verified("USDT", 101);

        let text = metrics.export().unwrap();
        assert!(text.contains("auditor_epochs_advanced_total{asset=\"USDT\"} 1"));
        assert!(text.contains("auditor_last_verified_epoch{asset=\"USDT\"} 101"));
    }

    #[test]
    fn test_instances_are_independent() {
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();
        a.baselines.with_label_values(&["BTC"]).inc();
        assert_eq!(b.baselines.with_label_values(&["BTC"]).get(), 0);
    }
}
