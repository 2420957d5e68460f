//! Ledger Reconciliation Engine
//!
//! Continuously verifies that the exchange's off-chain ledger and the
//! on-chain custody contracts never silently diverge.
//!
//! # Architecture
//!
//! - **Conservation audit**: per asset, the custody contract's total supply
//!   must equal the sum of all held balances. A full baseline is taken by
//!   enumerating every holder, then advanced epoch by epoch from event logs,
//!   verifying every touched balance against the chain.
//! - **Dual-source reconciliation**: the per-account change over an epoch
//!   window is computed from chain state and from replayed off-chain
//!   records, and the two are compared account by account. An initial
//!   audit compares absolute balances of every holder once.
//! - **Escalation**: violations go to an [`EscalationSink`], optionally with
//!   a halt request.
//!
//! # Invariants
//!
//! - Every chain read is pinned to an epoch at or behind the confirmed
//!   epoch.
//! - Epoch N+1 of an asset is never audited before epoch N has passed.
//! - A failed checkpoint is never advanced; it needs a new baseline.
//! - Balances are exact integers; no floating point anywhere.

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod checkpoint;
pub mod config;
pub mod conservation;
pub mod dual_source;
pub mod error;
pub mod escalation;
pub mod metrics;
pub mod monitor;

// Re-exports
pub use checkpoint::{AdvanceOutcome, AssetCheckpoint, Baseline, Phase};
pub use config::{AuditorConfig, LogFormat};
pub use conservation::CheckpointReconciler;
pub use dual_source::{
    AuditMode, AuditWindow, BalanceMismatch, Divergence, DualSourceReconciler, InitialAuditReport,
    ReconciliationReport,
};
pub use error::{ConservationViolation, Error, Result, ViolationKind};
pub use escalation::{EscalationSink, HaltWindow, RecordingSink, TracingSink};
pub use metrics::Metrics;
pub use monitor::{DualSourceMonitor, EpochSpec, MonitorState};
