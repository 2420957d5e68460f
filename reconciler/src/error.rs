//! Error types for the reconciliation engine

use crate::dual_source::{BalanceMismatch, Divergence};
use ledger_core::{Address, BigInt, Epoch};
use thiserror::Error;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Which conservation invariant failed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ViolationKind {
    /// Total supply differs from the sum of held balances
    #[error("total supply {total_supply} != sum of balances {sum} (diff {diff})")]
    SupplyMismatch {
        /// On-chain total supply
        total_supply: BigInt,
        /// Sum of tracked balances
        sum: BigInt,
        /// `total_supply - sum`
        diff: BigInt,
    },

    /// Custody supply is not backed by the token balance it holds
    #[error(
        "custody supply {custody_supply} != token balance {token_balance} - offset {offset} (diff {diff})"
    )]
    CustodyMismatch {
        /// Custody contract total supply
        custody_supply: BigInt,
        /// Token balance held by the custody contract
        token_balance: BigInt,
        /// Configured out-of-band amount
        offset: BigInt,
        /// `custody_supply - (token_balance - offset)`
        diff: BigInt,
    },

    /// A tracked balance went below zero
    #[error("account {account} balance {balance} is negative")]
    NegativeBalance {
        /// Holder
        account: Address,
        /// Local balance after applying the epoch
        balance: BigInt,
    },

    /// A tracked balance differs from the on-chain balance
    #[error("account {account} expected {expected}, chain reports {actual} (diff {diff})")]
    BalanceMismatch {
        /// Holder
        account: Address,
        /// Local balance
        expected: BigInt,
        /// On-chain balance
        actual: BigInt,
        /// `expected - actual`
        diff: BigInt,
    },
}

impl ViolationKind {
    /// Short label used in metrics
    pub fn label(&self) -> &'static str {
        match self {
            ViolationKind::SupplyMismatch { .. } => "supply_mismatch",
            ViolationKind::CustodyMismatch { .. } => "custody_mismatch",
            ViolationKind::NegativeBalance { .. } => "negative_balance",
            ViolationKind::BalanceMismatch { .. } => "balance_mismatch",
        }
    }
}

/// Failed conservation check of one asset at one epoch
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("conservation violated for {asset} at epoch {epoch}: {kind}")]
pub struct ConservationViolation {
    /// Asset name
    pub asset: String,
    /// Epoch checked
    pub epoch: Epoch,
    /// Failed invariant
    pub kind: ViolationKind,
}

/// Engine errors
#[derive(Error, Debug)]
pub enum Error {
    /// Node or database unreachable
    #[error("Transport error: {0}")]
    Transport(String),

    /// Conservation invariant failed
    #[error(transparent)]
    Conservation(Box<ConservationViolation>),

    /// On-chain and off-chain deltas disagree
    #[error("Dual-source divergence in epochs {from}..={to}: {} violation(s)", .violations.len())]
    Divergence {
        /// First epoch of the window
        from: Epoch,
        /// Last epoch of the window
        to: Epoch,
        /// Every violation found
        violations: Vec<Divergence>,
    },

    /// Absolute off-chain balances differ from the chain
    #[error("Initial audit at epoch {epoch}: {} balance mismatch(es)", .mismatches.len())]
    BalanceMismatch {
        /// Audited epoch
        epoch: Epoch,
        /// Every mismatch found
        mismatches: Vec<BalanceMismatch>,
    },

    /// Chain or store data could not be interpreted
    #[error("Decode error: {0}")]
    Decode(String),

    /// Configuration error, including references to unknown records
    #[error("Configuration error: {0}")]
    Config(String),

    /// Input ordering assumption violated
    #[error("Precondition violated: {0}")]
    Precondition(String),

    /// Operation not allowed in the current phase
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl Error {
    /// Build a conservation error
    pub fn conservation(asset: &str, epoch: Epoch, kind: ViolationKind) -> Self {
        Error::Conservation(Box::new(ConservationViolation {
            asset: asset.to_string(),
            epoch,
            kind,
        }))
    }

    /// Whether the node or database could not be reached
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport(_))
    }

    /// Short label used in metrics and escalation
    pub fn label(&self) -> &'static str {
        match self {
            Error::Transport(_) => "transport",
            Error::Conservation(v) => v.kind.label(),
            Error::Divergence { .. } => "divergence",
            Error::BalanceMismatch { .. } => "balance_mismatch",
            Error::Decode(_) => "decode",
            Error::Config(_) => "config",
            Error::Precondition(_) => "precondition",
            Error::InvalidState(_) => "invalid_state",
        }
    }
}

impl From<ledger_core::Error> for Error {
    fn from(err: ledger_core::Error) -> Self {
        match err {
            ledger_core::Error::Config(msg) => Error::Config(msg),
            ledger_core::Error::Io(e) => Error::Config(e.to_string()),
            other => Error::Decode(other.to_string()),
        }
    }
}

impl From<chain_source::Error> for Error {
    fn from(err: chain_source::Error) -> Self {
        use chain_source::Error as E;
        match err {
            e @ (E::Transport(_) | E::Rpc { .. }) => Error::Transport(e.to_string()),
            E::Config(msg) => Error::Config(msg),
            E::Ledger(e) => e.into(),
            other => Error::Decode(other.to_string()),
        }
    }
}

impl From<replay::Error> for Error {
    fn from(err: replay::Error) -> Self {
        use replay::Error as E;
        match err {
            E::Store(msg) => Error::Transport(msg),
            E::Chain(e) => e.into(),
            E::MissingRecord(msg) => Error::Config(format!("missing record: {}", msg)),
            E::Decode(msg) => Error::Decode(msg),
            E::DepositOrdering(msg) => Error::Precondition(msg),
            E::Config(msg) => Error::Config(msg),
            E::Ledger(e) => e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_errors_map_to_taxonomy() {
        let err: Error = chain_source::Error::Transport("connection refused".into()).into();
        assert!(err.is_transport());

        let err: Error = chain_source::Error::Rpc {
            code: -32000,
            message: "busy".into(),
        }
        .into();
        assert!(err.is_transport());

        let err: Error = replay::Error::MissingRecord("user 0x01".into()).into();
        assert!(matches!(err, Error::Config(_)));

        let err: Error = replay::Error::DepositOrdering("row 3".into()).into();
        assert!(matches!(err, Error::Precondition(_)));

        let err: Error = replay::Error::Chain(chain_source::Error::Decode("short".into())).into();
        assert!(matches!(err, Error::Decode(_)));
    }

    #[test]
    fn test_conservation_display() {
        let err = Error::conservation(
            "USDT",
            100,
            ViolationKind::SupplyMismatch {
                total_supply: BigInt::from(1000),
                sum: BigInt::from(999),
                diff: BigInt::from(1),
            },
        );
        let text = err.to_string();
        assert!(text.contains("USDT"));
        assert!(text.contains("diff 1"));
        assert_eq!(err.label(), "supply_mismatch");
    }
}
