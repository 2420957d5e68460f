//! Error types for off-chain replay

use thiserror::Error;

/// Result type for replay operations
pub type Result<T> = std::result::Result<T, Error>;

/// Replay errors
#[derive(Error, Debug)]
pub enum Error {
    /// Database failure
    #[error("Store error: {0}")]
    Store(String),

    /// Chain lookup failure (nonces, deposit epochs)
    #[error(transparent)]
    Chain(#[from] chain_source::Error),

    /// A user, account, product, order or currency the records refer to
    /// does not exist
    #[error("Missing record: {0}")]
    MissingRecord(String),

    /// Record content could not be interpreted
    #[error("Decode error: {0}")]
    Decode(String),

    /// Deposit rows are not in non-decreasing epoch order
    #[error("Deposit ordering violated: {0}")]
    DepositOrdering(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Ledger core error (malformed address or amount)
    #[error(transparent)]
    Ledger(#[from] ledger_core::Error),
}

impl Error {
    /// Whether the failure came from the database or the node
    pub fn is_transport(&self) -> bool {
        match self {
            Error::Store(_) => true,
            Error::Chain(e) => e.is_transport(),
            _ => false,
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Error::Store(err.to_string())
    }
}
