//! Error types for chain reads

use ledger_core::{Address, Epoch};
use thiserror::Error;

/// Result type for chain operations
pub type Result<T> = std::result::Result<T, Error>;

/// Chain source errors
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP or connection failure talking to the node
    #[error("Transport error: {0}")]
    Transport(String),

    /// Node answered with a JSON-RPC error object
    #[error("RPC error {code}: {message}")]
    Rpc {
        /// JSON-RPC error code
        code: i64,
        /// Node-supplied message
        message: String,
    },

    /// Return data, log or response had an unexpected shape
    #[error("Decode error: {0}")]
    Decode(String),

    /// A privileged write event appeared in an audited window
    #[error("Unsupported privileged write on {contract} at epoch {epoch:?}")]
    PrivilegedWrite {
        /// Emitting contract
        contract: Address,
        /// Epoch of the log, when the node reported it
        epoch: Option<Epoch>,
    },

    /// Log topic that is none of the known custody events
    #[error("Unknown event {topic} on {contract}")]
    UnknownEvent {
        /// Emitting contract
        contract: Address,
        /// First topic of the log
        topic: String,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Ledger core error (malformed address, amount or word)
    #[error(transparent)]
    Ledger(#[from] ledger_core::Error),
}

impl Error {
    /// Whether the failure came from the network path rather than the data
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport(_) | Error::Rpc { .. })
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Error::Decode(err.to_string())
        } else {
            Error::Transport(err.to_string())
        }
    }
}

impl From<hex::FromHexError> for Error {
    fn from(err: hex::FromHexError) -> Self {
        Error::Decode(format!("invalid hex: {}", err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Decode(err.to_string())
    }
}
