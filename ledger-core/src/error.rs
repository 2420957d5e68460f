//! Error types for the ledger core

use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Address is not `0x` followed by 40 hex digits
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Decimal amount could not be parsed
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// ABI word or log topic has the wrong shape
    #[error("Malformed word: {0}")]
    MalformedWord(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
