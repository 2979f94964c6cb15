//! Error types for the submission race engine

use thiserror::Error;

/// Engine error type
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Required configuration is missing or malformed
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The signing secret could not be parsed into a keypair
    #[error("Invalid secret: {0}")]
    InvalidSecret(String),

    /// Transfer amount must be positive
    #[error("Invalid amount: {0}")]
    InvalidAmount(i64),

    /// No recipient was supplied for the transfer operations
    #[error("Missing recipient")]
    MissingRecipient,

    /// The race was requested before an acceptable pre-race window
    #[error("Too early: {seconds_remaining}s until the unlock instant")]
    TooEarly {
        /// Seconds between now and the unlock instant
        seconds_remaining: u64,
    },

    /// Structured ledger rejection that cannot be retried
    #[error("Ledger rejected transaction: {code} (operations: {operations:?})")]
    Ledger {
        /// Transaction-level result code
        code: String,
        /// Per-operation result codes, when the ledger reports them
        operations: Vec<String>,
    },

    /// Transport-level failure talking to the ledger network
    #[error("Transport error: {0}")]
    Transport(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
