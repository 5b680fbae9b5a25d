//! Error types for the ledger

use rust_decimal::Decimal;
use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Recoverable balance failures. State is never modified when one is returned.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BalanceError {
    /// Sender does not hold enough funds
    #[error("Insufficient balance for {username}: needed {needed}, available {available}")]
    InsufficientBalance {
        /// Debited account
        username: String,
        /// Requested amount
        needed: Decimal,
        /// Balance at the time of the check
        available: Decimal,
    },

    /// Amount is zero or negative after truncation
    #[error("Amount must be positive, got {0}")]
    NonPositiveAmount(Decimal),

    /// Sender has never held a balance
    #[error("Unknown sender: {0}")]
    UnknownSender(String),

    /// Crediting would exceed the largest representable amount
    #[error("Amount overflows balance of {0}")]
    Overflow(String),
}

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Balance check failed
    #[error("Balance error: {0}")]
    Balance(#[from] BalanceError),

    /// Chain verification failed. Fatal for the ledger instance.
    #[error("Blockchain broken at height {height}: {reason}")]
    BlockchainBroken {
        /// Height of the first block that failed verification
        height: u64,
        /// What did not match
        reason: String,
    },

    /// A mutating request arrived after the chain was found broken
    #[error("Ledger halted after chain break at height {height}: {reason}")]
    LedgerHalted {
        /// Height reported by the failed verification
        height: u64,
        /// Reason reported by the failed verification
        reason: String,
    },

    /// An explicitly supplied nonce does not satisfy the difficulty
    #[error("Block {height} not mined: hash {hash} does not meet difficulty")]
    BlockNotMined {
        /// Height of the rejected block
        height: u64,
        /// Hash produced by the supplied nonce
        hash: String,
    },

    /// Unique constraint violation (duplicate hash, height, ...)
    #[error("Unique constraint violated: {0}")]
    UniqueViolation(String),

    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Canonical JSON encoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV parsing or writing error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Hash string is not 64 hex characters
    #[error("Invalid hash: {0}")]
    InvalidHash(String),

    /// Malformed caller input (amount, timestamp, username)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Requested record does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Concurrency error (actor mailbox closed, worker panicked, etc.)
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for errors that leave the ledger unusable until an operator intervenes
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::BlockchainBroken { .. } | Error::LedgerHalted { .. }
        )
    }

    pub(crate) fn broken(height: u64, reason: impl Into<String>) -> Self {
        Error::BlockchainBroken {
            height,
            reason: reason.into(),
        }
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::Concurrency(format!("Worker task failed: {}", err))
    }
}
