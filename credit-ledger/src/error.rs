//! Error types for the credit ledger

use crate::micro::MoneyError;
use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
///
/// Every variant maps to a stable machine-readable code via [`Error::code`]
/// so calling services can branch on it (retry vs. surface vs. alert)
/// without parsing prose.
#[derive(Error, Debug)]
pub enum Error {
    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Monetary value failed to parse or overflowed
    #[error(transparent)]
    Money(#[from] MoneyError),

    /// Account not found
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    /// Reservation not found
    #[error("Reservation not found: {0}")]
    ReservationNotFound(String),

    /// Available balance cannot cover the requested amount
    #[error("Insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance {
        /// Amount requested
        requested: String,
        /// Amount actually available across eligible lots
        available: String,
    },

    /// Actual cost exceeds the reserved amount
    #[error("Overspend: actual {actual} exceeds reserved {reserved}")]
    Overspend {
        /// Claimed actual cost
        actual: String,
        /// Currently reserved amount
        reserved: String,
    },

    /// Mutation attempted on a reservation already in a terminal state
    #[error("Reservation {0} is terminal")]
    TerminalReservation(String),

    /// Transfer rejected (self-transfer, non-positive amount, ...)
    #[error("Transfer rejected: {0}")]
    TransferRejected(String),

    /// Quarantine entry already replayed
    #[error("Quarantine entry {0} already replayed")]
    AlreadyReplayed(String),

    /// Quarantine entry not found
    #[error("Quarantine entry not found: {0}")]
    QuarantineNotFound(String),

    /// Invariant violation (per-lot conservation, etc.)
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Invalid operation input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Concurrency error (actor mailbox closed, etc.)
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
    /// Stable machine-readable code for callers
    pub fn code(&self) -> &'static str {
        match self {
            Error::Storage(_) => "STORAGE",
            Error::Serialization(_) => "SERIALIZATION",
            Error::Money(e) => e.code(),
            Error::AccountNotFound(_) => "ACCOUNT_UNKNOWN",
            Error::ReservationNotFound(_) => "RESERVATION_UNKNOWN",
            Error::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            Error::Overspend { .. } => "OVERSPEND",
            Error::TerminalReservation(_) => "TERMINAL_RESERVATION",
            Error::TransferRejected(_) => "TRANSFER_REJECTED",
            Error::AlreadyReplayed(_) => "ALREADY_REPLAYED",
            Error::QuarantineNotFound(_) => "QUARANTINE_UNKNOWN",
            Error::InvariantViolation(_) => "INVARIANT_VIOLATION",
            Error::InvalidInput(_) => "INVALID_INPUT",
            Error::Concurrency(_) => "CONCURRENCY",
            Error::Config(_) => "CONFIG",
            Error::Io(_) => "IO",
        }
    }

    /// True when a retry can never succeed
    pub fn is_permanent(&self) -> bool {
        !matches!(
            self,
            Error::Storage(_) | Error::Concurrency(_) | Error::Io(_)
        )
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}
