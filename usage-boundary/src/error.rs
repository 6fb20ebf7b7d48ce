//! Error types for the boundary verifier

use thiserror::Error;

/// Whether a retry of the same request can ever succeed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Retry is pointless; reject
    Permanent,
    /// Retry may succeed; caller should back off
    Transient,
}

/// Verification failures, one per pipeline step
///
/// The first failing step determines the error; later steps never run.
#[derive(Error, Debug)]
pub enum VerifyError {
    /// Token header names any algorithm other than the approved one
    #[error("Algorithm rejected: {0}")]
    AlgorithmRejected(String),

    /// Signature does not verify against the sender's key
    #[error("Signature invalid")]
    SignatureInvalid,

    /// Claims violate the usage-report schema
    #[error("Claims schema violation: {0}")]
    ClaimsSchema(String),

    /// Token identifier was already accepted once
    #[error("Replay of token {0}")]
    Replay(String),

    /// Referenced reservation missing or not pending
    #[error("Reservation unknown or not pending: {0}")]
    ReservationUnknown(String),

    /// Claimed cost exceeds the reserved amount
    #[error("Overspend: claimed {claimed} exceeds reserved {reserved}")]
    Overspend {
        /// Claimed actual cost
        claimed: String,
        /// Currently reserved amount
        reserved: String,
    },

    /// Verification key could not be fetched
    #[error("Key fetch failed: {0}")]
    KeyFetchFailed(String),
}

impl VerifyError {
    /// Stable machine-readable code for callers
    pub fn code(&self) -> &'static str {
        match self {
            VerifyError::AlgorithmRejected(_) => "ALGORITHM_REJECTED",
            VerifyError::SignatureInvalid => "SIGNATURE_INVALID",
            VerifyError::ClaimsSchema(_) => "CLAIMS_SCHEMA",
            VerifyError::Replay(_) => "REPLAY",
            VerifyError::ReservationUnknown(_) => "RESERVATION_UNKNOWN",
            VerifyError::Overspend { .. } => "OVERSPEND",
            VerifyError::KeyFetchFailed(_) => "KEY_FETCH_FAILED",
        }
    }

    /// Retry classification
    pub fn class(&self) -> FailureClass {
        match self {
            VerifyError::KeyFetchFailed(_) => FailureClass::Transient,
            _ => FailureClass::Permanent,
        }
    }
}
