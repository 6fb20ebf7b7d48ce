//! CreditRail usage boundary
//!
//! The trust seam between the credit ledger and the independently-operated
//! execution service that reports actual usage cost. Inbound reports are
//! compact EdDSA-signed tokens; the verifier proves signature, schema,
//! freshness (replay protection), reservation status, and spend bound
//! before the cost is handed to the ledger's `finalize`.
//!
//! The two services share no mutable state: the replay store, reservation
//! lookup, and key registry are injected ports.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

pub mod claims;
pub mod error;
pub mod keys;
pub mod verifier;

// Re-exports
pub use claims::{SenderTrust, UsageClaims};
pub use error::{FailureClass, VerifyError};
pub use keys::{decoding_key, encoding_key, KeyProvider, StaticKeyProvider};
pub use verifier::{
    BoundaryVerifier, InMemoryReplayStore, LedgerReservationView, MicroReservations, ReplayStore,
    ReservationView, VerifiedUsage,
};
