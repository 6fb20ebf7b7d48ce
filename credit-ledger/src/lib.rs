//! CreditRail Ledger Core
//!
//! Lot-based credit ledger with exact micro-unit arithmetic and an
//! append-only double-entry log.
//!
//! # Architecture
//!
//! - **Log + materialized view**: the entry log is the system of record;
//!   lot and reservation rows are a derived projection updated in the same
//!   atomic commit as the log append
//! - **Single writer**: one actor task serializes every mutation
//! - **Exact arithmetic**: integer micro-credits, string-encoded at every
//!   boundary, checked operations only
//! - **Idempotency**: unique entry keys turn at-least-once delivery into
//!   at-most-once effect
//!
//! # Invariants
//!
//! - Per-lot conservation: available + reserved + consumed == original
//! - Reservations reach exactly one terminal state, then never change
//! - Transfers redistribute ownership, never mint or burn
//! - Entries are append-only, densely sequenced per account/pool

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

pub mod actor;
pub mod config;
pub mod error;
pub mod ledger;
pub mod metrics;
pub mod micro;
pub mod quarantine;
pub mod storage;
pub mod transfer;
pub mod types;

// Re-exports
pub use config::Config;
pub use error::{Error, Result};
pub use ledger::{CreditLedger, LedgerCore, MintOptions, TransferOptions};
pub use micro::{MicroCredits, MoneyError, MICRO_PER_CREDIT};
pub use storage::{LedgerSnapshot, Storage};
pub use types::{
    Account, AuditEvent, Balance, ClawbackOutcome, Debt, EntityType, EntryType, LedgerEntry, Lot,
    LotAllocation, PoolId, QuarantineEntry, Reservation, ReservationStatus, SourceType,
    TransferReceipt, TransferStatus,
};
