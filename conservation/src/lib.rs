//! CreditRail conservation engine
//!
//! A declarative catalogue of the ledger's safety and liveness properties
//! (`I-1` .. `I-14`) plus the reconciliation service that continuously
//! proves the books balance. Properties are data; evaluators re-derive
//! each one from a read-only storage snapshot, so a divergence anywhere in
//! the write path is caught on the next run rather than trusted away.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

pub mod checks;
pub mod reconcile;
pub mod registry;

// Re-exports
pub use reconcile::{
    assert_conservation, CheckResult, Reconciliation, ReconciliationReport, ReconciliationStatus,
};
pub use registry::{registry, Enforcement, Invariant, InvariantKind, InvariantSpec, Universe, Verdict};
