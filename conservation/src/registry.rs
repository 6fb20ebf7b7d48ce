//! Declarative invariant catalogue
//!
//! Each conservation property is metadata (id, kind, universe,
//! enforcement, failure code) separate from its evaluator. New properties
//! are additions to the catalogue, not edits to control flow.

use credit_ledger::LedgerSnapshot;
use serde::{Deserialize, Serialize};

/// Whether a property must hold at every instant or eventually
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvariantKind {
    /// Must never be violated at any instant
    Safety,
    /// Must eventually be satisfied
    Liveness,
}

/// The scope a property quantifies over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Universe {
    /// Every lot individually
    PerLot,
    /// Every account (or account/pool) individually
    PerAccount,
    /// Consistency between two row families
    CrossSystem,
    /// One global property of the whole ledger
    PlatformWide,
}

/// Where the property is enforced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Enforcement {
    /// Guarded by checks inside the write path
    WriteTime,
    /// Verified only by reconciliation scans
    Reconciliation,
    /// Both write-time guards and reconciliation
    Both,
}

/// Metadata for one conservation property
#[derive(Debug, Clone, Serialize)]
pub struct InvariantSpec {
    /// Identifier (`I-1` .. `I-14`)
    pub id: &'static str,

    /// One-line statement
    pub statement: &'static str,

    /// Temporal-logic-style formal description
    pub formal: &'static str,

    /// Safety or liveness
    pub kind: InvariantKind,

    /// Quantification scope
    pub universe: Universe,

    /// Enforcement mechanism
    pub enforcement: Enforcement,

    /// Machine-checkable code raised on violation
    pub failure_code: &'static str,
}

/// Outcome of evaluating one property against a snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Property holds
    Pass,
    /// Property violated; one description per offending row/scope
    Violated(Vec<String>),
    /// The evaluator itself failed (e.g. arithmetic overflow mid-scan)
    Error(String),
}

impl Verdict {
    /// Build a verdict from a list of violations
    pub fn from_violations(violations: Vec<String>) -> Self {
        if violations.is_empty() {
            Verdict::Pass
        } else {
            Verdict::Violated(violations)
        }
    }
}

/// A conservation property: static metadata plus an evaluator
pub trait Invariant: Send + Sync {
    /// The property's catalogue entry
    fn spec(&self) -> &'static InvariantSpec;

    /// Re-derive the property from a storage snapshot
    fn evaluate(&self, snapshot: &LedgerSnapshot) -> Verdict;
}

/// The full catalogue, in id order
///
/// `liveness_grace_secs` parameterizes I-7: how long past its expiry a
/// pending reservation may linger (waiting for the sweep) before it
/// counts as a liveness violation.
pub fn registry(liveness_grace_secs: i64) -> Vec<Box<dyn Invariant>> {
    crate::checks::all(liveness_grace_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalogue_is_complete_and_unique() {
        let invariants = registry(300);
        assert_eq!(invariants.len(), 14);

        let mut ids: Vec<&str> = invariants.iter().map(|i| i.spec().id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 14, "invariant ids must be unique");

        for inv in &invariants {
            let spec = inv.spec();
            assert!(spec.id.starts_with("I-"));
            assert!(!spec.statement.is_empty());
            assert!(!spec.formal.is_empty());
            assert!(!spec.failure_code.is_empty());
        }
    }

    #[test]
    fn test_catalogue_has_one_liveness_property() {
        let invariants = registry(300);
        let liveness: Vec<&str> = invariants
            .iter()
            .filter(|i| i.spec().kind == InvariantKind::Liveness)
            .map(|i| i.spec().id)
            .collect();
        assert_eq!(liveness, vec!["I-7"]);
    }

    #[test]
    fn test_verdict_from_violations() {
        assert_eq!(Verdict::from_violations(vec![]), Verdict::Pass);
        assert!(matches!(
            Verdict::from_violations(vec!["lot x".to_string()]),
            Verdict::Violated(_)
        ));
    }
}
