//! Reconciliation service
//!
//! Re-derives every catalogued property from a storage snapshot and
//! reports pass/fail per check. Pure and read-only: safe to run on every
//! test assertion and on a schedule in production.

use crate::registry::{registry, Invariant, InvariantKind, Universe, Verdict};
use chrono::{DateTime, Utc};
use credit_ledger::{CreditLedger, LedgerSnapshot};
use serde::Serialize;

/// Overall reconciliation outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReconciliationStatus {
    /// Every check passed
    Passed,
    /// At least one property is violated
    DivergenceDetected,
    /// At least one evaluator failed to run
    Error,
}

/// Outcome of one catalogued check
#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    /// Property identifier
    pub id: &'static str,

    /// Code raised on violation
    pub failure_code: &'static str,

    /// Safety or liveness
    pub kind: InvariantKind,

    /// Quantification scope
    pub universe: Universe,

    /// Whether the property held
    pub passed: bool,

    /// One description per offending row/scope
    pub violations: Vec<String>,

    /// Evaluator failure, if the check could not run
    pub error: Option<String>,
}

/// Full reconciliation report
#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationReport {
    /// Overall outcome
    pub status: ReconciliationStatus,

    /// Per-check breakdown, in catalogue order
    pub checks: Vec<CheckResult>,

    /// When the evaluation ran
    pub ran_at: DateTime<Utc>,
}

impl ReconciliationReport {
    /// Failure codes of every violated or errored check
    pub fn failed_codes(&self) -> Vec<&'static str> {
        self.checks
            .iter()
            .filter(|c| !c.passed)
            .map(|c| c.failure_code)
            .collect()
    }
}

/// Periodic evaluator of the invariant catalogue
pub struct Reconciliation {
    invariants: Vec<Box<dyn Invariant>>,
}

impl Reconciliation {
    /// Catalogue with the default liveness grace (5 minutes)
    pub fn new() -> Self {
        Self::with_grace(300)
    }

    /// Catalogue with an explicit liveness grace for I-7
    pub fn with_grace(liveness_grace_secs: i64) -> Self {
        Self {
            invariants: registry(liveness_grace_secs),
        }
    }

    /// Evaluate every property against the snapshot
    pub fn run(&self, snapshot: &LedgerSnapshot) -> ReconciliationReport {
        let mut checks = Vec::with_capacity(self.invariants.len());
        let mut any_violation = false;
        let mut any_error = false;

        for invariant in &self.invariants {
            let spec = invariant.spec();
            let result = match invariant.evaluate(snapshot) {
                Verdict::Pass => CheckResult {
                    id: spec.id,
                    failure_code: spec.failure_code,
                    kind: spec.kind,
                    universe: spec.universe,
                    passed: true,
                    violations: vec![],
                    error: None,
                },
                Verdict::Violated(violations) => {
                    any_violation = true;
                    tracing::error!(
                        id = spec.id,
                        code = spec.failure_code,
                        count = violations.len(),
                        "Conservation property violated"
                    );
                    CheckResult {
                        id: spec.id,
                        failure_code: spec.failure_code,
                        kind: spec.kind,
                        universe: spec.universe,
                        passed: false,
                        violations,
                        error: None,
                    }
                }
                Verdict::Error(error) => {
                    any_error = true;
                    tracing::error!(id = spec.id, error = %error, "Conservation check failed to run");
                    CheckResult {
                        id: spec.id,
                        failure_code: spec.failure_code,
                        kind: spec.kind,
                        universe: spec.universe,
                        passed: false,
                        violations: vec![],
                        error: Some(error),
                    }
                }
            };
            checks.push(result);
        }

        let status = if any_error {
            ReconciliationStatus::Error
        } else if any_violation {
            ReconciliationStatus::DivergenceDetected
        } else {
            ReconciliationStatus::Passed
        };

        ReconciliationReport {
            status,
            checks,
            ran_at: Utc::now(),
        }
    }
}

impl Default for Reconciliation {
    fn default() -> Self {
        Self::new()
    }
}

/// Assert the books balance, panicking with the failing codes
///
/// Test helper: cheap enough to call after every mutation in a scenario.
pub fn assert_conservation(ledger: &CreditLedger) {
    let snapshot = ledger.snapshot().expect("snapshot failed");
    let report = Reconciliation::new().run(&snapshot);
    if report.status != ReconciliationStatus::Passed {
        let mut detail = String::new();
        for check in report.checks.iter().filter(|c| !c.passed) {
            detail.push_str(&format!(
                "\n  {} ({}): {:?} {:?}",
                check.id, check.failure_code, check.violations, check.error
            ));
        }
        panic!("conservation violated:{}", detail);
    }
}
