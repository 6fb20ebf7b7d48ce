//! Evaluators for the invariant catalogue
//!
//! Every check re-derives its property from the snapshot alone; none of
//! them trust the write path that was supposed to enforce it.

use crate::registry::{Enforcement, Invariant, InvariantKind, InvariantSpec, Universe, Verdict};
use chrono::Duration;
use credit_ledger::quarantine::{fingerprint, ParseFailure};
use credit_ledger::{EntryType, LedgerSnapshot, MicroCredits, ReservationStatus};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

pub(crate) fn all(liveness_grace_secs: i64) -> Vec<Box<dyn Invariant>> {
    vec![
        Box::new(LotConservation),
        Box::new(LotNonNegativity),
        Box::new(AccountNonNegativity),
        Box::new(AllocationSum),
        Box::new(LotReservedBacking),
        Box::new(TerminalClosure),
        Box::new(PendingLiveness {
            grace_secs: liveness_grace_secs,
        }),
        Box::new(TotalSupply),
        Box::new(AvailableReconstruction),
        Box::new(ReservedConsistency),
        Box::new(IdempotencyUniqueness),
        Box::new(EntrySeqDense),
        Box::new(QuarantineIntegrity),
        Box::new(TreasurySufficiency),
    ]
}

type Scope = (Uuid, String);

fn scope(account_id: Uuid, pool: &credit_ledger::PoolId) -> Scope {
    (account_id, pool.as_str().to_string())
}

fn add(
    map: &mut HashMap<Scope, MicroCredits>,
    key: Scope,
    amount: MicroCredits,
) -> Result<(), String> {
    let slot = map.entry(key).or_insert(MicroCredits::ZERO);
    *slot = slot.checked_add(amount).map_err(|e| e.to_string())?;
    Ok(())
}

fn verdict(result: Result<Vec<String>, String>) -> Verdict {
    match result {
        Ok(violations) => Verdict::from_violations(violations),
        Err(e) => Verdict::Error(e),
    }
}

// I-1

static SPEC_I1: InvariantSpec = InvariantSpec {
    id: "I-1",
    statement: "Every lot satisfies available + reserved + consumed == original",
    formal: "G. forall lot: lot.available + lot.reserved + lot.consumed = lot.original",
    kind: InvariantKind::Safety,
    universe: Universe::PerLot,
    enforcement: Enforcement::Both,
    failure_code: "LOT_CONSERVATION",
};

struct LotConservation;

impl Invariant for LotConservation {
    fn spec(&self) -> &'static InvariantSpec {
        &SPEC_I1
    }

    fn evaluate(&self, snapshot: &LedgerSnapshot) -> Verdict {
        let violations = snapshot
            .lots
            .iter()
            .filter(|lot| !lot.is_conserved())
            .map(|lot| format!("lot {}", lot.id))
            .collect();
        Verdict::from_violations(violations)
    }
}

// I-2

static SPEC_I2: InvariantSpec = InvariantSpec {
    id: "I-2",
    statement: "No lot quantity is ever negative",
    formal: "G. forall lot: min(available, reserved, consumed, original) >= 0",
    kind: InvariantKind::Safety,
    universe: Universe::PerLot,
    enforcement: Enforcement::Both,
    failure_code: "LOT_NEGATIVE",
};

struct LotNonNegativity;

impl Invariant for LotNonNegativity {
    fn spec(&self) -> &'static InvariantSpec {
        &SPEC_I2
    }

    fn evaluate(&self, snapshot: &LedgerSnapshot) -> Verdict {
        let violations = snapshot
            .lots
            .iter()
            .filter(|lot| {
                lot.available.is_negative()
                    || lot.reserved.is_negative()
                    || lot.consumed.is_negative()
                    || lot.original.is_negative()
            })
            .map(|lot| format!("lot {}", lot.id))
            .collect();
        Verdict::from_violations(violations)
    }
}

// I-3

static SPEC_I3: InvariantSpec = InvariantSpec {
    id: "I-3",
    statement: "Every account/pool available balance is non-negative",
    formal: "G. forall (account, pool): sum(lot.available) >= 0",
    kind: InvariantKind::Safety,
    universe: Universe::PerAccount,
    enforcement: Enforcement::Both,
    failure_code: "ACCOUNT_NEGATIVE",
};

struct AccountNonNegativity;

impl Invariant for AccountNonNegativity {
    fn spec(&self) -> &'static InvariantSpec {
        &SPEC_I3
    }

    fn evaluate(&self, snapshot: &LedgerSnapshot) -> Verdict {
        verdict((|| {
            let mut totals: HashMap<Scope, MicroCredits> = HashMap::new();
            for lot in &snapshot.lots {
                add(&mut totals, scope(lot.account_id, &lot.pool_id), lot.available)?;
            }
            Ok(totals
                .into_iter()
                .filter(|(_, total)| total.is_negative())
                .map(|((account, pool), total)| {
                    format!("account {} pool {} available {}", account, pool, total)
                })
                .collect())
        })())
    }
}

// I-4

static SPEC_I4: InvariantSpec = InvariantSpec {
    id: "I-4",
    statement: "A reservation's total equals the sum of its allocations",
    formal: "G. forall res: res.reserved = sum(res.allocations.amount)",
    kind: InvariantKind::Safety,
    universe: Universe::PerAccount,
    enforcement: Enforcement::WriteTime,
    failure_code: "ALLOCATION_SUM",
};

struct AllocationSum;

impl Invariant for AllocationSum {
    fn spec(&self) -> &'static InvariantSpec {
        &SPEC_I4
    }

    fn evaluate(&self, snapshot: &LedgerSnapshot) -> Verdict {
        verdict((|| {
            let mut violations = Vec::new();
            for res in &snapshot.reservations {
                let total = res.allocation_total().map_err(|e| e.to_string())?;
                if total != res.reserved {
                    violations.push(format!(
                        "reservation {} total {} allocations {}",
                        res.id, res.reserved, total
                    ));
                }
            }
            Ok(violations)
        })())
    }
}

// I-5

static SPEC_I5: InvariantSpec = InvariantSpec {
    id: "I-5",
    statement: "A lot's reserved equals the pending allocations held against it",
    formal: "G. forall lot: lot.reserved = sum(alloc.amount | alloc in pending reservations, alloc.lot = lot)",
    kind: InvariantKind::Safety,
    universe: Universe::CrossSystem,
    enforcement: Enforcement::Reconciliation,
    failure_code: "RESERVED_BACKING",
};

struct LotReservedBacking;

impl Invariant for LotReservedBacking {
    fn spec(&self) -> &'static InvariantSpec {
        &SPEC_I5
    }

    fn evaluate(&self, snapshot: &LedgerSnapshot) -> Verdict {
        verdict((|| {
            let mut held: HashMap<Uuid, MicroCredits> = HashMap::new();
            let known: HashSet<Uuid> = snapshot.lots.iter().map(|l| l.id).collect();
            let mut violations = Vec::new();

            for res in &snapshot.reservations {
                if res.status != ReservationStatus::Pending {
                    continue;
                }
                for alloc in &res.allocations {
                    if !known.contains(&alloc.lot_id) {
                        violations.push(format!(
                            "reservation {} allocates unknown lot {}",
                            res.id, alloc.lot_id
                        ));
                        continue;
                    }
                    let slot = held.entry(alloc.lot_id).or_insert(MicroCredits::ZERO);
                    *slot = slot.checked_add(alloc.amount).map_err(|e| e.to_string())?;
                }
            }

            for lot in &snapshot.lots {
                let expected = held.get(&lot.id).copied().unwrap_or(MicroCredits::ZERO);
                if lot.reserved != expected {
                    violations.push(format!(
                        "lot {} reserved {} but pending holds {}",
                        lot.id, lot.reserved, expected
                    ));
                }
            }
            Ok(violations)
        })())
    }
}

// I-6

static SPEC_I6: InvariantSpec = InvariantSpec {
    id: "I-6",
    statement: "Terminal reservations are closed exactly once and never reopen",
    formal: "G. res.status != pending <-> res.closed_at != null",
    kind: InvariantKind::Safety,
    universe: Universe::PerAccount,
    enforcement: Enforcement::WriteTime,
    failure_code: "TERMINAL_ABSORPTION",
};

struct TerminalClosure;

impl Invariant for TerminalClosure {
    fn spec(&self) -> &'static InvariantSpec {
        &SPEC_I6
    }

    fn evaluate(&self, snapshot: &LedgerSnapshot) -> Verdict {
        let violations = snapshot
            .reservations
            .iter()
            .filter(|res| res.is_terminal() != res.closed_at.is_some())
            .map(|res| format!("reservation {} status {:?}", res.id, res.status))
            .collect();
        Verdict::from_violations(violations)
    }
}

// I-7

static SPEC_I7: InvariantSpec = InvariantSpec {
    id: "I-7",
    statement: "Every pending reservation is swept shortly after its expiry",
    formal: "G. res.status = pending -> F(res.status != pending) within expires_at + grace",
    kind: InvariantKind::Liveness,
    universe: Universe::PerAccount,
    enforcement: Enforcement::Reconciliation,
    failure_code: "PENDING_STUCK",
};

struct PendingLiveness {
    grace_secs: i64,
}

impl Invariant for PendingLiveness {
    fn spec(&self) -> &'static InvariantSpec {
        &SPEC_I7
    }

    fn evaluate(&self, snapshot: &LedgerSnapshot) -> Verdict {
        let deadline = |res: &credit_ledger::Reservation| {
            res.expires_at + Duration::seconds(self.grace_secs)
        };
        let violations = snapshot
            .reservations
            .iter()
            .filter(|res| res.status == ReservationStatus::Pending && snapshot.taken_at > deadline(res))
            .map(|res| format!("reservation {} pending past {}", res.id, res.expires_at))
            .collect();
        Verdict::from_violations(violations)
    }
}

// I-8

static SPEC_I8: InvariantSpec = InvariantSpec {
    id: "I-8",
    statement: "Total lot supply reconstructs from supply-affecting entries",
    formal: "G. sum(lot.original) = sum(entry.amount | entry.type in {deposit, refund, revenue_share, transfer_in, transfer_out, clawback})",
    kind: InvariantKind::Safety,
    universe: Universe::PlatformWide,
    enforcement: Enforcement::Reconciliation,
    failure_code: "SUPPLY_DIVERGENCE",
};

struct TotalSupply;

impl Invariant for TotalSupply {
    fn spec(&self) -> &'static InvariantSpec {
        &SPEC_I8
    }

    fn evaluate(&self, snapshot: &LedgerSnapshot) -> Verdict {
        verdict((|| {
            let mut supply = MicroCredits::ZERO;
            for lot in &snapshot.lots {
                supply = supply.checked_add(lot.original).map_err(|e| e.to_string())?;
            }

            let mut minted = MicroCredits::ZERO;
            for entry in &snapshot.entries {
                let affects_supply = matches!(
                    entry.entry_type,
                    EntryType::Deposit
                        | EntryType::Refund
                        | EntryType::RevenueShare
                        | EntryType::TransferIn
                        | EntryType::TransferOut
                        | EntryType::Clawback
                );
                if affects_supply {
                    minted = minted.checked_add(entry.amount).map_err(|e| e.to_string())?;
                }
            }

            // Consumed value stays inside its lot's original, so the two
            // sums match exactly at every instant.
            if supply == minted {
                Ok(vec![])
            } else {
                Ok(vec![format!("lots hold {} but entries mint {}", supply, minted)])
            }
        })())
    }
}

// I-9

static SPEC_I9: InvariantSpec = InvariantSpec {
    id: "I-9",
    statement: "Available balance reconstructs from the entry prefix sum",
    formal: "G. forall (account, pool): sum(lot.available) = sum(entry.amount)",
    kind: InvariantKind::Safety,
    universe: Universe::CrossSystem,
    enforcement: Enforcement::Reconciliation,
    failure_code: "VIEW_DRIFT",
};

struct AvailableReconstruction;

impl Invariant for AvailableReconstruction {
    fn spec(&self) -> &'static InvariantSpec {
        &SPEC_I9
    }

    fn evaluate(&self, snapshot: &LedgerSnapshot) -> Verdict {
        verdict((|| {
            let mut from_lots: HashMap<Scope, MicroCredits> = HashMap::new();
            for lot in &snapshot.lots {
                add(&mut from_lots, scope(lot.account_id, &lot.pool_id), lot.available)?;
            }

            let mut from_entries: HashMap<Scope, MicroCredits> = HashMap::new();
            for entry in &snapshot.entries {
                add(
                    &mut from_entries,
                    scope(entry.account_id, &entry.pool_id),
                    entry.amount,
                )?;
            }

            let mut scopes: HashSet<Scope> = from_lots.keys().cloned().collect();
            scopes.extend(from_entries.keys().cloned());

            let mut violations = Vec::new();
            for key in scopes {
                let lots = from_lots.get(&key).copied().unwrap_or(MicroCredits::ZERO);
                let entries = from_entries.get(&key).copied().unwrap_or(MicroCredits::ZERO);
                if lots != entries {
                    violations.push(format!(
                        "account {} pool {}: lots say {}, log says {}",
                        key.0, key.1, lots, entries
                    ));
                }
            }
            Ok(violations)
        })())
    }
}

// I-10

static SPEC_I10: InvariantSpec = InvariantSpec {
    id: "I-10",
    statement: "Reserved balance matches the pending reservations",
    formal: "G. forall (account, pool): sum(lot.reserved) = sum(res.reserved | res.status = pending)",
    kind: InvariantKind::Safety,
    universe: Universe::PerAccount,
    enforcement: Enforcement::Reconciliation,
    failure_code: "RESERVED_DRIFT",
};

struct ReservedConsistency;

impl Invariant for ReservedConsistency {
    fn spec(&self) -> &'static InvariantSpec {
        &SPEC_I10
    }

    fn evaluate(&self, snapshot: &LedgerSnapshot) -> Verdict {
        verdict((|| {
            let mut from_lots: HashMap<Scope, MicroCredits> = HashMap::new();
            for lot in &snapshot.lots {
                add(&mut from_lots, scope(lot.account_id, &lot.pool_id), lot.reserved)?;
            }

            let mut from_res: HashMap<Scope, MicroCredits> = HashMap::new();
            for res in &snapshot.reservations {
                if res.status == ReservationStatus::Pending {
                    add(&mut from_res, scope(res.account_id, &res.pool_id), res.reserved)?;
                }
            }

            let mut scopes: HashSet<Scope> = from_lots.keys().cloned().collect();
            scopes.extend(from_res.keys().cloned());

            let mut violations = Vec::new();
            for key in scopes {
                let lots = from_lots.get(&key).copied().unwrap_or(MicroCredits::ZERO);
                let res = from_res.get(&key).copied().unwrap_or(MicroCredits::ZERO);
                if lots != res {
                    violations.push(format!(
                        "account {} pool {}: lots reserve {}, reservations hold {}",
                        key.0, key.1, lots, res
                    ));
                }
            }
            Ok(violations)
        })())
    }
}

// I-11

static SPEC_I11: InvariantSpec = InvariantSpec {
    id: "I-11",
    statement: "Idempotency keys are unique across all entries",
    formal: "G. forall e1 != e2: e1.idempotency_key != e2.idempotency_key",
    kind: InvariantKind::Safety,
    universe: Universe::PlatformWide,
    enforcement: Enforcement::WriteTime,
    failure_code: "IDEMPOTENCY_DUP",
};

struct IdempotencyUniqueness;

impl Invariant for IdempotencyUniqueness {
    fn spec(&self) -> &'static InvariantSpec {
        &SPEC_I11
    }

    fn evaluate(&self, snapshot: &LedgerSnapshot) -> Verdict {
        let mut seen = HashSet::new();
        let violations = snapshot
            .entries
            .iter()
            .filter(|entry| !seen.insert(entry.idempotency_key.as_str()))
            .map(|entry| format!("duplicate key {}", entry.idempotency_key))
            .collect();
        Verdict::from_violations(violations)
    }
}

// I-12

static SPEC_I12: InvariantSpec = InvariantSpec {
    id: "I-12",
    statement: "Entry sequences are dense and start at 1 per account/pool",
    formal: "G. forall (account, pool): sorted(entry.seq) = [1..n]",
    kind: InvariantKind::Safety,
    universe: Universe::PerAccount,
    enforcement: Enforcement::WriteTime,
    failure_code: "SEQ_GAP",
};

struct EntrySeqDense;

impl Invariant for EntrySeqDense {
    fn spec(&self) -> &'static InvariantSpec {
        &SPEC_I12
    }

    fn evaluate(&self, snapshot: &LedgerSnapshot) -> Verdict {
        let mut sequences: HashMap<Scope, Vec<u64>> = HashMap::new();
        for entry in &snapshot.entries {
            sequences
                .entry(scope(entry.account_id, &entry.pool_id))
                .or_default()
                .push(entry.entry_seq);
        }

        let mut violations = Vec::new();
        for ((account, pool), mut seqs) in sequences {
            seqs.sort_unstable();
            let dense = seqs.iter().enumerate().all(|(i, &s)| s == i as u64 + 1);
            if !dense {
                violations.push(format!("account {} pool {} sequence has gaps", account, pool));
            }
        }
        Verdict::from_violations(violations)
    }
}

// I-13

static SPEC_I13: InvariantSpec = InvariantSpec {
    id: "I-13",
    statement: "Quarantine fingerprints recompute from row content and never collide",
    formal: "G. forall q: q.fingerprint = blake3(q.table, q.row, q.raw, q.code), unique",
    kind: InvariantKind::Safety,
    universe: Universe::CrossSystem,
    enforcement: Enforcement::WriteTime,
    failure_code: "QUARANTINE_INTEGRITY",
};

struct QuarantineIntegrity;

impl Invariant for QuarantineIntegrity {
    fn spec(&self) -> &'static InvariantSpec {
        &SPEC_I13
    }

    fn evaluate(&self, snapshot: &LedgerSnapshot) -> Verdict {
        let mut seen = HashSet::new();
        let mut violations = Vec::new();
        for q in &snapshot.quarantine {
            let expected = fingerprint(&ParseFailure {
                original_row_id: q.original_row_id.clone(),
                table_name: q.table_name.clone(),
                raw_value: q.raw_value.clone(),
                context: q.context.clone(),
                error_code: q.error_code.clone(),
            });
            if expected != q.source_fingerprint {
                violations.push(format!("quarantine {} fingerprint mismatch", q.id));
            }
            if !seen.insert(q.source_fingerprint) {
                violations.push(format!("quarantine {} duplicate fingerprint", q.id));
            }
        }
        Verdict::from_violations(violations)
    }
}

// I-14

static SPEC_I14: InvariantSpec = InvariantSpec {
    id: "I-14",
    statement: "The treasury covers all outstanding debts",
    formal: "G. available(treasury) >= sum(debt.debt_micro)",
    kind: InvariantKind::Safety,
    universe: Universe::PlatformWide,
    enforcement: Enforcement::Reconciliation,
    failure_code: "TREASURY_SHORTFALL",
};

struct TreasurySufficiency;

impl Invariant for TreasurySufficiency {
    fn spec(&self) -> &'static InvariantSpec {
        &SPEC_I14
    }

    fn evaluate(&self, snapshot: &LedgerSnapshot) -> Verdict {
        verdict((|| {
            let treasury = snapshot.accounts.iter().find(|a| {
                a.entity_type == credit_ledger::EntityType::System && a.entity_id == "treasury"
            });
            // Vacuously true until a treasury account exists
            let Some(treasury) = treasury else {
                return Ok(vec![]);
            };

            let mut covered = MicroCredits::ZERO;
            for lot in snapshot.lots.iter().filter(|l| l.account_id == treasury.id) {
                covered = covered.checked_add(lot.available).map_err(|e| e.to_string())?;
            }

            let mut owed = MicroCredits::ZERO;
            for debt in &snapshot.debts {
                owed = owed.checked_add(debt.debt_micro).map_err(|e| e.to_string())?;
            }

            if covered >= owed {
                Ok(vec![])
            } else {
                Ok(vec![format!("treasury holds {} against {} owed", covered, owed)])
            }
        })())
    }
}
