//! Core types for the credit ledger
//!
//! All types are designed for:
//! - Deterministic serialization (bincode)
//! - Memory safety (no unsafe code)
//! - Exact arithmetic (integer micro-credits for money)

use crate::micro::MicroCredits;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Kind of entity behind a monetary identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum EntityType {
    /// Human account
    Person = 1,
    /// Automated (agent) account
    Agent = 2,
    /// Shared community account
    Community = 3,
    /// Protocol-owned account
    Protocol = 4,
    /// Platform-internal account (treasury, fees)
    System = 5,
}

impl EntityType {
    /// Short tag used in index keys
    pub fn tag(&self) -> u8 {
        *self as u8
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EntityType::Person => "person",
            EntityType::Agent => "agent",
            EntityType::Community => "community",
            EntityType::Protocol => "protocol",
            EntityType::System => "system",
        };
        write!(f, "{}", s)
    }
}

/// Balance pool identifier within an account
///
/// Pools partition an account's lots (e.g. promotional vs. purchased
/// credit). Reservations and balances are always scoped to one pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PoolId(String);

impl PoolId {
    /// Create new pool ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for PoolId {
    fn default() -> Self {
        Self("general".to_string())
    }
}

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An opaque monetary identity
///
/// Created lazily on first use and never deleted; deactivation is a flag
/// by convention, not a row removal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    /// Account ID (UUIDv7 for time-ordering)
    pub id: Uuid,

    /// Kind of entity
    pub entity_type: EntityType,

    /// External entity identifier (platform user id, agent id, ...)
    pub entity_id: String,

    /// Active flag
    pub active: bool,

    /// Created timestamp
    pub created_at: DateTime<Utc>,
}

/// Origin of a lot's value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum SourceType {
    /// Direct deposit / purchase
    Deposit = 1,
    /// Received through a peer transfer
    TransferIn = 2,
    /// Token-bound-account deposit bridge
    TbaDeposit = 3,
    /// Refund of a prior spend
    Refund = 4,
    /// Platform revenue share payout
    RevenueShare = 5,
    /// Referral bonus grant
    ReferralBonus = 6,
}

impl SourceType {
    /// Parse from the stored string form
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "deposit" => Some(SourceType::Deposit),
            "transfer_in" => Some(SourceType::TransferIn),
            "tba_deposit" => Some(SourceType::TbaDeposit),
            "refund" => Some(SourceType::Refund),
            "revenue_share" => Some(SourceType::RevenueShare),
            "referral_bonus" => Some(SourceType::ReferralBonus),
            _ => None,
        }
    }

    /// Stored string form
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Deposit => "deposit",
            SourceType::TransferIn => "transfer_in",
            SourceType::TbaDeposit => "tba_deposit",
            SourceType::Refund => "refund",
            SourceType::RevenueShare => "revenue_share",
            SourceType::ReferralBonus => "referral_bonus",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The atomic unit of minted money
///
/// Per-lot conservation: `available + reserved + consumed == original`
/// after every mutation. `original` shrinks only on clawback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lot {
    /// Lot ID (UUIDv7)
    pub id: Uuid,

    /// Owning account
    pub account_id: Uuid,

    /// Pool this lot belongs to
    pub pool_id: PoolId,

    /// Minted amount
    pub original: MicroCredits,

    /// Spendable portion
    pub available: MicroCredits,

    /// Portion held by pending reservations
    pub reserved: MicroCredits,

    /// Portion converted to usage
    pub consumed: MicroCredits,

    /// Origin of the value
    pub source_type: SourceType,

    /// Origin reference (payment id, sender account, ...)
    pub source_id: String,

    /// Created timestamp
    pub created_at: DateTime<Utc>,
}

impl Lot {
    /// Verify per-lot conservation
    pub fn is_conserved(&self) -> bool {
        let sum = self
            .available
            .checked_add(self.reserved)
            .and_then(|s| s.checked_add(self.consumed));
        match sum {
            Ok(total) => {
                total == self.original
                    && !self.available.is_negative()
                    && !self.reserved.is_negative()
                    && !self.consumed.is_negative()
                    && !self.original.is_negative()
            }
            Err(_) => false,
        }
    }
}

/// Reservation lifecycle state
///
/// `Pending` is the only non-terminal state. Terminal states are
/// absorbing: no field on a terminal reservation changes again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ReservationStatus {
    /// Hold is active
    Pending = 1,
    /// Actual cost applied, surplus returned (terminal)
    Finalized = 2,
    /// Hold cancelled, funds returned (terminal)
    Released = 3,
    /// Hold timed out via sweep, funds returned (terminal)
    Expired = 4,
}

impl ReservationStatus {
    /// True for absorbing states
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReservationStatus::Pending)
    }
}

/// Portion of a reservation held against one lot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LotAllocation {
    /// Lot the hold is against
    pub lot_id: Uuid,

    /// Amount held from that lot
    pub amount: MicroCredits,
}

/// A temporary hold against one or more lots pending actual cost
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reservation {
    /// Reservation ID (UUIDv7)
    pub id: Uuid,

    /// Account the hold belongs to
    pub account_id: Uuid,

    /// Pool the hold draws from
    pub pool_id: PoolId,

    /// Total held amount (sum of allocations)
    pub reserved: MicroCredits,

    /// Lifecycle state
    pub status: ReservationStatus,

    /// Per-lot holds in allocation (oldest-lot-first) order
    pub allocations: Vec<LotAllocation>,

    /// Created timestamp
    pub created_at: DateTime<Utc>,

    /// Hard expiry for the pending state
    pub expires_at: DateTime<Utc>,

    /// Set exactly once, on transition to a terminal state
    pub closed_at: Option<DateTime<Utc>>,
}

impl Reservation {
    /// True once in an absorbing state
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Sum of allocation amounts
    pub fn allocation_total(&self) -> Result<MicroCredits, crate::micro::MoneyError> {
        let mut total = MicroCredits::ZERO;
        for alloc in &self.allocations {
            total = total.checked_add(alloc.amount)?;
        }
        Ok(total)
    }
}

/// Ledger entry type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum EntryType {
    /// Value minted into a lot
    Deposit = 1,
    /// Hold placed (amount is negative)
    Reservation = 2,
    /// Hold settled at actual cost (amount is the returned surplus)
    Finalize = 3,
    /// Hold released by the caller
    Release = 4,
    /// Hold released by the expiry sweep
    Expire = 5,
    /// Refund grant
    Refund = 6,
    /// Revenue share grant
    RevenueShare = 7,
    /// Value sent to a peer (amount is negative)
    TransferOut = 8,
    /// Value received from a peer
    TransferIn = 9,
    /// Reversal of a prior grant (amount is negative)
    Clawback = 10,
}

/// Append-only, immutable row recording one state change
///
/// `amount` is the signed delta this entry applied to the account/pool
/// *available* balance, so the available balance at any `entry_seq` is a
/// prefix sum. The unique `idempotency_key` makes the row itself the
/// idempotency record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Entry ID (UUIDv7)
    pub id: Uuid,

    /// Account the entry applies to
    pub account_id: Uuid,

    /// Pool the entry applies to
    pub pool_id: PoolId,

    /// Dense monotonic sequence per (account, pool), starting at 1
    pub entry_seq: u64,

    /// Entry type
    pub entry_type: EntryType,

    /// Signed delta to the available balance
    pub amount: MicroCredits,

    /// Unique idempotency key
    pub idempotency_key: String,

    /// Human-readable context
    pub description: String,

    /// Row that caused this entry (reservation id, payment id, ...)
    pub causation_id: Option<Uuid>,

    /// Created timestamp
    pub created_at: DateTime<Utc>,
}

/// Obligation created when a clawback reclaims already-consumed value
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Debt {
    /// Debt ID (UUIDv7)
    pub id: Uuid,

    /// Account owing the debt
    pub account_id: Uuid,

    /// Pool the clawback targeted
    pub pool_id: PoolId,

    /// Amount owed
    pub debt_micro: MicroCredits,

    /// Payment whose reversal produced the debt
    pub source_payment_id: String,

    /// Created timestamp
    pub created_at: DateTime<Utc>,
}

/// Dead-letter row for a monetary value that failed to parse
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuarantineEntry {
    /// Quarantine ID (UUIDv7)
    pub id: Uuid,

    /// Row the bad value came from
    pub original_row_id: String,

    /// Table the bad value came from
    pub table_name: String,

    /// The raw value as received
    pub raw_value: String,

    /// Where in the pipeline the failure occurred
    pub context: String,

    /// Machine code of the parse failure
    pub error_code: String,

    /// blake3 over (table, row id, raw value, error code); unique
    pub source_fingerprint: [u8; 32],

    /// Set once a replay succeeds
    pub replayed_at: Option<DateTime<Utc>>,

    /// Failed replay attempts so far
    pub replay_attempts: u32,

    /// Error from the most recent failed replay
    pub last_replay_error: Option<String>,

    /// Created timestamp
    pub created_at: DateTime<Utc>,
}

/// Read view of an account/pool balance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    /// Sum of lot available amounts
    pub available: MicroCredits,

    /// Sum of lot reserved amounts
    pub reserved: MicroCredits,
}

/// Opaque audit event dual-written with a primary mutation
///
/// Collaborators (settlement, referral adapters) attach these so their own
/// audit trail commits in the same atomic batch as the ledger mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Event ID (UUIDv7)
    pub id: Uuid,

    /// Collaborator-defined kind
    pub kind: String,

    /// Collaborator-defined payload (JSON)
    pub payload: String,

    /// Created timestamp
    pub created_at: DateTime<Utc>,
}

/// Transfer outcome status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferStatus {
    /// Funds moved
    Completed,
    /// Nothing mutated
    Rejected,
}

/// Result of a peer transfer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferReceipt {
    /// Outcome
    pub status: TransferStatus,

    /// Amount moved (zero on rejection)
    pub moved: MicroCredits,

    /// Receiver lot created (None on rejection)
    pub receiver_lot_id: Option<Uuid>,

    /// Rejection reason code (None on success)
    pub reason: Option<String>,
}

/// Result of a clawback
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClawbackOutcome {
    /// Unconsumed value removed from lots (original shrank by this)
    pub reclaimed: MicroCredits,

    /// Consumed value converted to a tracked obligation
    pub debt: Option<Debt>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lot(original: u64, available: u64, reserved: u64, consumed: u64) -> Lot {
        Lot {
            id: Uuid::now_v7(),
            account_id: Uuid::now_v7(),
            pool_id: PoolId::default(),
            original: MicroCredits::from_micro(original),
            available: MicroCredits::from_micro(available),
            reserved: MicroCredits::from_micro(reserved),
            consumed: MicroCredits::from_micro(consumed),
            source_type: SourceType::Deposit,
            source_id: "pay_1".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_lot_conservation() {
        assert!(lot(1_000_000, 700_000, 0, 300_000).is_conserved());
        assert!(!lot(1_000_000, 700_000, 100, 300_000).is_conserved());
    }

    #[test]
    fn test_reservation_terminal_states() {
        assert!(!ReservationStatus::Pending.is_terminal());
        assert!(ReservationStatus::Finalized.is_terminal());
        assert!(ReservationStatus::Released.is_terminal());
        assert!(ReservationStatus::Expired.is_terminal());
    }

    #[test]
    fn test_source_type_round_trip() {
        for st in [
            SourceType::Deposit,
            SourceType::TransferIn,
            SourceType::TbaDeposit,
            SourceType::Refund,
            SourceType::RevenueShare,
            SourceType::ReferralBonus,
        ] {
            assert_eq!(SourceType::from_str(st.as_str()), Some(st));
        }
        assert_eq!(SourceType::from_str("unknown"), None);
    }

    #[test]
    fn test_allocation_total() {
        let res = Reservation {
            id: Uuid::now_v7(),
            account_id: Uuid::now_v7(),
            pool_id: PoolId::default(),
            reserved: MicroCredits::from_micro(500_000),
            status: ReservationStatus::Pending,
            allocations: vec![
                LotAllocation {
                    lot_id: Uuid::now_v7(),
                    amount: MicroCredits::from_micro(400_000),
                },
                LotAllocation {
                    lot_id: Uuid::now_v7(),
                    amount: MicroCredits::from_micro(100_000),
                },
            ],
            created_at: Utc::now(),
            expires_at: Utc::now(),
            closed_at: None,
        };
        assert_eq!(res.allocation_total().unwrap(), res.reserved);
    }
}
