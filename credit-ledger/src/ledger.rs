//! Core ledger operations and the public facade
//!
//! [`LedgerCore`] holds the mutation logic. Every operation reads current
//! state, stages all row changes into one [`Commit`](crate::storage::Commit)
//! and applies it atomically; the single-writer actor guarantees no two
//! mutations interleave. [`CreditLedger`] is the async facade collaborators
//! call.
//!
//! # Example
//!
//! ```no_run
//! use credit_ledger::{Config, CreditLedger, EntityType, MicroCredits, SourceType};
//!
//! #[tokio::main]
//! async fn main() -> credit_ledger::Result<()> {
//!     let ledger = CreditLedger::open(Config::default()).await?;
//!
//!     let account = ledger.create_account(EntityType::Person, "user-1").await?;
//!     let lot = ledger
//!         .mint_lot(
//!             account.id,
//!             MicroCredits::from_credits(1),
//!             SourceType::Deposit,
//!             Default::default(),
//!         )
//!         .await?;
//!     println!("minted lot {}", lot.id);
//!     Ok(())
//! }
//! ```

use crate::{
    actor::{spawn_ledger_actor, LedgerHandle},
    metrics::Metrics,
    micro::MicroCredits,
    storage::{IdempotencyRecord, LedgerSnapshot, Storage},
    types::{
        Account, AuditEvent, Balance, ClawbackOutcome, Debt, EntityType, EntryType, LedgerEntry,
        Lot, LotAllocation, PoolId, QuarantineEntry, Reservation, ReservationStatus, SourceType,
        TransferReceipt,
    },
    Config, Error, Result,
};
use chrono::{Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;

/// Options for [`CreditLedger::mint_lot`]
#[derive(Debug, Clone, Default)]
pub struct MintOptions {
    /// Pool to mint into (defaults to the general pool)
    pub pool_id: Option<PoolId>,

    /// Origin reference (payment id, bridge event id, ...)
    pub source_id: Option<String>,

    /// Idempotency key; generated from the lot id when absent
    pub idempotency_key: Option<String>,

    /// Entry description
    pub description: Option<String>,

    /// Audit event to dual-write in the same commit
    pub audit: Option<AuditEvent>,
}

/// Options for [`CreditLedger::transfer`]
#[derive(Debug, Clone, Default)]
pub struct TransferOptions {
    /// Pool to move value within (defaults to the general pool)
    pub pool_id: Option<PoolId>,

    /// Idempotency key; generated when absent
    pub idempotency_key: Option<String>,

    /// Audit event to dual-write in the same commit
    pub audit: Option<AuditEvent>,
}

/// Mutation logic, executed only on the single-writer actor
pub struct LedgerCore {
    storage: Arc<Storage>,
    config: Config,
}

impl LedgerCore {
    /// Create the core around opened storage
    pub fn new(storage: Arc<Storage>, config: Config) -> Self {
        Self { storage, config }
    }

    /// Shared storage handle
    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    /// Configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Idempotent account creation keyed on (entity_type, entity_id)
    pub fn create_account(&self, entity_type: EntityType, entity_id: &str) -> Result<Account> {
        if entity_id.is_empty() {
            return Err(Error::InvalidInput("entity_id must not be empty".to_string()));
        }

        if let Some(existing) = self.storage.find_account(entity_type, entity_id)? {
            return Ok(existing);
        }

        let account = Account {
            id: Uuid::now_v7(),
            entity_type,
            entity_id: entity_id.to_string(),
            active: true,
            created_at: Utc::now(),
        };

        let mut commit = self.storage.begin();
        commit.put_account(&account)?;
        commit.commit()?;

        tracing::info!(account_id = %account.id, entity_type = %entity_type, "Account created");
        Ok(account)
    }

    /// Mint a new lot and its deposit entry in one atomic commit
    pub fn mint_lot(
        &self,
        account_id: Uuid,
        amount: MicroCredits,
        source_type: SourceType,
        opts: MintOptions,
    ) -> Result<Lot> {
        amount.require_positive()?;
        self.storage.get_account(account_id)?;

        let lot_id = Uuid::now_v7();
        let idempotency_key = opts
            .idempotency_key
            .unwrap_or_else(|| format!("mint:{}", lot_id));

        // The entry row is the idempotency record: a repeat returns the
        // original lot without minting again.
        match self.storage.get_idempotency(&idempotency_key)? {
            Some(IdempotencyRecord::Mint { lot_key }) => {
                tracing::debug!(key = %idempotency_key, "Mint replayed, returning original lot");
                return self.storage.get_lot_at(&lot_key);
            }
            Some(_) => {
                return Err(Error::InvalidInput(format!(
                    "Idempotency key {} was used by a different operation",
                    idempotency_key
                )));
            }
            None => {}
        }

        let pool_id = opts.pool_id.unwrap_or_default();
        let now = Utc::now();

        let lot = Lot {
            id: lot_id,
            account_id,
            pool_id: pool_id.clone(),
            original: amount,
            available: amount,
            reserved: MicroCredits::ZERO,
            consumed: MicroCredits::ZERO,
            source_type,
            source_id: opts.source_id.unwrap_or_default(),
            created_at: now,
        };

        let entry = LedgerEntry {
            id: Uuid::now_v7(),
            account_id,
            pool_id: pool_id.clone(),
            entry_seq: self.storage.next_entry_seq(account_id, &pool_id)?,
            entry_type: entry_type_for_mint(source_type),
            amount,
            idempotency_key: idempotency_key.clone(),
            description: opts
                .description
                .unwrap_or_else(|| format!("mint {}", source_type)),
            causation_id: Some(lot_id),
            created_at: now,
        };

        let mut commit = self.storage.begin();
        commit.put_lot(&lot)?;
        commit.append_entry(&entry)?;
        commit.put_idempotency(
            &idempotency_key,
            &IdempotencyRecord::Mint {
                lot_key: Storage::lot_key(&lot),
            },
        )?;
        if let Some(audit) = &opts.audit {
            commit.put_audit(audit)?;
        }
        commit.commit()?;

        tracing::info!(
            lot_id = %lot.id,
            account_id = %account_id,
            amount = %amount,
            source_type = %source_type,
            "Lot minted"
        );
        Ok(lot)
    }

    /// Place a hold across the account/pool's lots, oldest-first
    pub fn reserve(
        &self,
        account_id: Uuid,
        pool_id: &PoolId,
        amount: MicroCredits,
    ) -> Result<Reservation> {
        amount.require_positive()?;

        let lots = self.storage.lots_for(account_id, pool_id)?;
        let mut total_available = MicroCredits::ZERO;
        for lot in &lots {
            total_available = total_available.checked_add(lot.available)?;
        }
        if total_available < amount {
            return Err(Error::InsufficientBalance {
                requested: amount.to_string(),
                available: total_available.to_string(),
            });
        }

        let now = Utc::now();
        let reservation_id = Uuid::now_v7();
        let mut remaining = amount;
        let mut allocations = Vec::new();
        let mut touched = Vec::new();

        for mut lot in lots {
            if remaining.is_zero() {
                break;
            }
            if !lot.available.is_positive() {
                continue;
            }
            let take = lot.available.min(remaining);
            lot.available = lot.available.checked_sub(take)?;
            lot.reserved = lot.reserved.checked_add(take)?;
            remaining = remaining.checked_sub(take)?;
            allocations.push(LotAllocation {
                lot_id: lot.id,
                amount: take,
            });
            touched.push(lot);
        }
        debug_assert!(remaining.is_zero());

        let reservation = Reservation {
            id: reservation_id,
            account_id,
            pool_id: pool_id.clone(),
            reserved: amount,
            status: ReservationStatus::Pending,
            allocations,
            created_at: now,
            expires_at: now + Duration::seconds(self.config.reservation.default_ttl_secs as i64),
            closed_at: None,
        };

        let entry = LedgerEntry {
            id: Uuid::now_v7(),
            account_id,
            pool_id: pool_id.clone(),
            entry_seq: self.storage.next_entry_seq(account_id, pool_id)?,
            entry_type: EntryType::Reservation,
            amount: -amount,
            idempotency_key: format!("reserve:{}", reservation_id),
            description: format!("hold {} across {} lots", amount, reservation.allocations.len()),
            causation_id: Some(reservation_id),
            created_at: now,
        };

        let mut commit = self.storage.begin();
        for lot in &touched {
            commit.put_lot(lot)?;
        }
        commit.put_reservation(&reservation)?;
        commit.append_entry(&entry)?;
        commit.commit()?;

        tracing::info!(
            reservation_id = %reservation_id,
            account_id = %account_id,
            amount = %amount,
            "Reservation placed"
        );
        Ok(reservation)
    }

    /// Settle a pending reservation at its actual cost
    ///
    /// Moves `actual_cost` from reserved to consumed across the
    /// reservation's allocations in order, returns the surplus to
    /// available, and transitions to `Finalized`. Overspend is rejected,
    /// never clamped.
    pub fn finalize(&self, reservation_id: Uuid, actual_cost: MicroCredits) -> Result<()> {
        actual_cost.require_non_negative()?;

        let mut reservation = self.storage.get_reservation(reservation_id)?;
        if reservation.is_terminal() {
            return Err(Error::TerminalReservation(reservation_id.to_string()));
        }
        if actual_cost > reservation.reserved {
            return Err(Error::Overspend {
                actual: actual_cost.to_string(),
                reserved: reservation.reserved.to_string(),
            });
        }

        let now = Utc::now();
        let mut remaining = actual_cost;
        let mut touched = Vec::new();

        for alloc in &reservation.allocations {
            let mut lot = self.storage.get_lot(alloc.lot_id)?;
            let consume = alloc.amount.min(remaining);
            let surplus = alloc.amount.checked_sub(consume)?;

            lot.reserved = lot.reserved.checked_sub(alloc.amount)?;
            lot.consumed = lot.consumed.checked_add(consume)?;
            lot.available = lot.available.checked_add(surplus)?;
            remaining = remaining.checked_sub(consume)?;

            if !lot.is_conserved() {
                return Err(Error::InvariantViolation(format!(
                    "Lot {} lost conservation during finalize",
                    lot.id
                )));
            }
            touched.push(lot);
        }
        debug_assert!(remaining.is_zero());

        let surplus_total = reservation.reserved.checked_sub(actual_cost)?;
        reservation.status = ReservationStatus::Finalized;
        reservation.closed_at = Some(now);

        let entry = LedgerEntry {
            id: Uuid::now_v7(),
            account_id: reservation.account_id,
            pool_id: reservation.pool_id.clone(),
            entry_seq: self
                .storage
                .next_entry_seq(reservation.account_id, &reservation.pool_id)?,
            entry_type: EntryType::Finalize,
            amount: surplus_total,
            idempotency_key: format!("finalize:{}", reservation_id),
            description: format!("finalize actual={}", actual_cost),
            causation_id: Some(reservation_id),
            created_at: now,
        };

        let mut commit = self.storage.begin();
        for lot in &touched {
            commit.put_lot(lot)?;
        }
        commit.put_reservation(&reservation)?;
        commit.append_entry(&entry)?;
        commit.commit()?;

        tracing::info!(
            reservation_id = %reservation_id,
            actual_cost = %actual_cost,
            surplus = %surplus_total,
            "Reservation finalized"
        );
        Ok(())
    }

    /// Return a pending hold to available
    ///
    /// `as_expiry` distinguishes the sweep (idempotent, skips terminal
    /// rows) from the public call (terminal rows are an error).
    pub fn release(&self, reservation_id: Uuid, as_expiry: bool) -> Result<()> {
        let mut reservation = self.storage.get_reservation(reservation_id)?;
        if reservation.is_terminal() {
            if as_expiry {
                return Ok(());
            }
            return Err(Error::TerminalReservation(reservation_id.to_string()));
        }

        let now = Utc::now();
        let mut touched = Vec::new();
        for alloc in &reservation.allocations {
            let mut lot = self.storage.get_lot(alloc.lot_id)?;
            lot.reserved = lot.reserved.checked_sub(alloc.amount)?;
            lot.available = lot.available.checked_add(alloc.amount)?;
            if !lot.is_conserved() {
                return Err(Error::InvariantViolation(format!(
                    "Lot {} lost conservation during release",
                    lot.id
                )));
            }
            touched.push(lot);
        }

        let (status, entry_type, verb) = if as_expiry {
            (ReservationStatus::Expired, EntryType::Expire, "expire")
        } else {
            (ReservationStatus::Released, EntryType::Release, "release")
        };
        reservation.status = status;
        reservation.closed_at = Some(now);

        let entry = LedgerEntry {
            id: Uuid::now_v7(),
            account_id: reservation.account_id,
            pool_id: reservation.pool_id.clone(),
            entry_seq: self
                .storage
                .next_entry_seq(reservation.account_id, &reservation.pool_id)?,
            entry_type,
            amount: reservation.reserved,
            idempotency_key: format!("{}:{}", verb, reservation_id),
            description: format!("{} hold {}", verb, reservation.reserved),
            causation_id: Some(reservation_id),
            created_at: now,
        };

        let mut commit = self.storage.begin();
        for lot in &touched {
            commit.put_lot(lot)?;
        }
        commit.put_reservation(&reservation)?;
        commit.append_entry(&entry)?;
        commit.commit()?;

        tracing::info!(reservation_id = %reservation_id, expired = as_expiry, "Reservation released");
        Ok(())
    }

    /// Expire pending reservations past their deadline
    ///
    /// Time-based sweep, idempotent: terminal rows and future holds are
    /// skipped. Each expiry is its own atomic commit.
    pub fn sweep_expired(&self, now: chrono::DateTime<Utc>) -> Result<Vec<Uuid>> {
        let candidates = self.storage.expired_pending(now)?;
        let mut expired = Vec::new();
        for reservation_id in candidates {
            let reservation = self.storage.get_reservation(reservation_id)?;
            if reservation.is_terminal() || reservation.expires_at > now {
                continue;
            }
            self.release(reservation_id, true)?;
            expired.push(reservation_id);
        }
        if !expired.is_empty() {
            tracing::info!(count = expired.len(), "Expiry sweep released holds");
        }
        Ok(expired)
    }

    /// Reverse a prior grant
    ///
    /// Removes the unconsumed remainder of the grant's lots from
    /// circulation (their `original` shrinks) and records any
    /// already-consumed portion as a [`Debt`].
    pub fn clawback(
        &self,
        account_id: Uuid,
        pool_id: &PoolId,
        source_id: &str,
        amount: MicroCredits,
    ) -> Result<ClawbackOutcome> {
        amount.require_positive()?;

        let now = Utc::now();
        let mut remaining = amount;
        let mut reclaimed = MicroCredits::ZERO;
        let mut touched = Vec::new();

        for mut lot in self.storage.lots_for(account_id, pool_id)? {
            if remaining.is_zero() {
                break;
            }
            if lot.source_id != source_id || !lot.available.is_positive() {
                continue;
            }
            let take = lot.available.min(remaining);
            lot.available = lot.available.checked_sub(take)?;
            lot.original = lot.original.checked_sub(take)?;
            remaining = remaining.checked_sub(take)?;
            reclaimed = reclaimed.checked_add(take)?;
            if !lot.is_conserved() {
                return Err(Error::InvariantViolation(format!(
                    "Lot {} lost conservation during clawback",
                    lot.id
                )));
            }
            touched.push(lot);
        }

        let debt = if remaining.is_positive() {
            Some(Debt {
                id: Uuid::now_v7(),
                account_id,
                pool_id: pool_id.clone(),
                debt_micro: remaining,
                source_payment_id: source_id.to_string(),
                created_at: now,
            })
        } else {
            None
        };

        let entry = LedgerEntry {
            id: Uuid::now_v7(),
            account_id,
            pool_id: pool_id.clone(),
            entry_seq: self.storage.next_entry_seq(account_id, pool_id)?,
            entry_type: EntryType::Clawback,
            amount: -reclaimed,
            idempotency_key: format!("clawback:{}:{}", source_id, Uuid::now_v7()),
            description: format!("clawback {} (debt {})", reclaimed, remaining),
            causation_id: None,
            created_at: now,
        };

        let mut commit = self.storage.begin();
        for lot in &touched {
            commit.put_lot(lot)?;
        }
        if let Some(debt) = &debt {
            commit.put_debt(debt)?;
        }
        commit.append_entry(&entry)?;
        commit.commit()?;

        tracing::info!(
            account_id = %account_id,
            source_id = %source_id,
            reclaimed = %reclaimed,
            debt = %remaining,
            "Clawback applied"
        );
        Ok(ClawbackOutcome { reclaimed, debt })
    }
}

fn entry_type_for_mint(source_type: SourceType) -> EntryType {
    match source_type {
        SourceType::Deposit | SourceType::TbaDeposit | SourceType::ReferralBonus => {
            EntryType::Deposit
        }
        SourceType::Refund => EntryType::Refund,
        SourceType::RevenueShare => EntryType::RevenueShare,
        SourceType::TransferIn => EntryType::TransferIn,
    }
}

/// Main ledger interface
///
/// Mutations are serialized through the single-writer actor; reads go
/// straight to storage and only ever observe committed batches.
pub struct CreditLedger {
    /// Actor handle for mutations
    handle: LedgerHandle,

    /// Direct storage access (for reads)
    storage: Arc<Storage>,

    /// Prometheus metrics
    metrics: Metrics,

    /// Configuration
    config: Config,
}

impl CreditLedger {
    /// Open ledger with configuration
    pub async fn open(config: Config) -> Result<Self> {
        let storage = Arc::new(Storage::open(&config)?);
        let core = LedgerCore::new(storage.clone(), config.clone());
        let handle = spawn_ledger_actor(core);
        let metrics = Metrics::new()
            .map_err(|e| Error::Config(format!("Failed to register metrics: {}", e)))?;

        Ok(Self {
            handle,
            storage,
            metrics,
            config,
        })
    }

    /// Configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Metrics registry
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Idempotent account creation
    pub async fn create_account(
        &self,
        entity_type: EntityType,
        entity_id: impl Into<String>,
    ) -> Result<Account> {
        self.handle.create_account(entity_type, entity_id.into()).await
    }

    /// Mint a new lot
    pub async fn mint_lot(
        &self,
        account_id: Uuid,
        amount: MicroCredits,
        source_type: SourceType,
        opts: MintOptions,
    ) -> Result<Lot> {
        let lot = self
            .handle
            .mint_lot(account_id, amount, source_type, opts)
            .await?;
        self.metrics.record_mint();
        Ok(lot)
    }

    /// Place a hold
    pub async fn reserve(
        &self,
        account_id: Uuid,
        pool_id: PoolId,
        amount: MicroCredits,
    ) -> Result<Reservation> {
        let reservation = self.handle.reserve(account_id, pool_id, amount).await?;
        self.metrics.record_reserve();
        Ok(reservation)
    }

    /// Settle a hold at its actual cost
    pub async fn finalize(&self, reservation_id: Uuid, actual_cost: MicroCredits) -> Result<()> {
        self.handle.finalize(reservation_id, actual_cost).await?;
        self.metrics.record_finalize();
        Ok(())
    }

    /// Cancel a pending hold
    pub async fn release(&self, reservation_id: Uuid) -> Result<()> {
        self.handle.release(reservation_id).await?;
        self.metrics.record_release();
        Ok(())
    }

    /// Reverse a prior grant
    pub async fn clawback(
        &self,
        account_id: Uuid,
        pool_id: PoolId,
        source_id: impl Into<String>,
        amount: MicroCredits,
    ) -> Result<ClawbackOutcome> {
        self.handle
            .clawback(account_id, pool_id, source_id.into(), amount)
            .await
    }

    /// Move value between two accounts
    pub async fn transfer(
        &self,
        from_account_id: Uuid,
        to_account_id: Uuid,
        amount: MicroCredits,
        opts: TransferOptions,
    ) -> Result<TransferReceipt> {
        let receipt = self
            .handle
            .transfer(from_account_id, to_account_id, amount, opts)
            .await?;
        self.metrics.record_transfer(&receipt);
        Ok(receipt)
    }

    /// Expire pending reservations past their deadline
    pub async fn sweep_expired(&self) -> Result<Vec<Uuid>> {
        self.handle.sweep_expired(Utc::now()).await
    }

    /// Current balance for an account/pool (pure read)
    pub fn get_balance(&self, account_id: Uuid, pool_id: &PoolId) -> Result<Balance> {
        self.storage.balance(account_id, pool_id)
    }

    /// Get account by ID
    pub fn get_account(&self, account_id: Uuid) -> Result<Account> {
        self.storage.get_account(account_id)
    }

    /// Get reservation by ID
    pub fn get_reservation(&self, reservation_id: Uuid) -> Result<Reservation> {
        self.storage.get_reservation(reservation_id)
    }

    /// Audit log for an account/pool, in sequence order
    pub fn entries(&self, account_id: Uuid, pool_id: &PoolId) -> Result<Vec<LedgerEntry>> {
        self.storage.entries_for(account_id, pool_id)
    }

    /// Read-only export for reconciliation
    pub fn snapshot(&self) -> Result<LedgerSnapshot> {
        self.storage.snapshot()
    }

    /// Look up a dual-written audit event
    pub fn audit_event(&self, event_id: Uuid) -> Result<Option<AuditEvent>> {
        self.storage.get_audit(event_id)
    }

    /// Quarantine a monetary value that failed to parse
    pub async fn quarantine_parse_failure(
        &self,
        failure: crate::quarantine::ParseFailure,
    ) -> Result<bool> {
        let inserted = self.handle.quarantine(failure).await?;
        if inserted {
            self.metrics.record_quarantine();
        }
        Ok(inserted)
    }

    /// Quarantine rows not yet replayed
    pub fn unreplayed_quarantine(&self) -> Result<Vec<QuarantineEntry>> {
        let mut rows: Vec<QuarantineEntry> = self
            .storage
            .quarantine_scan()?
            .into_iter()
            .filter(|e| e.replayed_at.is_none())
            .collect();
        rows.sort_by_key(|e| e.created_at);
        Ok(rows)
    }

    /// Mark a quarantine row successfully replayed
    pub async fn mark_replayed(&self, quarantine_id: Uuid) -> Result<()> {
        self.handle.mark_replayed(quarantine_id).await
    }

    /// Record a failed replay attempt
    pub async fn record_replay_failure(
        &self,
        quarantine_id: Uuid,
        error: impl Into<String>,
    ) -> Result<()> {
        self.handle
            .record_replay_failure(quarantine_id, error.into())
            .await
    }

    /// Purge replayed quarantine rows older than the retention window
    pub async fn purge_quarantine(&self, retention_days: i64) -> Result<u64> {
        self.handle.purge_quarantine(retention_days).await
    }

    /// Shutdown ledger
    pub async fn shutdown(self) -> Result<()> {
        self.handle.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn create_test_ledger() -> (CreditLedger, tempfile::TempDir) {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        (CreditLedger::open(config).await.unwrap(), temp_dir)
    }

    async fn funded_account(ledger: &CreditLedger, micro: u64) -> Uuid {
        let account = ledger
            .create_account(EntityType::Person, Uuid::now_v7().to_string())
            .await
            .unwrap();
        ledger
            .mint_lot(
                account.id,
                MicroCredits::from_micro(micro),
                SourceType::Deposit,
                MintOptions::default(),
            )
            .await
            .unwrap();
        account.id
    }

    #[tokio::test]
    async fn test_create_account_idempotent() {
        let (ledger, _temp) = create_test_ledger().await;

        let a = ledger
            .create_account(EntityType::Agent, "agent-1")
            .await
            .unwrap();
        let b = ledger
            .create_account(EntityType::Agent, "agent-1")
            .await
            .unwrap();
        assert_eq!(a.id, b.id);

        // Same entity_id under a different entity type is a new identity
        let c = ledger
            .create_account(EntityType::Person, "agent-1")
            .await
            .unwrap();
        assert_ne!(a.id, c.id);

        ledger.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_mint_idempotency_key() {
        let (ledger, _temp) = create_test_ledger().await;
        let account = ledger
            .create_account(EntityType::Person, "user-1")
            .await
            .unwrap();

        let opts = MintOptions {
            idempotency_key: Some("pay_123".to_string()),
            ..Default::default()
        };
        let first = ledger
            .mint_lot(
                account.id,
                MicroCredits::from_micro(1_000_000),
                SourceType::Deposit,
                opts.clone(),
            )
            .await
            .unwrap();
        let second = ledger
            .mint_lot(
                account.id,
                MicroCredits::from_micro(1_000_000),
                SourceType::Deposit,
                opts,
            )
            .await
            .unwrap();

        assert_eq!(first.id, second.id);

        // Exactly one lot and one entry exist
        let balance = ledger.get_balance(account.id, &PoolId::default()).unwrap();
        assert_eq!(balance.available, MicroCredits::from_micro(1_000_000));
        let entries = ledger.entries(account.id, &PoolId::default()).unwrap();
        assert_eq!(entries.len(), 1);

        ledger.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_mint_rejects_non_positive() {
        let (ledger, _temp) = create_test_ledger().await;
        let account = ledger
            .create_account(EntityType::Person, "user-1")
            .await
            .unwrap();

        let result = ledger
            .mint_lot(
                account.id,
                MicroCredits::ZERO,
                SourceType::Deposit,
                MintOptions::default(),
            )
            .await;
        assert_eq!(result.unwrap_err().code(), "AMOUNT_NEGATIVE");

        ledger.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_reserve_finalize_lifecycle() {
        let (ledger, _temp) = create_test_ledger().await;
        let account_id = funded_account(&ledger, 1_000_000).await;
        let pool = PoolId::default();

        let reservation = ledger
            .reserve(account_id, pool.clone(), MicroCredits::from_micro(500_000))
            .await
            .unwrap();

        let balance = ledger.get_balance(account_id, &pool).unwrap();
        assert_eq!(balance.available, MicroCredits::from_micro(500_000));
        assert_eq!(balance.reserved, MicroCredits::from_micro(500_000));

        ledger
            .finalize(reservation.id, MicroCredits::from_micro(300_000))
            .await
            .unwrap();

        // available=700_000, reserved=0, consumed=300_000
        let balance = ledger.get_balance(account_id, &pool).unwrap();
        assert_eq!(balance.available, MicroCredits::from_micro(700_000));
        assert_eq!(balance.reserved, MicroCredits::ZERO);

        let reservation = ledger.get_reservation(reservation.id).unwrap();
        assert_eq!(reservation.status, ReservationStatus::Finalized);
        assert!(reservation.closed_at.is_some());

        ledger.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_reserve_insufficient_balance_mutates_nothing() {
        let (ledger, _temp) = create_test_ledger().await;
        let account_id = funded_account(&ledger, 100).await;
        let pool = PoolId::default();

        let result = ledger
            .reserve(account_id, pool.clone(), MicroCredits::from_micro(200))
            .await;
        assert_eq!(result.unwrap_err().code(), "INSUFFICIENT_BALANCE");

        let balance = ledger.get_balance(account_id, &pool).unwrap();
        assert_eq!(balance.available, MicroCredits::from_micro(100));
        assert_eq!(balance.reserved, MicroCredits::ZERO);

        ledger.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_finalize_overspend_rejected_without_effect() {
        let (ledger, _temp) = create_test_ledger().await;
        let account_id = funded_account(&ledger, 1_000_000).await;
        let pool = PoolId::default();

        let reservation = ledger
            .reserve(account_id, pool.clone(), MicroCredits::from_micro(500_000))
            .await
            .unwrap();

        let result = ledger
            .finalize(reservation.id, MicroCredits::from_micro(999_999_999))
            .await;
        assert_eq!(result.unwrap_err().code(), "OVERSPEND");

        // Lot state unchanged: available=500_000, reserved=500_000
        let balance = ledger.get_balance(account_id, &pool).unwrap();
        assert_eq!(balance.available, MicroCredits::from_micro(500_000));
        assert_eq!(balance.reserved, MicroCredits::from_micro(500_000));
        assert_eq!(
            ledger.get_reservation(reservation.id).unwrap().status,
            ReservationStatus::Pending
        );

        ledger.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_terminal_reservation_absorbing() {
        let (ledger, _temp) = create_test_ledger().await;
        let account_id = funded_account(&ledger, 1_000_000).await;

        let reservation = ledger
            .reserve(
                account_id,
                PoolId::default(),
                MicroCredits::from_micro(400_000),
            )
            .await
            .unwrap();
        ledger
            .finalize(reservation.id, MicroCredits::from_micro(400_000))
            .await
            .unwrap();

        let err = ledger
            .finalize(reservation.id, MicroCredits::from_micro(1))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "TERMINAL_RESERVATION");

        let err = ledger.release(reservation.id).await.unwrap_err();
        assert_eq!(err.code(), "TERMINAL_RESERVATION");

        ledger.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_release_returns_hold() {
        let (ledger, _temp) = create_test_ledger().await;
        let account_id = funded_account(&ledger, 1_000_000).await;
        let pool = PoolId::default();

        let reservation = ledger
            .reserve(account_id, pool.clone(), MicroCredits::from_micro(600_000))
            .await
            .unwrap();
        ledger.release(reservation.id).await.unwrap();

        let balance = ledger.get_balance(account_id, &pool).unwrap();
        assert_eq!(balance.available, MicroCredits::from_micro(1_000_000));
        assert_eq!(balance.reserved, MicroCredits::ZERO);
        assert_eq!(
            ledger.get_reservation(reservation.id).unwrap().status,
            ReservationStatus::Released
        );

        ledger.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_reserve_spans_lots_oldest_first() {
        let (ledger, _temp) = create_test_ledger().await;
        let account = ledger
            .create_account(EntityType::Person, "user-1")
            .await
            .unwrap();

        let first = ledger
            .mint_lot(
                account.id,
                MicroCredits::from_micro(300),
                SourceType::Deposit,
                MintOptions::default(),
            )
            .await
            .unwrap();
        let second = ledger
            .mint_lot(
                account.id,
                MicroCredits::from_micro(300),
                SourceType::Deposit,
                MintOptions::default(),
            )
            .await
            .unwrap();

        let reservation = ledger
            .reserve(account.id, PoolId::default(), MicroCredits::from_micro(400))
            .await
            .unwrap();

        // Oldest lot drained first, newer lot covers the remainder
        assert_eq!(reservation.allocations.len(), 2);
        assert_eq!(reservation.allocations[0].lot_id, first.id);
        assert_eq!(
            reservation.allocations[0].amount,
            MicroCredits::from_micro(300)
        );
        assert_eq!(reservation.allocations[1].lot_id, second.id);
        assert_eq!(
            reservation.allocations[1].amount,
            MicroCredits::from_micro(100)
        );

        ledger.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_audit_event_dual_written_with_mint() {
        let (ledger, _temp) = create_test_ledger().await;
        let account = ledger
            .create_account(EntityType::Community, "guild-1")
            .await
            .unwrap();

        let audit = AuditEvent {
            id: Uuid::now_v7(),
            kind: "settlement.hold_started".to_string(),
            payload: r#"{"payment":"pay_5"}"#.to_string(),
            created_at: chrono::Utc::now(),
        };
        ledger
            .mint_lot(
                account.id,
                MicroCredits::from_micro(10_000),
                SourceType::Deposit,
                MintOptions {
                    audit: Some(audit.clone()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        // Committed in the same batch as the lot and its entry
        let stored = ledger.audit_event(audit.id).unwrap().unwrap();
        assert_eq!(stored.kind, "settlement.hold_started");

        ledger.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_clawback_unconsumed_and_debt() {
        let (ledger, _temp) = create_test_ledger().await;
        let account = ledger
            .create_account(EntityType::Person, "user-1")
            .await
            .unwrap();
        let pool = PoolId::default();

        ledger
            .mint_lot(
                account.id,
                MicroCredits::from_micro(1_000_000),
                SourceType::Deposit,
                MintOptions {
                    source_id: Some("pay_9".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        // Consume 300_000 of the grant
        let reservation = ledger
            .reserve(account.id, pool.clone(), MicroCredits::from_micro(300_000))
            .await
            .unwrap();
        ledger
            .finalize(reservation.id, MicroCredits::from_micro(300_000))
            .await
            .unwrap();

        // Claw back the full grant: 700_000 reclaimable, 300_000 becomes debt
        let outcome = ledger
            .clawback(
                account.id,
                pool.clone(),
                "pay_9",
                MicroCredits::from_micro(1_000_000),
            )
            .await
            .unwrap();
        assert_eq!(outcome.reclaimed, MicroCredits::from_micro(700_000));
        let debt = outcome.debt.unwrap();
        assert_eq!(debt.debt_micro, MicroCredits::from_micro(300_000));

        let balance = ledger.get_balance(account.id, &pool).unwrap();
        assert_eq!(balance.available, MicroCredits::ZERO);

        // Per-lot conservation still holds after original shrank
        let snapshot = ledger.snapshot().unwrap();
        assert!(snapshot.lots.iter().all(|l| l.is_conserved()));

        ledger.shutdown().await.unwrap();
    }
}
