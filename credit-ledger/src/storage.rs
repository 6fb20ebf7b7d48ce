//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `accounts` - Monetary identities (key: account_id)
//! - `lots` - Materialized lot balances (key: account || pool || created || lot_id)
//! - `reservations` - Holds with embedded allocations (key: reservation_id)
//! - `entries` - Append-only double-entry log (key: account || pool || seq)
//! - `debts` - Clawback obligations (key: debt_id)
//! - `quarantine` - Dead-letter rows (key: source fingerprint)
//! - `audit` - Dual-written collaborator events (key: event_id)
//! - `idempotency` - Idempotency key records (key: raw key)
//! - `indices` - Secondary indices (entity lookup, lot locator, expiry)
//! - `meta` - Per-account/pool entry sequence counters
//!
//! The lot key embeds the creation timestamp, so iterating a
//! (account, pool) prefix yields lots oldest-first. That iteration order
//! *is* the allocation order reservations and transfers consume balance in.

use crate::{
    error::{Error, Result},
    micro::MicroCredits,
    types::{
        Account, AuditEvent, Debt, EntityType, LedgerEntry, Lot, PoolId, QuarantineEntry,
        Reservation, ReservationStatus, TransferReceipt,
    },
    Config,
};
use chrono::{DateTime, Utc};
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBCompactionStyle, Direction, IteratorMode,
    Options, WriteBatch, DB,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Column family names
const CF_ACCOUNTS: &str = "accounts";
const CF_LOTS: &str = "lots";
const CF_RESERVATIONS: &str = "reservations";
const CF_ENTRIES: &str = "entries";
const CF_DEBTS: &str = "debts";
const CF_QUARANTINE: &str = "quarantine";
const CF_AUDIT: &str = "audit";
const CF_IDEMPOTENCY: &str = "idempotency";
const CF_INDICES: &str = "indices";
const CF_META: &str = "meta";

/// Record behind an idempotency key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum IdempotencyRecord {
    /// A prior mint; points at the lot it created
    Mint {
        /// Full lot key in the lots column family
        lot_key: Vec<u8>,
    },
    /// A prior transfer; carries the original receipt
    Transfer {
        /// Receipt returned to the first caller
        receipt: TransferReceipt,
    },
}

/// Read-only export of every row family, for reconciliation
#[derive(Debug, Clone)]
pub struct LedgerSnapshot {
    /// All accounts
    pub accounts: Vec<Account>,
    /// All lots
    pub lots: Vec<Lot>,
    /// All reservations
    pub reservations: Vec<Reservation>,
    /// All ledger entries
    pub entries: Vec<LedgerEntry>,
    /// All debts
    pub debts: Vec<Debt>,
    /// All quarantine rows
    pub quarantine: Vec<QuarantineEntry>,
    /// When the snapshot was taken
    pub taken_at: DateTime<Utc>,
}

/// Storage wrapper for RocksDB
pub struct Storage {
    db: Arc<DB>,
}

impl Storage {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_target_file_size_base(config.rocksdb.target_file_size_mb * 1024 * 1024);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);
        db_opts.set_compaction_style(DBCompactionStyle::Universal);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_ACCOUNTS, Self::cf_options_cold()),
            ColumnFamilyDescriptor::new(CF_LOTS, Self::cf_options_hot()),
            ColumnFamilyDescriptor::new(CF_RESERVATIONS, Self::cf_options_hot()),
            ColumnFamilyDescriptor::new(CF_ENTRIES, Self::cf_options_cold()),
            ColumnFamilyDescriptor::new(CF_DEBTS, Self::cf_options_cold()),
            ColumnFamilyDescriptor::new(CF_QUARANTINE, Self::cf_options_cold()),
            ColumnFamilyDescriptor::new(CF_AUDIT, Self::cf_options_cold()),
            ColumnFamilyDescriptor::new(CF_IDEMPOTENCY, Self::cf_options_hot()),
            ColumnFamilyDescriptor::new(CF_INDICES, Self::cf_options_index()),
            ColumnFamilyDescriptor::new(CF_META, Self::cf_options_hot()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!(path = ?path, "Opened credit ledger storage");

        Ok(Self { db: Arc::new(db) })
    }

    // Column family options

    fn cf_options_cold() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts.set_bottommost_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_options_hot() -> Options {
        let mut opts = Options::default();
        // Frequently read in the write path, favor speed
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_options_index() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    // Key encodings

    fn pool_tag(pool_id: &PoolId) -> [u8; 8] {
        let digest = blake3::hash(pool_id.as_str().as_bytes());
        let mut tag = [0u8; 8];
        tag.copy_from_slice(&digest.as_bytes()[..8]);
        tag
    }

    /// Lot key: account (16) || pool tag (8) || created nanos (8) || lot id (16)
    pub fn lot_key(lot: &Lot) -> Vec<u8> {
        let mut key = Vec::with_capacity(48);
        key.extend_from_slice(lot.account_id.as_bytes());
        key.extend_from_slice(&Self::pool_tag(&lot.pool_id));
        let nanos = lot.created_at.timestamp_nanos_opt().unwrap_or(0).max(0) as u64;
        key.extend_from_slice(&nanos.to_be_bytes());
        key.extend_from_slice(lot.id.as_bytes());
        key
    }

    fn lot_prefix(account_id: Uuid, pool_id: &PoolId) -> Vec<u8> {
        let mut prefix = Vec::with_capacity(24);
        prefix.extend_from_slice(account_id.as_bytes());
        prefix.extend_from_slice(&Self::pool_tag(pool_id));
        prefix
    }

    fn entry_key(account_id: Uuid, pool_id: &PoolId, seq: u64) -> Vec<u8> {
        let mut key = Vec::with_capacity(32);
        key.extend_from_slice(account_id.as_bytes());
        key.extend_from_slice(&Self::pool_tag(pool_id));
        key.extend_from_slice(&seq.to_be_bytes());
        key
    }

    fn seq_key(account_id: Uuid, pool_id: &PoolId) -> Vec<u8> {
        let mut key = Vec::with_capacity(28);
        key.extend_from_slice(b"seq|");
        key.extend_from_slice(account_id.as_bytes());
        key.extend_from_slice(&Self::pool_tag(pool_id));
        key
    }

    fn entity_index_key(entity_type: EntityType, entity_id: &str) -> Vec<u8> {
        let mut key = Vec::with_capacity(5 + entity_id.len());
        key.extend_from_slice(b"ent|");
        key.push(entity_type.tag());
        key.extend_from_slice(entity_id.as_bytes());
        key
    }

    fn lot_locator_key(lot_id: Uuid) -> Vec<u8> {
        let mut key = Vec::with_capacity(20);
        key.extend_from_slice(b"lot|");
        key.extend_from_slice(lot_id.as_bytes());
        key
    }

    fn expiry_index_key(expires_at: DateTime<Utc>, reservation_id: Uuid) -> Vec<u8> {
        let mut key = Vec::with_capacity(28);
        key.extend_from_slice(b"exp|");
        let nanos = expires_at.timestamp_nanos_opt().unwrap_or(i64::MAX).max(0) as u64;
        key.extend_from_slice(&nanos.to_be_bytes());
        key.extend_from_slice(reservation_id.as_bytes());
        key
    }

    // Account operations

    /// Get account by ID
    pub fn get_account(&self, account_id: Uuid) -> Result<Account> {
        let cf = self.cf(CF_ACCOUNTS)?;
        let value = self
            .db
            .get_cf(&cf, account_id.as_bytes())?
            .ok_or_else(|| Error::AccountNotFound(account_id.to_string()))?;
        Ok(bincode::deserialize(&value)?)
    }

    /// Look up an account by its (entity_type, entity_id) identity
    pub fn find_account(&self, entity_type: EntityType, entity_id: &str) -> Result<Option<Account>> {
        let cf = self.cf(CF_INDICES)?;
        let key = Self::entity_index_key(entity_type, entity_id);
        match self.db.get_cf(&cf, &key)? {
            Some(id_bytes) => {
                let id_bytes: [u8; 16] = id_bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| Error::Storage("Corrupt entity index".to_string()))?;
                Ok(Some(self.get_account(Uuid::from_bytes(id_bytes))?))
            }
            None => Ok(None),
        }
    }

    // Lot operations

    /// Get a lot by ID via the locator index
    pub fn get_lot(&self, lot_id: Uuid) -> Result<Lot> {
        let indices = self.cf(CF_INDICES)?;
        let locator = self
            .db
            .get_cf(&indices, Self::lot_locator_key(lot_id))?
            .ok_or_else(|| Error::Storage(format!("Lot not found: {}", lot_id)))?;

        let lots = self.cf(CF_LOTS)?;
        let value = self
            .db
            .get_cf(&lots, &locator)?
            .ok_or_else(|| Error::Storage(format!("Lot row missing: {}", lot_id)))?;
        Ok(bincode::deserialize(&value)?)
    }

    /// Lots for an account/pool in allocation (oldest-first) order
    pub fn lots_for(&self, account_id: Uuid, pool_id: &PoolId) -> Result<Vec<Lot>> {
        let cf = self.cf(CF_LOTS)?;
        let prefix = Self::lot_prefix(account_id, pool_id);

        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(&prefix, Direction::Forward));

        let mut lots = Vec::new();
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            lots.push(bincode::deserialize::<Lot>(&value)?);
        }
        Ok(lots)
    }

    // Reservation operations

    /// Get reservation by ID
    pub fn get_reservation(&self, reservation_id: Uuid) -> Result<Reservation> {
        let cf = self.cf(CF_RESERVATIONS)?;
        let value = self
            .db
            .get_cf(&cf, reservation_id.as_bytes())?
            .ok_or_else(|| Error::ReservationNotFound(reservation_id.to_string()))?;
        Ok(bincode::deserialize(&value)?)
    }

    /// Pending reservation ids whose expiry index sorts at or before `now`
    pub fn expired_pending(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>> {
        let cf = self.cf(CF_INDICES)?;
        let prefix = b"exp|";
        let cutoff = now.timestamp_nanos_opt().unwrap_or(0).max(0) as u64;

        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(prefix, Direction::Forward));

        let mut ids = Vec::new();
        for item in iter {
            let (key, _) = item?;
            if !key.starts_with(prefix) || key.len() != 28 {
                break;
            }
            let nanos = u64::from_be_bytes(key[4..12].try_into().unwrap());
            if nanos > cutoff {
                break;
            }
            let id_bytes: [u8; 16] = key[12..28].try_into().unwrap();
            ids.push(Uuid::from_bytes(id_bytes));
        }
        Ok(ids)
    }

    // Entry operations

    /// Next dense sequence number for an account/pool
    pub fn next_entry_seq(&self, account_id: Uuid, pool_id: &PoolId) -> Result<u64> {
        let cf = self.cf(CF_META)?;
        let current = match self.db.get_cf(&cf, Self::seq_key(account_id, pool_id))? {
            Some(bytes) => u64::from_be_bytes(
                bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| Error::Storage("Corrupt seq counter".to_string()))?,
            ),
            None => 0,
        };
        Ok(current + 1)
    }

    /// Entries for an account/pool in sequence order
    pub fn entries_for(&self, account_id: Uuid, pool_id: &PoolId) -> Result<Vec<LedgerEntry>> {
        let cf = self.cf(CF_ENTRIES)?;
        let prefix = Self::lot_prefix(account_id, pool_id);

        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(&prefix, Direction::Forward));

        let mut entries = Vec::new();
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            entries.push(bincode::deserialize::<LedgerEntry>(&value)?);
        }
        Ok(entries)
    }

    // Idempotency operations

    /// Get the record behind an idempotency key, if any
    pub fn get_idempotency(&self, key: &str) -> Result<Option<IdempotencyRecord>> {
        let cf = self.cf(CF_IDEMPOTENCY)?;
        match self.db.get_cf(&cf, key.as_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    /// Resolve a mint idempotency record back to its lot
    pub fn get_lot_at(&self, lot_key: &[u8]) -> Result<Lot> {
        let cf = self.cf(CF_LOTS)?;
        let value = self
            .db
            .get_cf(&cf, lot_key)?
            .ok_or_else(|| Error::Storage("Lot row missing for idempotency record".to_string()))?;
        Ok(bincode::deserialize(&value)?)
    }

    // Quarantine operations

    /// Get quarantine entry by fingerprint
    pub fn get_quarantine(&self, fingerprint: &[u8; 32]) -> Result<Option<QuarantineEntry>> {
        let cf = self.cf(CF_QUARANTINE)?;
        match self.db.get_cf(&cf, fingerprint)? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    /// All quarantine entries
    pub fn quarantine_scan(&self) -> Result<Vec<QuarantineEntry>> {
        self.scan_all(CF_QUARANTINE)
    }

    // Audit operations

    /// Get a dual-written audit event
    pub fn get_audit(&self, event_id: Uuid) -> Result<Option<AuditEvent>> {
        let cf = self.cf(CF_AUDIT)?;
        match self.db.get_cf(&cf, event_id.as_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    // Snapshot

    fn scan_all<T: serde::de::DeserializeOwned>(&self, cf_name: &str) -> Result<Vec<T>> {
        let cf = self.cf(cf_name)?;
        let iter = self.db.iterator_cf(&cf, IteratorMode::Start);
        let mut rows = Vec::new();
        for item in iter {
            let (_, value) = item?;
            rows.push(bincode::deserialize::<T>(&value)?);
        }
        Ok(rows)
    }

    /// Export every row family for reconciliation
    ///
    /// Read-only; safe to call at any time. Mutations are single batches
    /// applied by the single writer, so a scan never observes a
    /// half-applied operation.
    pub fn snapshot(&self) -> Result<LedgerSnapshot> {
        Ok(LedgerSnapshot {
            accounts: self.scan_all(CF_ACCOUNTS)?,
            lots: self.scan_all(CF_LOTS)?,
            reservations: self.scan_all(CF_RESERVATIONS)?,
            entries: self.scan_all(CF_ENTRIES)?,
            debts: self.scan_all(CF_DEBTS)?,
            quarantine: self.scan_all(CF_QUARANTINE)?,
            taken_at: Utc::now(),
        })
    }

    /// Sum of available and reserved across an account/pool's lots
    pub fn balance(&self, account_id: Uuid, pool_id: &PoolId) -> Result<crate::types::Balance> {
        let mut available = MicroCredits::ZERO;
        let mut reserved = MicroCredits::ZERO;
        for lot in self.lots_for(account_id, pool_id)? {
            available = available.checked_add(lot.available).map_err(Error::from)?;
            reserved = reserved.checked_add(lot.reserved).map_err(Error::from)?;
        }
        Ok(crate::types::Balance { available, reserved })
    }

    /// Begin an atomic commit unit
    pub fn begin(&self) -> Commit<'_> {
        Commit {
            storage: self,
            batch: WriteBatch::default(),
        }
    }
}

/// Atomic commit unit
///
/// Stages every row change of one ledger operation and applies them in a
/// single RocksDB write. The log append and its materialized-view updates
/// travel in the same batch so they cannot drift.
pub struct Commit<'a> {
    storage: &'a Storage,
    batch: WriteBatch,
}

impl Commit<'_> {
    /// Stage an account row and its entity index
    pub fn put_account(&mut self, account: &Account) -> Result<()> {
        let accounts = self.storage.cf(CF_ACCOUNTS)?;
        self.batch
            .put_cf(&accounts, account.id.as_bytes(), bincode::serialize(account)?);

        let indices = self.storage.cf(CF_INDICES)?;
        self.batch.put_cf(
            &indices,
            Storage::entity_index_key(account.entity_type, &account.entity_id),
            account.id.as_bytes(),
        );
        Ok(())
    }

    /// Stage a lot row (and its locator index for new lots)
    pub fn put_lot(&mut self, lot: &Lot) -> Result<()> {
        let key = Storage::lot_key(lot);
        let lots = self.storage.cf(CF_LOTS)?;
        self.batch.put_cf(&lots, &key, bincode::serialize(lot)?);

        let indices = self.storage.cf(CF_INDICES)?;
        self.batch
            .put_cf(&indices, Storage::lot_locator_key(lot.id), &key);
        Ok(())
    }

    /// Stage a reservation row, maintaining the expiry index
    pub fn put_reservation(&mut self, reservation: &Reservation) -> Result<()> {
        let cf = self.storage.cf(CF_RESERVATIONS)?;
        self.batch.put_cf(
            &cf,
            reservation.id.as_bytes(),
            bincode::serialize(reservation)?,
        );

        let indices = self.storage.cf(CF_INDICES)?;
        let expiry_key = Storage::expiry_index_key(reservation.expires_at, reservation.id);
        match reservation.status {
            ReservationStatus::Pending => self.batch.put_cf(&indices, expiry_key, b""),
            _ => self.batch.delete_cf(&indices, expiry_key),
        }
        Ok(())
    }

    /// Stage an append-only ledger entry and advance the sequence counter
    pub fn append_entry(&mut self, entry: &LedgerEntry) -> Result<()> {
        let entries = self.storage.cf(CF_ENTRIES)?;
        let key = Storage::entry_key(entry.account_id, &entry.pool_id, entry.entry_seq);
        self.batch.put_cf(&entries, key, bincode::serialize(entry)?);

        let meta = self.storage.cf(CF_META)?;
        self.batch.put_cf(
            &meta,
            Storage::seq_key(entry.account_id, &entry.pool_id),
            entry.entry_seq.to_be_bytes(),
        );
        Ok(())
    }

    /// Stage an idempotency record
    pub fn put_idempotency(&mut self, key: &str, record: &IdempotencyRecord) -> Result<()> {
        let cf = self.storage.cf(CF_IDEMPOTENCY)?;
        self.batch
            .put_cf(&cf, key.as_bytes(), bincode::serialize(record)?);
        Ok(())
    }

    /// Stage a debt row
    pub fn put_debt(&mut self, debt: &Debt) -> Result<()> {
        let cf = self.storage.cf(CF_DEBTS)?;
        self.batch
            .put_cf(&cf, debt.id.as_bytes(), bincode::serialize(debt)?);
        Ok(())
    }

    /// Stage a quarantine row keyed by fingerprint
    pub fn put_quarantine(&mut self, entry: &QuarantineEntry) -> Result<()> {
        let cf = self.storage.cf(CF_QUARANTINE)?;
        self.batch
            .put_cf(&cf, entry.source_fingerprint, bincode::serialize(entry)?);
        Ok(())
    }

    /// Stage removal of a quarantine row
    pub fn delete_quarantine(&mut self, fingerprint: &[u8; 32]) -> Result<()> {
        let cf = self.storage.cf(CF_QUARANTINE)?;
        self.batch.delete_cf(&cf, fingerprint);
        Ok(())
    }

    /// Stage a dual-written audit event
    pub fn put_audit(&mut self, event: &AuditEvent) -> Result<()> {
        let cf = self.storage.cf(CF_AUDIT)?;
        self.batch
            .put_cf(&cf, event.id.as_bytes(), bincode::serialize(event)?);
        Ok(())
    }

    /// Apply every staged change atomically
    pub fn commit(self) -> Result<()> {
        self.storage.db.write(self.batch)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SourceType;
    use tempfile::TempDir;

    fn test_storage() -> (Storage, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        (Storage::open(&config).unwrap(), temp_dir)
    }

    fn test_lot(account_id: Uuid, micro: u64) -> Lot {
        Lot {
            id: Uuid::now_v7(),
            account_id,
            pool_id: PoolId::default(),
            original: MicroCredits::from_micro(micro),
            available: MicroCredits::from_micro(micro),
            reserved: MicroCredits::ZERO,
            consumed: MicroCredits::ZERO,
            source_type: SourceType::Deposit,
            source_id: "pay_1".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_storage_open() {
        let (storage, _temp) = test_storage();
        assert!(storage.db.cf_handle(CF_LOTS).is_some());
        assert!(storage.db.cf_handle(CF_ENTRIES).is_some());
    }

    #[test]
    fn test_account_round_trip_with_entity_index() {
        let (storage, _temp) = test_storage();

        let account = Account {
            id: Uuid::now_v7(),
            entity_type: EntityType::Agent,
            entity_id: "agent-42".to_string(),
            active: true,
            created_at: Utc::now(),
        };

        let mut commit = storage.begin();
        commit.put_account(&account).unwrap();
        commit.commit().unwrap();

        let by_id = storage.get_account(account.id).unwrap();
        assert_eq!(by_id.entity_id, "agent-42");

        let by_entity = storage
            .find_account(EntityType::Agent, "agent-42")
            .unwrap()
            .unwrap();
        assert_eq!(by_entity.id, account.id);

        assert!(storage
            .find_account(EntityType::Person, "agent-42")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_lots_iterate_oldest_first() {
        let (storage, _temp) = test_storage();
        let account_id = Uuid::now_v7();

        let mut commit = storage.begin();
        for i in 0..3u64 {
            let mut lot = test_lot(account_id, 1_000 * (i + 1));
            // Force distinct, increasing creation timestamps
            lot.created_at = Utc::now() + chrono::Duration::milliseconds(i as i64 * 10);
            commit.put_lot(&lot).unwrap();
        }
        commit.commit().unwrap();

        let lots = storage.lots_for(account_id, &PoolId::default()).unwrap();
        assert_eq!(lots.len(), 3);
        for pair in lots.windows(2) {
            assert!(pair[0].created_at <= pair[1].created_at);
        }
    }

    #[test]
    fn test_lot_locator() {
        let (storage, _temp) = test_storage();
        let lot = test_lot(Uuid::now_v7(), 5_000);

        let mut commit = storage.begin();
        commit.put_lot(&lot).unwrap();
        commit.commit().unwrap();

        let fetched = storage.get_lot(lot.id).unwrap();
        assert_eq!(fetched.id, lot.id);
        assert_eq!(fetched.original, lot.original);
    }

    #[test]
    fn test_entry_seq_counter() {
        let (storage, _temp) = test_storage();
        let account_id = Uuid::now_v7();
        let pool = PoolId::default();

        assert_eq!(storage.next_entry_seq(account_id, &pool).unwrap(), 1);

        let entry = LedgerEntry {
            id: Uuid::now_v7(),
            account_id,
            pool_id: pool.clone(),
            entry_seq: 1,
            entry_type: crate::types::EntryType::Deposit,
            amount: MicroCredits::from_micro(100),
            idempotency_key: "k1".to_string(),
            description: "test".to_string(),
            causation_id: None,
            created_at: Utc::now(),
        };

        let mut commit = storage.begin();
        commit.append_entry(&entry).unwrap();
        commit.commit().unwrap();

        assert_eq!(storage.next_entry_seq(account_id, &pool).unwrap(), 2);
        let entries = storage.entries_for(account_id, &pool).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].entry_seq, 1);
    }

    #[test]
    fn test_expiry_index_scan() {
        let (storage, _temp) = test_storage();
        let now = Utc::now();

        let mk = |expires_at, status| Reservation {
            id: Uuid::now_v7(),
            account_id: Uuid::now_v7(),
            pool_id: PoolId::default(),
            reserved: MicroCredits::from_micro(100),
            status,
            allocations: vec![],
            created_at: now,
            expires_at,
            closed_at: None,
        };

        let past = mk(now - chrono::Duration::seconds(60), ReservationStatus::Pending);
        let future = mk(now + chrono::Duration::seconds(600), ReservationStatus::Pending);

        let mut commit = storage.begin();
        commit.put_reservation(&past).unwrap();
        commit.put_reservation(&future).unwrap();
        commit.commit().unwrap();

        let expired = storage.expired_pending(now).unwrap();
        assert_eq!(expired, vec![past.id]);

        // Closing the reservation removes it from the index
        let mut closed = past.clone();
        closed.status = ReservationStatus::Released;
        closed.closed_at = Some(now);
        let mut commit = storage.begin();
        commit.put_reservation(&closed).unwrap();
        commit.commit().unwrap();

        assert!(storage.expired_pending(now).unwrap().is_empty());
    }

    #[test]
    fn test_snapshot_collects_all_families() {
        let (storage, _temp) = test_storage();
        let lot = test_lot(Uuid::now_v7(), 1_000);

        let mut commit = storage.begin();
        commit.put_lot(&lot).unwrap();
        commit.commit().unwrap();

        let snapshot = storage.snapshot().unwrap();
        assert_eq!(snapshot.lots.len(), 1);
        assert!(snapshot.entries.is_empty());
        assert!(snapshot.reservations.is_empty());
    }
}
