//! Quarantine (dead-letter) store for unparseable monetary values
//!
//! Anywhere in the pipeline a string amount fails to parse or
//! canonicalize, the bad value degrades to a quarantine row instead of
//! crashing a transaction or corrupting a balance. Rows are deduplicated
//! by a content fingerprint so a repeated identical failure neither grows
//! the table nor re-alarms; once the upstream issue is fixed an operator
//! replays the row.

use crate::{
    ledger::LedgerCore,
    micro::MicroCredits,
    types::QuarantineEntry,
    Error, Result,
};
use chrono::{Duration, Utc};
use uuid::Uuid;

/// A monetary value that failed to parse somewhere in the pipeline
#[derive(Debug, Clone)]
pub struct ParseFailure {
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
}

/// Content fingerprint: blake3 over (table, row id, raw value, error code)
pub fn fingerprint(failure: &ParseFailure) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(failure.table_name.as_bytes());
    hasher.update(b"|");
    hasher.update(failure.original_row_id.as_bytes());
    hasher.update(b"|");
    hasher.update(failure.raw_value.as_bytes());
    hasher.update(b"|");
    hasher.update(failure.error_code.as_bytes());
    *hasher.finalize().as_bytes()
}

impl LedgerCore {
    /// Insert a quarantine row, ignoring duplicate fingerprints
    ///
    /// Returns `true` when a new row was inserted, `false` when the
    /// identical failure was already on file.
    pub fn quarantine_parse_failure(&self, failure: ParseFailure) -> Result<bool> {
        let fp = fingerprint(&failure);
        if self.storage().get_quarantine(&fp)?.is_some() {
            tracing::debug!(
                table = %failure.table_name,
                row = %failure.original_row_id,
                "Duplicate quarantine fingerprint ignored"
            );
            return Ok(false);
        }

        let entry = QuarantineEntry {
            id: Uuid::now_v7(),
            original_row_id: failure.original_row_id,
            table_name: failure.table_name,
            raw_value: failure.raw_value,
            context: failure.context,
            error_code: failure.error_code,
            source_fingerprint: fp,
            replayed_at: None,
            replay_attempts: 0,
            last_replay_error: None,
            created_at: Utc::now(),
        };

        let mut commit = self.storage().begin();
        commit.put_quarantine(&entry)?;
        commit.commit()?;

        tracing::warn!(
            quarantine_id = %entry.id,
            table = %entry.table_name,
            row = %entry.original_row_id,
            code = %entry.error_code,
            "Monetary value quarantined"
        );
        Ok(true)
    }

    /// Mark a row successfully replayed; errors if already replayed
    pub fn mark_replayed(&self, quarantine_id: Uuid) -> Result<()> {
        let mut entry = self.find_quarantine(quarantine_id)?;
        if entry.replayed_at.is_some() {
            return Err(Error::AlreadyReplayed(quarantine_id.to_string()));
        }
        entry.replayed_at = Some(Utc::now());
        entry.last_replay_error = None;

        let mut commit = self.storage().begin();
        commit.put_quarantine(&entry)?;
        commit.commit()?;

        tracing::info!(quarantine_id = %quarantine_id, "Quarantine entry replayed");
        Ok(())
    }

    /// Record a failed replay attempt without marking the row replayed
    pub fn record_replay_failure(&self, quarantine_id: Uuid, error: String) -> Result<()> {
        let mut entry = self.find_quarantine(quarantine_id)?;
        if entry.replayed_at.is_some() {
            return Err(Error::AlreadyReplayed(quarantine_id.to_string()));
        }
        entry.replay_attempts += 1;
        entry.last_replay_error = Some(error);

        let mut commit = self.storage().begin();
        commit.put_quarantine(&entry)?;
        commit.commit()?;
        Ok(())
    }

    /// Delete replayed rows older than the retention window
    ///
    /// Idempotent: a second purge run deletes nothing new. Unreplayed rows
    /// are never purged regardless of age.
    pub fn purge_quarantine(&self, retention_days: i64) -> Result<u64> {
        let cutoff = Utc::now() - Duration::days(retention_days);
        let mut purged = 0u64;

        let mut commit = self.storage().begin();
        for entry in self.storage().quarantine_scan()? {
            if entry.replayed_at.is_some() && entry.created_at < cutoff {
                commit.delete_quarantine(&entry.source_fingerprint)?;
                purged += 1;
            }
        }
        commit.commit()?;

        if purged > 0 {
            tracing::info!(purged, retention_days, "Quarantine retention purge");
        }
        Ok(purged)
    }

    fn find_quarantine(&self, quarantine_id: Uuid) -> Result<QuarantineEntry> {
        self.storage()
            .quarantine_scan()?
            .into_iter()
            .find(|e| e.id == quarantine_id)
            .ok_or_else(|| Error::QuarantineNotFound(quarantine_id.to_string()))
    }
}

/// Parse a string amount, quarantining the raw value on failure
///
/// The ingestion-side bridge between raw collaborator input and the typed
/// ledger: a malformed amount becomes a dead-letter row and the caller
/// gets the parse error (with its machine code) to propagate.
pub fn ingest_amount(
    core: &LedgerCore,
    raw: &str,
    table_name: &str,
    original_row_id: &str,
    context: &str,
) -> Result<MicroCredits> {
    match MicroCredits::parse(raw) {
        Ok(amount) => Ok(amount),
        Err(err) => {
            core.quarantine_parse_failure(ParseFailure {
                original_row_id: original_row_id.to_string(),
                table_name: table_name.to_string(),
                raw_value: raw.to_string(),
                context: context.to_string(),
                error_code: err.code().to_string(),
            })?;
            Err(err.into())
        }
    }
}
