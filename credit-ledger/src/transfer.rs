//! Peer transfer service
//!
//! Atomic balance movement between two accounts, built on the lot
//! primitives: the sender's lots are debited oldest-first and the receiver
//! gets exactly one new `transfer_in` lot, all in a single commit. The
//! defining property is supply invariance: transfers redistribute
//! ownership, they never mint or burn, so `Σ original` over all lots is
//! unchanged by any transfer sequence.

use crate::{
    ledger::{LedgerCore, TransferOptions},
    micro::MicroCredits,
    storage::IdempotencyRecord,
    types::{EntryType, LedgerEntry, Lot, SourceType, TransferReceipt, TransferStatus},
    Error, Result,
};
use chrono::Utc;
use uuid::Uuid;

impl LedgerCore {
    /// Move value between two accounts
    ///
    /// Rejections (self-transfer, non-positive amount, insufficient
    /// balance) return a `Rejected` receipt and mutate nothing. A retried
    /// idempotency key returns the original receipt.
    pub fn transfer(
        &self,
        from_account_id: Uuid,
        to_account_id: Uuid,
        amount: MicroCredits,
        opts: TransferOptions,
    ) -> Result<TransferReceipt> {
        let transfer_id = Uuid::now_v7();
        let idempotency_key = opts
            .idempotency_key
            .unwrap_or_else(|| format!("transfer:{}", transfer_id));

        match self.storage().get_idempotency(&idempotency_key)? {
            Some(IdempotencyRecord::Transfer { receipt }) => {
                tracing::debug!(key = %idempotency_key, "Transfer replayed, returning original receipt");
                return Ok(receipt);
            }
            Some(_) => {
                return Err(Error::InvalidInput(format!(
                    "Idempotency key {} was used by a different operation",
                    idempotency_key
                )));
            }
            None => {}
        }

        if from_account_id == to_account_id {
            return Ok(rejected("SELF_TRANSFER"));
        }
        if !amount.is_positive() {
            return Ok(rejected("NON_POSITIVE_AMOUNT"));
        }
        self.storage().get_account(from_account_id)?;
        self.storage().get_account(to_account_id)?;

        let pool_id = opts.pool_id.unwrap_or_default();
        let sender_lots = self.storage().lots_for(from_account_id, &pool_id)?;
        let mut total_available = MicroCredits::ZERO;
        for lot in &sender_lots {
            total_available = total_available.checked_add(lot.available)?;
        }
        if total_available < amount {
            return Ok(rejected("INSUFFICIENT_BALANCE"));
        }

        let now = Utc::now();
        let mut remaining = amount;
        let mut touched = Vec::new();

        // Debit sender lots in allocation order; ownership moves, so the
        // debited portion leaves both available and original.
        for mut lot in sender_lots {
            if remaining.is_zero() {
                break;
            }
            if !lot.available.is_positive() {
                continue;
            }
            let take = lot.available.min(remaining);
            lot.available = lot.available.checked_sub(take)?;
            lot.original = lot.original.checked_sub(take)?;
            remaining = remaining.checked_sub(take)?;
            if !lot.is_conserved() {
                return Err(Error::InvariantViolation(format!(
                    "Lot {} lost conservation during transfer",
                    lot.id
                )));
            }
            touched.push(lot);
        }
        debug_assert!(remaining.is_zero());

        let receiver_lot = Lot {
            id: Uuid::now_v7(),
            account_id: to_account_id,
            pool_id: pool_id.clone(),
            original: amount,
            available: amount,
            reserved: MicroCredits::ZERO,
            consumed: MicroCredits::ZERO,
            source_type: SourceType::TransferIn,
            source_id: from_account_id.to_string(),
            created_at: now,
        };

        let out_entry = LedgerEntry {
            id: Uuid::now_v7(),
            account_id: from_account_id,
            pool_id: pool_id.clone(),
            entry_seq: self.storage().next_entry_seq(from_account_id, &pool_id)?,
            entry_type: EntryType::TransferOut,
            amount: -amount,
            idempotency_key: format!("{}:out", idempotency_key),
            description: format!("transfer to {}", to_account_id),
            causation_id: Some(transfer_id),
            created_at: now,
        };
        let in_entry = LedgerEntry {
            id: Uuid::now_v7(),
            account_id: to_account_id,
            pool_id: pool_id.clone(),
            entry_seq: self.storage().next_entry_seq(to_account_id, &pool_id)?,
            entry_type: EntryType::TransferIn,
            amount,
            idempotency_key: format!("{}:in", idempotency_key),
            description: format!("transfer from {}", from_account_id),
            causation_id: Some(transfer_id),
            created_at: now,
        };

        let receipt = TransferReceipt {
            status: TransferStatus::Completed,
            moved: amount,
            receiver_lot_id: Some(receiver_lot.id),
            reason: None,
        };

        let mut commit = self.storage().begin();
        for lot in &touched {
            commit.put_lot(lot)?;
        }
        commit.put_lot(&receiver_lot)?;
        commit.append_entry(&out_entry)?;
        commit.append_entry(&in_entry)?;
        commit.put_idempotency(
            &idempotency_key,
            &IdempotencyRecord::Transfer {
                receipt: receipt.clone(),
            },
        )?;
        if let Some(audit) = &opts.audit {
            commit.put_audit(audit)?;
        }
        commit.commit()?;

        tracing::info!(
            from = %from_account_id,
            to = %to_account_id,
            amount = %amount,
            "Transfer completed"
        );
        Ok(receipt)
    }
}

fn rejected(reason: &str) -> TransferReceipt {
    TransferReceipt {
        status: TransferStatus::Rejected,
        moved: MicroCredits::ZERO,
        receiver_lot_id: None,
        reason: Some(reason.to_string()),
    }
}
