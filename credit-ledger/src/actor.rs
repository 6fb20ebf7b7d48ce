//! Actor-based concurrency for the ledger
//!
//! Single-writer pattern: every mutation is a message processed by one
//! task, so read-modify-write sequences never interleave and each
//! operation's WriteBatch is the only unit of visibility. Reads bypass the
//! actor entirely and see only committed batches.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │        Collaborators (settlement, boundary, ...)      │
//! └─────────────────────┬────────────────────────────────┘
//!                       │
//!                       │ LedgerHandle (Clone)
//!                       ▼
//!              mpsc::channel (bounded)
//!                       │
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │             LedgerActor (single task)                 │
//! │     LedgerCore::{mint, reserve, finalize, ...}        │
//! │         one WriteBatch commit per message             │
//! └──────────────────────────────────────────────────────┘
//! ```

use crate::{
    ledger::{LedgerCore, MintOptions, TransferOptions},
    micro::MicroCredits,
    quarantine::ParseFailure,
    types::{
        Account, ClawbackOutcome, EntityType, Lot, PoolId, Reservation, SourceType,
        TransferReceipt,
    },
    Error, Result,
};
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// Message sent to the ledger actor
pub enum LedgerMessage {
    /// Idempotent account creation
    CreateAccount {
        entity_type: EntityType,
        entity_id: String,
        response: oneshot::Sender<Result<Account>>,
    },

    /// Mint a lot
    MintLot {
        account_id: Uuid,
        amount: MicroCredits,
        source_type: SourceType,
        opts: MintOptions,
        response: oneshot::Sender<Result<Lot>>,
    },

    /// Place a hold
    Reserve {
        account_id: Uuid,
        pool_id: PoolId,
        amount: MicroCredits,
        response: oneshot::Sender<Result<Reservation>>,
    },

    /// Settle a hold at actual cost
    Finalize {
        reservation_id: Uuid,
        actual_cost: MicroCredits,
        response: oneshot::Sender<Result<()>>,
    },

    /// Cancel a pending hold
    Release {
        reservation_id: Uuid,
        response: oneshot::Sender<Result<()>>,
    },

    /// Reverse a prior grant
    Clawback {
        account_id: Uuid,
        pool_id: PoolId,
        source_id: String,
        amount: MicroCredits,
        response: oneshot::Sender<Result<ClawbackOutcome>>,
    },

    /// Move value between accounts
    Transfer {
        from_account_id: Uuid,
        to_account_id: Uuid,
        amount: MicroCredits,
        opts: TransferOptions,
        response: oneshot::Sender<Result<TransferReceipt>>,
    },

    /// Expire overdue pending holds
    SweepExpired {
        now: DateTime<Utc>,
        response: oneshot::Sender<Result<Vec<Uuid>>>,
    },

    /// Insert a dead-letter row
    Quarantine {
        failure: ParseFailure,
        response: oneshot::Sender<Result<bool>>,
    },

    /// Mark a dead-letter row replayed
    MarkReplayed {
        quarantine_id: Uuid,
        response: oneshot::Sender<Result<()>>,
    },

    /// Record a failed replay attempt
    RecordReplayFailure {
        quarantine_id: Uuid,
        error: String,
        response: oneshot::Sender<Result<()>>,
    },

    /// Purge replayed dead-letter rows past retention
    PurgeQuarantine {
        retention_days: i64,
        response: oneshot::Sender<Result<u64>>,
    },

    /// Shutdown actor
    Shutdown,
}

/// Actor that processes ledger messages
pub struct LedgerActor {
    core: LedgerCore,
    mailbox: mpsc::Receiver<LedgerMessage>,
}

impl LedgerActor {
    /// Create new actor
    pub fn new(core: LedgerCore, mailbox: mpsc::Receiver<LedgerMessage>) -> Self {
        Self { core, mailbox }
    }

    /// Run the actor event loop
    pub async fn run(mut self) {
        while let Some(msg) = self.mailbox.recv().await {
            match msg {
                LedgerMessage::Shutdown => break,
                msg => self.handle_message(msg),
            }
        }
        tracing::debug!("Ledger actor stopped");
    }

    fn handle_message(&mut self, msg: LedgerMessage) {
        match msg {
            LedgerMessage::CreateAccount {
                entity_type,
                entity_id,
                response,
            } => {
                let _ = response.send(self.core.create_account(entity_type, &entity_id));
            }

            LedgerMessage::MintLot {
                account_id,
                amount,
                source_type,
                opts,
                response,
            } => {
                let _ = response.send(self.core.mint_lot(account_id, amount, source_type, opts));
            }

            LedgerMessage::Reserve {
                account_id,
                pool_id,
                amount,
                response,
            } => {
                let _ = response.send(self.core.reserve(account_id, &pool_id, amount));
            }

            LedgerMessage::Finalize {
                reservation_id,
                actual_cost,
                response,
            } => {
                let _ = response.send(self.core.finalize(reservation_id, actual_cost));
            }

            LedgerMessage::Release {
                reservation_id,
                response,
            } => {
                let _ = response.send(self.core.release(reservation_id, false));
            }

            LedgerMessage::Clawback {
                account_id,
                pool_id,
                source_id,
                amount,
                response,
            } => {
                let _ = response.send(self.core.clawback(account_id, &pool_id, &source_id, amount));
            }

            LedgerMessage::Transfer {
                from_account_id,
                to_account_id,
                amount,
                opts,
                response,
            } => {
                let _ = response.send(
                    self.core
                        .transfer(from_account_id, to_account_id, amount, opts),
                );
            }

            LedgerMessage::SweepExpired { now, response } => {
                let _ = response.send(self.core.sweep_expired(now));
            }

            LedgerMessage::Quarantine { failure, response } => {
                let _ = response.send(self.core.quarantine_parse_failure(failure));
            }

            LedgerMessage::MarkReplayed {
                quarantine_id,
                response,
            } => {
                let _ = response.send(self.core.mark_replayed(quarantine_id));
            }

            LedgerMessage::RecordReplayFailure {
                quarantine_id,
                error,
                response,
            } => {
                let _ = response.send(self.core.record_replay_failure(quarantine_id, error));
            }

            LedgerMessage::PurgeQuarantine {
                retention_days,
                response,
            } => {
                let _ = response.send(self.core.purge_quarantine(retention_days));
            }

            LedgerMessage::Shutdown => {
                // Handled in main loop
            }
        }
    }
}

/// Handle for sending messages to the actor
#[derive(Clone)]
pub struct LedgerHandle {
    sender: mpsc::Sender<LedgerMessage>,
}

impl LedgerHandle {
    /// Create new handle
    pub fn new(sender: mpsc::Sender<LedgerMessage>) -> Self {
        Self { sender }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T>>) -> LedgerMessage,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;
        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))?
    }

    /// Idempotent account creation
    pub async fn create_account(
        &self,
        entity_type: EntityType,
        entity_id: String,
    ) -> Result<Account> {
        self.request(|response| LedgerMessage::CreateAccount {
            entity_type,
            entity_id,
            response,
        })
        .await
    }

    /// Mint a lot
    pub async fn mint_lot(
        &self,
        account_id: Uuid,
        amount: MicroCredits,
        source_type: SourceType,
        opts: MintOptions,
    ) -> Result<Lot> {
        self.request(|response| LedgerMessage::MintLot {
            account_id,
            amount,
            source_type,
            opts,
            response,
        })
        .await
    }

    /// Place a hold
    pub async fn reserve(
        &self,
        account_id: Uuid,
        pool_id: PoolId,
        amount: MicroCredits,
    ) -> Result<Reservation> {
        self.request(|response| LedgerMessage::Reserve {
            account_id,
            pool_id,
            amount,
            response,
        })
        .await
    }

    /// Settle a hold at actual cost
    pub async fn finalize(&self, reservation_id: Uuid, actual_cost: MicroCredits) -> Result<()> {
        self.request(|response| LedgerMessage::Finalize {
            reservation_id,
            actual_cost,
            response,
        })
        .await
    }

    /// Cancel a pending hold
    pub async fn release(&self, reservation_id: Uuid) -> Result<()> {
        self.request(|response| LedgerMessage::Release {
            reservation_id,
            response,
        })
        .await
    }

    /// Reverse a prior grant
    pub async fn clawback(
        &self,
        account_id: Uuid,
        pool_id: PoolId,
        source_id: String,
        amount: MicroCredits,
    ) -> Result<ClawbackOutcome> {
        self.request(|response| LedgerMessage::Clawback {
            account_id,
            pool_id,
            source_id,
            amount,
            response,
        })
        .await
    }

    /// Move value between accounts
    pub async fn transfer(
        &self,
        from_account_id: Uuid,
        to_account_id: Uuid,
        amount: MicroCredits,
        opts: TransferOptions,
    ) -> Result<TransferReceipt> {
        self.request(|response| LedgerMessage::Transfer {
            from_account_id,
            to_account_id,
            amount,
            opts,
            response,
        })
        .await
    }

    /// Expire overdue pending holds
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>> {
        self.request(|response| LedgerMessage::SweepExpired { now, response })
            .await
    }

    /// Insert a dead-letter row
    pub async fn quarantine(&self, failure: ParseFailure) -> Result<bool> {
        self.request(|response| LedgerMessage::Quarantine { failure, response })
            .await
    }

    /// Mark a dead-letter row replayed
    pub async fn mark_replayed(&self, quarantine_id: Uuid) -> Result<()> {
        self.request(|response| LedgerMessage::MarkReplayed {
            quarantine_id,
            response,
        })
        .await
    }

    /// Record a failed replay attempt
    pub async fn record_replay_failure(&self, quarantine_id: Uuid, error: String) -> Result<()> {
        self.request(|response| LedgerMessage::RecordReplayFailure {
            quarantine_id,
            error,
            response,
        })
        .await
    }

    /// Purge replayed dead-letter rows past retention
    pub async fn purge_quarantine(&self, retention_days: i64) -> Result<u64> {
        self.request(|response| LedgerMessage::PurgeQuarantine {
            retention_days,
            response,
        })
        .await
    }

    /// Shutdown actor
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(LedgerMessage::Shutdown)
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;
        Ok(())
    }
}

/// Spawn the ledger actor
pub fn spawn_ledger_actor(core: LedgerCore) -> LedgerHandle {
    let (tx, rx) = mpsc::channel(1000); // Bounded channel for backpressure
    let actor = LedgerActor::new(core, rx);

    tokio::spawn(async move {
        actor.run().await;
    });

    LedgerHandle::new(tx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Storage;
    use crate::Config;
    use std::sync::Arc;

    fn test_core(temp_dir: &tempfile::TempDir) -> LedgerCore {
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        let storage = Arc::new(Storage::open(&config).unwrap());
        LedgerCore::new(storage, config)
    }

    #[tokio::test]
    async fn test_actor_spawn_and_shutdown() {
        let temp_dir = tempfile::tempdir().unwrap();
        let handle = spawn_ledger_actor(test_core(&temp_dir));
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_actor_serializes_mutations() {
        let temp_dir = tempfile::tempdir().unwrap();
        let handle = spawn_ledger_actor(test_core(&temp_dir));

        let account = handle
            .create_account(EntityType::Person, "user-1".to_string())
            .await
            .unwrap();

        // Many concurrent mints through cloned handles all land
        let mut join_set = tokio::task::JoinSet::new();
        for _ in 0..10 {
            let handle = handle.clone();
            let account_id = account.id;
            join_set.spawn(async move {
                handle
                    .mint_lot(
                        account_id,
                        MicroCredits::from_micro(100),
                        SourceType::Deposit,
                        MintOptions::default(),
                    )
                    .await
            });
        }
        while let Some(result) = join_set.join_next().await {
            result.unwrap().unwrap();
        }

        let reservation = handle
            .reserve(account.id, PoolId::default(), MicroCredits::from_micro(1_000))
            .await
            .unwrap();
        assert_eq!(reservation.reserved, MicroCredits::from_micro(1_000));

        handle.shutdown().await.unwrap();
    }
}
