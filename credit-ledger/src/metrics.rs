//! Metrics collection for observability
//!
//! # Metrics
//!
//! - `ledger_mints_total` - Lots minted
//! - `ledger_reservations_total` - Holds placed
//! - `ledger_finalizations_total` - Holds settled
//! - `ledger_releases_total` - Holds returned
//! - `ledger_transfers_completed_total` / `ledger_transfers_rejected_total`
//! - `ledger_quarantine_total` - Dead-letter rows inserted

use crate::types::{TransferReceipt, TransferStatus};
use prometheus::{IntCounter, Opts, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Lots minted
    pub mints_total: IntCounter,

    /// Holds placed
    pub reservations_total: IntCounter,

    /// Holds settled
    pub finalizations_total: IntCounter,

    /// Holds returned
    pub releases_total: IntCounter,

    /// Transfers completed
    pub transfers_completed_total: IntCounter,

    /// Transfers rejected
    pub transfers_rejected_total: IntCounter,

    /// Dead-letter rows inserted
    pub quarantine_total: IntCounter,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let counter = |name: &str, help: &str| -> prometheus::Result<IntCounter> {
            IntCounter::with_opts(Opts::new(name, help))
        };

        let mints_total = counter("ledger_mints_total", "Lots minted")?;
        let reservations_total = counter("ledger_reservations_total", "Holds placed")?;
        let finalizations_total = counter("ledger_finalizations_total", "Holds settled")?;
        let releases_total = counter("ledger_releases_total", "Holds returned")?;
        let transfers_completed_total =
            counter("ledger_transfers_completed_total", "Transfers completed")?;
        let transfers_rejected_total =
            counter("ledger_transfers_rejected_total", "Transfers rejected")?;
        let quarantine_total = counter("ledger_quarantine_total", "Dead-letter rows inserted")?;

        for c in [
            &mints_total,
            &reservations_total,
            &finalizations_total,
            &releases_total,
            &transfers_completed_total,
            &transfers_rejected_total,
            &quarantine_total,
        ] {
            registry.register(Box::new(c.clone()))?;
        }

        Ok(Self {
            mints_total,
            reservations_total,
            finalizations_total,
            releases_total,
            transfers_completed_total,
            transfers_rejected_total,
            quarantine_total,
            registry,
        })
    }

    /// Record a mint
    pub fn record_mint(&self) {
        self.mints_total.inc();
    }

    /// Record a hold placed
    pub fn record_reserve(&self) {
        self.reservations_total.inc();
    }

    /// Record a hold settled
    pub fn record_finalize(&self) {
        self.finalizations_total.inc();
    }

    /// Record a hold returned
    pub fn record_release(&self) {
        self.releases_total.inc();
    }

    /// Record a transfer outcome
    pub fn record_transfer(&self, receipt: &TransferReceipt) {
        match receipt.status {
            TransferStatus::Completed => self.transfers_completed_total.inc(),
            TransferStatus::Rejected => self.transfers_rejected_total.inc(),
        }
    }

    /// Record a dead-letter insertion
    pub fn record_quarantine(&self) {
        self.quarantine_total.inc();
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::micro::MicroCredits;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        assert_eq!(metrics.mints_total.get(), 0);
        assert_eq!(metrics.quarantine_total.get(), 0);
    }

    #[test]
    fn test_record_transfer_by_status() {
        let metrics = Metrics::new().unwrap();
        metrics.record_transfer(&TransferReceipt {
            status: TransferStatus::Completed,
            moved: MicroCredits::from_micro(10),
            receiver_lot_id: None,
            reason: None,
        });
        metrics.record_transfer(&TransferReceipt {
            status: TransferStatus::Rejected,
            moved: MicroCredits::ZERO,
            receiver_lot_id: None,
            reason: Some("SELF_TRANSFER".to_string()),
        });
        assert_eq!(metrics.transfers_completed_total.get(), 1);
        assert_eq!(metrics.transfers_rejected_total.get(), 1);
    }
}
