//! The boundary verification pipeline
//!
//! Validates a signed usage report from the execution service before its
//! cost is allowed anywhere near `finalize`. Strict ordered steps, first
//! failure wins: algorithm pin, signature, claims schema, replay,
//! reservation status, overspend. The sender is assumed to be
//! economically motivated to lie; every step is a safety check.
//!
//! The replay store and reservation lookup are injected ports, so tests
//! run against in-memory implementations and production injects durable
//! ones. All work here happens before the transactional finalize call,
//! never inside it.

use crate::claims::{SenderTrust, UsageClaims};
use crate::error::VerifyError;
use crate::keys::KeyProvider;
use credit_ledger::{CreditLedger, MicroCredits};
use dashmap::DashMap;
use jsonwebtoken::{decode, decode_header, Algorithm, Validation};
use std::sync::Arc;
use uuid::Uuid;

/// Port: record-once store of accepted token identifiers
pub trait ReplayStore: Send + Sync {
    /// True if the identifier was accepted before
    fn seen(&self, jti: &str) -> bool;

    /// Record the identifier; false if it was already present
    fn record_once(&self, jti: &str) -> bool;
}

/// In-memory replay store for tests and single-process deployments
#[derive(Default)]
pub struct InMemoryReplayStore {
    accepted: DashMap<String, ()>,
}

impl InMemoryReplayStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReplayStore for InMemoryReplayStore {
    fn seen(&self, jti: &str) -> bool {
        self.accepted.contains_key(jti)
    }

    fn record_once(&self, jti: &str) -> bool {
        self.accepted.insert(jti.to_string(), ()).is_none()
    }
}

/// Port: look up the currently-reserved amount of a pending reservation
pub trait ReservationView: Send + Sync {
    /// Reserved amount if the reservation exists and is pending
    fn pending_reserved(&self, reservation_id: Uuid) -> Option<MicroCredits>;
}

/// Map-backed reservation view for tests and fixtures
pub struct MicroReservations {
    reserved: std::collections::HashMap<Uuid, MicroCredits>,
}

impl MicroReservations {
    /// View over a fixed set of pending reservations
    pub fn new(reserved: std::collections::HashMap<Uuid, MicroCredits>) -> Self {
        Self { reserved }
    }
}

impl ReservationView for MicroReservations {
    fn pending_reserved(&self, reservation_id: Uuid) -> Option<MicroCredits> {
        self.reserved.get(&reservation_id).copied()
    }
}

/// Production adapter over the credit ledger
pub struct LedgerReservationView {
    ledger: Arc<CreditLedger>,
}

impl LedgerReservationView {
    /// Wrap a shared ledger handle
    pub fn new(ledger: Arc<CreditLedger>) -> Self {
        Self { ledger }
    }
}

impl ReservationView for LedgerReservationView {
    fn pending_reserved(&self, reservation_id: Uuid) -> Option<MicroCredits> {
        self.ledger
            .get_reservation(reservation_id)
            .ok()
            .filter(|r| !r.is_terminal())
            .map(|r| r.reserved)
    }
}

/// A usage report that survived every pipeline step
#[derive(Debug, Clone)]
pub struct VerifiedUsage {
    /// Accepted token identifier
    pub jti: String,

    /// Target reservation
    pub reservation_id: Uuid,

    /// Actual cost, parsed exactly from its string encoding
    pub actual_cost: MicroCredits,

    /// Models invoked during execution
    pub models_used: Vec<String>,

    /// Prompt tokens consumed
    pub input_tokens: u64,

    /// Completion tokens produced
    pub output_tokens: u64,

    /// Normalized sender trust shape
    pub trust: SenderTrust,
}

/// The boundary verifier
pub struct BoundaryVerifier<K, R, V> {
    keys: K,
    replay: R,
    reservations: V,
}

impl<K, R, V> BoundaryVerifier<K, R, V>
where
    K: KeyProvider,
    R: ReplayStore,
    V: ReservationView,
{
    /// Assemble the pipeline from its ports
    pub fn new(keys: K, replay: R, reservations: V) -> Self {
        Self {
            keys,
            replay,
            reservations,
        }
    }

    /// Run the full pipeline over a compact token
    pub fn verify(&self, sender_id: &str, token: &str) -> Result<VerifiedUsage, VerifyError> {
        // Step 1: algorithm pin and signature
        let header = decode_header(token).map_err(|_| VerifyError::SignatureInvalid)?;
        if header.alg != Algorithm::EdDSA {
            return Err(VerifyError::AlgorithmRejected(format!("{:?}", header.alg)));
        }

        let key = self.keys.verifying_key(sender_id)?;
        let validation = Validation::new(Algorithm::EdDSA);
        let claims = decode::<UsageClaims>(token, &key, &validation)
            .map_err(map_decode_error)?
            .claims;

        // Step 2: claims schema
        if claims.jti.is_empty() {
            return Err(VerifyError::ClaimsSchema("empty jti".to_string()));
        }
        if !claims.finalized {
            return Err(VerifyError::ClaimsSchema(
                "finalized must be true".to_string(),
            ));
        }
        let reservation_id = Uuid::parse_str(&claims.reservation_id).map_err(|_| {
            VerifyError::ClaimsSchema(format!("bad reservation_id {}", claims.reservation_id))
        })?;
        let actual_cost = MicroCredits::parse(&claims.actual_cost_micro)
            .and_then(MicroCredits::require_non_negative)
            .map_err(|e| {
                VerifyError::ClaimsSchema(format!("bad actual_cost_micro: {}", e.code()))
            })?;
        let trust = SenderTrust::from_claims(&claims)?;

        // Step 3: replay
        if self.replay.seen(&claims.jti) {
            return Err(VerifyError::Replay(claims.jti));
        }

        // Step 4: reservation must exist and be pending
        let reserved = self
            .reservations
            .pending_reserved(reservation_id)
            .ok_or_else(|| VerifyError::ReservationUnknown(claims.reservation_id.clone()))?;

        // Step 5: overspend
        if actual_cost > reserved {
            return Err(VerifyError::Overspend {
                claimed: actual_cost.to_string(),
                reserved: reserved.to_string(),
            });
        }

        // Only an accepted identifier is recorded; a concurrent duplicate
        // loses the race and reads as a replay.
        if !self.replay.record_once(&claims.jti) {
            return Err(VerifyError::Replay(claims.jti));
        }

        tracing::info!(
            jti = %claims.jti,
            reservation_id = %reservation_id,
            actual_cost = %actual_cost,
            "Usage report verified"
        );

        Ok(VerifiedUsage {
            jti: claims.jti,
            reservation_id,
            actual_cost,
            models_used: claims.models_used,
            input_tokens: claims.input_tokens,
            output_tokens: claims.output_tokens,
            trust,
        })
    }
}

fn map_decode_error(err: jsonwebtoken::errors::Error) -> VerifyError {
    use jsonwebtoken::errors::ErrorKind;
    match err.kind() {
        ErrorKind::InvalidSignature | ErrorKind::InvalidToken => VerifyError::SignatureInvalid,
        ErrorKind::InvalidAlgorithm | ErrorKind::InvalidAlgorithmName => {
            VerifyError::AlgorithmRejected(err.to_string())
        }
        ErrorKind::ExpiredSignature => VerifyError::ClaimsSchema("token expired".to_string()),
        _ => VerifyError::ClaimsSchema(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_replay_store() {
        let store = InMemoryReplayStore::new();
        assert!(!store.seen("jti-1"));
        assert!(store.record_once("jti-1"));
        assert!(store.seen("jti-1"));
        assert!(!store.record_once("jti-1"));
    }
}
