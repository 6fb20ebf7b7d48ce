//! End-to-end boundary verification
//!
//! Tokens are issued exactly the way the execution service issues them
//! (EdDSA over the claims) and pushed through the full pipeline, then into
//! the ledger's `finalize` for the integration paths.

use credit_ledger::{
    Config, CreditLedger, EntityType, MicroCredits, MintOptions, PoolId, SourceType,
};
use ed25519_dalek::SigningKey;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use std::collections::HashMap;
use std::sync::Arc;
use usage_boundary::{
    encoding_key, BoundaryVerifier, FailureClass, InMemoryReplayStore, LedgerReservationView,
    MicroReservations, SenderTrust, StaticKeyProvider, UsageClaims,
};
use uuid::Uuid;

const SENDER: &str = "executor";

fn signing_key() -> SigningKey {
    SigningKey::from_bytes(&[42u8; 32])
}

fn claims(reservation_id: Uuid, cost: &str) -> UsageClaims {
    UsageClaims {
        jti: Uuid::now_v7().to_string(),
        finalized: true,
        reservation_id: reservation_id.to_string(),
        actual_cost_micro: cost.to_string(),
        models_used: vec!["small-v1".to_string()],
        input_tokens: 900,
        output_tokens: 340,
        exp: (chrono::Utc::now().timestamp() + 600),
        trust_level: None,
        capability_scopes: Some(vec!["usage:report".to_string()]),
    }
}

fn issue(claims: &UsageClaims) -> String {
    let key = encoding_key(&signing_key()).unwrap();
    encode(&Header::new(Algorithm::EdDSA), claims, &key).unwrap()
}

fn keyring() -> StaticKeyProvider {
    StaticKeyProvider::new().register(SENDER, &signing_key().verifying_key())
}

/// Stub reservation view over a plain map
fn stub_reservations(entries: &[(Uuid, u64)]) -> MicroReservations {
    let map: HashMap<Uuid, MicroCredits> = entries
        .iter()
        .map(|(id, micro)| (*id, MicroCredits::from_micro(*micro)))
        .collect();
    MicroReservations::new(map)
}

#[test]
fn test_valid_report_is_accepted() {
    let reservation_id = Uuid::now_v7();
    let verifier = BoundaryVerifier::new(
        keyring(),
        InMemoryReplayStore::new(),
        stub_reservations(&[(reservation_id, 500_000)]),
    );

    let verified = verifier
        .verify(SENDER, &issue(&claims(reservation_id, "300000")))
        .unwrap();
    assert_eq!(verified.reservation_id, reservation_id);
    assert_eq!(verified.actual_cost, MicroCredits::from_micro(300_000));
    assert_eq!(
        verified.trust,
        SenderTrust::Scoped(vec!["usage:report".to_string()])
    );
}

#[test]
fn test_replayed_token_rejected_but_fresh_jti_accepted() {
    let reservation_id = Uuid::now_v7();
    let verifier = BoundaryVerifier::new(
        keyring(),
        InMemoryReplayStore::new(),
        stub_reservations(&[(reservation_id, 500_000)]),
    );

    let token = issue(&claims(reservation_id, "100000"));
    verifier.verify(SENDER, &token).unwrap();

    // Verbatim replay is rejected
    let err = verifier.verify(SENDER, &token).unwrap_err();
    assert_eq!(err.code(), "REPLAY");
    assert_eq!(err.class(), FailureClass::Permanent);

    // A fresh envelope for the same reservation is a legitimate retry
    let retried = verifier
        .verify(SENDER, &issue(&claims(reservation_id, "100000")))
        .unwrap();
    assert_eq!(retried.reservation_id, reservation_id);
}

#[test]
fn test_foreign_algorithm_rejected() {
    let reservation_id = Uuid::now_v7();
    let verifier = BoundaryVerifier::new(
        keyring(),
        InMemoryReplayStore::new(),
        stub_reservations(&[(reservation_id, 500_000)]),
    );

    // Same claims, HMAC envelope: the algorithm pin must fire before
    // any signature logic runs
    let token = encode(
        &Header::new(Algorithm::HS256),
        &claims(reservation_id, "100"),
        &EncodingKey::from_secret(b"not-the-approved-scheme"),
    )
    .unwrap();

    let err = verifier.verify(SENDER, &token).unwrap_err();
    assert_eq!(err.code(), "ALGORITHM_REJECTED");
}

#[test]
fn test_wrong_key_signature_rejected() {
    let reservation_id = Uuid::now_v7();
    let verifier = BoundaryVerifier::new(
        keyring(),
        InMemoryReplayStore::new(),
        stub_reservations(&[(reservation_id, 500_000)]),
    );

    let impostor = SigningKey::from_bytes(&[13u8; 32]);
    let token = encode(
        &Header::new(Algorithm::EdDSA),
        &claims(reservation_id, "100"),
        &encoding_key(&impostor).unwrap(),
    )
    .unwrap();

    let err = verifier.verify(SENDER, &token).unwrap_err();
    assert_eq!(err.code(), "SIGNATURE_INVALID");
}

#[test]
fn test_unknown_sender_is_transient() {
    let reservation_id = Uuid::now_v7();
    let verifier = BoundaryVerifier::new(
        StaticKeyProvider::new(), // no keys registered
        InMemoryReplayStore::new(),
        stub_reservations(&[(reservation_id, 500_000)]),
    );

    let err = verifier
        .verify(SENDER, &issue(&claims(reservation_id, "100")))
        .unwrap_err();
    assert_eq!(err.code(), "KEY_FETCH_FAILED");
    assert_eq!(err.class(), FailureClass::Transient);
}

#[test]
fn test_schema_violations_rejected() {
    let reservation_id = Uuid::now_v7();
    let verifier = BoundaryVerifier::new(
        keyring(),
        InMemoryReplayStore::new(),
        stub_reservations(&[(reservation_id, 500_000)]),
    );

    // finalized = false
    let mut not_final = claims(reservation_id, "100");
    not_final.finalized = false;
    let err = verifier.verify(SENDER, &issue(&not_final)).unwrap_err();
    assert_eq!(err.code(), "CLAIMS_SCHEMA");

    // negative cost
    let err = verifier
        .verify(SENDER, &issue(&claims(reservation_id, "-5")))
        .unwrap_err();
    assert_eq!(err.code(), "CLAIMS_SCHEMA");

    // fractional cost
    let err = verifier
        .verify(SENDER, &issue(&claims(reservation_id, "10.5")))
        .unwrap_err();
    assert_eq!(err.code(), "CLAIMS_SCHEMA");

    // empty jti
    let mut anonymous = claims(reservation_id, "100");
    anonymous.jti = String::new();
    let err = verifier.verify(SENDER, &issue(&anonymous)).unwrap_err();
    assert_eq!(err.code(), "CLAIMS_SCHEMA");

    // ambiguous trust shape
    let mut ambiguous = claims(reservation_id, "100");
    ambiguous.trust_level = Some(3);
    let err = verifier.verify(SENDER, &issue(&ambiguous)).unwrap_err();
    assert_eq!(err.code(), "CLAIMS_SCHEMA");

    // expired token
    let mut stale = claims(reservation_id, "100");
    stale.exp = chrono::Utc::now().timestamp() - 3600;
    let err = verifier.verify(SENDER, &issue(&stale)).unwrap_err();
    assert_eq!(err.code(), "CLAIMS_SCHEMA");
}

#[test]
fn test_unknown_reservation_rejected() {
    let verifier = BoundaryVerifier::new(
        keyring(),
        InMemoryReplayStore::new(),
        stub_reservations(&[]),
    );

    let err = verifier
        .verify(SENDER, &issue(&claims(Uuid::now_v7(), "100")))
        .unwrap_err();
    assert_eq!(err.code(), "RESERVATION_UNKNOWN");
}

#[test]
fn test_overspend_rejected_never_clamped() {
    let reservation_id = Uuid::now_v7();
    let verifier = BoundaryVerifier::new(
        keyring(),
        InMemoryReplayStore::new(),
        stub_reservations(&[(reservation_id, 500_000)]),
    );

    let err = verifier
        .verify(SENDER, &issue(&claims(reservation_id, "999999999")))
        .unwrap_err();
    assert_eq!(err.code(), "OVERSPEND");

    // A failed attempt does not burn the reservation; an honest retry works
    let verified = verifier
        .verify(SENDER, &issue(&claims(reservation_id, "500000")))
        .unwrap();
    assert_eq!(verified.actual_cost, MicroCredits::from_micro(500_000));
}

#[test]
fn test_cost_beyond_native_safe_integer_range() {
    let reservation_id = Uuid::now_v7();
    // Reserved amount far past 2^53 and u64: the stub takes raw
    // MicroCredits, parsed from the same string encoding
    let big = "36893488147419103232"; // 2^65
    let map: HashMap<Uuid, MicroCredits> =
        [(reservation_id, MicroCredits::parse(big).unwrap())].into();
    let verifier = BoundaryVerifier::new(
        keyring(),
        InMemoryReplayStore::new(),
        MicroReservations::new(map),
    );

    let verified = verifier
        .verify(SENDER, &issue(&claims(reservation_id, big)))
        .unwrap();
    assert_eq!(verified.actual_cost.to_string(), big);
}

mod ledger_integration {
    use super::*;

    async fn create_test_ledger() -> (Arc<CreditLedger>, tempfile::TempDir) {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        (
            Arc::new(CreditLedger::open(config).await.unwrap()),
            temp_dir,
        )
    }

    #[tokio::test]
    async fn test_verified_report_drives_finalize() {
        let (ledger, _temp) = create_test_ledger().await;
        let pool = PoolId::default();

        let account = ledger
            .create_account(EntityType::Agent, "agent-7")
            .await
            .unwrap();
        ledger
            .mint_lot(
                account.id,
                MicroCredits::from_micro(1_000_000),
                SourceType::Deposit,
                MintOptions::default(),
            )
            .await
            .unwrap();
        let reservation = ledger
            .reserve(account.id, pool.clone(), MicroCredits::from_micro(500_000))
            .await
            .unwrap();

        let verifier = BoundaryVerifier::new(
            keyring(),
            InMemoryReplayStore::new(),
            LedgerReservationView::new(ledger.clone()),
        );

        let token = issue(&claims(reservation.id, "300000"));
        let verified = verifier.verify(SENDER, &token).unwrap();
        ledger
            .finalize(verified.reservation_id, verified.actual_cost)
            .await
            .unwrap();

        let balance = ledger.get_balance(account.id, &pool).unwrap();
        assert_eq!(balance.available, MicroCredits::from_micro(700_000));
        assert_eq!(balance.reserved, MicroCredits::ZERO);

        // The reservation is now terminal, so even a fresh envelope
        // cannot finalize it a second time
        let err = verifier
            .verify(SENDER, &issue(&claims(reservation.id, "1")))
            .unwrap_err();
        assert_eq!(err.code(), "RESERVATION_UNKNOWN");

        drop(verifier);
        Arc::try_unwrap(ledger)
            .map_err(|_| ())
            .unwrap()
            .shutdown()
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_boundary_overspend_checks_live_reservation() {
        let (ledger, _temp) = create_test_ledger().await;

        let account = ledger
            .create_account(EntityType::Agent, "agent-8")
            .await
            .unwrap();
        ledger
            .mint_lot(
                account.id,
                MicroCredits::from_micro(1_000_000),
                SourceType::Deposit,
                MintOptions::default(),
            )
            .await
            .unwrap();
        let reservation = ledger
            .reserve(
                account.id,
                PoolId::default(),
                MicroCredits::from_micro(500_000),
            )
            .await
            .unwrap();

        let verifier = BoundaryVerifier::new(
            keyring(),
            InMemoryReplayStore::new(),
            LedgerReservationView::new(ledger.clone()),
        );

        let err = verifier
            .verify(SENDER, &issue(&claims(reservation.id, "999999999")))
            .unwrap_err();
        assert_eq!(err.code(), "OVERSPEND");

        // Lot state untouched by the rejected report
        let balance = ledger
            .get_balance(account.id, &PoolId::default())
            .unwrap();
        assert_eq!(balance.available, MicroCredits::from_micro(500_000));
        assert_eq!(balance.reserved, MicroCredits::from_micro(500_000));

        drop(verifier);
        Arc::try_unwrap(ledger)
            .map_err(|_| ())
            .unwrap()
            .shutdown()
            .await
            .unwrap();
    }
}
