//! Sender key management
//!
//! The boundary trusts exactly one signature scheme (Ed25519 / EdDSA).
//! Keys are looked up per sender through the [`KeyProvider`] port; the
//! static in-memory provider serves tests and single-tenant deployments,
//! a remote JWKS-backed provider can implement the same trait in
//! production.

use crate::error::VerifyError;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ed25519_dalek::pkcs8::EncodePrivateKey;
use ed25519_dalek::{SigningKey, VerifyingKey};
use jsonwebtoken::{DecodingKey, EncodingKey};
use std::collections::HashMap;

/// Port: resolve a sender's verification key
///
/// Failures here are transient by definition; the caller backs off and
/// retries instead of rejecting the report.
pub trait KeyProvider: Send + Sync {
    /// Decoding key for the given sender
    fn verifying_key(&self, sender_id: &str) -> Result<DecodingKey, VerifyError>;
}

/// In-memory key registry
pub struct StaticKeyProvider {
    keys: HashMap<String, DecodingKey>,
}

impl StaticKeyProvider {
    /// Empty registry
    pub fn new() -> Self {
        Self {
            keys: HashMap::new(),
        }
    }

    /// Register a sender's Ed25519 public key
    pub fn register(mut self, sender_id: impl Into<String>, key: &VerifyingKey) -> Self {
        self.keys.insert(sender_id.into(), decoding_key(key));
        self
    }
}

impl Default for StaticKeyProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyProvider for StaticKeyProvider {
    fn verifying_key(&self, sender_id: &str) -> Result<DecodingKey, VerifyError> {
        self.keys
            .get(sender_id)
            .cloned()
            .ok_or_else(|| VerifyError::KeyFetchFailed(format!("no key for sender {}", sender_id)))
    }
}

/// Bridge an Ed25519 public key into a jsonwebtoken decoding key
pub fn decoding_key(key: &VerifyingKey) -> DecodingKey {
    let x = URL_SAFE_NO_PAD.encode(key.to_bytes());
    DecodingKey::from_ed_components(&x).expect("32-byte ed25519 key encodes to valid components")
}

/// Bridge an Ed25519 signing key into a jsonwebtoken encoding key
///
/// Used by the sending service (and tests) to issue usage reports.
pub fn encoding_key(key: &SigningKey) -> Result<EncodingKey, VerifyError> {
    let der = key
        .to_pkcs8_der()
        .map_err(|e| VerifyError::KeyFetchFailed(format!("pkcs8 encoding failed: {}", e)))?;
    Ok(EncodingKey::from_ed_der(der.as_bytes()))
}
