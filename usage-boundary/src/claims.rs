//! Usage-report claims and trust-shape normalization

use crate::error::VerifyError;
use serde::{Deserialize, Serialize};

/// Claims carried by an inbound usage-report token
///
/// `actual_cost_micro` stays a string here; it is parsed into exact
/// micro-credits during verification, never through a float.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageClaims {
    /// Unique token identifier
    pub jti: String,

    /// Explicit confirmation that the execution finished
    pub finalized: bool,

    /// Target reservation
    pub reservation_id: String,

    /// Actual cost as a canonical integer string
    pub actual_cost_micro: String,

    /// Models invoked during execution
    #[serde(default)]
    pub models_used: Vec<String>,

    /// Prompt tokens consumed
    #[serde(default)]
    pub input_tokens: u64,

    /// Completion tokens produced
    #[serde(default)]
    pub output_tokens: u64,

    /// Expiry (seconds since Unix epoch)
    pub exp: i64,

    /// Legacy numeric trust level (older senders)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trust_level: Option<u8>,

    /// Native capability scopes (newer senders)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability_scopes: Option<Vec<String>>,
}

/// Normalized sender trust shape
///
/// A token carries either the legacy numeric level or the native scope
/// list, never both and never neither. Normalizing once up front keeps
/// "which protocol version is this" out of the rest of the codebase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SenderTrust {
    /// Legacy numeric trust level
    Legacy(u8),
    /// Native capability scopes
    Scoped(Vec<String>),
}

impl SenderTrust {
    /// Resolve the tagged union, rejecting ambiguous or empty shapes
    pub fn from_claims(claims: &UsageClaims) -> Result<Self, VerifyError> {
        match (claims.trust_level, claims.capability_scopes.as_ref()) {
            (Some(_), Some(_)) => Err(VerifyError::ClaimsSchema(
                "both trust_level and capability_scopes present".to_string(),
            )),
            (None, None) => Err(VerifyError::ClaimsSchema(
                "neither trust_level nor capability_scopes present".to_string(),
            )),
            (Some(level), None) => Ok(SenderTrust::Legacy(level)),
            (None, Some(scopes)) => {
                if scopes.is_empty() || scopes.iter().any(|s| s.is_empty()) {
                    return Err(VerifyError::ClaimsSchema(
                        "capability_scopes must be non-empty".to_string(),
                    ));
                }
                Ok(SenderTrust::Scoped(scopes.clone()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_claims() -> UsageClaims {
        UsageClaims {
            jti: "jti-1".to_string(),
            finalized: true,
            reservation_id: "res-1".to_string(),
            actual_cost_micro: "300000".to_string(),
            models_used: vec!["small-v1".to_string()],
            input_tokens: 120,
            output_tokens: 88,
            exp: 2_000_000_000,
            trust_level: None,
            capability_scopes: None,
        }
    }

    #[test]
    fn test_legacy_trust_shape() {
        let mut claims = base_claims();
        claims.trust_level = Some(2);
        assert_eq!(
            SenderTrust::from_claims(&claims).unwrap(),
            SenderTrust::Legacy(2)
        );
    }

    #[test]
    fn test_scoped_trust_shape() {
        let mut claims = base_claims();
        claims.capability_scopes = Some(vec!["usage:report".to_string()]);
        assert_eq!(
            SenderTrust::from_claims(&claims).unwrap(),
            SenderTrust::Scoped(vec!["usage:report".to_string()])
        );
    }

    #[test]
    fn test_ambiguous_and_empty_shapes_rejected() {
        let claims = base_claims();
        assert_eq!(
            SenderTrust::from_claims(&claims).unwrap_err().code(),
            "CLAIMS_SCHEMA"
        );

        let mut both = base_claims();
        both.trust_level = Some(1);
        both.capability_scopes = Some(vec!["usage:report".to_string()]);
        assert_eq!(
            SenderTrust::from_claims(&both).unwrap_err().code(),
            "CLAIMS_SCHEMA"
        );

        let mut empty = base_claims();
        empty.capability_scopes = Some(vec![]);
        assert_eq!(
            SenderTrust::from_claims(&empty).unwrap_err().code(),
            "CLAIMS_SCHEMA"
        );
    }
}
