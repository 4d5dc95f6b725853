//! Improvement proof record

use nexus_common::crypto::canonical_json;
use nexus_common::CryptoError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Current proof format
pub const PROOF_VERSION: &str = "2.0";

pub(crate) const PROOF_HASH_FIELD: &str = "proof_hash";
pub(crate) const SIGNATURE_FIELD: &str = "signature";

/// Signed before/after record for one accepted change
///
/// `proof_hash` is the SHA-256 of the canonical JSON of every other field
/// except `signature`. `signature` is an Ed25519 signature over the
/// canonical JSON of every field except itself, so it covers `proof_hash`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImprovementProof {
    pub pod: String,
    pub cycle_id: String,
    /// Unix seconds, 3 decimals
    pub timestamp: f64,
    pub avg_score_before: f64,
    pub avg_score_after: f64,
    pub delta: f64,
    pub improved: bool,
    /// SHA-256 of the genome's canonical JSON
    pub genome_hash: String,
    pub n_calls: u64,
    pub version: String,
    pub proof_hash: String,
    /// Base64 Ed25519 signature
    #[serde(default)]
    pub signature: Option<String>,
}

impl ImprovementProof {
    /// Canonical JSON of the record without the named fields
    pub(crate) fn canonical_without(&self, excluded: &[&str]) -> Result<String, CryptoError> {
        let mut value = serde_json::to_value(self).map_err(|e| CryptoError::Canonicalization(e.to_string()))?;
        if let Value::Object(map) = &mut value {
            for field in excluded {
                map.remove(*field);
            }
        }
        canonical_json(&value)
    }

    /// Payload covered by `proof_hash`
    pub fn hash_payload(&self) -> Result<String, CryptoError> {
        self.canonical_without(&[PROOF_HASH_FIELD, SIGNATURE_FIELD])
    }

    /// Payload covered by `signature`
    pub fn signature_payload(&self) -> Result<String, CryptoError> {
        self.canonical_without(&[SIGNATURE_FIELD])
    }
}

pub(crate) fn round_to(value: f64, decimals: i32) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
