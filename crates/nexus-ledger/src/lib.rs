//! # Ledger
//!
//! Tamper-evident, signed records of every accepted self-tuning change.
//!
//! ```text
//! fields   = {pod, cycle_id, timestamp, before, after, delta, improved,
//!             genome_hash, n_calls, version}
//! proof_hash = sha256(canonical(fields))
//! signature  = ed25519(canonical(fields + proof_hash))
//! ```
//!
//! Proofs are persisted under `proof:{cycle_id}` on a best-effort basis; a
//! store failure never loses the in-memory proof.

pub mod proof;

use std::sync::Arc;

use nexus_common::crypto::{canonical_hash, sha256_hex, verify_with_public_key, ProofSigner};
use nexus_common::{unix_seconds, AuditStore, CryptoError};
use serde_json::json;
use tracing::{error, info, instrument, warn};

pub use proof::{ImprovementProof, PROOF_VERSION};
use proof::round_to;

/// Store key prefix for proofs
pub const PROOF_KEY_PREFIX: &str = "proof:";

/// Store key for a proof
pub fn proof_key(cycle_id: &str) -> String {
    format!("{PROOF_KEY_PREFIX}{cycle_id}")
}

/// SHA-256 of a genome's canonical JSON array
pub fn genome_hash(genome: &[f64]) -> Result<String, CryptoError> {
    canonical_hash(genome)
}

/// Recompute `proof_hash` and compare
pub fn verify_hash(proof: &ImprovementProof) -> bool {
    match proof.hash_payload() {
        Ok(payload) => sha256_hex(payload.as_bytes()) == proof.proof_hash,
        Err(_) => false,
    }
}

/// Check hash and signature against a bare hex public key
pub fn verify_with_key(proof: &ImprovementProof, public_key_hex: &str) -> Result<bool, CryptoError> {
    if !verify_hash(proof) {
        return Ok(false);
    }
    let Some(signature) = proof.signature.as_deref() else {
        return Ok(false);
    };
    let payload = proof.signature_payload()?;
    verify_with_public_key(public_key_hex, payload.as_bytes(), signature)
}

/// Signs, persists and verifies improvement proofs
pub struct ProofLedger {
    signer: Arc<dyn ProofSigner>,
    store: Arc<dyn AuditStore>,
}

impl ProofLedger {
    pub fn new(signer: Arc<dyn ProofSigner>, store: Arc<dyn AuditStore>) -> Self {
        Self { signer, store }
    }

    /// Hex public key proofs from this ledger verify against
    pub fn public_key_hex(&self) -> String {
        self.signer.public_key_hex()
    }

    /// Build and sign a proof without persisting it
    pub fn build_proof(
        &self,
        pod: &str,
        cycle_id: &str,
        avg_score_before: f64,
        avg_score_after: f64,
        genome: &[f64],
        n_calls: u64,
    ) -> Result<ImprovementProof, CryptoError> {
        let before = round_to(avg_score_before, 6);
        let after = round_to(avg_score_after, 6);

        let mut proof = ImprovementProof {
            pod: pod.to_string(),
            cycle_id: cycle_id.to_string(),
            timestamp: round_to(unix_seconds(), 3),
            avg_score_before: before,
            avg_score_after: after,
            delta: round_to(after - before, 6),
            improved: after > before,
            genome_hash: genome_hash(genome)?,
            n_calls,
            version: PROOF_VERSION.to_string(),
            proof_hash: String::new(),
            signature: None,
        };
        proof.proof_hash = sha256_hex(proof.hash_payload()?.as_bytes());
        let signature = self.signer.sign(proof.signature_payload()?.as_bytes());
        proof.signature = Some(signature);
        Ok(proof)
    }

    /// Build, sign and persist a proof
    ///
    /// Persistence is best-effort: a store failure is logged and the signed
    /// proof is still returned.
    #[instrument(skip(self, genome))]
    pub async fn generate_proof(
        &self,
        pod: &str,
        cycle_id: &str,
        avg_score_before: f64,
        avg_score_after: f64,
        genome: &[f64],
        n_calls: u64,
    ) -> Result<ImprovementProof, CryptoError> {
        let proof = self.build_proof(pod, cycle_id, avg_score_before, avg_score_after, genome, n_calls)?;

        let record = serde_json::to_value(&proof).map_err(|e| CryptoError::Canonicalization(e.to_string()))?;
        let metadata = json!({
            "type": "improvement_proof",
            "improved": proof.improved,
            "cycle_id": proof.cycle_id,
        });
        if let Err(e) = self.store.put(pod, &proof_key(cycle_id), record, metadata).await {
            warn!(pod = %pod, cycle_id = %cycle_id, error = %e, "Failed to persist improvement proof");
        }

        info!(
            pod = %pod,
            cycle_id = %cycle_id,
            delta = proof.delta,
            improved = proof.improved,
            "Improvement proof generated"
        );
        Ok(proof)
    }

    /// Hash and signature both check out
    pub fn verify(&self, proof: &ImprovementProof) -> bool {
        if !verify_hash(proof) {
            error!(pod = %proof.pod, cycle_id = %proof.cycle_id, "Proof hash mismatch; record was tampered with");
            return false;
        }
        if !self.verify_signature(proof) {
            error!(pod = %proof.pod, cycle_id = %proof.cycle_id, "Proof signature invalid");
            return false;
        }
        true
    }

    pub fn verify_hash(&self, proof: &ImprovementProof) -> bool {
        verify_hash(proof)
    }

    pub fn verify_signature(&self, proof: &ImprovementProof) -> bool {
        let Some(signature) = proof.signature.as_deref() else {
            return false;
        };
        match proof.signature_payload() {
            Ok(payload) => self.signer.verify(payload.as_bytes(), signature),
            Err(_) => false,
        }
    }

    /// Stored proof for one cycle, if any
    pub async fn get_proof(&self, pod: &str, cycle_id: &str) -> Option<ImprovementProof> {
        match self.store.get(pod, &proof_key(cycle_id)).await {
            Ok(Some(record)) => serde_json::from_value(record).ok(),
            Ok(None) => None,
            Err(e) => {
                warn!(pod = %pod, cycle_id = %cycle_id, error = %e, "Failed to load improvement proof");
                None
            }
        }
    }

    /// Most recent stored proofs for a pod, newest first
    ///
    /// Records without a `proof_hash` are skipped; a store failure yields an
    /// empty history.
    pub async fn cycle_history(&self, pod: &str, limit: usize) -> Vec<ImprovementProof> {
        let records = match self.store.query_recent(pod, PROOF_KEY_PREFIX, limit).await {
            Ok(records) => records,
            Err(e) => {
                warn!(pod = %pod, error = %e, "Failed to query proof history");
                return Vec::new();
            }
        };

        let mut proofs: Vec<ImprovementProof> = records
            .into_iter()
            .filter(|record| record.get("proof_hash").is_some())
            .filter_map(|record| serde_json::from_value(record).ok())
            .collect();
        proofs.sort_by(|a, b| b.timestamp.total_cmp(&a.timestamp));
        proofs.truncate(limit);
        proofs
    }
}
