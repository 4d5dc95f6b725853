//! Asymmetric signing for improvement proofs
//!
//! Ed25519 keys. Signatures travel as standard base64 strings, public keys
//! as lowercase hex. An operator pins the process key by configuring the
//! 32-byte seed; without it one keypair is generated per process on first
//! use and its public key is logged.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use lazy_static::lazy_static;
use rand::rngs::OsRng;
use tracing::{info, warn};

use crate::error::CryptoError;

lazy_static! {
    static ref PROCESS_SIGNER: Arc<Ed25519Signer> = {
        let signer = Ed25519Signer::generate();
        info!(
            public_key = %signer.public_key_hex(),
            "Generated process signing keypair; configure a seed to pin it"
        );
        Arc::new(signer)
    };
}

/// Signing collaborator for proof records
pub trait ProofSigner: Send + Sync {
    /// Sign `message`, returning a base64 signature
    fn sign(&self, message: &[u8]) -> String;

    /// Check a base64 signature over `message`. Malformed input is `false`.
    fn verify(&self, message: &[u8], signature_b64: &str) -> bool;

    /// Hex-encoded public key
    fn public_key_hex(&self) -> String;
}

/// Ed25519 signer holding a fixed keypair
pub struct Ed25519Signer {
    signing_key: SigningKey,
}

impl Ed25519Signer {
    /// Fresh random keypair
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Keypair from a hex-encoded 32-byte seed
    pub fn from_seed_hex(seed_hex: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(seed_hex.trim())
            .map_err(|e| CryptoError::InvalidSigningKey(e.to_string()))?;
        let seed: [u8; 32] = bytes
            .try_into()
            .map_err(|v: Vec<u8>| CryptoError::InvalidSigningKey(format!("expected 32 bytes, got {}", v.len())))?;
        Ok(Self {
            signing_key: SigningKey::from_bytes(&seed),
        })
    }

    /// Shared per-process keypair, generated on first use
    pub fn process_default() -> Arc<Ed25519Signer> {
        PROCESS_SIGNER.clone()
    }

    /// Configured seed if present and valid, otherwise the process keypair
    pub fn from_config(seed_hex: Option<&str>) -> Arc<Ed25519Signer> {
        match seed_hex.filter(|s| !s.trim().is_empty()) {
            Some(seed) => match Self::from_seed_hex(seed) {
                Ok(signer) => Arc::new(signer),
                Err(e) => {
                    warn!(error = %e, "Configured signing key rejected; using process keypair");
                    Self::process_default()
                }
            },
            None => Self::process_default(),
        }
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }
}

impl ProofSigner for Ed25519Signer {
    fn sign(&self, message: &[u8]) -> String {
        STANDARD.encode(self.signing_key.sign(message).to_bytes())
    }

    fn verify(&self, message: &[u8], signature_b64: &str) -> bool {
        match decode_signature(signature_b64) {
            Ok(signature) => self.verifying_key().verify(message, &signature).is_ok(),
            Err(_) => false,
        }
    }

    fn public_key_hex(&self) -> String {
        hex::encode(self.verifying_key().to_bytes())
    }
}

fn decode_signature(signature_b64: &str) -> Result<Signature, CryptoError> {
    let bytes = STANDARD
        .decode(signature_b64)
        .map_err(|_| CryptoError::InvalidSignatureEncoding)?;
    let bytes: [u8; 64] = bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidSignatureEncoding)?;
    Ok(Signature::from_bytes(&bytes))
}

/// Verify a signature against a bare hex public key
pub fn verify_with_public_key(
    public_key_hex: &str,
    message: &[u8],
    signature_b64: &str,
) -> Result<bool, CryptoError> {
    let bytes = hex::decode(public_key_hex.trim()).map_err(|_| CryptoError::InvalidPublicKey)?;
    let bytes: [u8; 32] = bytes.try_into().map_err(|_| CryptoError::InvalidPublicKey)?;
    let key = VerifyingKey::from_bytes(&bytes).map_err(|_| CryptoError::InvalidPublicKey)?;
    let signature = decode_signature(signature_b64)?;

    match key.verify(message, &signature) {
        Ok(()) => Ok(true),
        Err(_) => Ok(false),
    }
}
