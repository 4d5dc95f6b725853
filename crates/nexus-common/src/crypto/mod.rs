//! Cryptographic primitives for Nexus
//!
//! This module provides:
//! - Canonical JSON encoding and SHA-256 digests for tamper-evident records
//! - Ed25519 signing for non-repudiation of improvement proofs

pub mod canonical;
pub mod signer;

// Re-export commonly used items
pub use canonical::{canonical_hash, canonical_json, sha256_hex};
pub use signer::{verify_with_public_key, Ed25519Signer, ProofSigner};
