//! Error types for the Nexus self-tuning core
//!
//! Provides a unified error type and domain-specific error variants.
//! Collaborator failures (fitness functions, generators, stores) are never
//! surfaced through these types; the engines absorb them and log instead.

use thiserror::Error;

/// Result type alias using NexusError
pub type Result<T> = std::result::Result<T, NexusError>;

/// Unified error type for Nexus operations
#[derive(Debug, Error)]
pub enum NexusError {
    // Constitution errors
    #[error("Constitution error: {0}")]
    Constitution(#[from] ConstitutionError),

    // Crypto errors
    #[error("Cryptographic error: {0}")]
    Crypto(#[from] CryptoError),

    // Audit store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Constitution loading and rule compilation errors
#[derive(Debug, Error)]
pub enum ConstitutionError {
    #[error("Failed to read constitution file {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("Failed to parse constitution document: {0}")]
    Parse(String),

    #[error("Invalid pattern in rule {rule_id}: {reason}")]
    InvalidPattern { rule_id: String, reason: String },

    #[error("Rule {rule_id} of type {rule_type} is missing field {field}")]
    MissingField {
        rule_id: String,
        rule_type: String,
        field: String,
    },
}

/// Cryptographic operation errors
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid signing key: {0}")]
    InvalidSigningKey(String),

    #[error("Invalid public key")]
    InvalidPublicKey,

    #[error("Invalid signature encoding")]
    InvalidSignatureEncoding,

    #[error("Canonical encoding failed: {0}")]
    Canonicalization(String),
}

/// Audit store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Record not found: {pod}/{key}")]
    NotFound { pod: String, key: String },

    #[error("Storage backend unavailable: {0}")]
    Unavailable(String),

    #[error("Record serialization failed: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for NexusError {
    fn from(err: serde_json::Error) -> Self {
        NexusError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for NexusError {
    fn from(err: std::io::Error) -> Self {
        NexusError::Internal(err.to_string())
    }
}

impl From<anyhow::Error> for NexusError {
    fn from(err: anyhow::Error) -> Self {
        NexusError::Internal(err.to_string())
    }
}
