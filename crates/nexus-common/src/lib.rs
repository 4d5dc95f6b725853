//! # Nexus Common
//!
//! Shared types, errors, collaborator contracts and cryptographic primitives
//! for the Nexus pod self-tuning core.
//!
//! ## Core Types
//!
//! - [`Genome`]: 8-gene normalized behaviour vector
//! - [`Outcome`]: completed / skipped / failed result of a gated operation
//! - [`NexusEvent`]: best-effort observability event
//!
//! ## Collaborators
//!
//! - [`AuditStore`]: record persistence ([`InMemoryAuditStore`] included)
//! - [`TextGenerator`], [`DeploymentAction`], [`EventSink`], [`AlertSink`]
//!
//! ## Crypto
//!
//! - [`crypto::canonical`]: canonical JSON + SHA-256
//! - [`crypto::signer`]: Ed25519 proof signing

pub mod collab;
pub mod crypto;
pub mod error;
pub mod store;
pub mod types;

// Re-export commonly used types at crate root
pub use collab::{
    emit_best_effort, Alert, AlertSink, BroadcastEventSink, DeploymentAction, EventSink,
    NullEventSink, TextGenerator,
};
pub use error::{ConstitutionError, CryptoError, NexusError, Result, StoreError};
pub use store::{AuditStore, InMemoryAuditStore};
pub use types::{
    event::{event_types, NexusEvent},
    genome::{clamp_unit, Genome, GENOME_LEN},
    outcome::Outcome,
};

/// Nexus version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Current time as unix seconds with sub-second precision
pub fn unix_seconds() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}
