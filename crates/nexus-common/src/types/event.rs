//! NexusEvent - observability events emitted by the self-tuning core
//!
//! Events are `{pod, event_type, payload}` tuples. Delivery is best-effort
//! and at-most-once; the transport lives outside this workspace.

use serde::{Deserialize, Serialize};

/// Well-known event types emitted by the core
pub mod event_types {
    pub const CYCLE_COMPLETED: &str = "cycle_completed";
    pub const GENOME_APPLIED: &str = "genome_applied";
    pub const VARIANTS_RETIRED: &str = "variants_retired";
    pub const VARIANT_PROMOTED: &str = "variant_promoted";
    pub const RULE_VIOLATION: &str = "rule_violation";
}

/// A single emitted event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NexusEvent {
    /// Pod the event concerns
    pub pod: String,
    /// Event type (see [`event_types`])
    pub event_type: String,
    /// Free-form JSON payload
    pub payload: serde_json::Value,
    /// Unix seconds with sub-second precision
    pub timestamp: f64,
}

impl NexusEvent {
    pub fn new(pod: impl Into<String>, event_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            pod: pod.into(),
            event_type: event_type.into(),
            payload,
            timestamp: crate::unix_seconds(),
        }
    }
}

impl std::fmt::Display for NexusEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NexusEvent({}, {})", self.pod, self.event_type)
    }
}
