//! Collaborator contracts
//!
//! The self-tuning core talks to the outside world only through these
//! traits: text generation, pod deployment, event emission and operator
//! alerts. Implementations may fail freely; callers treat every failure as
//! recoverable.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::types::event::NexusEvent;

/// External text generator (LLM cascade)
///
/// Must return `Err` on any failure so callers can apply their fallbacks.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str, task_type: &str, pod: &str) -> anyhow::Result<String>;
}

/// Pod-specific deployment of a new live configuration
#[async_trait]
pub trait DeploymentAction: Send + Sync {
    /// Returns `Ok(true)` when the configuration is live
    async fn deploy(&self, config: &serde_json::Value) -> anyhow::Result<bool>;
}

/// Outbound event transport
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: NexusEvent) -> anyhow::Result<()>;
}

/// Emit an event, logging instead of propagating transport failures
pub async fn emit_best_effort(sink: &dyn EventSink, event: NexusEvent) {
    let label = event.to_string();
    if let Err(e) = sink.emit(event).await {
        warn!(event = %label, error = %e, "Event emission failed");
    }
}

/// Event sink that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEventSink;

#[async_trait]
impl EventSink for NullEventSink {
    async fn emit(&self, event: NexusEvent) -> anyhow::Result<()> {
        debug!(event = %event, "Event discarded");
        Ok(())
    }
}

/// In-process fan-out over a tokio broadcast channel
///
/// Emission with no live subscribers is not an error: delivery is
/// at-most-once.
#[derive(Debug, Clone)]
pub struct BroadcastEventSink {
    sender: broadcast::Sender<NexusEvent>,
}

impl BroadcastEventSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NexusEvent> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl EventSink for BroadcastEventSink {
    async fn emit(&self, event: NexusEvent) -> anyhow::Result<()> {
        if self.sender.send(event).is_err() {
            debug!("No event subscribers; event dropped");
        }
        Ok(())
    }
}

/// Operator alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Rule or breaker that fired (e.g. `no_pii_storage`, `circuit_breaker:vapi`)
    pub rule: String,
    /// Pod concerned
    pub pod: String,
    /// Short human-readable detail
    pub snippet: String,
}

impl Alert {
    /// Snippets are cut at 100 characters
    pub fn new(rule: impl Into<String>, pod: impl Into<String>, snippet: &str) -> Self {
        Self {
            rule: rule.into(),
            pod: pod.into(),
            snippet: snippet.chars().take(100).collect(),
        }
    }
}

/// Operator alert side channel (chat webhook, pager)
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn send(&self, alert: &Alert) -> anyhow::Result<()>;
}
