//! Operator alerts
//!
//! Alerts never block the operation that raised them. [`AlertDispatcher`]
//! enqueues onto a bounded channel with `try_send`; a single worker task
//! drains the queue into an [`AlertSink`]. A full queue drops the alert, a
//! failing sink is logged and ignored.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nexus_common::{Alert, AlertSink};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Default alert queue capacity
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Handle for enqueueing operator alerts
#[derive(Debug, Clone, Default)]
pub struct AlertDispatcher {
    sender: Option<mpsc::Sender<Alert>>,
}

impl AlertDispatcher {
    /// Dispatcher that drops every alert
    pub fn disabled() -> Self {
        Self { sender: None }
    }

    /// Spawn the worker task draining into `sink`. Must be called from
    /// inside a tokio runtime.
    pub fn spawn(sink: Arc<dyn AlertSink>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (dispatcher, mut rx) = Self::channel(capacity);

        let handle = tokio::spawn(async move {
            while let Some(alert) = rx.recv().await {
                if let Err(e) = sink.send(&alert).await {
                    warn!(rule = %alert.rule, pod = %alert.pod, error = %e, "Alert delivery failed");
                }
            }
            debug!("Alert dispatcher stopped");
        });

        (dispatcher, handle)
    }

    /// Dispatcher plus the raw receiving end, for callers that drain the
    /// queue themselves
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Alert>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { sender: Some(tx) }, rx)
    }

    pub fn is_enabled(&self) -> bool {
        self.sender.is_some()
    }

    /// Enqueue without waiting. Returns false when the alert was dropped.
    pub fn dispatch(&self, alert: Alert) -> bool {
        let Some(sender) = &self.sender else {
            debug!(rule = %alert.rule, "Alerts disabled; dropping alert");
            return false;
        };

        match sender.try_send(alert) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(alert)) => {
                warn!(rule = %alert.rule, pod = %alert.pod, "Alert queue full; dropping alert");
                false
            }
            Err(mpsc::error::TrySendError::Closed(alert)) => {
                warn!(rule = %alert.rule, pod = %alert.pod, "Alert queue closed; dropping alert");
                false
            }
        }
    }
}

/// Alert sink that writes to the log (for development)
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn send(&self, alert: &Alert) -> anyhow::Result<()> {
        warn!(rule = %alert.rule, pod = %alert.pod, snippet = %alert.snippet, "ALERT");
        Ok(())
    }
}

/// Chat webhook alert sink, posting `{"text": ...}`
pub struct WebhookAlertSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookAlertSink {
    pub fn new(url: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    /// Message body posted for an alert
    pub fn format_message(alert: &Alert) -> String {
        format!(
            "*Nexus constitution alert*\nRule: `{}`\nPod: `{}`\nSnippet: {}",
            alert.rule, alert.pod, alert.snippet
        )
    }
}

#[async_trait]
impl AlertSink for WebhookAlertSink {
    async fn send(&self, alert: &Alert) -> anyhow::Result<()> {
        self.client
            .post(&self.url)
            .json(&serde_json::json!({ "text": Self::format_message(alert) }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct RecordingSink {
        seen: Arc<Mutex<Vec<Alert>>>,
        done: mpsc::UnboundedSender<()>,
        fail: bool,
    }

    #[async_trait]
    impl AlertSink for RecordingSink {
        async fn send(&self, alert: &Alert) -> anyhow::Result<()> {
            self.seen.lock().push(alert.clone());
            let _ = self.done.send(());
            if self.fail {
                anyhow::bail!("webhook down");
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_worker_delivers_alerts() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();
        let sink = Arc::new(RecordingSink {
            seen: seen.clone(),
            done: done_tx,
            fail: false,
        });

        let (dispatcher, _handle) = AlertDispatcher::spawn(sink, 8);
        assert!(dispatcher.dispatch(Alert::new("no_pii_storage", "aurora", "jane@x.io")));
        done_rx.recv().await.unwrap();

        assert_eq!(seen.lock()[0].rule, "no_pii_storage");
    }

    #[tokio::test]
    async fn test_sink_failure_does_not_stop_worker() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();
        let sink = Arc::new(RecordingSink {
            seen: seen.clone(),
            done: done_tx,
            fail: true,
        });

        let (dispatcher, _handle) = AlertDispatcher::spawn(sink, 8);
        dispatcher.dispatch(Alert::new("a", "dan", "first"));
        dispatcher.dispatch(Alert::new("b", "dan", "second"));
        done_rx.recv().await.unwrap();
        done_rx.recv().await.unwrap();

        assert_eq!(seen.lock().len(), 2);
    }

    #[test]
    fn test_full_queue_drops() {
        let (dispatcher, _rx) = AlertDispatcher::channel(1);
        assert!(dispatcher.dispatch(Alert::new("a", "dan", "")));
        assert!(!dispatcher.dispatch(Alert::new("b", "dan", "")));
    }

    #[test]
    fn test_disabled_dispatcher() {
        let dispatcher = AlertDispatcher::disabled();
        assert!(!dispatcher.is_enabled());
        assert!(!dispatcher.dispatch(Alert::new("a", "dan", "")));
    }

    #[test]
    fn test_webhook_message_format() {
        let msg = WebhookAlertSink::format_message(&Alert::new("no_harmful_content", "janus", "tax evasion"));
        assert!(msg.contains("`no_harmful_content`"));
        assert!(msg.contains("`janus`"));
    }
}
