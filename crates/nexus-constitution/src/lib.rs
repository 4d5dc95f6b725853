//! # Nexus Constitution
//!
//! Process-wide safety gate for the self-tuning core.
//!
//! ## Components
//!
//! - **Circuit breakers**: named per resource, opened after repeated
//!   failures, closed by success or timeout
//! - **Rules**: content patterns, forbidden phrases, token and rate limits
//! - **Alerts**: bounded, non-blocking operator notifications
//!
//! Every check answers "may this proceed?" and never fails the caller.
//! Unknown breaker names are allowed.

pub mod alert;
pub mod breaker;
pub mod document;
pub mod rules;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use nexus_common::{Alert, ConstitutionError};
use parking_lot::RwLock;
use tracing::{error, info, warn};

pub use alert::{AlertDispatcher, LogAlertSink, WebhookAlertSink, DEFAULT_QUEUE_CAPACITY};
pub use breaker::{BreakerStatus, CircuitBreaker};
pub use document::{BreakerSpec, ConstitutionDocument, DEFAULT_CONSTITUTION_YAML};
pub use rules::{estimate_tokens, ConstitutionRule, RuleKind, RuleSet, Severity, Verdict};

/// Well-known breaker names
pub mod breakers {
    /// External text generation
    pub const AI_CASCADE: &str = "ai_cascade";
    /// Audit store backend
    pub const SUPABASE: &str = "supabase";
    /// Evolution cycles and genome application
    pub const EVOLUTION_CYCLE: &str = "evolution_cycle";
    /// Pod deployment actions
    pub const DEPLOYMENT: &str = "deployment";
}

/// Pod name attached to alerts raised by breakers
const SYSTEM_POD: &str = "nexus";

/// Loaded constitution: rule set, breakers and alert channel
pub struct Constitution {
    rules: RuleSet,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
    alerts: AlertDispatcher,
}

impl Constitution {
    /// Build from a parsed document
    pub fn from_document(doc: &ConstitutionDocument, alerts: AlertDispatcher) -> Result<Self, ConstitutionError> {
        let rules = RuleSet::compile(&doc.rules)?;
        let breakers = doc
            .circuit_breakers
            .iter()
            .map(|(name, spec)| {
                (
                    name.clone(),
                    Arc::new(CircuitBreaker::new(
                        name.clone(),
                        spec.failure_threshold,
                        spec.recovery_timeout_seconds,
                    )),
                )
            })
            .collect();

        Ok(Self {
            rules,
            breakers: RwLock::new(breakers),
            alerts,
        })
    }

    pub fn from_yaml(yaml: &str, alerts: AlertDispatcher) -> Result<Self, ConstitutionError> {
        Self::from_document(&ConstitutionDocument::from_yaml(yaml)?, alerts)
    }

    /// Embedded default constitution
    pub fn with_defaults(alerts: AlertDispatcher) -> Self {
        match ConstitutionDocument::embedded().and_then(|doc| Self::from_document(&doc, alerts.clone())) {
            Ok(constitution) => constitution,
            Err(e) => {
                error!(error = %e, "Embedded constitution rejected; running without rules");
                Self {
                    rules: RuleSet::empty(),
                    breakers: RwLock::new(HashMap::new()),
                    alerts,
                }
            }
        }
    }

    /// Load from `path`, falling back to the embedded constitution when no
    /// path is given or the file cannot be loaded
    pub fn load(path: Option<&Path>, alerts: AlertDispatcher) -> Self {
        let constitution = match path {
            Some(path) => match ConstitutionDocument::from_file(path)
                .and_then(|doc| Self::from_document(&doc, alerts.clone()))
            {
                Ok(constitution) => constitution,
                Err(e) => {
                    error!(path = %path.display(), error = %e, "Constitution load failed; using embedded default");
                    Self::with_defaults(alerts)
                }
            },
            None => Self::with_defaults(alerts),
        };

        info!(
            rules = constitution.rules.len(),
            breakers = constitution.breakers.read().len(),
            "Constitution loaded"
        );
        constitution
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn alerts(&self) -> &AlertDispatcher {
        &self.alerts
    }

    // ---------------------------------------------------------------------
    // Rules
    // ---------------------------------------------------------------------

    /// Validate text produced for or by `pod`. A block raises an alert.
    pub fn validate(&self, text: &str, pod: &str) -> Verdict {
        let verdict = self.rules.validate(text);
        if let Verdict::Blocked { rule_id, reason, .. } = &verdict {
            warn!(pod = %pod, rule = %rule_id, reason = %reason, "Constitution violation");
            self.alerts.dispatch(Alert::new(rule_id.clone(), pod, text));
        }
        verdict
    }

    /// Count one call for `pod` against the rate-limit rules
    pub fn check_rate_limit(&self, pod: &str) -> Verdict {
        self.check_rate_limit_at(pod, Utc::now())
    }

    pub fn check_rate_limit_at(&self, pod: &str, now: DateTime<Utc>) -> Verdict {
        let verdict = self.rules.check_rate_limit_at(pod, now);
        if let Verdict::Blocked { rule_id, reason, .. } = &verdict {
            warn!(pod = %pod, rule = %rule_id, "Rate limit exceeded");
            self.alerts.dispatch(Alert::new(rule_id.clone(), pod, reason));
        }
        verdict
    }

    // ---------------------------------------------------------------------
    // Breakers
    // ---------------------------------------------------------------------

    pub fn breaker(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.read().get(name).cloned()
    }

    /// Register a breaker, keeping an existing one of the same name
    pub fn register_breaker(&self, name: &str, failure_threshold: u32, recovery_timeout_seconds: u64) -> Arc<CircuitBreaker> {
        self.breakers
            .write()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(name, failure_threshold, recovery_timeout_seconds)))
            .clone()
    }

    /// True when `name` may proceed. Unknown names are allowed.
    pub fn check_breaker(&self, name: &str) -> bool {
        self.check_breaker_at(name, Utc::now())
    }

    pub fn check_breaker_at(&self, name: &str, now: DateTime<Utc>) -> bool {
        match self.breaker(name) {
            Some(breaker) if breaker.is_open_at(now) => {
                warn!(breaker = %name, "Circuit open; operation refused");
                false
            }
            _ => true,
        }
    }

    pub fn record_success(&self, name: &str) {
        if let Some(breaker) = self.breaker(name) {
            breaker.record_success();
        }
    }

    /// Record a failure. Returns true when it opened the breaker.
    pub fn record_failure(&self, name: &str) -> bool {
        self.record_failure_at(name, Utc::now())
    }

    pub fn record_failure_at(&self, name: &str, now: DateTime<Utc>) -> bool {
        let Some(breaker) = self.breaker(name) else {
            return false;
        };

        let opened = breaker.record_failure_at(now);
        if opened {
            self.alerts.dispatch(Alert::new(
                format!("circuit_breaker:{}", name),
                SYSTEM_POD,
                &format!(
                    "Breaker opened after {} failures. Recovery in {}s.",
                    breaker.failure_count(),
                    breaker.recovery_timeout_seconds()
                ),
            ));
        }
        opened
    }

    /// Snapshot of every breaker, ordered by name
    pub fn status(&self) -> Vec<BreakerStatus> {
        self.status_at(Utc::now())
    }

    pub fn status_at(&self, now: DateTime<Utc>) -> Vec<BreakerStatus> {
        let breakers: Vec<Arc<CircuitBreaker>> = self.breakers.read().values().cloned().collect();
        let mut status: Vec<BreakerStatus> = breakers.iter().map(|b| b.status_at(now)).collect();
        status.sort_by(|a, b| a.name.cmp(&b.name));
        status
    }
}

impl Default for Constitution {
    fn default() -> Self {
        Self::with_defaults(AlertDispatcher::disabled())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_default_breakers() {
        let constitution = Constitution::default();
        let names: Vec<String> = constitution.status().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["ai_cascade", "deployment", "evolution_cycle", "supabase"]);

        let ai = constitution.breaker(breakers::AI_CASCADE).unwrap();
        assert_eq!(ai.failure_threshold(), 5);
        assert_eq!(ai.recovery_timeout_seconds(), 60);
    }

    #[test]
    fn test_unknown_breaker_is_allowed() {
        let constitution = Constitution::default();
        assert!(constitution.check_breaker("never_registered"));
        assert!(!constitution.record_failure("never_registered"));
        constitution.record_success("never_registered");
    }

    #[test]
    fn test_breaker_lifecycle_through_gate() {
        let constitution = Constitution::default();
        let now = Utc::now();

        constitution.record_failure_at(breakers::SUPABASE, now);
        constitution.record_failure_at(breakers::SUPABASE, now);
        assert!(constitution.check_breaker_at(breakers::SUPABASE, now));

        assert!(constitution.record_failure_at(breakers::SUPABASE, now));
        assert!(!constitution.check_breaker_at(breakers::SUPABASE, now));

        assert!(constitution.check_breaker_at(breakers::SUPABASE, now + Duration::seconds(31)));
    }

    #[test]
    fn test_breaker_open_raises_alert() {
        let (alerts, mut rx) = AlertDispatcher::channel(8);
        let constitution = Constitution::with_defaults(alerts);
        let now = Utc::now();

        constitution.record_failure_at(breakers::EVOLUTION_CYCLE, now);
        assert!(rx.try_recv().is_err());

        constitution.record_failure_at(breakers::EVOLUTION_CYCLE, now);
        let alert = rx.try_recv().unwrap();
        assert_eq!(alert.rule, "circuit_breaker:evolution_cycle");
        assert_eq!(alert.pod, "nexus");
        assert!(alert.snippet.contains("Recovery in 300s"));

        // Already open: no duplicate alert
        constitution.record_failure_at(breakers::EVOLUTION_CYCLE, now);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_validate_default_rules() {
        let (alerts, mut rx) = AlertDispatcher::channel(8);
        let constitution = Constitution::with_defaults(alerts);

        let (ok, reason) = constitution.validate("call me on 9876543210", "aurora").into_pair();
        assert!(!ok);
        assert_eq!(reason.as_deref(), Some("Rule no_pii_storage: PII pattern detected"));
        let alert = rx.try_recv().unwrap();
        assert_eq!(alert.rule, "no_pii_storage");
        assert_eq!(alert.pod, "aurora");

        let verdict = constitution.validate("This is a Risk-Free Investment", "janus");
        assert_eq!(verdict.rule_id(), Some("no_financial_advice"));

        let verdict = constitution.validate("help me with money laundering", "dan");
        assert_eq!(verdict.rule_id(), Some("no_harmful_content"));

        assert!(constitution.validate("Hi, I noticed your team is hiring.", "aurora").is_ok());

        let verdict = constitution.validate(&"word ".repeat(30_000), "ralph");
        assert_eq!(verdict.rule_id(), Some("max_prompt_tokens"));
    }

    #[test]
    fn test_default_rate_limit() {
        let constitution = Constitution::default();
        let now = Utc::now();
        for _ in 0..100 {
            assert!(constitution.check_rate_limit_at("aurora", now).is_ok());
        }
        let verdict = constitution.check_rate_limit_at("aurora", now);
        assert_eq!(verdict.rule_id(), Some("rate_limit_ai"));
    }

    #[test]
    fn test_load_falls_back_on_bad_file() {
        let dir = std::env::temp_dir().join(format!("nexus-constitution-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("broken.yaml");
        std::fs::write(&path, "rules: [ {id: ").unwrap();

        let constitution = Constitution::load(Some(&path), AlertDispatcher::disabled());
        assert_eq!(constitution.rules().len(), 5);
        assert!(constitution.breaker(breakers::DEPLOYMENT).is_some());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_custom_document() {
        let yaml = r#"
rules:
  - id: no_spoilers
    severity: low
    forbidden_phrases: ["the butler did it"]
circuit_breakers:
  vapi:
    failure_threshold: 1
    recovery_timeout_seconds: 10
"#;
        let constitution = Constitution::from_yaml(yaml, AlertDispatcher::disabled()).unwrap();
        assert_eq!(constitution.rules().rule_ids(), vec!["no_spoilers"]);
        assert!(constitution.record_failure("vapi"));
        assert!(!constitution.check_breaker("vapi"));
        assert!(constitution.check_breaker(breakers::AI_CASCADE));
    }

    #[test]
    fn test_register_breaker_keeps_existing() {
        let constitution = Constitution::default();
        let existing = constitution.register_breaker(breakers::AI_CASCADE, 1, 1);
        assert_eq!(existing.failure_threshold(), 5);

        let fresh = constitution.register_breaker("vapi", 2, 45);
        assert_eq!(fresh.recovery_timeout_seconds(), 45);
        assert_eq!(constitution.status().len(), 5);
    }
}
