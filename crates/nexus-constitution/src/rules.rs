//! Constitution rules
//!
//! Rules are loaded once and compiled into a read-only [`RuleSet`]:
//! - **content**: case-insensitive regex patterns and forbidden phrases
//! - **token_limit**: estimated prompt size (chars / 4)
//! - **rate_limit**: calls per window, tracked per pod
//!
//! Content and token rules are checked in document order by
//! [`RuleSet::validate`]; the first match wins. Rate-limit rules only count
//! calls made through [`RuleSet::check_rate_limit`].

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use nexus_common::ConstitutionError;
use parking_lot::RwLock;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Rule severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    #[default]
    Medium,
    Low,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
        };
        write!(f, "{}", s)
    }
}

/// Rule kind as written in the constitution document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    #[default]
    Content,
    RateLimit,
    TokenLimit,
}

/// Rule as declared in the constitution document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstitutionRule {
    pub id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub severity: Severity,
    #[serde(rename = "type", default)]
    pub kind: RuleKind,
    /// Regex patterns (content rules)
    #[serde(default)]
    pub patterns: Vec<String>,
    /// Case-insensitive substrings (content rules)
    #[serde(default)]
    pub forbidden_phrases: Vec<String>,
    /// Calls allowed per window (rate-limit rules)
    #[serde(default)]
    pub threshold: Option<u64>,
    /// Window length (rate-limit rules)
    #[serde(default)]
    pub window_seconds: Option<u64>,
    /// Estimated token ceiling (token-limit rules)
    #[serde(default)]
    pub max_tokens: Option<usize>,
}

/// Result of a rule check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    Allowed,
    Blocked {
        rule_id: String,
        severity: Severity,
        reason: String,
    },
}

impl Verdict {
    pub fn is_ok(&self) -> bool {
        matches!(self, Verdict::Allowed)
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Verdict::Allowed => None,
            Verdict::Blocked { reason, .. } => Some(reason),
        }
    }

    pub fn rule_id(&self) -> Option<&str> {
        match self {
            Verdict::Allowed => None,
            Verdict::Blocked { rule_id, .. } => Some(rule_id),
        }
    }

    /// `(ok, reason)` pair
    pub fn into_pair(self) -> (bool, Option<String>) {
        match self {
            Verdict::Allowed => (true, None),
            Verdict::Blocked { reason, .. } => (false, Some(reason)),
        }
    }
}

#[derive(Debug)]
enum Check {
    Content {
        patterns: Vec<Regex>,
        phrases: Vec<String>,
    },
    RateLimit {
        threshold: u64,
        window: Duration,
    },
    TokenLimit {
        max_tokens: usize,
    },
}

#[derive(Debug)]
struct CompiledRule {
    id: String,
    severity: Severity,
    check: Check,
}

impl CompiledRule {
    fn compile(rule: &ConstitutionRule) -> Result<Self, ConstitutionError> {
        let check = match rule.kind {
            RuleKind::Content => {
                let patterns = rule
                    .patterns
                    .iter()
                    .map(|p| {
                        RegexBuilder::new(p)
                            .case_insensitive(true)
                            .build()
                            .map_err(|e| ConstitutionError::InvalidPattern {
                                rule_id: rule.id.clone(),
                                reason: e.to_string(),
                            })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                let phrases = rule
                    .forbidden_phrases
                    .iter()
                    .map(|p| p.to_lowercase())
                    .collect();
                Check::Content { patterns, phrases }
            }
            RuleKind::RateLimit => Check::RateLimit {
                threshold: rule.threshold.ok_or_else(|| missing(rule, "threshold"))?,
                window: Duration::seconds(
                    rule.window_seconds.ok_or_else(|| missing(rule, "window_seconds"))? as i64,
                ),
            },
            RuleKind::TokenLimit => Check::TokenLimit {
                max_tokens: rule.max_tokens.ok_or_else(|| missing(rule, "max_tokens"))?,
            },
        };

        Ok(Self {
            id: rule.id.clone(),
            severity: rule.severity,
            check,
        })
    }

    fn blocked(&self, reason: String) -> Verdict {
        Verdict::Blocked {
            rule_id: self.id.clone(),
            severity: self.severity,
            reason,
        }
    }
}

fn missing(rule: &ConstitutionRule, field: &str) -> ConstitutionError {
    let rule_type = match rule.kind {
        RuleKind::Content => "content",
        RuleKind::RateLimit => "rate_limit",
        RuleKind::TokenLimit => "token_limit",
    };
    ConstitutionError::MissingField {
        rule_id: rule.id.clone(),
        rule_type: rule_type.to_string(),
        field: field.to_string(),
    }
}

/// Rough token estimate used by token-limit rules
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count() / 4
}

/// Rate limiter state
#[derive(Debug)]
struct RateWindow {
    count: u64,
    window_start: DateTime<Utc>,
}

/// Compiled, read-only rule list plus per-pod rate-limit windows
#[derive(Debug)]
pub struct RuleSet {
    rules: Vec<CompiledRule>,
    /// Rate limiter states: "rule_id:pod" -> window
    rate_windows: Arc<RwLock<HashMap<String, RateWindow>>>,
}

impl RuleSet {
    /// Compile rules, rejecting the whole set on the first invalid rule
    pub fn compile(rules: &[ConstitutionRule]) -> Result<Self, ConstitutionError> {
        let rules = rules
            .iter()
            .map(CompiledRule::compile)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            rules,
            rate_windows: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// Rule set that allows everything
    pub fn empty() -> Self {
        Self {
            rules: Vec::new(),
            rate_windows: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rule ids in evaluation order
    pub fn rule_ids(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.id.as_str()).collect()
    }

    /// Check content and token rules in order; the first match wins
    pub fn validate(&self, text: &str) -> Verdict {
        let lowered = text.to_lowercase();

        for rule in &self.rules {
            match &rule.check {
                Check::Content { patterns, phrases } => {
                    if patterns.iter().any(|p| p.is_match(text)) {
                        return rule.blocked(format!("Rule {}: PII pattern detected", rule.id));
                    }
                    if let Some(phrase) = phrases.iter().find(|p| lowered.contains(p.as_str())) {
                        return rule.blocked(format!("Rule {}: forbidden phrase '{}'", rule.id, phrase));
                    }
                }
                Check::TokenLimit { max_tokens } => {
                    let estimated = estimate_tokens(text);
                    if estimated > *max_tokens {
                        return rule.blocked(format!(
                            "Rule {}: estimated {} tokens exceeds limit {}",
                            rule.id, estimated, max_tokens
                        ));
                    }
                }
                Check::RateLimit { .. } => {}
            }
        }

        Verdict::Allowed
    }

    /// Record one call for `pod` against every rate-limit rule
    ///
    /// A blocked call is not counted against any window.
    pub fn check_rate_limit(&self, pod: &str) -> Verdict {
        self.check_rate_limit_at(pod, Utc::now())
    }

    /// `check_rate_limit` against an explicit clock reading
    pub fn check_rate_limit_at(&self, pod: &str, now: DateTime<Utc>) -> Verdict {
        let mut windows = self.rate_windows.write();
        let mut admitted = Vec::new();

        for rule in &self.rules {
            let Check::RateLimit { threshold, window } = &rule.check else {
                continue;
            };

            let key = format!("{}:{}", rule.id, pod);
            let state = windows.entry(key.clone()).or_insert_with(|| RateWindow {
                count: 0,
                window_start: now,
            });

            // Reset window if expired
            if now - state.window_start > *window {
                state.count = 0;
                state.window_start = now;
            }

            if state.count >= *threshold {
                debug!(rule = %rule.id, pod = %pod, count = state.count, "Rate limit exceeded");
                return rule.blocked(format!(
                    "Rule {}: rate limit of {} calls per {}s exceeded",
                    rule.id,
                    threshold,
                    window.num_seconds()
                ));
            }
            admitted.push(key);
        }

        for key in admitted {
            if let Some(state) = windows.get_mut(&key) {
                state.count += 1;
            }
        }
        Verdict::Allowed
    }
}
