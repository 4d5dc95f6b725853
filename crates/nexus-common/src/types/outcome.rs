//! Outcome - tri-state result of a gated public operation
//!
//! Gate closures and collaborator failures are expected states, not errors,
//! so public operations report them through this type instead of `Err`.

use serde::{Deserialize, Serialize};

/// Result of an operation that may be skipped or fail without raising
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome<T> {
    /// Operation ran to completion
    Completed(T),
    /// Operation was not attempted (gate closed, nothing to do)
    Skipped { reason: String },
    /// Operation was attempted and a collaborator failed
    Failed { reason: String },
}

impl<T> Outcome<T> {
    pub fn skipped(reason: impl Into<String>) -> Self {
        Outcome::Skipped {
            reason: reason.into(),
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Outcome::Failed {
            reason: reason.into(),
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Outcome::Completed(_))
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Outcome::Skipped { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed { .. })
    }

    /// Reason string for skipped/failed outcomes
    pub fn reason(&self) -> Option<&str> {
        match self {
            Outcome::Completed(_) => None,
            Outcome::Skipped { reason } | Outcome::Failed { reason } => Some(reason),
        }
    }

    /// Completed value, if any
    pub fn completed(self) -> Option<T> {
        match self {
            Outcome::Completed(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_completed(&self) -> Option<&T> {
        match self {
            Outcome::Completed(value) => Some(value),
            _ => None,
        }
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Outcome<U> {
        match self {
            Outcome::Completed(value) => Outcome::Completed(f(value)),
            Outcome::Skipped { reason } => Outcome::Skipped { reason },
            Outcome::Failed { reason } => Outcome::Failed { reason },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_accessors() {
        let done: Outcome<u32> = Outcome::Completed(3);
        assert!(done.is_completed());
        assert_eq!(done.reason(), None);
        assert_eq!(done.map(|v| v * 2).completed(), Some(6));

        let skipped: Outcome<u32> = Outcome::skipped("gate closed: ai_cascade");
        assert!(skipped.is_skipped());
        assert_eq!(skipped.reason(), Some("gate closed: ai_cascade"));
        assert_eq!(skipped.completed(), None);
    }

    #[test]
    fn test_outcome_serde_tag() {
        let failed: Outcome<u32> = Outcome::failed("generator unavailable");
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["reason"], "generator unavailable");
    }
}
