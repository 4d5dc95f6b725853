//! Constitution document (YAML)

use std::collections::BTreeMap;
use std::path::Path;

use nexus_common::ConstitutionError;
use serde::{Deserialize, Serialize};

use crate::rules::ConstitutionRule;

/// Constitution shipped with the crate, used when no file is configured or
/// the configured one cannot be loaded
pub const DEFAULT_CONSTITUTION_YAML: &str = include_str!("../constitution.yaml");

/// Breaker parameters as declared in the document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerSpec {
    pub failure_threshold: u32,
    pub recovery_timeout_seconds: u64,
}

/// Parsed constitution document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConstitutionDocument {
    #[serde(default)]
    pub rules: Vec<ConstitutionRule>,
    #[serde(default)]
    pub circuit_breakers: BTreeMap<String, BreakerSpec>,
}

impl ConstitutionDocument {
    pub fn from_yaml(yaml: &str) -> Result<Self, ConstitutionError> {
        serde_yaml::from_str(yaml).map_err(|e| ConstitutionError::Parse(e.to_string()))
    }

    pub fn from_file(path: &Path) -> Result<Self, ConstitutionError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConstitutionError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_yaml(&raw)
    }

    /// The embedded default document
    pub fn embedded() -> Result<Self, ConstitutionError> {
        Self::from_yaml(DEFAULT_CONSTITUTION_YAML)
    }
}
