//! Self-tuning configuration

use std::path::{Path, PathBuf};

use config::{Config, Environment, File, FileFormat};
use nexus_bandit::BanditConfig;
use nexus_common::{NexusError, Result};
use nexus_constitution::DEFAULT_QUEUE_CAPACITY;
use nexus_darwinian::EvolutionConfig;
use nexus_planner::PlannerConfig;
use serde::{Deserialize, Serialize};

/// Environment variable naming an explicit config file
pub const CONFIG_PATH_ENV: &str = "NEXUS_CONFIG";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NexusConfig {
    pub evolution: EvolutionConfig,
    pub planner: PlannerConfig,
    pub bandit: BanditConfig,
    pub constitution: ConstitutionSettings,
    pub ledger: LedgerSettings,
    pub alerts: AlertSettings,
}

impl NexusConfig {
    /// Load configuration from `.env`, an optional config file and
    /// `NEXUS_`-prefixed environment variables
    ///
    /// The file is `$NEXUS_CONFIG` when set (and must exist), otherwise an
    /// optional `nexus.{toml,yaml,json}` in the working directory. Nested
    /// keys use `__`: `NEXUS_EVOLUTION__POPULATION_SIZE=80`.
    pub fn load() -> Result<Self> {
        // Try to load .env file
        let _ = dotenvy::dotenv();

        let file = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) if !path.trim().is_empty() => File::from(PathBuf::from(path)).required(true),
            _ => File::with_name("nexus").required(false),
        };

        let settings = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix("NEXUS")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| NexusError::Config(e.to_string()))?;

        settings
            .try_deserialize()
            .map_err(|e| NexusError::Config(e.to_string()))
    }

    /// Load a single config file, format chosen by extension
    pub fn from_file(path: &Path) -> Result<Self> {
        Config::builder()
            .add_source(File::from(path).required(true))
            .build()
            .and_then(Config::try_deserialize)
            .map_err(|e| NexusError::Config(e.to_string()))
    }

    /// Parse YAML text
    pub fn from_yaml(text: &str) -> Result<Self> {
        Config::builder()
            .add_source(File::from_str(text, FileFormat::Yaml))
            .build()
            .and_then(Config::try_deserialize)
            .map_err(|e| NexusError::Config(e.to_string()))
    }
}

/// Constitution source
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConstitutionSettings {
    /// YAML document; the embedded default is used when absent or invalid
    pub path: Option<PathBuf>,
}

/// Proof signing keys
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerSettings {
    /// Hex Ed25519 seed (32 bytes). A process keypair is generated when unset.
    pub signing_key_hex: Option<String>,
    /// Pinned public key used by `verify` when set
    pub public_key_hex: Option<String>,
    /// Proofs returned by history queries
    pub history_limit: usize,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            signing_key_hex: None,
            public_key_hex: None,
            history_limit: 20,
        }
    }
}

/// Operator alert delivery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertSettings {
    /// Chat webhook; alerts are only logged when unset
    pub webhook_url: Option<String>,
    pub queue_capacity: usize,
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            webhook_url: None,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}
