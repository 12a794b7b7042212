//! Configuration management for Trellis services.
//!
//! Configuration is loaded from (in priority order):
//! 1. Environment variables (`TRELLIS__` prefix, `__` separator)
//! 2. Config file (`trellis.toml` or any other prefix)
//! 3. Defaults

use serde::Deserialize;

use crate::error::{Result, TrellisError};

/// Top-level configuration. Every section is optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TrellisConfig {
    #[serde(default)]
    pub locks: LockSettings,
    #[serde(default)]
    pub registry: RegistrySettings,
    #[serde(default)]
    pub copy: CopySettings,
    #[serde(default)]
    pub batch: BatchSettings,
    #[serde(default)]
    pub import: ImportSettings,
    #[serde(default)]
    pub neo4j: Neo4jSettings,
}

impl TrellisConfig {
    /// Load from `<file_prefix>.{toml,json,yaml}` (optional) and the environment.
    pub fn load(file_prefix: &str) -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::File::with_name(file_prefix).required(false))
            .add_source(
                config::Environment::with_prefix("TRELLIS")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| TrellisError::Config(e.to_string()))?;

        let loaded: Self = cfg
            .try_deserialize()
            .map_err(|e| TrellisError::Config(e.to_string()))?;
        tracing::debug!(
            lock_ttl_secs = loaded.locks.ttl_secs,
            batch_policy = ?loaded.batch.policy,
            "Loaded configuration"
        );
        Ok(loaded)
    }
}

/// Document lock settings.
#[derive(Debug, Clone, Deserialize)]
pub struct LockSettings {
    /// Lifetime of a lock before another user may take it over.
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistrySettings {
    /// Number of `externalDocN` slots examined when clearing stale entries.
    #[serde(default = "default_scan_limit")]
    pub scan_limit: usize,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            scan_limit: default_scan_limit(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CopySettings {
    /// Marker prepended to statements of copied items on request.
    #[serde(default = "default_title_prefix")]
    pub title_prefix: String,
}

impl Default for CopySettings {
    fn default() -> Self {
        Self {
            title_prefix: default_title_prefix(),
        }
    }
}

/// How a batch of tree updates commits.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BatchPolicy {
    /// Each key commits on its own; failures are reported per key.
    #[default]
    PerKey,
    /// The whole batch commits once, or not at all.
    AllOrNothing,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BatchSettings {
    #[serde(default)]
    pub policy: BatchPolicy,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImportSettings {
    #[serde(default = "default_creator")]
    pub default_creator: String,
    #[serde(default = "default_import_title")]
    pub default_title: String,
    /// Organization that owns imported documents, if any.
    #[serde(default)]
    pub organization: Option<i64>,
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self {
            default_creator: default_creator(),
            default_title: default_import_title(),
            organization: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Neo4jSettings {
    #[serde(default = "default_neo4j_uri")]
    pub uri: String,
    #[serde(default = "default_neo4j_user")]
    pub user: String,
    #[serde(default = "default_neo4j_password")]
    pub password: String,
}

impl Default for Neo4jSettings {
    fn default() -> Self {
        Self {
            uri: default_neo4j_uri(),
            user: default_neo4j_user(),
            password: default_neo4j_password(),
        }
    }
}

fn default_ttl_secs() -> u64 {
    600
}

fn default_scan_limit() -> usize {
    crate::registry::DEFAULT_SCAN_LIMIT
}

fn default_title_prefix() -> String {
    "Copy of ".to_string()
}

fn default_creator() -> String {
    "System".to_string()
}

fn default_import_title() -> String {
    "Imported CSV".to_string()
}

fn default_neo4j_uri() -> String {
    "bolt://localhost:7687".to_string()
}

fn default_neo4j_user() -> String {
    "neo4j".to_string()
}

fn default_neo4j_password() -> String {
    "trellis-dev".to_string()
}
