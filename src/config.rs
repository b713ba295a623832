// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the forwarder.
//!
//! Configuration is read once at startup into a [`ForwarderConfig`] value and
//! passed by reference into [`ReplicationCoordinator::new()`](crate::ReplicationCoordinator::new).
//! Nothing else in the crate reads the environment.
//!
//! # Quick Start
//!
//! ```rust
//! use cdc_forwarder::config::{ForwarderConfig, SourceConfig, TargetConfig};
//!
//! let config = ForwarderConfig {
//!     source: SourceConfig::new("mongodb://source:27017"),
//!     targets: vec![
//!         TargetConfig::new("eu", "mongodb://eu:27017"),
//!         TargetConfig::new("us", "mongodb://us:27017"),
//!     ],
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```
//!
//! # Configuration Structure
//!
//! ```text
//! ForwarderConfig
//! ├── source: SourceConfig          # Authoritative cluster + database to watch
//! ├── target_database: String       # Database name used on every target
//! ├── targets: Vec<TargetConfig>    # One entry per replica cluster
//! ├── checkpoint: CheckpointConfig  # Where the resume cursor lives (on the source)
//! └── connect_timeout: String       # Per-step startup timeout ("10s")
//! ```
//!
//! # Environment
//!
//! ```text
//! SOURCE_MONGODB_URI=mongodb://source:27017   (required)
//! SOURCE_DB=globalData
//! TARGET_DB=data
//! TARGET_MONGODB_URI_EU=mongodb://eu:27017     (one or more)
//! TARGET_MONGODB_URI_US=mongodb://us:27017
//! CHECKPOINT_DB=globalDataReplication
//! CHECKPOINT_COLLECTION=status
//! CONNECT_TIMEOUT=10s
//! ```

use crate::error::{ForwarderError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Environment variable holding the source connection string.
pub const SOURCE_URI_VAR: &str = "SOURCE_MONGODB_URI";
/// Environment variable holding the watched database name.
pub const SOURCE_DB_VAR: &str = "SOURCE_DB";
/// Environment variable holding the database name used on targets.
pub const TARGET_DB_VAR: &str = "TARGET_DB";
/// Every variable starting with this prefix is a target connection string.
pub const TARGET_URI_PREFIX: &str = "TARGET_MONGODB_URI_";
/// Environment variable overriding the checkpoint database.
pub const CHECKPOINT_DB_VAR: &str = "CHECKPOINT_DB";
/// Environment variable overriding the checkpoint collection.
pub const CHECKPOINT_COLLECTION_VAR: &str = "CHECKPOINT_COLLECTION";
/// Environment variable overriding the startup connection timeout.
pub const CONNECT_TIMEOUT_VAR: &str = "CONNECT_TIMEOUT";

// ═══════════════════════════════════════════════════════════════════════════════
// Top-level config: built once by the binary, handed to the coordinator
// ═══════════════════════════════════════════════════════════════════════════════

/// The top-level config object passed to `ReplicationCoordinator::new()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwarderConfig {
    /// The authoritative cluster and the database whose changes we forward.
    pub source: SourceConfig,

    /// Database name written on every target.
    ///
    /// Independent of `source.database`: only the collection name is
    /// carried over from each event's namespace.
    #[serde(default = "default_target_database")]
    pub target_database: String,

    /// Targets, in discovery order.
    pub targets: Vec<TargetConfig>,

    /// Location of the resume cursor on the source cluster.
    #[serde(default)]
    pub checkpoint: CheckpointConfig,

    /// Timeout for each startup connection check, as a duration string.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: String,
}

fn default_target_database() -> String {
    "data".to_string()
}

fn default_connect_timeout() -> String {
    "10s".to_string()
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            source: SourceConfig::default(),
            target_database: default_target_database(),
            targets: Vec::new(),
            checkpoint: CheckpointConfig::default(),
            connect_timeout: default_connect_timeout(),
        }
    }
}

impl ForwarderConfig {
    /// Read the configuration from the process environment.
    ///
    /// Does not validate; call [`validate()`](Self::validate) before connecting.
    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars())
    }

    /// Build the configuration from an arbitrary set of `(name, value)` pairs.
    ///
    /// Empty values are treated as unset. Target entries are sorted by
    /// variable name so their order does not depend on how the platform
    /// enumerates the environment.
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut config = Self::default();
        let mut targets: Vec<(String, String)> = Vec::new();

        for (key, value) in vars {
            let key: String = key.into();
            let value: String = value.into();
            if value.trim().is_empty() {
                continue;
            }

            match key.as_str() {
                SOURCE_URI_VAR => config.source.uri = value,
                SOURCE_DB_VAR => config.source.database = value,
                TARGET_DB_VAR => config.target_database = value,
                CHECKPOINT_DB_VAR => config.checkpoint.database = value,
                CHECKPOINT_COLLECTION_VAR => config.checkpoint.collection = value,
                CONNECT_TIMEOUT_VAR => config.connect_timeout = value,
                _ => {
                    if let Some(suffix) = key.strip_prefix(TARGET_URI_PREFIX) {
                        targets.push((suffix.to_string(), value));
                    }
                }
            }
        }

        targets.sort_by(|a, b| a.0.cmp(&b.0));
        config.targets = targets
            .into_iter()
            .map(|(suffix, uri)| TargetConfig::new(&target_name(&suffix), &uri))
            .collect();

        config
    }

    /// Check the configuration before any connection is attempted.
    pub fn validate(&self) -> Result<()> {
        if self.source.uri.trim().is_empty() {
            return Err(ForwarderError::Config(format!(
                "{} is not set",
                SOURCE_URI_VAR
            )));
        }
        if self.targets.is_empty() {
            return Err(ForwarderError::Config(format!(
                "no target connection strings found ({}*)",
                TARGET_URI_PREFIX
            )));
        }
        if self.source.database.trim().is_empty() {
            return Err(ForwarderError::Config("source database name is empty".to_string()));
        }
        if self.target_database.trim().is_empty() {
            return Err(ForwarderError::Config("target database name is empty".to_string()));
        }
        // Checkpoint upserts in the watched database would come back as events
        if self.checkpoint.database == self.source.database {
            return Err(ForwarderError::Config(format!(
                "checkpoint namespace {} is inside the watched database {}",
                self.checkpoint.namespace(),
                self.source.database
            )));
        }

        let mut seen = HashSet::new();
        for target in &self.targets {
            if target.uri.trim().is_empty() {
                return Err(ForwarderError::Config(format!(
                    "target {} has an empty connection string",
                    target.name
                )));
            }
            if !seen.insert(target.name.as_str()) {
                return Err(ForwarderError::Config(format!(
                    "duplicate target name: {}",
                    target.name
                )));
            }
        }

        Ok(())
    }

    /// Parse `connect_timeout` to a Duration.
    pub fn connect_timeout_duration(&self) -> Duration {
        humantime::parse_duration(&self.connect_timeout).unwrap_or(Duration::from_secs(10))
    }

    /// Target names in configuration order (for logging).
    pub fn target_names(&self) -> Vec<&str> {
        self.targets.iter().map(|t| t.name.as_str()).collect()
    }
}

/// Derive a target name from the suffix of its environment variable.
fn target_name(suffix: &str) -> String {
    let name = suffix.trim_matches('_').to_lowercase();
    if name.is_empty() {
        "default".to_string()
    } else {
        name
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SourceConfig / TargetConfig: one per cluster
// ═══════════════════════════════════════════════════════════════════════════════

/// The authoritative cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Connection string, e.g. `"mongodb://source:27017/?replicaSet=rs0"`.
    pub uri: String,

    /// Database whose changes are forwarded.
    #[serde(default = "default_source_database")]
    pub database: String,
}

fn default_source_database() -> String {
    "globalData".to_string()
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            uri: String::new(),
            database: default_source_database(),
        }
    }
}

impl SourceConfig {
    /// Source config with the default database.
    pub fn new(uri: &str) -> Self {
        Self {
            uri: uri.to_string(),
            ..Default::default()
        }
    }
}

/// One replica cluster that receives every forwarded write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Short name used in logs, metrics and outcomes.
    pub name: String,

    /// Connection string.
    pub uri: String,
}

impl TargetConfig {
    pub fn new(name: &str, uri: &str) -> Self {
        Self {
            name: name.to_string(),
            uri: uri.to_string(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CheckpointConfig: resume cursor location on the source
// ═══════════════════════════════════════════════════════════════════════════════

/// Where the resume cursor is stored.
///
/// The record lives on the source cluster itself so the checkpoint shares
/// the failure domain of the data it describes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    #[serde(default = "default_checkpoint_database")]
    pub database: String,

    #[serde(default = "default_checkpoint_collection")]
    pub collection: String,

    /// `_id` of the single checkpoint record.
    #[serde(default = "default_checkpoint_key")]
    pub key: String,
}

fn default_checkpoint_database() -> String {
    "globalDataReplication".to_string()
}

fn default_checkpoint_collection() -> String {
    "status".to_string()
}

fn default_checkpoint_key() -> String {
    "resumeToken".to_string()
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            database: default_checkpoint_database(),
            collection: default_checkpoint_collection(),
            key: default_checkpoint_key(),
        }
    }
}

impl CheckpointConfig {
    /// `database.collection`, for logging.
    pub fn namespace(&self) -> String {
        format!("{}.{}", self.database, self.collection)
    }
}
