//! # Configuration
//!
//! Runtime options for a [`crate::VersionManager`], loadable from TOML.
//!
//! Every field has a default, so an empty document is a valid config:
//!
//! ```toml
//! [migrations]
//! duplicate_policy = "reject"
//!
//! [dependencies]
//! reject_cycles = true
//!
//! [snapshot]
//! max_payload_bytes = 1048576
//! ```

use crate::{EvolveError, primitives};
use serde::Deserialize;
use std::path::Path;

/// What `register` does when a chain key is already present.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    /// Append the new steps to the existing chain.
    #[default]
    Append,
    /// Fail with `EvolveError::DuplicateRegistration`.
    Reject,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EvolveConfig {
    pub migrations: MigrationsConfig,
    pub dependencies: DependenciesConfig,
    pub snapshot: SnapshotConfig,
}

/// Migration registry options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MigrationsConfig {
    pub duplicate_policy: DuplicatePolicy,
}

/// Dependency graph options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DependenciesConfig {
    /// Refuse a dependency edge that would close a cycle.
    pub reject_cycles: bool,
}

/// Snapshot decoding limits.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    /// Largest binary snapshot accepted by `snapshot_from_bytes`.
    pub max_payload_bytes: usize,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            max_payload_bytes: primitives::MAX_SNAPSHOT_PAYLOAD_SIZE,
        }
    }
}

impl EvolveConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, EvolveError> {
        toml::from_str(text).map_err(|e| EvolveError::ConfigError(e.to_string()))
    }

    /// Read and parse a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, EvolveError> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| EvolveError::IoError(e.to_string()))?;
        Self::from_toml_str(&text)
    }
}
