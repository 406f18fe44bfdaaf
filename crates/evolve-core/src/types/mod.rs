//! # Core Type Definitions
//!
//! This module contains the shared vocabulary of the crate:
//! - Component identifiers (`ComponentId`)
//! - Migration chain keys (`MigrationKey`)
//! - Timestamps (`Timestamp`)
//! - Error types (`EvolveError`, `DependencyError`, `MigrationError`)
//!
//! ## Determinism Guarantees
//!
//! All types in this module:
//! - Use integer arithmetic only (no floating-point)
//! - Implement `Ord` for deterministic ordering in `BTreeMap`/`BTreeSet`

use crate::version::Version;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use thiserror::Error;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Name of an independently versioned component (an agent, a provider
/// client, a retrieval pipeline, ...).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComponentId(String);

impl ComponentId {
    /// Create a new component id.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Get the component name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for ComponentId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ComponentId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for ComponentId {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl From<&ComponentId> for ComponentId {
    fn from(id: &ComponentId) -> Self {
        id.clone()
    }
}

/// Key of a migration chain: one component moving between two versions.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MigrationKey {
    pub component: ComponentId,
    pub from: Version,
    pub to: Version,
}

impl MigrationKey {
    /// Create a new key.
    #[must_use]
    pub fn new(component: impl Into<ComponentId>, from: Version, to: Version) -> Self {
        Self {
            component: component.into(),
            from,
            to,
        }
    }
}

impl fmt::Display for MigrationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} -> {}", self.component, self.from, self.to)
    }
}

// =============================================================================
// TIME
// =============================================================================

/// Milliseconds since the Unix epoch.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// Create a timestamp from milliseconds since the epoch.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Get the raw millisecond value.
    #[must_use]
    pub const fn as_millis(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur in the evolve core.
///
/// - No silent failures
/// - Use `Result<T, EvolveError>` for fallible operations
/// - The core should never panic; all errors must be recoverable
#[derive(Debug, Error)]
pub enum EvolveError {
    /// Version text does not match `MAJOR.MINOR.PATCH[-PRERELEASE][+BUILD]`.
    #[error("Invalid version '{input}': {reason}")]
    Parse { input: String, reason: String },

    /// An invariant or version increment rule was violated.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A dependency is missing, incompatible, or part of a cycle.
    #[error(transparent)]
    Dependency(#[from] DependencyError),

    /// A migration could not be started or rolled back.
    #[error(transparent)]
    Migration(#[from] MigrationError),

    /// A chain was registered twice under the strict duplicate policy.
    #[error("Migration chain already registered: {0}")]
    DuplicateRegistration(MigrationKey),

    /// Configuration text could not be parsed.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A serialization or deserialization error occurred.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(String),
}

impl EvolveError {
    pub(crate) fn parse(input: &str, reason: impl Into<String>) -> Self {
        Self::Parse {
            input: input.to_string(),
            reason: reason.into(),
        }
    }
}

/// Why a component cannot be activated.
///
/// The `Display` form is the message hosts surface as an activation error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DependencyError {
    /// A required dependency has no registered version.
    #[error("cannot activate {component}: dependency {dependency} failed - no version registered")]
    Missing {
        component: ComponentId,
        dependency: ComponentId,
    },

    /// The registered version of a dependency is outside what was declared.
    #[error(
        "cannot activate {component}: dependency {dependency} failed - version {found} does not satisfy {requirement}"
    )]
    Incompatible {
        component: ComponentId,
        dependency: ComponentId,
        found: Version,
        requirement: String,
    },

    /// The dependency graph contains a cycle; no safe update order exists.
    #[error("dependency cycle detected: {}", join_cycle(.0))]
    Cycle(Vec<ComponentId>),
}

fn join_cycle(cycle: &[ComponentId]) -> String {
    let mut parts: Vec<&str> = cycle.iter().map(ComponentId::as_str).collect();
    if let Some(first) = cycle.first() {
        parts.push(first.as_str());
    }
    parts.join(" -> ")
}

/// Why a migration or rollback could not run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MigrationError {
    /// Nothing is registered under the key.
    #[error("no migration chain registered for {0}")]
    NoChain(MigrationKey),

    /// The chain is known from a snapshot but its step functions were
    /// never re-registered.
    #[error("migration chain for {0} was restored without executable steps; re-register it")]
    ChainNotLoaded(MigrationKey),

    /// A step depends on a step that is not registered before it.
    #[error("step '{step}' in {key} depends on '{missing}', which is not registered earlier in the chain")]
    OrderingViolation {
        key: MigrationKey,
        step: String,
        missing: String,
    },

    /// Rollback requested without a prior successful upgrade.
    #[error("no successful upgrade recorded for {0}")]
    NoPriorUpgrade(MigrationKey),
}

// =============================================================================
// TESTS
// =============================================================================
