//! # evolve-core
//!
//! Version tracking and reversible migrations for the components of an
//! agent platform.
//!
//! This crate provides:
//! - Semantic versions with strict equality and build-insensitive precedence
//! - A dependency graph with compatibility checks, cycle detection and
//!   safe update ordering
//! - Ordered, reversible migration chains with an audit trail
//! - An append-only version history ledger
//! - Snapshots (JSON or binary) and a redb-backed snapshot store
//!
//! ## Architectural Constraints
//!
//! - Deterministic: every keyed collection is ordered, no floating point
//! - Library only: no async, no network; hosts call in explicitly
//! - Migrations only run when asked; nothing migrates implicitly
//! - Ledgers are append-only; only a full reset removes records

// =============================================================================
// MODULES
// =============================================================================

pub mod clock;
pub mod config;
pub mod formats;
pub mod graph;
pub mod history;
pub mod manager;
pub mod migration;
pub mod primitives;
pub mod storage;
pub mod types;
pub mod version;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    ComponentId, DependencyError, EvolveError, MigrationError, MigrationKey, Timestamp,
};
pub use version::{BumpKind, Identifier, Version};

// =============================================================================
// RE-EXPORTS: Engine
// =============================================================================

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{DuplicatePolicy, EvolveConfig};
pub use graph::{CompatibilityRange, DependencyGraph, GraphSnapshot, VersionDependency};
pub use history::{HistoryQuery, VersionHistory, VersionHistoryEntry};
pub use manager::VersionManager;
pub use migration::{
    CancelHandle, MigrationContext, MigrationOperation, MigrationRecord, MigrationRegistry,
    MigrationStep, StepError, StepErrorKind,
};
pub use storage::RedbSnapshotStore;

// =============================================================================
// RE-EXPORTS: Formats (from formats module)
// =============================================================================

#[cfg(feature = "crypto-hash")]
pub use formats::snapshot_crypto_hash;
pub use formats::{
    Snapshot, SnapshotHeader, snapshot_from_bytes, snapshot_from_json, snapshot_to_bytes,
    snapshot_to_json,
};
