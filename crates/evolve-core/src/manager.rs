//! # Version Manager
//!
//! Composition root owning the dependency graph, the migration registry and
//! the version history.
//!
//! `VersionManager` is `Send + Sync` and meant to be shared by reference
//! (or `Arc`) between the layers that register components and the
//! administrative paths that run migrations.
//!
//! ## Locking
//!
//! Graph and history sit behind reader/writer locks so dependency checks and
//! history queries run concurrently. The registry sits behind one mutex,
//! which serializes every register/migrate/rollback. Locks are always taken
//! in the order graph, migrations, history. A poisoned lock is recovered,
//! since every mutation leaves the guarded value consistent.
//!
//! Step functions run with only the registry mutex held. A step may read or
//! update components and history through the same manager, but must not
//! call back into migration methods. `upgrade_component` and
//! `rollback_component` read the current version up front and take the
//! graph write lock again only to commit; if the version moved while the
//! chain ran, the commit fails with `EvolveError::Validation`.

use crate::clock::{Clock, SystemClock};
use crate::config::EvolveConfig;
use crate::formats::{Snapshot, snapshot_from_bytes, snapshot_to_bytes};
use crate::graph::{DependencyGraph, GraphSnapshot, VersionDependency};
use crate::history::{HistoryQuery, VersionHistory, VersionHistoryEntry};
use crate::migration::{
    MigrationContext, MigrationRecord, MigrationRegistry, MigrationStep, RegistrySnapshot,
};
use crate::{BumpKind, ComponentId, EvolveError, MigrationKey, Version};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Metadata key naming the operation that produced a history entry.
pub const OPERATION_METADATA_KEY: &str = "operation";

/// Metadata key holding the version a component moved away from.
pub const PREVIOUS_VERSION_METADATA_KEY: &str = "previous_version";

/// Shared entry point for version tracking and migrations.
pub struct VersionManager {
    graph: RwLock<DependencyGraph>,
    migrations: Mutex<MigrationRegistry>,
    history: RwLock<VersionHistory>,
    config: EvolveConfig,
}

impl std::fmt::Debug for VersionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionManager")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Default for VersionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl VersionManager {
    /// Create a manager with default configuration and the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(EvolveConfig::default())
    }

    #[must_use]
    pub fn with_config(config: EvolveConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a manager whose ledgers are stamped by `clock`.
    #[must_use]
    pub fn with_clock(config: EvolveConfig, clock: Arc<dyn Clock>) -> Self {
        let graph = if config.dependencies.reject_cycles {
            DependencyGraph::rejecting_cycles()
        } else {
            DependencyGraph::new()
        };
        let migrations =
            MigrationRegistry::with_options(config.migrations.duplicate_policy, clock.clone());

        Self {
            graph: RwLock::new(graph),
            migrations: Mutex::new(migrations),
            history: RwLock::new(VersionHistory::with_clock(clock)),
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &EvolveConfig {
        &self.config
    }

    // =========================================================================
    // COMPONENTS & DEPENDENCIES
    // =========================================================================

    /// Set a component's current version.
    ///
    /// A history entry is appended only when the version actually changes
    /// (strict equality, build metadata included). Returns whether one was.
    pub fn register_component(
        &self,
        component: impl Into<ComponentId>,
        version: Version,
        changes: Vec<String>,
        metadata: BTreeMap<String, String>,
    ) -> bool {
        let mut graph = self.graph_write();
        let mut history = self.history_write();
        record_version(
            &mut graph,
            &mut history,
            component.into(),
            version,
            changes,
            metadata,
        )
    }

    pub fn register_dependency(
        &self,
        component: impl Into<ComponentId>,
        dependency: VersionDependency,
    ) -> Result<(), EvolveError> {
        self.graph_write().register_dependency(component, dependency)
    }

    pub fn check_dependencies(&self, component: &str) -> Result<bool, EvolveError> {
        self.graph_read().check_dependencies(component)
    }

    /// Gate a component's activation on its dependencies.
    ///
    /// The error's `Display` is the activation message, e.g.
    /// "cannot activate agent: dependency rag failed - no version registered".
    pub fn activate(&self, component: &str) -> Result<(), EvolveError> {
        match self.check_dependencies(component) {
            Ok(_) => {
                tracing::info!("Activated {}", component);
                Ok(())
            }
            Err(e) => {
                tracing::warn!("{}", e);
                Err(e)
            }
        }
    }

    #[must_use]
    pub fn find_cycles(&self) -> Vec<Vec<ComponentId>> {
        self.graph_read().find_cycles()
    }

    pub fn get_update_order(&self) -> Result<Vec<ComponentId>, EvolveError> {
        self.graph_read().get_update_order()
    }

    #[must_use]
    pub fn get_dependent_components(&self, component: &str) -> BTreeSet<ComponentId> {
        self.graph_read().get_dependent_components(component)
    }

    #[must_use]
    pub fn version_of(&self, component: &str) -> Option<Version> {
        self.graph_read().version_of(component).cloned()
    }

    #[must_use]
    pub fn dependencies_of(&self, component: &str) -> Vec<VersionDependency> {
        self.graph_read().dependencies_of(component).to_vec()
    }

    #[must_use]
    pub fn components(&self) -> Vec<ComponentId> {
        self.graph_read().components()
    }

    // =========================================================================
    // MIGRATIONS
    // =========================================================================

    pub fn register_migration(
        &self,
        component: impl Into<ComponentId>,
        from: Version,
        to: Version,
        steps: Vec<MigrationStep>,
    ) -> Result<(), EvolveError> {
        self.registry().register(component, from, to, steps)
    }

    /// Run a chain without touching the component's registered version.
    pub fn migrate(
        &self,
        component: impl Into<ComponentId>,
        from: Version,
        to: Version,
        context: &mut MigrationContext,
    ) -> Result<bool, EvolveError> {
        self.registry().migrate(component, from, to, context)
    }

    /// Undo a chain without touching the component's registered version.
    pub fn rollback(
        &self,
        component: impl Into<ComponentId>,
        from: Version,
        to: Version,
        context: &mut MigrationContext,
    ) -> Result<bool, EvolveError> {
        self.registry().rollback(component, from, to, context)
    }

    /// Move a component to `next`.
    ///
    /// The step from the current version must be a valid `bump` increment.
    /// The chain `(component, current, next)` is then run; on success `next`
    /// becomes the current version and the executed step descriptions are
    /// recorded as the history entry's changes.
    pub fn upgrade_component(
        &self,
        component: &str,
        next: Version,
        bump: BumpKind,
        context: &mut MigrationContext,
    ) -> Result<bool, EvolveError> {
        let current = self.version_of(component).ok_or_else(|| {
            EvolveError::Validation(format!("component {component} has no registered version"))
        })?;
        current.validate_increment(&next, bump)?;

        let key = MigrationKey::new(component, current.clone(), next.clone());
        let changes = {
            let mut registry = self.registry();
            if !registry.migrate(component, current.clone(), next.clone(), context)? {
                return Ok(false);
            }
            registry.chain_steps(&key).unwrap_or_default()
        };

        let mut graph = self.graph_write();
        ensure_unmoved(&graph, component, Some(&current))?;
        let mut history = self.history_write();
        record_version(
            &mut graph,
            &mut history,
            ComponentId::new(component),
            next,
            changes,
            operation_metadata("upgrade", &current),
        );
        Ok(true)
    }

    /// Undo the upgrade `from -> to` and make `from` current again.
    pub fn rollback_component(
        &self,
        component: &str,
        from: Version,
        to: Version,
        context: &mut MigrationContext,
    ) -> Result<bool, EvolveError> {
        let before = self.version_of(component);
        if !self
            .registry()
            .rollback(component, from.clone(), to.clone(), context)?
        {
            return Ok(false);
        }

        let mut graph = self.graph_write();
        ensure_unmoved(&graph, component, before.as_ref())?;
        let mut history = self.history_write();
        record_version(
            &mut graph,
            &mut history,
            ComponentId::new(component),
            from,
            vec![format!("rolled back from {to}")],
            operation_metadata("rollback", &to),
        );
        Ok(true)
    }

    #[must_use]
    pub fn get_migration_history(&self, component: Option<&str>) -> Vec<MigrationRecord> {
        self.registry().get_migration_history(component)
    }

    #[must_use]
    pub fn is_upgraded(&self, key: &MigrationKey) -> bool {
        self.registry().is_upgraded(key)
    }

    // =========================================================================
    // HISTORY
    // =========================================================================

    #[must_use]
    pub fn get_history(&self, component: &str, limit: Option<usize>) -> Vec<VersionHistoryEntry> {
        self.history_read().get_history(component, limit)
    }

    #[must_use]
    pub fn get_latest_version(&self, component: &str) -> Option<Version> {
        self.history_read().get_latest_version(component).cloned()
    }

    #[must_use]
    pub fn get_changes_between(&self, component: &str, from: &Version, to: &Version) -> Vec<String> {
        self.history_read().get_changes_between(component, from, to)
    }

    #[must_use]
    pub fn search_history(&self, query: &HistoryQuery) -> Vec<VersionHistoryEntry> {
        self.history_read().search_history(query)
    }

    // =========================================================================
    // SNAPSHOTS
    // =========================================================================

    /// Capture all state except step functions.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        let graph = self.graph_read();
        let registry = self.registry();
        let history = self.history_read();
        Snapshot {
            graph: GraphSnapshot::from(&*graph),
            migrations: RegistrySnapshot::from(&*registry),
            history: history.entries().to_vec(),
        }
    }

    /// Replace all state with `snapshot`.
    ///
    /// Chains registered on this manager stay executable; chains only known
    /// from the snapshot must be registered again before they can run.
    pub fn restore(&self, snapshot: Snapshot) {
        let mut graph = self.graph_write();
        let mut registry = self.registry();
        let mut history = self.history_write();
        graph.restore(snapshot.graph);
        registry.restore(snapshot.migrations);
        history.restore(snapshot.history);
        tracing::info!("Restored state for {} component(s)", graph.components().len());
    }

    /// Binary snapshot (header + postcard).
    pub fn snapshot_bytes(&self) -> Result<Vec<u8>, EvolveError> {
        snapshot_to_bytes(&self.snapshot())
    }

    /// Restore from a binary snapshot, bounded by `snapshot.max_payload_bytes`.
    pub fn restore_bytes(&self, bytes: &[u8]) -> Result<(), EvolveError> {
        let snapshot = snapshot_from_bytes(bytes, self.config.snapshot.max_payload_bytes)?;
        self.restore(snapshot);
        Ok(())
    }

    /// Clear the migration and version ledgers.
    ///
    /// Versions, dependencies, chains and upgrade markers are kept.
    pub fn reset_ledgers(&self) {
        let mut registry = self.registry();
        let mut history = self.history_write();
        registry.clear_history();
        history.clear();
    }

    // =========================================================================
    // LOCK HELPERS
    // =========================================================================

    fn graph_read(&self) -> RwLockReadGuard<'_, DependencyGraph> {
        self.graph.read().unwrap_or_else(|e| e.into_inner())
    }

    fn graph_write(&self) -> RwLockWriteGuard<'_, DependencyGraph> {
        self.graph.write().unwrap_or_else(|e| e.into_inner())
    }

    fn registry(&self) -> MutexGuard<'_, MigrationRegistry> {
        self.migrations.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn history_read(&self) -> RwLockReadGuard<'_, VersionHistory> {
        self.history.read().unwrap_or_else(|e| e.into_inner())
    }

    fn history_write(&self) -> RwLockWriteGuard<'_, VersionHistory> {
        self.history.write().unwrap_or_else(|e| e.into_inner())
    }
}

fn record_version(
    graph: &mut DependencyGraph,
    history: &mut VersionHistory,
    component: ComponentId,
    version: Version,
    changes: Vec<String>,
    metadata: BTreeMap<String, String>,
) -> bool {
    let previous = graph.register_version(component.clone(), version.clone());
    if previous.as_ref() == Some(&version) {
        return false;
    }
    history.add_entry(component, version, changes, metadata);
    true
}

/// Fail when `component` no longer has the version seen before a chain ran.
fn ensure_unmoved(
    graph: &DependencyGraph,
    component: &str,
    expected: Option<&Version>,
) -> Result<(), EvolveError> {
    let found = graph.version_of(component);
    if found == expected {
        return Ok(());
    }
    let describe = |v: Option<&Version>| v.map_or_else(|| "none".to_string(), ToString::to_string);
    tracing::warn!(
        "Not committing {}: version moved from {} to {} while its chain ran",
        component,
        describe(expected),
        describe(found)
    );
    Err(EvolveError::Validation(format!(
        "component {component} moved from {} to {} while its chain ran",
        describe(expected),
        describe(found)
    )))
}

fn operation_metadata(operation: &str, previous: &Version) -> BTreeMap<String, String> {
    let mut metadata = BTreeMap::new();
    metadata.insert(OPERATION_METADATA_KEY.to_string(), operation.to_string());
    metadata.insert(PREVIOUS_VERSION_METADATA_KEY.to_string(), previous.to_string());
    metadata
}

// =============================================================================
// TESTS
// =============================================================================
