//! # Migration Registry
//!
//! Ordered step chains keyed by `(component, from, to)`, their execution,
//! and the audit trail of every run.
//!
//! ## Failure semantics
//!
//! Runs stop at the first failing step. Nothing is compensated
//! automatically: side effects already applied to the context stay applied,
//! so step authors design idempotent or compensating logic themselves.
//! Once a run starts, exactly one `MigrationRecord` is appended for it.

use super::{MigrationContext, MigrationOperation, MigrationRecord, MigrationStep, StepError};
use crate::clock::{Clock, SystemClock};
use crate::config::DuplicatePolicy;
use crate::{ComponentId, EvolveError, MigrationError, MigrationKey, Version};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

// =============================================================================
// CHAINS
// =============================================================================

/// Step metadata that survives a snapshot (functions do not).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepManifest {
    pub description: String,
    pub dependencies: Vec<String>,
}

impl From<&MigrationStep> for StepManifest {
    fn from(step: &MigrationStep) -> Self {
        Self {
            description: step.description().to_string(),
            dependencies: step.dependencies().iter().cloned().collect(),
        }
    }
}

/// Serializable description of one registered chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainManifest {
    pub component: ComponentId,
    pub from: Version,
    pub to: Version,
    pub steps: Vec<StepManifest>,
}

impl ChainManifest {
    fn key(&self) -> MigrationKey {
        MigrationKey::new(self.component.clone(), self.from.clone(), self.to.clone())
    }
}

#[derive(Debug, Clone)]
enum Chain {
    /// Executable steps registered by the host.
    Loaded(Vec<MigrationStep>),
    /// Known from a snapshot; must be re-registered before it can run.
    Restored(Vec<StepManifest>),
}

impl Chain {
    fn manifest(&self) -> Vec<StepManifest> {
        match self {
            Self::Loaded(steps) => steps.iter().map(StepManifest::from).collect(),
            Self::Restored(manifest) => manifest.clone(),
        }
    }
}

// =============================================================================
// REGISTRY
// =============================================================================

/// Registry of migration chains plus their execution history.
pub struct MigrationRegistry {
    chains: BTreeMap<MigrationKey, Chain>,
    /// Keys with a successful upgrade not yet rolled back.
    upgraded: BTreeSet<MigrationKey>,
    history: Vec<MigrationRecord>,
    duplicate_policy: DuplicatePolicy,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for MigrationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationRegistry")
            .field("chains", &self.chains.len())
            .field("upgraded", &self.upgraded.len())
            .field("history_len", &self.history.len())
            .field("duplicate_policy", &self.duplicate_policy)
            .finish_non_exhaustive()
    }
}

impl Default for MigrationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MigrationRegistry {
    /// Create an empty registry that appends on duplicate registration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_options(DuplicatePolicy::default(), Arc::new(SystemClock))
    }

    /// Create an empty registry with an explicit policy and clock.
    #[must_use]
    pub fn with_options(duplicate_policy: DuplicatePolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            chains: BTreeMap::new(),
            upgraded: BTreeSet::new(),
            history: Vec::new(),
            duplicate_policy,
            clock,
        }
    }

    /// Register a chain of steps under `(component, from, to)`.
    ///
    /// An existing executable chain is extended (or refused under
    /// `DuplicatePolicy::Reject`). A chain only known from a snapshot is
    /// replaced by the executable one.
    pub fn register(
        &mut self,
        component: impl Into<ComponentId>,
        from: Version,
        to: Version,
        steps: Vec<MigrationStep>,
    ) -> Result<(), EvolveError> {
        let key = MigrationKey::new(component, from, to);
        let added = steps.len();

        match self.chains.get_mut(&key) {
            Some(Chain::Loaded(existing)) => match self.duplicate_policy {
                DuplicatePolicy::Append => {
                    existing.extend(steps);
                    tracing::info!(
                        "Appended {} step(s) to migration chain {} ({} total)",
                        added,
                        key,
                        existing.len()
                    );
                }
                DuplicatePolicy::Reject => {
                    tracing::warn!("Refused duplicate migration chain {}", key);
                    return Err(EvolveError::DuplicateRegistration(key));
                }
            },
            Some(chain @ Chain::Restored(_)) => {
                *chain = Chain::Loaded(steps);
                tracing::info!("Reloaded migration chain {} ({} step(s))", key, added);
            }
            None => {
                tracing::info!("Registered migration chain {} ({} step(s))", key, added);
                self.chains.insert(key, Chain::Loaded(steps));
            }
        }
        Ok(())
    }

    /// Run the upgrade functions of a chain in registration order.
    ///
    /// Fails without recording anything when no executable chain exists or
    /// a step depends on a step that is not registered before it. Otherwise
    /// returns whether every step completed, after appending the record.
    pub fn migrate(
        &mut self,
        component: impl Into<ComponentId>,
        from: Version,
        to: Version,
        context: &mut MigrationContext,
    ) -> Result<bool, EvolveError> {
        let key = MigrationKey::new(component, from, to);
        let steps = self.loaded_steps(&key)?;
        validate_ordering(&key, &steps)?;

        tracing::info!("Starting migration {} ({} step(s))", key, steps.len());
        context.begin(key.clone(), MigrationOperation::Upgrade);

        let mut executed = Vec::with_capacity(steps.len());
        let mut error = None;
        for step in &steps {
            if let Err(message) = run_upgrade_step(step, context) {
                error = Some(message);
                break;
            }
            executed.push(step.description().to_string());
        }
        context.finish();

        let success = error.is_none();
        if success {
            self.upgraded.insert(key.clone());
            tracing::info!("Migration {} completed", key);
        } else {
            tracing::warn!(
                "Migration {} failed after {} of {} step(s)",
                key,
                executed.len(),
                steps.len()
            );
        }
        self.record(&key, MigrationOperation::Upgrade, executed, error);
        Ok(success)
    }

    /// Undo a previously successful upgrade, running rollback functions in
    /// reverse registration order.
    ///
    /// Fails with `MigrationError::NoPriorUpgrade`, changing nothing, unless
    /// the key's last completed operation was a successful upgrade. On full
    /// success the upgrade marker is cleared; on partial failure it stays.
    pub fn rollback(
        &mut self,
        component: impl Into<ComponentId>,
        from: Version,
        to: Version,
        context: &mut MigrationContext,
    ) -> Result<bool, EvolveError> {
        let key = MigrationKey::new(component, from, to);
        if !self.upgraded.contains(&key) {
            return Err(MigrationError::NoPriorUpgrade(key).into());
        }
        let steps = self.loaded_steps(&key)?;

        tracing::info!("Starting rollback {} ({} step(s))", key, steps.len());
        context.begin(key.clone(), MigrationOperation::Rollback);

        let mut executed = Vec::with_capacity(steps.len());
        let mut error = None;
        for step in steps.iter().rev() {
            if let Err(message) = run_rollback_step(step, context) {
                error = Some(message);
                break;
            }
            executed.push(step.description().to_string());
        }
        context.finish();

        let success = error.is_none();
        if success {
            self.upgraded.remove(&key);
            tracing::info!("Rollback {} completed", key);
        } else {
            tracing::warn!(
                "Rollback {} failed after {} of {} step(s); upgrade marker kept",
                key,
                executed.len(),
                steps.len()
            );
        }
        self.record(&key, MigrationOperation::Rollback, executed, error);
        Ok(success)
    }

    /// All records in execution order, optionally for one component.
    #[must_use]
    pub fn get_migration_history(&self, component: Option<&str>) -> Vec<MigrationRecord> {
        self.history
            .iter()
            .filter(|r| component.is_none_or(|c| r.component.as_str() == c))
            .cloned()
            .collect()
    }

    /// Check whether any chain (executable or restored) exists for the key.
    #[must_use]
    pub fn has_chain(&self, key: &MigrationKey) -> bool {
        self.chains.contains_key(key)
    }

    /// Step descriptions of a chain in registration order.
    #[must_use]
    pub fn chain_steps(&self, key: &MigrationKey) -> Option<Vec<String>> {
        self.chains.get(key).map(|chain| {
            chain
                .manifest()
                .into_iter()
                .map(|step| step.description)
                .collect()
        })
    }

    /// Check whether the key has a successful upgrade not yet rolled back.
    ///
    /// A later failed `migrate` on the same key leaves the marker in place.
    #[must_use]
    pub fn is_upgraded(&self, key: &MigrationKey) -> bool {
        self.upgraded.contains(key)
    }

    /// Every registered key in deterministic order.
    #[must_use]
    pub fn keys(&self) -> Vec<MigrationKey> {
        self.chains.keys().cloned().collect()
    }

    /// Drop every record. Chains and upgrade markers are untouched.
    pub fn clear_history(&mut self) {
        tracing::info!("Cleared {} migration record(s)", self.history.len());
        self.history.clear();
    }

    fn loaded_steps(&self, key: &MigrationKey) -> Result<Vec<MigrationStep>, EvolveError> {
        match self.chains.get(key) {
            Some(Chain::Loaded(steps)) => Ok(steps.clone()),
            Some(Chain::Restored(_)) => Err(MigrationError::ChainNotLoaded(key.clone()).into()),
            None => Err(MigrationError::NoChain(key.clone()).into()),
        }
    }

    fn record(
        &mut self,
        key: &MigrationKey,
        operation: MigrationOperation,
        executed: Vec<String>,
        error: Option<String>,
    ) {
        let record = MigrationRecord::new(key, operation, executed, error, self.clock.now());
        self.history.push(record);
    }
}

// =============================================================================
// EXECUTION HELPERS
// =============================================================================

/// Every step's dependencies must name steps registered before it.
fn validate_ordering(key: &MigrationKey, steps: &[MigrationStep]) -> Result<(), EvolveError> {
    let mut seen = BTreeSet::new();
    for step in steps {
        if let Some(missing) = step.dependencies().iter().find(|d| !seen.contains(d.as_str())) {
            return Err(MigrationError::OrderingViolation {
                key: key.clone(),
                step: step.description().to_string(),
                missing: missing.clone(),
            }
            .into());
        }
        seen.insert(step.description());
    }
    Ok(())
}

fn check_cancelled(step: &MigrationStep, ctx: &MigrationContext) -> Result<(), String> {
    if ctx.is_cancelled() {
        tracing::warn!("Cancelled before step '{}'", step.description());
        return Err("cancelled".to_string());
    }
    Ok(())
}

/// Validate, then upgrade. `Err` carries the failure message for the record.
fn run_upgrade_step(step: &MigrationStep, ctx: &mut MigrationContext) -> Result<(), String> {
    check_cancelled(step, ctx)?;
    ctx.enter_step(step.description());
    tracing::debug!("Running upgrade step '{}'", step.description());

    match step.run_validate(ctx) {
        None | Some(Ok(true)) => {}
        Some(Ok(false)) => {
            return Err(format!("validation failed for step '{}'", step.description()));
        }
        Some(Err(e)) => return Err(raise(step, &e, ctx)),
    }

    match step.run_upgrade(ctx) {
        Ok(true) => Ok(()),
        Ok(false) => Err(format!("upgrade step '{}' reported failure", step.description())),
        Err(e) => Err(raise(step, &e, ctx)),
    }
}

fn run_rollback_step(step: &MigrationStep, ctx: &mut MigrationContext) -> Result<(), String> {
    check_cancelled(step, ctx)?;
    ctx.enter_step(step.description());
    tracing::debug!("Running rollback step '{}'", step.description());

    match step.run_rollback(ctx) {
        Ok(true) => Ok(()),
        Ok(false) => Err(format!("rollback step '{}' reported failure", step.description())),
        Err(e) => Err(raise(step, &e, ctx)),
    }
}

/// Offer the error to the step's handlers, then re-raise it as a message.
fn raise(step: &MigrationStep, error: &StepError, ctx: &mut MigrationContext) -> String {
    let handled = step.handle_error(error, ctx);
    tracing::warn!(
        "Step '{}' failed: {} (handler ran: {})",
        step.description(),
        error,
        handled
    );
    format!("step '{}' failed: {}", step.description(), error)
}

// =============================================================================
// SERIALIZATION SUPPORT
// =============================================================================

/// Serializable registry state: manifests, markers and history.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    pub chains: Vec<ChainManifest>,
    pub upgraded: Vec<MigrationKey>,
    pub history: Vec<MigrationRecord>,
}

impl From<&MigrationRegistry> for RegistrySnapshot {
    fn from(registry: &MigrationRegistry) -> Self {
        Self {
            chains: registry
                .chains
                .iter()
                .map(|(key, chain)| ChainManifest {
                    component: key.component.clone(),
                    from: key.from.clone(),
                    to: key.to.clone(),
                    steps: chain.manifest(),
                })
                .collect(),
            upgraded: registry.upgraded.iter().cloned().collect(),
            history: registry.history.clone(),
        }
    }
}

impl MigrationRegistry {
    /// Replace markers and history with a snapshot's and learn its chains.
    ///
    /// Chains the host already registered stay executable; every other
    /// chain becomes restored-only until it is registered again.
    pub fn restore(&mut self, snapshot: RegistrySnapshot) {
        self.chains
            .retain(|_, chain| matches!(chain, Chain::Loaded(_)));
        for manifest in snapshot.chains {
            self.chains
                .entry(manifest.key())
                .or_insert(Chain::Restored(manifest.steps));
        }
        self.upgraded = snapshot.upgraded.into_iter().collect();
        self.history = snapshot.history;
        tracing::info!(
            "Restored migration registry: {} chain(s), {} record(s)",
            self.chains.len(),
            self.history.len()
        );
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Timestamp;
    use crate::clock::ManualClock;
    use crate::migration::{StepError, StepErrorKind};
    use serde_json::json;

    fn v(text: &str) -> Version {
        Version::parse(text).expect("valid version")
    }

    fn registry() -> MigrationRegistry {
        MigrationRegistry::with_options(
            DuplicatePolicy::Append,
            Arc::new(ManualClock::new(Timestamp(1_000))),
        )
    }

    /// A step that appends its name to the "log" array on upgrade and
    /// removes it again on rollback.
    fn logging_step(name: &'static str) -> MigrationStep {
        MigrationStep::builder(name)
            .upgrade(move |ctx| {
                push_log(ctx, &format!("up:{name}"));
                Ok(true)
            })
            .rollback(move |ctx| {
                push_log(ctx, &format!("down:{name}"));
                Ok(true)
            })
            .build()
            .expect("build step")
    }

    fn failing_step(name: &'static str) -> MigrationStep {
        MigrationStep::builder(name)
            .upgrade(|_| Err(StepError::data("corrupt row")))
            .rollback(|_| Err(StepError::io("disk gone")))
            .on_error(StepErrorKind::Data, |err, ctx| {
                ctx.insert("cleanup", err.message.clone());
            })
            .build()
            .expect("build step")
    }

    fn push_log(ctx: &mut MigrationContext, entry: &str) {
        let mut log = ctx
            .get("log")
            .and_then(|v| v.as_array().cloned())
            .unwrap_or_default();
        log.push(json!(entry));
        ctx.insert("log", log);
    }

    fn log(ctx: &MigrationContext) -> Vec<String> {
        ctx.get("log")
            .and_then(|v| v.as_array())
            .map(|a| {
                a.iter()
                    .filter_map(|e| e.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    #[test]
    fn migrate_without_chain_fails() {
        let mut reg = registry();
        let mut ctx = MigrationContext::new();
        let err = reg
            .migrate("agent", v("1.0.0"), v("2.0.0"), &mut ctx)
            .expect_err("no chain");
        assert!(matches!(err, EvolveError::Migration(MigrationError::NoChain(_))));
        assert!(reg.get_migration_history(None).is_empty());
    }

    #[test]
    fn migrate_runs_steps_in_order_and_records() {
        let mut reg = registry();
        reg.register(
            "agent",
            v("1.0.0"),
            v("2.0.0"),
            vec![logging_step("one"), logging_step("two")],
        )
        .expect("register");

        let mut ctx = MigrationContext::new();
        let ok = reg
            .migrate("agent", v("1.0.0"), v("2.0.0"), &mut ctx)
            .expect("migrate");

        assert!(ok);
        assert_eq!(log(&ctx), vec!["up:one", "up:two"]);
        let history = reg.get_migration_history(Some("agent"));
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].executed_steps, vec!["one", "two"]);
        assert!(history[0].success);
        assert_eq!(history[0].operation, MigrationOperation::Upgrade);
        assert_eq!(history[0].timestamp, Timestamp(1_000));
        assert!(reg.is_upgraded(&MigrationKey::new("agent", v("1.0.0"), v("2.0.0"))));
    }

    #[test]
    fn failing_step_stops_chain_and_keeps_completed_steps() {
        let mut reg = registry();
        reg.register(
            "agent",
            v("1.0.0"),
            v("2.0.0"),
            vec![logging_step("one"), failing_step("two"), logging_step("three")],
        )
        .expect("register");

        let mut ctx = MigrationContext::new();
        let ok = reg
            .migrate("agent", v("1.0.0"), v("2.0.0"), &mut ctx)
            .expect("migrate");

        assert!(!ok);
        // handler observed the failure, side effects of step one remain
        assert_eq!(ctx.get("cleanup"), Some(&json!("corrupt row")));
        assert_eq!(log(&ctx), vec!["up:one"]);

        let record = &reg.get_migration_history(None)[0];
        assert_eq!(record.executed_steps, vec!["one"]);
        assert!(!record.success);
        assert!(record.error.as_deref().is_some_and(|e| e.contains("corrupt row")));
        assert!(!reg.is_upgraded(&record.key()));
    }

    #[test]
    fn false_validation_aborts_before_upgrade() {
        let step = MigrationStep::builder("guarded")
            .validate(|ctx| Ok(ctx.contains_key("ready")))
            .upgrade(|ctx| {
                ctx.insert("ran", true);
                Ok(true)
            })
            .rollback(|_| Ok(true))
            .build()
            .expect("build");
        let mut reg = registry();
        reg.register("rag", v("1.0.0"), v("1.1.0"), vec![step])
            .expect("register");

        let mut ctx = MigrationContext::new();
        assert!(!reg.migrate("rag", v("1.0.0"), v("1.1.0"), &mut ctx).expect("migrate"));
        assert!(!ctx.contains_key("ran"));

        ctx.insert("ready", true);
        assert!(reg.migrate("rag", v("1.0.0"), v("1.1.0"), &mut ctx).expect("migrate"));
        assert_eq!(ctx.get("ran"), Some(&json!(true)));
    }

    #[test]
    fn upgrade_returning_false_fails_run() {
        let step = MigrationStep::builder("refuses")
            .upgrade(|_| Ok(false))
            .rollback(|_| Ok(true))
            .build()
            .expect("build");
        let mut reg = registry();
        reg.register("rag", v("1.0.0"), v("1.1.0"), vec![step])
            .expect("register");

        let mut ctx = MigrationContext::new();
        assert!(!reg.migrate("rag", v("1.0.0"), v("1.1.0"), &mut ctx).expect("migrate"));
        assert!(reg.get_migration_history(None)[0].executed_steps.is_empty());
    }

    #[test]
    fn ordering_violation_is_rejected_before_running() {
        let late = MigrationStep::builder("backfill")
            .depends_on("create table")
            .upgrade(|ctx| {
                ctx.insert("ran", true);
                Ok(true)
            })
            .rollback(|_| Ok(true))
            .build()
            .expect("build");
        let mut reg = registry();
        reg.register(
            "db",
            v("1.0.0"),
            v("2.0.0"),
            vec![late, logging_step("create table")],
        )
        .expect("register");

        let mut ctx = MigrationContext::new();
        let err = reg
            .migrate("db", v("1.0.0"), v("2.0.0"), &mut ctx)
            .expect_err("ordering");
        assert!(matches!(
            err,
            EvolveError::Migration(MigrationError::OrderingViolation { .. })
        ));
        assert!(!ctx.contains_key("ran"));
        assert!(reg.get_migration_history(None).is_empty());
    }

    #[test]
    fn dependency_on_earlier_step_is_accepted() {
        let late = MigrationStep::builder("backfill")
            .depends_on("create table")
            .upgrade(|_| Ok(true))
            .rollback(|_| Ok(true))
            .build()
            .expect("build");
        let mut reg = registry();
        reg.register(
            "db",
            v("1.0.0"),
            v("2.0.0"),
            vec![logging_step("create table"), late],
        )
        .expect("register");

        let mut ctx = MigrationContext::new();
        assert!(reg.migrate("db", v("1.0.0"), v("2.0.0"), &mut ctx).expect("migrate"));
    }

    #[test]
    fn duplicate_registration_appends_by_default() {
        let mut reg = registry();
        let key = MigrationKey::new("agent", v("1.0.0"), v("2.0.0"));
        reg.register("agent", v("1.0.0"), v("2.0.0"), vec![logging_step("one")])
            .expect("register");
        reg.register("agent", v("1.0.0"), v("2.0.0"), vec![logging_step("two")])
            .expect("append");

        assert_eq!(
            reg.chain_steps(&key),
            Some(vec!["one".to_string(), "two".to_string()])
        );
    }

    #[test]
    fn duplicate_registration_rejected_under_strict_policy() {
        let mut reg = MigrationRegistry::with_options(
            DuplicatePolicy::Reject,
            Arc::new(ManualClock::new(Timestamp(0))),
        );
        reg.register("agent", v("1.0.0"), v("2.0.0"), vec![logging_step("one")])
            .expect("register");
        let err = reg
            .register("agent", v("1.0.0"), v("2.0.0"), vec![logging_step("two")])
            .expect_err("duplicate");
        assert!(matches!(err, EvolveError::DuplicateRegistration(_)));
    }

    #[test]
    fn rollback_without_upgrade_changes_nothing() {
        let mut reg = registry();
        reg.register("agent", v("1.0.0"), v("2.0.0"), vec![logging_step("one")])
            .expect("register");

        let mut ctx = MigrationContext::new();
        let err = reg
            .rollback("agent", v("1.0.0"), v("2.0.0"), &mut ctx)
            .expect_err("no upgrade");
        assert!(matches!(
            err,
            EvolveError::Migration(MigrationError::NoPriorUpgrade(_))
        ));
        assert!(reg.get_migration_history(None).is_empty());
        assert!(log(&ctx).is_empty());
    }

    #[test]
    fn rollback_runs_in_reverse_and_clears_marker() {
        let mut reg = registry();
        let key = MigrationKey::new("agent", v("1.0.0"), v("2.0.0"));
        reg.register(
            "agent",
            v("1.0.0"),
            v("2.0.0"),
            vec![logging_step("one"), logging_step("two")],
        )
        .expect("register");

        let mut ctx = MigrationContext::new();
        assert!(reg.migrate("agent", v("1.0.0"), v("2.0.0"), &mut ctx).expect("migrate"));
        assert!(reg.rollback("agent", v("1.0.0"), v("2.0.0"), &mut ctx).expect("rollback"));

        assert_eq!(log(&ctx), vec!["up:one", "up:two", "down:two", "down:one"]);
        assert!(!reg.is_upgraded(&key));

        let history = reg.get_migration_history(None);
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].operation, MigrationOperation::Rollback);
        assert_eq!(history[1].executed_steps, vec!["two", "one"]);

        // a second rollback has nothing to undo
        assert!(reg.rollback("agent", v("1.0.0"), v("2.0.0"), &mut ctx).is_err());
    }

    #[test]
    fn partial_rollback_keeps_marker() {
        let mut reg = registry();
        let key = MigrationKey::new("agent", v("1.0.0"), v("2.0.0"));
        let breaks_on_rollback = MigrationStep::builder("first")
            .upgrade(|_| Ok(true))
            .rollback(|_| Err(StepError::io("locked")))
            .build()
            .expect("build");
        reg.register(
            "agent",
            v("1.0.0"),
            v("2.0.0"),
            vec![breaks_on_rollback, logging_step("second")],
        )
        .expect("register");

        let mut ctx = MigrationContext::new();
        assert!(reg.migrate("agent", v("1.0.0"), v("2.0.0"), &mut ctx).expect("migrate"));
        assert!(!reg.rollback("agent", v("1.0.0"), v("2.0.0"), &mut ctx).expect("rollback"));

        assert!(reg.is_upgraded(&key));
        let record = reg.get_migration_history(None).pop().expect("record");
        assert_eq!(record.operation, MigrationOperation::Rollback);
        assert_eq!(record.executed_steps, vec!["second"]);
        assert!(!record.success);
    }

    #[test]
    fn cancellation_stops_before_next_step() {
        let mut ctx = MigrationContext::new();
        let handle = ctx.cancel_handle();
        let cancels = MigrationStep::builder("cancels")
            .upgrade(move |_| {
                handle.cancel();
                Ok(true)
            })
            .rollback(|_| Ok(true))
            .build()
            .expect("build");

        let mut reg = registry();
        reg.register(
            "agent",
            v("1.0.0"),
            v("2.0.0"),
            vec![cancels, logging_step("never")],
        )
        .expect("register");

        assert!(!reg.migrate("agent", v("1.0.0"), v("2.0.0"), &mut ctx).expect("migrate"));
        let record = &reg.get_migration_history(None)[0];
        assert_eq!(record.executed_steps, vec!["cancels"]);
        assert_eq!(record.error.as_deref(), Some("cancelled"));
        assert!(log(&ctx).is_empty());
    }

    #[test]
    fn cleared_cancellation_lets_the_context_roll_back() {
        let mut reg = registry();
        reg.register("agent", v("1.0.0"), v("2.0.0"), vec![logging_step("s1")])
            .expect("register");

        let mut ctx = MigrationContext::new();
        assert!(reg.migrate("agent", v("1.0.0"), v("2.0.0"), &mut ctx).expect("migrate"));

        ctx.cancel_handle().cancel();
        assert!(!reg.rollback("agent", v("1.0.0"), v("2.0.0"), &mut ctx).expect("rollback"));
        assert_eq!(
            reg.get_migration_history(None)[1].error.as_deref(),
            Some("cancelled")
        );

        ctx.reset_cancel();
        assert!(reg.rollback("agent", v("1.0.0"), v("2.0.0"), &mut ctx).expect("rollback"));
        assert_eq!(log(&ctx), vec!["up:s1", "down:s1"]);
        assert!(!reg.is_upgraded(&MigrationKey::new("agent", v("1.0.0"), v("2.0.0"))));
    }

    #[test]
    fn failed_rerun_keeps_upgrade_marker() {
        let mut reg = registry();
        let flaky = MigrationStep::builder("flaky")
            .upgrade(|ctx| {
                let runs = ctx.get("runs").and_then(|v| v.as_u64()).unwrap_or(0);
                ctx.insert("runs", runs + 1);
                if runs == 0 {
                    Ok(true)
                } else {
                    Err(StepError::io("second run fails"))
                }
            })
            .rollback(|_| Ok(true))
            .build()
            .expect("build");
        reg.register("agent", v("1.0.0"), v("2.0.0"), vec![flaky])
            .expect("register");
        let key = MigrationKey::new("agent", v("1.0.0"), v("2.0.0"));

        let mut ctx = MigrationContext::new();
        assert!(reg.migrate("agent", v("1.0.0"), v("2.0.0"), &mut ctx).expect("first"));
        assert!(!reg.migrate("agent", v("1.0.0"), v("2.0.0"), &mut ctx).expect("second"));
        assert!(reg.is_upgraded(&key));
    }

    #[test]
    fn history_filters_by_component() {
        let mut reg = registry();
        reg.register("a", v("1.0.0"), v("1.0.1"), vec![logging_step("x")])
            .expect("register");
        reg.register("b", v("1.0.0"), v("1.0.1"), vec![logging_step("y")])
            .expect("register");

        let mut ctx = MigrationContext::new();
        reg.migrate("a", v("1.0.0"), v("1.0.1"), &mut ctx).expect("migrate");
        reg.migrate("b", v("1.0.0"), v("1.0.1"), &mut ctx).expect("migrate");

        assert_eq!(reg.get_migration_history(None).len(), 2);
        let only_b = reg.get_migration_history(Some("b"));
        assert_eq!(only_b.len(), 1);
        assert_eq!(only_b[0].component.as_str(), "b");
    }

    #[test]
    fn restored_chain_must_be_reregistered() {
        let mut reg = registry();
        let key = MigrationKey::new("agent", v("1.0.0"), v("2.0.0"));
        reg.register("agent", v("1.0.0"), v("2.0.0"), vec![logging_step("one")])
            .expect("register");
        let mut ctx = MigrationContext::new();
        reg.migrate("agent", v("1.0.0"), v("2.0.0"), &mut ctx).expect("migrate");

        let snapshot = RegistrySnapshot::from(&reg);
        let mut restored = registry();
        restored.restore(snapshot);

        assert!(restored.has_chain(&key));
        assert!(restored.is_upgraded(&key));
        assert_eq!(restored.get_migration_history(None).len(), 1);
        let err = restored
            .rollback("agent", v("1.0.0"), v("2.0.0"), &mut ctx)
            .expect_err("not loaded");
        assert!(matches!(
            err,
            EvolveError::Migration(MigrationError::ChainNotLoaded(_))
        ));

        // re-registering replaces the placeholder instead of appending
        restored
            .register("agent", v("1.0.0"), v("2.0.0"), vec![logging_step("one")])
            .expect("reload");
        assert_eq!(restored.chain_steps(&key), Some(vec!["one".to_string()]));
        assert!(restored
            .rollback("agent", v("1.0.0"), v("2.0.0"), &mut ctx)
            .expect("rollback"));
    }

    #[test]
    fn clear_history_keeps_chains() {
        let mut reg = registry();
        reg.register("a", v("1.0.0"), v("1.0.1"), vec![logging_step("x")])
            .expect("register");
        let mut ctx = MigrationContext::new();
        reg.migrate("a", v("1.0.0"), v("1.0.1"), &mut ctx).expect("migrate");

        reg.clear_history();
        assert!(reg.get_migration_history(None).is_empty());
        assert_eq!(reg.keys().len(), 1);
    }
}
