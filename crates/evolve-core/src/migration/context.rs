//! Mutable state handed to migration steps.

use crate::MigrationKey;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Direction of a migration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationOperation {
    Upgrade,
    Rollback,
}

impl fmt::Display for MigrationOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Upgrade => f.write_str("upgrade"),
            Self::Rollback => f.write_str("rollback"),
        }
    }
}

/// Shared flag that stops a run before its next step.
///
/// Cancellation never interrupts a step that is already running, and
/// already-executed steps are not compensated. The flag stays set until
/// [`CancelHandle::reset`] clears it.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Clear the flag so the context can run again.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Scratch state passed through every step of a run.
///
/// Steps read and write JSON values under string keys. Side effects are
/// never reverted by the registry.
#[derive(Debug, Clone, Default)]
pub struct MigrationContext {
    data: BTreeMap<String, Value>,
    cancel: CancelHandle,
    run: Option<(MigrationKey, MigrationOperation)>,
    step: Option<String>,
}

impl MigrationContext {
    /// Create an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context pre-populated with data.
    #[must_use]
    pub fn with_data(data: BTreeMap<String, Value>) -> Self {
        Self {
            data,
            ..Self::default()
        }
    }

    /// Store a value, returning the previous one.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.data.insert(key.into(), value.into())
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.data.remove(key)
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    /// All stored values, ordered by key.
    #[must_use]
    pub fn data(&self) -> &BTreeMap<String, Value> {
        &self.data
    }

    /// A handle that cancels runs using this context.
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Clear a cancellation, e.g. before running the compensating rollback
    /// of a cancelled upgrade with the same context.
    pub fn reset_cancel(&self) {
        self.cancel.reset();
    }

    /// The chain currently (or last) run with this context.
    #[must_use]
    pub fn key(&self) -> Option<&MigrationKey> {
        self.run.as_ref().map(|(key, _)| key)
    }

    #[must_use]
    pub fn operation(&self) -> Option<MigrationOperation> {
        self.run.as_ref().map(|(_, op)| *op)
    }

    /// Description of the step being executed.
    #[must_use]
    pub fn current_step(&self) -> Option<&str> {
        self.step.as_deref()
    }

    pub(crate) fn begin(&mut self, key: MigrationKey, operation: MigrationOperation) {
        self.run = Some((key, operation));
        self.step = None;
    }

    pub(crate) fn enter_step(&mut self, description: &str) {
        self.step = Some(description.to_string());
    }

    pub(crate) fn finish(&mut self) {
        self.step = None;
    }
}
