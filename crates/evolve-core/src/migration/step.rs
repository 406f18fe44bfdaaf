//! # Migration Steps
//!
//! One reversible unit of work inside a chain. A step is built once through
//! [`MigrationStepBuilder`] and is immutable afterwards.
//!
//! ## Error handlers
//!
//! Step failures carry a [`StepErrorKind`]. Kinds form a shallow hierarchy
//! (`Timeout` is an `Io` error, `Schema` is a `Data` error), and a failure is
//! offered to the most specific registered handler: its own kind first, then
//! each ancestor, then the catch-all. Handlers observe and clean up; they
//! never turn a failure into a success.

use super::MigrationContext;
use crate::EvolveError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Upgrade, rollback and validate functions.
pub type StepFn = Arc<dyn Fn(&mut MigrationContext) -> Result<bool, StepError> + Send + Sync>;

/// Observe-only error handler.
pub type ErrorHandlerFn = Arc<dyn Fn(&StepError, &mut MigrationContext) + Send + Sync>;

// =============================================================================
// STEP ERRORS
// =============================================================================

/// Category of a step failure.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepErrorKind {
    Io,
    Timeout,
    Data,
    Schema,
    Validation,
    Cancelled,
    Custom(String),
}

impl StepErrorKind {
    /// The broader kind this one specializes, if any.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        match self {
            Self::Timeout => Some(Self::Io),
            Self::Schema => Some(Self::Data),
            _ => None,
        }
    }
}

impl fmt::Display for StepErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io => f.write_str("io"),
            Self::Timeout => f.write_str("timeout"),
            Self::Data => f.write_str("data"),
            Self::Schema => f.write_str("schema"),
            Self::Validation => f.write_str("validation"),
            Self::Cancelled => f.write_str("cancelled"),
            Self::Custom(name) => f.write_str(name),
        }
    }
}

/// Failure raised by a step function.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} error: {message}")]
pub struct StepError {
    pub kind: StepErrorKind,
    pub message: String,
}

impl StepError {
    #[must_use]
    pub fn new(kind: StepErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn io(message: impl Into<String>) -> Self {
        Self::new(StepErrorKind::Io, message)
    }

    #[must_use]
    pub fn data(message: impl Into<String>) -> Self {
        Self::new(StepErrorKind::Data, message)
    }

    #[must_use]
    pub fn custom(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(StepErrorKind::Custom(kind.into()), message)
    }
}

// =============================================================================
// STEP
// =============================================================================

/// An immutable migration step.
#[derive(Clone)]
pub struct MigrationStep {
    description: String,
    dependencies: BTreeSet<String>,
    upgrade: StepFn,
    rollback: StepFn,
    validate: Option<StepFn>,
    error_handlers: BTreeMap<StepErrorKind, ErrorHandlerFn>,
    fallback_handler: Option<ErrorHandlerFn>,
}

impl fmt::Debug for MigrationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationStep")
            .field("description", &self.description)
            .field("dependencies", &self.dependencies)
            .field("has_validate", &self.validate.is_some())
            .field("error_handlers", &self.error_handlers.keys())
            .field("has_fallback_handler", &self.fallback_handler.is_some())
            .finish_non_exhaustive()
    }
}

impl MigrationStep {
    /// Start building a step.
    #[must_use]
    pub fn builder(description: impl Into<String>) -> MigrationStepBuilder {
        MigrationStepBuilder::new(description)
    }

    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Descriptions of steps that must precede this one in its chain.
    #[must_use]
    pub fn dependencies(&self) -> &BTreeSet<String> {
        &self.dependencies
    }

    pub(crate) fn run_upgrade(&self, ctx: &mut MigrationContext) -> Result<bool, StepError> {
        (self.upgrade)(ctx)
    }

    pub(crate) fn run_rollback(&self, ctx: &mut MigrationContext) -> Result<bool, StepError> {
        (self.rollback)(ctx)
    }

    /// `None` when the step has no validator.
    pub(crate) fn run_validate(&self, ctx: &mut MigrationContext) -> Option<Result<bool, StepError>> {
        self.validate.as_ref().map(|validate| validate(ctx))
    }

    /// Offer an error to the most specific handler. Returns whether one ran.
    pub(crate) fn handle_error(&self, error: &StepError, ctx: &mut MigrationContext) -> bool {
        match self.handler_for(&error.kind) {
            Some(handler) => {
                handler(error, ctx);
                true
            }
            None => false,
        }
    }

    fn handler_for(&self, kind: &StepErrorKind) -> Option<&ErrorHandlerFn> {
        let mut current = Some(kind.clone());
        while let Some(kind) = current {
            if let Some(handler) = self.error_handlers.get(&kind) {
                return Some(handler);
            }
            current = kind.parent();
        }
        self.fallback_handler.as_ref()
    }
}

// =============================================================================
// BUILDER
// =============================================================================

/// Builder for [`MigrationStep`]. Upgrade and rollback are both mandatory.
pub struct MigrationStepBuilder {
    description: String,
    dependencies: BTreeSet<String>,
    upgrade: Option<StepFn>,
    rollback: Option<StepFn>,
    validate: Option<StepFn>,
    error_handlers: BTreeMap<StepErrorKind, ErrorHandlerFn>,
    fallback_handler: Option<ErrorHandlerFn>,
}

impl MigrationStepBuilder {
    fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            dependencies: BTreeSet::new(),
            upgrade: None,
            rollback: None,
            validate: None,
            error_handlers: BTreeMap::new(),
            fallback_handler: None,
        }
    }

    /// Require `step` to be registered earlier in the same chain.
    #[must_use]
    pub fn depends_on(mut self, step: impl Into<String>) -> Self {
        self.dependencies.insert(step.into());
        self
    }

    #[must_use]
    pub fn upgrade<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut MigrationContext) -> Result<bool, StepError> + Send + Sync + 'static,
    {
        self.upgrade = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn rollback<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut MigrationContext) -> Result<bool, StepError> + Send + Sync + 'static,
    {
        self.rollback = Some(Arc::new(f));
        self
    }

    /// Pre-condition checked before the upgrade; `false` aborts the run.
    #[must_use]
    pub fn validate<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut MigrationContext) -> Result<bool, StepError> + Send + Sync + 'static,
    {
        self.validate = Some(Arc::new(f));
        self
    }

    /// Handle failures of `kind` and of kinds specializing it.
    /// A second handler for the same kind replaces the first.
    #[must_use]
    pub fn on_error<F>(mut self, kind: StepErrorKind, f: F) -> Self
    where
        F: Fn(&StepError, &mut MigrationContext) + Send + Sync + 'static,
    {
        self.error_handlers.insert(kind, Arc::new(f));
        self
    }

    /// Handle any failure no kind-specific handler claims.
    #[must_use]
    pub fn on_any_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&StepError, &mut MigrationContext) + Send + Sync + 'static,
    {
        self.fallback_handler = Some(Arc::new(f));
        self
    }

    /// Finish the step.
    ///
    /// Fails with `EvolveError::Validation` when the description is empty,
    /// the step depends on itself, or either upgrade or rollback is missing.
    pub fn build(self) -> Result<MigrationStep, EvolveError> {
        if self.description.trim().is_empty() {
            return Err(EvolveError::Validation(
                "migration step description must not be empty".to_string(),
            ));
        }
        if self.dependencies.contains(&self.description) {
            return Err(EvolveError::Validation(format!(
                "migration step '{}' depends on itself",
                self.description
            )));
        }
        let Some(upgrade) = self.upgrade else {
            return Err(EvolveError::Validation(format!(
                "migration step '{}' has no upgrade function",
                self.description
            )));
        };
        let Some(rollback) = self.rollback else {
            return Err(EvolveError::Validation(format!(
                "migration step '{}' has no rollback function",
                self.description
            )));
        };

        Ok(MigrationStep {
            description: self.description,
            dependencies: self.dependencies,
            upgrade,
            rollback,
            validate: self.validate,
            error_handlers: self.error_handlers,
            fallback_handler: self.fallback_handler,
        })
    }
}

// =============================================================================
// TESTS
// =============================================================================
