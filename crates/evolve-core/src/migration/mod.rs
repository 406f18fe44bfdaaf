//! # Migration Module
//!
//! Reversible, ordered migration chains per `(component, from, to)`.
//!
//! - `step`: immutable steps and their error handlers
//! - `context`: mutable state threaded through a run
//! - `registry`: chain registration, execution and rollback
//! - `record`: append-only audit records

mod context;
mod record;
mod registry;
mod step;

pub use context::{CancelHandle, MigrationContext, MigrationOperation};
pub use record::MigrationRecord;
pub use registry::{ChainManifest, MigrationRegistry, RegistrySnapshot, StepManifest};
pub use step::{ErrorHandlerFn, MigrationStep, MigrationStepBuilder, StepError, StepErrorKind, StepFn};
