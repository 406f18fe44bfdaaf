//! Audit records of migration runs.

use super::MigrationOperation;
use crate::{ComponentId, MigrationKey, Timestamp, Version};
use serde::{Deserialize, Serialize};

/// One upgrade or rollback attempt. Append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationRecord {
    pub component: ComponentId,
    pub from_version: Version,
    pub to_version: Version,
    pub operation: MigrationOperation,
    /// Descriptions of the steps that completed, in execution order.
    pub executed_steps: Vec<String>,
    pub success: bool,
    pub timestamp: Timestamp,
    pub error: Option<String>,
}

impl MigrationRecord {
    pub(crate) fn new(
        key: &MigrationKey,
        operation: MigrationOperation,
        executed_steps: Vec<String>,
        error: Option<String>,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            component: key.component.clone(),
            from_version: key.from.clone(),
            to_version: key.to.clone(),
            operation,
            executed_steps,
            success: error.is_none(),
            timestamp,
            error,
        }
    }

    /// The chain this record belongs to.
    #[must_use]
    pub fn key(&self) -> MigrationKey {
        MigrationKey::new(
            self.component.clone(),
            self.from_version.clone(),
            self.to_version.clone(),
        )
    }
}
