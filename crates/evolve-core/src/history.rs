//! # Version History
//!
//! Append-only ledger of version changes per component.
//!
//! Entries are never edited or removed one by one; only [`VersionHistory::clear`]
//! resets the ledger. Timestamps come from an injected [`Clock`] and are kept
//! non-decreasing, so chronological order equals insertion order.

use crate::clock::{Clock, SystemClock};
use crate::{ComponentId, Timestamp, Version};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// One recorded version change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionHistoryEntry {
    pub component: ComponentId,
    pub version: Version,
    pub timestamp: Timestamp,
    pub changes: Vec<String>,
    pub metadata: BTreeMap<String, String>,
}

/// Filter for [`VersionHistory::search_history`]. Unset fields match anything.
///
/// The time bounds are inclusive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryQuery {
    component: Option<ComponentId>,
    version: Option<Version>,
    start: Option<Timestamp>,
    end: Option<Timestamp>,
    metadata: BTreeMap<String, String>,
}

impl HistoryQuery {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn component(mut self, component: impl Into<ComponentId>) -> Self {
        self.component = Some(component.into());
        self
    }

    /// Match versions strictly equal to `version` (build metadata included).
    #[must_use]
    pub fn version(mut self, version: Version) -> Self {
        self.version = Some(version);
        self
    }

    #[must_use]
    pub fn start(mut self, at: Timestamp) -> Self {
        self.start = Some(at);
        self
    }

    #[must_use]
    pub fn end(mut self, at: Timestamp) -> Self {
        self.end = Some(at);
        self
    }

    /// Require a metadata entry. Repeated calls require all of them.
    #[must_use]
    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    fn matches(&self, entry: &VersionHistoryEntry) -> bool {
        self.component.as_ref().is_none_or(|c| *c == entry.component)
            && self.version.as_ref().is_none_or(|v| *v == entry.version)
            && self.start.is_none_or(|s| entry.timestamp >= s)
            && self.end.is_none_or(|e| entry.timestamp <= e)
            && self
                .metadata
                .iter()
                .all(|(k, v)| entry.metadata.get(k) == Some(v))
    }
}

/// The ledger.
pub struct VersionHistory {
    entries: Vec<VersionHistoryEntry>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for VersionHistory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionHistory")
            .field("entries", &self.entries.len())
            .finish_non_exhaustive()
    }
}

impl Default for VersionHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl VersionHistory {
    /// Create an empty ledger stamped by the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Vec::new(),
            clock,
        }
    }

    /// Append an entry stamped with the current time and return it.
    pub fn add_entry(
        &mut self,
        component: impl Into<ComponentId>,
        version: Version,
        changes: Vec<String>,
        metadata: BTreeMap<String, String>,
    ) -> &VersionHistoryEntry {
        let now = self.clock.now();
        // clamp a clock that stepped backwards
        let timestamp = match self.entries.last() {
            Some(last) if last.timestamp > now => last.timestamp,
            _ => now,
        };
        let component = component.into();
        tracing::debug!(
            "History: {} -> {} at {} ({} change(s))",
            component,
            version,
            timestamp,
            changes.len()
        );
        let index = self.entries.len();
        self.entries.push(VersionHistoryEntry {
            component,
            version,
            timestamp,
            changes,
            metadata,
        });
        &self.entries[index]
    }

    /// The most recent `limit` entries of a component (all when `None`),
    /// oldest first.
    #[must_use]
    pub fn get_history(&self, component: &str, limit: Option<usize>) -> Vec<VersionHistoryEntry> {
        let matching: Vec<&VersionHistoryEntry> = self
            .entries
            .iter()
            .filter(|e| e.component.as_str() == component)
            .collect();
        let skip = limit.map_or(0, |n| matching.len().saturating_sub(n));
        matching.into_iter().skip(skip).cloned().collect()
    }

    /// Version of the component's last entry.
    #[must_use]
    pub fn get_latest_version(&self, component: &str) -> Option<&Version> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.component.as_str() == component)
            .map(|e| &e.version)
    }

    /// Changes recorded from the first entry at `from` through the next
    /// entry at `to`, both inclusive.
    ///
    /// Empty when `from` was never recorded. When `to` never follows, the
    /// changes run to the end of the component's history.
    #[must_use]
    pub fn get_changes_between(&self, component: &str, from: &Version, to: &Version) -> Vec<String> {
        let mut changes = Vec::new();
        let mut collecting = false;
        for entry in self.entries.iter().filter(|e| e.component.as_str() == component) {
            if !collecting && entry.version == *from {
                collecting = true;
            }
            if collecting {
                changes.extend(entry.changes.iter().cloned());
                if entry.version == *to {
                    break;
                }
            }
        }
        changes
    }

    /// Entries matching every predicate of `query`, timestamp-ascending.
    #[must_use]
    pub fn search_history(&self, query: &HistoryQuery) -> Vec<VersionHistoryEntry> {
        self.entries
            .iter()
            .filter(|e| query.matches(e))
            .cloned()
            .collect()
    }

    /// Every component with at least one entry.
    #[must_use]
    pub fn components(&self) -> BTreeSet<ComponentId> {
        self.entries.iter().map(|e| e.component.clone()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        tracing::info!("Cleared {} history entries", self.entries.len());
        self.entries.clear();
    }

    /// All entries in ledger order, for snapshots.
    #[must_use]
    pub fn entries(&self) -> &[VersionHistoryEntry] {
        &self.entries
    }

    /// Replace the ledger with `entries`, restoring their order by timestamp.
    pub fn restore(&mut self, mut entries: Vec<VersionHistoryEntry>) {
        // stable: equal timestamps keep their recorded order
        entries.sort_by_key(|e| e.timestamp);
        self.entries = entries;
    }
}

// =============================================================================
// TESTS
// =============================================================================
