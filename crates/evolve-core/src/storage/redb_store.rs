//! # redb-backed Snapshot Storage
//!
//! Durable history of binary snapshots in a redb embedded database.
//!
//! Each `save` stores one snapshot under the next sequence number inside a
//! single ACID write transaction, so a crash never leaves a half-written
//! snapshot behind. Sequence numbers are never reused, even after `prune`.

use crate::formats::{Snapshot, snapshot_from_bytes, snapshot_to_bytes};
use crate::{EvolveError, primitives};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use std::path::Path;

/// Table for snapshots: sequence(u64) -> binary snapshot bytes
const SNAPSHOTS: TableDefinition<u64, &[u8]> = TableDefinition::new("snapshots");

/// Table for metadata: key string -> value u64
const METADATA: TableDefinition<&str, u64> = TableDefinition::new("metadata");

const NEXT_SEQUENCE: &str = "next_sequence";

fn io_err(e: impl std::fmt::Display) -> EvolveError {
    EvolveError::IoError(e.to_string())
}

/// A disk-backed store of snapshots keyed by sequence number.
pub struct RedbSnapshotStore {
    db: Database,
    max_payload_bytes: usize,
}

impl std::fmt::Debug for RedbSnapshotStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbSnapshotStore")
            .field("max_payload_bytes", &self.max_payload_bytes)
            .finish_non_exhaustive()
    }
}

impl RedbSnapshotStore {
    /// Open or create a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, EvolveError> {
        let db = Database::create(path.as_ref()).map_err(io_err)?;

        // Initialize tables if they don't exist
        {
            let write_txn = db.begin_write().map_err(io_err)?;
            let _ = write_txn.open_table(SNAPSHOTS).map_err(io_err)?;
            let _ = write_txn.open_table(METADATA).map_err(io_err)?;
            write_txn.commit().map_err(io_err)?;
        }

        tracing::info!("Opened snapshot store at {}", path.as_ref().display());
        Ok(Self {
            db,
            max_payload_bytes: primitives::MAX_SNAPSHOT_PAYLOAD_SIZE,
        })
    }

    /// Limit the size of snapshots accepted by `load`.
    #[must_use]
    pub fn with_max_payload_bytes(mut self, max_payload_bytes: usize) -> Self {
        self.max_payload_bytes = max_payload_bytes;
        self
    }

    /// Store a snapshot and return its sequence number.
    pub fn save(&self, snapshot: &Snapshot) -> Result<u64, EvolveError> {
        let bytes = snapshot_to_bytes(snapshot)?;

        let write_txn = self.db.begin_write().map_err(io_err)?;
        let sequence = {
            let mut meta = write_txn.open_table(METADATA).map_err(io_err)?;
            let sequence = meta
                .get(NEXT_SEQUENCE)
                .map_err(io_err)?
                .map(|v| v.value())
                .unwrap_or(0);
            meta.insert(NEXT_SEQUENCE, sequence.saturating_add(1))
                .map_err(io_err)?;

            let mut snapshots = write_txn.open_table(SNAPSHOTS).map_err(io_err)?;
            snapshots
                .insert(sequence, bytes.as_slice())
                .map_err(io_err)?;
            sequence
        };
        write_txn.commit().map_err(io_err)?;

        tracing::info!("Saved snapshot #{} ({} bytes)", sequence, bytes.len());
        Ok(sequence)
    }

    /// Load the snapshot stored under `sequence`.
    pub fn load(&self, sequence: u64) -> Result<Option<Snapshot>, EvolveError> {
        let read_txn = self.db.begin_read().map_err(io_err)?;
        let table = read_txn.open_table(SNAPSHOTS).map_err(io_err)?;
        match table.get(sequence).map_err(io_err)? {
            Some(bytes) => snapshot_from_bytes(bytes.value(), self.max_payload_bytes).map(Some),
            None => Ok(None),
        }
    }

    /// Load the most recently saved snapshot.
    pub fn load_latest(&self) -> Result<Option<(u64, Snapshot)>, EvolveError> {
        let read_txn = self.db.begin_read().map_err(io_err)?;
        let table = read_txn.open_table(SNAPSHOTS).map_err(io_err)?;
        match table.last().map_err(io_err)? {
            Some((key, bytes)) => {
                let snapshot = snapshot_from_bytes(bytes.value(), self.max_payload_bytes)?;
                Ok(Some((key.value(), snapshot)))
            }
            None => Ok(None),
        }
    }

    /// Sequence numbers of all stored snapshots, ascending.
    pub fn list(&self) -> Result<Vec<u64>, EvolveError> {
        let read_txn = self.db.begin_read().map_err(io_err)?;
        let table = read_txn.open_table(SNAPSHOTS).map_err(io_err)?;
        let mut sequences = Vec::new();
        for entry in table.iter().map_err(io_err)? {
            let (key, _) = entry.map_err(io_err)?;
            sequences.push(key.value());
        }
        Ok(sequences)
    }

    /// Delete all but the newest `keep` snapshots. Returns how many were removed.
    pub fn prune(&self, keep: usize) -> Result<usize, EvolveError> {
        let write_txn = self.db.begin_write().map_err(io_err)?;
        let removed = {
            let mut table = write_txn.open_table(SNAPSHOTS).map_err(io_err)?;
            let mut sequences = Vec::new();
            for entry in table.iter().map_err(io_err)? {
                let (key, _) = entry.map_err(io_err)?;
                sequences.push(key.value());
            }
            let excess = sequences.len().saturating_sub(keep);
            for sequence in &sequences[..excess] {
                table.remove(*sequence).map_err(io_err)?;
            }
            excess
        };
        write_txn.commit().map_err(io_err)?;

        if removed > 0 {
            tracing::info!("Pruned {} snapshot(s), kept {}", removed, keep);
        }
        Ok(removed)
    }
}

// =============================================================================
// TESTS
// =============================================================================
