//! # Persistence Format
//!
//! Snapshot encodings for the whole evolve state.
//!
//! Two encodings share one serde model:
//! - JSON: a nested mapping of scalars, for inspection and interchange.
//! - Binary: header (5 bytes) + postcard-serialized snapshot.
//!   - 4 bytes: Magic ("EVLV")
//!   - 1 byte: Version
//!
//! Binary input is validated (size bounds, magic, version) before the
//! payload is decoded. File I/O is not done here; see `storage`.

use crate::graph::GraphSnapshot;
use crate::history::VersionHistoryEntry;
use crate::migration::RegistrySnapshot;
use crate::{EvolveError, primitives};
use serde::{Deserialize, Serialize};

// =============================================================================
// SNAPSHOT
// =============================================================================

/// Everything needed to rebuild a `VersionManager`, minus step functions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub graph: GraphSnapshot,
    pub migrations: RegistrySnapshot,
    pub history: Vec<VersionHistoryEntry>,
}

// =============================================================================
// FILE HEADER
// =============================================================================

/// The header preceding every binary snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotHeader {
    pub magic: [u8; 4],
    pub version: u8,
}

impl SnapshotHeader {
    /// Create a header for the current format version.
    #[must_use]
    pub fn new() -> Self {
        Self {
            magic: *primitives::MAGIC_BYTES,
            version: primitives::FORMAT_VERSION,
        }
    }

    /// Check magic bytes and format version.
    pub fn validate(&self) -> Result<(), EvolveError> {
        if &self.magic != primitives::MAGIC_BYTES {
            return Err(EvolveError::SerializationError(
                "Invalid magic bytes".to_string(),
            ));
        }
        if self.version != primitives::FORMAT_VERSION {
            return Err(EvolveError::SerializationError(format!(
                "Unsupported snapshot version: {} (expected {})",
                self.version,
                primitives::FORMAT_VERSION
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn to_bytes(&self) -> [u8; primitives::HEADER_SIZE] {
        let mut bytes = [0u8; primitives::HEADER_SIZE];
        bytes[0..4].copy_from_slice(&self.magic);
        bytes[4] = self.version;
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EvolveError> {
        let Some(header) = bytes.get(..primitives::HEADER_SIZE) else {
            return Err(EvolveError::SerializationError(
                "Header too short".to_string(),
            ));
        };
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&header[0..4]);
        Ok(Self {
            magic,
            version: header[4],
        })
    }
}

impl Default for SnapshotHeader {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// BINARY
// =============================================================================

/// Encode a snapshot as header + postcard payload.
pub fn snapshot_to_bytes(snapshot: &Snapshot) -> Result<Vec<u8>, EvolveError> {
    let payload = postcard::to_stdvec(snapshot)
        .map_err(|e| EvolveError::SerializationError(e.to_string()))?;

    let mut result = Vec::with_capacity(primitives::HEADER_SIZE + payload.len());
    result.extend_from_slice(&SnapshotHeader::new().to_bytes());
    result.extend_from_slice(&payload);
    Ok(result)
}

/// Decode a binary snapshot no larger than `max_bytes`.
///
/// Size and header are checked before any payload is decoded.
pub fn snapshot_from_bytes(bytes: &[u8], max_bytes: usize) -> Result<Snapshot, EvolveError> {
    if bytes.len() < primitives::HEADER_SIZE {
        return Err(EvolveError::SerializationError(format!(
            "Data too short: minimum {} bytes required",
            primitives::HEADER_SIZE
        )));
    }
    if bytes.len() > max_bytes {
        return Err(EvolveError::SerializationError(format!(
            "Data size {} bytes exceeds maximum allowed {} bytes",
            bytes.len(),
            max_bytes
        )));
    }

    SnapshotHeader::from_bytes(bytes)?.validate()?;

    postcard::from_bytes(&bytes[primitives::HEADER_SIZE..]).map_err(|e| {
        EvolveError::SerializationError(format!("Failed to deserialize snapshot: {e}"))
    })
}

// =============================================================================
// JSON
// =============================================================================

/// Encode a snapshot as pretty-printed JSON.
pub fn snapshot_to_json(snapshot: &Snapshot) -> Result<String, EvolveError> {
    serde_json::to_string_pretty(snapshot)
        .map_err(|e| EvolveError::SerializationError(e.to_string()))
}

pub fn snapshot_from_json(text: &str) -> Result<Snapshot, EvolveError> {
    serde_json::from_str(text).map_err(|e| EvolveError::SerializationError(e.to_string()))
}

// =============================================================================
// CRYPTOGRAPHIC HASH SUPPORT
// =============================================================================

/// BLAKE3 hash (hex) of the binary encoding.
///
/// Identical state always hashes identically; every map in the snapshot
/// is ordered.
///
/// Only available with the `crypto-hash` feature.
#[cfg(feature = "crypto-hash")]
pub fn snapshot_crypto_hash(snapshot: &Snapshot) -> Result<String, EvolveError> {
    let bytes = snapshot_to_bytes(snapshot)?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
}

// =============================================================================
// TESTS
// =============================================================================
