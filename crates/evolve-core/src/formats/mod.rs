//! # Formats
//!
//! Snapshot encodings (binary and JSON). Pure transformations, no I/O.

mod persistence;

#[cfg(feature = "crypto-hash")]
pub use persistence::snapshot_crypto_hash;
pub use persistence::{
    Snapshot, SnapshotHeader, snapshot_from_bytes, snapshot_from_json, snapshot_to_bytes,
    snapshot_to_json,
};
