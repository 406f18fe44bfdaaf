//! # Storage
//!
//! Durable snapshot storage backed by redb.

mod redb_store;

pub use redb_store::RedbSnapshotStore;
