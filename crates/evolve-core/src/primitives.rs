//! # Primitives
//!
//! Hardcoded constants of the evolve core.
//!
//! These are compiled into the library and are immutable at runtime.

/// Magic bytes for the binary snapshot header.
pub const MAGIC_BYTES: &[u8; 4] = b"EVLV";

/// Current binary snapshot format version.
///
/// Increment this when making breaking changes to the snapshot layout.
pub const FORMAT_VERSION: u8 = 1;

/// Size of the binary snapshot header (magic + version).
pub const HEADER_SIZE: usize = 5;

/// Default upper bound for a binary snapshot, checked before decoding.
///
/// Ledgers are append-only, so this is generous: 64 MB.
pub const MAX_SNAPSHOT_PAYLOAD_SIZE: usize = 64 * 1024 * 1024;
