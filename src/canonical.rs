//! Canonical serialization for persisted files and stable token hashing.
//!
//! ## Determinism Guarantees
//!
//! - Stable field order: Struct fields serialize in declaration order
//! - Stable Vec order: Vectors serialize in index order
//! - No HashMap in persisted data: use BTreeMap for maps
//! - Output always ends with a single newline

use serde::Serialize;
use xxhash_rust::xxh64::xxh64;

/// Seed for token hashes. Changing it invalidates stored fingerprints.
pub const TOKEN_HASH_SEED: u64 = 0;

/// Serialize a value to the pretty JSON bytes written to disk.
pub fn to_json_bytes<T: Serialize>(value: &T) -> serde_json::Result<Vec<u8>> {
    let mut bytes = serde_json::to_vec_pretty(value)?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Stable 64-bit hash of a token.
pub fn token_hash(token: &str) -> u64 {
    xxh64(token.as_bytes(), TOKEN_HASH_SEED)
}
