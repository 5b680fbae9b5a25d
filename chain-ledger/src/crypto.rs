//! Cryptographic operations for the ledger
//!
//! This module provides:
//! - Canonical record hashing (sorted-key JSON, SHA-256, lowercase hex)
//! - Double SHA-256 used by the merkle tree
//! - Proof-of-work difficulty checks

use crate::{Error, Result};
use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// 64 zero hex characters: previous hash of genesis and root of an empty tree
pub const ZERO_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Hash an arbitrary record.
///
/// The record is rendered as JSON with object keys sorted at every level.
/// Decimal amounts and timestamps serialize as strings, so the preimage never
/// depends on float formatting.
pub fn compute_hash<T: Serialize + ?Sized>(record: &T) -> Result<String> {
    let value = canonicalize(serde_json::to_value(record)?);
    let payload = serde_json::to_vec(&value)?;
    Ok(hex::encode(hash_bytes(&payload)))
}

/// Rebuild every object with keys inserted in sorted order
fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));

            let mut sorted = Map::new();
            for (key, inner) in entries {
                sorted.insert(key, canonicalize(inner));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

/// Hash arbitrary bytes using SHA-256
pub fn hash_bytes(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// SHA-256 applied twice
pub fn double_sha256(data: &[u8]) -> [u8; 32] {
    hash_bytes(&hash_bytes(data))
}

/// Decode a 64-character hex hash into raw bytes
pub fn decode_hash(hash: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(hash).map_err(|e| Error::InvalidHash(format!("{}: {}", hash, e)))?;
    bytes
        .try_into()
        .map_err(|_| Error::InvalidHash(format!("{}: expected 32 bytes", hash)))
}

/// True when `hash` starts with `difficulty` hex zeros
pub fn meets_difficulty(hash: &str, difficulty: usize) -> bool {
    hash.len() >= difficulty && hash.bytes().take(difficulty).all(|b| b == b'0')
}
