//! Hash helpers, abstracted so the algorithm can change without touching
//! the rest of the core. Currently BLAKE3.

use super::canonical_json::to_canonical_json;
use blake3::Hasher;
use serde_json::Value;

pub fn hash_str(input: &str) -> String {
    let mut h = Hasher::new();
    h.update(input.as_bytes());
    h.finalize().to_hex().to_string()
}

/// Canonicalizes `v` before hashing, so two structurally equal JSON values
/// with differently-ordered object keys hash identically.
pub fn hash_value(v: &Value) -> String {
    hash_str(&to_canonical_json(v))
}
