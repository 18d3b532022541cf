//! Hashing and JSON canonicalization.
//!
//! Replay determinism depends on canonical serialization: `to_canonical_json`
//! guarantees stable object-key order, and `hash_str`/`hash_value` turn that
//! into stable identifiers for genus/action/process definition hashes.

pub mod canonical_json;
pub mod hash;

pub use canonical_json::to_canonical_json;
pub use hash::{hash_str, hash_value};
