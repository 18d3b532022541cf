//! Identifier newtypes shared by every layer of the kernel.
//!
//! `ResId` is a 26-character Crockford-base32 ULID: lexicographically
//! sortable and millisecond-ordered, so entities created later always sort
//! after entities created earlier within the same process. `FactId` is a
//! plain global counter assigned by the store; it carries no structure of
//! its own, only a total order.

use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

/// A globally unique entity (`res`) identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResId(Ulid);

impl ResId {
    /// Allocates a fresh, time-ordered id.
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Builds a `ResId` from an already-known 26-char Crockford-base32 string,
    /// e.g. when bootstrapping a sentinel with a fixed id.
    pub fn from_str_fixed(s: &str) -> Self {
        Self(Ulid::from_string(s).unwrap_or_else(|_| panic!("invalid sentinel id: {s}")))
    }

    /// Parses a `ResId` from its string form, e.g. when resolving a
    /// relationship member id stored as a JSON string in a fact payload.
    pub fn parse(s: &str) -> Option<Self> {
        Ulid::from_string(s).ok().map(Self)
    }
}

impl Default for ResId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ResId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The sole authoritative order for facts: a strictly monotonically
/// increasing integer, global across every entity and branch.
pub type FactId = u64;
