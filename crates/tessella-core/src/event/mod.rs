//! The fact log: append-only envelopes plus the `Store` abstraction that
//! persists them.

pub mod store;
pub mod types;

pub use store::{ActionTakenRecord, InMemoryStore, InputKind, SerializationRunRecord, Store};
pub use types::{Fact, FactType};
