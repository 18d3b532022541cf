//! tessella-domain: wire-level value types shared across the kernel.
//!
//! Nothing in this crate knows about storage, facts, or the registry — it is
//! the vocabulary every other crate validates against and folds into.

pub mod error;
pub mod genus;
pub mod ids;
pub mod value;

pub use error::ValidationError;
pub use genus::{AttributeDef, Cardinality, GenusDef, GenusKind, RoleDef, StateDef, TransitionDef};
pub use ids::{FactId, ResId};
pub use value::AttributeType;
