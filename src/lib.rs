//! tessella
//!
//! This crate acts as tessella's top-level facade:
//! - Re-exports `tessella_core::Kernel` and its companion types so a
//!   consumer can `use tessella::Kernel` without depending on the
//!   individual workspace crates directly.
//!
//! Used by `main.rs` or any other binary/client built on top of the engine.

pub use tessella_core::{
    ActionOutcome, BranchInfo, BranchStatus, EntityState, GenusSpec, HealthIssue, Kernel,
    KernelError, MergeConflict, MergeOutcome,
};
pub use tessella_domain::{AttributeType, Cardinality, FactId, GenusKind, ResId};

#[cfg(test)]
mod tests {
    use super::*;
    use tessella_core::event::InMemoryStore;

    #[test]
    fn kernel_boots_through_the_facade() {
        let kernel = Kernel::new(InMemoryStore::new()).expect("kernel boots");
        assert_eq!(kernel.current_branch, "main");
    }
}
