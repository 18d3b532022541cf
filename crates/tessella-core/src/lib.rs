//! tessella-core: the durable, event-sourced entity engine.
//!
//! Purpose:
//! - Own the `Kernel`, the single entry point every typed operation hangs
//!   off of, pairing a `Store` with the session-scoped current branch and
//!   workspace.
//! - Materialize point-in-time state from a fact stream via the reducers in
//!   `materializer`, rather than caching derived state as authoritative.
//! - Provide the genus registry, entity/feature/relationship operations,
//!   action engine, process engine, branch/merge, and health validator as
//!   `impl<S: Store> Kernel<S>` blocks, one per module.
//!
//! Modules:
//! - `event`: the fact envelope, `FactType` vocabulary, and the `Store`
//!   trait plus its in-memory reference implementation.
//! - `materializer`: pure reducers folding a fact stream into each kind of
//!   materialized state.
//! - `genus`: the schema registry — define/evolve/deprecate genera.
//! - `ops`: typed entity, feature, and relationship operations.
//! - `action`: the declarative side-effect DSL and token substitution.
//! - `process`: the lane/step scheduler and process instance lifecycle.
//! - `branch`: branch-aware materialization, conflict detection, and merge.
//! - `health`: the pure health validator and Error entity lifecycle.
//! - `serialization`: the serialization genus registry (inputs, outputs, and
//!   an opaque `FileOp` handler blob interpreted by `tessella-adapters`).
//! - `indexes`: denormalized, rebuildable lookup structures.
//! - `hashing`: canonical JSON and content hashing for definition/param
//!   fingerprints.
//! - `constants`: sentinel genus ids and engine version.

pub mod action;
pub mod branch;
pub mod constants;
pub mod errors;
pub mod event;
pub mod genus;
pub mod hashing;
pub mod health;
pub mod indexes;
pub mod kernel;
pub mod materializer;
pub mod ops;
pub mod process;
pub mod serialization;

pub use action::ActionOutcome;
pub use branch::{BranchInfo, BranchStatus, MergeConflict, MergeOutcome};
pub use errors::KernelError;
pub use event::{Fact, FactType, InMemoryStore, Store};
pub use genus::{definition_hash, GenusSpec};
pub use health::HealthIssue;
pub use kernel::Kernel;
pub use materializer::{EntityState, SerializationDef};
pub use process::{advance_process, ProcessDef, ProcessInstanceState, ScheduleAction, StepDef, StepKind};
