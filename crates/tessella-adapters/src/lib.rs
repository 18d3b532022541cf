//! tessella-adapters: concrete evaluators the host application plugs into
//! the kernel's declarative surfaces.
//!
//! A thin crate owning typed shapes and an evaluator, never the IO itself.
//! The only thing left unenumerated by the core fact vocabulary is the
//! serialization genus's `handler` (opaque `Json` in
//! `tessella_core::SerializationDef`): the `FileOp` evaluator lives here,
//! the actual filesystem reader/writer does not. This crate owns:
//! - `FileOp`, the typed vocabulary a serialization handler is made of.
//! - `FileSystem`, the trait the host implements for actual reads/writes.
//! - `evaluate_file_ops`/`run_serialization`, the evaluator that resolves
//!   tokens and drives a `FileSystem` through a parsed handler.
//!
//! `tessella-core`'s own `SideEffect`s are executed entirely inside
//! `Kernel::execute_action` — they never leave the store transaction, so
//! there is nothing for this crate to adapt there.

pub mod file_op;

pub use file_op::{run_serialization, AdapterError, FileOp, FileSystem, SerializationContext, SerializationOutcome};
