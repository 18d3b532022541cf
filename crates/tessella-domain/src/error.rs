//! Validation errors raised by pure, store-independent checks on domain
//! value types. `tessella-core::KernelError` wraps these for the raise-and-
//! propagate error channel.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("duplicate attribute name (case-insensitive): {0}")]
    DuplicateAttribute(String),
    #[error("expected exactly one initial state, found {0}")]
    InitialStateCount(usize),
    #[error("transition references undefined state: {0}")]
    UndefinedTransitionEndpoint(String),
}
