//! Optimistic mutation coordination.
//!
//! Every user action follows the same shape: guard against an identical
//! in-flight action, snapshot the touched cache entries, apply the
//! speculative patch, issue the request, then either reconcile the server's
//! authoritative fields or restore the snapshot wholesale. The cache is
//! never left half-applied.

mod coordinator;
mod error;

pub use coordinator::{MutationCoordinator, MutationOutcome};
pub use error::{MutationError, MutationResult};
