// ============================================================================
// weft - Errors
// Precondition violations surfaced by the fallible operation variants
// ============================================================================

use thiserror::Error;

/// Errors produced by graph operations.
///
/// These cover precondition violations only. Errors raised by user code
/// (recompute functions, subscriber bodies, setters, comparators) are never
/// wrapped by the engine; they unwind to whatever triggered the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ReactiveError {
    /// Any operation on a node that has been disposed.
    #[error("operation on a disposed reactive node")]
    Disposed,

    /// Reading a lazily-constructed cell before its first write.
    #[error("cell read before its first write")]
    Unset,

    /// `previous_value` called with no recompute function on the stack.
    #[error("previous value requested outside an active computation")]
    NoActiveComputation,

    /// `previous_value::<T>` called with a `T` that does not match the
    /// active computation's cached type.
    #[error("previous value requested with a mismatched type")]
    PreviousValueType,
}
