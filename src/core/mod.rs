// ============================================================================
// weft - Core Module
// Flags, errors, the node trait and the thread-local runtime context
// ============================================================================

pub mod constants;
pub mod context;
pub mod error;
pub mod node;

// Re-export commonly used items
pub use constants::*;
pub use context::{
    batch_depth, clear_debug_probe, is_batching, is_tracking, set_debug_probe, with_context,
    CleanupFn, RuntimeContext,
};
pub use error::ReactiveError;
pub use node::{default_equals, EqualsFn, LinkId, NodeLinks, OpKind, ReactiveNode};
