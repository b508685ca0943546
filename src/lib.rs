// ============================================================================
// weft - A Fine-Grained Reactive Dependency-Graph Runtime
// ============================================================================
//
// Cells hold values; derived computations cache functions over them;
// effects and watches re-run when what they read actually changed. The
// runtime tracks reads automatically, propagates staleness through an
// intrusive edge graph, and defers subscriber re-runs through batches so
// diamond-shaped graphs settle glitch-free with no redundant work.
// ============================================================================

pub mod core;
pub mod primitives;
pub mod reactivity;

// Re-export the core surface at the crate root
pub use crate::core::constants;
pub use crate::core::context::{
    batch_depth, clear_debug_probe, is_batching, is_tracking, set_debug_probe, with_context,
    CleanupFn, RuntimeContext,
};
pub use crate::core::error::ReactiveError;
pub use crate::core::node::{
    default_equals, EqualsFn, LinkId, NodeLinks, OpKind, ReactiveNode,
};

// Re-export the primitives
pub use crate::primitives::cell::{cell, cell_with_equals, Cell};
pub use crate::primitives::derived::{
    derived, derived_with_equals, derived_with_previous, derived_writable, previous_value,
    Derived, WritableDerived,
};
pub use crate::primitives::effect::{effect, effect_with_scheduler, on_cleanup, Effect};
pub use crate::primitives::scope::{current_scope, on_scope_dispose, Scope};
pub use crate::primitives::watch::{watch, watch_with_options, Watch, WatchOptions};

// Re-export the reactivity helpers
pub use crate::reactivity::batching::{batch, notify_all, trigger, untracked};
pub use crate::reactivity::equality;
pub use crate::reactivity::scheduling::flush;
pub use crate::reactivity::tracking::track_read;

// =============================================================================
// TESTS
// =============================================================================
