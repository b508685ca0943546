// ============================================================================
// weft - Primitives Module
// Node kinds built on the graph core: cell, derived, effect, watch, scope
// ============================================================================

pub mod cell;
pub mod derived;
pub mod effect;
pub mod scope;
pub mod watch;

// Re-export for convenience
pub use cell::{cell, cell_with_equals, Cell, CellInner};
pub use derived::{
    derived, derived_with_equals, derived_with_previous, derived_writable, previous_value,
    Derived, DerivedInner, WritableDerived,
};
pub use effect::{effect, effect_with_scheduler, on_cleanup, CleanupFn, Effect, EffectInner};
pub use scope::{current_scope, on_scope_dispose, Scope};
pub use watch::{watch, watch_with_options, Watch, WatchInner, WatchOptions};
