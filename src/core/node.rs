// ============================================================================
// weft - Node Types
// The universal graph vertex: flags, intrusive edge lists, extension hooks
// ============================================================================
//
// Every reactive primitive (cell, derived, effect, watch) is a node in one
// shared dependency graph. Graph traversal never needs to know the value
// type T, so all graph operations go through the type-erased `ReactiveNode`
// trait while the concrete `*Inner<T>` types hold the actual values.
//
// Edges live in a central generational arena (see `reactivity::links`); a
// node only stores the head/tail handles of its two intrusive lists.
// ============================================================================

use std::any::Any;
use std::cell::Cell;
use std::rc::Rc;

use super::constants::*;
use super::context::with_context;

// =============================================================================
// LINK HANDLES
// =============================================================================

/// Handle to an edge slot in the link arena.
///
/// The generation counter makes a stale handle unable to alias a reused
/// slot: lookups check the generation and report a dangling handle as
/// absent instead of resolving to an unrelated edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

// =============================================================================
// NODE LINKS
// =============================================================================

/// Per-node bookkeeping for the intrusive edge lists.
///
/// `deps` is the list of edges to the producers this node reads;
/// `subs` is the list of edges from the consumers that read this node.
/// Both are doubly linked through the arena, giving O(1) insertion and
/// removal without an auxiliary index.
pub struct NodeLinks {
    /// Stable identity, used for tracing and edge deduplication.
    id: u64,

    /// First/last edge on the dependency list (this node as consumer).
    pub(crate) deps_head: Cell<Option<LinkId>>,
    pub(crate) deps_tail: Cell<Option<LinkId>>,

    /// First/last edge on the subscriber list (this node as producer).
    pub(crate) subs_head: Cell<Option<LinkId>>,
    pub(crate) subs_tail: Cell<Option<LinkId>>,

    /// Propagation pass that last visited this node (cycle/diamond guard).
    pub(crate) visited_pass: Cell<u64>,

    /// Run pass that last linked this node as a producer (re-read dedup).
    pub(crate) linked_pass: Cell<u64>,
}

impl NodeLinks {
    /// Create the bookkeeping record for a new node, assigning a fresh id.
    pub fn new() -> Self {
        let id = with_context(|ctx| ctx.next_node_id());
        Self {
            id,
            deps_head: Cell::new(None),
            deps_tail: Cell::new(None),
            subs_head: Cell::new(None),
            subs_tail: Cell::new(None),
            visited_pass: Cell::new(0),
            linked_pass: Cell::new(0),
        }
    }

    /// Stable node identity.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether this node currently has any subscribers.
    pub fn has_subscribers(&self) -> bool {
        self.subs_head.get().is_some()
    }

    /// Whether this node currently has any dependencies.
    pub fn has_dependencies(&self) -> bool {
        self.deps_head.get().is_some()
    }
}

impl Default for NodeLinks {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// EQUALITY
// =============================================================================

/// Equality predicate for comparing node values.
pub type EqualsFn<T> = fn(&T, &T) -> bool;

/// Default equality using `PartialEq`.
pub fn default_equals<T: PartialEq>(a: &T, b: &T) -> bool {
    a == b
}

// =============================================================================
// DEBUG PROBE OPERATIONS
// =============================================================================

/// Operation kinds reported to the debug probe callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Create,
    Dispose,
    Get,
    Set,
    Notify,
    Link,
    Unlink,
    Run,
}

// =============================================================================
// REACTIVE NODE TRAIT
// =============================================================================

/// Type-erased interface every graph vertex implements.
///
/// This is also the extension point for custom node types: a type that
/// implements `ReactiveNode` (and calls `track_read` from its read path)
/// participates in tracking, propagation, batching and disposal exactly
/// like the built-in primitives. The default hook implementations give
/// cell semantics: resolution always reports "changed" and notification
/// only propagates when forced.
pub trait ReactiveNode: Any {
    /// Get the flags bitmask (kind + status bits).
    fn flags(&self) -> u32;

    /// Set the flags bitmask.
    fn set_flags(&self, flags: u32);

    /// Access the intrusive edge-list bookkeeping.
    fn links(&self) -> &NodeLinks;

    /// Upcast for downcasting to the concrete type.
    fn as_any(&self) -> &dyn Any;

    /// A strong handle to this node (backed by the node's own weak
    /// self-reference, set at construction).
    fn as_node(&self) -> Rc<dyn ReactiveNode>;

    /// Resolve staleness, returning whether the observable value actually
    /// changed. Cells have no function to re-run, so any notification
    /// trivially counts as a change; derived computations override this
    /// with recompute-and-compare, subscribers with a body run.
    fn update_node(&self) -> bool {
        true
    }

    /// Force-notify hook. `force = true` re-propagates to subscribers even
    /// without a value change; the default treats a soft notify as a no-op.
    fn notify_node(&self, force: bool) {
        if force {
            crate::reactivity::propagate::propagate(&self.as_node());
        }
    }

    /// Whether this node caches a resolved value (`previous_value` support).
    fn caches_value(&self) -> bool {
        false
    }

    /// Type-erased clone of the cached value, if one has been resolved.
    fn cached_value_any(&self) -> Option<Box<dyn Any>> {
        None
    }

    /// Detach this node from the graph: unlink every edge on both lists
    /// and mark it disposed. Idempotent. Node kinds with user cleanups
    /// override this to run them first.
    fn dispose_node(&self) {
        crate::reactivity::tracking::teardown(&self.as_node());
    }

    // =========================================================================
    // Flag helpers
    // =========================================================================

    fn is_disposed(&self) -> bool {
        self.flags() & DISPOSED != 0
    }

    fn is_dirty(&self) -> bool {
        self.flags() & DIRTY != 0
    }

    fn is_pending(&self) -> bool {
        self.flags() & PENDING != 0
    }

    fn is_stale(&self) -> bool {
        self.flags() & STALE_MASK != 0
    }

    /// Replace the staleness bits with `status` (`DIRTY`, `PENDING` or 0).
    fn set_status(&self, status: u32) {
        self.set_flags((self.flags() & !STALE_MASK) | status);
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct Bare {
        flags: Cell<u32>,
        links: NodeLinks,
    }

    impl ReactiveNode for Bare {
        fn flags(&self) -> u32 {
            self.flags.get()
        }

        fn set_flags(&self, flags: u32) {
            self.flags.set(flags);
        }

        fn links(&self) -> &NodeLinks {
            &self.links
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_node(&self) -> Rc<dyn ReactiveNode> {
            unreachable!("not needed for flag tests")
        }
    }

    #[test]
    fn node_ids_are_unique_and_increasing() {
        let a = NodeLinks::new();
        let b = NodeLinks::new();
        assert!(b.id() > a.id());
    }

    #[test]
    fn status_helpers_replace_staleness_bits_only() {
        let node = Bare {
            flags: Cell::new(PRODUCER | CELL),
            links: NodeLinks::new(),
        };

        assert!(!node.is_stale());

        node.set_status(DIRTY);
        assert!(node.is_dirty());
        assert!(!node.is_pending());
        assert_ne!(node.flags() & CELL, 0);

        node.set_status(PENDING);
        assert!(node.is_pending());
        assert!(!node.is_dirty());

        node.set_status(0);
        assert!(!node.is_stale());
        assert_ne!(node.flags() & PRODUCER, 0);
    }

    #[test]
    fn default_hooks_give_cell_semantics() {
        let node = Bare {
            flags: Cell::new(PRODUCER | CELL),
            links: NodeLinks::new(),
        };

        // Cells have nothing to recompute: resolution always "changed".
        assert!(node.update_node());
        assert!(!node.caches_value());
        assert!(node.cached_value_any().is_none());
    }

    #[test]
    fn fresh_node_has_empty_lists() {
        let links = NodeLinks::new();
        assert!(!links.has_subscribers());
        assert!(!links.has_dependencies());
    }
}
