// ============================================================================
// weft - Runtime Context
// Thread-local state shared by every node in the graph
// ============================================================================
//
// The active consumer, pass counters, batch depth, link arena and flush
// queue are all process-wide mutable state with no external
// synchronization; safety relies on the single cooperative thread of
// control. Keeping them in one struct behind a thread_local (rather than
// loose statics) keeps the design portable to a task-local host.
// ============================================================================

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

use super::node::{OpKind, ReactiveNode};
use crate::reactivity::links::LinkArena;

/// Cleanup callback registered on a running subscriber or an active scope.
pub type CleanupFn = Box<dyn FnOnce()>;

/// Debug probe callback: `(operation, node)`.
pub type ProbeFn = dyn Fn(OpKind, &dyn ReactiveNode);

// =============================================================================
// RUNTIME CONTEXT
// =============================================================================

/// Thread-local runtime state for the reactive graph.
pub struct RuntimeContext {
    // =========================================================================
    // TRACKING
    // =========================================================================
    /// Consumer currently re-running its body/function, if any.
    pub active_consumer: RefCell<Option<Weak<dyn ReactiveNode>>>,

    /// Run pass of the innermost open tracking window (0 = none).
    pub active_run_pass: Cell<u64>,

    /// Whether reads are currently exempt from dependency tracking.
    pub untracking: Cell<bool>,

    /// Cleanup sinks of the subscribers currently running, innermost last.
    pub cleanup_stack: RefCell<Vec<Rc<RefCell<Vec<CleanupFn>>>>>,

    // =========================================================================
    // PASS COUNTERS
    // =========================================================================
    /// Monotonic counter of consumer runs; stamps dependency edges.
    run_pass: Cell<u64>,

    /// Monotonic counter of propagation walks; stamps visited nodes.
    propagate_pass: Cell<u64>,

    /// Monotonic node id source.
    node_ids: Cell<u64>,

    // =========================================================================
    // EDGES
    // =========================================================================
    /// Central arena owning every edge record in the graph.
    pub links: RefCell<LinkArena>,

    // =========================================================================
    // BATCHING / SCHEDULING
    // =========================================================================
    /// Nesting depth of batched regions; subscribers flush at zero.
    batch_depth: Cell<u32>,

    /// FIFO queue of subscribers awaiting a re-run.
    pub queue: RefCell<VecDeque<Weak<dyn ReactiveNode>>>,

    /// Whether a flush is currently draining the queue.
    pub flushing: Cell<bool>,

    // =========================================================================
    // INSTRUMENTATION
    // =========================================================================
    /// Optional debug probe; `probe_installed` is the cheap fast-path guard.
    probe: RefCell<Option<Rc<ProbeFn>>>,
    probe_installed: Cell<bool>,
}

impl RuntimeContext {
    fn new() -> Self {
        Self {
            active_consumer: RefCell::new(None),
            active_run_pass: Cell::new(0),
            untracking: Cell::new(false),
            cleanup_stack: RefCell::new(Vec::new()),
            run_pass: Cell::new(0),
            propagate_pass: Cell::new(0),
            node_ids: Cell::new(0),
            links: RefCell::new(LinkArena::new()),
            batch_depth: Cell::new(0),
            queue: RefCell::new(VecDeque::new()),
            flushing: Cell::new(false),
            probe: RefCell::new(None),
            probe_installed: Cell::new(false),
        }
    }

    // =========================================================================
    // TRACKING
    // =========================================================================

    /// Replace the active consumer, returning the previous one.
    pub fn set_active_consumer(
        &self,
        consumer: Option<Weak<dyn ReactiveNode>>,
    ) -> Option<Weak<dyn ReactiveNode>> {
        self.active_consumer.replace(consumer)
    }

    /// Get the active consumer.
    pub fn get_active_consumer(&self) -> Option<Weak<dyn ReactiveNode>> {
        self.active_consumer.borrow().clone()
    }

    /// Whether a consumer is currently re-running.
    pub fn has_active_consumer(&self) -> bool {
        self.active_consumer.borrow().is_some()
    }

    /// Set untracking mode, returning the previous value.
    pub fn set_untracking(&self, value: bool) -> bool {
        self.untracking.replace(value)
    }

    /// Whether reads are currently untracked.
    pub fn is_untracking(&self) -> bool {
        self.untracking.get()
    }

    // =========================================================================
    // PASS COUNTERS
    // =========================================================================

    /// Start a new consumer run, returning its pass id.
    pub fn next_run_pass(&self) -> u64 {
        let pass = self.run_pass.get() + 1;
        self.run_pass.set(pass);
        pass
    }

    /// Start a new propagation walk, returning its pass id.
    pub fn next_propagate_pass(&self) -> u64 {
        let pass = self.propagate_pass.get() + 1;
        self.propagate_pass.set(pass);
        pass
    }

    /// Allocate a fresh node id.
    pub fn next_node_id(&self) -> u64 {
        let id = self.node_ids.get() + 1;
        self.node_ids.set(id);
        id
    }

    // =========================================================================
    // BATCHING
    // =========================================================================

    /// Increment the batch depth, returning the new depth.
    pub fn enter_batch(&self) -> u32 {
        let depth = self.batch_depth.get() + 1;
        self.batch_depth.set(depth);
        depth
    }

    /// Decrement the batch depth, returning the new depth.
    pub fn exit_batch(&self) -> u32 {
        let depth = self.batch_depth.get().saturating_sub(1);
        self.batch_depth.set(depth);
        depth
    }

    /// Current batch depth.
    pub fn get_batch_depth(&self) -> u32 {
        self.batch_depth.get()
    }

    /// Whether a batched region is open.
    pub fn is_batching(&self) -> bool {
        self.batch_depth.get() > 0
    }

    // =========================================================================
    // INSTRUMENTATION
    // =========================================================================

    /// Install the debug probe.
    pub fn install_probe(&self, probe: Rc<ProbeFn>) {
        *self.probe.borrow_mut() = Some(probe);
        self.probe_installed.set(true);
    }

    /// Remove the debug probe.
    pub fn remove_probe(&self) {
        *self.probe.borrow_mut() = None;
        self.probe_installed.set(false);
    }

    /// Get the installed probe, if any.
    pub fn probe(&self) -> Option<Rc<ProbeFn>> {
        if !self.probe_installed.get() {
            return None;
        }
        self.probe.borrow().clone()
    }
}

impl Default for RuntimeContext {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// THREAD-LOCAL ACCESS
// =============================================================================

thread_local! {
    static CONTEXT: RuntimeContext = RuntimeContext::new();
}

/// Access the thread-local runtime context.
pub fn with_context<R>(f: impl FnOnce(&RuntimeContext) -> R) -> R {
    CONTEXT.with(f)
}

/// Fire the debug probe for an operation, if one is installed.
#[inline]
pub(crate) fn emit_probe(op: OpKind, node: &dyn ReactiveNode) {
    if let Some(probe) = with_context(|ctx| ctx.probe()) {
        probe(op, node);
    }
}

// =============================================================================
// CONVENIENCE FUNCTIONS
// =============================================================================

/// Whether reads are currently tracked (a consumer is running and
/// untracking is not in force).
pub fn is_tracking() -> bool {
    with_context(|ctx| ctx.has_active_consumer() && !ctx.is_untracking())
}

/// Whether a batched region is currently open.
pub fn is_batching() -> bool {
    with_context(|ctx| ctx.is_batching())
}

/// Current batch nesting depth.
pub fn batch_depth() -> u32 {
    with_context(|ctx| ctx.get_batch_depth())
}

/// Install a debug probe fired on create/dispose/get/set/notify/link/
/// unlink/run. The probe must not mutate the graph. When no probe is
/// installed the per-operation cost is a single flag check.
pub fn set_debug_probe(probe: impl Fn(OpKind, &dyn ReactiveNode) + 'static) {
    with_context(|ctx| ctx.install_probe(Rc::new(probe)));
}

/// Remove the installed debug probe.
pub fn clear_debug_probe() {
    with_context(|ctx| ctx.remove_probe());
}

// =============================================================================
// TESTS
// =============================================================================
