// ============================================================================
// weft - Batching & Read Helpers
// Deferring subscriber runs, untracked reads, probe-driven force helpers
// ============================================================================

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use crate::core::constants::*;
use crate::core::context::with_context;
use crate::core::node::{NodeLinks, ReactiveNode};
use crate::reactivity::scheduling::flush_if_idle;
use crate::reactivity::tracking::{begin_tracking, collect_dependencies, teardown};

// =============================================================================
// BATCH
// =============================================================================

/// Run `f` with subscriber re-runs deferred until the outermost batch
/// exits.
///
/// Writes inside the batch still mark the graph stale immediately; only
/// the flush is held back, so any subscriber runs at most once per batch
/// and observes the final values. Batches nest; the depth is decremented
/// even when `f` panics (in which case the deferred flush is left for the
/// next write or explicit `flush`).
///
/// # Example
///
/// ```
/// use weft::{batch, cell, effect};
/// use std::cell::Cell as StdCell;
/// use std::rc::Rc;
///
/// let a = cell(1);
/// let b = cell(2);
/// let runs = Rc::new(StdCell::new(0));
///
/// let runs_in_effect = runs.clone();
/// let (a2, b2) = (a.clone(), b.clone());
/// let _effect = effect(move || {
///     let _ = a2.get() + b2.get();
///     runs_in_effect.set(runs_in_effect.get() + 1);
/// });
/// assert_eq!(runs.get(), 1);
///
/// batch(|| {
///     a.set(10);
///     b.set(20);
/// });
///
/// // One re-run for both writes.
/// assert_eq!(runs.get(), 2);
/// ```
pub fn batch<R>(f: impl FnOnce() -> R) -> R {
    with_context(|ctx| ctx.enter_batch());

    struct BatchGuard;
    impl Drop for BatchGuard {
        fn drop(&mut self) {
            let depth = with_context(|ctx| ctx.exit_batch());
            // The depth must come back down even while unwinding, but
            // running subscribers during a panic would double-fault; the
            // queue stays parked for the next write or explicit flush.
            if depth == 0 && !std::thread::panicking() {
                flush_if_idle();
            }
        }
    }

    let _guard = BatchGuard;
    f()
}

// =============================================================================
// UNTRACKED
// =============================================================================

/// Run `f` with dependency tracking suspended: reads inside create no
/// edges, so the surrounding subscriber will not re-run when those
/// producers change. The previous tracking state is restored even if `f`
/// panics.
///
/// # Example
///
/// ```
/// use weft::{cell, effect, untracked};
/// use std::cell::Cell as StdCell;
/// use std::rc::Rc;
///
/// let tracked = cell(1);
/// let ignored = cell(2);
/// let runs = Rc::new(StdCell::new(0));
///
/// let runs_in_effect = runs.clone();
/// let (t, i) = (tracked.clone(), ignored.clone());
/// let _effect = effect(move || {
///     let _ = t.get();
///     let _ = untracked(|| i.get());
///     runs_in_effect.set(runs_in_effect.get() + 1);
/// });
///
/// ignored.set(99);
/// assert_eq!(runs.get(), 1);
///
/// tracked.set(5);
/// assert_eq!(runs.get(), 2);
/// ```
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    let prev = with_context(|ctx| ctx.set_untracking(true));

    struct UntrackGuard {
        prev: bool,
    }
    impl Drop for UntrackGuard {
        fn drop(&mut self) {
            with_context(|ctx| ctx.set_untracking(self.prev));
        }
    }

    let _guard = UntrackGuard { prev };
    f()
}

// =============================================================================
// PROBE CONSUMER
// =============================================================================

/// Throwaway consumer backing `trigger` and `notify_all`: it collects the
/// edges created by reads inside the closure and is disposed immediately
/// afterwards, leaving no subscription behind.
struct ProbeNode {
    flags: Cell<u32>,
    links: NodeLinks,
    self_ref: RefCell<Weak<ProbeNode>>,
}

impl ProbeNode {
    fn new() -> Rc<dyn ReactiveNode> {
        let probe = Rc::new(Self {
            flags: Cell::new(CONSUMER | PROBE),
            links: NodeLinks::new(),
            self_ref: RefCell::new(Weak::new()),
        });
        *probe.self_ref.borrow_mut() = Rc::downgrade(&probe);
        probe
    }
}

impl ReactiveNode for ProbeNode {
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
        self.self_ref
            .borrow()
            .upgrade()
            .expect("probe self reference")
    }

    fn update_node(&self) -> bool {
        false
    }
}

// =============================================================================
// TRIGGER / NOTIFY ALL
// =============================================================================

/// Read producers through a disposable consumer, forcing staleness
/// resolution of everything read without leaving a permanent
/// subscription.
pub fn trigger<R>(f: impl FnOnce() -> R) -> R {
    let probe = ProbeNode::new();
    let window = begin_tracking(&probe);
    let result = f();
    window.finish();
    teardown(&probe);
    result
}

/// Run `f` and then force-notify every producer it read, regardless of
/// whether any value changed. Used for bulk invalidation. The
/// notifications are batched, so each downstream subscriber still runs at
/// most once.
pub fn notify_all<R>(f: impl FnOnce() -> R) -> R {
    let probe = ProbeNode::new();
    let window = begin_tracking(&probe);
    let result = f();
    window.finish();

    let producers = collect_dependencies(&probe);
    teardown(&probe);

    batch(|| {
        for producer in producers {
            producer.notify_node(true);
        }
    });

    result
}

// =============================================================================
// TESTS
// =============================================================================
