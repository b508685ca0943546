// ============================================================================
// weft - Effects
// Side-effecting subscribers that re-run when tracked producers change
// ============================================================================
//
// An effect runs its body synchronously at construction, which is what
// establishes its dependency set. Re-runs always go through the flush
// queue (or a custom scheduler); only construction is immediate, so a
// nested effect created during a run executes right away while the outer
// re-run stays deferred.
// ============================================================================

use std::any::Any;
use std::cell::{Cell as RawCell, RefCell};
use std::rc::{Rc, Weak};

use crate::core::constants::*;
use crate::core::context::{emit_probe, with_context};
use crate::core::node::{NodeLinks, OpKind, ReactiveNode};
use crate::reactivity::propagate::confirm_stale;
use crate::reactivity::tracking::{begin_tracking, teardown};

pub use crate::core::context::CleanupFn;

/// Custom scheduler: receives the stale effect and returns whether it took
/// responsibility for running it (via [`Effect::run`]). A `false` return
/// falls back to the default flush queue.
pub type SchedulerFn = Rc<dyn Fn(Effect) -> bool>;

// =============================================================================
// EFFECT INNER
// =============================================================================

/// Node record behind [`Effect`].
pub struct EffectInner {
    flags: RawCell<u32>,
    body: RefCell<Option<Box<dyn FnMut()>>>,

    /// Cleanups registered during the most recent run, executed in
    /// registration order before the next run and on disposal.
    cleanups: Rc<RefCell<Vec<CleanupFn>>>,

    scheduler: RefCell<Option<SchedulerFn>>,
    links: NodeLinks,
    self_ref: RefCell<Weak<EffectInner>>,
}

impl EffectInner {
    fn create(body: Box<dyn FnMut()>, scheduler: Option<SchedulerFn>) -> Rc<Self> {
        let inner = Rc::new(Self {
            flags: RawCell::new(CONSUMER | EFFECT | DIRTY),
            body: RefCell::new(Some(body)),
            cleanups: Rc::new(RefCell::new(Vec::new())),
            scheduler: RefCell::new(scheduler),
            links: NodeLinks::new(),
            self_ref: RefCell::new(Weak::new()),
        });
        *inner.self_ref.borrow_mut() = Rc::downgrade(&inner);

        crate::primitives::scope::adopt_node(inner.clone() as Rc<dyn ReactiveNode>);
        emit_probe(OpKind::Create, &*inner);
        inner
    }

    /// Run the body with fresh dependency tracking: previous cleanups
    /// first, then the body inside a tracking window, then the sweep of
    /// edges the run no longer reads.
    pub(crate) fn run_body(this: &Rc<Self>) {
        // RUNNING: a write inside the body marked this effect stale again;
        // the queued entry must not re-enter the run already in progress.
        if this.flags.get() & (DISPOSED | RUNNING) != 0 {
            return;
        }

        run_cleanups(&this.cleanups);
        // Clean before the body so a write inside it re-dirties properly.
        this.set_status(0);

        let node = this.as_node();
        emit_probe(OpKind::Run, &**this);

        let _sink = CleanupSink::push(this.cleanups.clone());
        let window = begin_tracking(&node);

        // The body leaves its slot while it runs: a panic or a
        // dispose-from-within must not leave a dangling borrow. The guard
        // puts it back unless the effect was disposed mid-run.
        let mut restore = BodyRestore {
            owner: Rc::downgrade(this),
            body: this.body.borrow_mut().take(),
        };
        if let Some(body) = restore.body.as_mut() {
            body();
        }
        drop(restore);

        window.finish();
    }

    /// Hand this effect to its custom scheduler, if any. Returns whether
    /// scheduling was taken over.
    pub(crate) fn dispatch_to_scheduler(&self) -> bool {
        let scheduler = self.scheduler.borrow().clone();
        let Some(scheduler) = scheduler else {
            return false;
        };
        let Some(inner) = self.self_ref.borrow().upgrade() else {
            return false;
        };
        scheduler(Effect { inner })
    }
}

impl Drop for EffectInner {
    fn drop(&mut self) {
        // Fallback for a record dropped without an explicit dispose:
        // cleanups from the last run still execute.
        run_cleanups(&self.cleanups);
    }
}

struct BodyRestore {
    owner: Weak<EffectInner>,
    body: Option<Box<dyn FnMut()>>,
}

impl Drop for BodyRestore {
    fn drop(&mut self) {
        if let (Some(owner), Some(body)) = (self.owner.upgrade(), self.body.take()) {
            if !owner.is_disposed() {
                *owner.body.borrow_mut() = Some(body);
            }
        }
    }
}

impl ReactiveNode for EffectInner {
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
            .expect("effect self reference")
    }

    fn update_node(&self) -> bool {
        if let Some(inner) = self.self_ref.borrow().upgrade() {
            EffectInner::run_body(&inner);
        }
        false
    }

    fn dispose_node(&self) {
        let Some(inner) = self.self_ref.borrow().upgrade() else {
            return;
        };
        if inner.is_disposed() {
            return;
        }
        run_cleanups(&inner.cleanups);
        teardown(&inner.as_node());
        *inner.body.borrow_mut() = None;
        *inner.scheduler.borrow_mut() = None;
    }
}

/// Drain and run cleanups in registration order.
fn run_cleanups(cleanups: &Rc<RefCell<Vec<CleanupFn>>>) {
    let drained: Vec<CleanupFn> = cleanups.borrow_mut().drain(..).collect();
    for cleanup in drained {
        cleanup();
    }
}

// =============================================================================
// CLEANUP SINK
// =============================================================================

/// Window during which `on_cleanup` registrations land on a subscriber.
/// Popped on drop so a panicking body cannot leave the stack misaligned.
pub(crate) struct CleanupSink;

impl CleanupSink {
    pub(crate) fn push(sink: Rc<RefCell<Vec<CleanupFn>>>) -> Self {
        with_context(|ctx| ctx.cleanup_stack.borrow_mut().push(sink));
        Self
    }
}

impl Drop for CleanupSink {
    fn drop(&mut self) {
        with_context(|ctx| {
            ctx.cleanup_stack.borrow_mut().pop();
        });
    }
}

/// Register a cleanup on the currently running subscriber. Cleanups run
/// in registration order immediately before the subscriber's next run and
/// on its disposal. A no-op (logged at debug level) when no subscriber is
/// running.
///
/// # Example
///
/// ```
/// use weft::{cell, effect, on_cleanup};
/// use std::cell::Cell as StdCell;
/// use std::rc::Rc;
///
/// let tick = cell(0);
/// let open = Rc::new(StdCell::new(0));
///
/// let counter = open.clone();
/// let tick_dep = tick.clone();
/// let handle = effect(move || {
///     let _ = tick_dep.get();
///     counter.set(counter.get() + 1);
///     let counter = counter.clone();
///     on_cleanup(move || counter.set(counter.get() - 1));
/// });
///
/// assert_eq!(open.get(), 1);
/// tick.set(1); // previous cleanup runs before the re-run
/// assert_eq!(open.get(), 1);
///
/// handle.dispose();
/// assert_eq!(open.get(), 0);
/// ```
pub fn on_cleanup(f: impl FnOnce() + 'static) {
    let registered = with_context(|ctx| {
        let stack = ctx.cleanup_stack.borrow();
        match stack.last() {
            Some(sink) => {
                sink.borrow_mut().push(Box::new(f));
                true
            }
            None => false,
        }
    });
    if !registered {
        tracing::debug!("on_cleanup called with no subscriber running");
    }
}

// =============================================================================
// EFFECT HANDLE
// =============================================================================

/// A side-effecting subscriber.
///
/// Dropping the last handle disposes the effect unless a scope owns it.
///
/// # Example
///
/// ```
/// use weft::{cell, effect};
/// use std::cell::Cell as StdCell;
/// use std::rc::Rc;
///
/// let count = cell(0);
/// let seen = Rc::new(StdCell::new(0));
///
/// let seen_in_effect = seen.clone();
/// let count_dep = count.clone();
/// let _effect = effect(move || {
///     seen_in_effect.set(count_dep.get());
/// });
///
/// count.set(42);
/// assert_eq!(seen.get(), 42);
/// ```
pub struct Effect {
    inner: Rc<EffectInner>,
}

impl Effect {
    /// Resolve staleness and run the body if a tracked producer confirmed
    /// a change. The entry point for custom schedulers.
    pub fn run(&self) {
        if self.inner.is_disposed() {
            return;
        }
        if confirm_stale(&self.inner.as_node()) {
            EffectInner::run_body(&self.inner);
        }
    }

    /// Run previous cleanups, unlink every dependency and reject all
    /// further runs. Idempotent.
    pub fn dispose(&self) {
        self.inner.dispose_node();
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }

    /// Type-erased graph handle.
    pub fn as_node(&self) -> Rc<dyn ReactiveNode> {
        self.inner.as_node()
    }
}

impl Clone for Effect {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl Drop for Effect {
    fn drop(&mut self) {
        // Last handle standing disposes; a scope-owned effect is also held
        // by its scope and survives handle drops.
        if Rc::strong_count(&self.inner) == 1 {
            self.dispose();
        }
    }
}

// =============================================================================
// CONSTRUCTORS
// =============================================================================

/// Create an effect. The body runs immediately, establishing the
/// dependency set; it re-runs (via the flush queue) whenever a tracked
/// producer is confirmed changed.
pub fn effect<F>(body: F) -> Effect
where
    F: FnMut() + 'static,
{
    let inner = EffectInner::create(Box::new(body), None);
    EffectInner::run_body(&inner);
    Effect { inner }
}

/// Create an effect with a custom scheduler. When the effect goes stale
/// the scheduler is invoked instead of the default queue; returning `true`
/// means the scheduler owns the re-run and will call [`Effect::run`]
/// itself.
pub fn effect_with_scheduler<F, S>(body: F, scheduler: S) -> Effect
where
    F: FnMut() + 'static,
    S: Fn(Effect) -> bool + 'static,
{
    let inner = EffectInner::create(Box::new(body), Some(Rc::new(scheduler)));
    EffectInner::run_body(&inner);
    Effect { inner }
}

// =============================================================================
// TESTS
// =============================================================================
