// ============================================================================
// weft - Watch
// Declarative pull-comparison subscriber
// ============================================================================
//
// A watch evaluates a getter under tracking, keeps the last result as a
// baseline, and invokes its callback with (new, old) only when the
// comparison predicate reports a meaningful change (or on every confirmed
// notification, if configured). The getter runs with no scope current, so
// nodes it happens to construct are not adopted by the surrounding scope.
// ============================================================================

use std::any::Any;
use std::cell::{Cell as RawCell, RefCell};
use std::rc::{Rc, Weak};

use crate::core::constants::*;
use crate::core::context::emit_probe;
use crate::core::error::ReactiveError;
use crate::core::node::{default_equals, EqualsFn, NodeLinks, OpKind, ReactiveNode};
use crate::primitives::effect::{CleanupFn, CleanupSink};
use crate::primitives::scope::{adopt_node, with_scope_suspended};
use crate::reactivity::tracking::{begin_tracking, teardown};

type WatchCallback<T> = Box<dyn FnMut(&T, Option<&T>)>;

// =============================================================================
// OPTIONS
// =============================================================================

/// Configuration for [`watch_with_options`].
pub struct WatchOptions<T> {
    /// Deliver the first evaluation to the callback at creation (with no
    /// old value) instead of only seeding the baseline.
    pub immediate: bool,

    /// Fire on every confirmed upstream notification, ignoring the
    /// comparison predicate.
    pub on_notify: bool,

    /// Comparison predicate; `PartialEq` equality when absent.
    pub equals: Option<EqualsFn<T>>,
}

impl<T> Default for WatchOptions<T> {
    fn default() -> Self {
        Self {
            immediate: false,
            on_notify: false,
            equals: None,
        }
    }
}

// =============================================================================
// WATCH INNER
// =============================================================================

/// Node record behind [`Watch`].
pub struct WatchInner<T> {
    flags: RawCell<u32>,
    getter: RefCell<Option<Box<dyn Fn() -> T>>>,
    callback: RefCell<Option<WatchCallback<T>>>,
    equals: EqualsFn<T>,
    fire_on_notify: bool,

    /// Baseline for the next comparison.
    last: RefCell<Option<T>>,

    cleanups: Rc<RefCell<Vec<CleanupFn>>>,
    links: NodeLinks,
    self_ref: RefCell<Weak<WatchInner<T>>>,
}

impl<T: Clone + 'static> WatchInner<T> {
    fn create(
        getter: Box<dyn Fn() -> T>,
        callback: WatchCallback<T>,
        equals: EqualsFn<T>,
        fire_on_notify: bool,
    ) -> Rc<Self> {
        let inner = Rc::new(Self {
            flags: RawCell::new(CONSUMER | WATCH),
            getter: RefCell::new(Some(getter)),
            callback: RefCell::new(Some(callback)),
            equals,
            fire_on_notify,
            last: RefCell::new(None),
            cleanups: Rc::new(RefCell::new(Vec::new())),
            links: NodeLinks::new(),
            self_ref: RefCell::new(Weak::new()),
        });
        *inner.self_ref.borrow_mut() = Rc::downgrade(&inner);

        adopt_node(inner.clone() as Rc<dyn ReactiveNode>);
        emit_probe(OpKind::Create, &*inner);
        inner
    }

    /// Evaluate the getter under tracking, with the scope stack suspended.
    fn evaluate(this: &Rc<Self>) -> T {
        let node = this.as_node();
        let window = begin_tracking(&node);
        let value = with_scope_suspended(|| {
            let getter = this.getter.borrow();
            let getter = getter.as_ref().expect("watch getter present until disposal");
            getter()
        });
        window.finish();
        value
    }

    /// Invoke the callback, tolerating disposal from within it.
    fn fire(this: &Rc<Self>, new_value: &T, old_value: Option<&T>) {
        let mut restore = CallbackRestore {
            owner: Rc::downgrade(this),
            callback: this.callback.borrow_mut().take(),
        };
        if let Some(callback) = restore.callback.as_mut() {
            callback(new_value, old_value);
        }
        drop(restore);
    }

    /// Confirmed-change entry point: re-evaluate, compare, maybe fire.
    fn rerun(this: &Rc<Self>) {
        if this.flags.get() & (DISPOSED | RUNNING) != 0 {
            return;
        }

        run_watch_cleanups(&this.cleanups);
        this.set_status(0);
        emit_probe(OpKind::Run, &**this);

        let _sink = CleanupSink::push(this.cleanups.clone());
        let new_value = Self::evaluate(this);

        let old_value = this.last.borrow_mut().take();
        let changed = match &old_value {
            Some(old) => !(this.equals)(&new_value, old),
            None => true,
        };

        if this.fire_on_notify || changed {
            Self::fire(this, &new_value, old_value.as_ref());
        }
        if !this.is_disposed() {
            *this.last.borrow_mut() = Some(new_value);
        }
    }
}

impl<T> Drop for WatchInner<T> {
    fn drop(&mut self) {
        // Fallback for a record dropped without an explicit dispose:
        // cleanups from the last run still execute.
        run_watch_cleanups(&self.cleanups);
    }
}

struct CallbackRestore<T> {
    owner: Weak<WatchInner<T>>,
    callback: Option<WatchCallback<T>>,
}

impl<T> Drop for CallbackRestore<T> {
    fn drop(&mut self) {
        if let (Some(owner), Some(callback)) = (self.owner.upgrade(), self.callback.take()) {
            if owner.flags.get() & DISPOSED == 0 {
                *owner.callback.borrow_mut() = Some(callback);
            }
        }
    }
}

fn run_watch_cleanups(cleanups: &Rc<RefCell<Vec<CleanupFn>>>) {
    let drained: Vec<CleanupFn> = cleanups.borrow_mut().drain(..).collect();
    for cleanup in drained {
        cleanup();
    }
}

impl<T: Clone + 'static> ReactiveNode for WatchInner<T> {
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
            .expect("watch self reference")
    }

    fn update_node(&self) -> bool {
        if let Some(inner) = self.self_ref.borrow().upgrade() {
            WatchInner::rerun(&inner);
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
        run_watch_cleanups(&inner.cleanups);
        teardown(&inner.as_node());
        *inner.getter.borrow_mut() = None;
        *inner.callback.borrow_mut() = None;
        *inner.last.borrow_mut() = None;
    }
}

// =============================================================================
// WATCH HANDLE
// =============================================================================

/// A subscriber that compares old/new getter results and fires a callback
/// only on meaningful change.
///
/// # Example
///
/// ```
/// use weft::{cell, watch};
/// use std::cell::RefCell;
/// use std::rc::Rc;
///
/// let temperature = cell(20);
/// let log = Rc::new(RefCell::new(Vec::new()));
///
/// let sink = log.clone();
/// let temp_dep = temperature.clone();
/// let _watch = watch(
///     move || temp_dep.get(),
///     move |new, old| {
///         sink.borrow_mut().push((*new, old.copied()));
///     },
/// );
///
/// temperature.set(25);
/// temperature.set(25); // written but equal: no callback
/// temperature.set(30);
///
/// assert_eq!(*log.borrow(), vec![(25, Some(20)), (30, Some(25))]);
/// ```
pub struct Watch<T: Clone + 'static> {
    inner: Rc<WatchInner<T>>,
}

impl<T: Clone + 'static> Watch<T> {
    /// The baseline from the most recent evaluation.
    pub fn last(&self) -> Option<T> {
        if self.inner.is_disposed() {
            panic!("Watch::last: {}", ReactiveError::Disposed);
        }
        self.inner.last.borrow().clone()
    }

    /// Stop future re-evaluation and run registered cleanups. Idempotent.
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

impl<T: Clone + 'static> Clone for Watch<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + 'static> Drop for Watch<T> {
    fn drop(&mut self) {
        // Last handle standing disposes; a scope-owned watch is also held
        // by its scope and survives handle drops.
        if Rc::strong_count(&self.inner) == 1 {
            self.inner.dispose_node();
        }
    }
}

// =============================================================================
// CONSTRUCTORS
// =============================================================================

/// Create a watch with default comparison (`PartialEq`), no immediate
/// delivery, firing only on value changes.
pub fn watch<T, G, C>(getter: G, callback: C) -> Watch<T>
where
    T: Clone + PartialEq + 'static,
    G: Fn() -> T + 'static,
    C: FnMut(&T, Option<&T>) + 'static,
{
    watch_with_options(getter, callback, WatchOptions::default())
}

/// Create a watch with explicit options.
pub fn watch_with_options<T, G, C>(getter: G, mut callback: C, options: WatchOptions<T>) -> Watch<T>
where
    T: Clone + PartialEq + 'static,
    G: Fn() -> T + 'static,
    C: FnMut(&T, Option<&T>) + 'static,
{
    let immediate = options.immediate;
    let equals = options.equals.unwrap_or(default_equals);

    let inner = WatchInner::create(
        Box::new(getter),
        Box::new(move |new: &T, old: Option<&T>| callback(new, old)),
        equals,
        options.on_notify,
    );

    // First evaluation establishes the dependency set; `immediate`
    // additionally delivers it, otherwise it only seeds the baseline.
    {
        let _sink = CleanupSink::push(inner.cleanups.clone());
        let first = WatchInner::evaluate(&inner);
        if immediate {
            WatchInner::fire(&inner, &first, None);
        }
        if !inner.is_disposed() {
            *inner.last.borrow_mut() = Some(first);
        }
    }

    Watch { inner }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::cell::cell;
    use crate::primitives::derived::derived;
    use crate::primitives::effect::on_cleanup;
    use crate::reactivity::batching::batch;
    use std::cell::Cell as StdCell;

    #[test]
    fn fires_with_new_and_old_on_change() {
        let source = cell(1);
        let log = Rc::new(RefCell::new(Vec::new()));

        let sink = log.clone();
        let dep = source.clone();
        let _watch = watch(
            move || dep.get(),
            move |new, old| sink.borrow_mut().push((*new, old.copied())),
        );

        assert!(log.borrow().is_empty(), "first evaluation seeds silently");

        source.set(2);
        source.set(3);
        assert_eq!(*log.borrow(), vec![(2, Some(1)), (3, Some(2))]);
    }

    #[test]
    fn equal_result_does_not_fire() {
        let source = cell(0);
        let fired = Rc::new(StdCell::new(0));

        let counter = fired.clone();
        let dep = source.clone();
        let _watch = watch(
            move || dep.get() % 2,
            move |_, _| counter.set(counter.get() + 1),
        );

        source.set(2); // parity unchanged
        assert_eq!(fired.get(), 0);

        source.set(3);
        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn immediate_delivers_the_first_value() {
        let source = cell(10);
        let log = Rc::new(RefCell::new(Vec::new()));

        let sink = log.clone();
        let dep = source.clone();
        let _watch = watch_with_options(
            move || dep.get(),
            move |new, old| sink.borrow_mut().push((*new, old.copied())),
            WatchOptions {
                immediate: true,
                ..WatchOptions::default()
            },
        );

        assert_eq!(*log.borrow(), vec![(10, None)]);

        source.set(11);
        assert_eq!(*log.borrow(), vec![(10, None), (11, Some(10))]);
    }

    #[test]
    fn on_notify_fires_even_without_a_value_change() {
        let source = cell(0);
        let fired = Rc::new(StdCell::new(0));

        let counter = fired.clone();
        let dep = source.clone();
        let _watch = watch_with_options(
            move || dep.get() % 2,
            move |_, _| counter.set(counter.get() + 1),
            WatchOptions {
                on_notify: true,
                ..WatchOptions::default()
            },
        );

        source.set(2); // parity unchanged, but the notification is confirmed
        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn custom_predicate_controls_firing() {
        let source = cell(0.0_f64);
        let fired = Rc::new(StdCell::new(0));

        // Only moves larger than 0.5 count as a change.
        fn coarse(a: &f64, b: &f64) -> bool {
            (a - b).abs() < 0.5
        }

        let counter = fired.clone();
        let dep = source.clone();
        let _watch = watch_with_options(
            move || dep.get(),
            move |_, _| counter.set(counter.get() + 1),
            WatchOptions {
                equals: Some(coarse),
                ..WatchOptions::default()
            },
        );

        source.set(0.2);
        assert_eq!(fired.get(), 0, "below the threshold");

        source.set(1.0);
        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn watch_over_derived_sees_settled_values() {
        let source = cell(1);
        let doubled = derived({
            let source = source.clone();
            move || source.get() * 2
        });
        let log = Rc::new(RefCell::new(Vec::new()));

        let sink = log.clone();
        let dep = doubled.clone();
        let _watch = watch(
            move || dep.get(),
            move |new, _| sink.borrow_mut().push(*new),
        );

        batch(|| {
            source.set(2);
            source.set(5);
        });

        assert_eq!(*log.borrow(), vec![10], "one firing with the final value");
    }

    #[test]
    fn cleanups_run_before_next_fire_and_on_dispose() {
        let source = cell(0);
        let cleaned = Rc::new(StdCell::new(0));

        let counter = cleaned.clone();
        let dep = source.clone();
        let handle = watch(
            move || dep.get(),
            move |_, _| {
                let counter = counter.clone();
                on_cleanup(move || counter.set(counter.get() + 1));
            },
        );

        source.set(1);
        assert_eq!(cleaned.get(), 0, "first firing registered the cleanup");

        source.set(2);
        assert_eq!(cleaned.get(), 1);

        handle.dispose();
        assert_eq!(cleaned.get(), 2);
    }

    #[test]
    fn dispose_stops_reevaluation() {
        let source = cell(0);
        let evaluations = Rc::new(StdCell::new(0));

        let counter = evaluations.clone();
        let dep = source.clone();
        let handle = watch(
            move || {
                counter.set(counter.get() + 1);
                dep.get()
            },
            move |_, _| {},
        );
        assert_eq!(evaluations.get(), 1);

        handle.dispose();
        handle.dispose();

        source.set(1);
        assert_eq!(evaluations.get(), 1);
        assert!(handle.is_disposed());
    }

    #[test]
    fn getter_nodes_are_not_adopted_by_the_surrounding_scope() {
        use crate::primitives::derived::Derived;
        use crate::primitives::scope::Scope;

        let source = cell(1);
        let escaped: Rc<RefCell<Option<Derived<i32>>>> = Rc::new(RefCell::new(None));

        let scope = Scope::new({
            let source = source.clone();
            let escaped = escaped.clone();
            move || {
                let _watch = watch(
                    {
                        let source = source.clone();
                        let escaped = escaped.clone();
                        move || {
                            if escaped.borrow().is_none() {
                                let source = source.clone();
                                *escaped.borrow_mut() = Some(derived(move || source.get() + 1));
                            }
                            source.get()
                        }
                    },
                    move |_, _| {},
                );
            }
        });

        let free_derived = escaped.borrow().clone().expect("created in getter");
        scope.dispose();

        // The derived made inside the getter survived the scope.
        assert_eq!(free_derived.get(), 2);
    }

    #[test]
    fn last_exposes_the_baseline() {
        let source = cell(5);
        let dep = source.clone();
        let handle = watch(move || dep.get(), |_, _| {});

        assert_eq!(handle.last(), Some(5));
        source.set(9);
        assert_eq!(handle.last(), Some(9));
    }
}
