// ============================================================================
// weft - Derived Computations
// Cached, lazily recomputed values
// ============================================================================
//
// A derived is both a producer (it can be read and has subscribers) and a
// consumer (it reads producers and owns a dependency list). A write
// upstream only marks it stale; the recompute function runs on the next
// read, and staleness propagates further only when the recomputed value
// actually differs - this short-circuit is what keeps diamond graphs
// glitch-free.
// ============================================================================

use std::any::Any;
use std::cell::{Cell as RawCell, RefCell};
use std::rc::{Rc, Weak};

use crate::core::constants::*;
use crate::core::context::{emit_probe, with_context};
use crate::core::error::ReactiveError;
use crate::core::node::{default_equals, EqualsFn, NodeLinks, OpKind, ReactiveNode};
use crate::reactivity::propagate::{confirm_stale, propagate};
use crate::reactivity::tracking::{begin_tracking, teardown, track_read};

/// Recompute function. The previous cached value is always offered;
/// plain constructors wrap closures that ignore it.
type ComputeFn<T> = Box<dyn Fn(Option<&T>) -> T>;

// =============================================================================
// DERIVED INNER
// =============================================================================

/// Node record behind [`Derived`].
pub struct DerivedInner<T> {
    flags: RawCell<u32>,
    func: RefCell<Option<ComputeFn<T>>>,

    /// Last resolved value; `None` until the first recompute.
    value: RefCell<Option<T>>,

    equals: EqualsFn<T>,
    links: NodeLinks,
    self_ref: RefCell<Weak<DerivedInner<T>>>,
}

impl<T: Clone + 'static> DerivedInner<T> {
    fn create(func: ComputeFn<T>, equals: EqualsFn<T>) -> Rc<Self> {
        let inner = Rc::new(Self {
            // Born dirty: the first read performs the first computation.
            flags: RawCell::new(PRODUCER | CONSUMER | DERIVED | DIRTY),
            func: RefCell::new(Some(func)),
            value: RefCell::new(None),
            equals,
            links: NodeLinks::new(),
            self_ref: RefCell::new(Weak::new()),
        });
        *inner.self_ref.borrow_mut() = Rc::downgrade(&inner);

        crate::primitives::scope::adopt_node(inner.clone() as Rc<dyn ReactiveNode>);
        emit_probe(OpKind::Create, &*inner);
        inner
    }

    /// Resolve staleness. PENDING is confirmed against the dependency list
    /// first; a confirmed (or directly DIRTY) node recomputes. Returns
    /// whether the cached value changed.
    fn resolve(this: &Rc<Self>) -> bool {
        let flags = this.flags.get();
        if flags & (DISPOSED | RUNNING) != 0 {
            // RUNNING: a cyclic read re-entered this node mid-recompute;
            // the cycle guard answers with the current cache instead of
            // recursing forever.
            return false;
        }
        if flags & STALE_MASK == 0 {
            return false;
        }
        if flags & DIRTY == 0 && !confirm_stale(&this.as_node()) {
            return false;
        }
        Self::recompute(this)
    }

    /// Re-invoke the function inside a tracking window, compare old and
    /// new, and propagate to subscribers only on a real change.
    fn recompute(this: &Rc<Self>) -> bool {
        let node = this.as_node();
        let previous = this.value.borrow().clone();

        let window = begin_tracking(&node);
        let new_value = {
            let func = this.func.borrow();
            let func = func.as_ref().expect("derived function present until disposal");
            func(previous.as_ref())
        };
        window.finish();

        let changed = match &previous {
            Some(prev) => !(this.equals)(prev, &new_value),
            None => true,
        };

        *this.value.borrow_mut() = Some(new_value);
        this.set_status(0);

        if changed {
            propagate(&node);
        }
        changed
    }
}

impl<T: Clone + 'static> ReactiveNode for DerivedInner<T> {
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
            .expect("derived self reference")
    }

    fn update_node(&self) -> bool {
        match self.self_ref.borrow().upgrade() {
            Some(inner) => Self::resolve(&inner),
            None => false,
        }
    }

    fn notify_node(&self, force: bool) {
        let Some(inner) = self.self_ref.borrow().upgrade() else {
            return;
        };
        if force {
            propagate(&inner.as_node());
        } else {
            // Soft notify: resolve pendingness; `resolve` propagates on
            // its own when the recompute produced a different value.
            Self::resolve(&inner);
        }
    }

    fn caches_value(&self) -> bool {
        true
    }

    fn cached_value_any(&self) -> Option<Box<dyn Any>> {
        self.value
            .borrow()
            .as_ref()
            .map(|value| Box::new(value.clone()) as Box<dyn Any>)
    }

    fn dispose_node(&self) {
        let Some(inner) = self.self_ref.borrow().upgrade() else {
            return;
        };
        if teardown(&inner.as_node()) {
            *inner.func.borrow_mut() = None;
        }
    }
}

// =============================================================================
// DERIVED HANDLE
// =============================================================================

/// A cached, lazily recomputed reactive value.
///
/// # Example
///
/// ```
/// use weft::{cell, derived};
///
/// let count = cell(1);
/// let doubled = derived({
///     let count = count.clone();
///     move || count.get() * 2
/// });
///
/// assert_eq!(doubled.get(), 2);
/// count.set(5);
/// assert_eq!(doubled.get(), 10);
/// ```
pub struct Derived<T> {
    inner: Rc<DerivedInner<T>>,
}

impl<T: Clone + 'static> Derived<T> {
    /// Create a derived computation.
    pub fn new<F>(func: F) -> Self
    where
        T: PartialEq,
        F: Fn() -> T + 'static,
    {
        Self {
            inner: DerivedInner::create(Box::new(move |_| func()), default_equals),
        }
    }

    /// Create a derived computation with a custom equality predicate.
    pub fn with_equals<F>(func: F, equals: EqualsFn<T>) -> Self
    where
        F: Fn() -> T + 'static,
    {
        Self {
            inner: DerivedInner::create(Box::new(move |_| func()), equals),
        }
    }

    /// Create a derived computation whose function receives the previous
    /// cached value (`None` on the first run).
    pub fn with_previous<F>(func: F) -> Self
    where
        T: PartialEq,
        F: Fn(Option<&T>) -> T + 'static,
    {
        Self {
            inner: DerivedInner::create(Box::new(func), default_equals),
        }
    }

    /// Read the value, recomputing first if a dependency changed.
    /// Registers this derived as a dependency of the running consumer.
    pub fn get(&self) -> T {
        self.try_get()
            .unwrap_or_else(|err| panic!("Derived::get: {err}"))
    }

    /// Fallible tracked read.
    pub fn try_get(&self) -> Result<T, ReactiveError> {
        if self.inner.is_disposed() {
            return Err(ReactiveError::Disposed);
        }
        DerivedInner::resolve(&self.inner);
        track_read(&self.inner.as_node());
        emit_probe(OpKind::Get, &*self.inner);
        self.inner.value.borrow().clone().ok_or(ReactiveError::Unset)
    }

    /// Resolve staleness and read the value without creating a link.
    pub fn peek(&self) -> T {
        self.try_peek()
            .unwrap_or_else(|err| panic!("Derived::peek: {err}"))
    }

    /// Fallible untracked read (still resolves staleness).
    pub fn try_peek(&self) -> Result<T, ReactiveError> {
        if self.inner.is_disposed() {
            return Err(ReactiveError::Disposed);
        }
        DerivedInner::resolve(&self.inner);
        self.inner.value.borrow().clone().ok_or(ReactiveError::Unset)
    }

    /// Read the last resolved cache without ever invoking the function,
    /// even while stale. `None` before the first resolution.
    pub fn peek_cached(&self) -> Option<T> {
        if self.inner.is_disposed() {
            panic!("Derived::peek_cached: {}", ReactiveError::Disposed);
        }
        self.inner.value.borrow().clone()
    }

    /// `force = true`: propagate to subscribers unconditionally, even with
    /// an unchanged cache. `force = false`: resolve pendingness and
    /// propagate only if the recompute produced a different value.
    pub fn notify(&self, force: bool) {
        if self.inner.is_disposed() {
            panic!("Derived::notify: {}", ReactiveError::Disposed);
        }
        emit_probe(OpKind::Notify, &*self.inner);
        self.inner.notify_node(force);
    }

    /// Unlink from dependencies and subscribers and reject all further
    /// operations. Idempotent.
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

impl<T> Clone for Derived<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: std::fmt::Debug + Clone + 'static> std::fmt::Debug for Derived<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Derived")
            .field("cached", &self.inner.value.borrow())
            .finish()
    }
}

// =============================================================================
// WRITABLE DERIVED
// =============================================================================

/// A derived computation with a write path.
///
/// Assignment invokes the setter, which is expected to mutate upstream
/// cells; the new value then flows back through normal propagation. The
/// setter never forces a recompute by itself.
///
/// # Example
///
/// ```
/// use weft::{cell, derived_writable};
///
/// let celsius = cell(0.0_f64);
/// let fahrenheit = derived_writable(
///     {
///         let celsius = celsius.clone();
///         move || celsius.get() * 9.0 / 5.0 + 32.0
///     },
///     {
///         let celsius = celsius.clone();
///         move |f: f64| celsius.set((f - 32.0) * 5.0 / 9.0)
///     },
/// );
///
/// assert_eq!(fahrenheit.get(), 32.0);
/// fahrenheit.set(212.0);
/// assert_eq!(celsius.get(), 100.0);
/// ```
pub struct WritableDerived<T> {
    derived: Derived<T>,
    setter: Rc<dyn Fn(T)>,
}

impl<T: Clone + 'static> WritableDerived<T> {
    pub fn get(&self) -> T {
        self.derived.get()
    }

    pub fn try_get(&self) -> Result<T, ReactiveError> {
        self.derived.try_get()
    }

    pub fn peek(&self) -> T {
        self.derived.peek()
    }

    pub fn peek_cached(&self) -> Option<T> {
        self.derived.peek_cached()
    }

    /// Invoke the setter with `value`.
    pub fn set(&self, value: T) {
        if self.derived.is_disposed() {
            panic!("WritableDerived::set: {}", ReactiveError::Disposed);
        }
        emit_probe(OpKind::Set, &*self.derived.inner);
        (self.setter)(value);
    }

    pub fn notify(&self, force: bool) {
        self.derived.notify(force);
    }

    pub fn dispose(&self) {
        self.derived.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.derived.is_disposed()
    }

    /// The read-only view of this computation.
    pub fn as_readonly(&self) -> Derived<T> {
        self.derived.clone()
    }
}

impl<T> Clone for WritableDerived<T> {
    fn clone(&self) -> Self {
        Self {
            derived: self.derived.clone(),
            setter: self.setter.clone(),
        }
    }
}

// =============================================================================
// PREVIOUS VALUE ACCESSOR
// =============================================================================

/// Retrieve the previous cached value of the computation currently
/// recomputing.
///
/// `Ok(None)` on the first run. Fails with
/// [`ReactiveError::NoActiveComputation`] when no caching computation is
/// on the stack, and [`ReactiveError::PreviousValueType`] when `T` does
/// not match the computation's value type.
///
/// # Example
///
/// ```
/// use weft::{cell, derived, previous_value};
///
/// let input = cell(1);
/// let running_max = derived({
///     let input = input.clone();
///     move || {
///         let prev = previous_value::<i32>().unwrap().unwrap_or(i32::MIN);
///         prev.max(input.get())
///     }
/// });
///
/// assert_eq!(running_max.get(), 1);
/// input.set(5);
/// assert_eq!(running_max.get(), 5);
/// input.set(3);
/// assert_eq!(running_max.get(), 5);
/// ```
pub fn previous_value<T: Clone + 'static>() -> Result<Option<T>, ReactiveError> {
    let node = with_context(|ctx| {
        ctx.get_active_consumer()
            .and_then(|weak| weak.upgrade())
            .ok_or(ReactiveError::NoActiveComputation)
    })?;

    if node.flags() & RUNNING == 0 || !node.caches_value() {
        return Err(ReactiveError::NoActiveComputation);
    }

    match node.cached_value_any() {
        None => Ok(None),
        Some(any) => any
            .downcast::<T>()
            .map(|value| Some(*value))
            .map_err(|_| ReactiveError::PreviousValueType),
    }
}

// =============================================================================
// CONSTRUCTORS
// =============================================================================

/// Create a derived computation.
pub fn derived<T, F>(func: F) -> Derived<T>
where
    T: Clone + PartialEq + 'static,
    F: Fn() -> T + 'static,
{
    Derived::new(func)
}

/// Create a derived computation with a custom equality predicate.
pub fn derived_with_equals<T, F>(func: F, equals: EqualsFn<T>) -> Derived<T>
where
    T: Clone + 'static,
    F: Fn() -> T + 'static,
{
    Derived::with_equals(func, equals)
}

/// Create a derived computation whose function receives the previous
/// cached value.
pub fn derived_with_previous<T, F>(func: F) -> Derived<T>
where
    T: Clone + PartialEq + 'static,
    F: Fn(Option<&T>) -> T + 'static,
{
    Derived::with_previous(func)
}

/// Create a writable derived computation from a getter and a setter.
pub fn derived_writable<T, G, S>(getter: G, setter: S) -> WritableDerived<T>
where
    T: Clone + PartialEq + 'static,
    G: Fn() -> T + 'static,
    S: Fn(T) + 'static,
{
    WritableDerived {
        derived: Derived::new(getter),
        setter: Rc::new(setter),
    }
}

// =============================================================================
// TESTS
// =============================================================================
