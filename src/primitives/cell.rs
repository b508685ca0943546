// ============================================================================
// weft - Cell
// The leaf settable value holder
// ============================================================================

use std::any::Any;
use std::cell::{Cell as RawCell, RefCell};
use std::rc::{Rc, Weak};

use crate::core::constants::*;
use crate::core::context::{emit_probe, with_context};
use crate::core::error::ReactiveError;
use crate::core::node::{default_equals, EqualsFn, NodeLinks, OpKind, ReactiveNode};
use crate::reactivity::propagate::propagate;
use crate::reactivity::tracking::track_read;

// =============================================================================
// CELL INNER
// =============================================================================

/// Node record behind [`Cell`]. Separate from the handle so it can live in
/// the graph as an `Rc<dyn ReactiveNode>`.
pub struct CellInner<T> {
    flags: RawCell<u32>,

    /// `None` until the first write of a lazily-constructed cell.
    value: RefCell<Option<T>>,

    /// Consulted by `set_checked`; plain `set` treats every write as a
    /// change.
    equals: EqualsFn<T>,

    links: NodeLinks,
    self_ref: RefCell<Weak<CellInner<T>>>,
}

impl<T: 'static> CellInner<T> {
    fn create(value: Option<T>, equals: EqualsFn<T>) -> Rc<Self> {
        let inner = Rc::new(Self {
            flags: RawCell::new(PRODUCER | CELL),
            value: RefCell::new(value),
            equals,
            links: NodeLinks::new(),
            self_ref: RefCell::new(Weak::new()),
        });
        *inner.self_ref.borrow_mut() = Rc::downgrade(&inner);

        crate::primitives::scope::adopt_node(inner.clone() as Rc<dyn ReactiveNode>);
        emit_probe(OpKind::Create, &*inner);
        inner
    }
}

impl<T: 'static> ReactiveNode for CellInner<T> {
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
            .expect("cell self reference")
    }

    // `update_node` and `notify_node` keep their defaults: a cell has no
    // function to re-run, so resolution always counts as a change and a
    // soft notify is a no-op.
}

// =============================================================================
// CELL HANDLE
// =============================================================================

/// A leaf, settable reactive value holder.
///
/// Reading a cell inside a derived computation, effect or watch registers
/// the cell as a dependency of that consumer; writing it marks every
/// dependent stale and re-runs the affected subscribers.
///
/// # Example
///
/// ```
/// use weft::cell;
///
/// let count = cell(0);
/// assert_eq!(count.get(), 0);
///
/// count.set(5);
/// assert_eq!(count.get(), 5);
/// ```
pub struct Cell<T> {
    inner: Rc<CellInner<T>>,
}

impl<T: 'static> Cell<T> {
    /// Create a cell holding `value`.
    pub fn new(value: T) -> Self
    where
        T: PartialEq,
    {
        Self {
            inner: CellInner::create(Some(value), default_equals),
        }
    }

    /// Create a cell with a custom equality predicate (consulted by
    /// [`Cell::set_checked`]).
    pub fn with_equals(value: T, equals: EqualsFn<T>) -> Self {
        Self {
            inner: CellInner::create(Some(value), equals),
        }
    }

    /// Create a cell with no value yet. Reads fail with
    /// [`ReactiveError::Unset`] until the first write.
    pub fn uninit() -> Self
    where
        T: PartialEq,
    {
        Self {
            inner: CellInner::create(None, default_equals),
        }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Read the value, registering a dependency when a consumer is
    /// running.
    ///
    /// Panics on a disposed or never-written cell; use [`Cell::try_get`]
    /// for the fallible form.
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.try_get().unwrap_or_else(|err| panic!("Cell::get: {err}"))
    }

    /// Fallible tracked read.
    pub fn try_get(&self) -> Result<T, ReactiveError>
    where
        T: Clone,
    {
        if self.inner.is_disposed() {
            return Err(ReactiveError::Disposed);
        }
        track_read(&self.inner.as_node());
        emit_probe(OpKind::Get, &*self.inner);
        self.inner.value.borrow().clone().ok_or(ReactiveError::Unset)
    }

    /// Tracked read through a closure, avoiding a clone.
    ///
    /// # Example
    ///
    /// ```
    /// use weft::cell;
    ///
    /// let items = cell(vec![1, 2, 3]);
    /// assert_eq!(items.with(|v| v.iter().sum::<i32>()), 6);
    /// ```
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        if self.inner.is_disposed() {
            panic!("Cell::with: {}", ReactiveError::Disposed);
        }
        track_read(&self.inner.as_node());
        emit_probe(OpKind::Get, &*self.inner);
        match self.inner.value.borrow().as_ref() {
            Some(value) => f(value),
            None => panic!("Cell::with: {}", ReactiveError::Unset),
        }
    }

    /// Read the value without registering a dependency.
    pub fn peek(&self) -> T
    where
        T: Clone,
    {
        self.try_peek()
            .unwrap_or_else(|err| panic!("Cell::peek: {err}"))
    }

    /// Fallible untracked read.
    pub fn try_peek(&self) -> Result<T, ReactiveError>
    where
        T: Clone,
    {
        if self.inner.is_disposed() {
            return Err(ReactiveError::Disposed);
        }
        self.inner.value.borrow().clone().ok_or(ReactiveError::Unset)
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Store `value` and propagate. Every write counts as a change,
    /// regardless of equality; comparison semantics belong to the caller
    /// (see [`Cell::set_checked`]).
    pub fn set(&self, value: T) {
        self.try_set(value)
            .unwrap_or_else(|err| panic!("Cell::set: {err}"));
    }

    /// Fallible write.
    pub fn try_set(&self, value: T) -> Result<(), ReactiveError> {
        if self.inner.is_disposed() {
            return Err(ReactiveError::Disposed);
        }
        forbid_write_inside_derived();
        *self.inner.value.borrow_mut() = Some(value);
        emit_probe(OpKind::Set, &*self.inner);
        propagate(&self.inner.as_node());
        Ok(())
    }

    /// Store `value` only if the cell's equality predicate reports a
    /// difference; returns whether a write (and propagation) happened.
    pub fn set_checked(&self, value: T) -> bool {
        if self.inner.is_disposed() {
            panic!("Cell::set_checked: {}", ReactiveError::Disposed);
        }
        let changed = match self.inner.value.borrow().as_ref() {
            Some(current) => !(self.inner.equals)(current, &value),
            None => true,
        };
        if changed {
            forbid_write_inside_derived();
            *self.inner.value.borrow_mut() = Some(value);
            emit_probe(OpKind::Set, &*self.inner);
            propagate(&self.inner.as_node());
        }
        changed
    }

    /// Mutate the value in place, then propagate unconditionally.
    ///
    /// # Example
    ///
    /// ```
    /// use weft::cell;
    ///
    /// let count = cell(0);
    /// count.update(|n| *n += 1);
    /// assert_eq!(count.get(), 1);
    /// ```
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        if self.inner.is_disposed() {
            panic!("Cell::update: {}", ReactiveError::Disposed);
        }
        forbid_write_inside_derived();
        match self.inner.value.borrow_mut().as_mut() {
            Some(value) => f(value),
            None => panic!("Cell::update: {}", ReactiveError::Unset),
        }
        emit_probe(OpKind::Set, &*self.inner);
        propagate(&self.inner.as_node());
    }

    // =========================================================================
    // Notification & lifecycle
    // =========================================================================

    /// Re-propagate without changing the value. `force = true` marks every
    /// dependent stale; `force = false` is a no-op for a cell, whose value
    /// trivially "changed" whenever it was set.
    pub fn notify(&self, force: bool) {
        if self.inner.is_disposed() {
            panic!("Cell::notify: {}", ReactiveError::Disposed);
        }
        emit_probe(OpKind::Notify, &*self.inner);
        self.inner.notify_node(force);
    }

    /// Unlink from every subscriber and reject all further operations.
    /// Idempotent.
    pub fn dispose(&self) {
        self.inner.dispose_node();
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }

    /// Type-erased graph handle, for custom node plumbing.
    pub fn as_node(&self) -> Rc<dyn ReactiveNode> {
        self.inner.as_node()
    }
}

impl<T> Clone for Cell<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: std::fmt::Debug + Clone + 'static> std::fmt::Debug for Cell<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cell")
            .field("value", &self.try_peek().ok())
            .finish()
    }
}

/// Writes from inside a derived's recompute would re-enter propagation
/// mid-resolution; computations must stay pure.
fn forbid_write_inside_derived() {
    with_context(|ctx| {
        if let Some(consumer) = ctx.get_active_consumer().and_then(|weak| weak.upgrade()) {
            let flags = consumer.flags();
            if flags & DERIVED != 0 && flags & RUNNING != 0 {
                panic!("cells cannot be written from inside a derived computation");
            }
        }
    });
}

// =============================================================================
// CONSTRUCTORS
// =============================================================================

/// Create a reactive cell.
///
/// # Example
///
/// ```
/// use weft::cell;
///
/// let name = cell(String::from("hello"));
/// name.set(String::from("world"));
/// assert_eq!(name.get(), "world");
/// ```
pub fn cell<T>(value: T) -> Cell<T>
where
    T: PartialEq + 'static,
{
    Cell::new(value)
}

/// Create a cell with a custom equality predicate.
pub fn cell_with_equals<T>(value: T, equals: EqualsFn<T>) -> Cell<T>
where
    T: 'static,
{
    Cell::with_equals(value, equals)
}

// =============================================================================
// TESTS
// =============================================================================
