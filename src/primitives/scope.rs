// ============================================================================
// weft - Scopes
// Ownership grouping with cascading disposal
// ============================================================================
//
// While a scope is current, every node (and nested scope) constructed
// registers itself as a child. Disposing the scope disposes the children
// in creation order - nested scopes cascade first, since a nested scope is
// itself a child - then runs the scope's own cleanups.
// ============================================================================

use std::cell::{Cell as RawCell, RefCell};
use std::rc::Rc;

use crate::core::context::CleanupFn;
use crate::core::node::ReactiveNode;

// =============================================================================
// THREAD-LOCAL SCOPE STACK
// =============================================================================

thread_local! {
    /// Currently active scope, if any.
    static ACTIVE_SCOPE: RefCell<Option<Rc<ScopeInner>>> = const { RefCell::new(None) };
}

fn get_active_scope() -> Option<Rc<ScopeInner>> {
    ACTIVE_SCOPE.with(|scope| scope.borrow().clone())
}

fn set_active_scope(scope: Option<Rc<ScopeInner>>) -> Option<Rc<ScopeInner>> {
    ACTIVE_SCOPE.with(|slot| slot.replace(scope))
}

/// Restores the previously active scope on drop.
struct ScopeEntry {
    prev: Option<Rc<ScopeInner>>,
}

impl ScopeEntry {
    fn enter(scope: Rc<ScopeInner>) -> Self {
        Self {
            prev: set_active_scope(Some(scope)),
        }
    }
}

impl Drop for ScopeEntry {
    fn drop(&mut self) {
        set_active_scope(self.prev.take());
    }
}

/// Hand a freshly constructed node to the active scope, if one is current.
pub(crate) fn adopt_node(node: Rc<dyn ReactiveNode>) {
    if let Some(scope) = get_active_scope() {
        scope.children.borrow_mut().push(Owned::Node(node));
    }
}

/// Run `f` with no scope current, so nodes it creates are not adopted.
pub(crate) fn with_scope_suspended<R>(f: impl FnOnce() -> R) -> R {
    let _entry = ScopeEntry {
        prev: set_active_scope(None),
    };
    f()
}

// =============================================================================
// SCOPE INNER
// =============================================================================

/// A child owned by a scope, in creation order.
enum Owned {
    Node(Rc<dyn ReactiveNode>),
    Scope(Rc<ScopeInner>),
}

pub struct ScopeInner {
    disposed: RawCell<bool>,
    children: RefCell<Vec<Owned>>,
    cleanups: RefCell<Vec<CleanupFn>>,
}

impl ScopeInner {
    fn create() -> Rc<Self> {
        let inner = Rc::new(Self {
            disposed: RawCell::new(false),
            children: RefCell::new(Vec::new()),
            cleanups: RefCell::new(Vec::new()),
        });

        // A scope created inside another scope is that scope's child.
        if let Some(parent) = get_active_scope() {
            parent.children.borrow_mut().push(Owned::Scope(inner.clone()));
        }
        inner
    }

    fn dispose(&self) {
        if self.disposed.replace(true) {
            return;
        }
        tracing::trace!("scope disposed");

        let children: Vec<Owned> = self.children.borrow_mut().drain(..).collect();
        for child in children {
            match child {
                Owned::Node(node) => node.dispose_node(),
                Owned::Scope(scope) => scope.dispose(),
            }
        }

        let cleanups: Vec<CleanupFn> = self.cleanups.borrow_mut().drain(..).collect();
        for cleanup in cleanups {
            cleanup();
        }
    }
}

impl Drop for ScopeInner {
    fn drop(&mut self) {
        // Fallback for a scope record dropped without an explicit dispose
        // (e.g. a panicking setup): children and cleanups still wind down.
        if !self.disposed.get() {
            self.dispose();
        }
    }
}

// =============================================================================
// SCOPE HANDLE
// =============================================================================

/// An ownership grouping for reactive nodes, disposed as a unit.
///
/// # Example
///
/// ```
/// use weft::{cell, effect, Scope};
/// use std::cell::Cell as StdCell;
/// use std::rc::Rc;
///
/// let count = cell(0);
/// let runs = Rc::new(StdCell::new(0));
///
/// let scope = Scope::new({
///     let count = count.clone();
///     let runs = runs.clone();
///     move || {
///         let _effect = effect(move || {
///             let _ = count.get();
///             runs.set(runs.get() + 1);
///         });
///     }
/// });
///
/// count.set(1);
/// assert_eq!(runs.get(), 2);
///
/// scope.dispose();
/// count.set(2);
/// assert_eq!(runs.get(), 2);
/// ```
pub struct Scope {
    inner: Rc<ScopeInner>,
}

impl Scope {
    /// Create a scope and run `setup` with it current; everything
    /// constructed during `setup` becomes a child.
    pub fn new(setup: impl FnOnce()) -> Self {
        let inner = ScopeInner::create();
        {
            let _entry = ScopeEntry::enter(inner.clone());
            setup();
        }
        Self { inner }
    }

    /// Re-enter the scope for incremental population. Returns `None` once
    /// the scope is disposed.
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        if self.inner.disposed.get() {
            return None;
        }
        let _entry = ScopeEntry::enter(self.inner.clone());
        Some(f())
    }

    /// Dispose every owned child (depth-first, in creation order), then
    /// run the scope's cleanups. Idempotent.
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.get()
    }
}

impl Clone for Scope {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        // Last handle standing disposes; a nested scope is also held by
        // its parent and survives handle drops.
        if Rc::strong_count(&self.inner) == 1 {
            self.inner.dispose();
        }
    }
}

// =============================================================================
// FREE FUNCTIONS
// =============================================================================

/// The currently active scope, if any.
pub fn current_scope() -> Option<Scope> {
    get_active_scope().map(|inner| Scope { inner })
}

/// Register a cleanup on the currently active scope, run when the scope is
/// disposed (in registration order). A no-op (logged at debug level)
/// outside any scope.
pub fn on_scope_dispose(f: impl FnOnce() + 'static) {
    match get_active_scope() {
        Some(scope) => scope.cleanups.borrow_mut().push(Box::new(f)),
        None => tracing::debug!("on_scope_dispose called outside a scope"),
    }
}

// =============================================================================
// TESTS
// =============================================================================
