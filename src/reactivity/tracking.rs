// ============================================================================
// weft - Dependency Tracking
// Edge establishment during consumer runs, and edge removal everywhere else
// ============================================================================
//
// The borrow discipline matters here: the arena RefCell is only ever held
// across pure pointer surgery, never across user code, and traversals
// snapshot the nodes they visit before mutating anything (collect, then
// mutate).
// ============================================================================

use smallvec::SmallVec;
use std::rc::Rc;

use crate::core::constants::*;
use crate::core::context::{emit_probe, with_context, RuntimeContext};
use crate::core::node::{LinkId, OpKind, ReactiveNode};
use crate::reactivity::links::Link;

// =============================================================================
// TRACK READ
// =============================================================================

/// Register a read of `producer` against the currently running consumer.
///
/// Called from every producer's read path; custom node types call it from
/// theirs. Does nothing outside a consumer run or inside `untracked`.
pub fn track_read(producer: &Rc<dyn ReactiveNode>) {
    with_context(|ctx| {
        if ctx.is_untracking() {
            return;
        }
        let Some(weak) = ctx.get_active_consumer() else {
            return;
        };
        let Some(consumer) = weak.upgrade() else {
            return;
        };
        if consumer.is_disposed() {
            return;
        }
        let pass = ctx.active_run_pass.get();
        if pass == 0 {
            return;
        }
        establish(ctx, producer, &consumer, pass);
    });
}

/// Create or reuse the edge producer -> consumer, stamped with `pass`.
///
/// The producer-side pass stamp deduplicates repeated reads of the same
/// producer within one run; an edge surviving from a previous run is
/// restamped in place rather than reallocated.
fn establish(
    ctx: &RuntimeContext,
    producer: &Rc<dyn ReactiveNode>,
    consumer: &Rc<dyn ReactiveNode>,
    pass: u64,
) {
    if producer.links().linked_pass.get() == pass {
        return;
    }
    producer.links().linked_pass.set(pass);

    let producer_id = producer.links().id();
    let existing = {
        let arena = ctx.links.borrow();
        let mut cursor = consumer.links().deps_head.get();
        let mut found = None;
        while let Some(id) = cursor {
            let Some(link) = arena.get(id) else { break };
            if link.producer.links().id() == producer_id {
                found = Some(id);
                break;
            }
            cursor = link.next_dep;
        }
        found
    };

    if let Some(id) = existing {
        if let Some(link) = ctx.links.borrow_mut().get_mut(id) {
            link.stamp = pass;
        }
        return;
    }

    // Fresh edge: append to the tail of both intrusive lists so dependency
    // order matches read order.
    let prev_dep = consumer.links().deps_tail.get();
    let prev_sub = producer.links().subs_tail.get();

    let id = {
        let mut arena = ctx.links.borrow_mut();
        let id = arena.insert(Link {
            producer: producer.clone(),
            consumer: Rc::downgrade(consumer),
            stamp: pass,
            prev_dep,
            next_dep: None,
            prev_sub,
            next_sub: None,
        });
        if let Some(prev) = prev_dep {
            if let Some(link) = arena.get_mut(prev) {
                link.next_dep = Some(id);
            }
        }
        if let Some(prev) = prev_sub {
            if let Some(link) = arena.get_mut(prev) {
                link.next_sub = Some(id);
            }
        }
        id
    };

    let consumer_links = consumer.links();
    if consumer_links.deps_head.get().is_none() {
        consumer_links.deps_head.set(Some(id));
    }
    consumer_links.deps_tail.set(Some(id));

    let producer_links = producer.links();
    if producer_links.subs_head.get().is_none() {
        producer_links.subs_head.set(Some(id));
    }
    producer_links.subs_tail.set(Some(id));

    emit_probe(OpKind::Link, &**producer);
}

// =============================================================================
// UNLINK
// =============================================================================

/// Remove one edge from both intrusive lists and free its slot.
pub(crate) fn unlink(ctx: &RuntimeContext, id: LinkId) {
    let Some(link) = ctx.links.borrow_mut().remove(id) else {
        return;
    };

    {
        let mut arena = ctx.links.borrow_mut();
        if let Some(prev) = link.prev_dep {
            if let Some(l) = arena.get_mut(prev) {
                l.next_dep = link.next_dep;
            }
        }
        if let Some(next) = link.next_dep {
            if let Some(l) = arena.get_mut(next) {
                l.prev_dep = link.prev_dep;
            }
        }
        if let Some(prev) = link.prev_sub {
            if let Some(l) = arena.get_mut(prev) {
                l.next_sub = link.next_sub;
            }
        }
        if let Some(next) = link.next_sub {
            if let Some(l) = arena.get_mut(next) {
                l.prev_sub = link.prev_sub;
            }
        }
    }

    // A consumer dropped without disposal leaves its head/tail cells
    // unreachable; only fix them while the node is still alive.
    if let Some(consumer) = link.consumer.upgrade() {
        let links = consumer.links();
        if links.deps_head.get() == Some(id) {
            links.deps_head.set(link.next_dep);
        }
        if links.deps_tail.get() == Some(id) {
            links.deps_tail.set(link.prev_dep);
        }
    }

    let links = link.producer.links();
    if links.subs_head.get() == Some(id) {
        links.subs_head.set(link.next_sub);
    }
    if links.subs_tail.get() == Some(id) {
        links.subs_tail.set(link.prev_sub);
    }

    emit_probe(OpKind::Unlink, &*link.producer);
}

// =============================================================================
// TRAVERSAL SNAPSHOTS
// =============================================================================

/// Snapshot the live consumers subscribed to `producer`, in subscription
/// order. Edges whose consumer has been dropped without disposal are
/// unlinked on the way past.
pub(crate) fn collect_subscribers(producer: &Rc<dyn ReactiveNode>) -> Vec<Rc<dyn ReactiveNode>> {
    with_context(|ctx| {
        let mut live = Vec::new();
        let mut dead: SmallVec<[LinkId; 4]> = SmallVec::new();
        {
            let arena = ctx.links.borrow();
            let mut cursor = producer.links().subs_head.get();
            while let Some(id) = cursor {
                let Some(link) = arena.get(id) else { break };
                match link.consumer.upgrade() {
                    Some(consumer) => live.push(consumer),
                    None => dead.push(id),
                }
                cursor = link.next_sub;
            }
        }
        for id in dead {
            unlink(ctx, id);
        }
        live
    })
}

/// Snapshot the producers `consumer` currently depends on, in read order.
pub(crate) fn collect_dependencies(consumer: &Rc<dyn ReactiveNode>) -> Vec<Rc<dyn ReactiveNode>> {
    with_context(|ctx| {
        let arena = ctx.links.borrow();
        let mut producers = Vec::new();
        let mut cursor = consumer.links().deps_head.get();
        while let Some(id) = cursor {
            let Some(link) = arena.get(id) else { break };
            producers.push(link.producer.clone());
            cursor = link.next_dep;
        }
        producers
    })
}

fn collect_dep_ids(ctx: &RuntimeContext, node: &Rc<dyn ReactiveNode>) -> SmallVec<[LinkId; 8]> {
    let arena = ctx.links.borrow();
    let mut ids = SmallVec::new();
    let mut cursor = node.links().deps_head.get();
    while let Some(id) = cursor {
        let Some(link) = arena.get(id) else { break };
        ids.push(id);
        cursor = link.next_dep;
    }
    ids
}

fn collect_sub_ids(ctx: &RuntimeContext, node: &Rc<dyn ReactiveNode>) -> SmallVec<[LinkId; 8]> {
    let arena = ctx.links.borrow();
    let mut ids = SmallVec::new();
    let mut cursor = node.links().subs_head.get();
    while let Some(id) = cursor {
        let Some(link) = arena.get(id) else { break };
        ids.push(id);
        cursor = link.next_sub;
    }
    ids
}

// =============================================================================
// TRACKING WINDOWS
// =============================================================================

/// Open tracking window for one consumer run.
///
/// Restores the previous tracking state on drop, so a panicking body
/// cannot leave the runtime pointing at a dead consumer. The stale-edge
/// sweep only happens on an orderly `finish`.
pub(crate) struct TrackingWindow {
    consumer: std::rc::Weak<dyn ReactiveNode>,
    prev_consumer: Option<std::rc::Weak<dyn ReactiveNode>>,
    prev_pass: u64,
    pass: u64,
    open: bool,
}

/// Begin a consumer run: bump the run pass, install the consumer as the
/// active one and mark it running.
pub(crate) fn begin_tracking(consumer: &Rc<dyn ReactiveNode>) -> TrackingWindow {
    with_context(|ctx| {
        let pass = ctx.next_run_pass();
        let prev_pass = ctx.active_run_pass.replace(pass);
        let prev_consumer = ctx.set_active_consumer(Some(Rc::downgrade(consumer)));
        consumer.set_flags(consumer.flags() | RUNNING);
        TrackingWindow {
            consumer: Rc::downgrade(consumer),
            prev_consumer,
            prev_pass,
            pass,
            open: true,
        }
    })
}

impl TrackingWindow {
    fn restore(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        with_context(|ctx| {
            ctx.set_active_consumer(self.prev_consumer.take());
            ctx.active_run_pass.set(self.prev_pass);
        });
        if let Some(consumer) = self.consumer.upgrade() {
            consumer.set_flags(consumer.flags() & !RUNNING);
        }
    }

    /// Close the window and sweep dependency edges the run did not
    /// re-establish.
    pub fn finish(mut self) {
        let consumer = self.consumer.upgrade();
        let pass = self.pass;
        self.restore();
        if let Some(consumer) = consumer {
            sweep_stale_dependencies(&consumer, pass);
        }
    }
}

impl Drop for TrackingWindow {
    fn drop(&mut self) {
        self.restore();
    }
}

/// Unlink dependency edges whose stamp was not refreshed during `pass`.
fn sweep_stale_dependencies(consumer: &Rc<dyn ReactiveNode>, pass: u64) {
    with_context(|ctx| {
        let stale: SmallVec<[LinkId; 8]> = {
            let arena = ctx.links.borrow();
            let mut ids = SmallVec::new();
            let mut cursor = consumer.links().deps_head.get();
            while let Some(id) = cursor {
                let Some(link) = arena.get(id) else { break };
                if link.stamp != pass {
                    ids.push(id);
                }
                cursor = link.next_dep;
            }
            ids
        };
        for id in stale {
            unlink(ctx, id);
        }
    });
}

// =============================================================================
// DISPOSAL
// =============================================================================

/// Detach a node from the graph: drop every edge on both lists and mark it
/// disposed. Returns false if the node was already disposed.
pub(crate) fn teardown(node: &Rc<dyn ReactiveNode>) -> bool {
    if node.is_disposed() {
        return false;
    }

    with_context(|ctx| {
        for id in collect_dep_ids(ctx, node) {
            unlink(ctx, id);
        }
        for id in collect_sub_ids(ctx, node) {
            unlink(ctx, id);
        }
    });

    node.set_flags((node.flags() & !(STALE_MASK | QUEUED | RUNNING)) | DISPOSED);
    tracing::trace!(node = node.links().id(), "node disposed");
    emit_probe(OpKind::Dispose, &**node);
    true
}

// =============================================================================
// TESTS
// =============================================================================
