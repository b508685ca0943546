// ============================================================================
// weft - Propagation
// Marking downstream nodes stale after a producer changes, and confirming
// speculative staleness before a subscriber is allowed to run
// ============================================================================
//
// Two-level staleness:
//
//   DIRTY   - a direct dependency confirmed a change; must recompute/re-run.
//   PENDING - something upstream changed, but an intervening derived might
//             absorb it; confirmation happens lazily.
//
// `propagate` walks the subscriber lists marking direct consumers DIRTY and
// transitive consumers PENDING, without invoking any user function.
// `confirm_stale` later resolves a PENDING consumer by resolving its stale
// producers in dependency order; a producer whose value really changed
// propagates DIRTY back down, which is the confirmation signal.
//
// The walk is iterative (explicit stack) so deep chains cannot overflow,
// and the per-pass visited stamp keeps diamonds and cycles from being
// walked twice. A visited node reached again with a strictly stronger
// status takes the explicit revisit transition: upgrade in place, requeue
// if it is an unqueued subscriber, but do not re-walk its downstream
// (which is already marked).
// ============================================================================

use smallvec::{smallvec, SmallVec};
use std::rc::Rc;

use crate::core::constants::*;
use crate::core::context::with_context;
use crate::core::node::ReactiveNode;
use crate::reactivity::scheduling::{flush_if_idle, schedule};
use crate::reactivity::tracking::{collect_dependencies, collect_subscribers};

// =============================================================================
// PROPAGATE
// =============================================================================

/// Walk downstream from `origin`, marking consumers stale and queueing
/// subscribers. Direct consumers are marked DIRTY, everything further is
/// PENDING until confirmed. Flushes the subscriber queue afterwards when
/// the runtime is idle (no open batch, no flush in progress).
pub(crate) fn propagate(origin: &Rc<dyn ReactiveNode>) {
    let pass = with_context(|ctx| ctx.next_propagate_pass());
    tracing::trace!(origin = origin.links().id(), pass, "propagate");

    // A walk starting at a derived is a resolution confirming an earlier
    // speculative mark. A consumer that is mid-run is reading the fresh
    // value right now, so confirmation must not re-dirty it (a cell write
    // from inside a body, by contrast, is a genuinely new change and does).
    let from_resolution = origin.flags() & DERIVED != 0;

    let mut stack: SmallVec<[(Rc<dyn ReactiveNode>, u32); 8]> =
        smallvec![(origin.clone(), DIRTY)];

    while let Some((producer, status)) = stack.pop() {
        for consumer in collect_subscribers(&producer) {
            let flags = consumer.flags();
            if flags & DISPOSED != 0 {
                continue;
            }
            if from_resolution && flags & RUNNING != 0 {
                continue;
            }

            let links = consumer.links();
            if links.visited_pass.get() == pass {
                // Revisit transition: a second path this pass proved the
                // node must actually run. Upgrade without re-walking.
                if status & DIRTY != 0 && flags & PENDING != 0 && flags & DIRTY == 0 {
                    consumer.set_status(DIRTY);
                    if flags & SUBSCRIBER_MASK != 0 {
                        schedule(&consumer);
                    }
                }
                continue;
            }
            links.visited_pass.set(pass);

            // Never downgrade DIRTY back to PENDING.
            if flags & DIRTY == 0 {
                consumer.set_status(status);
            }

            if flags & PRODUCER != 0 {
                // Laziness: speculate downstream without running anything.
                stack.push((consumer.clone(), PENDING));
            }

            if flags & SUBSCRIBER_MASK != 0 {
                schedule(&consumer);
            }
        }
    }

    flush_if_idle();
}

// =============================================================================
// CONFIRM STALE
// =============================================================================

/// Decide whether a stale consumer actually has to run.
///
/// DIRTY is already confirmed. PENDING is speculative: resolve each stale
/// producer in dependency order; a producer whose resolution yields a real
/// change propagates DIRTY to this consumer, at which point the check
/// short-circuits. If every producer resolves unchanged the consumer is
/// marked clean and does not run (the glitch-free diamond short-circuit).
pub(crate) fn confirm_stale(consumer: &Rc<dyn ReactiveNode>) -> bool {
    let flags = consumer.flags();
    if flags & DIRTY != 0 {
        return true;
    }
    if flags & PENDING == 0 {
        return false;
    }

    for producer in collect_dependencies(consumer) {
        if producer.flags() & STALE_MASK != 0 {
            producer.update_node();
        }
        if consumer.flags() & DIRTY != 0 {
            return true;
        }
    }

    consumer.set_status(0);
    false
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::node::NodeLinks;
    use crate::reactivity::tracking::{begin_tracking, track_read};
    use std::any::Any;
    use std::cell::{Cell, RefCell};
    use std::rc::Weak;

    struct Stub {
        flags: Cell<u32>,
        links: NodeLinks,
        self_ref: RefCell<Weak<Stub>>,
    }

    impl Stub {
        fn new(flags: u32) -> Rc<Self> {
            let stub = Rc::new(Self {
                flags: Cell::new(flags),
                links: NodeLinks::new(),
                self_ref: RefCell::new(Weak::new()),
            });
            *stub.self_ref.borrow_mut() = Rc::downgrade(&stub);
            stub
        }

        fn as_dyn(&self) -> Rc<dyn ReactiveNode> {
            self.as_node()
        }
    }

    impl ReactiveNode for Stub {
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
                .expect("stub self reference")
        }
    }

    fn wire(producer: &Rc<Stub>, consumer: &Rc<Stub>) {
        let window = begin_tracking(&consumer.as_dyn());
        track_read(&producer.as_dyn());
        window.finish();
    }

    #[test]
    fn direct_consumers_are_marked_dirty() {
        let cell = Stub::new(PRODUCER | CELL);
        let derived = Stub::new(PRODUCER | CONSUMER | DERIVED);
        wire(&cell, &derived);

        propagate(&cell.as_dyn());

        assert!(derived.is_dirty());
        assert!(!derived.is_pending());
    }

    #[test]
    fn transitive_consumers_are_marked_pending() {
        // cell -> a -> b: a is direct (DIRTY), b is speculative (PENDING).
        let cell = Stub::new(PRODUCER | CELL);
        let a = Stub::new(PRODUCER | CONSUMER | DERIVED);
        let b = Stub::new(PRODUCER | CONSUMER | DERIVED);
        wire(&cell, &a);
        wire(&a, &b);

        propagate(&cell.as_dyn());

        assert!(a.is_dirty());
        assert!(b.is_pending());
        assert!(!b.is_dirty());
    }

    #[test]
    fn diamond_marks_each_node_once_per_pass() {
        // cell -> a, cell -> b, a -> join, b -> join. The join is reached
        // twice but both arrivals carry PENDING; the second is a no-op.
        let cell = Stub::new(PRODUCER | CELL);
        let a = Stub::new(PRODUCER | CONSUMER | DERIVED);
        let b = Stub::new(PRODUCER | CONSUMER | DERIVED);
        let join = Stub::new(PRODUCER | CONSUMER | DERIVED);
        wire(&cell, &a);
        wire(&cell, &b);
        wire(&a, &join);
        wire(&b, &join);

        propagate(&cell.as_dyn());

        assert!(a.is_dirty());
        assert!(b.is_dirty());
        assert!(join.is_pending());
    }

    #[test]
    fn cyclic_graph_terminates() {
        let a = Stub::new(PRODUCER | CONSUMER | DERIVED);
        let b = Stub::new(PRODUCER | CONSUMER | DERIVED);
        wire(&a, &b);
        wire(&b, &a);

        // Must not loop forever; both sides end up stale.
        propagate(&a.as_dyn());
        assert!(b.is_stale());
        assert!(a.is_stale());
    }

    #[test]
    fn later_pass_upgrades_pending_to_dirty() {
        let cell = Stub::new(PRODUCER | CELL);
        let mid = Stub::new(PRODUCER | CONSUMER | DERIVED);
        let far = Stub::new(PRODUCER | CONSUMER | DERIVED);
        wire(&cell, &mid);
        wire(&mid, &far);

        propagate(&cell.as_dyn());
        assert!(far.is_pending());

        // A resolution pass starting at `mid` confirms the change.
        propagate(&mid.as_dyn());
        assert!(far.is_dirty());
    }

    #[test]
    fn disposed_consumers_are_skipped() {
        let cell = Stub::new(PRODUCER | CELL);
        let dead = Stub::new(PRODUCER | CONSUMER | DERIVED);
        wire(&cell, &dead);
        dead.set_flags(dead.flags() | DISPOSED);

        propagate(&cell.as_dyn());
        assert!(!dead.is_dirty());
    }

    #[test]
    fn confirm_stale_clears_unconfirmed_pending() {
        // A pending consumer whose only stale producer resolves unchanged
        // (Stub::update_node returns true but never propagates) must not
        // be treated as dirty when no DIRTY mark arrives.
        let consumer = Stub::new(CONSUMER | EFFECT);
        consumer.set_status(PENDING);

        assert!(!confirm_stale(&consumer.as_dyn()));
        assert!(!consumer.is_stale());
    }

    #[test]
    fn confirm_stale_accepts_already_dirty() {
        let consumer = Stub::new(CONSUMER | EFFECT);
        consumer.set_status(DIRTY);
        assert!(confirm_stale(&consumer.as_dyn()));
    }
}
