// ============================================================================
// weft - Scheduling
// FIFO subscriber queue and the synchronous flush loop
// ============================================================================
//
// Without a microtask queue, flushing is synchronous: a write outside a
// batch drains the queue before returning; writes inside a batch leave the
// queue for the outermost batch exit. The queue holds weak handles and is
// drained one entry at a time, so a subscriber that panics leaves the
// remaining entries queued instead of dropping them.
// ============================================================================

use std::rc::Rc;

use crate::core::constants::*;
use crate::core::context::with_context;
use crate::core::node::ReactiveNode;
use crate::primitives::effect::EffectInner;
use crate::reactivity::propagate::confirm_stale;

/// Queue drains per flush before the engine assumes a self-invalidating
/// subscriber and gives up.
const MAX_FLUSH_COUNT: u32 = 1000;

// =============================================================================
// SCHEDULE
// =============================================================================

/// Queue a subscriber for a re-run, or hand it to its custom scheduler.
///
/// The QUEUED bit deduplicates entries; it is cleared when the entry is
/// popped, so a subscriber dirtied again during its own run is re-queued.
pub(crate) fn schedule(consumer: &Rc<dyn ReactiveNode>) {
    let flags = consumer.flags();
    if flags & (QUEUED | DISPOSED) != 0 {
        return;
    }

    if flags & EFFECT != 0 {
        if let Some(inner) = consumer.as_any().downcast_ref::<EffectInner>() {
            if inner.dispatch_to_scheduler() {
                return;
            }
        }
    }

    consumer.set_flags(consumer.flags() | QUEUED);
    with_context(|ctx| ctx.queue.borrow_mut().push_back(Rc::downgrade(consumer)));
}

// =============================================================================
// FLUSH
// =============================================================================

/// Drain the queue if nothing is holding it back (no open batch, no flush
/// already in progress).
pub(crate) fn flush_if_idle() {
    let idle = with_context(|ctx| {
        !ctx.is_batching() && !ctx.flushing.get() && !ctx.queue.borrow().is_empty()
    });
    if idle {
        flush_queue();
    }
}

/// Synchronously run every queued subscriber whose staleness confirms.
///
/// Normally the runtime flushes on its own at the first idle moment; this
/// is the explicit handle for custom schedulers and tests. Draining while
/// a batch is open runs subscribers early against the values written so
/// far.
pub fn flush() {
    flush_queue();
}

pub(crate) fn flush_queue() {
    let was_flushing = with_context(|ctx| ctx.flushing.replace(true));
    if was_flushing {
        // The outer flush loop will pick up anything we would have run.
        return;
    }

    struct FlushGuard;
    impl Drop for FlushGuard {
        fn drop(&mut self) {
            with_context(|ctx| ctx.flushing.set(false));
        }
    }
    let _guard = FlushGuard;

    tracing::trace!("flush begin");
    let mut ran = 0u32;

    loop {
        let next = with_context(|ctx| ctx.queue.borrow_mut().pop_front());
        let Some(weak) = next else { break };

        ran += 1;
        if ran > MAX_FLUSH_COUNT {
            panic!(
                "maximum update depth exceeded: a subscriber keeps \
                 invalidating its own dependencies"
            );
        }

        // Tolerate entries that died or were disposed after being queued.
        let Some(node) = weak.upgrade() else { continue };
        node.set_flags(node.flags() & !QUEUED);
        if node.is_disposed() {
            continue;
        }

        if !confirm_stale(&node) {
            continue;
        }

        node.update_node();
    }

    tracing::trace!(subscribers = ran, "flush end");
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::node::NodeLinks;
    use std::any::Any;
    use std::cell::{Cell, RefCell};
    use std::rc::Weak;

    /// Subscriber stub that counts its runs.
    struct Counting {
        flags: Cell<u32>,
        links: NodeLinks,
        self_ref: RefCell<Weak<Counting>>,
        runs: Cell<u32>,
    }

    impl Counting {
        fn new() -> Rc<Self> {
            let node = Rc::new(Self {
                flags: Cell::new(CONSUMER | WATCH),
                links: NodeLinks::new(),
                self_ref: RefCell::new(Weak::new()),
                runs: Cell::new(0),
            });
            *node.self_ref.borrow_mut() = Rc::downgrade(&node);
            node
        }

        fn as_dyn(&self) -> Rc<dyn ReactiveNode> {
            self.as_node()
        }
    }

    impl ReactiveNode for Counting {
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
            self.self_ref.borrow().upgrade().expect("self reference")
        }

        fn update_node(&self) -> bool {
            self.runs.set(self.runs.get() + 1);
            false
        }
    }

    #[test]
    fn queued_subscriber_runs_once_per_flush() {
        let sub = Counting::new();
        sub.set_status(DIRTY);

        schedule(&sub.as_dyn());
        schedule(&sub.as_dyn());
        schedule(&sub.as_dyn());
        flush_queue();

        assert_eq!(sub.runs.get(), 1, "duplicate enqueues collapse");
    }

    #[test]
    fn clean_subscriber_is_skipped() {
        let sub = Counting::new();
        // Queued but never marked stale: confirmation fails, body not run.
        schedule(&sub.as_dyn());
        flush_queue();
        assert_eq!(sub.runs.get(), 0);
    }

    #[test]
    fn disposed_entry_is_skipped_without_error() {
        let sub = Counting::new();
        sub.set_status(DIRTY);
        schedule(&sub.as_dyn());
        sub.set_flags(sub.flags() | DISPOSED);

        flush_queue();
        assert_eq!(sub.runs.get(), 0);
    }

    #[test]
    fn dropped_entry_is_skipped_without_error() {
        {
            let sub = Counting::new();
            sub.set_status(DIRTY);
            schedule(&sub.as_dyn());
        }
        flush_queue();
    }

    #[test]
    fn flush_runs_in_fifo_order() {
        thread_local! {
            static ORDER: RefCell<Vec<u64>> = const { RefCell::new(Vec::new()) };
        }

        struct Recording {
            flags: Cell<u32>,
            links: NodeLinks,
            self_ref: RefCell<Weak<Recording>>,
        }

        impl ReactiveNode for Recording {
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
                self.self_ref.borrow().upgrade().expect("self reference")
            }
            fn update_node(&self) -> bool {
                ORDER.with(|o| o.borrow_mut().push(self.links.id()));
                false
            }
        }

        let subs: Vec<Rc<Recording>> = (0..3)
            .map(|_| {
                let node = Rc::new(Recording {
                    flags: Cell::new(CONSUMER | WATCH | DIRTY),
                    links: NodeLinks::new(),
                    self_ref: RefCell::new(Weak::new()),
                });
                *node.self_ref.borrow_mut() = Rc::downgrade(&node);
                node
            })
            .collect();

        for sub in &subs {
            schedule(&(sub.clone() as Rc<dyn ReactiveNode>));
        }
        flush_queue();

        let expected: Vec<u64> = subs.iter().map(|s| s.links.id()).collect();
        ORDER.with(|o| assert_eq!(*o.borrow(), expected));
    }
}
