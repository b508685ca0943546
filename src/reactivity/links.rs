// ============================================================================
// weft - Link Arena
// Generational slot storage for the graph's edge records
// ============================================================================
//
// Every edge lives in one central arena owned by the runtime context.
// Nodes store only LinkId handles; the generation counter on each slot
// makes a dangling handle unrepresentable as a live edge (a freed-and-
// reused slot has a newer generation, so stale ids simply fail to resolve).
// ============================================================================

use std::rc::{Rc, Weak};

use crate::core::node::{LinkId, ReactiveNode};

// =============================================================================
// LINK RECORD
// =============================================================================

/// A directed edge: `consumer` reads `producer`.
///
/// The record sits on two intrusive doubly-linked lists at once: the
/// producer's subscriber list (`prev_sub`/`next_sub`) and the consumer's
/// dependency list (`prev_dep`/`next_dep`). Consumers hold their producers
/// strongly; the reverse direction is weak so the graph cannot leak cycles.
pub(crate) struct Link {
    pub producer: Rc<dyn ReactiveNode>,
    pub consumer: Weak<dyn ReactiveNode>,

    /// Consumer-run pass this edge was last established or re-confirmed in.
    /// Edges not restamped during a re-run are swept afterwards.
    pub stamp: u64,

    /// Position on the consumer's dependency list.
    pub prev_dep: Option<LinkId>,
    pub next_dep: Option<LinkId>,

    /// Position on the producer's subscriber list.
    pub prev_sub: Option<LinkId>,
    pub next_sub: Option<LinkId>,
}

// =============================================================================
// ARENA
// =============================================================================

enum Slot {
    Occupied { generation: u32, link: Link },
    Free { generation: u32, next_free: Option<u32> },
}

/// Slot arena with a free list and per-slot generation counters.
pub struct LinkArena {
    slots: Vec<Slot>,
    free_head: Option<u32>,
    live: usize,
}

impl LinkArena {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_head: None,
            live: 0,
        }
    }

    /// Number of live edges.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Store a new edge, reusing a free slot when one is available.
    pub(crate) fn insert(&mut self, link: Link) -> LinkId {
        self.live += 1;

        if let Some(index) = self.free_head {
            let slot = &mut self.slots[index as usize];
            let generation = match *slot {
                Slot::Free {
                    generation,
                    next_free,
                } => {
                    self.free_head = next_free;
                    // Bump on reuse so stale ids to this slot stop resolving.
                    generation.wrapping_add(1)
                }
                Slot::Occupied { .. } => unreachable!("free list points at an occupied slot"),
            };
            *slot = Slot::Occupied { generation, link };
            return LinkId { index, generation };
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot::Occupied {
            generation: 0,
            link,
        });
        LinkId {
            index,
            generation: 0,
        }
    }

    /// Resolve a handle, failing on freed or restamped slots.
    pub(crate) fn get(&self, id: LinkId) -> Option<&Link> {
        match self.slots.get(id.index as usize) {
            Some(Slot::Occupied { generation, link }) if *generation == id.generation => Some(link),
            _ => None,
        }
    }

    pub(crate) fn get_mut(&mut self, id: LinkId) -> Option<&mut Link> {
        match self.slots.get_mut(id.index as usize) {
            Some(Slot::Occupied { generation, link }) if *generation == id.generation => Some(link),
            _ => None,
        }
    }

    /// Free a slot, returning the edge it held.
    pub(crate) fn remove(&mut self, id: LinkId) -> Option<Link> {
        let slot = self.slots.get_mut(id.index as usize)?;
        match slot {
            Slot::Occupied { generation, .. } if *generation == id.generation => {
                let generation = *generation;
                let old = std::mem::replace(
                    slot,
                    Slot::Free {
                        generation,
                        next_free: self.free_head,
                    },
                );
                self.free_head = Some(id.index);
                self.live -= 1;
                match old {
                    Slot::Occupied { link, .. } => Some(link),
                    Slot::Free { .. } => unreachable!(),
                }
            }
            _ => None,
        }
    }
}

impl Default for LinkArena {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::constants::{CELL, PRODUCER};
    use crate::core::node::NodeLinks;
    use std::any::Any;
    use std::cell::Cell;

    struct Stub {
        flags: Cell<u32>,
        links: NodeLinks,
    }

    impl Stub {
        fn new() -> Rc<Self> {
            Rc::new(Self {
                flags: Cell::new(PRODUCER | CELL),
                links: NodeLinks::new(),
            })
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
            unreachable!("not exercised by arena tests")
        }
    }

    fn edge(producer: &Rc<Stub>, consumer: &Rc<Stub>) -> Link {
        Link {
            producer: producer.clone() as Rc<dyn ReactiveNode>,
            consumer: Rc::downgrade(&(consumer.clone() as Rc<dyn ReactiveNode>)),
            stamp: 1,
            prev_dep: None,
            next_dep: None,
            prev_sub: None,
            next_sub: None,
        }
    }

    #[test]
    fn insert_then_get() {
        let p = Stub::new();
        let c = Stub::new();
        let mut arena = LinkArena::new();

        let id = arena.insert(edge(&p, &c));
        assert_eq!(arena.len(), 1);

        let link = arena.get(id).expect("live edge resolves");
        assert_eq!(link.stamp, 1);
        assert_eq!(link.producer.links().id(), p.links.id());
    }

    #[test]
    fn removed_id_stops_resolving() {
        let p = Stub::new();
        let c = Stub::new();
        let mut arena = LinkArena::new();

        let id = arena.insert(edge(&p, &c));
        assert!(arena.remove(id).is_some());
        assert_eq!(arena.len(), 0);

        assert!(arena.get(id).is_none());
        assert!(arena.remove(id).is_none());
    }

    #[test]
    fn reused_slot_gets_new_generation() {
        let p = Stub::new();
        let c = Stub::new();
        let mut arena = LinkArena::new();

        let stale = arena.insert(edge(&p, &c));
        arena.remove(stale);

        let fresh = arena.insert(edge(&p, &c));
        assert_eq!(stale.index, fresh.index, "free slot is reused");
        assert_ne!(stale.generation, fresh.generation);

        // The dangling handle cannot alias the new edge.
        assert!(arena.get(stale).is_none());
        assert!(arena.get(fresh).is_some());
    }

    #[test]
    fn free_list_recycles_in_lifo_order() {
        let p = Stub::new();
        let c = Stub::new();
        let mut arena = LinkArena::new();

        let a = arena.insert(edge(&p, &c));
        let b = arena.insert(edge(&p, &c));
        arena.remove(a);
        arena.remove(b);

        let first = arena.insert(edge(&p, &c));
        assert_eq!(first.index, b.index, "most recently freed slot reused first");
    }
}
