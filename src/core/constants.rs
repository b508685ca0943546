// ============================================================================
// weft - Constants
// Flag bits shared by every node in the reactive graph
// ============================================================================

// =============================================================================
// NODE KIND FLAGS
// =============================================================================

/// Node can be depended on (cells, derived computations, custom producers)
pub const PRODUCER: u32 = 1 << 0;

/// Node reads producers and owns a dependency list
pub const CONSUMER: u32 = 1 << 1;

/// Leaf settable value holder
pub const CELL: u32 = 1 << 2;

/// Cached, lazily recomputed value (both producer and consumer)
pub const DERIVED: u32 = 1 << 3;

/// Side-effecting subscriber
pub const EFFECT: u32 = 1 << 4;

/// Declarative pull-comparison subscriber
pub const WATCH: u32 = 1 << 5;

/// Throwaway consumer used by `trigger`/`notify_all`
pub const PROBE: u32 = 1 << 6;

// =============================================================================
// NODE STATUS FLAGS
// =============================================================================

/// Stale: must recompute (derived) or re-run (subscriber)
pub const DIRTY: u32 = 1 << 10;

/// Possibly stale: a transitive producer changed, confirmation pending
pub const PENDING: u32 = 1 << 11;

/// Body or recompute function is currently executing
pub const RUNNING: u32 = 1 << 12;

/// Sitting in the flush queue
pub const QUEUED: u32 = 1 << 13;

/// Disposed: lists are empty, every further operation is rejected
pub const DISPOSED: u32 = 1 << 14;

// =============================================================================
// MASKS
// =============================================================================

/// Both staleness bits
pub const STALE_MASK: u32 = DIRTY | PENDING;

/// Nodes that go through the flush queue
pub const SUBSCRIBER_MASK: u32 = EFFECT | WATCH;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_are_distinct() {
        let all = [
            PRODUCER, CONSUMER, CELL, DERIVED, EFFECT, WATCH, PROBE, DIRTY, PENDING, RUNNING,
            QUEUED, DISPOSED,
        ];

        for (i, &a) in all.iter().enumerate() {
            for (j, &b) in all.iter().enumerate() {
                if i != j {
                    assert_eq!(a & b, 0, "flags {i} and {j} overlap: {a:b} & {b:b}");
                }
            }
        }
    }

    #[test]
    fn stale_mask_covers_both_staleness_bits() {
        assert_ne!(STALE_MASK & DIRTY, 0);
        assert_ne!(STALE_MASK & PENDING, 0);
        assert_eq!(STALE_MASK & (RUNNING | QUEUED | DISPOSED), 0);
    }

    #[test]
    fn can_combine_and_clear_flags() {
        let mut flags = DERIVED | PRODUCER | CONSUMER | DIRTY;
        assert_ne!(flags & DIRTY, 0);

        flags = (flags & !STALE_MASK) | PENDING;
        assert_eq!(flags & DIRTY, 0);
        assert_ne!(flags & PENDING, 0);
        assert_ne!(flags & DERIVED, 0);
    }
}
