// Batch collapsing: any number of writes inside one batch re-runs a given
// subscriber at most once, against the final values.

use proptest::prelude::*;
use std::cell::{Cell as StdCell, RefCell};
use std::rc::Rc;

use weft::{batch, batch_depth, cell, derived, effect, flush, is_batching, untracked};

#[test]
fn repeated_writes_to_one_cell_collapse() {
    let source = cell(1);
    let log = Rc::new(RefCell::new(Vec::new()));

    let sink = log.clone();
    let dep = source.clone();
    let _effect = effect(move || {
        sink.borrow_mut().push(dep.get());
    });

    batch(|| {
        source.set(2);
        source.set(3);
        source.set(4);
    });

    assert_eq!(*log.borrow(), vec![1, 4]);
}

#[test]
fn writes_to_different_cells_collapse_per_subscriber() {
    let a = cell(1);
    let b = cell(10);
    let sum_runs = Rc::new(StdCell::new(0));
    let sums = Rc::new(RefCell::new(Vec::new()));

    let (a_dep, b_dep) = (a.clone(), b.clone());
    let runs = sum_runs.clone();
    let sink = sums.clone();
    let _effect = effect(move || {
        runs.set(runs.get() + 1);
        sink.borrow_mut().push(a_dep.get() + b_dep.get());
    });

    batch(|| {
        a.set(2);
        b.set(20);
        a.set(3);
    });

    assert_eq!(sum_runs.get(), 2, "initial run plus one batched run");
    assert_eq!(*sums.borrow(), vec![11, 23]);
}

#[test]
fn nested_batches_defer_to_the_outermost_exit() {
    let source = cell(0);
    let runs = Rc::new(StdCell::new(0));

    let counter = runs.clone();
    let dep = source.clone();
    let _effect = effect(move || {
        let _ = dep.get();
        counter.set(counter.get() + 1);
    });

    batch(|| {
        assert!(is_batching());
        assert_eq!(batch_depth(), 1);
        source.set(1);

        batch(|| {
            assert_eq!(batch_depth(), 2);
            source.set(2);
        });

        assert_eq!(runs.get(), 1, "inner exit does not flush");
    });

    assert_eq!(runs.get(), 2);
    assert!(!is_batching());
}

#[test]
fn derived_inside_batch_reads_through_to_written_values() {
    let source = cell(1);
    let doubled = derived({
        let source = source.clone();
        move || source.get() * 2
    });

    batch(|| {
        source.set(5);
        // Lazy resolution is not deferred by the batch, only subscribers.
        assert_eq!(doubled.get(), 10);
    });
}

#[test]
fn batch_returns_value_and_survives_errors() {
    let source = cell(0);
    let runs = Rc::new(StdCell::new(0));

    let counter = runs.clone();
    let dep = source.clone();
    let _effect = effect(move || {
        let _ = dep.get();
        counter.set(counter.get() + 1);
    });

    assert_eq!(batch(|| "done"), "done");

    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        batch(|| {
            source.set(1);
            panic!("batch body failed");
        })
    }));
    assert!(outcome.is_err());
    assert!(!is_batching(), "depth decremented during unwinding");
    assert_eq!(source.peek(), 1, "applied write is kept");

    // The parked run drains on the next explicit flush.
    flush();
    assert_eq!(runs.get(), 2);
}

#[test]
fn untracked_reads_inside_a_batch_stay_untracked() {
    let tracked = cell(1);
    let ignored = cell(2);
    let runs = Rc::new(StdCell::new(0));

    let counter = runs.clone();
    let (t, i) = (tracked.clone(), ignored.clone());
    let _effect = effect(move || {
        let _ = t.get();
        let _ = untracked(|| i.get());
        counter.set(counter.get() + 1);
    });

    batch(|| {
        ignored.set(3);
        ignored.set(4);
    });
    assert_eq!(runs.get(), 1, "untracked producer cannot schedule the effect");

    batch(|| {
        tracked.set(5);
        ignored.set(6);
    });
    assert_eq!(runs.get(), 2);
}

proptest! {
    // For any write sequence inside one batch, each subscriber runs at
    // most once afterwards and observes only the final values.
    #[test]
    fn arbitrary_batched_writes_collapse(
        writes in proptest::collection::vec((0usize..3, -100i64..100), 1..60),
    ) {
        let cells = [cell(0i64), cell(0i64), cell(0i64)];
        let runs = Rc::new(StdCell::new(0usize));
        let seen = Rc::new(RefCell::new(Vec::new()));

        let counter = runs.clone();
        let sink = seen.clone();
        let deps = cells.clone();
        let _effect = effect(move || {
            let snapshot = [deps[0].get(), deps[1].get(), deps[2].get()];
            counter.set(counter.get() + 1);
            sink.borrow_mut().push(snapshot);
        });

        let mut finals = [0i64; 3];
        batch(|| {
            for &(index, value) in &writes {
                cells[index].set(value);
                finals[index] = value;
            }
        });

        prop_assert_eq!(runs.get(), 2, "initial run plus exactly one batched run");
        prop_assert_eq!(*seen.borrow().last().unwrap(), finals);
    }
}
