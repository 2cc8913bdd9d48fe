//! Property tests for batching invariants.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use batchcall::{Batcher, ManualScheduler};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Call,
    Flush,
    Clear,
    Advance(u64),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        6 => Just(Op::Call),
        1 => Just(Op::Flush),
        1 => Just(Op::Clear),
        2 => (0u64..40).prop_map(Op::Advance),
    ]
}

proptest! {
    #[test]
    fn one_window_yields_one_ordered_batch(n in 1usize..200, interval in 1u64..100) {
        let clock = ManualScheduler::new();
        let log: Rc<RefCell<Vec<Vec<usize>>>> = Rc::new(RefCell::new(Vec::new()));
        let l = Rc::clone(&log);
        let batched = Batcher::from_fn(move |batch| l.borrow_mut().push(batch))
            .interval(Duration::from_millis(interval))
            .scheduler(clock.clone())
            .build()
            .unwrap();

        for i in 0..n {
            batched.call(i).unwrap();
        }
        clock.advance(Duration::from_millis(interval));

        let log = log.borrow();
        prop_assert_eq!(log.len(), 1);
        prop_assert_eq!(&log[0], &(0..n).collect::<Vec<_>>());
    }

    #[test]
    fn limit_splits_into_chunks_of_limit_plus_one(n in 0usize..200, limit in 0usize..10) {
        let clock = ManualScheduler::new();
        let log: Rc<RefCell<Vec<Vec<usize>>>> = Rc::new(RefCell::new(Vec::new()));
        let l = Rc::clone(&log);
        let batched = Batcher::from_fn(move |batch| l.borrow_mut().push(batch))
            .interval(Duration::from_millis(10))
            .limit(limit)
            .scheduler(clock.clone())
            .build()
            .unwrap();

        for i in 0..n {
            batched.call(i).unwrap();
        }
        let forced = log.borrow().len();
        prop_assert_eq!(forced, n / (limit + 1));
        prop_assert!(log.borrow().iter().all(|b| b.len() == limit + 1));

        clock.advance(Duration::from_millis(10));
        let expected_tail = usize::from(n % (limit + 1) != 0);
        prop_assert_eq!(log.borrow().len(), forced + expected_tail);
    }

    #[test]
    fn every_call_is_delivered_or_cleared_exactly_once(
        ops in prop::collection::vec(op(), 0..120),
        limit in prop::option::of(0usize..8),
    ) {
        let clock = ManualScheduler::new();
        let delivered: Rc<RefCell<Vec<u64>>> = Rc::new(RefCell::new(Vec::new()));
        let d = Rc::clone(&delivered);
        let mut builder = Batcher::from_fn(move |batch: Vec<u64>| d.borrow_mut().extend(batch))
            .interval(Duration::from_millis(15))
            .scheduler(clock.clone());
        if let Some(limit) = limit {
            builder = builder.limit(limit);
        }
        let batched = builder.build().unwrap();

        let mut next = 0u64;
        let mut cleared = 0u64;
        for op in ops {
            match op {
                Op::Call => {
                    batched.call(next).unwrap();
                    next += 1;
                }
                Op::Flush => batched.flush().unwrap(),
                Op::Clear => {
                    cleared += batched.len() as u64;
                    batched.clear();
                }
                Op::Advance(ms) => {
                    clock.advance(Duration::from_millis(ms));
                }
            }
            prop_assert_eq!(batched.is_pending(), !batched.is_empty());
            if let Some(limit) = limit {
                prop_assert!(batched.len() <= limit);
            }
        }
        let still_buffered = batched.len() as u64;

        let delivered = delivered.borrow();
        prop_assert!(delivered.windows(2).all(|w| w[0] < w[1]), "order preserved");
        prop_assert_eq!(delivered.len() as u64 + cleared + still_buffered, next);
        prop_assert_eq!(batched.stats().cleared, cleared);
    }
}
