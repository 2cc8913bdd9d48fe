#![no_main]

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use arbitrary::Arbitrary;
use batchcall::{Batcher, ManualScheduler};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
enum Op {
    Call,
    Flush,
    Clear,
    Advance(u8),
}

#[derive(Debug, Arbitrary)]
struct Input {
    interval_ms: u8,
    limit: Option<u8>,
    ops: Vec<Op>,
}

fuzz_target!(|input: Input| {
    let clock = ManualScheduler::new();
    let batches: Rc<RefCell<Vec<Vec<u32>>>> = Rc::new(RefCell::new(Vec::new()));
    let b = Rc::clone(&batches);
    let mut builder = Batcher::from_fn(move |batch| b.borrow_mut().push(batch))
        .interval(Duration::from_millis(u64::from(input.interval_ms)))
        .scheduler(clock.clone());
    if let Some(limit) = input.limit {
        builder = builder.limit(usize::from(limit));
    }
    let Ok(batched) = builder.build() else {
        return;
    };

    let mut next = 0u32;
    let mut cleared = 0usize;
    for op in input.ops.into_iter().take(1024) {
        match op {
            Op::Call => {
                let _ = batched.call(next);
                next += 1;
            }
            Op::Flush => {
                let _ = batched.flush();
            }
            Op::Clear => {
                cleared += batched.len();
                batched.clear();
            }
            Op::Advance(ms) => {
                clock.advance(Duration::from_millis(u64::from(ms)));
            }
        }
        assert_eq!(batched.is_pending(), !batched.is_empty());
        if let Some(limit) = input.limit {
            assert!(batched.len() <= usize::from(limit));
        }
    }

    let remaining = batched.len();
    let batches = batches.borrow();
    let delivered: Vec<u32> = batches.iter().flatten().copied().collect();
    assert!(delivered.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(delivered.len() + cleared + remaining, next as usize);
    if let Some(limit) = input.limit {
        assert!(batches.iter().all(|b| b.len() <= usize::from(limit) + 1));
    }
});
