//! Batching driven by a real Tokio timer on a paused clock.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use batchcall::{Batcher, TokioScheduler};
use tokio::task::LocalSet;
use tokio::time::sleep;

type Args = (u32, &'static str, bool);

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

#[tokio::test(start_paused = true)]
async fn default_scheduler_batches_within_window() {
    LocalSet::new()
        .run_until(async {
            let log: Rc<RefCell<Vec<Vec<Args>>>> = Rc::new(RefCell::new(Vec::new()));
            let l = Rc::clone(&log);
            let batched = Batcher::from_fn(move |batch| l.borrow_mut().push(batch))
                .interval(ms(10))
                .build()
                .unwrap();

            batched.call((1, "a", true)).unwrap();
            batched.call((2, "b", false)).unwrap();
            batched.call((3, "c", true)).unwrap();

            sleep(ms(15)).await;
            assert_eq!(
                *log.borrow(),
                vec![vec![(1, "a", true), (2, "b", false), (3, "c", true)]]
            );

            batched.call((4, "d", false)).unwrap();
            batched.call((5, "e", true)).unwrap();
            batched.call((6, "f", false)).unwrap();

            sleep(ms(15)).await;
            assert_eq!(log.borrow().len(), 2);
            assert_eq!(
                log.borrow()[1],
                vec![(4, "d", false), (5, "e", true), (6, "f", false)]
            );
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn nothing_is_delivered_before_the_window_closes() {
    LocalSet::new()
        .run_until(async {
            let log: Rc<RefCell<Vec<Vec<u32>>>> = Rc::new(RefCell::new(Vec::new()));
            let l = Rc::clone(&log);
            let batched = Batcher::from_fn(move |batch| l.borrow_mut().push(batch))
                .interval(ms(30))
                .scheduler(TokioScheduler::new())
                .build()
                .unwrap();

            batched.call(1).unwrap();
            batched.call(2).unwrap();

            sleep(ms(5)).await;
            assert!(log.borrow().is_empty());
            sleep(ms(5)).await;
            assert!(log.borrow().is_empty());
            sleep(ms(25)).await;
            assert_eq!(*log.borrow(), vec![vec![1, 2]]);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn limit_flush_aborts_the_tokio_timer() {
    LocalSet::new()
        .run_until(async {
            let log: Rc<RefCell<Vec<Vec<u32>>>> = Rc::new(RefCell::new(Vec::new()));
            let l = Rc::clone(&log);
            let batched = Batcher::from_fn(move |batch| l.borrow_mut().push(batch))
                .interval(ms(30))
                .limit(1)
                .build()
                .unwrap();

            batched.call(8).unwrap();
            assert!(batched.is_pending());
            batched.call(9).unwrap();
            assert_eq!(*log.borrow(), vec![vec![8, 9]]);
            assert!(!batched.is_pending());

            sleep(ms(50)).await;
            assert_eq!(log.borrow().len(), 1);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn clear_aborts_the_tokio_timer() {
    LocalSet::new()
        .run_until(async {
            let log: Rc<RefCell<Vec<Vec<u32>>>> = Rc::new(RefCell::new(Vec::new()));
            let l = Rc::clone(&log);
            let batched = Batcher::from_fn(move |batch| l.borrow_mut().push(batch))
                .interval(ms(10))
                .build()
                .unwrap();

            batched.call(1).unwrap();
            batched.clear();
            sleep(ms(20)).await;
            assert!(log.borrow().is_empty());

            batched.call(2).unwrap();
            sleep(ms(20)).await;
            assert_eq!(*log.borrow(), vec![vec![2]]);
        })
        .await;
}
