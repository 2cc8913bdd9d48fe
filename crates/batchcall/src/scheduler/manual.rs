#![forbid(unsafe_code)]

//! Deterministic virtual-clock scheduler.
//!
//! Time only moves when the host calls [`ManualScheduler::advance`]. Due tasks
//! run in deadline order; tasks sharing a deadline run in the order they were
//! scheduled. Tasks may schedule further tasks; those run within the same
//! `advance` call if their deadline falls inside the advanced window.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::Duration;

use super::{Scheduler, Task, TimerHandle};

type Key = (Duration, u64);

#[derive(Default)]
struct Timeline {
    now: Duration,
    next_seq: u64,
    queue: BTreeMap<Key, Task>,
}

impl Timeline {
    fn pop_due(&mut self, target: Duration) -> Option<Task> {
        let (&(deadline, _), _) = self.queue.first_key_value()?;
        if deadline > target {
            return None;
        }
        let ((deadline, _), task) = self.queue.pop_first()?;
        self.now = deadline;
        Some(task)
    }
}

/// Scheduler driven by an explicit virtual clock.
///
/// Clones share the same timeline, so a test can hand one clone to a
/// [`Batcher`](crate::Batcher) and keep another to advance time.
#[derive(Clone, Default)]
pub struct ManualScheduler {
    timeline: Rc<RefCell<Timeline>>,
}

impl ManualScheduler {
    /// Create a scheduler at virtual time zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current virtual time since creation.
    #[must_use]
    pub fn now(&self) -> Duration {
        self.timeline.borrow().now
    }

    /// Number of tasks waiting to run.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.timeline.borrow().queue.len()
    }

    /// Move the clock forward by `by`, running every task that falls due.
    ///
    /// Returns the number of tasks run.
    pub fn advance(&self, by: Duration) -> usize {
        let target = self.now().saturating_add(by);
        let mut ran = 0;
        loop {
            // Release the borrow before running: tasks may schedule or cancel.
            let next = self.timeline.borrow_mut().pop_due(target);
            let Some(task) = next else { break };
            task();
            ran += 1;
        }
        self.timeline.borrow_mut().now = target;
        ran
    }

    /// Run tasks until none remain, moving the clock to each deadline.
    ///
    /// Returns the number of tasks run.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        loop {
            let next = {
                let mut timeline = self.timeline.borrow_mut();
                timeline.pop_due(Duration::MAX)
            };
            let Some(task) = next else { break };
            task();
            ran += 1;
        }
        ran
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, task: Task) -> TimerHandle {
        let key = {
            let mut timeline = self.timeline.borrow_mut();
            let deadline = timeline.now.saturating_add(delay);
            let key = (deadline, timeline.next_seq);
            timeline.next_seq += 1;
            timeline.queue.insert(key, task);
            key
        };
        let timeline: Weak<RefCell<Timeline>> = Rc::downgrade(&self.timeline);
        TimerHandle::new(move || {
            if let Some(timeline) = timeline.upgrade() {
                // Removing the task drops it; do that outside the borrow.
                let removed = timeline.borrow_mut().queue.remove(&key);
                drop(removed);
            }
        })
    }
}

impl fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let timeline = self.timeline.borrow();
        f.debug_struct("ManualScheduler")
            .field("now", &timeline.now)
            .field("pending", &timeline.queue.len())
            .finish()
    }
}
