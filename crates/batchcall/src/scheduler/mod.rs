#![forbid(unsafe_code)]

//! One-shot deferred tasks with cancel handles.
//!
//! A [`Batcher`](crate::Batcher) arms exactly one timer per cycle and cancels
//! it whenever the cycle ends through another path. Anything that can run a
//! closure later and forget it on request can drive a batcher:
//!
//! - [`TokioScheduler`]: `spawn_local` + `tokio::time::sleep` on a
//!   current-thread runtime. This is the default.
//! - [`ManualScheduler`]: a virtual clock advanced explicitly by the host.
//!
//! # Contract
//!
//! 1. `schedule` never runs the task before returning, even for a zero delay.
//! 2. A cancelled task never runs.
//! 3. Tasks run on the same thread that scheduled them.

mod local;
mod manual;

pub use self::local::TokioScheduler;
pub use self::manual::ManualScheduler;

use std::fmt;
use std::time::Duration;

/// Deferred closure accepted by a [`Scheduler`].
pub type Task = Box<dyn FnOnce() + 'static>;

/// Runs a task once after a delay.
pub trait Scheduler {
    /// Schedule `task` to run after `delay` and return a handle that can cancel it.
    fn schedule(&self, delay: Duration, task: Task) -> TimerHandle;
}

/// Cancel handle for a scheduled task.
///
/// Dropping the handle does not cancel the task.
#[must_use = "dropping a timer handle leaves the task scheduled"]
pub struct TimerHandle {
    cancel: Option<Box<dyn FnOnce() + 'static>>,
}

impl TimerHandle {
    /// Wrap a cancel routine.
    pub fn new(cancel: impl FnOnce() + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A handle whose cancel does nothing.
    pub fn detached() -> Self {
        Self { cancel: None }
    }

    /// Cancel the task if it has not run yet.
    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerHandle")
            .field("cancellable", &self.cancel.is_some())
            .finish()
    }
}
