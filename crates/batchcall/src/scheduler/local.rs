#![forbid(unsafe_code)]

//! Tokio-backed scheduler for single-threaded hosts.

use std::time::Duration;

use super::{Scheduler, Task, TimerHandle};
use crate::error::BatchError;

/// Schedules tasks with [`tokio::task::spawn_local`] and [`tokio::time::sleep`].
///
/// Tasks are `!Send`, so scheduling must happen inside a
/// [`tokio::task::LocalSet`]; calling [`Scheduler::schedule`] outside one
/// panics, as `spawn_local` does.
///
/// ```ignore
/// let local = tokio::task::LocalSet::new();
/// local.run_until(async {
///     let batched = Batcher::from_fn(|batch: Vec<u32>| println!("{batch:?}"))
///         .interval(Duration::from_millis(10))
///         .build()?;
///     batched.call(1)?;
///     tokio::time::sleep(Duration::from_millis(15)).await;
/// }).await;
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioScheduler;

impl TokioScheduler {
    /// Create a scheduler bound to the current `LocalSet`.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Create a scheduler, checking that a Tokio runtime is running.
    ///
    /// # Errors
    ///
    /// [`BatchError::NoRuntime`] when called outside a runtime.
    pub fn try_current() -> Result<Self, BatchError> {
        match tokio::runtime::Handle::try_current() {
            Ok(_) => Ok(Self),
            Err(err) => {
                tracing::debug!(error = %err, "no tokio runtime for the default scheduler");
                Err(BatchError::NoRuntime)
            }
        }
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: Task) -> TimerHandle {
        let join = tokio::task::spawn_local(async move {
            tokio::time::sleep(delay).await;
            task();
        });
        TimerHandle::new(move || join.abort())
    }
}
