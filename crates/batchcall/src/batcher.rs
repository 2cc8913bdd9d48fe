#![forbid(unsafe_code)]

//! The batching wrapper.
//!
//! A [`Batcher<T, E>`] accepts calls carrying an argument tuple `T` and hands
//! every tuple collected during one window to the sink as a single `Vec<T>`.
//!
//! # State machine
//!
//! The wrapper alternates between two states for its whole life:
//!
//! - **idle**: empty buffer, no timer armed.
//! - **accumulating**: non-empty buffer, one timer armed for the current cycle.
//!
//! The first call of a cycle arms the timer. The cycle ends through exactly one
//! of: the timer firing, a call pushing the count past the limit, a manual
//! [`flush`](Batcher::flush), or [`clear`](Batcher::clear). Whichever path ends
//! the cycle cancels the timer and bumps the cycle generation, so a timer that
//! was already in flight sees a stale generation and does nothing.
//!
//! # Invariants
//!
//! 1. `len()` equals the number of calls since the last flush or clear.
//! 2. Outside the sink, a timer is armed iff the buffer is non-empty.
//! 3. The sink runs at most once per cycle.
//! 4. Entries reach the sink in call order.
//! 5. State is reset before the sink runs, so a failing or panicking sink never
//!    leaves entries behind for the next cycle.
//!
//! # Failure Modes
//!
//! - Sink error on `call`/`flush`: returned to that caller unchanged.
//! - Sink error on the timer path: passed to the `on_timer_error` hook, which
//!   logs at `warn` by default.
//! - Flush requested from inside the sink: deferred. The entries stay buffered
//!   and a timer is armed for them once the sink returns, so a sink that drives
//!   the scheduler itself cannot spin on a zero interval.

use std::cell::RefCell;
use std::convert::Infallible;
use std::fmt;
use std::mem;
use std::rc::Rc;
use std::time::Duration;

use web_time::Instant;

use crate::error::{BatchError, InvalidArgument};
use crate::policy::{BatchPolicy, interval_from_millis, limit_from_f64};
use crate::scheduler::{Scheduler, TimerHandle, TokioScheduler};

type SinkFn<T, E> = Box<dyn FnMut(Vec<T>) -> Result<(), E> + 'static>;
type ErrorHook<E> = Box<dyn FnMut(E) + 'static>;

/// What ended a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlushReason {
    /// The interval elapsed.
    Timer,
    /// The call count exceeded the limit.
    Limit,
    /// [`Batcher::flush`] was called.
    Manual,
    /// The last handle was dropped with entries still buffered.
    Drop,
}

impl FlushReason {
    /// Stable lowercase name, used in log fields.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Timer => "timer",
            Self::Limit => "limit",
            Self::Manual => "manual",
            Self::Drop => "drop",
        }
    }
}

impl fmt::Display for FlushReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifetime counters for one batcher.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    /// Flushes triggered by the interval timer.
    pub timer_flushes: u64,
    /// Flushes forced by the limit.
    pub limit_flushes: u64,
    /// Flushes requested through [`Batcher::flush`].
    pub manual_flushes: u64,
    /// Entries handed to the sink.
    pub delivered: u64,
    /// Entries discarded by [`Batcher::clear`].
    pub cleared: u64,
}

impl BatchStats {
    /// Timer, limit and manual flushes combined.
    ///
    /// Delivery on drop calls the sink too, but happens after the last handle
    /// is gone, so no counter can observe it.
    #[must_use]
    pub const fn flushes(&self) -> u64 {
        self.timer_flushes + self.limit_flushes + self.manual_flushes
    }

    fn record(&mut self, reason: FlushReason, size: usize) {
        match reason {
            FlushReason::Timer => self.timer_flushes += 1,
            FlushReason::Limit => self.limit_flushes += 1,
            FlushReason::Manual => self.manual_flushes += 1,
            FlushReason::Drop => {}
        }
        self.delivered += size as u64;
    }
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

struct State<T> {
    buffer: Vec<T>,
    pending: Option<TimerHandle>,
    cycle: u64,
    started: Option<Instant>,
    stats: BatchStats,
}

struct Shared<T, E> {
    state: RefCell<State<T>>,
    sink: RefCell<SinkFn<T, E>>,
    on_timer_error: RefCell<ErrorHook<E>>,
    scheduler: Rc<dyn Scheduler>,
    interval: Duration,
    limit: Option<usize>,
}

impl<T: 'static, E: 'static> Shared<T, E> {
    fn arm(this: &Rc<Self>) {
        let cycle = this.state.borrow().cycle;
        let weak = Rc::downgrade(this);
        let handle = this.scheduler.schedule(
            this.interval,
            Box::new(move || {
                if let Some(shared) = weak.upgrade() {
                    Self::fire(&shared, cycle);
                }
            }),
        );
        let previous = this.state.borrow_mut().pending.replace(handle);
        debug_assert!(previous.is_none(), "timer armed twice in one cycle");
        if let Some(previous) = previous {
            previous.cancel();
        }
    }

    fn ensure_armed(this: &Rc<Self>) {
        let needs_timer = {
            let state = this.state.borrow();
            !state.buffer.is_empty() && state.pending.is_none()
        };
        if needs_timer {
            Self::arm(this);
        }
    }

    fn fire(this: &Rc<Self>, cycle: u64) {
        {
            let mut state = this.state.borrow_mut();
            if state.cycle != cycle || state.pending.is_none() {
                tracing::trace!(cycle, "ignoring stale batch timer");
                return;
            }
            // This timer is the one running; nothing left to cancel.
            state.pending = None;
        }
        if let Err(err) = Self::flush(this, FlushReason::Timer) {
            this.report(err);
        }
    }

    fn flush(this: &Rc<Self>, reason: FlushReason) -> Result<(), E> {
        let Ok(mut sink) = this.sink.try_borrow_mut() else {
            // The running flush arms a timer for these entries once the sink returns.
            tracing::debug!(%reason, "flush requested from inside the sink, deferring");
            return Ok(());
        };
        let (batch, timer, started) = {
            let mut state = this.state.borrow_mut();
            state.cycle = state.cycle.wrapping_add(1);
            let size = state.buffer.len();
            state.stats.record(reason, size);
            (
                mem::take(&mut state.buffer),
                state.pending.take(),
                state.started.take(),
            )
        };
        if let Some(timer) = timer {
            timer.cancel();
        }
        tracing::debug!(
            %reason,
            size = batch.len(),
            age_ms = started.map_or(0.0, |t| t.elapsed().as_secs_f64() * 1000.0),
            "flushing batch"
        );
        let result = (&mut **sink)(batch);
        drop(sink);
        Self::ensure_armed(this);
        result
    }

    fn report(&self, err: E) {
        match self.on_timer_error.try_borrow_mut() {
            Ok(mut hook) => (&mut **hook)(err),
            Err(_) => tracing::warn!("sink failed during timer flush while the error hook was busy"),
        }
    }
}

impl<T, E> Drop for Shared<T, E> {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if let Some(timer) = state.pending.take() {
            timer.cancel();
        }
        if state.buffer.is_empty() || std::thread::panicking() {
            return;
        }
        let batch = mem::take(&mut state.buffer);
        state.stats.record(FlushReason::Drop, batch.len());
        tracing::debug!(reason = %FlushReason::Drop, size = batch.len(), "flushing batch");
        if let Err(err) = (&mut **self.sink.get_mut())(batch) {
            (&mut **self.on_timer_error.get_mut())(err);
        }
    }
}

// ---------------------------------------------------------------------------
// Batcher
// ---------------------------------------------------------------------------

/// Collects calls and delivers them to a sink in batches.
///
/// Handles are cheap to clone and share one buffer and timer. When the last
/// handle is dropped, any buffered entries are delivered immediately.
pub struct Batcher<T, E = Infallible> {
    shared: Rc<Shared<T, E>>,
}

impl<T, E> Clone for Batcher<T, E> {
    fn clone(&self) -> Self {
        Self {
            shared: Rc::clone(&self.shared),
        }
    }
}

impl<T, E> fmt::Debug for Batcher<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.borrow();
        f.debug_struct("Batcher")
            .field("len", &state.buffer.len())
            .field("pending", &state.pending.is_some())
            .field("interval", &self.shared.interval)
            .field("limit", &self.shared.limit)
            .finish()
    }
}

impl<T: 'static> Batcher<T, Infallible> {
    /// Start building a batcher around an infallible sink.
    pub fn from_fn(mut sink: impl FnMut(Vec<T>) + 'static) -> BatcherBuilder<T, Infallible> {
        BatcherBuilder::new().sink(move |batch| {
            sink(batch);
            Ok(())
        })
    }
}

impl<T: 'static, E: fmt::Display + 'static> Batcher<T, E> {
    /// Start building a batcher.
    #[must_use]
    pub fn builder() -> BatcherBuilder<T, E> {
        BatcherBuilder::new()
    }
}

impl<T: 'static, E: 'static> Batcher<T, E> {
    /// Record one call.
    ///
    /// The first call of a cycle arms the interval timer. A call that pushes
    /// the count past the limit flushes synchronously before returning.
    ///
    /// # Errors
    ///
    /// Returns the sink's error if this call forced a flush and the sink failed.
    pub fn call(&self, args: T) -> Result<(), E> {
        let (count, overflow) = {
            let mut state = self.shared.state.borrow_mut();
            state.buffer.push(args);
            let count = state.buffer.len();
            if count == 1 {
                state.started = Some(Instant::now());
            }
            (count, self.shared.limit.is_some_and(|limit| count > limit))
        };
        tracing::trace!(count, "batched call");

        if overflow {
            return Shared::flush(&self.shared, FlushReason::Limit);
        }
        if count == 1 {
            Shared::arm(&self.shared);
        }
        Ok(())
    }

    /// Deliver the current batch now and start a new cycle.
    ///
    /// The sink is invoked even when the buffer is empty.
    ///
    /// # Errors
    ///
    /// Returns the sink's error unchanged. State is already reset by then.
    pub fn flush(&self) -> Result<(), E> {
        Shared::flush(&self.shared, FlushReason::Manual)
    }

    /// Discard the current batch without invoking the sink.
    pub fn clear(&self) {
        let (discarded, timer) = {
            let mut state = self.shared.state.borrow_mut();
            state.cycle = state.cycle.wrapping_add(1);
            state.started = None;
            let discarded = mem::take(&mut state.buffer);
            state.stats.cleared += discarded.len() as u64;
            (discarded, state.pending.take())
        };
        if let Some(timer) = timer {
            timer.cancel();
        }
        tracing::debug!(discarded = discarded.len(), "cleared batch");
    }

    /// A closure that records calls on this batcher.
    pub fn caller(&self) -> impl Fn(T) -> Result<(), E> + 'static {
        let batcher = self.clone();
        move |args| batcher.call(args)
    }
}

impl<T, E> Batcher<T, E> {
    /// Number of calls collected in the current cycle.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.state.borrow().buffer.len()
    }

    /// Whether the current cycle is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shared.state.borrow().buffer.is_empty()
    }

    /// Whether a timer is armed for the current cycle.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.shared.state.borrow().pending.is_some()
    }

    /// Window length.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.shared.interval
    }

    /// Call cap per cycle, `None` when unbounded.
    #[must_use]
    pub fn limit(&self) -> Option<usize> {
        self.shared.limit
    }

    /// Counters since construction.
    #[must_use]
    pub fn stats(&self) -> BatchStats {
        self.shared.state.borrow().stats
    }
}

// ---------------------------------------------------------------------------
// Construction
// ---------------------------------------------------------------------------

/// Options for [`batch`].
#[derive(Clone, Default)]
pub struct BatchOptions {
    /// Call cap per cycle, `None` when unbounded.
    pub limit: Option<usize>,
    /// Timer source, [`TokioScheduler`] when `None`.
    pub scheduler: Option<Rc<dyn Scheduler>>,
}

impl BatchOptions {
    /// Set the call cap.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Set the timer source.
    #[must_use]
    pub fn scheduler(mut self, scheduler: impl Scheduler + 'static) -> Self {
        self.scheduler = Some(Rc::new(scheduler));
        self
    }
}

impl fmt::Debug for BatchOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchOptions")
            .field("limit", &self.limit)
            .field("custom_scheduler", &self.scheduler.is_some())
            .finish()
    }
}

/// Wrap `sink` so that calls made within `interval` reach it as one batch.
///
/// With `options.scheduler` unset, timers run on [`TokioScheduler`], so the
/// batcher must be built and called inside a [`tokio::task::LocalSet`].
///
/// # Errors
///
/// [`BatchError::NoRuntime`] if the default scheduler was selected outside a
/// Tokio runtime. See [`BatcherBuilder::build`].
pub fn batch<T, E, F>(
    sink: F,
    interval: Duration,
    options: BatchOptions,
) -> Result<Batcher<T, E>, BatchError>
where
    T: 'static,
    E: fmt::Display + 'static,
    F: FnMut(Vec<T>) -> Result<(), E> + 'static,
{
    let mut builder = BatcherBuilder::new().sink(sink).interval(interval);
    if let Some(limit) = options.limit {
        builder = builder.limit(limit);
    }
    builder.scheduler = options.scheduler;
    builder.build()
}

/// Builder for [`Batcher`]. Arguments are validated by [`build`](Self::build).
pub struct BatcherBuilder<T, E = Infallible> {
    sink: Option<SinkFn<T, E>>,
    interval: Result<Duration, InvalidArgument>,
    limit: Result<Option<usize>, InvalidArgument>,
    scheduler: Option<Rc<dyn Scheduler>>,
    on_timer_error: Option<ErrorHook<E>>,
}

impl<T, E> fmt::Debug for BatcherBuilder<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatcherBuilder")
            .field("has_sink", &self.sink.is_some())
            .field("interval", &self.interval)
            .field("limit", &self.limit)
            .field("custom_scheduler", &self.scheduler.is_some())
            .finish()
    }
}

impl<T: 'static, E: fmt::Display + 'static> Default for BatcherBuilder<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static, E: fmt::Display + 'static> BatcherBuilder<T, E> {
    /// Zero interval, no limit, no sink yet.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sink: None,
            interval: Ok(Duration::ZERO),
            limit: Ok(None),
            scheduler: None,
            on_timer_error: None,
        }
    }

    /// Set the sink that receives each batch.
    #[must_use]
    pub fn sink(mut self, sink: impl FnMut(Vec<T>) -> Result<(), E> + 'static) -> Self {
        self.sink = Some(Box::new(sink));
        self
    }

    /// Set the window length.
    #[must_use]
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = Ok(interval);
        self
    }

    /// Set the window length in milliseconds.
    #[must_use]
    pub fn interval_ms(mut self, ms: f64) -> Self {
        self.interval = interval_from_millis(ms);
        self
    }

    /// Cap the calls accepted per cycle; call `limit + 1` flushes immediately.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Ok(Some(limit));
        self
    }

    /// Cap the calls per cycle from a numeric value.
    ///
    /// The value must be finite and non-negative; leave the limit unset for no cap.
    #[must_use]
    pub fn limit_f64(mut self, limit: f64) -> Self {
        self.limit = limit_from_f64(limit).map(Some);
        self
    }

    /// Take interval and limit from a policy.
    #[must_use]
    pub fn policy(mut self, policy: BatchPolicy) -> Self {
        self.interval = interval_from_millis(policy.interval_ms);
        self.limit = policy.limit.map(limit_from_f64).transpose();
        self
    }

    /// Set the timer source. Defaults to [`TokioScheduler`].
    #[must_use]
    pub fn scheduler(mut self, scheduler: impl Scheduler + 'static) -> Self {
        self.scheduler = Some(Rc::new(scheduler));
        self
    }

    /// Handle sink errors raised on the timer path, where no caller is waiting.
    ///
    /// Without a hook they are logged at `warn`.
    #[must_use]
    pub fn on_timer_error(mut self, hook: impl FnMut(E) + 'static) -> Self {
        self.on_timer_error = Some(Box::new(hook));
        self
    }

    /// Validate the arguments and create the batcher.
    ///
    /// Without an explicit [`scheduler`](Self::scheduler) the batcher uses
    /// [`TokioScheduler`], which must be driven from inside a
    /// [`tokio::task::LocalSet`]. Building outside any Tokio runtime fails;
    /// calling from a runtime thread that is not inside a `LocalSet` panics
    /// on the first call, as `spawn_local` does.
    ///
    /// # Errors
    ///
    /// [`BatchError::InvalidArgument`] with, in checking order,
    /// [`InvalidArgument::Sink`], [`InvalidArgument::Interval`] or
    /// [`InvalidArgument::Limit`]. Then [`BatchError::NoRuntime`] if the
    /// default scheduler was selected and no Tokio runtime is running.
    pub fn build(self) -> Result<Batcher<T, E>, BatchError> {
        let sink = self.sink.ok_or(InvalidArgument::Sink)?;
        let interval = self.interval?;
        let limit = self.limit?;
        let scheduler: Rc<dyn Scheduler> = match self.scheduler {
            Some(scheduler) => scheduler,
            None => Rc::new(TokioScheduler::try_current()?),
        };
        let on_timer_error: ErrorHook<E> = match self.on_timer_error {
            Some(hook) => hook,
            None => Box::new(|err: E| {
                tracing::warn!(error = %err, "sink failed during timer flush");
            }),
        };

        tracing::debug!(?interval, ?limit, "created batcher");
        Ok(Batcher {
            shared: Rc::new(Shared {
                state: RefCell::new(State {
                    buffer: Vec::new(),
                    pending: None,
                    cycle: 0,
                    started: None,
                    stats: BatchStats::default(),
                }),
                sink: RefCell::new(sink),
                on_timer_error: RefCell::new(on_timer_error),
                scheduler,
                interval,
                limit,
            }),
        })
    }
}
