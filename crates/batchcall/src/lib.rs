#![forbid(unsafe_code)]

//! Call batching for single-threaded event loops.
//!
//! [`Batcher`] wraps a sink `FnMut(Vec<T>)` and returns a handle that records
//! calls. Every call made during one interval window reaches the sink as a
//! single batch, in call order. An optional limit forces an early flush once a
//! cycle has seen more than `limit` calls.
//!
//! ```ignore
//! use std::time::Duration;
//! use batchcall::{Batcher, ManualScheduler};
//!
//! let clock = ManualScheduler::new();
//! let commits = Batcher::from_fn(|batch: Vec<(u32, &str)>| println!("commit {batch:?}"))
//!     .interval(Duration::from_millis(16))
//!     .limit(64)
//!     .scheduler(clock.clone())
//!     .build()?;
//!
//! commits.call((1, "a"))?;
//! commits.call((2, "b"))?;
//! clock.advance(Duration::from_millis(16)); // commit [(1, "a"), (2, "b")]
//! ```
//!
//! # Modules
//!
//! - [`batcher`]: the wrapper, its builder and the [`batch`] constructor.
//! - [`scheduler`]: the one-shot timer seam with Tokio and virtual-clock drivers.
//! - [`policy`]: interval/limit as validated data, loadable from TOML/JSON with
//!   the `policy-config` feature.
//! - [`error`]: construction errors.

pub mod batcher;
pub mod error;
pub mod policy;
pub mod scheduler;

pub use batcher::{BatchOptions, BatchStats, Batcher, BatcherBuilder, FlushReason, batch};
pub use error::{BatchError, InvalidArgument};
pub use policy::{BatchPolicy, ValidatedPolicy};
pub use scheduler::{ManualScheduler, Scheduler, Task, TimerHandle, TokioScheduler};
