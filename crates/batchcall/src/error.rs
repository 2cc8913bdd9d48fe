#![forbid(unsafe_code)]

//! Construction and configuration errors.
//!
//! Sink failures are not represented here: they keep the sink's own error type
//! and are returned unchanged from whichever operation triggered the flush.

use thiserror::Error;

/// A malformed constructor argument. Construction fails atomically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InvalidArgument {
    /// No sink was supplied.
    #[error("expected the sink to be a function")]
    Sink,

    /// The interval was negative, NaN or infinite.
    #[error("expected the interval to be a positive number")]
    Interval,

    /// The limit was negative, NaN or infinite.
    #[error("expected the limit option to be a positive number")]
    Limit,
}

/// Errors raised while constructing a [`Batcher`](crate::Batcher) or loading its policy.
#[derive(Debug, Error)]
pub enum BatchError {
    /// A constructor argument failed validation.
    #[error(transparent)]
    InvalidArgument(#[from] InvalidArgument),

    /// The default [`TokioScheduler`](crate::TokioScheduler) was selected
    /// outside a Tokio runtime.
    #[error("no Tokio runtime is running; build inside a LocalSet or pass a scheduler")]
    NoRuntime,

    /// The policy file could not be read.
    #[cfg(feature = "policy-config")]
    #[error("failed to read batch policy from {path}: {source}")]
    PolicyIo {
        /// Path that was being read.
        path: std::path::PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// The policy document could not be parsed.
    #[cfg(feature = "policy-config")]
    #[error("failed to parse batch policy: {0}")]
    PolicyParse(String),
}

impl BatchError {
    /// Returns the validation failure, if this error is one.
    #[must_use]
    pub const fn invalid_argument(&self) -> Option<InvalidArgument> {
        match self {
            Self::InvalidArgument(kind) => Some(*kind),
            _ => None,
        }
    }
}
