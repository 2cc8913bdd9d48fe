#![forbid(unsafe_code)]

//! Timing policy as data.
//!
//! A [`BatchPolicy`] carries the interval and limit as plain numbers, the way
//! they arrive from configuration files or foreign callers. [`BatchPolicy::validate`]
//! turns it into a [`ValidatedPolicy`] or rejects it with an [`InvalidArgument`].
//!
//! With the `policy-config` feature the policy can be read from TOML or JSON:
//!
//! ```toml
//! interval_ms = 16.0
//! limit = 64
//! ```
//!
//! # Validation
//!
//! - `interval_ms` must be finite and `>= 0`.
//! - `limit`, when present, must be finite and `>= 0`. Leave it out for no cap.
//!   Fractional limits behave like their floor, since a batch is forced once
//!   the call count exceeds the limit. Limits past `usize::MAX` saturate.

use std::time::Duration;

use crate::error::InvalidArgument;

/// Unvalidated timing policy.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "policy-config", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "policy-config", serde(default, deny_unknown_fields))]
pub struct BatchPolicy {
    /// Window length in milliseconds.
    pub interval_ms: f64,
    /// Maximum calls accepted in a cycle before a flush is forced.
    pub limit: Option<f64>,
}

/// A policy that passed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ValidatedPolicy {
    /// Window length.
    pub interval: Duration,
    /// Call cap, `None` when unbounded.
    pub limit: Option<usize>,
}

impl BatchPolicy {
    /// Create a policy with the given interval and no limit.
    #[must_use]
    pub const fn new(interval_ms: f64) -> Self {
        Self {
            interval_ms,
            limit: None,
        }
    }

    /// Set the limit.
    #[must_use]
    pub const fn with_limit(mut self, limit: f64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Check the interval and limit.
    ///
    /// # Errors
    ///
    /// - [`InvalidArgument::Interval`] for a negative, NaN or infinite interval.
    /// - [`InvalidArgument::Limit`] for a negative, NaN or infinite limit.
    pub fn validate(&self) -> Result<ValidatedPolicy, InvalidArgument> {
        Ok(ValidatedPolicy {
            interval: interval_from_millis(self.interval_ms)?,
            limit: self.limit.map(limit_from_f64).transpose()?,
        })
    }
}

/// Convert a millisecond count to a [`Duration`].
pub(crate) fn interval_from_millis(ms: f64) -> Result<Duration, InvalidArgument> {
    if !ms.is_finite() || ms < 0.0 {
        return Err(InvalidArgument::Interval);
    }
    let nanos = (ms * 1_000_000.0).round();
    if nanos >= u64::MAX as f64 {
        return Ok(Duration::from_nanos(u64::MAX));
    }
    Ok(Duration::from_nanos(nanos as u64))
}

/// Convert a supplied numeric limit to a call cap.
pub(crate) fn limit_from_f64(limit: f64) -> Result<usize, InvalidArgument> {
    if !limit.is_finite() || limit < 0.0 {
        return Err(InvalidArgument::Limit);
    }
    if limit >= usize::MAX as f64 {
        return Ok(usize::MAX);
    }
    Ok(limit.floor() as usize)
}

#[cfg(feature = "policy-config")]
mod config {
    use std::path::Path;

    use super::BatchPolicy;
    use crate::error::BatchError;

    impl BatchPolicy {
        /// Parse a policy from TOML.
        ///
        /// # Errors
        ///
        /// [`BatchError::PolicyParse`] if the document is malformed.
        pub fn from_toml_str(input: &str) -> Result<Self, BatchError> {
            toml::from_str(input).map_err(|err| BatchError::PolicyParse(err.to_string()))
        }

        /// Parse a policy from JSON.
        ///
        /// # Errors
        ///
        /// [`BatchError::PolicyParse`] if the document is malformed.
        pub fn from_json_str(input: &str) -> Result<Self, BatchError> {
            serde_json::from_str(input).map_err(|err| BatchError::PolicyParse(err.to_string()))
        }

        /// Load a policy file, choosing the format by extension (`.json`, else TOML).
        ///
        /// # Errors
        ///
        /// [`BatchError::PolicyIo`] if the file cannot be read,
        /// [`BatchError::PolicyParse`] if it cannot be parsed.
        pub fn load(path: impl AsRef<Path>) -> Result<Self, BatchError> {
            let path = path.as_ref();
            let input = std::fs::read_to_string(path).map_err(|source| BatchError::PolicyIo {
                path: path.to_path_buf(),
                source,
            })?;
            let is_json = path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
            let policy = if is_json {
                Self::from_json_str(&input)?
            } else {
                Self::from_toml_str(&input)?
            };
            tracing::debug!(path = %path.display(), ?policy, "loaded batch policy");
            Ok(policy)
        }
    }
}
