//! Error and retry-policy types for the pipeline core.
//!
//! [`PipelineError`] is the single error type returned by every operation in
//! this crate. It separates three families of failure:
//!
//! - **input constraints**: invalid parameters detected synchronously at call
//!   time ([`PipelineError::InvalidInput`]);
//! - **cancellation**: an operation stopped early because its [`Context`]
//!   fired ([`PipelineError::Cancelled`], [`PipelineError::DeadlineExceeded`]);
//! - **processing**: a caller-supplied transform failed and the stage was
//!   configured to abort ([`PipelineError::Processing`]).
//!
//! [`ProcessingError`] is what a [`Transform`] returns. The pipeline never
//! retries on its own; [`RetryPolicy`] is a hint for the caller.
//!
//! [`Context`]: crate::Context
//! [`Transform`]: crate::Transform

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::StageName;

// ---------------------------------------------------------------------------
// Retry semantics
// ---------------------------------------------------------------------------

/// Whether a failed operation is safe to retry and, if so, after what delay.
///
/// Nothing in this crate acts on the policy. It is surfaced so the caller can
/// decide between aborting, retrying, or ignoring the failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetryPolicy {
    /// The operation may be retried.
    Retryable {
        /// Minimum back-off before the next attempt. `None` leaves the
        /// schedule to the caller.
        after: Option<Duration>,
    },
    /// Retrying would fail the same way.
    NonRetryable,
}

// ---------------------------------------------------------------------------
// Transform failures
// ---------------------------------------------------------------------------

/// A failure raised by a caller-supplied [`Transform`](crate::Transform) for
/// one work item.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct ProcessingError {
    message: String,
    retry: RetryPolicy,
}

impl ProcessingError {
    /// Creates a non-retryable processing error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retry: RetryPolicy::NonRetryable,
        }
    }

    /// Creates a processing error the caller may retry after `after`.
    pub fn retryable(message: impl Into<String>, after: Option<Duration>) -> Self {
        Self {
            message: message.into(),
            retry: RetryPolicy::Retryable { after },
        }
    }

    /// Returns the human-readable failure description.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the retry hint attached by the transform.
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }
}

// ---------------------------------------------------------------------------
// Pipeline-level errors
// ---------------------------------------------------------------------------

/// Errors returned by pipeline, fan-out, fan-in and limiter operations.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum PipelineError {
    /// A call parameter violates its constraint (non-positive rate, zero
    /// workers, zero-length window, ...). Never recovered.
    #[error("Invalid input for `{parameter}`: {reason}")]
    InvalidInput {
        /// Name of the offending parameter.
        parameter: String,
        /// What the constraint is.
        reason: String,
    },

    /// The governing context was cancelled explicitly, or by its parent.
    #[error("Context cancelled")]
    Cancelled,

    /// The governing context reached its deadline.
    #[error("Deadline exceeded")]
    DeadlineExceeded,

    /// A transform failed on an item while its stage ran under
    /// [`ErrorPolicy::Abort`](crate::ErrorPolicy::Abort).
    #[error("Stage '{stage}' failed: {source}")]
    Processing {
        /// Stage whose transform failed.
        stage: StageName,
        /// The failure reported by the transform.
        source: ProcessingError,
    },

    /// A spawned stage task panicked or was aborted before reporting.
    #[error("Stage '{stage}' task failed: {message}")]
    TaskFailed {
        /// Stage whose task failed.
        stage: StageName,
        /// Description from the runtime.
        message: String,
    },
}

impl PipelineError {
    /// Builds an [`PipelineError::InvalidInput`].
    pub fn invalid_input(parameter: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            parameter: parameter.into(),
            reason: reason.into(),
        }
    }

    /// Returns `true` for the two cancellation variants.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled | Self::DeadlineExceeded)
    }

    /// Classifies the error for a caller deciding whether to re-run.
    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            Self::DeadlineExceeded => RetryPolicy::Retryable { after: None },
            Self::Processing { source, .. } => source.retry_policy().clone(),
            Self::InvalidInput { .. } | Self::Cancelled | Self::TaskFailed { .. } => {
                RetryPolicy::NonRetryable
            }
        }
    }
}
