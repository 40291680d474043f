//! Validated parameter types.
//!
//! Every numeric parameter with a constraint is wrapped in a newtype whose
//! constructor rejects invalid values with
//! [`PipelineError::InvalidInput`]. Operations take these types (or validate
//! raw values through them), so a bad parameter is always reported at call
//! time and never reaches a spawned task.

use std::num::NonZeroUsize;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::PipelineError;

// ---------------------------------------------------------------------------
// Concurrency parameters
// ---------------------------------------------------------------------------

/// Number of workers in a fan-out pool. Always at least one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WorkerCount(NonZeroUsize);

impl WorkerCount {
    /// Validates a raw worker count.
    pub fn new(count: usize) -> Result<Self, PipelineError> {
        NonZeroUsize::new(count)
            .map(Self)
            .ok_or_else(|| PipelineError::invalid_input("worker_count", "must be at least 1"))
    }

    /// Returns the count.
    pub fn get(self) -> usize {
        self.0.get()
    }
}

impl std::fmt::Display for WorkerCount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------

/// Capacity of the bounded queue between two concurrent units.
///
/// A capacity of one is the closest equivalent of a synchronous handoff that
/// still lets an abandoned producer complete its last send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BufferSize(NonZeroUsize);

impl BufferSize {
    /// One-slot buffer.
    pub const ONE: Self = Self(NonZeroUsize::MIN);

    /// Validates a raw buffer capacity.
    pub fn new(capacity: usize) -> Result<Self, PipelineError> {
        NonZeroUsize::new(capacity)
            .map(Self)
            .ok_or_else(|| PipelineError::invalid_input("buffer", "must be at least 1"))
    }

    /// Returns the capacity.
    pub fn get(self) -> usize {
        self.0.get()
    }
}

impl Default for BufferSize {
    fn default() -> Self {
        Self::ONE
    }
}

// ---------------------------------------------------------------------------
// Rate-limiting parameters
// ---------------------------------------------------------------------------

/// Events per second: refill rate of a token bucket, drain rate and queue
/// bound of a leaky bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Rate(u32);

impl Rate {
    /// Fastest representable rate: one event per nanosecond.
    pub const MAX: u32 = 1_000_000_000;

    /// Validates a raw per-second rate. Zero, negative, and rates above
    /// [`Rate::MAX`] are rejected.
    pub fn per_second(rate: i64) -> Result<Self, PipelineError> {
        match u32::try_from(rate) {
            Ok(r) if r > 0 && r <= Self::MAX => Ok(Self(r)),
            _ => Err(PipelineError::invalid_input(
                "rate",
                format!(
                    "must be between 1 and {} events per second, got {rate}",
                    Self::MAX
                ),
            )),
        }
    }

    /// Returns the rate in events per second.
    pub fn get(self) -> u32 {
        self.0
    }

    /// Time between two consecutive events at this rate, rounded down to
    /// whole nanoseconds. Never zero.
    pub fn interval(self) -> Duration {
        Duration::from_secs(1) / self.0
    }
}

impl std::fmt::Display for Rate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/s", self.0)
    }
}

// ---------------------------------------------------------------------------

/// Maximum number of tokens a bucket can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Capacity(u32);

impl Capacity {
    /// Validates a raw capacity. Negative or zero capacities are rejected.
    pub fn new(capacity: i64) -> Result<Self, PipelineError> {
        match u32::try_from(capacity) {
            Ok(c) if c > 0 => Ok(Self(c)),
            _ => Err(PipelineError::invalid_input(
                "capacity",
                format!("must be positive, got {capacity}"),
            )),
        }
    }

    /// Returns the capacity.
    pub fn get(self) -> u32 {
        self.0
    }
}

// ---------------------------------------------------------------------------

/// Length of a fixed or sliding rate-limit window. Never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WindowSize(Duration);

impl WindowSize {
    /// Validates a window length.
    pub fn new(window: Duration) -> Result<Self, PipelineError> {
        if window.is_zero() {
            Err(PipelineError::invalid_input("window", "must be longer than zero"))
        } else {
            Ok(Self(window))
        }
    }

    /// Returns the window length.
    pub fn get(self) -> Duration {
        self.0
    }
}

// ---------------------------------------------------------------------------

/// Maximum number of admissions per window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RequestLimit(u32);

impl RequestLimit {
    /// Validates a per-window request limit.
    pub fn new(max_requests: i64) -> Result<Self, PipelineError> {
        match u32::try_from(max_requests) {
            Ok(m) if m > 0 => Ok(Self(m)),
            _ => Err(PipelineError::invalid_input(
                "max_requests",
                format!("must be positive, got {max_requests}"),
            )),
        }
    }

    /// Returns the limit.
    pub fn get(self) -> u32 {
        self.0
    }
}
