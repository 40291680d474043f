//! Rate limiters for Conduit pipelines.
//!
//! Four interchangeable admission algorithms implement [`RateLimiter`]:
//!
//! | Algorithm | Type | State |
//! |-----------|------|-------|
//! | Token bucket | [`TokenBucket`] | token count, last refill |
//! | Leaky bucket | [`LeakyBucket`] | queue depth, last drain |
//! | Fixed window | [`FixedWindow`] | window index, admissions in window |
//! | Sliding window | [`SlidingWindow`] | timestamps of recent admissions |
//!
//! Every decision is a function of the instant passed to
//! [`RateLimiter::allow`]. State only moves forward in time: an instant
//! earlier than one already seen never refills, drains, or reopens anything.
//! The two buckets can additionally run a background [`Ticker`] that refills
//! or drains at their fixed tick while no requests arrive.
//!
//! Around the algorithms:
//!
//! - [`LimiterConfig`] describes a limiter in serialisable form and builds it;
//! - [`PerKey`] keeps an independent limiter per key (per user, per tenant);
//! - [`Throttled`] wraps a [`pipeline::Transform`] so a stage consults a
//!   limiter before admitting each item.

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

mod accrual;
pub mod config;
pub mod fixed_window;
pub mod keyed;
pub mod leaky_bucket;
pub mod sliding_window;
pub mod throttle;
pub mod ticker;
pub mod token_bucket;

pub use config::{Limiter, LimiterConfig};
pub use fixed_window::FixedWindow;
pub use keyed::PerKey;
pub use leaky_bucket::LeakyBucket;
pub use sliding_window::SlidingWindow;
pub use throttle::{throttle, ThrottleMode, Throttled};
pub use ticker::Ticker;
pub use token_bucket::TokenBucket;

/// Which admission algorithm a limiter runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    TokenBucket,
    LeakyBucket,
    FixedWindow,
    SlidingWindow,
}

impl std::fmt::Display for Algorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Algorithm::TokenBucket => "token_bucket",
            Algorithm::LeakyBucket => "leaky_bucket",
            Algorithm::FixedWindow => "fixed_window",
            Algorithm::SlidingWindow => "sliding_window",
        };
        f.write_str(name)
    }
}

/// An admission decision function.
///
/// Implementations are thread-safe and never block: a denied request is
/// reported immediately, never queued.
pub trait RateLimiter: Send + Sync {
    /// Decides whether a request arriving at `at` is admitted, recording the
    /// admission if so.
    fn allow(&self, at: Instant) -> bool;

    /// [`allow`](Self::allow) at the current instant.
    fn allow_now(&self) -> bool {
        self.allow(Instant::now())
    }

    fn algorithm(&self) -> Algorithm;
}

impl std::fmt::Debug for dyn RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("algorithm", &self.algorithm())
            .finish_non_exhaustive()
    }
}
