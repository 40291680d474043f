//! Token bucket: bursts up to `capacity`, sustained throughput of `rate`.
//!
//! One token is earned every `1 / rate` seconds, up to `capacity`; each
//! admission spends one. The bucket starts full. Tokens are computed from
//! elapsed time on every check, and the optional [`Ticker`] performs the same
//! refill on a fixed tick so the count stays current while idle. Because
//! refill is time-based, ticker and checks never double-count.

use std::sync::Arc;

use parking_lot::Mutex;
use pipeline::{Capacity, Context, PipelineError, Rate};
use tokio::time::Instant;
use tracing::trace;

use crate::accrual::Accrual;
use crate::ticker::{Tick, Ticker};
use crate::{Algorithm, RateLimiter};

#[derive(Debug)]
pub struct TokenBucket {
    rate: Rate,
    capacity: Capacity,
    state: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    tokens: u32,
    refill: Accrual,
}

impl TokenBucket {
    /// Validates `rate` (tokens per second) and `capacity`, and returns a
    /// full bucket.
    pub fn new(rate: i64, capacity: i64) -> Result<Self, PipelineError> {
        Ok(Self::from_parts(
            Rate::per_second(rate)?,
            Capacity::new(capacity)?,
            Instant::now(),
        ))
    }

    /// A full bucket whose refill clock starts at `origin`.
    pub fn from_parts(rate: Rate, capacity: Capacity, origin: Instant) -> Self {
        Self {
            rate,
            capacity,
            state: Mutex::new(BucketState {
                tokens: capacity.get(),
                refill: Accrual::starting_at(origin),
            }),
        }
    }

    pub fn rate(&self) -> Rate {
        self.rate
    }

    pub fn capacity(&self) -> Capacity {
        self.capacity
    }

    /// Tokens currently in the bucket, as of the last check or tick.
    pub fn tokens(&self) -> u32 {
        self.state.lock().tokens
    }

    /// Starts the background refill task at one tick per `1 / rate`, or per
    /// millisecond for faster rates.
    pub fn spawn_ticker(self: &Arc<Self>, ctx: &Context) -> Ticker {
        Ticker::spawn(self, self.rate.interval(), ctx)
    }

    fn refill(&self, state: &mut BucketState, at: Instant) {
        let earned = state.refill.advance(self.rate, at);
        let room = u128::from(self.capacity.get() - state.tokens);
        if earned >= room {
            // Nothing accumulates past capacity, not even a partial token.
            state.tokens = self.capacity.get();
            state.refill.discard_partial();
        } else {
            // `earned < room <= u32::MAX`.
            state.tokens += earned as u32;
        }
    }
}

impl RateLimiter for TokenBucket {
    fn allow(&self, at: Instant) -> bool {
        let mut state = self.state.lock();
        self.refill(&mut state, at);
        if state.tokens > 0 {
            state.tokens -= 1;
            true
        } else {
            trace!(rate = %self.rate, "token bucket empty, request denied");
            false
        }
    }

    fn algorithm(&self) -> Algorithm {
        Algorithm::TokenBucket
    }
}

impl Tick for TokenBucket {
    fn tick(&self, at: Instant) {
        let mut state = self.state.lock();
        self.refill(&mut state, at);
    }
}
