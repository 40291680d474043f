//! Leaky bucket: a bounded queue drained at a constant rate.
//!
//! Each admitted request occupies one slot of a queue holding at most `rate`
//! requests; one slot drains every `1 / rate` seconds, modelling constant-rate
//! processing. A request is admitted iff a slot is free when it arrives.

use std::sync::Arc;

use parking_lot::Mutex;
use pipeline::{Context, PipelineError, Rate};
use tokio::time::Instant;
use tracing::trace;

use crate::accrual::Accrual;
use crate::ticker::{Tick, Ticker};
use crate::{Algorithm, RateLimiter};

#[derive(Debug)]
pub struct LeakyBucket {
    rate: Rate,
    state: Mutex<QueueState>,
}

#[derive(Debug)]
struct QueueState {
    depth: u32,
    drain: Accrual,
}

impl LeakyBucket {
    /// Validates `rate`, which is both the drain rate per second and the
    /// queue bound, and returns an empty bucket.
    pub fn new(rate: i64) -> Result<Self, PipelineError> {
        Ok(Self::from_parts(Rate::per_second(rate)?, Instant::now()))
    }

    /// An empty bucket whose drain clock starts at `origin`.
    pub fn from_parts(rate: Rate, origin: Instant) -> Self {
        Self {
            rate,
            state: Mutex::new(QueueState {
                depth: 0,
                drain: Accrual::starting_at(origin),
            }),
        }
    }

    pub fn rate(&self) -> Rate {
        self.rate
    }

    /// Requests currently queued, as of the last check or tick.
    pub fn depth(&self) -> u32 {
        self.state.lock().depth
    }

    /// Starts the background drainer at one tick per `1 / rate`, or per
    /// millisecond for faster rates.
    pub fn spawn_ticker(self: &Arc<Self>, ctx: &Context) -> Ticker {
        Ticker::spawn(self, self.rate.interval(), ctx)
    }

    fn drain(&self, state: &mut QueueState, at: Instant) {
        let drained = state.drain.advance(self.rate, at);
        if drained >= u128::from(state.depth) {
            // Idle queue: the next request starts a fresh drain period.
            state.depth = 0;
            state.drain.discard_partial();
        } else {
            state.depth -= drained as u32;
        }
    }
}

impl RateLimiter for LeakyBucket {
    fn allow(&self, at: Instant) -> bool {
        let mut state = self.state.lock();
        self.drain(&mut state, at);
        if state.depth < self.rate.get() {
            state.depth += 1;
            true
        } else {
            trace!(rate = %self.rate, "leaky bucket full, request dropped");
            false
        }
    }

    fn algorithm(&self) -> Algorithm {
        Algorithm::LeakyBucket
    }
}

impl Tick for LeakyBucket {
    fn tick(&self, at: Instant) {
        let mut state = self.state.lock();
        self.drain(&mut state, at);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn bucket(rate: i64, origin: Instant) -> LeakyBucket {
        LeakyBucket::from_parts(Rate::per_second(rate).unwrap(), origin)
    }

    #[test]
    fn non_positive_rate_is_rejected() {
        assert!(LeakyBucket::new(0).is_err());
        assert!(LeakyBucket::new(-3).is_err());
    }

    #[test]
    fn queue_holds_at_most_rate_requests() {
        let t0 = Instant::now();
        let limiter = bucket(5, t0);
        assert!(limiter.allow(t0), "first request is accepted");

        let admitted = (0..10).filter(|_| limiter.allow(t0)).count();
        assert_eq!(admitted, 4);
        assert_eq!(limiter.depth(), 5);
    }

    #[test]
    fn drains_one_slot_per_interval() {
        let t0 = Instant::now();
        let limiter = bucket(5, t0);
        for _ in 0..5 {
            assert!(limiter.allow(t0));
        }

        assert!(!limiter.allow(t0 + Duration::from_millis(150)));
        assert!(limiter.allow(t0 + Duration::from_millis(200)));
        assert!(!limiter.allow(t0 + Duration::from_millis(200)));

        // A long pause empties the queue entirely.
        let later = t0 + Duration::from_secs(10);
        let admitted = (0..10).filter(|_| limiter.allow(later)).count();
        assert_eq!(admitted, 5);
    }

    #[test]
    fn fastest_rate_drains_elapsed_time_once() {
        let t0 = Instant::now();
        let limiter = bucket(1_000_000_000, t0);
        for _ in 0..10 {
            assert!(limiter.allow(t0));
        }

        // 3ns drain three slots; further ticks at that instant drain nothing.
        let at = t0 + Duration::from_nanos(3);
        for _ in 0..100 {
            limiter.tick(at);
        }
        assert_eq!(limiter.depth(), 7);
    }

    #[tokio::test]
    async fn ticker_drains_while_idle() {
        let ctx = Context::background();
        let limiter = Arc::new(bucket(100, Instant::now()));
        for _ in 0..3 {
            assert!(limiter.allow_now());
        }

        let _ticker = limiter.spawn_ticker(&ctx);
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(limiter.depth(), 0);
    }
}
