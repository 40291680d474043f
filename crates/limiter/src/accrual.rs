//! Exact time-to-events conversion for the bucket limiters.
//!
//! Events accrue at `rate` per second. Instead of stepping a clock by a
//! rounded `1 / rate` interval, the fractional event left over from each
//! conversion is carried in units of nanosecond-events, so no elapsed time is
//! ever counted twice or lost, whatever the rate.

use pipeline::Rate;
use tokio::time::Instant;

const NANOS_PER_SECOND: u128 = 1_000_000_000;

#[derive(Debug)]
pub(crate) struct Accrual {
    since: Instant,
    /// Partial event, in nanosecond-events (`< NANOS_PER_SECOND`).
    carry: u128,
}

impl Accrual {
    pub(crate) fn starting_at(origin: Instant) -> Self {
        Self {
            since: origin,
            carry: 0,
        }
    }

    /// Whole events accrued between the last call and `at`. Instants at or
    /// before the last one seen accrue nothing and leave the state untouched.
    pub(crate) fn advance(&mut self, rate: Rate, at: Instant) -> u128 {
        if at <= self.since {
            return 0;
        }
        let elapsed = at.duration_since(self.since).as_nanos();
        let units = elapsed * u128::from(rate.get()) + self.carry;
        self.since = at;
        self.carry = units % NANOS_PER_SECOND;
        units / NANOS_PER_SECOND
    }

    /// Drops any partial event, e.g. once a bucket is full or empty and the
    /// surplus has nowhere to go.
    pub(crate) fn discard_partial(&mut self) {
        self.carry = 0;
    }
}
