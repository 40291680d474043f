//! Background refill/drain task for the bucket limiters.
//!
//! The ticker holds only a weak reference to its limiter: it stops when the
//! limiter is dropped, when its context fires, or when the [`Ticker`] handle
//! itself is dropped. It can never outlive the thing it maintains.

use std::sync::Arc;
use std::time::Duration;

use pipeline::Context;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, Instrument};

use crate::RateLimiter;

/// Shortest tick. Refill is time-based, so a coarser tick than `1 / rate`
/// only delays when idle accrual becomes visible, never changes it.
const MIN_PERIOD: Duration = Duration::from_millis(1);

/// State that advances with time, independent of requests.
pub(crate) trait Tick: RateLimiter + 'static {
    fn tick(&self, at: Instant);
}

/// Handle to a running background ticker. Dropping it stops the task.
#[derive(Debug)]
pub struct Ticker {
    handle: JoinHandle<()>,
}

impl Ticker {
    pub(crate) fn spawn<L: Tick>(limiter: &Arc<L>, period: Duration, ctx: &Context) -> Self {
        let period = period.max(MIN_PERIOD);
        let weak = Arc::downgrade(limiter);
        let span = tracing::debug_span!(
            "ticker",
            algorithm = %limiter.algorithm(),
            period_us = period.as_micros() as u64,
            context = %ctx.id()
        );
        let ctx = ctx.clone();

        let handle = tokio::spawn(
            async move {
                let mut interval = tokio::time::interval_at(Instant::now() + period, period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    let Ok(at) = ctx.race(interval.tick()).await else {
                        debug!("ticker stopped by context");
                        return;
                    };
                    let Some(limiter) = weak.upgrade() else {
                        debug!("limiter dropped, ticker stopped");
                        return;
                    };
                    limiter.tick(at);
                }
            }
            .instrument(span),
        );
        Self { handle }
    }

    /// Returns `true` once the background task has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stops the background task.
    pub fn stop(self) {
        drop(self);
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
