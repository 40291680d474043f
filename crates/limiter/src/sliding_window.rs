//! Sliding window: at most `max_requests` in any trailing `window`.
//!
//! The timestamps of admitted requests are kept oldest first. Each check
//! discards those that have fallen out of the trailing window, then admits iff
//! fewer than `max_requests` remain. No boundary burst, at the cost of
//! remembering up to `max_requests` timestamps.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use pipeline::{PipelineError, RequestLimit, WindowSize};
use tokio::time::Instant;
use tracing::trace;

use crate::{Algorithm, RateLimiter};

#[derive(Debug)]
pub struct SlidingWindow {
    window: WindowSize,
    max_requests: RequestLimit,
    admitted: Mutex<VecDeque<Instant>>,
}

impl SlidingWindow {
    /// Validates the window length and limit.
    pub fn new(window: Duration, max_requests: i64) -> Result<Self, PipelineError> {
        Ok(Self::from_parts(
            WindowSize::new(window)?,
            RequestLimit::new(max_requests)?,
        ))
    }

    pub fn from_parts(window: WindowSize, max_requests: RequestLimit) -> Self {
        Self {
            window,
            max_requests,
            admitted: Mutex::new(VecDeque::with_capacity(max_requests.get() as usize)),
        }
    }

    pub fn window(&self) -> WindowSize {
        self.window
    }

    /// Admissions still inside the window as of the last check.
    pub fn recorded(&self) -> usize {
        self.admitted.lock().len()
    }
}

impl RateLimiter for SlidingWindow {
    fn allow(&self, at: Instant) -> bool {
        let window = self.window.get();
        let mut admitted = self.admitted.lock();

        while admitted
            .front()
            .is_some_and(|oldest| at.saturating_duration_since(*oldest) >= window)
        {
            admitted.pop_front();
        }

        if admitted.len() >= self.max_requests.get() as usize {
            trace!(in_window = admitted.len(), "sliding window full, request denied");
            return false;
        }

        // Keep the queue sorted even if callers pass a slightly stale instant.
        let stamp = admitted.back().map_or(at, |newest| (*newest).max(at));
        admitted.push_back(stamp);
        true
    }

    fn algorithm(&self) -> Algorithm {
        Algorithm::SlidingWindow
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(window: Duration, max: i64) -> SlidingWindow {
        SlidingWindow::from_parts(WindowSize::new(window).unwrap(), RequestLimit::new(max).unwrap())
    }

    #[test]
    fn zero_window_is_rejected() {
        assert!(SlidingWindow::new(Duration::ZERO, 5).is_err());
    }

    #[test]
    fn expired_admissions_free_capacity() {
        let t0 = Instant::now();
        let limiter = limiter(Duration::from_secs(1), 5);

        for _ in 0..5 {
            assert!(limiter.allow(t0));
        }
        assert!(!limiter.allow(t0), "6th call at t=0 is denied");
        assert!(limiter.allow(t0 + Duration::from_millis(1_100)), "prior timestamps expired");
        assert_eq!(limiter.recorded(), 1);
    }

    #[test]
    fn no_burst_across_boundaries() {
        let t0 = Instant::now();
        let limiter = limiter(Duration::from_secs(1), 3);

        let late = t0 + Duration::from_millis(990);
        let early_next = t0 + Duration::from_millis(1_010);
        let admitted = (0..3).filter(|_| limiter.allow(late)).count()
            + (0..3).filter(|_| limiter.allow(early_next)).count();
        assert_eq!(admitted, 3);
    }

    #[test]
    fn window_slides_one_admission_at_a_time() {
        let t0 = Instant::now();
        let limiter = limiter(Duration::from_millis(100), 2);

        assert!(limiter.allow(t0));
        assert!(limiter.allow(t0 + Duration::from_millis(50)));
        assert!(!limiter.allow(t0 + Duration::from_millis(99)));
        assert!(limiter.allow(t0 + Duration::from_millis(100)));
        assert!(!limiter.allow(t0 + Duration::from_millis(140)));
        assert!(limiter.allow(t0 + Duration::from_millis(150)));
    }
}
