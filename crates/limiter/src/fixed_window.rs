//! Fixed window: at most `max_requests` per aligned window.
//!
//! Time is cut into consecutive windows of equal length starting at the
//! limiter's origin. Admissions are counted per window and the count resets
//! when a request falls into a later window. Simple and cheap, at the cost of
//! allowing up to twice the limit across a window boundary.

use std::time::Duration;

use parking_lot::Mutex;
use pipeline::{PipelineError, RequestLimit, WindowSize};
use tokio::time::Instant;
use tracing::trace;

use crate::{Algorithm, RateLimiter};

#[derive(Debug)]
pub struct FixedWindow {
    window: WindowSize,
    max_requests: RequestLimit,
    origin: Instant,
    state: Mutex<WindowState>,
}

#[derive(Debug)]
struct WindowState {
    index: u128,
    count: u32,
}

impl FixedWindow {
    /// Validates the window length and limit; windows start now.
    pub fn new(window: Duration, max_requests: i64) -> Result<Self, PipelineError> {
        Ok(Self::from_parts(
            WindowSize::new(window)?,
            RequestLimit::new(max_requests)?,
            Instant::now(),
        ))
    }

    /// A limiter whose first window starts at `origin`.
    pub fn from_parts(window: WindowSize, max_requests: RequestLimit, origin: Instant) -> Self {
        Self {
            window,
            max_requests,
            origin,
            state: Mutex::new(WindowState { index: 0, count: 0 }),
        }
    }

    pub fn window(&self) -> WindowSize {
        self.window
    }

    /// Admissions recorded in the current window.
    pub fn current_count(&self) -> u32 {
        self.state.lock().count
    }

    fn window_index(&self, at: Instant) -> u128 {
        at.saturating_duration_since(self.origin).as_nanos() / self.window.get().as_nanos()
    }
}

impl RateLimiter for FixedWindow {
    fn allow(&self, at: Instant) -> bool {
        let index = self.window_index(at);
        let mut state = self.state.lock();

        // Requests stamped in an earlier window count against the current one.
        if index > state.index {
            trace!(window = index as u64, "new rate-limit window");
            state.index = index;
            state.count = 0;
        }

        if state.count < self.max_requests.get() {
            state.count += 1;
            true
        } else {
            trace!(window = state.index as u64, "window limit reached, request denied");
            false
        }
    }

    fn algorithm(&self) -> Algorithm {
        Algorithm::FixedWindow
    }
}
