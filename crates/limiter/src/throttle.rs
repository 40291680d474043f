//! Rate-limited transforms.
//!
//! [`Throttled`] consults a limiter before handing each item to the wrapped
//! transform. Put it in a [`pipeline::Stage`] for a throttled stage, or pass
//! it to [`pipeline::dispatch`] for a pool of rate-limited workers sharing one
//! budget.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pipeline::{ProcessingError, Transform};
use tracing::trace;

use crate::RateLimiter;

const MIN_POLL: Duration = Duration::from_millis(1);

/// What happens to an item the limiter denies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThrottleMode {
    /// Drop the item; the stage moves on to the next one.
    #[default]
    Drop,
    /// Re-check every `poll` until admitted. The wait is a suspension point
    /// of the stage and stops when its context fires.
    Wait { poll: Duration },
}

pub struct Throttled<X> {
    limiter: Arc<dyn RateLimiter>,
    inner: X,
    mode: ThrottleMode,
}

/// Wraps `inner` so every item must first be admitted by `limiter`.
pub fn throttle<X>(limiter: Arc<dyn RateLimiter>, inner: X, mode: ThrottleMode) -> Throttled<X> {
    Throttled {
        limiter,
        inner,
        mode,
    }
}

impl<X> Throttled<X> {
    pub fn mode(&self) -> ThrottleMode {
        self.mode
    }
}

#[async_trait]
impl<T, U, X> Transform<T, U> for Throttled<X>
where
    T: Send + 'static,
    U: Send + 'static,
    X: Transform<T, U>,
{
    async fn apply(&self, item: T) -> Result<Option<U>, ProcessingError> {
        match self.mode {
            ThrottleMode::Drop => {
                if !self.limiter.allow_now() {
                    trace!(algorithm = %self.limiter.algorithm(), "item dropped by rate limiter");
                    return Ok(None);
                }
            }
            ThrottleMode::Wait { poll } => {
                let poll = poll.max(MIN_POLL);
                while !self.limiter.allow_now() {
                    tokio::time::sleep(poll).await;
                }
            }
        }
        self.inner.apply(item).await
    }
}

impl<X> std::fmt::Debug for Throttled<X> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Throttled")
            .field("algorithm", &self.limiter.algorithm())
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use pipeline::{dispatch, map, Context, PipelineError, Sequence, Stage};

    use super::*;
    use crate::{FixedWindow, TokenBucket};

    #[tokio::test]
    async fn drop_mode_filters_denied_items() {
        let ctx = Context::background();
        let limiter = Arc::new(TokenBucket::new(1, 3).unwrap());
        let stage = Stage::new("throttled", throttle(limiter, map(|x: u32| x), ThrottleMode::Drop));

        let out = stage
            .run(&ctx, Sequence::generate(&ctx, 0..10u32))
            .collect()
            .await
            .unwrap();
        assert_eq!(out, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn rate_limited_workers_process_every_job() {
        let ctx = Context::background();
        let limiter = Arc::new(TokenBucket::new(100, 10).unwrap());
        let work = throttle(
            limiter,
            map(|x: u32| x * 10),
            ThrottleMode::Wait {
                poll: Duration::from_millis(5),
            },
        );

        let results = dispatch(&ctx, Sequence::generate(&ctx, 0..10u32), 2, work).unwrap();
        let mut out = tokio::time::timeout(Duration::from_secs(2), results.collect())
            .await
            .expect("workers finished")
            .unwrap();
        out.sort_unstable();
        assert_eq!(out, (0..10).map(|x| x * 10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn wait_mode_paces_items_beyond_the_burst() {
        let ctx = Context::background();
        let limiter = Arc::new(FixedWindow::new(Duration::from_millis(50), 2).unwrap());
        let stage = Stage::new(
            "paced",
            throttle(
                limiter,
                map(|x: u32| x),
                ThrottleMode::Wait {
                    poll: Duration::from_millis(5),
                },
            ),
        );

        let started = tokio::time::Instant::now();
        let out = stage
            .run(&ctx, Sequence::generate(&ctx, 0..5u32))
            .collect()
            .await
            .unwrap();
        assert_eq!(out, vec![0, 1, 2, 3, 4]);
        assert!(started.elapsed() >= Duration::from_millis(90));
    }

    #[tokio::test]
    async fn waiting_stops_at_the_deadline() {
        let ctx = Context::with_timeout(Duration::from_millis(50));
        let limiter = Arc::new(TokenBucket::new(1, 1).unwrap());
        let stage = Stage::new(
            "starved",
            throttle(
                limiter,
                map(|x: u32| x),
                ThrottleMode::Wait {
                    poll: Duration::from_millis(5),
                },
            ),
        );

        let result = tokio::time::timeout(
            Duration::from_secs(1),
            stage.run(&ctx, Sequence::generate(&ctx, 0..3u32)).collect(),
        )
        .await
        .expect("stage stopped at the deadline");
        assert_eq!(result, Err(PipelineError::DeadlineExceeded));
    }
}
