//! Serialisable limiter descriptions.
//!
//! ```json
//! { "algorithm": "token_bucket", "rate": 5, "capacity": 10 }
//! { "algorithm": "leaky_bucket", "rate": 5 }
//! { "algorithm": "fixed_window", "window_ms": 1000, "max_requests": 5 }
//! { "algorithm": "sliding_window", "window_ms": 1000, "max_requests": 5 }
//! ```
//!
//! Values are validated when the limiter is built, not when parsed, so a
//! config with a zero rate deserialises fine and fails in [`LimiterConfig::build`].

use std::sync::Arc;
use std::time::Duration;

use pipeline::{Context, PipelineError};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

use crate::{
    Algorithm, FixedWindow, LeakyBucket, RateLimiter, SlidingWindow, Ticker, TokenBucket,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "snake_case")]
pub enum LimiterConfig {
    TokenBucket {
        rate: i64,
        capacity: i64,
    },
    LeakyBucket {
        rate: i64,
    },
    FixedWindow {
        window_ms: u64,
        max_requests: i64,
    },
    SlidingWindow {
        window_ms: u64,
        max_requests: i64,
    },
}

impl LimiterConfig {
    pub fn algorithm(&self) -> Algorithm {
        match self {
            LimiterConfig::TokenBucket { .. } => Algorithm::TokenBucket,
            LimiterConfig::LeakyBucket { .. } => Algorithm::LeakyBucket,
            LimiterConfig::FixedWindow { .. } => Algorithm::FixedWindow,
            LimiterConfig::SlidingWindow { .. } => Algorithm::SlidingWindow,
        }
    }

    /// Validates the parameters and builds the limiter.
    ///
    /// Bucket limiters get a background [`Ticker`] bound to `ctx`; it stops
    /// when `ctx` is cancelled or the returned [`Limiter`] is dropped.
    pub fn build(&self, ctx: &Context) -> Result<Limiter, PipelineError> {
        let limiter = match *self {
            LimiterConfig::TokenBucket { rate, capacity } => {
                let bucket = Arc::new(TokenBucket::new(rate, capacity)?);
                let ticker = bucket.spawn_ticker(ctx);
                Limiter::with_ticker(bucket, ticker)
            }
            LimiterConfig::LeakyBucket { rate } => {
                let bucket = Arc::new(LeakyBucket::new(rate)?);
                let ticker = bucket.spawn_ticker(ctx);
                Limiter::with_ticker(bucket, ticker)
            }
            LimiterConfig::FixedWindow {
                window_ms,
                max_requests,
            } => Limiter::new(Arc::new(FixedWindow::new(
                Duration::from_millis(window_ms),
                max_requests,
            )?)),
            LimiterConfig::SlidingWindow {
                window_ms,
                max_requests,
            } => Limiter::new(Arc::new(SlidingWindow::new(
                Duration::from_millis(window_ms),
                max_requests,
            )?)),
        };
        debug!(algorithm = %self.algorithm(), context = %ctx.id(), "rate limiter built");
        Ok(limiter)
    }
}

/// A built limiter and, for the buckets, its background ticker.
#[derive(Debug)]
pub struct Limiter {
    limiter: Arc<dyn RateLimiter>,
    ticker: Option<Ticker>,
}

impl Limiter {
    pub fn new(limiter: Arc<dyn RateLimiter>) -> Self {
        Self {
            limiter,
            ticker: None,
        }
    }

    pub fn with_ticker(limiter: Arc<dyn RateLimiter>, ticker: Ticker) -> Self {
        Self {
            limiter,
            ticker: Some(ticker),
        }
    }

    /// The underlying limiter, e.g. for [`throttle`](crate::throttle).
    ///
    /// The ticker keeps running only as long as this `Limiter` is alive.
    pub fn shared(&self) -> Arc<dyn RateLimiter> {
        Arc::clone(&self.limiter)
    }

    pub fn has_ticker(&self) -> bool {
        self.ticker.is_some()
    }
}

impl RateLimiter for Limiter {
    fn allow(&self, at: Instant) -> bool {
        self.limiter.allow(at)
    }

    fn algorithm(&self) -> Algorithm {
        self.limiter.algorithm()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> LimiterConfig {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn parses_every_algorithm() {
        assert_eq!(
            parse(r#"{"algorithm":"token_bucket","rate":5,"capacity":10}"#),
            LimiterConfig::TokenBucket {
                rate: 5,
                capacity: 10
            }
        );
        assert_eq!(
            parse(r#"{"algorithm":"leaky_bucket","rate":5}"#),
            LimiterConfig::LeakyBucket { rate: 5 }
        );
        assert_eq!(
            parse(r#"{"algorithm":"fixed_window","window_ms":1000,"max_requests":5}"#).algorithm(),
            Algorithm::FixedWindow
        );
        assert_eq!(
            parse(r#"{"algorithm":"sliding_window","window_ms":1000,"max_requests":5}"#)
                .algorithm(),
            Algorithm::SlidingWindow
        );
    }

    #[test]
    fn unknown_algorithm_fails_to_parse() {
        let result: Result<LimiterConfig, _> =
            serde_json::from_str(r#"{"algorithm":"gcra","rate":5}"#);
        assert!(result.is_err());
    }

    #[test]
    fn serialises_with_the_algorithm_tag() {
        let json = serde_json::to_value(LimiterConfig::LeakyBucket { rate: 3 }).unwrap();
        assert_eq!(json["algorithm"], "leaky_bucket");
        assert_eq!(json["rate"], 3);
    }

    #[tokio::test]
    async fn invalid_values_fail_at_build() {
        let ctx = Context::background();
        for config in [
            LimiterConfig::TokenBucket {
                rate: 0,
                capacity: 10,
            },
            LimiterConfig::LeakyBucket { rate: -1 },
            LimiterConfig::FixedWindow {
                window_ms: 0,
                max_requests: 5,
            },
            LimiterConfig::SlidingWindow {
                window_ms: 1000,
                max_requests: 0,
            },
        ] {
            assert!(
                matches!(config.build(&ctx), Err(PipelineError::InvalidInput { .. })),
                "{config:?} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn built_limiters_enforce_their_limits() {
        let ctx = Context::background();

        let bucket = parse(r#"{"algorithm":"token_bucket","rate":1,"capacity":2}"#)
            .build(&ctx)
            .unwrap();
        assert!(bucket.has_ticker());
        assert_eq!(bucket.algorithm(), Algorithm::TokenBucket);
        assert_eq!((0..5).filter(|_| bucket.allow_now()).count(), 2);

        let window = parse(r#"{"algorithm":"sliding_window","window_ms":60000,"max_requests":3}"#)
            .build(&ctx)
            .unwrap();
        assert!(!window.has_ticker());
        assert_eq!((0..5).filter(|_| window.allow_now()).count(), 3);
    }
}
