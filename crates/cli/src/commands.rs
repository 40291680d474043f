//! Demonstration runs behind each subcommand.
//!
//! Every function here takes the root [`Context`] so Ctrl-C stops a run
//! mid-flight, and returns plain data for `main` to print.

use std::ops::RangeInclusive;
use std::time::Duration;

use limiter::{Algorithm, LimiterConfig, RateLimiter};
use pipeline::{
    dispatch, merge, run_detached, then, try_map, Context, Pipeline, PipelineError,
    ProcessingError, Sequence, Stage,
};
use tokio::time::Instant;
use tracing::info;

fn checked(value: Option<u64>, what: &str, x: u64) -> Result<u64, ProcessingError> {
    value.ok_or_else(|| ProcessingError::new(format!("{what} of {x} overflows u64")))
}

/// generate(items) → square → double. Overflow is a processing error.
pub(crate) async fn square_double(
    ctx: &Context,
    items: RangeInclusive<u64>,
) -> Result<Vec<u64>, PipelineError> {
    let chain = Pipeline::generate(ctx, items)
        .stage(Stage::new("square", try_map(|x: u64| checked(x.checked_mul(x), "square", x))))
        .stage(Stage::new("double", try_map(|x: u64| checked(x.checked_mul(2), "double", x))));
    info!(stages = ?chain.stage_names(), "running pipeline");
    chain.collect().await
}

/// Squares `0..jobs` on `workers` concurrent workers, each job taking
/// `work`. Results are returned sorted, since workers finish in any order.
pub(crate) async fn fan_out(
    ctx: &Context,
    jobs: u64,
    workers: usize,
    work: Duration,
) -> Result<Vec<u64>, PipelineError> {
    let square = then(move |x: u64| async move {
        tokio::time::sleep(work).await;
        checked(x.checked_mul(x), "square", x)
    });
    let mut results = dispatch(ctx, Sequence::generate(ctx, 0..jobs), workers, square)?
        .collect()
        .await?;
    results.sort_unstable();
    Ok(results)
}

/// Merges `sources` generators of `items` each into one sequence of
/// `(source, item)` pairs, in arrival order.
pub(crate) async fn fan_in(
    ctx: &Context,
    sources: usize,
    items: u64,
) -> Result<Vec<(usize, u64)>, PipelineError> {
    let inputs = (0..sources)
        .map(|source| Sequence::generate(ctx, (0..items).map(move |item| (source, item))));
    merge(ctx, inputs).collect().await
}

#[derive(Debug)]
pub(crate) struct LimitReport {
    pub algorithm: Algorithm,
    pub decisions: Vec<bool>,
}

impl LimitReport {
    pub(crate) fn admitted(&self) -> usize {
        self.decisions.iter().filter(|allowed| **allowed).count()
    }
}

/// Sends `requests` requests through the configured limiter, one every
/// `interval`, and records each decision.
pub(crate) async fn limit(
    ctx: &Context,
    config: &LimiterConfig,
    requests: u32,
    interval: Duration,
) -> Result<LimitReport, PipelineError> {
    let limiter = config.build(ctx)?;
    let mut decisions = Vec::with_capacity(requests as usize);
    let start = Instant::now();

    for request in 0..requests {
        if request > 0 && !interval.is_zero() {
            ctx.race(tokio::time::sleep(interval)).await?;
        }
        let allowed = limiter.allow_now();
        info!(
            request,
            allowed,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "rate limiter decision"
        );
        decisions.push(allowed);
    }

    Ok(LimitReport {
        algorithm: limiter.algorithm(),
        decisions,
    })
}

/// Runs a job of length `work` under a `timeout` and returns how long the
/// caller waited. The job is detached, so a timeout never leaves it blocked.
pub(crate) async fn timeout(
    ctx: &Context,
    work: Duration,
    timeout: Duration,
) -> Result<Duration, PipelineError> {
    let ctx = ctx.child_with_timeout(timeout);
    let start = Instant::now();
    run_detached(&ctx, tokio::time::sleep(work)).await?;
    Ok(start.elapsed())
}
