//! `conduit` -- demonstration CLI for the Conduit concurrency toolkit.
//!
//! Each subcommand exercises one core operation end to end:
//!
//! - `conduit pipeline` -- generator → square → double.
//! - `conduit fan-out` -- a job queue drained by a worker pool.
//! - `conduit fan-in` -- several generators merged into one stream.
//! - `conduit limit` -- a request stream through a configured rate limiter.
//! - `conduit timeout` -- a detached job raced against a deadline.
//!
//! Logging goes to stderr through `tracing-subscriber`; results go to stdout.
//! Ctrl-C cancels the root context, which stops whatever is running.

use std::time::Duration;

use anyhow::Context as _;
use clap::{Args, Parser, Subcommand};
use limiter::LimiterConfig;
use pipeline::{Context, PipelineError};
use tracing::{info, warn};

mod commands;

/// Conduit concurrency toolkit demonstrations.
#[derive(Parser)]
#[command(name = "conduit", about = "Conduit concurrency toolkit demonstrations", version)]
struct Cli {
    /// Enable verbose (debug-level) logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run generator → square → double over 1..=count.
    Pipeline {
        #[arg(long, default_value = "10")]
        count: u64,
    },

    /// Square jobs on a pool of workers.
    FanOut(FanOutArgs),

    /// Merge several generators into one stream.
    FanIn {
        #[arg(long, default_value = "3")]
        sources: usize,

        /// Items emitted by each source.
        #[arg(long, default_value = "5")]
        items: u64,
    },

    /// Send a stream of requests through a rate limiter.
    Limit(LimitArgs),

    /// Race a slow job against a deadline.
    Timeout {
        /// How long the job takes.
        #[arg(long, default_value = "500")]
        work_ms: u64,

        #[arg(long, default_value = "100")]
        timeout_ms: u64,
    },
}

#[derive(Args)]
struct FanOutArgs {
    #[arg(long, default_value = "20")]
    jobs: u64,

    #[arg(long, default_value = "4")]
    workers: usize,

    /// Simulated duration of each job.
    #[arg(long, default_value = "50")]
    work_ms: u64,
}

#[derive(Args)]
struct LimitArgs {
    /// Limiter configuration as JSON, e.g.
    /// '{"algorithm":"token_bucket","rate":5,"capacity":10}'.
    #[arg(long)]
    config: String,

    #[arg(long, default_value = "20")]
    requests: u32,

    /// Delay between consecutive requests.
    #[arg(long, default_value = "50")]
    interval_ms: u64,
}

fn init_tracing(verbose: bool, json: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.json);

    let ctx = Context::background();
    let interrupt = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling");
            interrupt.cancel();
        }
    });

    match cli.command {
        Command::Pipeline { count } => {
            let out = commands::square_double(&ctx, 1..=count).await?;
            println!("{out:?}");
        }
        Command::FanOut(args) => {
            let started = tokio::time::Instant::now();
            let out = commands::fan_out(
                &ctx,
                args.jobs,
                args.workers,
                Duration::from_millis(args.work_ms),
            )
            .await?;
            info!(
                jobs = args.jobs,
                workers = args.workers,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "fan-out complete"
            );
            println!("{out:?}");
        }
        Command::FanIn { sources, items } => {
            for (source, item) in commands::fan_in(&ctx, sources, items).await? {
                println!("source {source}: {item}");
            }
        }
        Command::Limit(args) => {
            let config: LimiterConfig = serde_json::from_str(&args.config)
                .with_context(|| format!("invalid limiter config: {}", args.config))?;
            let report = commands::limit(
                &ctx,
                &config,
                args.requests,
                Duration::from_millis(args.interval_ms),
            )
            .await?;
            for (request, allowed) in report.decisions.iter().enumerate() {
                let verdict = if *allowed { "allowed" } else { "denied" };
                println!("request {request}: {verdict}");
            }
            println!(
                "{}: {}/{} admitted",
                report.algorithm,
                report.admitted(),
                report.decisions.len()
            );
        }
        Command::Timeout {
            work_ms,
            timeout_ms,
        } => {
            let result = commands::timeout(
                &ctx,
                Duration::from_millis(work_ms),
                Duration::from_millis(timeout_ms),
            )
            .await;
            match result {
                Ok(waited) => println!("completed after {} ms", waited.as_millis()),
                Err(PipelineError::DeadlineExceeded) => {
                    println!("timed out after {timeout_ms} ms")
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    Ok(())
}
