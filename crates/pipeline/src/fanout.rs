//! Fan-out: one job stream, many workers.
//!
//! [`dispatch`] builds a worker pool around one shared job queue:
//!
//! ```text
//! jobs ──► feeder ──► [ job queue ] ──► worker 0 ──┐
//!                                   ├─► worker 1 ──┼──► [ results ]
//!                                   └─► worker n ──┘
//! ```
//!
//! The feeder copies every job into the queue and then drops the queue's only
//! sender; that close is the single termination signal every worker observes.
//! Each job is received by exactly one worker. The results queue closes when
//! the last worker has exited, so no result can follow the close, and a
//! supervisor task collects the feeder's and the workers' statuses into the
//! result sequence's status.
//!
//! Workers run under a child of the caller's context. A worker that aborts on
//! a processing error cancels that child, stopping its siblings; the pool
//! then reports the processing error rather than the induced cancellation.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, Instrument};

use crate::sequence::{join_status, pull, Pulled, Sequence};
use crate::stage::Inbox;
use crate::{Context, PipelineError, Stage, StageName, Transform, WorkerCount, WorkerId};

/// Runs `work` over `jobs` on `worker_count` concurrent workers.
///
/// Fails synchronously with [`PipelineError::InvalidInput`] when
/// `worker_count` is zero. Result order across workers is unspecified.
pub fn dispatch<T, U>(
    ctx: &Context,
    jobs: Sequence<T>,
    worker_count: usize,
    work: impl Transform<T, U> + 'static,
) -> Result<Sequence<U>, PipelineError>
where
    T: Send + 'static,
    U: Send + 'static,
{
    dispatch_stage(ctx, jobs, worker_count, &Stage::new("worker", work))
}

/// Same as [`dispatch`], with the stage's name, buffer and error policy.
pub fn dispatch_stage<T, U>(
    ctx: &Context,
    jobs: Sequence<T>,
    worker_count: usize,
    stage: &Stage<T, U>,
) -> Result<Sequence<U>, PipelineError>
where
    T: Send + 'static,
    U: Send + 'static,
{
    let workers = WorkerCount::new(worker_count)?;
    let pool = ctx.child();

    let (job_tx, job_rx) = mpsc::channel(workers.get());
    let queue = Arc::new(Mutex::new(job_rx));
    let (result_tx, result_rx) = mpsc::channel(stage.buffer.get().max(workers.get()));

    let feeder = tokio::spawn(
        feed(pool.clone(), jobs, job_tx)
            .instrument(tracing::debug_span!("feeder", stage = %stage.name, context = %pool.id())),
    );

    let mut running = JoinSet::new();
    for index in 0..workers.get() {
        let worker = WorkerId::new(index as u64);
        let span = tracing::debug_span!(
            "worker",
            stage = %stage.name,
            worker = %worker,
            context = %pool.id()
        );
        let pool = pool.clone();
        let stage = stage.clone();
        let inbox = Inbox::Shared(queue.clone());
        let results = result_tx.clone();

        running.spawn(
            async move {
                let result = stage.drive(&pool, inbox, results).await;
                if matches!(result, Err(PipelineError::Processing { .. })) {
                    pool.cancel();
                }
                debug!(ok = result.is_ok(), "worker finished");
                result
            }
            .instrument(span),
        );
    }
    // Workers hold the only senders now: the results close with the last one.
    drop(result_tx);

    debug!(stage = %stage.name, workers = %workers, "worker pool started");
    let status = tokio::spawn(
        supervise(stage.name.clone(), feeder, running)
            .instrument(tracing::debug_span!("supervisor", stage = %stage.name)),
    );
    Ok(Sequence::new(result_rx, stage.name.clone(), status))
}

/// Moves every job into the shared queue, then closes it.
async fn feed<T: Send + 'static>(
    ctx: Context,
    mut jobs: Sequence<T>,
    queue: mpsc::Sender<T>,
) -> Result<(), PipelineError> {
    loop {
        let job = match pull(&ctx, jobs.recv(), &queue).await? {
            Pulled::Item(job) => job,
            Pulled::Exhausted => break,
            Pulled::Abandoned => {
                debug!("every worker has exited");
                return Ok(());
            }
        };
        if ctx.race(queue.send(job)).await?.is_err() {
            debug!("every worker has exited");
            return Ok(());
        }
    }
    drop(queue);
    jobs.finish().await
}

/// Waits for the feeder and every worker, keeping the most informative error.
async fn supervise(
    stage: StageName,
    feeder: JoinHandle<Result<(), PipelineError>>,
    mut workers: JoinSet<Result<(), PipelineError>>,
) -> Result<(), PipelineError> {
    let mut first = None;

    while let Some(joined) = workers.join_next().await {
        let result = joined.unwrap_or_else(|join| {
            Err(PipelineError::TaskFailed {
                stage: stage.clone(),
                message: join.to_string(),
            })
        });
        if let Err(err) = result {
            keep_most_informative(&mut first, err);
        }
    }

    if let Err(err) = join_status(stage, feeder).await {
        keep_most_informative(&mut first, err);
    }

    match first {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// A real failure outranks the cancellation it triggered in sibling tasks.
pub(crate) fn keep_most_informative(slot: &mut Option<PipelineError>, err: PipelineError) {
    match slot {
        None => *slot = Some(err),
        Some(kept) if kept.is_cancellation() && !err.is_cancellation() => *slot = Some(err),
        Some(_) => {}
    }
}
