//! A single concurrent transformation step.
//!
//! A [`Stage`] pulls items from an input [`Sequence`], applies its
//! [`Transform`], and pushes results into its own output sequence, all in one
//! spawned task. The task is the sole owner of the output sender, so the
//! output closes exactly once: when the input is exhausted, when the context
//! fires, when the transform fails under [`ErrorPolicy::Abort`], or when the
//! consumer drops the output.
//!
//! Every suspension point (receive, transform, send) is raced against the
//! [`Context`], and the race is biased toward cancellation: once a stage has
//! observed cancellation it never consumes or sends another item. An item
//! whose send was already under way when cancellation won is dropped.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn, Instrument};

use crate::sequence::{pull, Pulled, Sequence};
use crate::{BufferSize, Context, PipelineError, StageName, Transform};

/// What a stage does when its transform returns a processing error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorPolicy {
    /// Stop the stage and surface the error through the output's status.
    #[default]
    Abort,
    /// Log the error, drop the item, and keep going.
    Skip,
}

/// A reusable stage definition: a named transform plus its tuning.
///
/// Running the same `Stage` several times spawns independent tasks sharing
/// the one transform.
pub struct Stage<T, U> {
    pub(crate) name: StageName,
    pub(crate) transform: Arc<dyn Transform<T, U>>,
    pub(crate) buffer: BufferSize,
    pub(crate) on_error: ErrorPolicy,
}

impl<T, U> Clone for Stage<T, U> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            transform: self.transform.clone(),
            buffer: self.buffer,
            on_error: self.on_error,
        }
    }
}

impl<T, U> Stage<T, U>
where
    T: Send + 'static,
    U: Send + 'static,
{
    /// Creates a stage. An empty `name` falls back to a generic label.
    pub fn new(name: &str, transform: impl Transform<T, U> + 'static) -> Self {
        Self {
            name: StageName::new(name).unwrap_or_else(StageName::anonymous),
            transform: Arc::new(transform),
            buffer: BufferSize::default(),
            on_error: ErrorPolicy::default(),
        }
    }

    /// Capacity of the output queue. Defaults to one.
    pub fn buffer(mut self, buffer: BufferSize) -> Self {
        self.buffer = buffer;
        self
    }

    /// Reaction to processing errors. Defaults to [`ErrorPolicy::Abort`].
    pub fn on_error(mut self, policy: ErrorPolicy) -> Self {
        self.on_error = policy;
        self
    }

    pub fn name(&self) -> &StageName {
        &self.name
    }

    /// Spawns the stage over `input` and returns its output sequence.
    pub fn run(&self, ctx: &Context, input: Sequence<T>) -> Sequence<U> {
        let (tx, rx) = mpsc::channel(self.buffer.get());
        let span = tracing::debug_span!("stage", stage = %self.name, context = %ctx.id());

        let ctx = ctx.clone();
        let stage = self.clone();
        let status = tokio::spawn(
            async move {
                let result = stage.drive(&ctx, Inbox::Owned(input), tx).await;
                debug!(ok = result.is_ok(), "stage finished");
                result
            }
            .instrument(span),
        );
        Sequence::new(rx, self.name.clone(), status)
    }

    /// The per-task loop shared by single stages and fan-out workers.
    pub(crate) async fn drive(
        &self,
        ctx: &Context,
        mut inbox: Inbox<T>,
        tx: mpsc::Sender<U>,
    ) -> Result<(), PipelineError> {
        loop {
            let item = match pull(ctx, inbox.recv(), &tx).await? {
                Pulled::Item(item) => item,
                Pulled::Exhausted => return inbox.finish().await,
                Pulled::Abandoned => {
                    debug!("downstream closed while waiting for input");
                    return Ok(());
                }
            };

            let out = match ctx.race(self.transform.apply(item)).await? {
                Ok(Some(out)) => out,
                Ok(None) => continue,
                Err(err) => match self.on_error {
                    ErrorPolicy::Skip => {
                        warn!(error = %err, "skipping item after processing error");
                        continue;
                    }
                    ErrorPolicy::Abort => {
                        warn!(error = %err, "aborting stage after processing error");
                        return Err(PipelineError::Processing {
                            stage: self.name.clone(),
                            source: err,
                        });
                    }
                },
            };

            if ctx.race(tx.send(out)).await?.is_err() {
                debug!("downstream closed");
                return Ok(());
            }
        }
    }
}

/// Runs `transform` over `input` as an unnamed stage with default tuning.
pub fn run_stage<T, U>(
    ctx: &Context,
    input: Sequence<T>,
    transform: impl Transform<T, U> + 'static,
) -> Sequence<U>
where
    T: Send + 'static,
    U: Send + 'static,
{
    Stage::new("stage", transform).run(ctx, input)
}

// ---------------------------------------------------------------------------

/// Where a running stage takes its items from.
pub(crate) enum Inbox<T> {
    /// A stage's private input.
    Owned(Sequence<T>),
    /// A job queue shared by every worker of a pool.
    Shared(Arc<Mutex<mpsc::Receiver<T>>>),
}

impl<T: Send + 'static> Inbox<T> {
    async fn recv(&mut self) -> Option<T> {
        match self {
            Inbox::Owned(seq) => seq.recv().await,
            Inbox::Shared(queue) => queue.lock().await.recv().await,
        }
    }

    /// Upstream status once the inbox is exhausted. A shared queue's status
    /// is reported by its feeder, not by each worker.
    async fn finish(self) -> Result<(), PipelineError> {
        match self {
            Inbox::Owned(seq) => seq.finish().await,
            Inbox::Shared(_) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{filter, map, try_map, ProcessingError};

    #[tokio::test]
    async fn square_stage_preserves_order() {
        let ctx = Context::background();
        let squares = run_stage(&ctx, Sequence::generate(&ctx, 1..=6), map(|x: u64| x * x));
        assert_eq!(squares.collect().await, Ok(vec![1, 4, 9, 16, 25, 36]));
    }

    #[tokio::test]
    async fn filter_stage_drops_items() {
        let ctx = Context::background();
        let evens = run_stage(&ctx, Sequence::generate(&ctx, 1..=5), filter(|x: &i32| x % 2 == 0));
        assert_eq!(evens.collect().await, Ok(vec![2, 4]));
    }

    fn reject_three() -> impl Transform<i32, i32> {
        try_map(|x: i32| {
            if x == 3 {
                Err(ProcessingError::new("three is not allowed"))
            } else {
                Ok(x)
            }
        })
    }

    #[tokio::test]
    async fn abort_policy_surfaces_the_processing_error() {
        let ctx = Context::background();
        let stage = Stage::new("checker", reject_three());
        let out = stage.run(&ctx, Sequence::generate(&ctx, 1..=5));

        let err = out.collect().await.unwrap_err();
        match err {
            PipelineError::Processing { stage, source } => {
                assert_eq!(stage.as_str(), "checker");
                assert_eq!(source.message(), "three is not allowed");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn skip_policy_continues_past_failures() {
        let ctx = Context::background();
        let stage = Stage::new("checker", reject_three()).on_error(ErrorPolicy::Skip);
        let out = stage.run(&ctx, Sequence::generate(&ctx, 1..=5));
        assert_eq!(out.collect().await, Ok(vec![1, 2, 4, 5]));
    }

    #[tokio::test]
    async fn upstream_failure_propagates_through_later_stages() {
        let ctx = Context::background();
        let checked = Stage::new("checker", reject_three()).run(&ctx, Sequence::generate(&ctx, 1..=5));
        let doubled = run_stage(&ctx, checked, map(|x: i32| x * 2));

        let err = doubled.collect().await.unwrap_err();
        assert!(matches!(err, PipelineError::Processing { .. }));
    }

    #[tokio::test]
    async fn cancellation_closes_the_output_promptly() {
        let ctx = Context::background();
        let mut out = run_stage(&ctx, Sequence::generate(&ctx, 0u64..), map(|x: u64| x + 1));
        assert_eq!(out.recv().await, Some(1));

        ctx.cancel();
        let rest = tokio::time::timeout(Duration::from_secs(1), out.collect())
            .await
            .expect("stage should stop after cancellation");
        assert_eq!(rest, Err(PipelineError::Cancelled));
    }

    #[tokio::test]
    async fn slow_transform_is_interrupted_by_deadline() {
        let ctx = Context::with_timeout(Duration::from_millis(30));
        let slow = crate::then(|x: u32| async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok::<_, ProcessingError>(x)
        });
        let out = run_stage(&ctx, Sequence::generate(&ctx, 1..=3u32), slow);

        let result = tokio::time::timeout(Duration::from_secs(1), out.collect())
            .await
            .expect("deadline should interrupt the transform");
        assert_eq!(result, Err(PipelineError::DeadlineExceeded));
    }

    #[tokio::test]
    async fn finish_stops_a_stage_waiting_on_a_silent_upstream() {
        let ctx = Context::background();
        let (tx, rx) = mpsc::channel(4);
        tx.send(1u32).await.unwrap();

        let mut out = run_stage(&ctx, Sequence::from_receiver(rx), map(|x: u32| x + 1));
        assert_eq!(out.recv().await, Some(2));

        // Upstream stays open and idle; the consumer leaving must be enough.
        let status = tokio::time::timeout(Duration::from_secs(1), out.finish())
            .await
            .expect("stage noticed its consumer left");
        assert_eq!(status, Ok(()));
        assert!(!ctx.is_cancelled());
        drop(tx);
    }
}
