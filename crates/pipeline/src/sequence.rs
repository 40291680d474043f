//! The lazy, single-pass output of every concurrent unit.
//!
//! A [`Sequence`] pairs the receiving end of a bounded queue with the handle
//! of the task that produces into it. Items are pulled with
//! [`Sequence::recv`]; once the queue is closed, [`Sequence::finish`] reports
//! *why* it closed: normal exhaustion, cancellation, or the first processing
//! error anywhere upstream. This keeps "cancelled" distinguishable from
//! "empty".

use std::future::Future;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, Instrument};

use crate::{BufferSize, Context, PipelineError, StageName};

/// Outcome of a non-blocking [`Sequence::try_recv`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TryRecv<T> {
    /// An item was ready.
    Item(T),
    /// The sequence is open but nothing is buffered right now.
    Empty,
    /// The sequence is closed and fully drained.
    Closed,
}

/// Status of the task producing a sequence.
pub(crate) type Status = JoinHandle<Result<(), PipelineError>>;

/// A lazy, single-pass, non-restartable stream of work items.
///
/// Dropping a sequence closes its queue: the producer's next send fails and
/// the producer stops, so abandoning a pipeline half-way never leaves blocked
/// tasks behind.
#[derive(Debug)]
pub struct Sequence<T> {
    rx: mpsc::Receiver<T>,
    producer: Option<(StageName, Status)>,
}

impl<T: Send + 'static> Sequence<T> {
    pub(crate) fn new(rx: mpsc::Receiver<T>, stage: StageName, status: Status) -> Self {
        Self {
            rx,
            producer: Some((stage, status)),
        }
    }

    /// Wraps a caller-owned channel. Its status is always `Ok`: closing the
    /// sender is the only way it ends.
    pub fn from_receiver(rx: mpsc::Receiver<T>) -> Self {
        Self { rx, producer: None }
    }

    /// Source stage: emits `items` in order, racing each send against `ctx`.
    ///
    /// The sequence closes after the last item or as soon as `ctx` fires; in
    /// the latter case [`finish`](Self::finish) reports the cancellation.
    pub fn generate<I>(ctx: &Context, items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Send + 'static,
    {
        let stage = StageName::fixed("generate");
        let (tx, rx) = mpsc::channel(BufferSize::ONE.get());
        let span = tracing::debug_span!("generate", context = %ctx.id());
        let ctx = ctx.clone();
        let items = items.into_iter();

        let status = tokio::spawn(
            async move {
                for item in items {
                    if ctx.race(tx.send(item)).await?.is_err() {
                        debug!("consumer dropped the sequence");
                        return Ok(());
                    }
                }
                Ok(())
            }
            .instrument(span),
        );
        Self::new(rx, stage, status)
    }

    /// Receives the next item, or `None` once the sequence is closed.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Single non-blocking receive attempt.
    pub fn try_recv(&mut self) -> TryRecv<T> {
        match self.rx.try_recv() {
            Ok(item) => TryRecv::Item(item),
            Err(mpsc::error::TryRecvError::Empty) => TryRecv::Empty,
            Err(mpsc::error::TryRecvError::Disconnected) => TryRecv::Closed,
        }
    }

    /// Stops consuming and waits for the producer to report.
    ///
    /// Returns `Ok(())` for normal exhaustion (or a consumer-initiated stop)
    /// and otherwise the first error of the producing chain.
    pub async fn finish(mut self) -> Result<(), PipelineError> {
        self.rx.close();
        match self.producer.take() {
            Some((stage, status)) => join_status(stage, status).await,
            None => Ok(()),
        }
    }

    /// Drains every item, then reports the producer's status.
    pub async fn collect(mut self) -> Result<Vec<T>, PipelineError> {
        let mut items = Vec::new();
        while let Some(item) = self.rx.recv().await {
            items.push(item);
        }
        self.finish().await?;
        Ok(items)
    }
}

/// What a forwarding task got from upstream.
pub(crate) enum Pulled<T> {
    Item(T),
    /// Upstream closed; its status is still to be collected.
    Exhausted,
    /// Nobody consumes the output any more.
    Abandoned,
}

/// Waits for the next upstream item, unless `ctx` fires or the consumer of
/// `downstream` goes away first. Without the second arm a task idling on an
/// open but silent upstream would never notice [`Sequence::finish`].
pub(crate) async fn pull<T, U>(
    ctx: &Context,
    recv: impl Future<Output = Option<T>>,
    downstream: &mpsc::Sender<U>,
) -> Result<Pulled<T>, PipelineError> {
    ctx.race(async {
        tokio::select! {
            biased;
            _ = downstream.closed() => Pulled::Abandoned,
            item = recv => item.map_or(Pulled::Exhausted, Pulled::Item),
        }
    })
    .await
}

/// Resolves a producer's join handle into its reported status.
pub(crate) async fn join_status(stage: StageName, status: Status) -> Result<(), PipelineError> {
    match status.await {
        Ok(result) => result,
        Err(join) => Err(PipelineError::TaskFailed {
            stage,
            message: join.to_string(),
        }),
    }
}
