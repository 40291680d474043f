//! Fan-in: many sequences, one output.
//!
//! [`merge`] starts one forwarding task per source. Each forwarder copies its
//! source into the shared output until the source is exhausted or the context
//! fires, racing every receive and send against the context. The forwarders
//! are tracked in a [`JoinSet`] acting as the counting coordinator; the
//! output closes once the last forwarder has finished, and its status is the
//! most informative of the sources' statuses.
//!
//! Items from one source keep their relative order. Interleaving across
//! sources follows the runtime's scheduling, which is fair: a source with
//! ready items is never starved.

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, Instrument};

use crate::fanout::keep_most_informative;
use crate::sequence::{pull, Pulled};
use crate::{BufferSize, Context, PipelineError, Sequence, StageName};

/// Merges `sources` into one sequence under `ctx`.
///
/// With no sources the output is closed immediately.
pub fn merge<T, I>(ctx: &Context, sources: I) -> Sequence<T>
where
    T: Send + 'static,
    I: IntoIterator<Item = Sequence<T>>,
{
    merge_with_buffer(ctx, sources, BufferSize::default())
}

/// Same as [`merge`] with an explicit output buffer.
pub fn merge_with_buffer<T, I>(ctx: &Context, sources: I, buffer: BufferSize) -> Sequence<T>
where
    T: Send + 'static,
    I: IntoIterator<Item = Sequence<T>>,
{
    let stage = StageName::fixed("merge");
    let (tx, rx) = mpsc::channel(buffer.get());

    let mut forwarders = JoinSet::new();
    for (index, source) in sources.into_iter().enumerate() {
        let span = tracing::debug_span!("forwarder", source = index, context = %ctx.id());
        forwarders.spawn(forward(ctx.clone(), source, tx.clone()).instrument(span));
    }
    drop(tx);

    let sources = forwarders.len();
    let status = tokio::spawn({
        let stage = stage.clone();
        async move {
            let mut first = None;
            while let Some(joined) = forwarders.join_next().await {
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
            debug!(sources, "all sources drained");
            first.map_or(Ok(()), Err)
        }
        .instrument(tracing::debug_span!("merge", context = %ctx.id()))
    });
    Sequence::new(rx, stage, status)
}

async fn forward<T: Send + 'static>(
    ctx: Context,
    mut source: Sequence<T>,
    out: mpsc::Sender<T>,
) -> Result<(), PipelineError> {
    loop {
        let item = match pull(&ctx, source.recv(), &out).await? {
            Pulled::Item(item) => item,
            Pulled::Exhausted => break,
            Pulled::Abandoned => {
                debug!("merged output dropped");
                return Ok(());
            }
        };
        if ctx.race(out.send(item)).await?.is_err() {
            debug!("merged output dropped");
            return Ok(());
        }
    }
    source.finish().await
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{map, run_stage, then, ProcessingError};

    fn positions_by_source(merged: &[u32]) -> Vec<Vec<u32>> {
        let mut by_source = vec![Vec::new(); 3];
        for item in merged {
            by_source[(*item / 100) as usize].push(*item);
        }
        by_source
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 3)]
    async fn merges_every_item_and_keeps_per_source_order() {
        let ctx = Context::background();
        let sources: Vec<_> = [4u32, 0, 9]
            .iter()
            .enumerate()
            .map(|(i, &n)| {
                let base = i as u32 * 100;
                Sequence::generate(&ctx, (0..n).map(move |k| base + k))
            })
            .collect();

        let merged = merge(&ctx, sources).collect().await.unwrap();
        assert_eq!(merged.len(), 13);

        let by_source = positions_by_source(&merged);
        assert_eq!(by_source[0], vec![0, 1, 2, 3]);
        assert!(by_source[1].is_empty());
        assert_eq!(by_source[2], (200..209).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn sources_finishing_at_different_times() {
        let ctx = Context::background();
        let delayed = |delay_ms: u64, values: Vec<u32>| {
            let delay = then(move |x: u32| async move {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                Ok::<_, ProcessingError>(x)
            });
            run_stage(&ctx, Sequence::generate(&ctx, values), delay)
        };

        let merged = merge(
            &ctx,
            vec![
                delayed(15, vec![0, 1]),
                delayed(1, vec![100, 101, 102]),
                delayed(5, vec![200]),
            ],
        )
        .collect()
        .await
        .unwrap();

        let by_source = positions_by_source(&merged);
        assert_eq!(by_source[0], vec![0, 1]);
        assert_eq!(by_source[1], vec![100, 101, 102]);
        assert_eq!(by_source[2], vec![200]);
    }

    #[tokio::test]
    async fn no_sources_closes_immediately() {
        let ctx = Context::background();
        let merged = merge(&ctx, Vec::<Sequence<u8>>::new());
        assert_eq!(merged.collect().await, Ok(vec![]));
    }

    #[tokio::test]
    async fn cancellation_closes_the_merged_output() {
        let ctx = Context::background();
        let endless = || run_stage(&ctx, Sequence::generate(&ctx, 0u64..), map(|x: u64| x));
        let mut merged = merge(&ctx, vec![endless(), endless()]);
        assert!(merged.recv().await.is_some());

        ctx.cancel();
        let rest = tokio::time::timeout(Duration::from_secs(1), merged.collect())
            .await
            .expect("merge should stop");
        assert_eq!(rest, Err(PipelineError::Cancelled));
    }

    #[tokio::test]
    async fn finish_releases_forwarders_on_silent_sources() {
        let ctx = Context::background();
        let (tx_a, rx_a) = mpsc::channel(1);
        let (_tx_b, rx_b) = mpsc::channel::<u32>(1);
        tx_a.send(7u32).await.unwrap();

        let mut merged = merge(&ctx, [Sequence::from_receiver(rx_a), Sequence::from_receiver(rx_b)]);
        assert_eq!(merged.recv().await, Some(7));

        let status = tokio::time::timeout(Duration::from_secs(1), merged.finish())
            .await
            .expect("forwarders stopped once the output was abandoned");
        assert_eq!(status, Ok(()));
        drop(tx_a);
    }
}
