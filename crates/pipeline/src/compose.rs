//! Chaining stages into a linear pipeline.
//!
//! Stage *i*'s output sequence becomes stage *i + 1*'s input. One [`Context`]
//! is shared by every stage of the chain (clones of a context are the same
//! context), so a single cancel stops them all.

use crate::{fanout, Context, PipelineError, Sequence, Stage, StageName};

/// A pipeline under construction.
///
/// Each call to [`stage`](Pipeline::stage) spawns the next stage right away;
/// nothing flows until the final sequence is consumed, because every queue is
/// bounded.
#[derive(Debug)]
pub struct Pipeline<T> {
    ctx: Context,
    head: Sequence<T>,
    stages: Vec<StageName>,
}

impl<T: Send + 'static> Pipeline<T> {
    /// Starts a pipeline from an existing sequence.
    pub fn from_sequence(ctx: &Context, source: Sequence<T>) -> Self {
        Self {
            ctx: ctx.clone(),
            head: source,
            stages: Vec::new(),
        }
    }

    /// Starts a pipeline from a generator over `items`.
    pub fn generate<I>(ctx: &Context, items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Send + 'static,
    {
        let mut pipeline = Self::from_sequence(ctx, Sequence::generate(ctx, items));
        pipeline.stages.push(StageName::fixed("generate"));
        pipeline
    }

    /// Appends a stage.
    pub fn stage<U: Send + 'static>(self, stage: Stage<T, U>) -> Pipeline<U> {
        let head = stage.run(&self.ctx, self.head);
        let mut stages = self.stages;
        stages.push(stage.name().clone());
        Pipeline {
            ctx: self.ctx,
            head,
            stages,
        }
    }

    /// Appends a pool of `workers` copies of `stage` sharing one job queue.
    ///
    /// Output order across workers is unspecified.
    pub fn fan_out<U: Send + 'static>(
        self,
        workers: usize,
        stage: Stage<T, U>,
    ) -> Result<Pipeline<U>, PipelineError> {
        let head = fanout::dispatch_stage(&self.ctx, self.head, workers, &stage)?;
        let mut stages = self.stages;
        stages.push(stage.name().clone());
        Ok(Pipeline {
            ctx: self.ctx,
            head,
            stages,
        })
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Names of the stages spawned so far, in chain order.
    pub fn stage_names(&self) -> &[StageName] {
        &self.stages
    }

    /// The output of the last stage.
    pub fn into_sequence(self) -> Sequence<T> {
        self.head
    }

    /// Drains the pipeline and reports the status of the whole chain.
    pub async fn collect(self) -> Result<Vec<T>, PipelineError> {
        self.head.collect().await
    }
}

/// Chains same-typed `stages` after `input`, all under `ctx`.
pub fn compose<T, I>(ctx: &Context, input: Sequence<T>, stages: I) -> Sequence<T>
where
    T: Send + 'static,
    I: IntoIterator<Item = Stage<T, T>>,
{
    stages
        .into_iter()
        .fold(input, |seq, stage| stage.run(ctx, seq))
}
