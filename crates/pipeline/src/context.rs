//! Hierarchical, broadcast, one-shot cancellation.
//!
//! A [`Context`] is either active or cancelled; the transition happens once
//! and is never reset. It is triggered by [`Context::cancel`], by the
//! deadline passing, or by the parent context being cancelled. Every unit in
//! this crate races each suspension point (receive, send, timed wait) against
//! [`Context::cancelled`] through [`Context::race`], so nothing blocks once
//! the context has fired.
//!
//! Deadlines are evaluated lazily against [`tokio::time::Instant`]: no timer
//! task is spawned per context, and an expired deadline is latched the first
//! time anyone observes it. A child's effective deadline is the earlier of its
//! own and its parent's.

use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{ContextId, PipelineError, StageName};

/// Why a context left the active state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CancelReason {
    /// Explicit [`Context::cancel`] on this context or an ancestor.
    Cancelled,
    /// The effective deadline passed.
    DeadlineExceeded,
}

impl From<CancelReason> for PipelineError {
    fn from(reason: CancelReason) -> Self {
        match reason {
            CancelReason::Cancelled => PipelineError::Cancelled,
            CancelReason::DeadlineExceeded => PipelineError::DeadlineExceeded,
        }
    }
}

// ---------------------------------------------------------------------------

/// A cancellation context shared by every unit of one pipeline run.
///
/// Cloning is cheap and yields a handle to the *same* context: cancelling any
/// clone cancels them all. Use [`Context::child`] for an independently
/// cancellable sub-scope.
#[derive(Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

struct Inner {
    id: ContextId,
    token: CancellationToken,
    deadline: Option<Instant>,
    reason: OnceLock<CancelReason>,
    parent: Option<Context>,
}

impl Context {
    /// Creates a context, optionally under `parent` and with a `deadline`.
    pub fn new(parent: Option<&Context>, deadline: Option<Instant>) -> Self {
        let token = parent.map_or_else(CancellationToken::new, |p| p.inner.token.child_token());
        let deadline = match (parent.and_then(Context::deadline), deadline) {
            (Some(inherited), Some(own)) => Some(inherited.min(own)),
            (inherited, own) => inherited.or(own),
        };
        Self {
            inner: Arc::new(Inner {
                id: ContextId::new(),
                token,
                deadline,
                reason: OnceLock::new(),
                parent: parent.cloned(),
            }),
        }
    }

    /// A root context with no deadline. Fires only on explicit cancel.
    pub fn background() -> Self {
        Self::new(None, None)
    }

    /// A root context that expires `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new(None, Some(Instant::now() + timeout))
    }

    /// A child that fires when `self` fires, or when cancelled on its own.
    pub fn child(&self) -> Self {
        Self::new(Some(self), None)
    }

    /// A child that additionally expires `timeout` from now.
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        Self::new(Some(self), Some(Instant::now() + timeout))
    }

    pub fn id(&self) -> ContextId {
        self.inner.id
    }

    /// Effective deadline, taking ancestors into account.
    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// Cancels this context and all of its descendants.
    ///
    /// Calling it again, or on a context that already expired, has no
    /// further effect.
    pub fn cancel(&self) {
        // Latch an already-passed deadline first so the reported reason
        // reflects what happened first.
        if self.cancel_reason().is_none() && self.inner.reason.set(CancelReason::Cancelled).is_ok() {
            debug!(context = %self.inner.id, "context cancelled");
        }
        self.inner.token.cancel();
    }

    /// Returns `true` once the context has fired.
    pub fn is_cancelled(&self) -> bool {
        self.cancel_reason().is_some()
    }

    /// Why the context fired, or `None` while it is still active.
    pub fn cancel_reason(&self) -> Option<CancelReason> {
        if let Some(reason) = self.inner.reason.get() {
            return Some(*reason);
        }

        if self.inner.token.is_cancelled() {
            let inherited = self
                .inner
                .parent
                .as_ref()
                .and_then(Context::cancel_reason)
                .unwrap_or(CancelReason::Cancelled);
            return Some(*self.inner.reason.get_or_init(|| inherited));
        }

        match self.inner.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                let reason = *self.inner.reason.get_or_init(|| CancelReason::DeadlineExceeded);
                if reason == CancelReason::DeadlineExceeded {
                    debug!(context = %self.inner.id, "context deadline exceeded");
                }
                self.inner.token.cancel();
                Some(reason)
            }
            _ => None,
        }
    }

    /// The error an operation should report after stopping because of this
    /// context, or `None` while it is active.
    pub fn err(&self) -> Option<PipelineError> {
        self.cancel_reason().map(PipelineError::from)
    }

    /// Completes when the context fires.
    pub async fn cancelled(&self) {
        match self.inner.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.inner.token.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
                // Latch the reason (and cancel the token for descendants).
                self.cancel_reason();
            }
            None => self.inner.token.cancelled().await,
        }
    }

    /// Runs `fut` until it completes or the context fires, whichever is
    /// first.
    ///
    /// Cancellation wins ties, and an already-cancelled context returns
    /// without polling `fut` at all. When cancellation wins, `fut` is
    /// dropped: an in-flight send is abandoned rather than blocking.
    pub async fn race<F: Future>(&self, fut: F) -> Result<F::Output, PipelineError> {
        if let Some(reason) = self.cancel_reason() {
            return Err(reason.into());
        }
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(self.stopped()),
            out = fut => Ok(out),
        }
    }

    fn stopped(&self) -> PipelineError {
        self.cancel_reason().unwrap_or(CancelReason::Cancelled).into()
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.inner.id)
            .field("deadline", &self.inner.deadline)
            .field("reason", &self.inner.reason.get())
            .finish()
    }
}

// ---------------------------------------------------------------------------

/// Spawns `fut` and waits for its output until `ctx` fires.
///
/// The output travels through a one-slot handoff, so when the caller gives up
/// first the spawned task still completes its send and exits instead of
/// blocking forever on a receiver that is gone.
pub async fn run_detached<F>(ctx: &Context, fut: F) -> Result<F::Output, PipelineError>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        let out = fut.await;
        // The receiver may have timed out already; the value is then dropped.
        let _ = tx.send(out);
    });

    match ctx.race(rx).await? {
        Ok(out) => Ok(out),
        Err(_) => Err(PipelineError::TaskFailed {
            stage: StageName::fixed("detached"),
            message: "task ended without producing a result".to_owned(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    #[test]
    fn cancel_is_idempotent() {
        let ctx = Context::background();
        assert!(!ctx.is_cancelled());
        assert_eq!(ctx.err(), None);

        ctx.cancel();
        let first = ctx.err();
        ctx.cancel();

        assert_eq!(first, Some(PipelineError::Cancelled));
        assert_eq!(ctx.err(), first);
    }

    #[test]
    fn child_follows_parent_but_not_the_reverse() {
        let parent = Context::background();
        let child = parent.child();
        let sibling = parent.child();

        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
        assert!(!sibling.is_cancelled());

        parent.cancel();
        assert_eq!(sibling.cancel_reason(), Some(CancelReason::Cancelled));
    }

    #[test]
    fn child_deadline_is_capped_by_parent() {
        let parent = Context::with_timeout(Duration::from_millis(50));
        let child = parent.child_with_timeout(Duration::from_secs(60));
        assert_eq!(child.deadline(), parent.deadline());
    }

    #[tokio::test]
    async fn deadline_fires_cancelled_and_reports_expiry() {
        let ctx = Context::with_timeout(Duration::from_millis(20));
        let child = ctx.child();

        tokio::time::timeout(Duration::from_secs(1), child.cancelled())
            .await
            .expect("deadline should fire the child");

        assert_eq!(ctx.err(), Some(PipelineError::DeadlineExceeded));
        assert_eq!(child.err(), Some(PipelineError::DeadlineExceeded));
    }

    #[tokio::test]
    async fn explicit_cancel_reaches_waiting_descendants() {
        let root = Context::background();
        let grandchild = root.child().child();

        let waiter = tokio::spawn({
            let grandchild = grandchild.clone();
            async move { grandchild.cancelled().await }
        });

        root.cancel();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("grandchild should observe cancellation")
            .unwrap();
        assert_eq!(grandchild.err(), Some(PipelineError::Cancelled));
    }

    #[tokio::test]
    async fn race_prefers_cancellation() {
        let ctx = Context::background();
        assert_eq!(ctx.race(async { 7 }).await, Ok(7));

        ctx.cancel();
        assert_eq!(ctx.race(async { 7 }).await, Err(PipelineError::Cancelled));
    }

    #[tokio::test]
    async fn race_stops_a_pending_operation() {
        let ctx = Context::with_timeout(Duration::from_millis(20));
        let out = ctx.race(std::future::pending::<()>()).await;
        assert_eq!(out, Err(PipelineError::DeadlineExceeded));
    }

    #[tokio::test]
    async fn run_detached_times_out_without_leaking_the_producer() {
        let finished = Arc::new(AtomicBool::new(false));
        let ctx = Context::with_timeout(Duration::from_millis(20));

        let flag = finished.clone();
        let out = run_detached(&ctx, async move {
            tokio::time::sleep(Duration::from_millis(60)).await;
            flag.store(true, Ordering::SeqCst);
            "done"
        })
        .await;
        assert_eq!(out, Err(PipelineError::DeadlineExceeded));

        // The producer still runs to completion after the caller gave up.
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn run_detached_returns_the_result_in_time() {
        let ctx = Context::with_timeout(Duration::from_secs(1));
        let out = run_detached(&ctx, async { 42 }).await;
        assert_eq!(out, Ok(42));
    }
}
