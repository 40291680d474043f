//! Per-item transformation functions run by stages and workers.
//!
//! A [`Transform`] maps one input item to at most one output item:
//!
//! - `Ok(Some(u))` forwards `u` downstream;
//! - `Ok(None)` drops the item (filter semantics);
//! - `Err(e)` is a processing error, handled according to the stage's
//!   [`ErrorPolicy`](crate::ErrorPolicy).
//!
//! The adapters in this module cover the common shapes; implement the trait
//! directly for anything stateful.

use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;

use crate::ProcessingError;

/// One concurrent transformation step's per-item function.
#[async_trait]
pub trait Transform<T, U>: Send + Sync {
    /// Processes one item.
    async fn apply(&self, item: T) -> Result<Option<U>, ProcessingError>;
}

// ---------------------------------------------------------------------------
// Adapters
// ---------------------------------------------------------------------------

/// Infallible one-to-one mapping. See [`map`].
pub struct Map<F>(F);

#[async_trait]
impl<T, U, F> Transform<T, U> for Map<F>
where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(T) -> U + Send + Sync,
{
    async fn apply(&self, item: T) -> Result<Option<U>, ProcessingError> {
        Ok(Some((self.0)(item)))
    }
}

/// Keeps items matching a predicate. See [`filter`].
pub struct Filter<F>(F);

#[async_trait]
impl<T, F> Transform<T, T> for Filter<F>
where
    T: Send + 'static,
    F: Fn(&T) -> bool + Send + Sync,
{
    async fn apply(&self, item: T) -> Result<Option<T>, ProcessingError> {
        Ok((self.0)(&item).then_some(item))
    }
}

/// Fallible mapping. See [`try_map`].
pub struct TryMap<F>(F);

#[async_trait]
impl<T, U, F> Transform<T, U> for TryMap<F>
where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(T) -> Result<U, ProcessingError> + Send + Sync,
{
    async fn apply(&self, item: T) -> Result<Option<U>, ProcessingError> {
        (self.0)(item).map(Some)
    }
}

/// Asynchronous fallible mapping. See [`then`].
pub struct Then<F>(F);

#[async_trait]
impl<T, U, F, Fut> Transform<T, U> for Then<F>
where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync,
    Fut: Future<Output = Result<U, ProcessingError>> + Send + 'static,
{
    async fn apply(&self, item: T) -> Result<Option<U>, ProcessingError> {
        (self.0)(item).await.map(Some)
    }
}

/// Passthrough. See [`identity`].
pub struct Identity<T>(PhantomData<fn(T) -> T>);

#[async_trait]
impl<T: Send + 'static> Transform<T, T> for Identity<T> {
    async fn apply(&self, item: T) -> Result<Option<T>, ProcessingError> {
        Ok(Some(item))
    }
}

/// Applies `f` to every item.
pub fn map<F>(f: F) -> Map<F> {
    Map(f)
}

/// Forwards only items for which `pred` returns `true`.
pub fn filter<F>(pred: F) -> Filter<F> {
    Filter(pred)
}

/// Applies a fallible `f`; failures become processing errors.
pub fn try_map<F>(f: F) -> TryMap<F> {
    TryMap(f)
}

/// Applies an async, fallible `f`, for per-item work that awaits.
pub fn then<F>(f: F) -> Then<F> {
    Then(f)
}

/// Forwards every item unchanged.
pub fn identity<T>() -> Identity<T> {
    Identity(PhantomData)
}
