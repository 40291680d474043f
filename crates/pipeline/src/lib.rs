//! Core of Conduit: cancellable, staged, concurrent pipelines.
//!
//! This crate provides the building blocks for pushing a stream of work items
//! through several concurrent transformation steps without leaking background
//! tasks:
//!
//! - a hierarchical, one-shot cancellation [`Context`] with optional deadline;
//! - [`Sequence`], the lazy single-pass output of every concurrent unit;
//! - [`Stage`] and the [`Pipeline`] composer for linear chains;
//! - [`dispatch`] (fan-out worker pool) and [`merge`] (fan-in);
//! - [`poll_in_order`] for best-effort ordered polling.
//!
//! Rate limiting lives in the `limiter` crate and plugs in through
//! [`Transform`].
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`context`] | `Context`, `CancelReason`, `run_detached` |
//! | [`sequence`] | `Sequence`, `TryRecv` |
//! | [`transform`] | `Transform` trait and `map`/`filter`/`try_map`/`then`/`identity` |
//! | [`stage`] | `Stage`, `ErrorPolicy`, `run_stage` |
//! | [`compose`] | `Pipeline`, `compose` |
//! | [`fanout`] | `dispatch`, `dispatch_stage` |
//! | [`fanin`] | `merge`, `merge_with_buffer` |
//! | [`select`] | `poll_in_order`, `Polled` |
//! | [`identifiers`] | `ContextId`, `StageName`, `WorkerId` |
//! | [`types`] | Validated parameters (`WorkerCount`, `Rate`, `WindowSize`, ...) |
//! | [`errors`] | `PipelineError`, `ProcessingError`, `RetryPolicy` |
//!
//! ## Example
//!
//! ```no_run
//! use pipeline::{map, Context, Pipeline, Stage};
//!
//! # async fn demo() -> Result<(), pipeline::PipelineError> {
//! let ctx = Context::with_timeout(std::time::Duration::from_secs(1));
//! let squares = Pipeline::generate(&ctx, 1..=4)
//!     .stage(Stage::new("square", map(|x: u64| x * x)))
//!     .collect()
//!     .await?;
//! assert_eq!(squares, vec![1, 4, 9, 16]);
//! # Ok(())
//! # }
//! ```

pub mod compose;
pub mod context;
pub mod errors;
pub mod fanin;
pub mod fanout;
pub mod identifiers;
pub mod select;
pub mod sequence;
pub mod stage;
pub mod transform;
pub mod types;

// Re-export everything at the crate root for ergonomic usage by downstream crates.
pub use compose::{compose, Pipeline};
pub use context::{run_detached, CancelReason, Context};
pub use errors::{PipelineError, ProcessingError, RetryPolicy};
pub use fanin::{merge, merge_with_buffer};
pub use fanout::{dispatch, dispatch_stage};
pub use identifiers::{ContextId, StageName, WorkerId};
pub use select::{poll_in_order, Polled};
pub use sequence::{Sequence, TryRecv};
pub use stage::{run_stage, ErrorPolicy, Stage};
pub use transform::{filter, identity, map, then, try_map, Transform};
pub use types::{BufferSize, Capacity, Rate, RequestLimit, WindowSize, WorkerCount};
