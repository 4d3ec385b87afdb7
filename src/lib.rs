//! # queuevisor
//!
//! **Queuevisor** is a supervised background queue engine for tokio.
//!
//! It accepts items from any number of producers, buffers them under an overflow
//! policy, optionally groups them into size/time bounded batches, fans in dynamic
//! sources, and runs every unit through a composable middleware pipeline with bounded
//! concurrency. A [`Supervisor`] owns the lifecycle (start, run, graceful drain,
//! forced exit) and exposes readiness/liveness.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!  producer  producer  producer            source A   source B   source N
//!     │         │         │                   │          │          │
//!     └──── enqueue ──────┘                   └──── StreamMerger ───┘
//!               ▼                                        ▼
//!    ┌─────────────────────┐                  ┌─────────────────────┐
//!    │   BackgroundQueue   │                  │   SourceConsumer    │
//!    │ Buffer(cap, mode)   │                  │ MergedStream        │
//!    └──────────┬──────────┘                  └──────────┬──────────┘
//!               └───────────────┬────────────────────────┘
//!                               ▼
//!                 BatchingStream (optional: size OR window)
//!                               ▼
//!                 BoundedExecutor (≤ max_concurrency in flight)
//!                               ▼
//!     PipelineBuilder: Instrument ─► Retry ─► Timeout ─► ... ─► terminal Handler
//!                               │
//!                               │ publishes HandlerFailed / ItemDropped / ...
//!                               ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                    Bus (broadcast channel)                        │
//! └─────────────────────────────┬─────────────────────────────────────┘
//!                               ▼
//!                  SubscriberSet ─► LogWriter, custom Subscribe impls
//! ```
//!
//! ### Lifecycle
//! ```text
//! Supervisor::start()  ──► service.start ──► spawn service.execute
//!                                                  │
//! Supervisor::stop()   ──► service.stop(grace):    │
//!   ├─► completion trigger                         │
//!   ├─► close input (buffer / merger)              ▼
//!   ├─► consumer loop drains the rest, waits for in-flight units
//!   │       ├─ drained in time ──► DrainedWithinGrace, Stopped
//!   │       └─ deadline fired  ──► abort in-flight, GraceExceeded
//!   └─► execute returned Err / panicked at any point ──► Crashed (terminal)
//! ```
//!
//! ## Features
//! | Area             | Description                                                   | Key types / traits                                   |
//! |------------------|---------------------------------------------------------------|------------------------------------------------------|
//! | **Queues**       | Push-side buffered queue, pull-side fan-in consumer.          | [`BackgroundQueue`], [`SourceConsumer`]              |
//! | **Batching**     | Size/weight caps with a rolling time window.                  | [`BatchingStream`], [`BatchBuilder`]                 |
//! | **Fan-in**       | Merge a dynamic set of streams.                               | [`StreamMerger`]                                     |
//! | **Concurrency**  | Cap in-flight work, drain, abort.                             | [`BoundedExecutor`]                                  |
//! | **Pipeline**     | Handlers wrapped by ordered middleware.                       | [`Handler`], [`Middleware`], [`PipelineBuilder`]     |
//! | **Supervision**  | Lifecycle, crash capture, health probes, OS signals.          | [`Supervisor`], [`Service`]                          |
//! | **Events**       | Lifecycle and delivery events for subscribers.                | [`Event`], [`Subscribe`]                             |
//! | **Errors**       | Typed errors with stable labels.                              | [`QueueError`], [`HandlerError`], [`EnqueueError`]   |
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//! use queuevisor::{
//!     BackgroundQueue, BackoffPolicy, Envelope, HandlerError, HandlerFn, Instrument,
//!     PipelineBuilder, QueueConfig, Retry, Supervisor, SupervisorConfig, Timeout,
//! };
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pipeline = PipelineBuilder::<Envelope<String>>::new()
//!         .with(Instrument::new("emails"))
//!         .with(Retry::new(3, BackoffPolicy::default()))
//!         .with(Timeout(Duration::from_secs(2)))
//!         .build(HandlerFn::new(|env: Envelope<String>, _ctx: CancellationToken| async move {
//!             if env.payload().is_empty() {
//!                 return Err(HandlerError::fatal("empty address"));
//!             }
//!             Ok(())
//!         }));
//!
//!     let cfg = QueueConfig { max_concurrency: 4, capacity: Some(1000), ..QueueConfig::default() };
//!     let queue = Arc::new(BackgroundQueue::new("emails", cfg, pipeline)?);
//!
//!     let sup = Supervisor::builder(queue.clone())
//!         .with_config(SupervisorConfig { grace: Duration::from_secs(5), ..SupervisorConfig::default() })
//!         .build();
//!     sup.start().await?;
//!
//!     queue.enqueue(Envelope::new("ops@example.com".to_string())).await?;
//!     sup.stop().await?;
//!     Ok(())
//! }
//! ```
mod batch;
mod config;
mod core;
mod envelope;
mod error;
mod events;
mod executor;
mod merge;
mod pipeline;
mod policies;
mod queue;
mod subscribers;

// ---- Public re-exports ----

pub use batch::{BatchBuilder, BatchingStream, CountBatchBuilder, TryAdd, WeightedBatchBuilder};
pub use config::{CompletionTrigger, FullMode, OversizePolicy, QueueConfig, SupervisorConfig};
pub use core::{
    HealthReport, HealthStatus, Service, Supervisor, SupervisorBuilder, SupervisorState,
    wait_for_shutdown_signal,
};
pub use envelope::{Attributes, Batch, Envelope, TraceContext, WindowId};
pub use error::{
    BatchError, ConfigError, EnqueueError, ExecutorError, HandlerError, LifecycleError, MergeError,
    QueueError,
};
pub use events::{Bus, Event, EventKind};
pub use executor::BoundedExecutor;
pub use merge::{MergedStream, SourceId, StreamMerger};
pub use pipeline::{
    CatchPanic, Filter, Handler, HandlerFn, HandlerRef, Inspect, Instrument, MapInput, Middleware,
    MiddlewareFn, PipelineBuilder, Retry, ScopeFactory, Scoped, Timeout, WithScope, middleware_fn,
};
pub use policies::{BackoffPolicy, JitterPolicy};
pub use queue::{BackgroundQueue, QueueState, SourceConsumer, WorkUnit};
pub use subscribers::{LogWriter, Subscribe, SubscriberSet};
