//! # Background queue facade.
//!
//! [`BackgroundQueue`] owns a buffer, a consumer loop and a handler pipeline. Producers
//! call [`enqueue`](BackgroundQueue::enqueue); the loop pulls envelopes (or batches of
//! them) and runs the pipeline on a [`BoundedExecutor`].
//!
//! ```text
//! producers ──enqueue──► Buffer(capacity, FullMode)
//!                            │ into_stream
//!                            ▼
//!                      framer (identity | BatchingStream)
//!                            │
//!                            ▼
//!                      Dispatch ──► BoundedExecutor ──► pipeline(unit, hard)
//! ```
//!
//! ## Shutdown
//! ```text
//! stop(grace) ──► Stopping ──► completion trigger ──► buffer.close()
//!                                                       │
//!                      loop drains the rest, waits in-flight ──► Stopped
//!                      deadline fires first ──► hard.cancel + abort ──► GraceExceeded
//! ```
//! Cancelling the `execute` token has the same effect as `stop` minus the trigger and
//! the deadline.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::batch::{BatchBuilder, CountBatchBuilder};
use crate::config::{FullMode, QueueConfig};
use crate::core::Service;
use crate::envelope::{Batch, Envelope};
use crate::error::{ConfigError, EnqueueError, LifecycleError, QueueError};
use crate::events::{Bus, Event, EventKind};
use crate::executor::BoundedExecutor;
use crate::pipeline::HandlerRef;
use crate::queue::buffer::{Buffer, Pushed};
use crate::queue::dispatch::{self, Dispatch, Framer, WorkUnit};
use crate::queue::lifecycle::{Lifecycle, QueueState};

/// Buffered queue with a supervised consumer loop.
///
/// `U` is the unit handed to the pipeline: `Envelope<T>` for item-at-a-time queues,
/// `Batch<T>` for batched ones.
///
/// ## Example
/// ```rust
/// use std::sync::{Arc, Mutex};
/// use std::time::Duration;
/// use tokio_util::sync::CancellationToken;
/// use queuevisor::{BackgroundQueue, Envelope, HandlerError, HandlerFn, HandlerRef, QueueConfig, Service};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let seen = Arc::new(Mutex::new(Vec::new()));
/// let sink = seen.clone();
/// let handler: HandlerRef<Envelope<u32>> = HandlerFn::arc(move |env: Envelope<u32>, _ctx: CancellationToken| {
///     sink.lock().unwrap().push(*env.payload());
///     async { Ok::<_, HandlerError>(()) }
/// });
///
/// let queue = Arc::new(BackgroundQueue::new("numbers", QueueConfig::default(), handler).unwrap());
/// queue.start(CancellationToken::new()).await.unwrap();
/// let worker = tokio::spawn({
///     let queue = queue.clone();
///     async move { queue.execute(CancellationToken::new()).await }
/// });
///
/// queue.enqueue(Envelope::new(1)).await.unwrap();
/// queue.enqueue(Envelope::new(2)).await.unwrap();
/// queue.stop(Duration::from_secs(5)).await.unwrap();
/// worker.await.unwrap().unwrap();
/// assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
/// # }
/// ```
pub struct BackgroundQueue<T, U = Envelope<T>>
where
    T: Send + 'static,
    U: WorkUnit,
{
    cfg: QueueConfig,
    life: Lifecycle,
    buffer: Buffer<T>,
    framer: Mutex<Option<Framer<T, U>>>,
    dispatch: Dispatch<U>,
}

impl<T: Send + 'static> BackgroundQueue<T, Envelope<T>> {
    /// Creates a queue handing envelopes to `handler` one at a time.
    pub fn new(
        name: impl Into<Arc<str>>,
        cfg: QueueConfig,
        handler: HandlerRef<Envelope<T>>,
    ) -> Result<Self, ConfigError> {
        Self::assemble(name.into(), cfg, handler, dispatch::unframed())
    }
}

impl<T: Send + 'static> BackgroundQueue<T, Batch<T>> {
    /// Creates a queue handing batches bounded by `batch_max_size` / `batch_time_window`.
    pub fn batched(
        name: impl Into<Arc<str>>,
        cfg: QueueConfig,
        handler: HandlerRef<Batch<T>>,
    ) -> Result<Self, ConfigError> {
        let (max_size, window) = (cfg.batch_max_size, cfg.batch_time_window);
        Self::batched_with(name, cfg, move || CountBatchBuilder::new(max_size, window), handler)
    }

    /// Creates a batched queue with a custom builder (e.g. a [`WeightedBatchBuilder`]).
    ///
    /// `factory` is called once per window.
    ///
    /// [`WeightedBatchBuilder`]: crate::WeightedBatchBuilder
    pub fn batched_with<B, F>(
        name: impl Into<Arc<str>>,
        cfg: QueueConfig,
        factory: F,
        handler: HandlerRef<Batch<T>>,
    ) -> Result<Self, ConfigError>
    where
        B: BatchBuilder<T> + 'static,
        F: FnMut() -> B + Send + 'static,
    {
        let framer = dispatch::batched(factory, cfg.oversize);
        Self::assemble(name.into(), cfg, handler, framer)
    }
}

impl<T, U> BackgroundQueue<T, U>
where
    T: Send + 'static,
    U: WorkUnit,
{
    fn assemble(
        name: Arc<str>,
        cfg: QueueConfig,
        handler: HandlerRef<U>,
        framer: Framer<T, U>,
    ) -> Result<Self, ConfigError> {
        cfg.validate()?;
        Ok(Self {
            buffer: Buffer::new(cfg.capacity_clamped(), cfg.full_mode),
            framer: Mutex::new(Some(framer)),
            dispatch: Dispatch {
                name: Arc::clone(&name),
                handler,
                executor: BoundedExecutor::new(cfg.concurrency_clamped()),
                bus: Bus::new(cfg.bus_capacity_clamped()),
                break_on_error: cfg.break_on_error,
            },
            life: Lifecycle::new(name),
            cfg,
        })
    }

    /// Publishes delivery events on `bus` instead of the queue's private one.
    #[must_use]
    pub fn with_bus(mut self, bus: Bus) -> Self {
        self.dispatch.bus = bus;
        self
    }

    /// Current lifecycle state.
    pub fn state(&self) -> QueueState {
        self.life.state()
    }

    /// Number of buffered (not yet dispatched) envelopes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// True if nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of handler invocations in flight.
    pub fn in_flight(&self) -> usize {
        self.dispatch.executor.in_flight()
    }

    /// Configuration the queue was built with.
    pub fn config(&self) -> &QueueConfig {
        &self.cfg
    }

    /// Writes one envelope, applying the overflow policy when the buffer is full.
    ///
    /// Under [`FullMode::Wait`] this suspends until there is room or the buffer closes.
    pub async fn enqueue(&self, envelope: Envelope<T>) -> Result<(), EnqueueError<T>> {
        let envelope = self.admit(envelope)?;
        let pushed = self.buffer.push(envelope, None).await;
        self.settle(pushed)
    }

    /// Like [`enqueue`](Self::enqueue), giving up with `Canceled` when `cancel` fires.
    pub async fn enqueue_with_cancel(
        &self,
        envelope: Envelope<T>,
        cancel: &CancellationToken,
    ) -> Result<(), EnqueueError<T>> {
        let envelope = self.admit(envelope)?;
        let pushed = self.buffer.push(envelope, Some(cancel)).await;
        self.settle(pushed)
    }

    /// Writes without suspending; a full `Wait` buffer fails with `Full`.
    pub fn try_enqueue(&self, envelope: Envelope<T>) -> Result<(), EnqueueError<T>> {
        let envelope = self.admit(envelope)?;
        let pushed = self.buffer.try_push(envelope);
        self.settle(pushed)
    }

    fn admit(&self, envelope: Envelope<T>) -> Result<Envelope<T>, EnqueueError<T>> {
        match self.life.accepting() {
            Ok(()) => Ok(envelope),
            Err(state) => Err(EnqueueError::NotRunning {
                envelope,
                state: state.as_str(),
            }),
        }
    }

    fn settle(&self, pushed: Result<Pushed<T>, EnqueueError<T>>) -> Result<(), EnqueueError<T>> {
        let name = self.life.name();
        match pushed {
            Ok(Pushed::Accepted) => Ok(()),
            Ok(Pushed::Evicted(_lost)) => {
                let reason = match self.cfg.full_mode {
                    FullMode::DropNewest => "drop_newest",
                    _ => "drop_oldest",
                };
                debug!(queue = %name, reason, "buffer full; item evicted");
                self.dispatch.bus.publish(
                    Event::new(EventKind::ItemDropped)
                        .with_service(Arc::clone(name))
                        .with_reason(reason)
                        .with_count(1),
                );
                Ok(())
            }
            Err(EnqueueError::Full(env)) if self.cfg.full_mode == FullMode::Reject => {
                debug!(queue = %name, "buffer full; item rejected");
                self.dispatch.bus.publish(
                    Event::new(EventKind::ItemRejected)
                        .with_service(Arc::clone(name))
                        .with_reason("reject")
                        .with_count(1),
                );
                Err(EnqueueError::Full(env))
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl<T, U> Service for BackgroundQueue<T, U>
where
    T: Send + 'static,
    U: WorkUnit,
{
    fn name(&self) -> &str {
        self.life.name()
    }

    fn bus(&self) -> Option<Bus> {
        Some(self.dispatch.bus.clone())
    }

    async fn start(&self, _ctx: CancellationToken) -> Result<(), QueueError> {
        self.life.begin_start()?;
        self.life.mark_running();
        debug!(queue = %self.life.name(), capacity = ?self.cfg.capacity, max_concurrency = self.cfg.max_concurrency, "queue started");
        Ok(())
    }

    async fn execute(&self, ctx: CancellationToken) -> Result<(), QueueError> {
        if !self.life.begin_execute()? {
            debug!(queue = %self.life.name(), "nothing left to consume");
            return Ok(());
        }
        self.consume(ctx).await
    }

    async fn stop(&self, grace: Duration) -> Result<(), QueueError> {
        let buffer = self.buffer.clone();
        self.life
            .stop(
                grace,
                &self.cfg.completion_trigger,
                move || buffer.close(),
                &self.dispatch.executor,
                self.consume(CancellationToken::new()),
            )
            .await
    }
}

impl<T, U> BackgroundQueue<T, U>
where
    T: Send + 'static,
    U: WorkUnit,
{
    /// Runs the consumer loop; the caller has claimed it.
    async fn consume(&self, ctx: CancellationToken) -> Result<(), QueueError> {
        let framer = self.framer.lock().unwrap_or_else(PoisonError::into_inner).take();
        let Some(framer) = framer else {
            let res = Err(LifecycleError::AlreadyStarted {
                name: self.life.name().to_string(),
            }
            .into());
            self.life.finish(&res);
            return res;
        };

        let units = framer(self.buffer.clone().into_stream());
        let run = self.dispatch.run(units, self.life.hard());
        tokio::pin!(run);

        let res = tokio::select! {
            res = &mut run => res,
            _ = ctx.cancelled() => {
                debug!(queue = %self.life.name(), "shutdown requested; draining");
                self.life.mark_stopping();
                self.buffer.close();
                run.await
            }
        };

        self.buffer.close();
        self.life.finish(&res);
        res
    }
}
