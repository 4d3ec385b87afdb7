//! # Fan-in consumer over dynamic sources.
//!
//! [`SourceConsumer`] is the pull-side sibling of [`BackgroundQueue`](crate::BackgroundQueue):
//! instead of an enqueue buffer it reads a permanent [`StreamMerger`], so producers
//! attach whole streams at any time with [`add_source`](SourceConsumer::add_source).
//!
//! ```text
//! source A ──┐
//! source B ──┼──► MergedStream (permanent) ──► framer ──► Dispatch ──► pipeline
//! source N ──┘            ▲
//!        add_source ──────┘     stop / ctx ──► merger.close() ──► sources end ──► drain
//! ```

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::batch::{BatchBuilder, CountBatchBuilder};
use crate::config::{CompletionTrigger, QueueConfig};
use crate::core::Service;
use crate::envelope::{Batch, Envelope};
use crate::error::{ConfigError, LifecycleError, MergeError, QueueError};
use crate::events::Bus;
use crate::executor::BoundedExecutor;
use crate::merge::{MergedStream, SourceId, StreamMerger};
use crate::pipeline::HandlerRef;
use crate::queue::dispatch::{self, Dispatch, Framer, WorkUnit};
use crate::queue::lifecycle::{Lifecycle, QueueState};

/// Supervised consumer of a dynamic set of envelope streams.
pub struct SourceConsumer<T, U = Envelope<T>>
where
    T: Send + 'static,
    U: WorkUnit,
{
    life: Lifecycle,
    completion: CompletionTrigger,
    merger: StreamMerger<Envelope<T>>,
    merged: Mutex<Option<MergedStream<Envelope<T>>>>,
    framer: Mutex<Option<Framer<T, U>>>,
    dispatch: Dispatch<U>,
}

impl<T: Send + 'static> SourceConsumer<T, Envelope<T>> {
    /// Creates a consumer handing envelopes to `handler` one at a time.
    ///
    /// `capacity`/`full_mode` do not apply: sources are pulled, never buffered.
    pub fn new(
        name: impl Into<Arc<str>>,
        cfg: QueueConfig,
        handler: HandlerRef<Envelope<T>>,
    ) -> Result<Self, ConfigError> {
        Self::assemble(name.into(), cfg, handler, dispatch::unframed())
    }
}

impl<T: Send + 'static> SourceConsumer<T, Batch<T>> {
    /// Creates a consumer batching the merged input by count and time window.
    pub fn batched(
        name: impl Into<Arc<str>>,
        cfg: QueueConfig,
        handler: HandlerRef<Batch<T>>,
    ) -> Result<Self, ConfigError> {
        let (max_size, window) = (cfg.batch_max_size, cfg.batch_time_window);
        Self::batched_with(name, cfg, move || CountBatchBuilder::new(max_size, window), handler)
    }

    /// Creates a batched consumer with a custom builder factory.
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

impl<T, U> SourceConsumer<T, U>
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
        let (merger, merged) = StreamMerger::permanent();
        Ok(Self {
            completion: cfg.completion_trigger.clone(),
            merger,
            merged: Mutex::new(Some(merged)),
            framer: Mutex::new(Some(framer)),
            dispatch: Dispatch {
                name: Arc::clone(&name),
                handler,
                executor: BoundedExecutor::new(cfg.concurrency_clamped()),
                bus: Bus::new(cfg.bus_capacity_clamped()),
                break_on_error: cfg.break_on_error,
            },
            life: Lifecycle::new(name),
        })
    }

    /// Publishes delivery events on `bus` instead of the consumer's private one.
    #[must_use]
    pub fn with_bus(mut self, bus: Bus) -> Self {
        self.dispatch.bus = bus;
        self
    }

    /// Attaches a source; its envelopes interleave with the others.
    ///
    /// Fails with [`MergeError::Closed`] once the consumer is stopping.
    pub fn add_source<S>(&self, source: S) -> Result<SourceId, MergeError>
    where
        S: Stream<Item = Envelope<T>> + Send + 'static,
    {
        let id = self.merger.add(source)?;
        debug!(consumer = %self.life.name(), source = %id, "source attached");
        Ok(id)
    }

    /// Detaches a live source. Returns false if unknown or already exhausted.
    pub fn remove_source(&self, id: SourceId) -> bool {
        self.merger.remove(id)
    }

    /// Snapshot of the attached sources.
    pub fn sources(&self) -> Arc<Vec<SourceId>> {
        self.merger.sources()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> QueueState {
        self.life.state()
    }

    async fn consume(&self, ctx: CancellationToken) -> Result<(), QueueError> {
        let merged = self.merged.lock().unwrap_or_else(PoisonError::into_inner).take();
        let framer = self.framer.lock().unwrap_or_else(PoisonError::into_inner).take();
        let (Some(merged), Some(framer)) = (merged, framer) else {
            let res = Err(LifecycleError::AlreadyStarted {
                name: self.life.name().to_string(),
            }
            .into());
            self.life.finish(&res);
            return res;
        };

        let run = self.dispatch.run(framer(merged.boxed()), self.life.hard());
        tokio::pin!(run);

        let res = tokio::select! {
            res = &mut run => res,
            _ = ctx.cancelled() => {
                debug!(consumer = %self.life.name(), "shutdown requested; detaching sources");
                self.life.mark_stopping();
                self.merger.close();
                run.await
            }
        };

        self.merger.close();
        self.life.finish(&res);
        res
    }
}

#[async_trait]
impl<T, U> Service for SourceConsumer<T, U>
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
        Ok(())
    }

    async fn execute(&self, ctx: CancellationToken) -> Result<(), QueueError> {
        if !self.life.begin_execute()? {
            return Ok(());
        }
        self.consume(ctx).await
    }

    async fn stop(&self, grace: Duration) -> Result<(), QueueError> {
        let merger = self.merger.clone();
        self.life
            .stop(
                grace,
                &self.completion,
                move || merger.close(),
                &self.dispatch.executor,
                self.consume(CancellationToken::new()),
            )
            .await
    }
}
