//! # Consumer loop shared by queues and source consumers.
//!
//! Pulls units (envelopes or batches) from a stream and runs each through the pipeline on
//! the [`BoundedExecutor`].
//!
//! ```text
//! loop:
//!   halt fired?              ──► break
//!   units.next() == None     ──► break
//!   executor.start(handle(unit))      (suspends while saturated)
//!
//! per unit (spawned):
//!   Ok                       ──► -
//!   Err(Canceled)            ──► debug, never a failure
//!   Err(e) / panic           ──► warn + HandlerFailed/HandlerPanicked event
//!        fatal or break_on_error ──► record, fire halt
//!
//! after loop: executor.wait(hard) ──► Err(HandlerFatal) if recorded, else Ok
//! ```
//!
//! ## Tokens
//! - `hard`: handed to every handler; fires only on forced exit. Graceful shutdown closes
//!   the input instead, so in-flight units finish.
//! - `halt`: child of `hard`; stops the intake after a fatal failure.

use std::sync::{Arc, Mutex, PoisonError};

use futures::stream::BoxStream;
use futures::{FutureExt, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::batch::{BatchBuilder, BatchingStream};
use crate::config::OversizePolicy;
use crate::envelope::{Batch, Envelope};
use crate::error::{HandlerError, QueueError, panic_message};
use crate::events::{Bus, Event, EventKind};
use crate::executor::BoundedExecutor;
use crate::pipeline::HandlerRef;

/// Something a consumer loop hands to its pipeline in one invocation.
pub trait WorkUnit: Send + 'static {
    /// Number of items the unit carries (for logs and events).
    fn item_count(&self) -> usize;
}

impl<T: Send + 'static> WorkUnit for Envelope<T> {
    fn item_count(&self) -> usize {
        1
    }
}

impl<T: Send + 'static> WorkUnit for Batch<T> {
    fn item_count(&self) -> usize {
        self.len()
    }
}

/// Turns the raw envelope stream into the units handed to the pipeline.
pub(crate) type Framer<T, U> =
    Box<dyn FnOnce(BoxStream<'static, Envelope<T>>) -> BoxStream<'static, U> + Send>;

/// One envelope per unit.
pub(crate) fn unframed<T: Send + 'static>() -> Framer<T, Envelope<T>> {
    Box::new(|units| units)
}

/// Batches built by `factory`, one builder per window.
pub(crate) fn batched<T, B, F>(factory: F, oversize: OversizePolicy) -> Framer<T, Batch<T>>
where
    T: Send + 'static,
    B: BatchBuilder<T> + 'static,
    F: FnMut() -> B + Send + 'static,
{
    Box::new(move |units| BatchingStream::new(units, factory, oversize).boxed())
}

pub(crate) struct Dispatch<U: WorkUnit> {
    pub(crate) name: Arc<str>,
    pub(crate) handler: HandlerRef<U>,
    pub(crate) executor: BoundedExecutor,
    pub(crate) bus: Bus,
    pub(crate) break_on_error: bool,
}

impl<U: WorkUnit> Dispatch<U> {
    /// Drains `units` until it ends, a fatal failure halts it, or `hard` fires.
    pub(crate) async fn run(
        &self,
        mut units: BoxStream<'static, U>,
        hard: &CancellationToken,
    ) -> Result<(), QueueError> {
        let halt = hard.child_token();
        let fatal: Arc<Mutex<Option<HandlerError>>> = Arc::new(Mutex::new(None));

        loop {
            let unit = tokio::select! {
                biased;
                _ = halt.cancelled() => break,
                next = units.next() => match next {
                    Some(unit) => unit,
                    None => break,
                },
            };

            let work = self.invoke(unit, hard.clone(), halt.clone(), Arc::clone(&fatal));
            if self.executor.start(work, &halt).await.is_err() {
                break;
            }
        }

        if self.executor.wait(hard).await.is_err() {
            debug!(queue = %self.name, in_flight = self.executor.in_flight(), "drain interrupted by forced exit");
        }

        let recorded = fatal.lock().unwrap_or_else(PoisonError::into_inner).take();
        match recorded {
            Some(source) => Err(QueueError::HandlerFatal {
                name: self.name.to_string(),
                source,
            }),
            None => Ok(()),
        }
    }

    fn invoke(
        &self,
        unit: U,
        hard: CancellationToken,
        halt: CancellationToken,
        fatal: Arc<Mutex<Option<HandlerError>>>,
    ) -> impl Future<Output = ()> + Send + 'static {
        let handler = Arc::clone(&self.handler);
        let name = Arc::clone(&self.name);
        let bus = self.bus.clone();
        let break_on_error = self.break_on_error;

        async move {
            let count = unit.item_count();
            let call = std::panic::AssertUnwindSafe(handler.handle(unit, hard));
            let res = call.catch_unwind().await.unwrap_or_else(|payload| {
                Err(HandlerError::Panicked {
                    info: panic_message(&*payload),
                })
            });

            let err = match res {
                Ok(()) => return,
                Err(e) if e.is_cancellation() => {
                    debug!(queue = %name, count, "handler cancelled");
                    return;
                }
                Err(e) => e,
            };

            warn!(queue = %name, count, reason = %err, label = err.as_label(), "handler failed");
            let kind = match err {
                HandlerError::Panicked { .. } => EventKind::HandlerPanicked,
                _ => EventKind::HandlerFailed,
            };
            bus.publish(
                Event::new(kind)
                    .with_service(Arc::clone(&name))
                    .with_reason(err.to_string())
                    .with_count(count as u64),
            );

            if err.is_fatal() || break_on_error {
                let mut slot = fatal.lock().unwrap_or_else(PoisonError::into_inner);
                slot.get_or_insert(err);
                halt.cancel();
            }
        }
    }
}
