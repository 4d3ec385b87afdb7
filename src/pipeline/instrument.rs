//! # Tracing-span middleware.
//!
//! [`Instrument`] runs every invocation inside a `tracing` span named `queuevisor.handle`.
//! The envelope's opaque [`TraceContext`](crate::TraceContext) is recorded as the
//! `trace_context` field; nothing is exported, the installed subscriber decides.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::Instrument as _;
use tracing::{Span, debug_span};

use crate::envelope::{Batch, Envelope};
use crate::error::HandlerError;
use crate::pipeline::builder::Middleware;
use crate::pipeline::handler::{Handler, HandlerRef};

/// Wraps each invocation in a span carrying the queue name and trace context.
#[derive(Clone, Debug)]
pub struct Instrument {
    name: Arc<str>,
}

impl Instrument {
    /// Creates the middleware; `name` is recorded as the `queue` span field.
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self { name: name.into() }
    }
}

/// Describes an input for span fields.
trait SpanInput {
    fn span(&self, queue: &str) -> Span;
}

impl<T> SpanInput for Envelope<T> {
    fn span(&self, queue: &str) -> Span {
        debug_span!(
            "queuevisor.handle",
            queue,
            trace_context = self.trace_context().map(|c| c.as_str()),
            items = 1usize,
        )
    }
}

impl<T> SpanInput for Batch<T> {
    fn span(&self, queue: &str) -> Span {
        let ctx = self.items().iter().find_map(|e| e.trace_context());
        debug_span!(
            "queuevisor.handle",
            queue,
            trace_context = ctx.map(|c| c.as_str()),
            items = self.len(),
            window = %self.window(),
        )
    }
}

struct InstrumentStage<In: Send + 'static> {
    name: Arc<str>,
    next: HandlerRef<In>,
}

#[async_trait]
impl<In> Handler<In> for InstrumentStage<In>
where
    In: SpanInput + Send + 'static,
{
    async fn handle(&self, input: In, ctx: CancellationToken) -> Result<(), HandlerError> {
        let span = input.span(&self.name);
        self.next.handle(input, ctx).instrument(span).await
    }
}

impl<T: Send + 'static> Middleware<Envelope<T>> for Instrument {
    fn wrap(&self, next: HandlerRef<Envelope<T>>) -> HandlerRef<Envelope<T>> {
        Arc::new(InstrumentStage {
            name: Arc::clone(&self.name),
            next,
        })
    }
}

impl<T: Send + 'static> Middleware<Batch<T>> for Instrument {
    fn wrap(&self, next: HandlerRef<Batch<T>>) -> HandlerRef<Batch<T>> {
        Arc::new(InstrumentStage {
            name: Arc::clone(&self.name),
            next,
        })
    }
}
