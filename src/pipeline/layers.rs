//! # Small built-in middleware.
//!
//! - [`Timeout`] bounds one invocation; the next stage runs on a child token.
//! - [`Filter`] skips inputs that fail a predicate.
//! - [`MapInput`] converts the input type before delegating.
//! - [`Inspect`] records every outcome and its duration.
//! - [`CatchPanic`] turns a panic of the next stage into [`HandlerError::Panicked`].

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::error::{HandlerError, panic_message};
use crate::pipeline::builder::Middleware;
use crate::pipeline::handler::{Handler, HandlerRef};

/// Cancels and fails an invocation that runs longer than the given duration.
///
/// The next stage gets a child of the ambient token, so firing the timeout never
/// cancels the caller. Elapsed time becomes [`HandlerError::Timeout`] (retryable).
/// `Duration::ZERO` disables the limit.
#[derive(Clone, Copy, Debug)]
pub struct Timeout(pub Duration);

struct TimeoutStage<In: Send + 'static> {
    limit: Duration,
    next: HandlerRef<In>,
}

#[async_trait]
impl<In: Send + 'static> Handler<In> for TimeoutStage<In> {
    async fn handle(&self, input: In, ctx: CancellationToken) -> Result<(), HandlerError> {
        if self.limit.is_zero() {
            return self.next.handle(input, ctx).await;
        }
        let child = ctx.child_token();
        match tokio::time::timeout(self.limit, self.next.handle(input, child.clone())).await {
            Ok(res) => res,
            Err(_elapsed) => {
                child.cancel();
                Err(HandlerError::Timeout {
                    timeout: self.limit,
                })
            }
        }
    }
}

impl<In: Send + 'static> Middleware<In> for Timeout {
    fn wrap(&self, next: HandlerRef<In>) -> HandlerRef<In> {
        Arc::new(TimeoutStage {
            limit: self.0,
            next,
        })
    }
}

/// Skips (succeeds without delegating) inputs for which the predicate is false.
pub struct Filter<F> {
    keep: Arc<F>,
}

impl<F> Filter<F> {
    /// Creates a filter keeping inputs where `keep(&input)` is true.
    pub fn new(keep: F) -> Self {
        Self {
            keep: Arc::new(keep),
        }
    }
}

struct FilterStage<In: Send + 'static, F> {
    keep: Arc<F>,
    next: HandlerRef<In>,
}

#[async_trait]
impl<In, F> Handler<In> for FilterStage<In, F>
where
    In: Send + 'static,
    F: Fn(&In) -> bool + Send + Sync + 'static,
{
    async fn handle(&self, input: In, ctx: CancellationToken) -> Result<(), HandlerError> {
        if !(self.keep)(&input) {
            trace!("input filtered out");
            return Ok(());
        }
        self.next.handle(input, ctx).await
    }
}

impl<In, F> Middleware<In> for Filter<F>
where
    In: Send + 'static,
    F: Fn(&In) -> bool + Send + Sync + 'static,
{
    fn wrap(&self, next: HandlerRef<In>) -> HandlerRef<In> {
        Arc::new(FilterStage {
            keep: Arc::clone(&self.keep),
            next,
        })
    }
}

/// Converts `In` into `Out` before delegating; a conversion error ends the call.
///
/// ## Example
/// ```rust
/// use queuevisor::{Envelope, HandlerError, MapInput};
///
/// // Envelope<String> -> Envelope<u64>, trace context and attributes kept.
/// let parse = MapInput::new(|env: Envelope<String>| {
///     let n = env.payload().parse::<u64>().map_err(|e| HandlerError::fatal(e.to_string()))?;
///     Ok(env.map(|_| n))
/// });
/// # let _ = parse;
/// ```
pub struct MapInput<F, In, Out> {
    f: Arc<F>,
    _types: PhantomData<fn(In) -> Out>,
}

impl<F, In, Out> MapInput<F, In, Out>
where
    F: Fn(In) -> Result<Out, HandlerError>,
{
    /// Creates the conversion stage.
    pub fn new(f: F) -> Self {
        Self {
            f: Arc::new(f),
            _types: PhantomData,
        }
    }
}

struct MapStage<F, In, Out: Send + 'static> {
    f: Arc<F>,
    next: HandlerRef<Out>,
    _in: PhantomData<fn(In)>,
}

#[async_trait]
impl<F, In, Out> Handler<In> for MapStage<F, In, Out>
where
    In: Send + 'static,
    Out: Send + 'static,
    F: Fn(In) -> Result<Out, HandlerError> + Send + Sync + 'static,
{
    async fn handle(&self, input: In, ctx: CancellationToken) -> Result<(), HandlerError> {
        let mapped = (self.f)(input)?;
        self.next.handle(mapped, ctx).await
    }
}

impl<F, In, Out> Middleware<In, Out> for MapInput<F, In, Out>
where
    In: Send + 'static,
    Out: Send + 'static,
    F: Fn(In) -> Result<Out, HandlerError> + Send + Sync + 'static,
{
    fn wrap(&self, next: HandlerRef<Out>) -> HandlerRef<In> {
        Arc::new(MapStage {
            f: Arc::clone(&self.f),
            next,
            _in: PhantomData,
        })
    }
}

/// Observes the outcome and duration of every invocation; the result passes through untouched.
pub struct Inspect<F> {
    record: Arc<F>,
}

impl<F> Inspect<F>
where
    F: Fn(&Result<(), HandlerError>, Duration) + Send + Sync + 'static,
{
    /// Creates the observer.
    pub fn new(record: F) -> Self {
        Self {
            record: Arc::new(record),
        }
    }
}

struct InspectStage<In: Send + 'static, F> {
    record: Arc<F>,
    next: HandlerRef<In>,
}

#[async_trait]
impl<In, F> Handler<In> for InspectStage<In, F>
where
    In: Send + 'static,
    F: Fn(&Result<(), HandlerError>, Duration) + Send + Sync + 'static,
{
    async fn handle(&self, input: In, ctx: CancellationToken) -> Result<(), HandlerError> {
        let started = Instant::now();
        let res = self.next.handle(input, ctx).await;
        (self.record)(&res, started.elapsed());
        res
    }
}

impl<In, F> Middleware<In> for Inspect<F>
where
    In: Send + 'static,
    F: Fn(&Result<(), HandlerError>, Duration) + Send + Sync + 'static,
{
    fn wrap(&self, next: HandlerRef<In>) -> HandlerRef<In> {
        Arc::new(InspectStage {
            record: Arc::clone(&self.record),
            next,
        })
    }
}

/// Converts a panic of the next stage into [`HandlerError::Panicked`].
#[derive(Clone, Copy, Debug, Default)]
pub struct CatchPanic;

struct CatchPanicStage<In: Send + 'static> {
    next: HandlerRef<In>,
}

#[async_trait]
impl<In: Send + 'static> Handler<In> for CatchPanicStage<In> {
    async fn handle(&self, input: In, ctx: CancellationToken) -> Result<(), HandlerError> {
        let fut = self.next.handle(input, ctx);
        match std::panic::AssertUnwindSafe(fut).catch_unwind().await {
            Ok(res) => res,
            Err(payload) => Err(HandlerError::Panicked {
                info: panic_message(&*payload),
            }),
        }
    }
}

impl<In: Send + 'static> Middleware<In> for CatchPanic {
    fn wrap(&self, next: HandlerRef<In>) -> HandlerRef<In> {
        Arc::new(CatchPanicStage { next })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{HandlerFn, PipelineBuilder};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting() -> (Arc<AtomicUsize>, HandlerRef<u32>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let handler: HandlerRef<u32> = HandlerFn::arc(move |_n: u32, _ctx: CancellationToken| {
            h.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, HandlerError>(()) }
        });
        (hits, handler)
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_cancels_child_but_not_caller() {
        let observed = Arc::new(Mutex::new(None));
        let seen = observed.clone();
        let pipeline = PipelineBuilder::<u32>::new()
            .with(Timeout(Duration::from_secs(1)))
            .build(HandlerFn::new(move |_n: u32, ctx: CancellationToken| {
                let seen = seen.clone();
                async move {
                    *seen.lock().unwrap() = Some(ctx.clone());
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    Ok::<_, HandlerError>(())
                }
            }));

        let caller = CancellationToken::new();
        let err = pipeline.handle(1, caller.clone()).await.unwrap_err();
        assert!(matches!(err, HandlerError::Timeout { timeout } if timeout == Duration::from_secs(1)));
        assert!(err.is_retryable());
        assert!(!caller.is_cancelled());
        let child = observed.lock().unwrap().take().unwrap();
        assert!(child.is_cancelled());
    }

    #[tokio::test]
    async fn filter_skips_rejected_inputs() {
        let (hits, h) = counting();
        let pipeline = PipelineBuilder::<u32>::new()
            .with(Filter::new(|n: &u32| *n > 10))
            .build_ref(h);

        for n in [1, 20, 5, 30] {
            pipeline.handle(n, CancellationToken::new()).await.unwrap();
        }
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn map_input_failure_skips_terminal() {
        let (hits, h) = counting();
        let pipeline = PipelineBuilder::<String>::new()
            .with(MapInput::new(|s: String| {
                s.parse::<u32>().map_err(|e| HandlerError::fatal(e.to_string()))
            }))
            .build_ref(h);

        pipeline.handle("7".into(), CancellationToken::new()).await.unwrap();
        let err = pipeline.handle("seven".into(), CancellationToken::new()).await.unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn inspect_sees_every_outcome() {
        let outcomes = Arc::new(Mutex::new(Vec::new()));
        let sink = outcomes.clone();
        let pipeline = PipelineBuilder::<u32>::new()
            .with(Inspect::new(move |res: &Result<(), HandlerError>, _took: Duration| {
                sink.lock().unwrap().push(res.as_ref().map_err(|e| e.as_label()).copied());
            }))
            .build(HandlerFn::new(|n: u32, _ctx: CancellationToken| async move {
                if n == 0 { Err(HandlerError::fail("zero")) } else { Ok(()) }
            }));

        let _ = pipeline.handle(1, CancellationToken::new()).await;
        let _ = pipeline.handle(0, CancellationToken::new()).await;
        assert_eq!(*outcomes.lock().unwrap(), vec![Ok(()), Err("handler_failed")]);
    }

    #[tokio::test]
    async fn catch_panic_reports_panicked() {
        let pipeline = PipelineBuilder::<u32>::new()
            .with(CatchPanic)
            .build(HandlerFn::new(|_n: u32, _ctx: CancellationToken| async move {
                if true {
                    panic!("kaboom");
                }
                Ok::<_, HandlerError>(())
            }));

        match pipeline.handle(1, CancellationToken::new()).await {
            Err(HandlerError::Panicked { info }) => assert_eq!(info, "kaboom"),
            other => panic!("expected Panicked, got {other:?}"),
        }
    }
}
