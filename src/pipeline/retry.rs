//! # Retry middleware.
//!
//! Re-invokes the next stage while it fails with a retryable error
//! ([`HandlerError::is_retryable`]), sleeping [`BackoffPolicy::next`] between attempts.
//!
//! ## Rules
//! - `Canceled` and non-retryable errors (`Fatal`, `Panicked`) return at once, unchanged.
//! - A retryable error seen after the ambient token fired (or a backoff sleep cut short
//!   by it) ends the call with `Canceled`.
//! - `max_attempts` counts the first call; `1` disables retrying.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::HandlerError;
use crate::pipeline::builder::Middleware;
use crate::pipeline::handler::{Handler, HandlerRef};
use crate::policies::BackoffPolicy;

/// Retries failed invocations with backoff.
///
/// The input is cloned once per attempt.
#[derive(Clone, Copy, Debug)]
pub struct Retry {
    max_attempts: u32,
    backoff: BackoffPolicy,
}

impl Retry {
    /// Creates a retry middleware making at most `max_attempts` calls (min 1).
    pub fn new(max_attempts: u32, backoff: BackoffPolicy) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }
}

struct RetryStage<In: Send + 'static> {
    policy: Retry,
    next: HandlerRef<In>,
}

#[async_trait]
impl<In> Handler<In> for RetryStage<In>
where
    In: Clone + Send + 'static,
{
    async fn handle(&self, input: In, ctx: CancellationToken) -> Result<(), HandlerError> {
        let mut attempt: u32 = 0;
        loop {
            let this_try = input.clone();
            let err = match self.next.handle(this_try, ctx.clone()).await {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };
            if err.is_cancellation() {
                return Err(HandlerError::Canceled);
            }
            attempt += 1;
            if !err.is_retryable() || attempt >= self.policy.max_attempts {
                return Err(err);
            }
            if ctx.is_cancelled() {
                return Err(HandlerError::Canceled);
            }

            let delay = self.policy.backoff.next(attempt - 1);
            debug!(attempt, ?delay, reason = %err, "retrying handler");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = ctx.cancelled() => return Err(HandlerError::Canceled),
            }
        }
    }
}

impl<In> Middleware<In> for Retry
where
    In: Clone + Send + 'static,
{
    fn wrap(&self, next: HandlerRef<In>) -> HandlerRef<In> {
        Arc::new(RetryStage { policy: *self, next })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{HandlerFn, PipelineBuilder};
    use crate::policies::JitterPolicy;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tokio::time::Instant;

    fn backoff() -> BackoffPolicy {
        BackoffPolicy {
            first: Duration::from_millis(100),
            max: Duration::from_secs(1),
            factor: 2.0,
            jitter: JitterPolicy::None,
        }
    }

    fn flaky(fail_times: u32, err: HandlerError) -> (Arc<AtomicU32>, HandlerRef<u8>) {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let h: HandlerRef<u8> = HandlerFn::arc(move |_n: u8, _ctx: CancellationToken| {
            let n = c.fetch_add(1, Ordering::SeqCst);
            let err = err.clone();
            async move { if n < fail_times { Err(err) } else { Ok(()) } }
        });
        (calls, h)
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success_with_backoff() {
        let (calls, h) = flaky(2, HandlerError::fail("flaky"));
        let pipeline = PipelineBuilder::<u8>::new()
            .with(Retry::new(5, backoff()))
            .build_ref(h);

        let start = Instant::now();
        pipeline.handle(1, CancellationToken::new()).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(start.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let (calls, h) = flaky(u32::MAX, HandlerError::fail("down"));
        let pipeline = PipelineBuilder::<u8>::new().with(Retry::new(3, backoff())).build_ref(h);

        let err = pipeline.handle(1, CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, HandlerError::Fail { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fatal_is_not_retried() {
        let (calls, h) = flaky(u32::MAX, HandlerError::fatal("bad input"));
        let pipeline = PipelineBuilder::<u8>::new().with(Retry::new(3, backoff())).build_ref(h);

        assert!(pipeline.handle(1, CancellationToken::new()).await.unwrap_err().is_fatal());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_during_backoff_is_reraised_as_canceled() {
        let (calls, h) = flaky(u32::MAX, HandlerError::fail("down"));
        let pipeline = PipelineBuilder::<u8>::new().with(Retry::new(10, backoff())).build_ref(h);

        let ctx = CancellationToken::new();
        let stopper = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            stopper.cancel();
        });

        let err = pipeline.handle(1, ctx).await.unwrap_err();
        assert!(err.is_cancellation());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn fatal_after_shutdown_is_not_masked() {
        let h: HandlerRef<u8> = HandlerFn::arc(|_n: u8, ctx: CancellationToken| async move {
            ctx.cancelled().await;
            Err(HandlerError::fatal("corrupt record"))
        });
        let pipeline = PipelineBuilder::<u8>::new().with(Retry::new(3, backoff())).build_ref(h);

        let ctx = CancellationToken::new();
        ctx.cancel();
        let err = pipeline.handle(1, ctx).await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn retryable_error_after_shutdown_becomes_canceled() {
        let (calls, h) = flaky(u32::MAX, HandlerError::fail("down"));
        let pipeline = PipelineBuilder::<u8>::new().with(Retry::new(5, backoff())).build_ref(h);

        let ctx = CancellationToken::new();
        ctx.cancel();
        assert!(pipeline.handle(1, ctx).await.unwrap_err().is_cancellation());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
