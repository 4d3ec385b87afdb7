//! # Handler abstraction and the closure-backed [`HandlerFn`].
//!
//! A [`Handler`] receives one input (an envelope, a batch, or whatever a middleware
//! turned it into) plus a [`CancellationToken`]. The shared handle is [`HandlerRef`].
//!
//! ## Contract
//! - Return `Err(HandlerError::Canceled)` when giving up because `ctx` fired.
//! - Per-call state lives inside the call; the handler itself is shared by every
//!   worker and must be `Sync`.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::HandlerError;

/// # Asynchronous, cancelable handler of one input.
///
/// # Example
/// ```
/// use async_trait::async_trait;
/// use tokio_util::sync::CancellationToken;
/// use queuevisor::{Envelope, Handler, HandlerError};
///
/// struct Print;
///
/// #[async_trait]
/// impl Handler<Envelope<String>> for Print {
///     async fn handle(&self, input: Envelope<String>, ctx: CancellationToken) -> Result<(), HandlerError> {
///         if ctx.is_cancelled() {
///             return Err(HandlerError::Canceled);
///         }
///         println!("{}", input.payload());
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Handler<In: Send + 'static>: Send + Sync + 'static {
    /// Processes one input until completion or cancellation.
    async fn handle(&self, input: In, ctx: CancellationToken) -> Result<(), HandlerError>;
}

/// Shared handle to a handler.
pub type HandlerRef<In> = Arc<dyn Handler<In>>;

/// Closure-backed handler.
///
/// Wraps `F: Fn(In, CancellationToken) -> Fut`; every call builds a fresh future,
/// so no state is shared between invocations unless the closure captures an `Arc`.
#[derive(Debug)]
pub struct HandlerFn<F> {
    f: F,
}

impl<F> HandlerFn<F> {
    /// Wraps a closure.
    pub fn new(f: F) -> Self {
        Self { f }
    }

    /// Wraps a closure and returns it as a shared handle.
    ///
    /// ## Example
    /// ```rust
    /// use tokio_util::sync::CancellationToken;
    /// use queuevisor::{Envelope, HandlerError, HandlerFn, HandlerRef};
    ///
    /// let h: HandlerRef<Envelope<u32>> = HandlerFn::arc(|env: Envelope<u32>, _ctx: CancellationToken| async move {
    ///     let _ = env.payload();
    ///     Ok::<_, HandlerError>(())
    /// });
    /// ```
    pub fn arc(f: F) -> Arc<Self> {
        Arc::new(Self::new(f))
    }
}

#[async_trait]
impl<In, F, Fut> Handler<In> for HandlerFn<F>
where
    In: Send + 'static,
    F: Fn(In, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, input: In, ctx: CancellationToken) -> Result<(), HandlerError> {
        (self.f)(input, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn closure_handler_sees_input_and_token() {
        let h: HandlerRef<u32> = HandlerFn::arc(|n: u32, ctx: CancellationToken| async move {
            if ctx.is_cancelled() {
                return Err(HandlerError::Canceled);
            }
            if n % 2 == 0 {
                Ok(())
            } else {
                Err(HandlerError::fail(format!("odd {n}")))
            }
        });

        assert!(h.handle(2, CancellationToken::new()).await.is_ok());
        assert!(matches!(
            h.handle(3, CancellationToken::new()).await,
            Err(HandlerError::Fail { .. })
        ));

        let ctx = CancellationToken::new();
        ctx.cancel();
        assert!(h.handle(2, ctx).await.unwrap_err().is_cancellation());
    }
}
