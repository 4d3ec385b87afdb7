//! # Middleware and pipeline composition.
//!
//! A [`Middleware`] is a function `HandlerRef<Out> -> HandlerRef<In>`: it receives the
//! next stage and returns the stage that runs before it. [`PipelineBuilder`] composes an
//! ordered list of them around a terminal handler.
//!
//! ```text
//! PipelineBuilder::new()
//!     .with(A)          // runs first, wraps B and the terminal
//!     .with(B)
//!     .build(terminal)  ──► A.wrap(B.wrap(terminal))
//! ```
//!
//! ## Rules
//! - Append order equals outer-to-inner wrapping order.
//! - Composition happens once, at `build`; the result is a plain [`HandlerRef`] that is
//!   invoked many times.
//! - Middleware may change the input type (`In -> Out`); the builder tracks it statically.

use std::sync::Arc;

use crate::pipeline::handler::{Handler, HandlerRef};

/// Wraps the next stage of a pipeline.
pub trait Middleware<In, Out = In>: Send + Sync + 'static
where
    In: Send + 'static,
    Out: Send + 'static,
{
    /// Returns the stage that runs before (and usually delegates to) `next`.
    fn wrap(&self, next: HandlerRef<Out>) -> HandlerRef<In>;
}

/// Closure-backed middleware.
pub struct MiddlewareFn<F> {
    f: F,
}

/// Builds a middleware from `Fn(HandlerRef<Out>) -> HandlerRef<In>`.
pub fn middleware_fn<F>(f: F) -> MiddlewareFn<F> {
    MiddlewareFn { f }
}

impl<In, Out, F> Middleware<In, Out> for MiddlewareFn<F>
where
    In: Send + 'static,
    Out: Send + 'static,
    F: Fn(HandlerRef<Out>) -> HandlerRef<In> + Send + Sync + 'static,
{
    fn wrap(&self, next: HandlerRef<Out>) -> HandlerRef<In> {
        (self.f)(next)
    }
}

impl<In, Out> Middleware<In, Out> for Arc<dyn Middleware<In, Out>>
where
    In: Send + 'static,
    Out: Send + 'static,
{
    fn wrap(&self, next: HandlerRef<Out>) -> HandlerRef<In> {
        (**self).wrap(next)
    }
}

type Compose<In, Out> = Box<dyn FnOnce(HandlerRef<Out>) -> HandlerRef<In> + Send>;

/// Builder of a handler pipeline accepting `In` and ending in a terminal that accepts `Out`.
///
/// ## Example
/// ```rust
/// use std::sync::{Arc, Mutex};
/// use tokio_util::sync::CancellationToken;
/// use queuevisor::{Filter, HandlerError, HandlerFn, PipelineBuilder};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let seen = Arc::new(Mutex::new(Vec::new()));
/// let sink = seen.clone();
/// let pipeline = PipelineBuilder::<u32>::new()
///     .with(Filter::new(|n: &u32| n % 2 == 0))
///     .build(HandlerFn::new(move |n: u32, _ctx: CancellationToken| {
///         let sink = sink.clone();
///         async move {
///             sink.lock().unwrap().push(n);
///             Ok::<_, HandlerError>(())
///         }
///     }));
///
/// for n in 1..=4 {
///     pipeline.handle(n, CancellationToken::new()).await.unwrap();
/// }
/// assert_eq!(*seen.lock().unwrap(), vec![2, 4]);
/// # }
/// ```
pub struct PipelineBuilder<In: Send + 'static, Out: Send + 'static = In> {
    compose: Compose<In, Out>,
}

impl<In: Send + 'static> PipelineBuilder<In, In> {
    /// Starts an empty pipeline.
    pub fn new() -> Self {
        Self {
            compose: Box::new(|terminal| terminal),
        }
    }
}

impl<In: Send + 'static> Default for PipelineBuilder<In, In> {
    fn default() -> Self {
        Self::new()
    }
}

impl<In, Out> PipelineBuilder<In, Out>
where
    In: Send + 'static,
    Out: Send + 'static,
{
    /// Appends a middleware; it runs after every middleware appended before it.
    pub fn with<Next, M>(self, middleware: M) -> PipelineBuilder<In, Next>
    where
        Next: Send + 'static,
        M: Middleware<Out, Next>,
    {
        let outer = self.compose;
        PipelineBuilder {
            compose: Box::new(move |terminal: HandlerRef<Next>| outer(middleware.wrap(terminal))),
        }
    }

    /// Appends a list of same-typed middleware in order.
    pub fn with_all<I>(self, middleware: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn Middleware<Out, Out>>>,
    {
        middleware.into_iter().fold(self, |b, m| b.with(m))
    }

    /// Composes the pipeline around `terminal`.
    pub fn build<H: Handler<Out>>(self, terminal: H) -> HandlerRef<In> {
        self.build_ref(Arc::new(terminal))
    }

    /// Composes the pipeline around an already shared terminal.
    pub fn build_ref(self, terminal: HandlerRef<Out>) -> HandlerRef<In> {
        (self.compose)(terminal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandlerError;
    use crate::pipeline::HandlerFn;
    use std::sync::Mutex;
    use tokio_util::sync::CancellationToken;

    type Log = Arc<Mutex<Vec<String>>>;

    fn tag(log: Log, name: &'static str) -> impl Middleware<u32> {
        middleware_fn(move |next: HandlerRef<u32>| -> HandlerRef<u32> {
            let log = log.clone();
            HandlerFn::arc(move |n: u32, ctx: CancellationToken| {
                let (log, next) = (log.clone(), next.clone());
                async move {
                    log.lock().unwrap().push(format!("{name}>"));
                    let r = next.handle(n, ctx).await;
                    log.lock().unwrap().push(format!("<{name}"));
                    r
                }
            })
        })
    }

    #[tokio::test]
    async fn first_appended_runs_outermost() {
        let log: Log = Arc::default();
        let sink = log.clone();
        let pipeline = PipelineBuilder::<u32>::new()
            .with(tag(log.clone(), "a"))
            .with(tag(log.clone(), "b"))
            .build(HandlerFn::new(move |_n: u32, _ctx: CancellationToken| {
                let sink = sink.clone();
                async move {
                    sink.lock().unwrap().push("terminal".into());
                    Ok::<_, HandlerError>(())
                }
            }));

        pipeline.handle(1, CancellationToken::new()).await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["a>", "b>", "terminal", "<b", "<a"]);
    }

    #[tokio::test]
    async fn middleware_can_change_input_type() {
        let parse = middleware_fn(|next: HandlerRef<u32>| -> HandlerRef<&'static str> {
            HandlerFn::arc(move |s: &'static str, ctx: CancellationToken| {
                let next = next.clone();
                async move {
                    let n = s.parse::<u32>().map_err(|e| HandlerError::fatal(e.to_string()))?;
                    next.handle(n, ctx).await
                }
            })
        });
        let pipeline = PipelineBuilder::<&'static str>::new()
            .with(parse)
            .build(HandlerFn::new(|n: u32, _ctx: CancellationToken| async move {
                if n == 42 { Ok(()) } else { Err(HandlerError::fail("wrong")) }
            }));

        assert!(pipeline.handle("42", CancellationToken::new()).await.is_ok());
        assert!(pipeline.handle("x", CancellationToken::new()).await.unwrap_err().is_fatal());
    }

    #[tokio::test]
    async fn with_all_keeps_list_order() {
        let log: Log = Arc::default();
        let list: Vec<Arc<dyn Middleware<u32>>> = vec![
            Arc::new(tag(log.clone(), "x")),
            Arc::new(tag(log.clone(), "y")),
        ];
        let pipeline = PipelineBuilder::<u32>::new()
            .with_all(list)
            .build(HandlerFn::new(|_n: u32, _ctx: CancellationToken| async {
                Ok::<_, HandlerError>(())
            }));

        pipeline.handle(0, CancellationToken::new()).await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["x>", "y>", "<y", "<x"]);
    }
}
