//! # Per-invocation scoped resources.
//!
//! [`WithScope`] opens a fresh resource for every invocation (a connection, a
//! transaction, a unit-of-work) and hands it to the next stage together with the input
//! as [`Scoped`]. The scope is released on every exit path:
//!
//! ```text
//! open() ──► next.handle(Scoped { input, scope }) ──┬─ Ok / Err ──► close(scope).await
//!   │                                               └─ cancelled/dropped ──► Drop of last Arc
//!   └─ Err ──► returned as is, next stage not called
//! ```
//!
//! Nothing is opened at build time; the factory is shared, the scopes are not.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::HandlerError;
use crate::pipeline::builder::Middleware;
use crate::pipeline::handler::{Handler, HandlerRef};

/// Opens and closes one scope per invocation.
#[async_trait]
pub trait ScopeFactory: Send + Sync + 'static {
    /// The resource handed to the next stage.
    type Scope: Send + Sync + 'static;

    /// Opens a fresh scope.
    async fn open(&self) -> Result<Self::Scope, HandlerError>;

    /// Releases a scope after the next stage returned (success or error).
    ///
    /// Not called when the invocation is dropped mid-flight; the scope's `Drop` covers that.
    async fn close(&self, _scope: &Self::Scope, _outcome: &Result<(), HandlerError>) {}
}

/// Input paired with the scope opened for it.
#[derive(Debug)]
pub struct Scoped<In, S> {
    /// The original input.
    pub input: In,
    /// The per-invocation scope.
    pub scope: Arc<S>,
}

/// Middleware opening a scope per invocation.
pub struct WithScope<F> {
    factory: Arc<F>,
}

impl<F: ScopeFactory> WithScope<F> {
    /// Creates the middleware from a factory.
    pub fn new(factory: F) -> Self {
        Self {
            factory: Arc::new(factory),
        }
    }
}

struct ScopeStage<In: Send + 'static, F: ScopeFactory> {
    factory: Arc<F>,
    next: HandlerRef<Scoped<In, F::Scope>>,
}

#[async_trait]
impl<In, F> Handler<In> for ScopeStage<In, F>
where
    In: Send + 'static,
    F: ScopeFactory,
{
    async fn handle(&self, input: In, ctx: CancellationToken) -> Result<(), HandlerError> {
        let scope = Arc::new(self.factory.open().await?);
        let res = self
            .next
            .handle(
                Scoped {
                    input,
                    scope: Arc::clone(&scope),
                },
                ctx,
            )
            .await;
        self.factory.close(&scope, &res).await;
        res
    }
}

impl<In, F> Middleware<In, Scoped<In, F::Scope>> for WithScope<F>
where
    In: Send + 'static,
    F: ScopeFactory,
{
    fn wrap(&self, next: HandlerRef<Scoped<In, F::Scope>>) -> HandlerRef<In> {
        Arc::new(ScopeStage {
            factory: Arc::clone(&self.factory),
            next,
        })
    }
}
