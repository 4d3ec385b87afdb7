//! # Hosted-service contract.
//!
//! A [`Service`] is what a [`Supervisor`](crate::Supervisor) runs: a background queue,
//! a source consumer, or anything else with the same three-phase lifecycle.
//!
//! ```text
//! start(ctx)    ── prepare, return quickly
//! execute(ctx)  ── the consumer loop; returns when drained, crashed or forced out
//! stop(grace)   ── close input, drain, abort past `grace`
//! ```
//!
//! `ctx` is the graceful shutdown token: when it fires, the service stops reading new
//! input and finishes what is in flight.

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::QueueError;
use crate::events::Bus;

/// Long-running unit supervised by a [`Supervisor`](crate::Supervisor).
#[async_trait]
pub trait Service: Send + Sync + 'static {
    /// Stable name used in logs and events.
    fn name(&self) -> &str;

    /// Bus the service publishes delivery events to, if any.
    ///
    /// The supervisor publishes its own events on the same bus so subscribers see both.
    fn bus(&self) -> Option<Bus> {
        None
    }

    /// One-time preparation. Fails if called twice.
    async fn start(&self, ctx: CancellationToken) -> Result<(), QueueError>;

    /// Runs until the input ends, `ctx` fires and draining completes, or a fatal failure.
    async fn execute(&self, ctx: CancellationToken) -> Result<(), QueueError>;

    /// Graceful stop bounded by `grace`; past it, in-flight work is abandoned.
    async fn stop(&self, grace: Duration) -> Result<(), QueueError>;
}
