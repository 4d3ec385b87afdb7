//! # Supervised queues.
//!
//! - [`BackgroundQueue`] push side: producers `enqueue`, a bounded buffer absorbs bursts.
//! - [`SourceConsumer`] pull side: producers attach whole streams.
//!
//! Both share the consumer loop (dispatch through a [`BoundedExecutor`](crate::BoundedExecutor))
//! and the [`QueueState`] machine, and both implement [`Service`](crate::Service).

mod background;
mod buffer;
mod consumer;
mod dispatch;
mod lifecycle;

pub use background::BackgroundQueue;
pub use consumer::SourceConsumer;
pub use dispatch::WorkUnit;
pub use lifecycle::QueueState;
