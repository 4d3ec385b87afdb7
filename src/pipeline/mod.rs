//! # Handler pipeline.
//!
//! A pipeline is a terminal [`Handler`] wrapped by an ordered list of [`Middleware`],
//! composed once by [`PipelineBuilder`] into a single [`HandlerRef`].
//!
//! ```text
//! input ──► Instrument ──► Retry ──► Timeout ──► WithScope ──► terminal handler
//!           (first appended = outermost)
//! ```
//!
//! ## Contents
//! - [`Handler`], [`HandlerFn`], [`HandlerRef`] the invocable unit
//! - [`Middleware`], [`MiddlewareFn`], [`middleware_fn`], [`PipelineBuilder`] composition
//! - built-in middleware: [`Retry`], [`Timeout`], [`Filter`], [`MapInput`], [`Inspect`],
//!   [`CatchPanic`], [`WithScope`], [`Instrument`]

mod builder;
mod handler;
mod instrument;
mod layers;
mod retry;
mod scope;

pub use builder::{Middleware, MiddlewareFn, PipelineBuilder, middleware_fn};
pub use handler::{Handler, HandlerFn, HandlerRef};
pub use instrument::Instrument;
pub use layers::{CatchPanic, Filter, Inspect, MapInput, Timeout};
pub use retry::Retry;
pub use scope::{ScopeFactory, Scoped, WithScope};
