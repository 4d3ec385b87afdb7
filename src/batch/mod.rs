//! # Batching: size- and time-bounded grouping of envelopes.
//!
//! - [`BatchBuilder`] accumulates one window (trait, plus [`CountBatchBuilder`] and
//!   [`WeightedBatchBuilder`]).
//! - [`BatchingStream`] drives a builder over a source stream and emits [`Batch`](crate::Batch)es.

mod builder;
mod stream;

pub use builder::{BatchBuilder, CountBatchBuilder, TryAdd, WeightedBatchBuilder};
pub(crate) use builder::singleton;
pub use stream::BatchingStream;
