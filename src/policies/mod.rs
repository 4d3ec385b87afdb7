//! Retry timing policies.
//!
//! - [`BackoffPolicy`] how the delay between handler retries grows (first / factor / max)
//! - [`JitterPolicy`] randomization applied on top of each delay
//!
//! ```text
//! Retry { max_attempts, backoff } ──► failure n ──► sleep(backoff.next(n)) ──► retry
//! ```

mod backoff;
mod jitter;

pub use backoff::BackoffPolicy;
pub use jitter::JitterPolicy;
