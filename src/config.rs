//! # Runtime configuration.
//!
//! - [`QueueConfig`] settings of one background queue or source consumer.
//! - [`SupervisorConfig`] settings of the hosting supervisor.
//!
//! ## Sentinel values
//! - `capacity = None` → unbounded buffer
//! - `grace = 0s` → no drain wait, abort in-flight work immediately

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;

use crate::error::ConfigError;

/// Behavior of a bounded buffer when a producer writes while it is full.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FullMode {
    /// Producer suspends until space frees up (backpressure).
    #[default]
    Wait,
    /// Evict the oldest buffered item to admit the new one.
    DropOldest,
    /// Evict the most recently buffered item to admit the new one.
    DropNewest,
    /// Fail the write immediately.
    Reject,
}

/// What to do with a single item that cannot fit even an empty batch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OversizePolicy {
    /// Emit the item alone as a singleton batch.
    #[default]
    Isolate,
    /// Drop the item (a warning is logged).
    Drop,
}

/// Awaitable run before a queue closes its buffer on shutdown.
///
/// New writes are already refused while it runs; the consumer loop keeps pulling
/// (e.g. wait for an upstream acknowledgement before the final drain).
#[derive(Clone, Default)]
pub enum CompletionTrigger {
    /// Close right away.
    #[default]
    Immediate,
    /// Sleep for the given duration first.
    Delay(Duration),
    /// Await a caller-provided future (created fresh per stop).
    Custom(Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>),
}

impl CompletionTrigger {
    /// Builds a [`CompletionTrigger::Custom`] from an async closure.
    pub fn custom<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        CompletionTrigger::Custom(Arc::new(move || Box::pin(f())))
    }

    /// Runs the trigger to completion.
    pub(crate) async fn fire(&self) {
        match self {
            CompletionTrigger::Immediate => {}
            CompletionTrigger::Delay(d) => tokio::time::sleep(*d).await,
            CompletionTrigger::Custom(f) => f().await,
        }
    }
}

impl fmt::Debug for CompletionTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompletionTrigger::Immediate => f.write_str("Immediate"),
            CompletionTrigger::Delay(d) => f.debug_tuple("Delay").field(d).finish(),
            CompletionTrigger::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Configuration of a background queue or source consumer.
///
/// ## Field semantics
/// - `max_concurrency`: handler invocations in flight at once (min 1)
/// - `capacity`: buffer size (`None` = unbounded)
/// - `full_mode`: overflow policy when the buffer is full
/// - `single_producer`: advisory hint that only one task writes (accepted, not enforced)
/// - `completion_trigger`: awaited before the buffer closes on stop
/// - `batch_max_size` / `batch_time_window`: limits for batched queues
/// - `oversize`: policy for items that cannot fit an empty weighted batch
/// - `break_on_error`: any handler failure stops the loop (service crashes)
/// - `bus_capacity`: ring size of the queue's event bus, shared with its supervisor
#[derive(Clone, Debug)]
pub struct QueueConfig {
    /// Maximum concurrent handler invocations.
    pub max_concurrency: usize,
    /// Buffer capacity; `None` means unbounded.
    pub capacity: Option<usize>,
    /// Overflow policy for a full buffer.
    pub full_mode: FullMode,
    /// Only one producer writes into the buffer.
    pub single_producer: bool,
    /// Awaited before closing the buffer on stop.
    pub completion_trigger: CompletionTrigger,
    /// Maximum envelopes per batch.
    pub batch_max_size: usize,
    /// Rolling window measured from the first item of a batch.
    pub batch_time_window: Duration,
    /// Policy for items too large for any batch.
    pub oversize: OversizePolicy,
    /// Treat every handler failure as fatal.
    pub break_on_error: bool,
    /// Capacity of the event bus created with the queue (min 1).
    pub bus_capacity: usize,
}

impl QueueConfig {
    /// Returns the buffer capacity clamped to a minimum of 1 (`None` = unbounded).
    #[inline]
    pub fn capacity_clamped(&self) -> Option<usize> {
        self.capacity.map(|c| c.max(1))
    }

    /// Returns `max_concurrency` clamped to a minimum of 1.
    #[inline]
    pub fn concurrency_clamped(&self) -> usize {
        self.max_concurrency.max(1)
    }

    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }

    /// Checks that every positive-only field is positive.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrency == 0 {
            return Err(ConfigError::Zero {
                field: "max_concurrency",
            });
        }
        if self.capacity == Some(0) {
            return Err(ConfigError::Zero { field: "capacity" });
        }
        if self.batch_max_size == 0 {
            return Err(ConfigError::Zero {
                field: "batch_max_size",
            });
        }
        if self.batch_time_window.is_zero() {
            return Err(ConfigError::Zero {
                field: "batch_time_window",
            });
        }
        Ok(())
    }
}

impl Default for QueueConfig {
    /// Default configuration:
    ///
    /// - `max_concurrency = 1` (strict FIFO handling)
    /// - `capacity = None` (unbounded)
    /// - `full_mode = Wait`
    /// - `batch_max_size = 100`, `batch_time_window = 1s`
    /// - `bus_capacity = 1024`
    fn default() -> Self {
        Self {
            max_concurrency: 1,
            capacity: None,
            full_mode: FullMode::Wait,
            single_producer: false,
            completion_trigger: CompletionTrigger::Immediate,
            batch_max_size: 100,
            batch_time_window: Duration::from_secs(1),
            oversize: OversizePolicy::Isolate,
            break_on_error: false,
            bus_capacity: 1024,
        }
    }
}

/// Configuration of the [`Supervisor`](crate::Supervisor).
#[derive(Clone, Debug)]
pub struct SupervisorConfig {
    /// Forced-exit deadline for stopping the hosted service.
    ///
    /// Draining that runs longer is aborted and reported as `GraceExceeded`.
    pub grace: Duration,

    /// Capacity of the event bus ring buffer (min 1; clamped by Bus).
    ///
    /// Sizes the bus only for services that bring none; queues and source consumers
    /// size theirs from [`QueueConfig::bus_capacity`].
    pub bus_capacity: usize,
}

impl SupervisorConfig {
    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }
}

impl Default for SupervisorConfig {
    /// - `grace = 30s`
    /// - `bus_capacity = 1024`
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(30),
            bus_capacity: 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(QueueConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_fields_are_rejected() {
        let cfg = QueueConfig {
            max_concurrency: 0,
            ..QueueConfig::default()
        };
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::Zero {
                field: "max_concurrency"
            })
        );

        let cfg = QueueConfig {
            capacity: Some(0),
            ..QueueConfig::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::Zero { field: "capacity" }));
    }

    #[tokio::test(start_paused = true)]
    async fn delay_trigger_sleeps() {
        let start = tokio::time::Instant::now();
        CompletionTrigger::Delay(Duration::from_secs(3)).fire().await;
        assert!(start.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test]
    async fn custom_trigger_runs_closure() {
        let hit = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let h = hit.clone();
        let trigger = CompletionTrigger::custom(move || {
            let h = h.clone();
            async move { h.store(true, std::sync::atomic::Ordering::SeqCst) }
        });
        trigger.fire().await;
        assert!(hit.load(std::sync::atomic::Ordering::SeqCst));
    }
}
