//! Error types used by the queuevisor runtime, its queues and handlers.
//!
//! - [`HandlerError`]: raised by a single handler or middleware invocation.
//! - [`EnqueueError`]: returned to producers; always hands the envelope back.
//! - [`LifecycleError`]: invalid start/stop transitions.
//! - [`QueueError`]: errors of a hosted service (queue or consumer).
//! - [`BatchError`], [`MergeError`], [`ExecutorError`], [`ConfigError`]: building blocks.
//!
//! Most types provide `as_label` (stable snake_case label for logs/metrics).

use std::time::Duration;
use thiserror::Error;

use crate::envelope::Envelope;

/// # Errors produced by handler invocations.
///
/// Returned by terminal handlers and middleware. The consumer loop classifies them:
/// `Canceled` is control flow, `Fatal` stops the loop, everything else is logged and skipped
/// (unless the queue is configured with `break_on_error`).
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum HandlerError {
    /// Invocation failed but may succeed if retried.
    #[error("handler failed: {error}")]
    Fail {
        /// The underlying error message.
        error: String,
    },

    /// Non-recoverable error; the consumer loop stops and its service is marked crashed.
    #[error("fatal handler error: {error}")]
    Fatal {
        /// The underlying error message.
        error: String,
    },

    /// Invocation exceeded its time budget.
    #[error("handler timed out after {timeout:?}")]
    Timeout {
        /// The timeout that was exceeded.
        timeout: Duration,
    },

    /// Invocation observed cancellation of its token.
    #[error("handler cancelled")]
    Canceled,

    /// Invocation panicked; the panic was caught at the dispatch boundary.
    #[error("handler panicked: {info}")]
    Panicked {
        /// Panic payload rendered as text.
        info: String,
    },
}

impl HandlerError {
    /// Shorthand for [`HandlerError::Fail`].
    pub fn fail(error: impl Into<String>) -> Self {
        HandlerError::Fail {
            error: error.into(),
        }
    }

    /// Shorthand for [`HandlerError::Fatal`].
    pub fn fatal(error: impl Into<String>) -> Self {
        HandlerError::Fatal {
            error: error.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use queuevisor::HandlerError;
    ///
    /// assert_eq!(HandlerError::fail("boom").as_label(), "handler_failed");
    /// assert_eq!(HandlerError::Canceled.as_label(), "handler_canceled");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            HandlerError::Fail { .. } => "handler_failed",
            HandlerError::Fatal { .. } => "handler_fatal",
            HandlerError::Timeout { .. } => "handler_timeout",
            HandlerError::Canceled => "handler_canceled",
            HandlerError::Panicked { .. } => "handler_panicked",
        }
    }

    /// Indicates whether the error is safe to retry.
    ///
    /// Returns `true` for [`HandlerError::Fail`] and [`HandlerError::Timeout`].
    ///
    /// # Example
    /// ```
    /// use queuevisor::HandlerError;
    ///
    /// assert!(HandlerError::fail("flaky").is_retryable());
    /// assert!(!HandlerError::fatal("nope").is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        matches!(self, HandlerError::Fail { .. } | HandlerError::Timeout { .. })
    }

    /// True if the invocation ended because its token was cancelled.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, HandlerError::Canceled)
    }

    /// True if the consumer loop must stop regardless of configuration.
    pub fn is_fatal(&self) -> bool {
        matches!(self, HandlerError::Fatal { .. })
    }
}

/// # Errors returned to producers by `enqueue`.
///
/// Every variant carries the rejected envelope so the producer can retry or reroute it.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum EnqueueError<T> {
    /// Buffer is full and the overflow policy rejects new items.
    #[error("queue is full")]
    Full(Envelope<T>),

    /// Buffer no longer accepts writes (shutdown in progress or done).
    #[error("queue is closed")]
    Closed(Envelope<T>),

    /// Queue is not in a state that accepts items.
    #[error("queue is not accepting items (state: {state})")]
    NotRunning {
        /// The rejected envelope.
        envelope: Envelope<T>,
        /// State observed at enqueue time.
        state: &'static str,
    },

    /// Producer's cancellation token fired while waiting for space.
    #[error("enqueue cancelled while waiting for space")]
    Canceled(Envelope<T>),
}

impl<T> EnqueueError<T> {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            EnqueueError::Full(_) => "enqueue_full",
            EnqueueError::Closed(_) => "enqueue_closed",
            EnqueueError::NotRunning { .. } => "enqueue_not_running",
            EnqueueError::Canceled(_) => "enqueue_canceled",
        }
    }

    /// Recovers the rejected envelope.
    pub fn into_envelope(self) -> Envelope<T> {
        match self {
            EnqueueError::Full(env)
            | EnqueueError::Closed(env)
            | EnqueueError::Canceled(env)
            | EnqueueError::NotRunning { envelope: env, .. } => env,
        }
    }
}

/// # Invalid lifecycle transitions.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    /// `stop` (or `execute`) called before a successful `start`.
    #[error("service '{name}' has not been started")]
    NotStarted {
        /// Service name.
        name: String,
    },

    /// `start` called more than once.
    #[error("service '{name}' was already started")]
    AlreadyStarted {
        /// Service name.
        name: String,
    },

    /// `stop` called after the service already stopped.
    #[error("service '{name}' is already stopped")]
    AlreadyStopped {
        /// Service name.
        name: String,
    },
}

impl LifecycleError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            LifecycleError::NotStarted { .. } => "lifecycle_not_started",
            LifecycleError::AlreadyStarted { .. } => "lifecycle_already_started",
            LifecycleError::AlreadyStopped { .. } => "lifecycle_already_stopped",
        }
    }
}

/// # Errors produced by hosted services (queues, consumers) and the supervisor.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum QueueError {
    /// Invalid lifecycle transition.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    /// A handler failure stopped the consumer loop.
    #[error("consumer loop '{name}' stopped: {source}")]
    HandlerFatal {
        /// Service name.
        name: String,
        /// The failure that stopped the loop.
        #[source]
        source: HandlerError,
    },

    /// Draining did not finish before the forced-exit deadline.
    #[error("drain of '{name}' exceeded {grace:?}; abandoned {abandoned} in-flight units")]
    GraceExceeded {
        /// Service name.
        name: String,
        /// Deadline that was exceeded.
        grace: Duration,
        /// Units of work still running when the deadline fired.
        abandoned: usize,
    },

    /// A service panicked outside of handler invocations.
    #[error("service '{name}' panicked: {info}")]
    Panicked {
        /// Service name.
        name: String,
        /// Panic payload rendered as text.
        info: String,
    },

    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl QueueError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use queuevisor::QueueError;
    /// use std::time::Duration;
    ///
    /// let err = QueueError::GraceExceeded { name: "q".into(), grace: Duration::from_secs(5), abandoned: 2 };
    /// assert_eq!(err.as_label(), "queue_grace_exceeded");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            QueueError::Lifecycle(e) => e.as_label(),
            QueueError::HandlerFatal { .. } => "queue_handler_fatal",
            QueueError::GraceExceeded { .. } => "queue_grace_exceeded",
            QueueError::Panicked { .. } => "queue_panicked",
            QueueError::Config(_) => "queue_config",
        }
    }
}

/// Batch could not be built.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchError {
    /// `build` called on a builder holding no items.
    #[error("cannot build an empty batch")]
    Empty,
}

/// Source could not be added to a merger.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeError {
    /// The merged stream has completed or was closed.
    #[error("stream merger is closed")]
    Closed,
}

/// Work could not be scheduled on the executor.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorError {
    /// Cancellation fired while waiting for capacity or drain.
    #[error("executor wait cancelled")]
    Canceled,
}

/// Invalid configuration value.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A field that must be strictly positive was zero.
    #[error("`{field}` must be greater than zero")]
    Zero {
        /// Field name.
        field: &'static str,
    },
}

/// Renders a caught panic payload as text.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
