//! # Runtime events emitted by supervisors, queues and consumer loops.
//!
//! The [`EventKind`] enum classifies event types across four categories:
//! - **State events**: service lifecycle transitions (starting, running, stopping, stopped, crashed)
//! - **Shutdown events**: graceful drain outcome (requested, drained, grace exceeded)
//! - **Delivery events**: items lost to overflow policy and failed handler invocations
//! - **Subscriber events**: faults inside subscriber workers
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//!
//! ## Example
//! ```rust
//! use queuevisor::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::HandlerFailed)
//!     .with_service("orders")
//!     .with_reason("boom");
//!
//! assert_eq!(ev.kind, EventKind::HandlerFailed);
//! assert_eq!(ev.service.as_deref(), Some("orders"));
//! assert_eq!(ev.reason.as_deref(), Some("boom"));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === State events ===
    /// Service entered `Starting`.
    ServiceStarting,
    /// Service finished `start` and is `Running`.
    ServiceRunning,
    /// Service entered `Stopping` (buffer about to close, draining).
    ServiceStopping,
    /// Service reached `Stopped`.
    ServiceStopped,
    /// Service crashed.
    ///
    /// Sets:
    /// - `service`: service name
    /// - `reason`: captured crash cause
    ServiceCrashed,

    // === Shutdown events ===
    /// Shutdown requested (OS signal or explicit stop).
    ShutdownRequested,
    /// In-flight work drained before the forced-exit deadline.
    DrainedWithinGrace,
    /// Forced-exit deadline fired before draining finished.
    ///
    /// Sets:
    /// - `timeout_ms`: the deadline
    /// - `count`: abandoned in-flight units
    GraceExceeded,

    // === Delivery events ===
    /// An item was evicted by the overflow policy.
    ///
    /// Sets:
    /// - `service`: queue name
    /// - `reason`: `drop_oldest` or `drop_newest`
    ItemDropped,
    /// An item was refused by the overflow policy (`Reject`).
    ItemRejected,
    /// A handler invocation failed (non-cancellation error).
    ///
    /// Sets:
    /// - `service`: queue name
    /// - `reason`: error message
    /// - `count`: items in the failed unit
    HandlerFailed,
    /// A handler invocation panicked.
    HandlerPanicked,

    // === Subscriber events ===
    /// Subscriber panicked during event processing.
    SubscriberPanicked,
    /// Subscriber dropped an event (queue full or worker closed).
    SubscriberOverflow,
}

impl EventKind {
    /// Short stable label (kebab-case) for log lines.
    pub fn as_label(&self) -> &'static str {
        match self {
            EventKind::ServiceStarting => "service-starting",
            EventKind::ServiceRunning => "service-running",
            EventKind::ServiceStopping => "service-stopping",
            EventKind::ServiceStopped => "service-stopped",
            EventKind::ServiceCrashed => "service-crashed",
            EventKind::ShutdownRequested => "shutdown-requested",
            EventKind::DrainedWithinGrace => "drained-within-grace",
            EventKind::GraceExceeded => "grace-exceeded",
            EventKind::ItemDropped => "item-dropped",
            EventKind::ItemRejected => "item-rejected",
            EventKind::HandlerFailed => "handler-failed",
            EventKind::HandlerPanicked => "handler-panicked",
            EventKind::SubscriberPanicked => "subscriber-panicked",
            EventKind::SubscriberOverflow => "subscriber-overflow",
        }
    }
}

/// Runtime event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,
    /// Name of the service/queue (or subscriber for subscriber events).
    pub service: Option<Arc<str>>,
    /// Human-readable reason (errors, overflow details, etc.).
    pub reason: Option<Arc<str>>,
    /// Deadline in milliseconds (compact).
    pub timeout_ms: Option<u32>,
    /// Item/unit count, when relevant.
    pub count: Option<u64>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            service: None,
            reason: None,
            timeout_ms: None,
            count: None,
        }
    }

    /// Attaches a service name.
    #[inline]
    pub fn with_service(mut self, service: impl Into<Arc<str>>) -> Self {
        self.service = Some(service.into());
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches a deadline (stored as milliseconds).
    #[inline]
    pub fn with_timeout(mut self, d: Duration) -> Self {
        let ms = d.as_millis().min(u128::from(u32::MAX)) as u32;
        self.timeout_ms = Some(ms);
        self
    }

    /// Attaches a count.
    #[inline]
    pub fn with_count(mut self, n: u64) -> Self {
        self.count = Some(n);
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_service(subscriber)
            .with_reason(format!("subscriber={subscriber} reason={reason}"))
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_service(subscriber)
            .with_reason(info)
    }
}
