//! # LogWriter: renders events through `tracing`
//!
//! A minimal subscriber that turns every [`Event`] into one `tracing` record.
//! Faults (crashes, failed handlers, exceeded grace) are logged at `warn`/`error`,
//! state transitions at `info`, everything else at `debug`.
//!
//! ## Example output (with a fmt subscriber)
//! ```text
//! INFO  queuevisor: service-running service="orders" seq=3
//! WARN  queuevisor: handler-failed service="orders" reason="db down" count=1 seq=9
//! ERROR queuevisor: service-crashed service="orders" reason="fatal handler error: ..." seq=10
//! ```

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let kind = e.kind.as_label();
        let service = e.service.as_deref().unwrap_or("-");
        let reason = e.reason.as_deref().unwrap_or("");

        match e.kind {
            EventKind::ServiceCrashed | EventKind::GraceExceeded | EventKind::HandlerPanicked => {
                error!(target: "queuevisor", service, reason, count = e.count, timeout_ms = e.timeout_ms, seq = e.seq, "{kind}");
            }
            EventKind::HandlerFailed
            | EventKind::SubscriberPanicked
            | EventKind::SubscriberOverflow => {
                warn!(target: "queuevisor", service, reason, count = e.count, seq = e.seq, "{kind}");
            }
            EventKind::ServiceStarting
            | EventKind::ServiceRunning
            | EventKind::ServiceStopping
            | EventKind::ServiceStopped
            | EventKind::ShutdownRequested
            | EventKind::DrainedWithinGrace => {
                info!(target: "queuevisor", service, seq = e.seq, "{kind}");
            }
            EventKind::ItemDropped | EventKind::ItemRejected => {
                debug!(target: "queuevisor", service, reason, seq = e.seq, "{kind}");
            }
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}
