//! # State machine shared by [`BackgroundQueue`](crate::BackgroundQueue) and
//! [`SourceConsumer`](crate::SourceConsumer).
//!
//! ```text
//! Created ──start──► Starting ──► Running ──stop / ctx──► Stopping ──drained──► Stopped
//!                                    │                        │
//!                                    └──── fatal failure ─────┴──────────────► Crashed
//! ```
//!
//! ## Rules
//! - `start` only from `Created`; a second call fails with `AlreadyStarted`.
//! - `stop` before `start` fails with `NotStarted`; after `Stopped` with `AlreadyStopped`.
//! - `stop` on a crashed service is a no-op: the crash was already returned by `execute`.
//! - A crash while `stop` is draining is returned by that `stop`.
//! - The forced-exit deadline covers the completion trigger and the drain together.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, sleep_until, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::CompletionTrigger;
use crate::error::{LifecycleError, QueueError};
use crate::executor::BoundedExecutor;

/// Lifecycle state of a queue or source consumer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueState {
    /// Constructed, `start` not called yet.
    Created,
    /// `start` in progress; writes are accepted.
    Starting,
    /// Accepting writes and consuming.
    Running,
    /// Input closed, in-flight work draining.
    Stopping,
    /// Drained (or abandoned past the deadline).
    Stopped,
    /// Consumer loop ended with a fatal failure.
    Crashed,
}

impl QueueState {
    /// Short stable label (snake_case).
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueState::Created => "created",
            QueueState::Starting => "starting",
            QueueState::Running => "running",
            QueueState::Stopping => "stopping",
            QueueState::Stopped => "stopped",
            QueueState::Crashed => "crashed",
        }
    }

    /// True for `Stopped` and `Crashed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, QueueState::Stopped | QueueState::Crashed)
    }
}

#[derive(Clone, Debug)]
struct Status {
    state: QueueState,
    executing: bool,
    failure: Option<QueueError>,
}

pub(crate) struct Lifecycle {
    name: Arc<str>,
    status: watch::Sender<Status>,
    hard: CancellationToken,
}

impl Lifecycle {
    pub(crate) fn new(name: Arc<str>) -> Self {
        let (status, _) = watch::channel(Status {
            state: QueueState::Created,
            executing: false,
            failure: None,
        });
        Self {
            name,
            status,
            hard: CancellationToken::new(),
        }
    }

    pub(crate) fn name(&self) -> &Arc<str> {
        &self.name
    }

    pub(crate) fn state(&self) -> QueueState {
        self.status.borrow().state
    }

    /// Token handed to handlers; fires only on forced exit.
    pub(crate) fn hard(&self) -> &CancellationToken {
        &self.hard
    }

    fn not_started(&self) -> LifecycleError {
        LifecycleError::NotStarted {
            name: self.name.to_string(),
        }
    }

    fn already_started(&self) -> LifecycleError {
        LifecycleError::AlreadyStarted {
            name: self.name.to_string(),
        }
    }

    fn already_stopped(&self) -> LifecycleError {
        LifecycleError::AlreadyStopped {
            name: self.name.to_string(),
        }
    }

    /// `Created → Starting`.
    pub(crate) fn begin_start(&self) -> Result<(), LifecycleError> {
        let mut res = Ok(());
        self.status.send_if_modified(|s| {
            if s.state == QueueState::Created {
                s.state = QueueState::Starting;
                true
            } else {
                res = Err(self.already_started());
                false
            }
        });
        res
    }

    /// `Starting → Running`; no-op if a stop already moved on.
    pub(crate) fn mark_running(&self) {
        self.status.send_if_modified(|s| {
            let moved = s.state == QueueState::Starting;
            if moved {
                s.state = QueueState::Running;
            }
            moved
        });
    }

    /// Claims the single consumer loop slot.
    ///
    /// `Ok(false)` when there is nothing left to consume: the service already stopped,
    /// or `stop` drained it before any loop was claimed.
    pub(crate) fn begin_execute(&self) -> Result<bool, LifecycleError> {
        let mut res = Ok(false);
        self.status.send_if_modified(|s| {
            match s.state {
                QueueState::Created => res = Err(self.not_started()),
                QueueState::Crashed => res = Err(self.already_stopped()),
                QueueState::Stopped => {}
                QueueState::Stopping if s.executing => {}
                _ if s.executing => res = Err(self.already_started()),
                _ => {
                    s.executing = true;
                    res = Ok(true);
                }
            }
            matches!(res, Ok(true))
        });
        res
    }

    /// `Starting | Running → Stopping`.
    pub(crate) fn mark_stopping(&self) {
        self.status.send_if_modified(|s| {
            let moved = matches!(s.state, QueueState::Starting | QueueState::Running);
            if moved {
                s.state = QueueState::Stopping;
            }
            moved
        });
    }

    /// Records the outcome of the consumer loop.
    pub(crate) fn finish(&self, res: &Result<(), QueueError>) {
        self.status.send_modify(|s| {
            s.executing = false;
            match res {
                Ok(()) => s.state = QueueState::Stopped,
                Err(e) => {
                    s.state = QueueState::Crashed;
                    s.failure = Some(e.clone());
                }
            }
        });
    }

    /// Ok if producers may write; otherwise the current state.
    pub(crate) fn accepting(&self) -> Result<(), QueueState> {
        match self.state() {
            QueueState::Starting | QueueState::Running => Ok(()),
            other => Err(other),
        }
    }

    /// Graceful stop bounded by `grace`.
    ///
    /// `close` shuts the input. If no consumer loop was ever claimed, `drain` runs in its
    /// place. Past the deadline `executor` is aborted.
    pub(crate) async fn stop<D>(
        &self,
        grace: Duration,
        trigger: &CompletionTrigger,
        close: impl FnOnce(),
        executor: &BoundedExecutor,
        drain: D,
    ) -> Result<(), QueueError>
    where
        D: Future<Output = Result<(), QueueError>>,
    {
        let mut res = Ok(());
        let mut crashed = false;
        self.status.send_if_modified(|s| match s.state {
            QueueState::Created => {
                res = Err(self.not_started());
                false
            }
            QueueState::Stopped => {
                res = Err(self.already_stopped());
                false
            }
            QueueState::Crashed => {
                crashed = true;
                false
            }
            QueueState::Stopping => false,
            QueueState::Starting | QueueState::Running => {
                s.state = QueueState::Stopping;
                true
            }
        });
        res?;
        if crashed {
            return Ok(());
        }

        let deadline = Instant::now() + grace;
        if timeout_at(deadline, trigger.fire()).await.is_err() {
            debug!(service = %self.name, "completion trigger outlived the grace period");
        }
        close();

        let mut claimed = false;
        self.status.send_if_modified(|s| {
            if !s.executing && s.state == QueueState::Stopping {
                s.executing = true;
                claimed = true;
            }
            false
        });

        let mut rx = self.status.subscribe();
        let settled = async {
            if claimed {
                debug!(service = %self.name, "no consumer loop running; draining inline");
                drain.await?;
            }
            let failure = match rx.wait_for(|s| s.state.is_terminal()).await {
                Ok(status) => status.failure.clone(),
                Err(_) => None,
            };
            failure.map_or(Ok(()), Err)
        };

        tokio::select! {
            res = settled => res,
            _ = sleep_until(deadline) => {
                self.hard.cancel();
                let abandoned = executor.abort_all();
                if claimed {
                    self.finish(&Ok(()));
                }
                warn!(service = %self.name, ?grace, abandoned, "drain exceeded grace period; in-flight work aborted");
                Err(QueueError::GraceExceeded {
                    name: self.name.to_string(),
                    grace,
                    abandoned,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn life() -> Lifecycle {
        Lifecycle::new(Arc::from("q"))
    }

    fn running() -> Lifecycle {
        let l = life();
        l.begin_start().unwrap();
        l.mark_running();
        l
    }

    async fn nothing() -> Result<(), QueueError> {
        Ok(())
    }

    #[test]
    fn start_only_once() {
        let l = life();
        l.begin_start().unwrap();
        assert_eq!(l.state(), QueueState::Starting);
        assert_eq!(l.begin_start().unwrap_err().as_label(), "lifecycle_already_started");
        l.mark_running();
        assert_eq!(l.state(), QueueState::Running);
        assert!(l.accepting().is_ok());
    }

    #[test]
    fn consumer_loop_is_claimed_once() {
        let l = running();
        assert_eq!(l.begin_execute(), Ok(true));
        assert_eq!(l.begin_execute().unwrap_err().as_label(), "lifecycle_already_started");
    }

    #[tokio::test]
    async fn stop_before_start_fails() {
        let l = life();
        let err = l
            .stop(Duration::from_secs(1), &CompletionTrigger::Immediate, || {}, &BoundedExecutor::new(1), nothing())
            .await
            .unwrap_err();
        assert_eq!(err.as_label(), "lifecycle_not_started");
        assert_eq!(l.begin_execute().unwrap_err().as_label(), "lifecycle_not_started");
    }

    #[tokio::test]
    async fn stop_without_consumer_loop_drains_inline() {
        let l = running();
        let closed = AtomicBool::new(false);
        let drained = AtomicBool::new(false);
        let exec = BoundedExecutor::new(1);

        let drain = async {
            drained.store(true, Ordering::SeqCst);
            l.finish(&Ok(()));
            Ok(())
        };
        l.stop(Duration::from_secs(1), &CompletionTrigger::Immediate, || closed.store(true, Ordering::SeqCst), &exec, drain)
            .await
            .unwrap();

        assert!(closed.load(Ordering::SeqCst));
        assert!(drained.load(Ordering::SeqCst));
        assert_eq!(l.state(), QueueState::Stopped);
        assert_eq!(l.accepting(), Err(QueueState::Stopped));
        assert_eq!(l.begin_execute(), Ok(false));

        let again = l.stop(Duration::ZERO, &CompletionTrigger::Immediate, || {}, &exec, nothing()).await;
        assert_eq!(again.unwrap_err().as_label(), "lifecycle_already_stopped");
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_drain_hits_the_deadline() {
        let l = running();
        assert_eq!(l.begin_execute(), Ok(true));

        let err = l
            .stop(Duration::from_secs(2), &CompletionTrigger::Immediate, || {}, &BoundedExecutor::new(1), nothing())
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::GraceExceeded { abandoned: 0, .. }));
        assert!(l.hard().is_cancelled());
    }

    #[tokio::test]
    async fn crash_is_terminal_and_stop_is_a_no_op() {
        let l = running();
        assert_eq!(l.begin_execute(), Ok(true));
        l.finish(&Err(QueueError::Panicked {
            name: "q".into(),
            info: "x".into(),
        }));
        assert_eq!(l.state(), QueueState::Crashed);
        let res = l
            .stop(Duration::ZERO, &CompletionTrigger::Immediate, || {}, &BoundedExecutor::new(1), nothing())
            .await;
        assert!(res.is_ok());
    }

    #[tokio::test]
    async fn crash_while_draining_is_returned_by_stop() {
        let l = running();
        assert_eq!(l.begin_execute(), Ok(true));

        let executor = BoundedExecutor::new(1);
        let stopping = l.stop(Duration::from_secs(5), &CompletionTrigger::Immediate, || {}, &executor, nothing());
        let crash = async {
            tokio::task::yield_now().await;
            l.finish(&Err(QueueError::Panicked {
                name: "q".into(),
                info: "boom".into(),
            }));
        };
        let (res, ()) = tokio::join!(stopping, crash);

        assert!(matches!(res, Err(QueueError::Panicked { .. })));
        assert_eq!(l.state(), QueueState::Crashed);
    }
}
