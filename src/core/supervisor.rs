//! # Supervisor: hosts one service, captures crashes, projects health.
//!
//! The [`Supervisor`] owns the event bus, a [`SubscriberSet`] and the lifecycle of one
//! [`Service`] (a [`BackgroundQueue`](crate::BackgroundQueue), a
//! [`SourceConsumer`](crate::SourceConsumer) or a custom implementation).
//!
//! ## Key responsibilities
//! - run `start`, spawn `execute`, run `stop` with the configured grace period
//! - capture errors and panics escaping the service as a terminal `Crashed` state
//! - publish state and shutdown [`Event`]s, fanned out to subscribers
//! - answer readiness/liveness probes
//!
//! ## High-level architecture
//! ```text
//! start():
//!   NotStarted ─► Starting ── publish(ServiceStarting)
//!                    └─► service.start(shutdown) ─► Running ── publish(ServiceRunning)
//!                                └─► spawn: service.execute(shutdown)
//!                                            ├─ Ok             ─► (Running ─► Stopped)
//!                                            └─ Err / panic    ─► Crashed ── publish(ServiceCrashed)
//!
//! stop():
//!   Running ─► Stopping ── publish(ShutdownRequested, ServiceStopping)
//!                └─► service.stop(cfg.grace)
//!                      ├─ Ok            ─► publish(DrainedWithinGrace)
//!                      ├─ GraceExceeded ─► publish(GraceExceeded)
//!                      └─ Err           ─► Crashed ── publish(ServiceCrashed), returned
//!                └─► shutdown.cancel(), await execute (same deadline) ─► Stopped ── publish(ServiceStopped)
//!
//! run_until_signal():
//!   start() ─► wait for SIGINT/SIGTERM/SIGQUIT/Ctrl-C or the loop exiting ─► stop()
//! ```
//!
//! ## Rules
//! - `stop` before `start` fails with `NotStarted`; a second `start` with `AlreadyStarted`.
//! - `Crashed` is terminal: the captured cause stays visible in both probes.
//! - `stop` of a crashed service only releases the shutdown token.
//! - A crash while `stop` drains is returned by that `stop`.
//! - `stop` takes at most `grace`: the service stop and the loop exit share one deadline.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::watch;
use tokio::time::{Instant, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::SupervisorConfig;
use crate::core::builder::SupervisorBuilder;
use crate::core::health::{self, HealthReport, SupervisorState};
use crate::core::service::Service;
use crate::core::shutdown;
use crate::error::{LifecycleError, QueueError, panic_message};
use crate::events::{Bus, Event, EventKind};
use crate::subscribers::SubscriberSet;

struct Status {
    state: SupervisorState,
    failure: Option<QueueError>,
    cause: Option<Arc<str>>,
    exited: bool,
}

/// Hosts one [`Service`] with crash capture and health reporting.
pub struct Supervisor<S: Service> {
    cfg: SupervisorConfig,
    name: Arc<str>,
    service: Arc<S>,
    bus: Bus,
    subs: Arc<SubscriberSet>,
    status: watch::Sender<Status>,
    shutdown: CancellationToken,
}

impl<S: Service> Supervisor<S> {
    /// Shorthand for [`SupervisorBuilder::new`].
    pub fn builder(service: Arc<S>) -> SupervisorBuilder<S> {
        SupervisorBuilder::new(service)
    }

    pub(crate) fn new_internal(
        cfg: SupervisorConfig,
        service: Arc<S>,
        bus: Bus,
        subs: Arc<SubscriberSet>,
    ) -> Self {
        let (status, _) = watch::channel(Status {
            state: SupervisorState::NotStarted,
            failure: None,
            cause: None,
            exited: false,
        });
        Self {
            cfg,
            name: Arc::from(service.name()),
            service,
            bus,
            subs,
            status,
            shutdown: CancellationToken::new(),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SupervisorState {
        self.status.borrow().state
    }

    /// Captured crash cause, if the service crashed.
    pub fn crash(&self) -> Option<Arc<str>> {
        self.status.borrow().cause.clone()
    }

    /// Ready = started and not crashed.
    pub fn readiness(&self) -> HealthReport {
        let st = self.status.borrow();
        health::readiness(st.state, st.cause.clone())
    }

    /// Live = starting or running and not crashed.
    pub fn liveness(&self) -> HealthReport {
        let st = self.status.borrow();
        health::liveness(st.state, st.cause.clone())
    }

    /// Bus carrying supervisor and service events.
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// The hosted service.
    pub fn service(&self) -> &Arc<S> {
        &self.service
    }

    /// Number of attached subscribers.
    pub fn subscribers(&self) -> usize {
        self.subs.len()
    }

    /// Waits until the consumer loop (or a failed `start`) has returned.
    pub async fn exited(&self) {
        let mut rx = self.status.subscribe();
        let _ = rx.wait_for(|s| s.exited).await;
    }

    /// Starts the service and spawns its consumer loop.
    ///
    /// A failing or panicking `start` marks the supervisor crashed and is returned.
    pub async fn start(self: &Arc<Self>) -> Result<(), QueueError> {
        let mut res = Ok(());
        self.status.send_if_modified(|s| {
            if s.state == SupervisorState::NotStarted {
                s.state = SupervisorState::Starting;
                true
            } else {
                res = Err(LifecycleError::AlreadyStarted {
                    name: self.name.to_string(),
                });
                false
            }
        });
        res?;
        self.publish(EventKind::ServiceStarting);

        let started = AssertUnwindSafe(self.service.start(self.shutdown.clone()))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Err(self.panicked(&*payload)));
        if let Err(e) = started {
            self.record_crash(&e);
            self.status.send_modify(|s| s.exited = true);
            return Err(e);
        }

        let running = self.status.send_if_modified(|s| {
            let moved = s.state == SupervisorState::Starting;
            if moved {
                s.state = SupervisorState::Running;
            }
            moved
        });
        if running {
            info!(service = %self.name, "service running");
            self.publish(EventKind::ServiceRunning);
        }

        let sup = Arc::clone(self);
        tokio::spawn(async move { sup.execute().await });
        Ok(())
    }

    async fn execute(&self) {
        let res = AssertUnwindSafe(self.service.execute(self.shutdown.clone()))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Err(self.panicked(&*payload)));

        match res {
            Ok(()) => {
                debug!(service = %self.name, "consumer loop returned");
                let ended = self.status.send_if_modified(|s| {
                    let moved = s.state == SupervisorState::Running;
                    if moved {
                        s.state = SupervisorState::Stopped;
                    }
                    moved
                });
                if ended {
                    self.publish(EventKind::ServiceStopped);
                }
            }
            Err(e) => self.record_crash(&e),
        }
        self.status.send_modify(|s| s.exited = true);
    }

    /// Gracefully stops the service within `cfg.grace`.
    ///
    /// Returns `GraceExceeded` when in-flight work had to be abandoned.
    pub async fn stop(&self) -> Result<(), QueueError> {
        let mut res = Ok(());
        let mut crashed = false;
        self.status.send_if_modified(|s| match s.state {
            SupervisorState::NotStarted => {
                res = Err(LifecycleError::NotStarted {
                    name: self.name.to_string(),
                });
                false
            }
            SupervisorState::Stopping | SupervisorState::Stopped => {
                res = Err(LifecycleError::AlreadyStopped {
                    name: self.name.to_string(),
                });
                false
            }
            SupervisorState::Crashed => {
                crashed = true;
                false
            }
            SupervisorState::Starting | SupervisorState::Running => {
                s.state = SupervisorState::Stopping;
                true
            }
        });
        res?;
        if crashed {
            self.shutdown.cancel();
            return Ok(());
        }

        let grace = self.cfg.grace;
        info!(service = %self.name, ?grace, "stopping service");
        self.publish(EventKind::ShutdownRequested);
        self.publish(EventKind::ServiceStopping);

        let deadline = Instant::now() + grace;
        let outcome = AssertUnwindSafe(self.service.stop(grace))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Err(self.panicked(&*payload)));
        match &outcome {
            Ok(()) | Err(QueueError::GraceExceeded { .. }) => {}
            Err(e) => self.record_crash(e),
        }
        self.shutdown.cancel();

        let mut rx = self.status.subscribe();
        if timeout_at(deadline, rx.wait_for(|s| s.exited)).await.is_err() {
            debug!(service = %self.name, "consumer loop still exiting at the deadline");
        }

        match outcome {
            Ok(()) => {
                let failure = self.status.borrow().failure.clone();
                if let Some(e) = failure {
                    return Err(e);
                }
                self.publish(EventKind::DrainedWithinGrace);
                self.settle_stopped();
                Ok(())
            }
            Err(QueueError::GraceExceeded {
                name,
                grace,
                abandoned,
            }) => {
                self.bus.publish(
                    Event::new(EventKind::GraceExceeded)
                        .with_service(Arc::clone(&self.name))
                        .with_timeout(grace)
                        .with_count(abandoned as u64),
                );
                self.settle_stopped();
                Err(QueueError::GraceExceeded {
                    name,
                    grace,
                    abandoned,
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Starts the service, then stops it on a termination signal.
    ///
    /// Returns early with the crash error if the consumer loop fails first.
    pub async fn run_until_signal(self: &Arc<Self>) -> Result<(), QueueError> {
        self.start().await?;

        let signal = async {
            if let Err(e) = shutdown::wait_for_shutdown_signal().await {
                warn!(error = %e, "cannot listen for termination signals");
                std::future::pending::<()>().await;
            }
        };

        tokio::select! {
            _ = signal => {
                info!(service = %self.name, "termination signal received");
                self.stop().await
            }
            _ = self.exited() => {
                let failure = self.status.borrow().failure.clone();
                match failure {
                    Some(e) => Err(e),
                    None => Ok(()),
                }
            }
        }
    }

    fn settle_stopped(&self) {
        let moved = self.status.send_if_modified(|s| {
            let moved = s.state == SupervisorState::Stopping;
            if moved {
                s.state = SupervisorState::Stopped;
            }
            moved
        });
        if moved {
            info!(service = %self.name, "service stopped");
            self.publish(EventKind::ServiceStopped);
        }
    }

    /// First crash wins; later failures of the same service are only logged.
    fn record_crash(&self, err: &QueueError) {
        let cause: Arc<str> = Arc::from(err.to_string());
        let first = self.status.send_if_modified(|s| {
            if s.state == SupervisorState::Crashed {
                return false;
            }
            s.state = SupervisorState::Crashed;
            s.failure = Some(err.clone());
            s.cause = Some(Arc::clone(&cause));
            true
        });
        if !first {
            debug!(service = %self.name, label = err.as_label(), %cause, "further failure after crash");
            return;
        }
        error!(service = %self.name, label = err.as_label(), %cause, "service crashed");
        self.bus.publish(
            Event::new(EventKind::ServiceCrashed)
                .with_service(Arc::clone(&self.name))
                .with_reason(cause),
        );
    }

    fn panicked(&self, payload: &(dyn std::any::Any + Send)) -> QueueError {
        QueueError::Panicked {
            name: self.name.to_string(),
            info: panic_message(payload),
        }
    }

    fn publish(&self, kind: EventKind) {
        self.bus
            .publish(Event::new(kind).with_service(Arc::clone(&self.name)));
    }
}
