use std::sync::Arc;

use crate::{
    config::SupervisorConfig,
    core::{Service, Supervisor},
    events::Bus,
    subscribers::{Subscribe, SubscriberSet},
};

/// Builder for constructing a [`Supervisor`] around one service.
pub struct SupervisorBuilder<S: Service> {
    service: Arc<S>,
    cfg: SupervisorConfig,
    subscribers: Vec<Arc<dyn Subscribe>>,
}

impl<S: Service> SupervisorBuilder<S> {
    /// Creates a builder for `service` with the default configuration.
    pub fn new(service: Arc<S>) -> Self {
        Self {
            service,
            cfg: SupervisorConfig::default(),
            subscribers: Vec::new(),
        }
    }

    /// Replaces the supervisor configuration.
    pub fn with_config(mut self, cfg: SupervisorConfig) -> Self {
        self.cfg = cfg;
        self
    }

    /// Sets event subscribers for observability.
    ///
    /// Subscribers receive supervisor and service events through dedicated workers
    /// with bounded queues.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Builds the supervisor and starts the subscriber workers.
    ///
    /// Events go to the service's own bus when it has one, so delivery and lifecycle
    /// events share a sequence. Must be called within a tokio runtime.
    pub fn build(self) -> Arc<Supervisor<S>> {
        let bus = self
            .service
            .bus()
            .unwrap_or_else(|| Bus::new(self.cfg.bus_capacity_clamped()));
        let subs = Arc::new(SubscriberSet::new(self.subscribers, bus.clone()));
        if !subs.is_empty() {
            subs.listen();
        }
        Arc::new(Supervisor::new_internal(self.cfg, self.service, bus, subs))
    }
}
