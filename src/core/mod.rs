//! Runtime core: hosting and lifecycle.
//!
//! The public API from this module is the [`Service`] contract, the [`Supervisor`]
//! hosting one service, its [`SupervisorBuilder`] and the health types.
//!
//! Internal modules:
//! - [`service`]: start/execute/stop contract implemented by queues and consumers;
//! - [`supervisor`]: crash capture, graceful stop, event publishing;
//! - [`health`]: readiness/liveness projections;
//! - [`shutdown`]: cross-platform shutdown signal handling;
//! - [`builder`]: supervisor wiring (bus, subscribers).

mod builder;
mod health;
mod service;
mod shutdown;
mod supervisor;

pub use builder::SupervisorBuilder;
pub use health::{HealthReport, HealthStatus, SupervisorState};
pub use service::Service;
pub use shutdown::wait_for_shutdown_signal;
pub use supervisor::Supervisor;
