//! Graceful shutdown and readiness coordination for HTTP listeners.
//!
//! A [`LifecycleServer`] wraps any [`ListeningServer`] and adds three things:
//! a [`ConnectionRegistry`] fed by connection and request events, a
//! [`ReadinessProbe`] answering the configured readiness path, and a
//! [`DrainCoordinator`] that runs the shutdown sequence.
//!
//! ## Shutdown sequence
//!
//! 1. The status flips to draining and the readiness endpoint starts
//!    failing.
//! 2. The coordinator waits until the orchestrator has probed the failing
//!    endpoint several times in a row, or until the confirmation timeout.
//! 3. The listener stops accepting. Idle connections are closed on every
//!    poll tick; busy ones are left to finish their requests.
//! 4. Once no connection remains, or the drain timeout passes and the rest
//!    are force-closed, the listener closes and every waiter on the
//!    [`ShutdownCompletion`] receives the outcome.
//!
//! The concrete listener shipped here is [`HttpListener`], a thread per
//! connection HTTP/1.1 server. Connection metrics flow to a [`MetricsSink`],
//! which [`RecorderMetrics`] publishes through the `metrics` facade; drain
//! progress flows to a [`DrainReporter`].

mod app;
mod drain;
mod health;
mod lifecycle;
mod metrics;
mod process;
mod readiness;
mod registry;
pub mod server;
mod telemetry;
mod transport;

pub use app::DefaultApp;
pub use drain::{DrainCoordinator, DrainSettings, ShutdownCompletion, ShutdownOutcome};
pub use health::{DrainOutcome, DrainReporter, StructuredDrainReporter};
pub use lifecycle::{LifecycleOptions, LifecycleServer};
pub use self::metrics::{
    ConnectionMetrics, IDLE_DURATION_BUCKETS, IDLE_DURATION_UNTIL_CLOSED, IDLE_SOCKET_COUNT,
    MetricsSink, MetricsSnapshot, NoopMetrics, RecorderMetrics, SOCKET_CLOSED_TOTAL,
    SOCKET_OPENED_TOTAL, describe_metrics,
};
pub use process::{
    ConfigLoader, LaunchError, RunningServer, SignalError, SignalHandlers, StaticConfigLoader,
    SystemConfigLoader, TERMINATION_SIGNALS, launch, run_server, run_server_with,
};
pub use readiness::{
    ProbeResponse, ReadinessProbe, ReadinessTransition, ServiceStatus, TransitionSource,
};
pub use registry::{
    ConnectionActivity, ConnectionId, ConnectionRecord, ConnectionRegistry, RegistryError,
};
pub use server::{ListeningServer, ServerError};
pub use telemetry::{TelemetryError, TelemetryHandle};
pub use transport::HttpListener;

#[cfg(test)]
mod tests;
