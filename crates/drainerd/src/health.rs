//! Structured reporting for drain lifecycle events.

use std::sync::Arc;
use std::time::Duration;

use crate::readiness::ServiceStatus;
use crate::server::ServerError;

const HEALTH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::health");

/// How the active drain phase ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Every connection closed before the drain timeout.
    Emptied,
    /// The drain timeout elapsed; `remaining` connections were force-closed.
    TimedOut {
        /// Connections still registered at the deadline.
        remaining: usize,
    },
}

/// Observer trait used to surface drain lifecycle events to telemetry sinks.
pub trait DrainReporter: Send + Sync {
    /// A shutdown request started the drain sequence.
    fn shutdown_requested(&self, status: ServiceStatus);

    /// The orchestrator was seen probing not-ready often enough. `elapsed`
    /// ends at the probe that met the threshold.
    fn confirmation_reached(&self, observations: u32, elapsed: Duration);

    /// The confirmation phase ran out of time; draining proceeds anyway.
    fn confirmation_timed_out(&self, observations: u32, elapsed: Duration);

    /// The listener no longer accepts new connections.
    fn listener_stopped(&self, open_connections: usize);

    /// One sweep of the drain loop completed.
    fn sweep_completed(&self, remaining: usize, terminated: usize);

    /// The active drain phase ended.
    fn drain_finished(&self, outcome: DrainOutcome, elapsed: Duration);

    /// The final close finished and waiters were notified.
    fn shutdown_completed(&self, result: Result<(), &ServerError>, elapsed: Duration);
}

impl<T> DrainReporter for Arc<T>
where
    T: DrainReporter + ?Sized,
{
    fn shutdown_requested(&self, status: ServiceStatus) {
        (**self).shutdown_requested(status);
    }

    fn confirmation_reached(&self, observations: u32, elapsed: Duration) {
        (**self).confirmation_reached(observations, elapsed);
    }

    fn confirmation_timed_out(&self, observations: u32, elapsed: Duration) {
        (**self).confirmation_timed_out(observations, elapsed);
    }

    fn listener_stopped(&self, open_connections: usize) {
        (**self).listener_stopped(open_connections);
    }

    fn sweep_completed(&self, remaining: usize, terminated: usize) {
        (**self).sweep_completed(remaining, terminated);
    }

    fn drain_finished(&self, outcome: DrainOutcome, elapsed: Duration) {
        (**self).drain_finished(outcome, elapsed);
    }

    fn shutdown_completed(&self, result: Result<(), &ServerError>, elapsed: Duration) {
        (**self).shutdown_completed(result, elapsed);
    }
}

/// Default reporter that records lifecycle events using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredDrainReporter;

impl StructuredDrainReporter {
    /// Builds a new reporter.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl DrainReporter for StructuredDrainReporter {
    fn shutdown_requested(&self, status: ServiceStatus) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "shutdown_requested",
            status = %status,
            "shutdown requested; waiting for readiness probes to observe not-ready"
        );
    }

    fn confirmation_reached(&self, observations: u32, elapsed: Duration) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "confirmation_reached",
            observations,
            elapsed_ms = elapsed.as_millis(),
            "orchestrator observed not-ready"
        );
    }

    fn confirmation_timed_out(&self, observations: u32, elapsed: Duration) {
        tracing::warn!(
            target: HEALTH_TARGET,
            event = "confirmation_timed_out",
            observations,
            elapsed_ms = elapsed.as_millis(),
            "readiness confirmation timed out; draining anyway"
        );
    }

    fn listener_stopped(&self, open_connections: usize) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "listener_stopped",
            open_connections,
            "stopped accepting new connections"
        );
    }

    fn sweep_completed(&self, remaining: usize, terminated: usize) {
        tracing::debug!(
            target: HEALTH_TARGET,
            event = "sweep_completed",
            remaining,
            terminated,
            "drain sweep completed"
        );
    }

    fn drain_finished(&self, outcome: DrainOutcome, elapsed: Duration) {
        match outcome {
            DrainOutcome::Emptied => tracing::info!(
                target: HEALTH_TARGET,
                event = "drain_finished",
                elapsed_ms = elapsed.as_millis(),
                "all connections drained"
            ),
            DrainOutcome::TimedOut { remaining } => tracing::warn!(
                target: HEALTH_TARGET,
                event = "drain_timed_out",
                remaining,
                elapsed_ms = elapsed.as_millis(),
                "drain timeout reached; remaining connections force-closed"
            ),
        }
    }

    fn shutdown_completed(&self, result: Result<(), &ServerError>, elapsed: Duration) {
        match result {
            Ok(()) => tracing::info!(
                target: HEALTH_TARGET,
                event = "shutdown_completed",
                elapsed_ms = elapsed.as_millis(),
                "server closed"
            ),
            Err(error) => tracing::error!(
                target: HEALTH_TARGET,
                event = "shutdown_failed",
                error = %error,
                elapsed_ms = elapsed.as_millis(),
                "server close reported an error"
            ),
        }
    }
}
