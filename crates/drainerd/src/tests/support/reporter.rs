//! Test double for [`DrainReporter`] that records structured events for
//! assertions.

use std::sync::Mutex;
use std::time::Duration;

use crate::health::{DrainOutcome, DrainReporter};
use crate::readiness::ServiceStatus;
use crate::server::ServerError;

/// Drain lifecycle events tracked during scenarios.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum DrainEvent {
    ShutdownRequested(ServiceStatus),
    ConfirmationReached(u32),
    ConfirmationTimedOut(u32),
    ListenerStopped(usize),
    SweepCompleted { remaining: usize, terminated: usize },
    DrainFinished(DrainOutcome),
    ShutdownCompleted(Result<(), String>),
}

/// Records drain events for assertions.
#[derive(Debug, Default)]
pub(crate) struct RecordingDrainReporter {
    events: Mutex<Vec<DrainEvent>>,
}

impl RecordingDrainReporter {
    /// Captures a copy of the recorded events.
    pub(crate) fn events(&self) -> Vec<DrainEvent> {
        self.events
            .lock()
            .expect("drain reporter mutex poisoned")
            .clone()
    }

    /// Number of recorded events matching `predicate`.
    pub(crate) fn count(&self, predicate: impl Fn(&DrainEvent) -> bool) -> usize {
        self.events().iter().filter(|event| predicate(event)).count()
    }

    fn record(&self, event: DrainEvent) {
        self.events
            .lock()
            .expect("drain reporter mutex poisoned")
            .push(event);
    }
}

impl DrainReporter for RecordingDrainReporter {
    fn shutdown_requested(&self, status: ServiceStatus) {
        self.record(DrainEvent::ShutdownRequested(status));
    }

    fn confirmation_reached(&self, observations: u32, _elapsed: Duration) {
        self.record(DrainEvent::ConfirmationReached(observations));
    }

    fn confirmation_timed_out(&self, observations: u32, _elapsed: Duration) {
        self.record(DrainEvent::ConfirmationTimedOut(observations));
    }

    fn listener_stopped(&self, open_connections: usize) {
        self.record(DrainEvent::ListenerStopped(open_connections));
    }

    fn sweep_completed(&self, remaining: usize, terminated: usize) {
        self.record(DrainEvent::SweepCompleted {
            remaining,
            terminated,
        });
    }

    fn drain_finished(&self, outcome: DrainOutcome, _elapsed: Duration) {
        self.record(DrainEvent::DrainFinished(outcome));
    }

    fn shutdown_completed(&self, result: Result<(), &ServerError>, _elapsed: Duration) {
        self.record(DrainEvent::ShutdownCompleted(
            result.map_err(ToString::to_string),
        ));
    }
}
