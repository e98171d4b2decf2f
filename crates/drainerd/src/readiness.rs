//! Readiness state exposed to the orchestrator.
//!
//! The probe owns the process-wide [`ServiceStatus`] and publishes a
//! [`ReadinessTransition`] for every probe request and every status change.
//! The drain coordinator subscribes to that stream to learn when the
//! orchestrator has seen the service report not-ready.

use std::fmt;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use tracing::{debug, info};

const READINESS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::readiness");

/// Process-wide service status. Ordered; only forward moves are allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ServiceStatus {
    /// The listener is not accepting connections yet.
    Starting,
    /// Accepting and serving traffic.
    Ready,
    /// Shutdown requested; in-flight work is finishing.
    Draining,
    /// The drain sequence completed.
    Closed,
}

impl ServiceStatus {
    /// True only for [`ServiceStatus::Ready`].
    #[must_use]
    pub const fn is_ready(self) -> bool {
        matches!(self, Self::Ready)
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Draining => "draining",
            Self::Closed => "closed",
        };
        f.write_str(label)
    }
}

/// What produced a [`ReadinessTransition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionSource {
    /// The readiness endpoint answered a probe.
    Probe,
    /// The status was changed through [`ReadinessProbe::set_status`].
    StatusChange,
}

/// A status observation published on the transition stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessTransition {
    /// Status at the time of the observation.
    pub status: ServiceStatus,
    /// When the observation was made.
    pub at: Instant,
    /// What produced the observation.
    pub source: TransitionSource,
}

/// Response returned to a readiness probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeResponse {
    /// HTTP status code: 200 while ready, 500 otherwise.
    pub status_code: u16,
    /// Status reported by the probe.
    pub status: ServiceStatus,
}

impl ProbeResponse {
    /// Status code used while the service is ready.
    pub const READY: u16 = 200;
    /// Status code used in every other state.
    pub const NOT_READY: u16 = 500;

    /// True when the probe reports success.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status_code == Self::READY
    }
}

struct ProbeState {
    status: ServiceStatus,
    subscribers: Vec<Sender<ReadinessTransition>>,
}

impl ProbeState {
    fn publish(&mut self, transition: ReadinessTransition) {
        self.subscribers
            .retain(|subscriber| subscriber.send(transition).is_ok());
    }
}

/// Holds the service status and its transition stream.
pub struct ReadinessProbe {
    state: Mutex<ProbeState>,
}

impl fmt::Debug for ReadinessProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadinessProbe")
            .field("status", &self.current_status())
            .finish_non_exhaustive()
    }
}

impl Default for ReadinessProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadinessProbe {
    /// Builds a probe in the [`ServiceStatus::Starting`] state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ProbeState {
                status: ServiceStatus::Starting,
                subscribers: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ProbeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Status at the time of the call.
    #[must_use]
    pub fn current_status(&self) -> ServiceStatus {
        self.lock().status
    }

    /// Answers a readiness probe and publishes the observation.
    pub fn handle_probe_request(&self) -> ProbeResponse {
        let mut state = self.lock();
        let status = state.status;
        state.publish(ReadinessTransition {
            status,
            at: Instant::now(),
            source: TransitionSource::Probe,
        });
        let status_code = if status.is_ready() {
            ProbeResponse::READY
        } else {
            ProbeResponse::NOT_READY
        };
        ProbeResponse {
            status_code,
            status,
        }
    }

    /// Moves the status forward. Returns `false`, leaving the status
    /// unchanged, when `next` is not ahead of the current status.
    pub fn set_status(&self, next: ServiceStatus) -> bool {
        self.advance(None, next)
    }

    /// Moves from `expected` to `next` only if the status is still
    /// `expected`.
    pub fn transition(&self, expected: ServiceStatus, next: ServiceStatus) -> bool {
        self.advance(Some(expected), next)
    }

    fn advance(&self, expected: Option<ServiceStatus>, next: ServiceStatus) -> bool {
        let mut state = self.lock();
        let current = state.status;
        if expected.is_some_and(|status| status != current) {
            return false;
        }
        if next <= current {
            debug!(
                target: READINESS_TARGET,
                current = %current,
                requested = %next,
                "ignoring non-forward status change"
            );
            return false;
        }
        state.status = next;
        state.publish(ReadinessTransition {
            status: next,
            at: Instant::now(),
            source: TransitionSource::StatusChange,
        });
        drop(state);
        info!(
            target: READINESS_TARGET,
            from = %current,
            to = %next,
            "service status changed"
        );
        true
    }

    /// Subscribes to the transition stream. Only observations published
    /// after this call are delivered.
    #[must_use]
    pub fn subscribe(&self) -> Receiver<ReadinessTransition> {
        let (sender, receiver) = mpsc::channel();
        self.lock().subscribers.push(sender);
        receiver
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn probe_fails_until_ready() {
        let probe = ReadinessProbe::new();
        assert_eq!(probe.handle_probe_request().status_code, 500);
        assert!(probe.set_status(ServiceStatus::Ready));
        let response = probe.handle_probe_request();
        assert!(response.is_success());
        assert_eq!(response.status, ServiceStatus::Ready);
    }

    #[rstest]
    #[case(ServiceStatus::Draining)]
    #[case(ServiceStatus::Closed)]
    fn probe_fails_once_shutdown_begins(#[case] status: ServiceStatus) {
        let probe = ReadinessProbe::new();
        probe.set_status(ServiceStatus::Ready);
        probe.set_status(status);
        for _ in 0..3 {
            assert_eq!(probe.handle_probe_request().status_code, 500);
        }
    }

    #[rstest]
    #[case(ServiceStatus::Draining, ServiceStatus::Ready)]
    #[case(ServiceStatus::Closed, ServiceStatus::Ready)]
    #[case(ServiceStatus::Closed, ServiceStatus::Draining)]
    #[case(ServiceStatus::Draining, ServiceStatus::Draining)]
    fn backward_moves_are_rejected(#[case] reached: ServiceStatus, #[case] attempt: ServiceStatus) {
        let probe = ReadinessProbe::new();
        probe.set_status(reached);
        assert!(!probe.set_status(attempt));
        assert_eq!(probe.current_status(), reached);
    }

    #[rstest]
    fn transition_requires_the_expected_status() {
        let probe = ReadinessProbe::new();
        assert!(!probe.transition(ServiceStatus::Ready, ServiceStatus::Closed));
        assert_eq!(probe.current_status(), ServiceStatus::Starting);
        assert!(probe.transition(ServiceStatus::Starting, ServiceStatus::Closed));
        assert_eq!(probe.current_status(), ServiceStatus::Closed);
    }

    #[rstest]
    fn every_probe_is_published_even_without_change() {
        let probe = ReadinessProbe::new();
        probe.set_status(ServiceStatus::Ready);
        let stream = probe.subscribe();
        probe.handle_probe_request();
        probe.handle_probe_request();
        probe.set_status(ServiceStatus::Draining);
        probe.handle_probe_request();

        let observed: Vec<_> = stream
            .try_iter()
            .map(|transition| (transition.status, transition.source))
            .collect();
        assert_eq!(
            observed,
            vec![
                (ServiceStatus::Ready, TransitionSource::Probe),
                (ServiceStatus::Ready, TransitionSource::Probe),
                (ServiceStatus::Draining, TransitionSource::StatusChange),
                (ServiceStatus::Draining, TransitionSource::Probe),
            ]
        );
    }

    #[rstest]
    fn dropped_subscribers_are_pruned() {
        let probe = ReadinessProbe::new();
        drop(probe.subscribe());
        let live = probe.subscribe();
        probe.handle_probe_request();
        assert_eq!(probe.lock().subscribers.len(), 1);
        assert_eq!(live.try_iter().count(), 1);
    }
}
