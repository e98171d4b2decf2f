//! The drain sequence run once per process.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Instant;

use tracing::debug;

use crate::health::{DrainOutcome, DrainReporter};
use crate::readiness::{ReadinessProbe, ReadinessTransition, ServiceStatus};
use crate::registry::{ConnectionId, ConnectionRegistry};
use crate::server::{ListeningServer, ServerError};

use super::DrainSettings;
use super::completion::ShutdownCompletion;
use super::confirmation::{Confirmation, await_confirmation};

const DRAIN_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::drain");

/// Runs the graceful shutdown of one listening server.
///
/// The sequence flips readiness to draining, waits for the orchestrator to
/// observe it, stops accepting, closes idle connections as they appear and
/// finally closes the listener. Only the first shutdown request starts it;
/// every request receives the same [`ShutdownCompletion`].
pub struct DrainCoordinator {
    probe: Arc<ReadinessProbe>,
    registry: Arc<ConnectionRegistry>,
    server: Arc<dyn ListeningServer>,
    reporter: Arc<dyn DrainReporter>,
    settings: DrainSettings,
    started: AtomicBool,
    completion: ShutdownCompletion,
    this: Weak<Self>,
}

impl std::fmt::Debug for DrainCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DrainCoordinator")
            .field("settings", &self.settings)
            .field("started", &self.started.load(Ordering::SeqCst))
            .field("completion", &self.completion)
            .finish_non_exhaustive()
    }
}

impl DrainCoordinator {
    /// Builds a coordinator; nothing runs until
    /// [`DrainCoordinator::request_shutdown`].
    #[must_use]
    pub fn new(
        probe: Arc<ReadinessProbe>,
        registry: Arc<ConnectionRegistry>,
        server: Arc<dyn ListeningServer>,
        reporter: Arc<dyn DrainReporter>,
        settings: DrainSettings,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            probe,
            registry,
            server,
            reporter,
            settings,
            started: AtomicBool::new(false),
            completion: ShutdownCompletion::new(),
            this: this.clone(),
        })
    }

    /// Timing parameters in use.
    #[must_use]
    pub const fn settings(&self) -> &DrainSettings {
        &self.settings
    }

    /// Handle that resolves when shutdown finishes, whether or not it has
    /// been requested yet.
    #[must_use]
    pub fn completion(&self) -> ShutdownCompletion {
        self.completion.clone()
    }

    /// True once a shutdown request was accepted.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Starts the drain sequence on a background thread and returns
    /// immediately. Later calls only return the shared completion handle.
    ///
    /// A server that never became ready is closed without draining; a
    /// listener that was never started counts as closed cleanly.
    pub fn request_shutdown(&self) -> ShutdownCompletion {
        if self.started.swap(true, Ordering::SeqCst) {
            debug!(target: DRAIN_TARGET, "shutdown already in progress");
            return self.completion();
        }
        let started = Instant::now();
        let status = self.probe.current_status();
        self.reporter.shutdown_requested(status);
        if status == ServiceStatus::Starting
            && self
                .probe
                .transition(ServiceStatus::Starting, ServiceStatus::Closed)
        {
            let result = match self.server.close() {
                Err(ServerError::NotRunning) => Ok(()),
                other => other,
            };
            self.finish(result, started);
            return self.completion();
        }

        // Subscribe before flipping so every not-ready probe is seen.
        let stream = self.probe.subscribe();
        self.probe.set_status(ServiceStatus::Draining);
        match self.this.upgrade() {
            Some(this) => {
                thread::spawn(move || this.run(&stream, started));
            }
            None => self.run(&stream, started),
        }
        self.completion()
    }

    fn run(&self, stream: &Receiver<ReadinessTransition>, started: Instant) {
        match await_confirmation(stream, &self.settings) {
            Confirmation::Confirmed {
                observations,
                elapsed,
            } => self.reporter.confirmation_reached(observations, elapsed),
            Confirmation::TimedOut {
                observations,
                elapsed,
            } => self.reporter.confirmation_timed_out(observations, elapsed),
        }

        self.server.stop_accepting();
        self.reporter.listener_stopped(self.registry.len());

        let drain_started = Instant::now();
        let outcome = self.drain();
        self.reporter
            .drain_finished(outcome, drain_started.elapsed());

        self.probe.set_status(ServiceStatus::Closed);
        let result = self.server.close();
        self.finish(result, started);
    }

    fn finish(&self, result: Result<(), ServerError>, started: Instant) {
        self.reporter
            .shutdown_completed(result.as_ref().map(|_| ()), started.elapsed());
        self.completion.resolve(result.map_err(Arc::new));
    }

    /// Sweeps idle connections every poll interval until none remain or the
    /// drain timeout passes, then force-closes whatever is left.
    fn drain(&self) -> DrainOutcome {
        let deadline = Instant::now() + self.settings.drain_timeout;
        loop {
            let snapshot = self.registry.snapshot();
            if snapshot.is_empty() {
                return DrainOutcome::Emptied;
            }
            let Some(remaining_time) = deadline.checked_duration_since(Instant::now()) else {
                let remaining = snapshot.len();
                let terminated = snapshot
                    .iter()
                    .filter(|entry| self.terminate(entry.id))
                    .count();
                self.reporter.sweep_completed(remaining, terminated);
                return DrainOutcome::TimedOut { remaining };
            };
            let terminated = self.registry.for_each_idle(|id| self.terminate(id));
            self.reporter.sweep_completed(snapshot.len(), terminated);
            thread::sleep(self.settings.poll_interval.min(remaining_time));
        }
    }

    fn terminate(&self, id: ConnectionId) -> bool {
        match self.server.terminate_connection(id) {
            Ok(()) => true,
            Err(error) => {
                debug!(
                    target: DRAIN_TARGET,
                    connection = %id,
                    error = %error,
                    "connection already gone"
                );
                false
            }
        }
    }
}
