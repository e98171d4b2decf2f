//! Readiness and drain behaviour layered over any [`ListeningServer`].

use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info};

use drainer_config::Config;

use crate::drain::{DrainCoordinator, DrainSettings, ShutdownCompletion};
use crate::health::DrainReporter;
use crate::metrics::MetricsSink;
use crate::process::{SignalError, SignalHandlers};
use crate::readiness::{ReadinessProbe, ServiceStatus};
use crate::registry::{ConnectionId, ConnectionRegistry};
use crate::server::{
    ConnectionEvents, ConnectionTimeouts, ListeningServer, Request, RequestProcessor, Response,
    ServerError,
};

const LIFECYCLE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::lifecycle");

/// Settings of a [`LifecycleServer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleOptions {
    /// Path answered by the readiness probe.
    pub readiness_path: String,
    /// Timeouts applied to every accepted connection.
    pub timeouts: ConnectionTimeouts,
    /// Drain sequence timings.
    pub drain: DrainSettings,
}

impl LifecycleOptions {
    /// Reads every option from configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            readiness_path: config.readiness_path().to_owned(),
            timeouts: ConnectionTimeouts::from_config(config),
            drain: DrainSettings::from_config(config),
        }
    }
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Decorates a listening server with connection tracking, a readiness
/// endpoint and a graceful close.
///
/// `listen` marks the service ready once the inner server accepts
/// connections. `close` runs the drain sequence and blocks until it ends;
/// [`LifecycleServer::request_shutdown`] starts it without blocking.
pub struct LifecycleServer<S> {
    inner: Arc<S>,
    registry: Arc<ConnectionRegistry>,
    probe: Arc<ReadinessProbe>,
    coordinator: Arc<DrainCoordinator>,
    readiness_path: String,
    timeouts: Mutex<ConnectionTimeouts>,
}

impl<S> std::fmt::Debug for LifecycleServer<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleServer")
            .field("status", &self.probe.current_status())
            .field("connections", &self.registry.len())
            .field("readiness_path", &self.readiness_path)
            .finish_non_exhaustive()
    }
}

impl<S> LifecycleServer<S>
where
    S: ListeningServer + 'static,
{
    /// Wraps `inner`, reporting connection metrics to `metrics` and drain
    /// progress to `reporter`.
    pub fn new(
        inner: S,
        options: LifecycleOptions,
        metrics: Arc<dyn MetricsSink>,
        reporter: Arc<dyn DrainReporter>,
    ) -> Self {
        let inner = Arc::new(inner);
        let registry = Arc::new(ConnectionRegistry::new(metrics));
        let probe = Arc::new(ReadinessProbe::new());
        let server: Arc<dyn ListeningServer> = Arc::clone(&inner) as Arc<dyn ListeningServer>;
        let coordinator = DrainCoordinator::new(
            Arc::clone(&probe),
            Arc::clone(&registry),
            server,
            reporter,
            options.drain,
        );
        Self {
            inner,
            registry,
            probe,
            coordinator,
            readiness_path: options.readiness_path,
            timeouts: Mutex::new(options.timeouts),
        }
    }

    /// Wraps `inner` using options read from `config`.
    pub fn from_config(
        inner: S,
        config: &Config,
        metrics: Arc<dyn MetricsSink>,
        reporter: Arc<dyn DrainReporter>,
    ) -> Self {
        Self::new(inner, LifecycleOptions::from_config(config), metrics, reporter)
    }

    /// Starts listening with `processor` and no additional event observer.
    pub fn start(&self, processor: Arc<dyn RequestProcessor>) -> Result<(), ServerError> {
        self.listen_with(None, processor)
    }

    fn listen_with(
        &self,
        downstream: Option<Arc<dyn ConnectionEvents>>,
        processor: Arc<dyn RequestProcessor>,
    ) -> Result<(), ServerError> {
        if self.coordinator.is_shutting_down() {
            return Err(ServerError::NotRunning);
        }
        let timeouts = *self
            .timeouts
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.inner.configure_timeouts(timeouts);
        let events = Arc::new(TrackedEvents {
            registry: Arc::clone(&self.registry),
            downstream,
        });
        let router = Arc::new(ReadinessRouter {
            probe: Arc::clone(&self.probe),
            path: self.readiness_path.clone(),
            app: processor,
        });
        self.inner.listen(events, router)?;
        if !self.probe.set_status(ServiceStatus::Ready) {
            // A shutdown closed the service while the inner listen was running.
            match self.inner.close() {
                Ok(()) | Err(ServerError::NotRunning) => {}
                Err(error) => return Err(error),
            }
            return Err(ServerError::NotRunning);
        }
        info!(
            target: LIFECYCLE_TARGET,
            addr = ?self.inner.local_addr(),
            readiness_path = %self.readiness_path,
            "server ready"
        );
        Ok(())
    }

    /// Starts the drain sequence and returns without waiting.
    pub fn request_shutdown(&self) -> ShutdownCompletion {
        self.coordinator.request_shutdown()
    }

    /// Handle resolved when shutdown finishes.
    #[must_use]
    pub fn completion(&self) -> ShutdownCompletion {
        self.coordinator.completion()
    }

    /// Current readiness status.
    #[must_use]
    pub fn status(&self) -> ServiceStatus {
        self.probe.current_status()
    }

    /// Readiness probe shared with the drain sequence.
    #[must_use]
    pub const fn probe(&self) -> &Arc<ReadinessProbe> {
        &self.probe
    }

    /// Registry of open connections.
    #[must_use]
    pub const fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// The wrapped server.
    #[must_use]
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Requests shutdown on SIGINT or SIGTERM until the returned handle is
    /// closed or dropped.
    pub fn install_signal_handlers(&self) -> Result<SignalHandlers, SignalError> {
        let coordinator = Arc::clone(&self.coordinator);
        SignalHandlers::install(move |signal| {
            info!(
                target: LIFECYCLE_TARGET,
                signal,
                "termination signal received"
            );
            coordinator.request_shutdown();
        })
    }
}

impl<S> ListeningServer for LifecycleServer<S>
where
    S: ListeningServer + 'static,
{
    fn configure_timeouts(&self, timeouts: ConnectionTimeouts) {
        *self
            .timeouts
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = timeouts;
        self.inner.configure_timeouts(timeouts);
    }

    fn listen(
        &self,
        events: Arc<dyn ConnectionEvents>,
        processor: Arc<dyn RequestProcessor>,
    ) -> Result<(), ServerError> {
        self.listen_with(Some(events), processor)
    }

    fn stop_accepting(&self) {
        self.inner.stop_accepting();
    }

    fn terminate_connection(&self, id: ConnectionId) -> io::Result<()> {
        self.inner.terminate_connection(id)
    }

    fn close(&self) -> Result<(), ServerError> {
        self.request_shutdown()
            .wait()
            .map_err(|source| ServerError::Shutdown { source })
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.local_addr()
    }
}

/// Feeds connection events into the registry before passing them on.
struct TrackedEvents {
    registry: Arc<ConnectionRegistry>,
    downstream: Option<Arc<dyn ConnectionEvents>>,
}

impl ConnectionEvents for TrackedEvents {
    fn connection_opened(&self, id: ConnectionId) {
        if let Err(error) = self.registry.register_connection(id) {
            debug!(
                target: LIFECYCLE_TARGET,
                error = %error,
                "connection registry overwritten"
            );
        }
        if let Some(downstream) = &self.downstream {
            downstream.connection_opened(id);
        }
    }

    fn connection_closed(&self, id: ConnectionId) {
        self.registry.remove_connection(id);
        if let Some(downstream) = &self.downstream {
            downstream.connection_closed(id);
        }
    }

    fn request_started(&self, id: ConnectionId) {
        self.registry.record_request_start(id);
        if let Some(downstream) = &self.downstream {
            downstream.request_started(id);
        }
    }

    fn request_finished(&self, id: ConnectionId) {
        self.registry.record_request_end(id);
        if let Some(downstream) = &self.downstream {
            downstream.request_finished(id);
        }
    }
}

/// Answers the readiness path from the probe; everything else goes to the
/// application.
struct ReadinessRouter {
    probe: Arc<ReadinessProbe>,
    path: String,
    app: Arc<dyn RequestProcessor>,
}

impl RequestProcessor for ReadinessRouter {
    fn process(&self, request: &Request) -> Response {
        if request.path == self.path {
            Response::empty(self.probe.handle_probe_request().status_code)
        } else {
            self.app.process(request)
        }
    }
}
