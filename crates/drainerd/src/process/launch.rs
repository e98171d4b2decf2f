//! Supervises server launch sequencing and the shutdown wait.

use std::sync::Arc;

use ortho_config::OrthoError;
use tracing::info;

use drainer_config::{Config, OrthoConfig};

use crate::app::DefaultApp;
use crate::health::StructuredDrainReporter;
use crate::lifecycle::LifecycleServer;
use crate::metrics::{ConnectionMetrics, MetricsSnapshot, RecorderMetrics};
use crate::server::{ListeningServer, RequestProcessor};
use crate::telemetry;
use crate::transport::HttpListener;

use super::PROCESS_TARGET;
use super::errors::LaunchError;
use super::signals::SignalHandlers;

/// Abstraction over configuration loading so tests can inject fixtures.
pub trait ConfigLoader: Send + Sync {
    /// Loads the server configuration.
    fn load(&self) -> Result<Config, Arc<OrthoError>>;
}

/// Loader that reads CLI arguments, the environment and configuration files.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemConfigLoader;

impl ConfigLoader for SystemConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Config::load()
    }
}

/// Loader that always yields a fixed configuration.
#[derive(Debug, Clone)]
pub struct StaticConfigLoader {
    config: Config,
}

impl StaticConfigLoader {
    /// Wraps `config`.
    #[must_use]
    pub const fn new(config: Config) -> Self {
        Self { config }
    }
}

impl ConfigLoader for StaticConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Ok(self.config.clone())
    }
}

/// A listening server with its signal handlers and metrics.
#[derive(Debug)]
pub struct RunningServer {
    server: LifecycleServer<HttpListener>,
    metrics: Arc<ConnectionMetrics>,
    signals: SignalHandlers,
}

impl RunningServer {
    /// The lifecycle-wrapped listener.
    #[must_use]
    pub const fn server(&self) -> &LifecycleServer<HttpListener> {
        &self.server
    }

    /// Blocks until the drain sequence completes, then releases the signal
    /// handlers and returns the final connection metrics.
    pub fn wait(self) -> Result<MetricsSnapshot, LaunchError> {
        let Self {
            server,
            metrics,
            signals,
        } = self;
        let outcome = server.completion().wait();
        signals.close();
        let snapshot = metrics.snapshot();
        info!(
            target: PROCESS_TARGET,
            opened = snapshot.opened,
            closed = snapshot.closed,
            idle = snapshot.idle,
            idle_observations = snapshot.idle_duration_count(),
            idle_seconds_total = snapshot.idle_duration_sum.as_secs_f64(),
            "connection summary"
        );
        outcome.map_err(|source| LaunchError::Shutdown { source })?;
        Ok(snapshot)
    }
}

/// Binds the configured listener, starts serving `processor` and installs
/// the termination signal handlers.
pub fn launch(
    config: &Config,
    processor: Arc<dyn RequestProcessor>,
) -> Result<RunningServer, LaunchError> {
    config.validate()?;
    let listener = HttpListener::from_config(config)?;
    let metrics = Arc::new(ConnectionMetrics::new());
    let server = LifecycleServer::from_config(
        listener,
        config,
        Arc::new((Arc::clone(&metrics), RecorderMetrics::new())),
        Arc::new(StructuredDrainReporter::new()),
    );
    server.start(processor)?;
    let signals = server.install_signal_handlers()?;
    info!(
        target: PROCESS_TARGET,
        addr = ?server.local_addr(),
        "waiting for termination signal"
    );
    Ok(RunningServer {
        server,
        metrics,
        signals,
    })
}

/// Runs the server with production collaborators until a termination
/// signal drains it.
pub fn run_server() -> Result<(), LaunchError> {
    run_server_with(&SystemConfigLoader, Arc::new(DefaultApp))
}

/// Runs the server with an injected loader and application.
pub fn run_server_with(
    loader: &dyn ConfigLoader,
    processor: Arc<dyn RequestProcessor>,
) -> Result<(), LaunchError> {
    let config = loader.load()?;
    telemetry::initialise(&config)?;
    info!(
        target: PROCESS_TARGET,
        host = %config.host,
        port = config.port,
        "starting server"
    );
    launch(&config, processor)?.wait()?;
    info!(target: PROCESS_TARGET, "shutdown sequence completed");
    Ok(())
}
