//! Defines the unified error surface for launching and stopping the server.

use std::sync::Arc;

use thiserror::Error;

use drainer_config::ConfigError;
use ortho_config::OrthoError;

use crate::server::ServerError;
use crate::telemetry::TelemetryError;

use super::signals::SignalError;

/// Errors surfaced while launching or supervising the server process.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// Configuration failed to load.
    #[error("failed to load configuration: {source}")]
    Config {
        /// Underlying loader error.
        #[source]
        source: Arc<OrthoError>,
    },
    /// Configuration loaded but is unusable.
    #[error("invalid configuration: {source}")]
    InvalidConfig {
        /// Validation failure.
        #[source]
        source: ConfigError,
    },
    /// Telemetry initialisation failed.
    #[error("failed to initialise telemetry: {source}")]
    Telemetry {
        /// Underlying telemetry error.
        #[source]
        source: TelemetryError,
    },
    /// Binding or starting the listener failed.
    #[error("server failed to start: {source}")]
    Server {
        /// Underlying server error.
        #[source]
        source: ServerError,
    },
    /// Installing signal handlers failed.
    #[error("failed to install signal handlers: {source}")]
    Signals {
        /// Underlying signal error.
        #[source]
        source: SignalError,
    },
    /// The drain finished but closing the listener failed.
    #[error("shutdown did not complete cleanly: {source}")]
    Shutdown {
        /// Error delivered through the completion handle.
        #[source]
        source: Arc<ServerError>,
    },
}

impl From<Arc<OrthoError>> for LaunchError {
    fn from(source: Arc<OrthoError>) -> Self {
        Self::Config { source }
    }
}

impl From<ConfigError> for LaunchError {
    fn from(source: ConfigError) -> Self {
        Self::InvalidConfig { source }
    }
}

impl From<TelemetryError> for LaunchError {
    fn from(source: TelemetryError) -> Self {
        Self::Telemetry { source }
    }
}

impl From<ServerError> for LaunchError {
    fn from(source: ServerError) -> Self {
        Self::Server { source }
    }
}

impl From<SignalError> for LaunchError {
    fn from(source: SignalError) -> Self {
        Self::Signals { source }
    }
}
