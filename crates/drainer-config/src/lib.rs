//! Shared configuration for the drain daemon.
//!
//! Values are layered by `ortho_config`: built-in defaults, an optional TOML
//! file (`--config-path` or `DRAINER_CONFIG_PATH`), `DRAINER_*` environment
//! variables and finally command-line flags. Durations are stored as
//! milliseconds so every layer can express them as plain integers; the
//! accessors hand out [`Duration`] values.

mod defaults;
mod logging;

use std::time::Duration;

pub use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use defaults::{
    DEFAULT_CONFIRMATION_THRESHOLD, DEFAULT_CONFIRMATION_TIMEOUT_MS, DEFAULT_DRAIN_TIMEOUT_MS,
    DEFAULT_HOST, DEFAULT_KEEP_ALIVE_TIMEOUT_MS, DEFAULT_LOG_FILTER, DEFAULT_POLL_INTERVAL_MS,
    DEFAULT_PORT, DEFAULT_READINESS_PATH, DEFAULT_SETTLE_DELAY_MS, HEADER_TIMEOUT_MARGIN_MS,
    default_log_filter, default_log_format, header_timeout_for,
};
pub use logging::{LogFormat, LogFormatParseError};

/// Runtime configuration for the listener, the drain sequence and logging.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "DRAINER")]
#[serde(default)]
pub struct Config {
    /// Interface the listener binds to.
    pub host: String,
    /// TCP port the listener binds to.
    pub port: u16,
    /// Request path answered by the readiness probe.
    pub readiness_path: String,
    /// Idle keep-alive timeout for accepted connections, in milliseconds.
    pub keep_alive_timeout_ms: u64,
    /// Time allowed to receive a request head, in milliseconds. Defaults to
    /// the keep-alive timeout plus one second.
    pub header_timeout_ms: Option<u64>,
    /// Consecutive not-ready probe observations required before draining.
    pub confirmation_threshold: u32,
    /// Ceiling on the confirmation phase, in milliseconds.
    pub confirmation_timeout_ms: u64,
    /// Pause after the confirmation threshold is met, in milliseconds.
    pub settle_delay_ms: u64,
    /// Interval between idle-connection sweeps, in milliseconds.
    pub poll_interval_ms: u64,
    /// Ceiling on the active drain phase, in milliseconds.
    pub drain_timeout_ms: u64,
    /// `tracing` filter expression.
    pub log_filter: String,
    /// Output format for log records.
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_owned(),
            port: DEFAULT_PORT,
            readiness_path: DEFAULT_READINESS_PATH.to_owned(),
            keep_alive_timeout_ms: DEFAULT_KEEP_ALIVE_TIMEOUT_MS,
            header_timeout_ms: None,
            confirmation_threshold: DEFAULT_CONFIRMATION_THRESHOLD,
            confirmation_timeout_ms: DEFAULT_CONFIRMATION_TIMEOUT_MS,
            settle_delay_ms: DEFAULT_SETTLE_DELAY_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            drain_timeout_ms: DEFAULT_DRAIN_TIMEOUT_MS,
            log_filter: DEFAULT_LOG_FILTER.to_owned(),
            log_format: default_log_format(),
        }
    }
}

/// Errors reported when a loaded configuration is internally inconsistent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The confirmation threshold must be at least one observation.
    #[error("confirmation_threshold must be at least 1")]
    ZeroConfirmationThreshold,
    /// A zero poll interval would spin the sweep loop.
    #[error("poll_interval_ms must be greater than zero")]
    ZeroPollInterval,
    /// The readiness path must be absolute.
    #[error("readiness_path '{path}' must start with '/'")]
    RelativeReadinessPath {
        /// Offending path.
        path: String,
    },
    /// Header reads cannot finish before the connection idles out.
    #[error("header_timeout_ms ({header_ms}) must not be shorter than keep_alive_timeout_ms ({keep_alive_ms})")]
    HeaderTimeoutTooShort {
        /// Configured header timeout.
        header_ms: u64,
        /// Configured keep-alive timeout.
        keep_alive_ms: u64,
    },
}

impl Config {
    /// Checks relationships between fields that the loader cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.confirmation_threshold == 0 {
            return Err(ConfigError::ZeroConfirmationThreshold);
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::ZeroPollInterval);
        }
        if !self.readiness_path.starts_with('/') {
            return Err(ConfigError::RelativeReadinessPath {
                path: self.readiness_path.clone(),
            });
        }
        if let Some(header_ms) = self.header_timeout_ms
            && header_ms < self.keep_alive_timeout_ms
        {
            return Err(ConfigError::HeaderTimeoutTooShort {
                header_ms,
                keep_alive_ms: self.keep_alive_timeout_ms,
            });
        }
        Ok(())
    }

    /// Host and port the listener binds to.
    #[must_use]
    pub fn bind_address(&self) -> (&str, u16) {
        (self.host.as_str(), self.port)
    }

    /// Request path answered by the readiness probe.
    #[must_use]
    pub fn readiness_path(&self) -> &str {
        &self.readiness_path
    }

    /// Idle keep-alive timeout for accepted connections.
    #[must_use]
    pub const fn keep_alive_timeout(&self) -> Duration {
        Duration::from_millis(self.keep_alive_timeout_ms)
    }

    /// Time allowed to receive a request head.
    #[must_use]
    pub fn header_timeout(&self) -> Duration {
        let millis = self
            .header_timeout_ms
            .unwrap_or_else(|| header_timeout_for(self.keep_alive_timeout_ms));
        Duration::from_millis(millis)
    }

    /// Consecutive not-ready probe observations required before draining.
    #[must_use]
    pub const fn confirmation_threshold(&self) -> u32 {
        self.confirmation_threshold
    }

    /// Ceiling on the confirmation phase.
    #[must_use]
    pub const fn confirmation_timeout(&self) -> Duration {
        Duration::from_millis(self.confirmation_timeout_ms)
    }

    /// Pause after the confirmation threshold is met.
    #[must_use]
    pub const fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Interval between idle-connection sweeps.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Ceiling on the active drain phase.
    #[must_use]
    pub const fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    /// `tracing` filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Output format for log records.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }
}
