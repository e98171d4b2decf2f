//! Built-in defaults for the drain daemon.
//!
//! Every value here can be overridden through the CLI, the environment or a
//! configuration file.

use crate::logging::LogFormat;

/// Interface the listener binds to.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// TCP port the listener binds to.
pub const DEFAULT_PORT: u16 = 8000;

/// Request path answered by the readiness probe.
pub const DEFAULT_READINESS_PATH: &str = "/healthz";

/// Idle keep-alive timeout applied to every accepted connection.
pub const DEFAULT_KEEP_ALIVE_TIMEOUT_MS: u64 = 300_000;

/// Extra time granted for request headers on top of the keep-alive timeout.
pub const HEADER_TIMEOUT_MARGIN_MS: u64 = 1_000;

/// Consecutive not-ready probe observations required before draining.
pub const DEFAULT_CONFIRMATION_THRESHOLD: u32 = 3;

/// Ceiling on the confirmation phase.
pub const DEFAULT_CONFIRMATION_TIMEOUT_MS: u64 = 30_000;

/// Pause after the confirmation threshold is met.
pub const DEFAULT_SETTLE_DELAY_MS: u64 = 500;

/// Interval between idle-connection sweeps.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

/// Ceiling on the active drain phase.
pub const DEFAULT_DRAIN_TIMEOUT_MS: u64 = 30_000;

/// Default log filter expression used by the binaries.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default log filter expression used by the binaries.
#[must_use]
pub const fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Default logging format for the binaries.
#[must_use]
pub const fn default_log_format() -> LogFormat {
    LogFormat::Json
}

/// Header timeout derived from a keep-alive timeout.
#[must_use]
pub const fn header_timeout_for(keep_alive_ms: u64) -> u64 {
    keep_alive_ms.saturating_add(HEADER_TIMEOUT_MARGIN_MS)
}
