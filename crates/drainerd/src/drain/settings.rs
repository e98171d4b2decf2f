use std::time::Duration;

use drainer_config::Config;

/// Timing parameters of the drain sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainSettings {
    /// Consecutive not-ready probe observations required before draining.
    pub confirmation_threshold: u32,
    /// Ceiling on the confirmation phase, settle delay included.
    pub confirmation_timeout: Duration,
    /// Pause after the confirmation threshold is met.
    pub settle_delay: Duration,
    /// Interval between idle-connection sweeps.
    pub poll_interval: Duration,
    /// Ceiling on the active drain phase.
    pub drain_timeout: Duration,
}

impl DrainSettings {
    /// Reads the drain timings from configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            confirmation_threshold: config.confirmation_threshold(),
            confirmation_timeout: config.confirmation_timeout(),
            settle_delay: config.settle_delay(),
            poll_interval: config.poll_interval(),
            drain_timeout: config.drain_timeout(),
        }
    }

    /// Worst-case time from shutdown request to the start of the final close.
    #[must_use]
    pub fn ceiling(&self) -> Duration {
        self.confirmation_timeout + self.drain_timeout
    }
}

impl Default for DrainSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}
