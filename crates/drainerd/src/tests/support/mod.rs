//! Test doubles shared by the behaviour suites.

mod reporter;
mod server;

use std::time::Duration;

use crate::drain::DrainSettings;

pub(crate) use reporter::{DrainEvent, RecordingDrainReporter};
pub(crate) use server::{FakeServer, ServerCall};

/// Timings short enough for tests yet long enough to observe each phase.
pub(crate) fn fast_settings() -> DrainSettings {
    DrainSettings {
        confirmation_threshold: 3,
        confirmation_timeout: Duration::from_secs(2),
        settle_delay: Duration::from_millis(10),
        poll_interval: Duration::from_millis(25),
        drain_timeout: Duration::from_secs(2),
    }
}
