//! Waits for the orchestrator to observe the not-ready status.

use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use crate::readiness::{ReadinessTransition, TransitionSource};

use super::DrainSettings;

/// How the confirmation phase ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Confirmation {
    /// The threshold of consecutive not-ready probes was met.
    Confirmed { observations: u32, elapsed: Duration },
    /// The confirmation timeout elapsed first.
    TimedOut { observations: u32, elapsed: Duration },
}

/// Counts consecutive not-ready probe observations on `stream`.
///
/// Status changes do not count; a ready observation resets the count. Once
/// the threshold is met the settle delay runs, clipped to whatever remains
/// of the confirmation timeout. A confirmed `elapsed` ends at the probe that
/// met the threshold and excludes the settle delay.
pub(crate) fn await_confirmation(
    stream: &Receiver<ReadinessTransition>,
    settings: &DrainSettings,
) -> Confirmation {
    let started = Instant::now();
    let deadline = started + settings.confirmation_timeout;
    let mut observations = 0_u32;
    let mut confirmed_at = started;
    while observations < settings.confirmation_threshold {
        let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
            return Confirmation::TimedOut {
                observations,
                elapsed: started.elapsed(),
            };
        };
        match stream.recv_timeout(remaining) {
            Ok(transition) if transition.source == TransitionSource::Probe => {
                if transition.status.is_ready() {
                    observations = 0;
                } else {
                    observations += 1;
                    confirmed_at = transition.at;
                }
            }
            Ok(_) => {}
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => {
                return Confirmation::TimedOut {
                    observations,
                    elapsed: started.elapsed(),
                };
            }
        }
    }
    let settle = settings
        .settle_delay
        .min(deadline.saturating_duration_since(Instant::now()));
    thread::sleep(settle);
    Confirmation::Confirmed {
        observations,
        elapsed: confirmed_at.saturating_duration_since(started),
    }
}
