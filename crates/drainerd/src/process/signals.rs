use std::io;
use std::thread;

use signal_hook::consts::signal::{SIGINT, SIGTERM};
use signal_hook::iterator::{Handle, Signals};
use thiserror::Error;
use tracing::debug;

use super::PROCESS_TARGET;

/// Signals that request a graceful shutdown.
pub const TERMINATION_SIGNALS: [i32; 2] = [SIGINT, SIGTERM];

/// Errors reported while installing signal handlers.
#[derive(Debug, Error)]
pub enum SignalError {
    /// Registering the handlers failed.
    #[error("failed to install signal handlers: {source}")]
    Install {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Background thread delivering termination signals to a callback.
///
/// The handlers stay registered until [`SignalHandlers::close`] runs or the
/// value is dropped.
pub struct SignalHandlers {
    handle: Handle,
    thread: Option<thread::JoinHandle<()>>,
}

impl std::fmt::Debug for SignalHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalHandlers")
            .field("closed", &self.handle.is_closed())
            .finish_non_exhaustive()
    }
}

impl SignalHandlers {
    /// Calls `on_signal` for every SIGINT or SIGTERM received.
    pub fn install<F>(on_signal: F) -> Result<Self, SignalError>
    where
        F: Fn(i32) + Send + 'static,
    {
        Self::install_for(&TERMINATION_SIGNALS, on_signal)
    }

    /// Calls `on_signal` for every signal in `watched` received.
    pub fn install_for<F>(watched: &[i32], on_signal: F) -> Result<Self, SignalError>
    where
        F: Fn(i32) + Send + 'static,
    {
        let mut signals = Signals::new(watched).map_err(|source| SignalError::Install { source })?;
        let handle = signals.handle();
        let thread = thread::spawn(move || {
            for signal in signals.forever() {
                on_signal(signal);
            }
            debug!(target: PROCESS_TARGET, "signal thread stopped");
        });
        Ok(Self {
            handle,
            thread: Some(thread),
        })
    }

    /// Unregisters the handlers and joins the signal thread.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.handle.close();
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            debug!(target: PROCESS_TARGET, "signal callback panicked");
        }
    }
}

impl Drop for SignalHandlers {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use signal_hook::consts::signal::SIGUSR2;
    use std::sync::mpsc;
    use std::time::Duration;

    #[rstest]
    fn delivers_registered_signals_to_the_callback() {
        let (sender, received) = mpsc::channel();
        let handlers = SignalHandlers::install_for(&[SIGUSR2], move |signal| {
            let _sent = sender.send(signal);
        })
        .expect("install handlers");

        signal_hook::low_level::raise(SIGUSR2).expect("raise signal");
        assert_eq!(
            received
                .recv_timeout(Duration::from_secs(2))
                .expect("signal delivered"),
            SIGUSR2
        );
        handlers.close();
    }
}
