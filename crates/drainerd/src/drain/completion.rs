//! One-shot completion signal shared by every shutdown caller.

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::server::ServerError;

/// Result delivered to shutdown waiters: success, or the error reported by
/// the underlying close.
pub type ShutdownOutcome = Result<(), Arc<ServerError>>;

type Callback = Box<dyn FnOnce(&ShutdownOutcome) + Send>;

#[derive(Default)]
struct Slot {
    outcome: Option<ShutdownOutcome>,
    callbacks: Vec<Callback>,
}

#[derive(Default)]
struct CompletionState {
    slot: Mutex<Slot>,
    resolved: Condvar,
}

/// Cloneable handle that resolves exactly once when shutdown finishes.
#[derive(Clone, Default)]
pub struct ShutdownCompletion {
    state: Arc<CompletionState>,
}

impl fmt::Debug for ShutdownCompletion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShutdownCompletion")
            .field("outcome", &self.try_outcome())
            .finish()
    }
}

impl ShutdownCompletion {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.state
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Stores the outcome, wakes waiters and runs queued callbacks. Only the
    /// first call has any effect; it returns `true`.
    pub(crate) fn resolve(&self, outcome: ShutdownOutcome) -> bool {
        let callbacks = {
            let mut slot = self.lock();
            if slot.outcome.is_some() {
                return false;
            }
            slot.outcome = Some(outcome.clone());
            std::mem::take(&mut slot.callbacks)
        };
        self.state.resolved.notify_all();
        for callback in callbacks {
            callback(&outcome);
        }
        true
    }

    /// Runs `callback` once the outcome is known; immediately when it
    /// already is.
    pub fn on_complete(&self, callback: impl FnOnce(&ShutdownOutcome) + Send + 'static) {
        let mut slot = self.lock();
        match slot.outcome.clone() {
            Some(outcome) => {
                drop(slot);
                callback(&outcome);
            }
            None => slot.callbacks.push(Box::new(callback)),
        }
    }

    /// Blocks until shutdown completes.
    #[must_use]
    pub fn wait(&self) -> ShutdownOutcome {
        let mut slot = self.lock();
        loop {
            if let Some(outcome) = slot.outcome.clone() {
                return outcome;
            }
            slot = self
                .state
                .resolved
                .wait(slot)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Blocks for at most `timeout`; `None` if shutdown is still running.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> Option<ShutdownOutcome> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.lock();
        loop {
            if let Some(outcome) = slot.outcome.clone() {
                return Some(outcome);
            }
            let remaining = deadline.checked_duration_since(Instant::now())?;
            slot = self
                .state
                .resolved
                .wait_timeout(slot, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// The outcome, if shutdown already completed.
    #[must_use]
    pub fn try_outcome(&self) -> Option<ShutdownOutcome> {
        self.lock().outcome.clone()
    }

    /// True once shutdown completed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.lock().outcome.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[rstest]
    fn first_resolution_wins() {
        let completion = ShutdownCompletion::new();
        assert!(completion.resolve(Ok(())));
        assert!(!completion.resolve(Err(Arc::new(ServerError::NotRunning))));
        assert!(matches!(completion.wait(), Ok(())));
    }

    #[rstest]
    fn waiters_on_other_threads_are_woken() {
        let completion = ShutdownCompletion::new();
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let handle = completion.clone();
                thread::spawn(move || handle.wait())
            })
            .collect();
        thread::sleep(Duration::from_millis(20));
        completion.resolve(Err(Arc::new(ServerError::ThreadPanic)));
        for waiter in waiters {
            let outcome = waiter.join().expect("waiter thread");
            assert!(matches!(
                outcome,
                Err(ref error) if matches!(**error, ServerError::ThreadPanic)
            ));
        }
    }

    #[rstest]
    fn wait_timeout_returns_none_while_pending() {
        let completion = ShutdownCompletion::new();
        assert!(completion.wait_timeout(Duration::from_millis(20)).is_none());
        assert!(!completion.is_complete());
    }

    #[rstest]
    fn callbacks_run_once_whenever_registered() {
        let completion = ShutdownCompletion::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let early = Arc::clone(&calls);
        completion.on_complete(move |outcome| {
            assert!(outcome.is_ok());
            early.fetch_add(1, Ordering::SeqCst);
        });
        completion.resolve(Ok(()));
        completion.resolve(Ok(()));
        let late = Arc::clone(&calls);
        completion.on_complete(move |_| {
            late.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
