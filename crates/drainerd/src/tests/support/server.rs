//! In-memory [`ListeningServer`] that records calls and closes terminated
//! connections asynchronously, the way a real socket close arrives.

use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use crate::registry::ConnectionId;
use crate::server::{
    ConnectionEvents, ConnectionTimeouts, ListeningServer, RequestProcessor, ServerError,
};

/// Control-surface calls observed by [`FakeServer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ServerCall {
    Listen,
    StopAccepting,
    Terminate(ConnectionId),
    Close,
}

#[derive(Default)]
struct FakeState {
    calls: Vec<ServerCall>,
    events: Option<Arc<dyn ConnectionEvents>>,
    processor: Option<Arc<dyn RequestProcessor>>,
    timeouts: Option<ConnectionTimeouts>,
    fail_listen: bool,
    close_error: Option<ServerError>,
}

/// Shared handle; clones observe the same state.
#[derive(Clone, Default)]
pub(crate) struct FakeServer {
    state: Arc<Mutex<FakeState>>,
}

impl FakeServer {
    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().expect("fake server mutex poisoned")
    }

    /// Makes the next `listen` fail.
    pub(crate) fn fail_listen(&self) {
        self.lock().fail_listen = true;
    }

    /// Makes `close` report `error`.
    pub(crate) fn fail_close(&self, error: ServerError) {
        self.lock().close_error = Some(error);
    }

    /// Every control call so far, in order.
    pub(crate) fn calls(&self) -> Vec<ServerCall> {
        self.lock().calls.clone()
    }

    /// Connections terminated so far, in order.
    pub(crate) fn terminated(&self) -> Vec<ConnectionId> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                ServerCall::Terminate(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    /// Number of recorded calls equal to `call`.
    pub(crate) fn count(&self, call: ServerCall) -> usize {
        self.calls().iter().filter(|seen| **seen == call).count()
    }

    /// Event sink installed by `listen`.
    pub(crate) fn events(&self) -> Option<Arc<dyn ConnectionEvents>> {
        self.lock().events.clone()
    }

    /// Request processor installed by `listen`.
    pub(crate) fn processor(&self) -> Option<Arc<dyn RequestProcessor>> {
        self.lock().processor.clone()
    }

    /// Timeouts applied before `listen`.
    pub(crate) fn timeouts(&self) -> Option<ConnectionTimeouts> {
        self.lock().timeouts
    }
}

impl ListeningServer for FakeServer {
    fn configure_timeouts(&self, timeouts: ConnectionTimeouts) {
        self.lock().timeouts = Some(timeouts);
    }

    fn listen(
        &self,
        events: Arc<dyn ConnectionEvents>,
        processor: Arc<dyn RequestProcessor>,
    ) -> Result<(), ServerError> {
        let mut state = self.lock();
        if state.fail_listen {
            return Err(ServerError::AlreadyListening);
        }
        state.calls.push(ServerCall::Listen);
        state.events = Some(events);
        state.processor = Some(processor);
        Ok(())
    }

    fn stop_accepting(&self) {
        self.lock().calls.push(ServerCall::StopAccepting);
    }

    fn terminate_connection(&self, id: ConnectionId) -> io::Result<()> {
        let mut state = self.lock();
        if state.calls.contains(&ServerCall::Terminate(id)) {
            return Err(io::Error::new(io::ErrorKind::NotFound, "already terminated"));
        }
        state.calls.push(ServerCall::Terminate(id));
        if let Some(events) = state.events.clone() {
            thread::spawn(move || events.connection_closed(id));
        }
        Ok(())
    }

    fn close(&self) -> Result<(), ServerError> {
        let mut state = self.lock();
        state.calls.push(ServerCall::Close);
        state.close_error.take().map_or(Ok(()), Err)
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }
}
