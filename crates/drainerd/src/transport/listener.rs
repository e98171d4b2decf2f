//! TCP listener implementing [`ListeningServer`].

use std::io;
use std::mem;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use drainer_config::Config;

use crate::registry::ConnectionId;
use crate::server::{
    ConnectionEvents, ConnectionTimeouts, ListeningServer, RequestProcessor, ServerError,
};

use super::LISTENER_TARGET;
use super::connection::{ConnectionContext, serve_connection};
use super::sockets::SocketTable;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(25);
const ERROR_BACKOFF: Duration = Duration::from_millis(150);

/// Listening socket shared with the accept thread. `None` once accepting
/// has stopped; dropping the socket closes it.
type SocketSlot = Arc<Mutex<Option<TcpListener>>>;

enum ListenerState {
    Bound,
    Running(thread::JoinHandle<()>),
    Closed,
}

/// Thread-per-connection HTTP/1.1 listener.
pub struct HttpListener {
    local_addr: SocketAddr,
    socket: SocketSlot,
    state: Mutex<ListenerState>,
    sockets: Arc<SocketTable>,
    timeouts: Arc<Mutex<ConnectionTimeouts>>,
}

impl std::fmt::Debug for HttpListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpListener")
            .field("local_addr", &self.local_addr)
            .field("open_sockets", &self.sockets.len())
            .finish_non_exhaustive()
    }
}

impl HttpListener {
    /// Binds to `host:port` without accepting yet.
    pub fn bind(host: &str, port: u16) -> Result<Self, ServerError> {
        let listener = bind_tcp(host, port)?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ServerError::Resolve {
                host: host.to_owned(),
                port,
                source,
            })?;
        Ok(Self {
            local_addr,
            socket: Arc::new(Mutex::new(Some(listener))),
            state: Mutex::new(ListenerState::Bound),
            sockets: Arc::new(SocketTable::default()),
            timeouts: Arc::new(Mutex::new(ConnectionTimeouts::default())),
        })
    }

    /// Binds to the configured host and port.
    pub fn from_config(config: &Config) -> Result<Self, ServerError> {
        let (host, port) = config.bind_address();
        Self::bind(host, port)
    }

    fn lock_state(&self) -> MutexGuard<'_, ListenerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Takes the listening socket out of the slot and closes it. Returns
    /// `false` when it was already closed.
    fn close_socket(&self) -> bool {
        let closed = lock_slot(&self.socket).take();
        closed.is_some()
    }

    #[cfg(test)]
    pub(crate) fn open_sockets(&self) -> usize {
        self.sockets.len()
    }
}

fn lock_slot(socket: &SocketSlot) -> MutexGuard<'_, Option<TcpListener>> {
    socket.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ListeningServer for HttpListener {
    fn configure_timeouts(&self, timeouts: ConnectionTimeouts) {
        *self
            .timeouts
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = timeouts;
    }

    fn listen(
        &self,
        events: Arc<dyn ConnectionEvents>,
        processor: Arc<dyn RequestProcessor>,
    ) -> Result<(), ServerError> {
        let mut state = self.lock_state();
        match *state {
            ListenerState::Bound => {}
            ListenerState::Running(_) => return Err(ServerError::AlreadyListening),
            ListenerState::Closed => return Err(ServerError::NotRunning),
        }
        match lock_slot(&self.socket).as_ref() {
            Some(listener) => listener
                .set_nonblocking(true)
                .map_err(|source| ServerError::NonBlocking { source })?,
            None => return Err(ServerError::NotRunning),
        }
        let accept = AcceptLoop {
            socket: Arc::clone(&self.socket),
            local_addr: self.local_addr,
            timeouts: Arc::clone(&self.timeouts),
            context: Arc::new(ConnectionContext {
                events,
                processor,
                sockets: Arc::clone(&self.sockets),
            }),
        };
        *state = ListenerState::Running(thread::spawn(move || accept.run()));
        Ok(())
    }

    fn stop_accepting(&self) {
        if self.close_socket() {
            info!(
                target: LISTENER_TARGET,
                addr = %self.local_addr,
                "listening socket closed"
            );
        }
    }

    fn terminate_connection(&self, id: ConnectionId) -> io::Result<()> {
        self.sockets.terminate(id)
    }

    fn close(&self) -> Result<(), ServerError> {
        self.stop_accepting();
        let previous = mem::replace(&mut *self.lock_state(), ListenerState::Closed);
        match previous {
            ListenerState::Running(handle) => handle.join().map_err(|_| ServerError::ThreadPanic),
            ListenerState::Bound => Ok(()),
            ListenerState::Closed => Err(ServerError::NotRunning),
        }
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        Some(self.local_addr)
    }
}

impl Drop for HttpListener {
    fn drop(&mut self) {
        self.close_socket();
    }
}

struct AcceptLoop {
    socket: SocketSlot,
    local_addr: SocketAddr,
    timeouts: Arc<Mutex<ConnectionTimeouts>>,
    context: Arc<ConnectionContext>,
}

enum AcceptStep {
    Accepted,
    Idle,
    Failed(io::Error),
    Stopped,
}

impl AcceptLoop {
    fn run(self) {
        info!(
            target: LISTENER_TARGET,
            addr = %self.local_addr,
            "listener accepting connections"
        );
        let mut next_id = 0_u64;
        let mut last_error = None::<io::ErrorKind>;
        loop {
            match self.accept_one(&mut next_id) {
                AcceptStep::Accepted => last_error = None,
                AcceptStep::Idle => thread::sleep(ACCEPT_BACKOFF),
                AcceptStep::Failed(error) => {
                    let kind = error.kind();
                    if last_error != Some(kind) {
                        warn!(
                            target: LISTENER_TARGET,
                            error = %error,
                            "socket accept error"
                        );
                    }
                    last_error = Some(kind);
                    thread::sleep(ERROR_BACKOFF);
                }
                AcceptStep::Stopped => break,
            }
        }
        info!(
            target: LISTENER_TARGET,
            addr = %self.local_addr,
            "listener stopped accepting connections"
        );
    }

    /// Accepts and registers at most one connection while holding the
    /// socket slot, so nothing is accepted once the slot is emptied.
    fn accept_one(&self, next_id: &mut u64) -> AcceptStep {
        let slot = lock_slot(&self.socket);
        let Some(listener) = slot.as_ref() else {
            return AcceptStep::Stopped;
        };
        match listener.accept() {
            Ok((stream, peer)) => {
                let id = ConnectionId::new(*next_id);
                *next_id += 1;
                if let Err(error) = self.dispatch(id, stream) {
                    warn!(
                        target: LISTENER_TARGET,
                        connection = %id,
                        peer = %peer,
                        error = %error,
                        "failed to prepare accepted connection"
                    );
                }
                AcceptStep::Accepted
            }
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => AcceptStep::Idle,
            Err(error) => AcceptStep::Failed(error),
        }
    }

    fn dispatch(&self, id: ConnectionId, stream: TcpStream) -> io::Result<()> {
        stream.set_nonblocking(false)?;
        let handle = stream.try_clone()?;
        let timeouts = *self
            .timeouts
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.context.sockets.insert(id, handle);
        self.context.events.connection_opened(id);
        debug!(
            target: LISTENER_TARGET,
            connection = %id,
            "connection accepted"
        );
        let context = Arc::clone(&self.context);
        thread::spawn(move || serve_connection(id, stream, timeouts, &context));
        Ok(())
    }
}

fn bind_tcp(host: &str, port: u16) -> Result<TcpListener, ServerError> {
    let mut addrs = (host, port)
        .to_socket_addrs()
        .map_err(|source| ServerError::Resolve {
            host: host.to_owned(),
            port,
            source,
        })?;
    let addr = addrs
        .find(|addr| matches!(addr, SocketAddr::V4(_) | SocketAddr::V6(_)))
        .ok_or_else(|| ServerError::ResolveEmpty {
            host: host.to_owned(),
            port,
        })?;
    TcpListener::bind(addr).map_err(|source| ServerError::Bind { addr, source })
}
