//! Handles to live connection sockets, used to force-close them by id.

use std::collections::HashMap;
use std::io;
use std::net::{Shutdown, TcpStream};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::registry::ConnectionId;

#[derive(Debug, Default)]
pub(crate) struct SocketTable {
    sockets: Mutex<HashMap<ConnectionId, TcpStream>>,
}

impl SocketTable {
    fn lock(&self) -> MutexGuard<'_, HashMap<ConnectionId, TcpStream>> {
        self.sockets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn insert(&self, id: ConnectionId, stream: TcpStream) {
        self.lock().insert(id, stream);
    }

    pub(crate) fn remove(&self, id: ConnectionId) {
        self.lock().remove(&id);
    }

    /// Shuts down both halves of the socket; the connection thread then sees
    /// end-of-stream and reports the close.
    pub(crate) fn terminate(&self, id: ConnectionId) -> io::Result<()> {
        let sockets = self.lock();
        let stream = sockets.get(&id).ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no open socket for {id}"))
        })?;
        stream.shutdown(Shutdown::Both)
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }
}
