//! Per-connection request loop.

use std::io::{self, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::registry::ConnectionId;
use crate::server::{ConnectionEvents, ConnectionTimeouts, RequestProcessor, Response};

use super::LISTENER_TARGET;
use super::codec::{RequestReader, write_response};
use super::sockets::SocketTable;

/// Collaborators shared by every connection thread of one listener.
pub(crate) struct ConnectionContext {
    pub(crate) events: Arc<dyn ConnectionEvents>,
    pub(crate) processor: Arc<dyn RequestProcessor>,
    pub(crate) sockets: Arc<SocketTable>,
}

/// Emits the close events for a connection however its thread exits,
/// including by panic inside the application.
struct ConnectionGuard<'a> {
    id: ConnectionId,
    context: &'a ConnectionContext,
    in_flight: bool,
}

impl Drop for ConnectionGuard<'_> {
    fn drop(&mut self) {
        if self.in_flight {
            self.context.events.request_finished(self.id);
        }
        self.context.sockets.remove(self.id);
        self.context.events.connection_closed(self.id);
    }
}

/// Serves sequential requests on `stream` until either side closes it.
///
/// The accept loop has already reported the connection as opened; the
/// matching close is reported here on every exit path.
pub(crate) fn serve_connection(
    id: ConnectionId,
    stream: TcpStream,
    timeouts: ConnectionTimeouts,
    context: &ConnectionContext,
) {
    let mut guard = ConnectionGuard {
        id,
        context,
        in_flight: false,
    };
    let mut writer = match stream.try_clone() {
        Ok(writer) => writer,
        Err(error) => {
            warn!(
                target: LISTENER_TARGET,
                connection = %id,
                error = %error,
                "failed to clone connection stream"
            );
            return;
        }
    };
    if let Err(error) = writer.set_write_timeout(Some(timeouts.keep_alive)) {
        debug!(
            target: LISTENER_TARGET,
            connection = %id,
            error = %error,
            "failed to set write timeout"
        );
    }
    let mut reader = RequestReader::new(stream);
    loop {
        let request = match reader.read_request(timeouts) {
            Ok(Some(request)) => request,
            Ok(None) => break,
            Err(error) => {
                debug!(
                    target: LISTENER_TARGET,
                    connection = %id,
                    error = %error,
                    "closing connection after request error"
                );
                if let Some(status) = error.reply_status() {
                    let _ignored = write_response(&mut writer, &Response::empty(status), false);
                }
                break;
            }
        };

        guard.in_flight = true;
        context.events.request_started(id);
        let response = context.processor.process(&request);
        let keep_alive = request.keep_alive();
        let written = write_response(&mut writer, &response, keep_alive);
        guard.in_flight = false;
        context.events.request_finished(id);

        if let Err(error) = written {
            log_write_error(id, &error);
            break;
        }
        if !keep_alive {
            break;
        }
    }
    let _ignored = writer.flush();
    if let Err(error) = writer.shutdown(Shutdown::Both)
        && error.kind() != io::ErrorKind::NotConnected
    {
        debug!(
            target: LISTENER_TARGET,
            connection = %id,
            error = %error,
            "connection shutdown failed"
        );
    }
    drop(guard);
}

fn log_write_error(id: ConnectionId, error: &io::Error) {
    match error.kind() {
        io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset | io::ErrorKind::NotConnected => {
            debug!(
                target: LISTENER_TARGET,
                connection = %id,
                error = %error,
                "peer went away before the response was written"
            );
        }
        _ => warn!(
            target: LISTENER_TARGET,
            connection = %id,
            error = %error,
            "failed to write response"
        ),
    }
}
