//! Capability interface of a listening server.
//!
//! [`ListeningServer`] is the seam between the drain machinery and the code
//! that owns real sockets. The concrete TCP implementation lives in
//! [`crate::transport`]; [`crate::LifecycleServer`] decorates any
//! implementation with readiness and drain behaviour.

mod errors;
mod message;

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use drainer_config::Config;

use crate::registry::ConnectionId;

pub use errors::ServerError;
pub use message::{HttpVersion, Request, Response, reason_phrase};

/// Per-connection socket timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionTimeouts {
    /// How long an idle connection may wait for its next request.
    pub keep_alive: Duration,
    /// How long a client may take to send a complete request head.
    pub header: Duration,
}

impl ConnectionTimeouts {
    /// Reads the timeouts from configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            keep_alive: config.keep_alive_timeout(),
            header: config.header_timeout(),
        }
    }
}

impl Default for ConnectionTimeouts {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Observer for connection and request lifecycle events.
///
/// Called from connection threads; implementations must tolerate concurrent
/// calls for different connections.
pub trait ConnectionEvents: Send + Sync {
    /// A connection was accepted.
    fn connection_opened(&self, id: ConnectionId);

    /// A connection closed, for whatever reason.
    fn connection_closed(&self, id: ConnectionId);

    /// A complete request head arrived on `id`.
    fn request_started(&self, id: ConnectionId);

    /// The response to the current request on `id` finished (or failed).
    fn request_finished(&self, id: ConnectionId);
}

/// Application logic served behind the listener.
pub trait RequestProcessor: Send + Sync {
    /// Produces the response for `request`.
    fn process(&self, request: &Request) -> Response;
}

impl<F> RequestProcessor for F
where
    F: Fn(&Request) -> Response + Send + Sync,
{
    fn process(&self, request: &Request) -> Response {
        self(request)
    }
}

/// Start/stop control surface of a listening server.
pub trait ListeningServer: Send + Sync {
    /// Timeouts applied to connections accepted from now on.
    fn configure_timeouts(&self, timeouts: ConnectionTimeouts);

    /// Starts accepting connections, reporting lifecycle events to `events`
    /// and handing requests to `processor`.
    fn listen(
        &self,
        events: Arc<dyn ConnectionEvents>,
        processor: Arc<dyn RequestProcessor>,
    ) -> Result<(), ServerError>;

    /// Stops accepting new connections. Open connections are unaffected.
    fn stop_accepting(&self);

    /// Forcibly closes the socket of connection `id`.
    fn terminate_connection(&self, id: ConnectionId) -> io::Result<()>;

    /// Final close: releases the listener and its accept thread.
    fn close(&self) -> Result<(), ServerError>;

    /// Bound address, when known.
    fn local_addr(&self) -> Option<SocketAddr>;
}

impl<T> ListeningServer for Arc<T>
where
    T: ListeningServer + ?Sized,
{
    fn configure_timeouts(&self, timeouts: ConnectionTimeouts) {
        (**self).configure_timeouts(timeouts);
    }

    fn listen(
        &self,
        events: Arc<dyn ConnectionEvents>,
        processor: Arc<dyn RequestProcessor>,
    ) -> Result<(), ServerError> {
        (**self).listen(events, processor)
    }

    fn stop_accepting(&self) {
        (**self).stop_accepting();
    }

    fn terminate_connection(&self, id: ConnectionId) -> io::Result<()> {
        (**self).terminate_connection(id)
    }

    fn close(&self) -> Result<(), ServerError> {
        (**self).close()
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        (**self).local_addr()
    }
}
