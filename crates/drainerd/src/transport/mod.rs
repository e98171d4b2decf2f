//! TCP transport for the drain daemon.
//!
//! [`HttpListener`] binds a single endpoint, accepts connections on a
//! background thread and serves each connection on its own thread with a
//! minimal HTTP/1.1 codec. Lifecycle events flow out through
//! [`crate::server::ConnectionEvents`].

mod codec;
mod connection;
mod errors;
mod listener;
mod sockets;
#[cfg(test)]
mod test_utils;

pub use self::listener::HttpListener;
#[cfg(test)]
pub(crate) use self::test_utils::{EventLog, TransportEvent, connect, http_get, wait_until};

const LISTENER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::transport");
