//! Error types for listening-server operations.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;

/// Errors surfaced while binding, running or closing a listening server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Resolving the configured host failed.
    #[error("failed to resolve TCP address {host}:{port}: {source}")]
    Resolve {
        /// Configured host.
        host: String,
        /// Configured port.
        port: u16,
        /// Underlying resolver error.
        #[source]
        source: io::Error,
    },
    /// The configured host resolved to nothing.
    #[error("no TCP addresses resolved for {host}:{port}")]
    ResolveEmpty {
        /// Configured host.
        host: String,
        /// Configured port.
        port: u16,
    },
    /// Binding the listening socket failed.
    #[error("failed to bind TCP listener at {addr}: {source}")]
    Bind {
        /// Address that could not be bound.
        addr: SocketAddr,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Switching the listener to non-blocking mode failed.
    #[error("failed to enable non-blocking listener: {source}")]
    NonBlocking {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// `listen` was called on a server that already started.
    #[error("server is already listening")]
    AlreadyListening,
    /// `close` was called on a server that is no longer running.
    #[error("server is not running")]
    NotRunning,
    /// The accept thread panicked.
    #[error("listener thread panicked")]
    ThreadPanic,
    /// The drain sequence finished but the final close failed.
    #[error("graceful shutdown failed: {source}")]
    Shutdown {
        /// Error reported by the wrapped server's close.
        #[source]
        source: Arc<ServerError>,
    },
}
