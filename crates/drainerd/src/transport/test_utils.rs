//! Test helpers for the transport module.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use crate::registry::ConnectionId;
use crate::server::ConnectionEvents;

/// Lifecycle events captured by [`EventLog`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TransportEvent {
    Opened(ConnectionId),
    Closed(ConnectionId),
    RequestStarted(ConnectionId),
    RequestFinished(ConnectionId),
}

#[derive(Debug, Default)]
pub(crate) struct EventLog {
    events: Mutex<Vec<TransportEvent>>,
}

impl EventLog {
    pub(crate) fn events(&self) -> Vec<TransportEvent> {
        self.events.lock().expect("event log mutex poisoned").clone()
    }

    fn record(&self, event: TransportEvent) {
        self.events
            .lock()
            .expect("event log mutex poisoned")
            .push(event);
    }

    pub(crate) fn count(&self, predicate: impl Fn(&TransportEvent) -> bool) -> usize {
        self.events().iter().filter(|event| predicate(event)).count()
    }
}

impl ConnectionEvents for EventLog {
    fn connection_opened(&self, id: ConnectionId) {
        self.record(TransportEvent::Opened(id));
    }

    fn connection_closed(&self, id: ConnectionId) {
        self.record(TransportEvent::Closed(id));
    }

    fn request_started(&self, id: ConnectionId) {
        self.record(TransportEvent::RequestStarted(id));
    }

    fn request_finished(&self, id: ConnectionId) {
        self.record(TransportEvent::RequestFinished(id));
    }
}

/// Polls `condition` until it holds or `timeout` passes.
pub(crate) fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

/// Sends `GET path` on `stream` and returns the status code and body.
pub(crate) fn http_get(stream: &mut TcpStream, path: &str) -> (u16, String) {
    write!(stream, "GET {path} HTTP/1.1\r\nHost: test\r\n\r\n").expect("write request");
    stream.flush().expect("flush request");
    let mut reader = BufReader::new(stream);
    let mut status_line = String::new();
    reader.read_line(&mut status_line).expect("read status line");
    let status = status_line
        .split(' ')
        .nth(1)
        .and_then(|code| code.parse().ok())
        .expect("status code");
    let mut content_length = 0_usize;
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).expect("read header");
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':')
            && name.eq_ignore_ascii_case("content-length")
        {
            content_length = value.trim().parse().expect("content length");
        }
    }
    let mut body = vec![0_u8; content_length];
    reader.read_exact(&mut body).expect("read body");
    (status, String::from_utf8(body).expect("utf8 body"))
}

/// Opens a client connection to `addr`.
pub(crate) fn connect(addr: SocketAddr) -> TcpStream {
    let stream = TcpStream::connect(addr).expect("connect client");
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .expect("client read timeout");
    stream
}
