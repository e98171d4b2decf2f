//! Minimal HTTP/1.1 framing: reads request heads and bodies off a stream and
//! writes responses with explicit lengths.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::str;
use std::time::{Duration, Instant};

use crate::server::{ConnectionTimeouts, HttpVersion, Request, Response, reason_phrase};

use super::errors::RequestError;

pub(crate) const MAX_HEAD_BYTES: usize = 64 * 1024;
pub(crate) const MAX_BODY_BYTES: usize = 1024 * 1024;
const READ_CHUNK: usize = 4096;
const MIN_READ_TIMEOUT: Duration = Duration::from_millis(1);

/// Streams whose blocking reads can be bounded.
pub(crate) trait TimeoutRead: Read {
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()>;
}

impl TimeoutRead for TcpStream {
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        Self::set_read_timeout(self, timeout)
    }
}

/// Buffered request reader for one connection.
pub(crate) struct RequestReader<S> {
    stream: S,
    buffer: Vec<u8>,
}

impl<S: TimeoutRead> RequestReader<S> {
    pub(crate) const fn new(stream: S) -> Self {
        Self {
            stream,
            buffer: Vec::new(),
        }
    }

    /// Reads the next request. `Ok(None)` means the peer closed the
    /// connection, or it stayed idle past the keep-alive timeout, between
    /// requests.
    pub(crate) fn read_request(
        &mut self,
        timeouts: ConnectionTimeouts,
    ) -> Result<Option<Request>, RequestError> {
        let Some(head_end) = self.fill_head(timeouts)? else {
            return Ok(None);
        };
        let head: Vec<u8> = self.buffer.drain(..head_end + 4).collect();
        let head_text = head.get(..head_end).unwrap_or_default();
        let (mut request, content_length) = parse_head(head_text)?;
        if content_length > MAX_BODY_BYTES {
            return Err(RequestError::BodyTooLarge {
                limit: MAX_BODY_BYTES,
            });
        }
        self.fill_body(content_length, timeouts)?;
        request.body = self.buffer.drain(..content_length).collect();
        Ok(Some(request))
    }

    fn fill_head(&mut self, timeouts: ConnectionTimeouts) -> Result<Option<usize>, RequestError> {
        strip_leading_blank_lines(&mut self.buffer);
        let mut header_deadline = (!self.buffer.is_empty()).then(|| Instant::now() + timeouts.header);
        loop {
            if let Some(end) = find_header_end(&self.buffer) {
                return Ok(Some(end));
            }
            if self.buffer.len() > MAX_HEAD_BYTES {
                return Err(RequestError::HeadTooLarge {
                    limit: MAX_HEAD_BYTES,
                });
            }
            let wait = match header_deadline {
                None => timeouts.keep_alive,
                Some(deadline) => deadline
                    .checked_duration_since(Instant::now())
                    .ok_or(RequestError::HeaderTimeout)?,
            };
            match self.read_chunk(wait) {
                Ok(0) if self.buffer.is_empty() => return Ok(None),
                Ok(0) => return Err(RequestError::UnexpectedEof),
                Ok(_) => {
                    strip_leading_blank_lines(&mut self.buffer);
                    if !self.buffer.is_empty() && header_deadline.is_none() {
                        header_deadline = Some(Instant::now() + timeouts.header);
                    }
                }
                Err(error) if is_timeout(&error) => {
                    return if header_deadline.is_none() {
                        Ok(None)
                    } else {
                        Err(RequestError::HeaderTimeout)
                    };
                }
                Err(error) => return Err(error.into()),
            }
        }
    }

    fn fill_body(
        &mut self,
        content_length: usize,
        timeouts: ConnectionTimeouts,
    ) -> Result<(), RequestError> {
        while self.buffer.len() < content_length {
            if self.read_chunk(timeouts.keep_alive)? == 0 {
                return Err(RequestError::UnexpectedEof);
            }
        }
        Ok(())
    }

    fn read_chunk(&mut self, wait: Duration) -> io::Result<usize> {
        self.stream
            .set_read_timeout(Some(wait.max(MIN_READ_TIMEOUT)))?;
        let mut chunk = [0_u8; READ_CHUNK];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(read) => {
                    self.buffer
                        .extend_from_slice(chunk.get(..read).unwrap_or_default());
                    return Ok(read);
                }
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(error) => return Err(error),
            }
        }
    }
}

fn is_timeout(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

fn strip_leading_blank_lines(buffer: &mut Vec<u8>) {
    let leading = buffer
        .iter()
        .take_while(|byte| matches!(byte, b'\r' | b'\n'))
        .count();
    buffer.drain(..leading);
}

fn find_header_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(4).position(|window| window == b"\r\n\r\n")
}

fn parse_head(head: &[u8]) -> Result<(Request, usize), RequestError> {
    let text = str::from_utf8(head).map_err(|_| RequestError::InvalidHeader)?;
    let mut lines = text.split("\r\n");
    let request_line = lines.next().ok_or(RequestError::InvalidRequestLine)?;
    let mut request = parse_request_line(request_line)?;
    let mut content_length = None::<usize>;
    for line in lines {
        let (name, value) = line.split_once(':').ok_or(RequestError::InvalidHeader)?;
        if name.is_empty() || name.bytes().any(|byte| byte.is_ascii_whitespace()) {
            return Err(RequestError::InvalidHeader);
        }
        let value = value.trim();
        if name.eq_ignore_ascii_case("transfer-encoding") && !value.eq_ignore_ascii_case("identity")
        {
            return Err(RequestError::UnsupportedTransferEncoding);
        }
        if name.eq_ignore_ascii_case("content-length") {
            let parsed: usize = value
                .parse()
                .map_err(|_| RequestError::InvalidContentLength)?;
            if content_length.is_some_and(|existing| existing != parsed) {
                return Err(RequestError::InvalidContentLength);
            }
            content_length = Some(parsed);
        }
        request.headers.push((name.to_owned(), value.to_owned()));
    }
    Ok((request, content_length.unwrap_or(0)))
}

fn parse_request_line(line: &str) -> Result<Request, RequestError> {
    let mut parts = line.split(' ');
    let (Some(method), Some(target), Some(version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(RequestError::InvalidRequestLine);
    };
    if method.is_empty() || !method.bytes().all(|byte| byte.is_ascii_uppercase()) {
        return Err(RequestError::InvalidRequestLine);
    }
    if target.is_empty() {
        return Err(RequestError::InvalidRequestLine);
    }
    let version = match version {
        "HTTP/1.1" => HttpVersion::Http11,
        "HTTP/1.0" => HttpVersion::Http10,
        other => return Err(RequestError::UnsupportedVersion(other.to_owned())),
    };
    let (path, query) = match target.split_once('?') {
        Some((path, query)) => (path, Some(query.to_owned())),
        None => (target, None),
    };
    let mut request = Request::new(method, path);
    request.query = query;
    request.version = version;
    Ok(request)
}

/// Writes `response` with an explicit length and connection disposition.
pub(crate) fn write_response<W: Write>(
    writer: &mut W,
    response: &Response,
    keep_alive: bool,
) -> io::Result<()> {
    let mut head = format!(
        "HTTP/1.1 {} {}\r\n",
        response.status,
        reason_phrase(response.status)
    );
    for (name, value) in &response.headers {
        if name.eq_ignore_ascii_case("content-length") || name.eq_ignore_ascii_case("connection") {
            continue;
        }
        head.push_str(name);
        head.push_str(": ");
        head.push_str(value);
        head.push_str("\r\n");
    }
    head.push_str(&format!("Content-Length: {}\r\n", response.body.len()));
    head.push_str(if keep_alive {
        "Connection: keep-alive\r\n\r\n"
    } else {
        "Connection: close\r\n\r\n"
    });
    writer.write_all(head.as_bytes())?;
    writer.write_all(&response.body)?;
    writer.flush()
}
