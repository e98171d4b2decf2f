//! Request and response values exchanged with the application.

use std::fmt;

/// HTTP protocol version of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpVersion {
    /// HTTP/1.0: connections close unless keep-alive is requested.
    Http10,
    /// HTTP/1.1: connections persist unless close is requested.
    Http11,
}

impl fmt::Display for HttpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http10 => f.write_str("HTTP/1.0"),
            Self::Http11 => f.write_str("HTTP/1.1"),
        }
    }
}

/// A parsed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Request method, as sent.
    pub method: String,
    /// Request target without the query string.
    pub path: String,
    /// Raw query string, if any.
    pub query: Option<String>,
    /// Protocol version.
    pub version: HttpVersion,
    /// Header fields in arrival order.
    pub headers: Vec<(String, String)>,
    /// Request body.
    pub body: Vec<u8>,
}

impl Request {
    /// Builds a body-less request; mostly useful in tests.
    #[must_use]
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            query: None,
            version: HttpVersion::Http11,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// First value of the header `name`, compared case-insensitively.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Whether the client expects the connection to stay open afterwards.
    #[must_use]
    pub fn keep_alive(&self) -> bool {
        let tokens = self.header("connection").map(|value| {
            value
                .split(',')
                .map(|token| token.trim().to_ascii_lowercase())
                .collect::<Vec<_>>()
        });
        let has = |wanted: &str| {
            tokens
                .as_ref()
                .is_some_and(|list| list.iter().any(|token| token == wanted))
        };
        match self.version {
            HttpVersion::Http11 => !has("close"),
            HttpVersion::Http10 => has("keep-alive"),
        }
    }
}

/// A response produced by the application or the readiness probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Status code.
    pub status: u16,
    /// Extra header fields. `Content-Length` and `Connection` are added by
    /// the transport.
    pub headers: Vec<(String, String)>,
    /// Response body.
    pub body: Vec<u8>,
}

impl Response {
    /// Empty-bodied response with `status`.
    #[must_use]
    pub const fn empty(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Plain-text response.
    #[must_use]
    pub fn text(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: vec![(
                "Content-Type".to_owned(),
                "text/plain; charset=utf-8".to_owned(),
            )],
            body: body.into().into_bytes(),
        }
    }

    /// Adds a header field.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Canonical reason phrase for the status codes this service emits.
#[must_use]
pub const fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        204 => "No Content",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        413 => "Payload Too Large",
        431 => "Request Header Fields Too Large",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        503 => "Service Unavailable",
        _ => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn request(version: HttpVersion, connection: Option<&str>) -> Request {
        let mut request = Request::new("GET", "/");
        request.version = version;
        if let Some(value) = connection {
            request.headers.push(("Connection".to_owned(), value.to_owned()));
        }
        request
    }

    #[rstest]
    #[case(HttpVersion::Http11, None, true)]
    #[case(HttpVersion::Http11, Some("close"), false)]
    #[case(HttpVersion::Http11, Some("Upgrade, Close"), false)]
    #[case(HttpVersion::Http10, None, false)]
    #[case(HttpVersion::Http10, Some("Keep-Alive"), true)]
    fn keep_alive_follows_version_defaults(
        #[case] version: HttpVersion,
        #[case] connection: Option<&str>,
        #[case] expected: bool,
    ) {
        assert_eq!(request(version, connection).keep_alive(), expected);
    }

    #[rstest]
    fn header_lookup_ignores_case() {
        let mut request = Request::new("GET", "/");
        request.headers.push(("X-Trace".to_owned(), "abc".to_owned()));
        assert_eq!(request.header("x-trace"), Some("abc"));
        assert_eq!(request.header("x-missing"), None);
    }
}
