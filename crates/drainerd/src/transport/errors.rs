//! Error types for reading requests off a connection.

use std::io;

use thiserror::Error;

/// Errors raised while reading or parsing a request.
#[derive(Debug, Error)]
pub(crate) enum RequestError {
    #[error("socket read failed: {0}")]
    Io(#[from] io::Error),
    #[error("request head not received within the header timeout")]
    HeaderTimeout,
    #[error("connection closed mid-request")]
    UnexpectedEof,
    #[error("malformed request line")]
    InvalidRequestLine,
    #[error("malformed header line")]
    InvalidHeader,
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(String),
    #[error("invalid content-length")]
    InvalidContentLength,
    #[error("transfer-encoding is not supported")]
    UnsupportedTransferEncoding,
    #[error("request head exceeds {limit} bytes")]
    HeadTooLarge { limit: usize },
    #[error("request body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },
}

impl RequestError {
    /// Status code to send back before closing, when a reply still makes
    /// sense.
    pub(crate) const fn reply_status(&self) -> Option<u16> {
        match self {
            Self::Io(_) | Self::UnexpectedEof => None,
            Self::HeaderTimeout => Some(408),
            Self::InvalidRequestLine | Self::InvalidHeader | Self::InvalidContentLength => {
                Some(400)
            }
            Self::UnsupportedVersion(_) | Self::UnsupportedTransferEncoding => Some(501),
            Self::HeadTooLarge { .. } => Some(431),
            Self::BodyTooLarge { .. } => Some(413),
        }
    }
}
