use hyper::StatusCode;
use thiserror::Error;

/// Errors raised by [`WebDavClient`](crate::WebDavClient) operations.
///
/// Every variant that originates from a request carries the URL it was issued
/// against, so a failure can be diagnosed without re-running with tracing.
#[derive(Debug, Error)]
pub enum DavError {
    /// Connection, TLS or protocol failure reported by the HTTP transport.
    #[error("transport error: {0}")]
    Transport(#[from] hyper_util::client::legacy::Error),

    #[error("request to {url} timed out")]
    Timeout { url: String },

    /// The server answered outside of the 2xx range.
    #[error("unexpected response {url} ({status})")]
    Status { url: String, status: StatusCode },

    /// The body could not be read as a `multistatus` document at all.
    #[error("not a valid DAV response from {url}: {reason}")]
    MalformedResponse { url: String, reason: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("I/O error during transfer: {0}")]
    Io(#[from] std::io::Error),

    /// Reading a response body failed after the status line was accepted.
    #[error("failed reading response body from {url}: {source}")]
    Body {
        url: String,
        #[source]
        source: std::io::Error,
    },

    /// A caller-supplied continuation or body writer failed.
    #[error("callback failed: {0}")]
    Callback(#[source] anyhow::Error),
}

impl DavError {
    /// HTTP status for protocol errors.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            DavError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// URL the failing request targeted, when known.
    pub fn url(&self) -> Option<&str> {
        match self {
            DavError::Timeout { url }
            | DavError::Status { url, .. }
            | DavError::MalformedResponse { url, .. }
            | DavError::Body { url, .. } => Some(url),
            _ => None,
        }
    }

    pub(crate) fn invalid(err: impl std::fmt::Display) -> Self {
        DavError::InvalidRequest(err.to_string())
    }
}

impl From<hyper::http::Error> for DavError {
    fn from(err: hyper::http::Error) -> Self {
        DavError::invalid(err)
    }
}

impl From<hyper::http::uri::InvalidUri> for DavError {
    fn from(err: hyper::http::uri::InvalidUri) -> Self {
        DavError::invalid(err)
    }
}

impl From<hyper::http::uri::InvalidUriParts> for DavError {
    fn from(err: hyper::http::uri::InvalidUriParts) -> Self {
        DavError::invalid(err)
    }
}

impl From<hyper::http::method::InvalidMethod> for DavError {
    fn from(err: hyper::http::method::InvalidMethod) -> Self {
        DavError::invalid(err)
    }
}

impl From<hyper::header::InvalidHeaderValue> for DavError {
    fn from(err: hyper::header::InvalidHeaderValue) -> Self {
        DavError::invalid(err)
    }
}

pub type Result<T> = std::result::Result<T, DavError>;
