use crate::{query, Version};
use std::{error, fmt, io};

/// Wire-level protocol/I-O error kinds. `spec.md` §7 asks for a single
/// best-effort `500 Internal Server Error` response with the built-in body
/// for any of these — except [`ErrorKind::MalformedRequestLine`], where
/// nothing was parsed yet and the caller must close without writing
/// anything at all ("if at least the request line was parsed").
#[derive(Debug, PartialEq)]
pub(crate) enum ErrorKind {
    /// The request line itself never matched `METHOD TARGET HTTP/x.y`
    /// (`spec.md` §4.5 transition 1's "on mismatch"). Distinct from the
    /// other variants below: per `spec.md` §7's propagation policy, this is
    /// the one case where nothing has been "parsed" yet, so the connection
    /// closes without writing any response at all.
    MalformedRequestLine,

    InvalidUrl,
    TooManyQueryParams,

    UnsupportedVersion,

    InvalidHeader,
    TooManyHeaders,
    InvalidContentLength,
    InvalidConnection,

    BodyTooLarge,
    IncompleteBody,
    MultipartNoBoundary,
    UnsupportedExpect,
    ChunkedNotSupported,

    ServiceUnavailable,
    Io(IoError),
}

impl ErrorKind {
    /// The best-effort response for this error, or `None` for
    /// [`ErrorKind::MalformedRequestLine`] (caller writes nothing and closes).
    pub(crate) fn as_http(&self, version: Version) -> Option<&'static [u8]> {
        if matches!(self, Self::MalformedRequestLine) {
            return None;
        }
        Some(match version {
            Version::Http11 => concat!(
                "HTTP/1.1 500 Internal Server Error\r\n",
                "connection: close\r\n",
                "content-length: 60\r\n",
                "content-type: text/html\r\n",
                "\r\n",
                "<html><body><h1>500 Internal Server Error</h1></body></html>",
            )
            .as_bytes(),
            Version::Http10 => concat!(
                "HTTP/1.0 500 Internal Server Error\r\n",
                "connection: close\r\n",
                "content-length: 60\r\n",
                "content-type: text/html\r\n",
                "\r\n",
                "<html><body><h1>500 Internal Server Error</h1></body></html>",
            )
            .as_bytes(),
        })
    }
}

impl error::Error for ErrorKind {}
impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl From<query::Error> for ErrorKind {
    fn from(_: query::Error) -> Self {
        ErrorKind::TooManyQueryParams
    }
}
impl From<io::Error> for ErrorKind {
    fn from(err: io::Error) -> Self {
        ErrorKind::Io(IoError(err))
    }
}

#[derive(Debug)]
pub(crate) struct IoError(pub(crate) io::Error);

impl PartialEq for IoError {
    fn eq(&self, other: &Self) -> bool {
        self.0.kind() == other.0.kind()
    }
}

/// Host-facing error type: configuration errors (`spec.md` §7d) and any
/// other failure a host can observe from a fallible public operation.
///
/// Protocol/I-O errors (`ErrorKind` above) never reach the host directly —
/// they are resolved into a best-effort response or a silent close inside
/// the connection state machine, per `spec.md` §7's propagation policy.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// `start()` was called while the server was not `Stopped`.
    #[error("server is already started")]
    AlreadyStarted,
    /// Binding the listener to the configured endpoint failed.
    #[error("failed to bind listener: {0}")]
    BindFailed(#[source] io::Error),
    /// TLS was configured but the certificate/key could not be loaded or parsed.
    #[error("invalid TLS configuration: {0}")]
    InvalidTls(String),
}
