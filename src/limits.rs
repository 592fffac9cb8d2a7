//! Server configuration: grouped limits, timeouts, and TLS options.
//!
//! # Security-First Defaults
//!
//! Default limits are intentionally conservative to prevent:
//! - Resource exhaustion attacks
//! - Memory overflows
//! - Slowloris attacks
//! - Header flooding
//!
//! # Examples
//!
//! ```no_run
//! # embedway::impt_default_handler!{MyHandler}
//! use embedway::{Server, limits::{ConnLimits, ReqLimits, ServerLimits}};
//!
//! #[tokio::main]
//! async fn main() {
//!     let server = Server::builder()
//!         .bind("127.0.0.1:8080".parse().unwrap())
//!         .handler(MyHandler)
//!         .connection_limits(ConnLimits {
//!             socket_read_timeout: std::time::Duration::from_secs(5),
//!             max_requests_per_connection: 10_000,
//!             ..ConnLimits::default()
//!         })
//!         .request_limits(ReqLimits {
//!             header_count: 18,      // More headers for complex APIs
//!             body_size: 16 * 1024,  // 16KB for larger payloads
//!             ..ReqLimits::default()
//!         })
//!         .build();
//!     server.start().await.unwrap();
//! }
//! ```

use std::time::Duration;

/// Server-wide configuration: everything that is not per-connection.
#[derive(Debug, Clone)]
pub struct ServerLimits {
    /// Server banner sent in the `Server` response header and in the
    /// `100 Continue` preamble (default: `"embedway"`).
    pub banner: String,

    /// Whether to set `SO_REUSEADDR` (and `SO_REUSEPORT` where supported)
    /// on the listening socket before binding (default: `true`).
    pub address_reuse: bool,

    /// How long `stop()` waits for the connection registry to drain before
    /// force-closing every remaining connection (default: `10 seconds`).
    pub shutdown_timeout: Duration,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ServerLimits {
    fn default() -> Self {
        Self {
            banner: "embedway".to_string(),
            address_reuse: true,
            shutdown_timeout: Duration::from_secs(10),

            _priv: (),
        }
    }
}

/// Connection-level limits and timeouts.
///
/// Controls individual TCP connection behavior including read/write
/// timeouts, lifetime, and request limits. Feeds the timeout manager's two
/// FIFO queues (one read timeout, one write timeout).
#[derive(Debug, Clone)]
pub struct ConnLimits {
    /// Maximum duration to wait for reading data from socket (default: `90 seconds`).
    ///
    /// If no data is received within this time, connection is closed.
    /// This is the primary mechanism for cleaning up stalled connections.
    /// Prevents slowloris attacks and frees resources from inactive clients.
    pub socket_read_timeout: Duration,

    /// Maximum duration to wait for writing data to socket (default: `90 seconds`).
    ///
    /// If data can't be written in time, connection is terminated.
    /// Applies to individual write operations.
    pub socket_write_timeout: Duration,

    /// Maximum number of requests allowed per connection (default: `100`).
    ///
    /// Connection closes after processing this many requests, even with
    /// `Connection: keep-alive`.
    pub max_requests_per_connection: usize,

    /// Maximum lifetime of a connection from establishment to closure
    /// (default: `2 minutes`).
    ///
    /// Final safety net that guarantees no connection lives longer than this
    /// duration regardless of keep-alive reuse.
    pub connection_lifetime: Duration,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ConnLimits {
    #[inline(always)]
    fn default() -> Self {
        Self {
            socket_read_timeout: Duration::from_secs(90),
            socket_write_timeout: Duration::from_secs(90),
            connection_lifetime: Duration::from_secs(120),
            max_requests_per_connection: 100,

            _priv: (),
        }
    }
}

/// HTTP request parsing limits.
///
/// Unlike the base implementation this crate was adapted from, the read
/// buffer is growable (it doubles on demand, see [`crate::Request`]'s
/// internal reader), so these are rejection thresholds rather than a
/// fixed pre-allocation plan: exceeding one closes the connection with the
/// matching protocol error instead of silently truncating.
#[derive(Debug, Clone)]
pub struct ReqLimits {
    /// Maximum URL length in bytes, including path and query string (default: `256 B`).
    pub url_size: usize,
    /// Maximum number of path segments in the URL (default: `8`).
    pub url_parts: usize,
    /// Maximum query string length in bytes, including the leading `?` (default: `128 B`).
    pub url_query_size: usize,
    /// Maximum number of query parameters (default: `8`).
    pub url_query_parts: usize,

    /// Maximum number of headers per request (default: `16`).
    pub header_count: usize,
    /// Maximum header name length in bytes (default: `64 B`).
    pub header_name_size: usize,
    /// Maximum header value length in bytes (default: `512 B`).
    pub header_value_size: usize,

    /// Maximum request body size in bytes (default: `4 KiB`), checked
    /// against the declared `Content-Length` before any body parser runs.
    pub body_size: usize,

    /// Read buffer growth cap in bytes (`spec.md` §4.1: "doubles on demand
    /// up to a hard maximum", default: `1 MiB`). Exceeding this while still
    /// looking for a complete line/body is a protocol error.
    pub read_buffer_max: usize,

    /// Bytes of a multipart file part held in memory before spilling to a
    /// temporary file (`spec.md` §4.3, default: `64 KiB`).
    pub multipart_spill_threshold: usize,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ReqLimits {
    fn default() -> Self {
        Self {
            url_size: 256,
            url_parts: 8,
            url_query_size: 128,
            url_query_parts: 8,

            header_count: 16,
            header_name_size: 64,
            header_value_size: 512,

            body_size: 4 * 1024,
            read_buffer_max: 1024 * 1024,
            multipart_spill_threshold: 64 * 1024,

            _priv: (),
        }
    }
}

/// Response buffer allocation limits.
///
/// Based on the configured limits, response buffers are managed as follows:
/// ```rust
/// # use embedway::limits::RespLimits;
/// # let limits = RespLimits::default();
/// # let mut buffer: Vec<()> = Vec::with_capacity(limits.default_capacity);
/// #
/// if buffer.capacity() > limits.max_capacity {
///     buffer = Vec::with_capacity(limits.default_capacity);
/// } else {
///     buffer.clear();
/// }
/// ```
#[derive(Debug, Clone)]
pub struct RespLimits {
    /// Initial buffer capacity allocated for responses (default: `1024 B`).
    pub default_capacity: usize,
    /// Maximum response buffer capacity retained for reuse across keep-alive
    /// requests; larger buffers are reallocated down after use (default: `8192 B`).
    pub max_capacity: usize,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for RespLimits {
    fn default() -> Self {
        Self {
            default_capacity: 1024,
            max_capacity: 8 * 1024,

            _priv: (),
        }
    }
}

/// TLS configuration (`spec.md` §6: "allowed protocol versions are
/// configurable; client certificate requirement is configurable").
#[derive(Debug, Clone)]
pub struct TlsLimits {
    /// Require the client to present a certificate during the handshake,
    /// verified against `client_ca_pem` (default: `false`). Client identity
    /// is never surfaced to the handler, even when required — only whether
    /// the handshake succeeded.
    pub require_client_cert: bool,

    /// PEM-encoded CA certificate chain used to verify client certificates.
    /// Required when `require_client_cert` is `true`; ignored otherwise.
    pub client_ca_pem: Option<Vec<u8>>,

    /// TLS protocol versions the handshake is allowed to negotiate
    /// (default: both TLS 1.2 and TLS 1.3).
    pub allowed_versions: Vec<TlsVersion>,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for TlsLimits {
    fn default() -> Self {
        Self {
            require_client_cert: false,
            client_ca_pem: None,
            allowed_versions: vec![TlsVersion::Tls12, TlsVersion::Tls13],
            _priv: (),
        }
    }
}

/// A TLS protocol version `TlsLimits::allowed_versions` can restrict the
/// handshake to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TlsVersion {
    /// TLS 1.2 — [RFC 5246](https://datatracker.ietf.org/doc/html/rfc5246).
    Tls12,
    /// TLS 1.3 — [RFC 8446](https://datatracker.ietf.org/doc/html/rfc8446).
    Tls13,
}
