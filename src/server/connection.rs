//! Per-connection state machine (`spec.md` §4.5): drives
//! read → parse → dispatch → write, and the keep-alive reset between
//! requests.

use crate::{
    errors::ErrorKind,
    http::{
        body::{self, ParsedBody},
        request::Request,
        response::Response,
        types::{StatusCode, Version},
    },
    io::{
        readbuf::ReadBuffer,
        timeout::{IoHandle, TimeoutQueue},
    },
    limits::{ConnLimits, ReqLimits, RespLimits, ServerLimits},
    server::{
        registry::RegisteredConnection,
        server_impl::{Handler, ServerObserver},
        transport::Transport,
    },
};
use std::{
    future::Future,
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Instant, SystemTime},
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Per-request HTML body for an unrecoverable handler/protocol failure
/// (`spec.md` §7: "a 500 ... with the built-in HTML body").
const BUILTIN_500_BODY: &str =
    "<html><body><h1>500 Internal Server Error</h1></body></html>";

/// Configuration shared by every connection spawned off one [`Server`](crate::Server).
pub(crate) struct ConnectionConfig {
    pub(crate) server_limits: ServerLimits,
    pub(crate) conn_limits: ConnLimits,
    pub(crate) req_limits: ReqLimits,
    pub(crate) resp_limits: RespLimits,
    /// Set once the server transitions to `Stopping`; a connection that
    /// observes this after finishing a response does not loop for another
    /// keep-alive request (`spec.md` §4.5 transition 6's "server's state is
    /// `Started`" clause).
    pub(crate) stopping: Arc<AtomicBool>,
    pub(crate) read_timeouts: Arc<TimeoutQueue>,
    pub(crate) write_timeouts: Arc<TimeoutQueue>,
    pub(crate) observer: Arc<dyn ServerObserver>,
}

/// Drives one connection end to end: parses requests, dispatches them to
/// `handler`, writes responses, and loops on keep-alive until the peer
/// closes, a limit is hit, or shutdown requests it.
pub(crate) async fn run<H, S>(
    mut transport: Transport,
    client_addr: SocketAddr,
    local_addr: SocketAddr,
    handler: Arc<H>,
    config: Arc<ConnectionConfig>,
    membership: RegisteredConnection,
) where
    H: Handler<S>,
    S: ConnectionData,
{
    let is_tls = transport.is_tls();
    let local_host = local_addr.ip().to_string();
    let local_port = local_addr.port();

    let mut data = S::new();
    let mut buffer = ReadBuffer::new(512, config.req_limits.read_buffer_max);
    let created = Instant::now();
    let mut request_count = 0usize;

    loop {
        if request_count >= config.conn_limits.max_requests_per_connection
            || created.elapsed() > config.conn_limits.connection_lifetime
        {
            tracing::debug!(?client_addr, "connection limit reached, closing");
            break;
        }

        // Shutdown is only allowed to race a connection while it sits in
        // `ReadingProlog` (`spec.md` §4.7): once the first byte of a new
        // request has arrived, the request runs to completion even through
        // `stop()` — only connections still waiting for one are torn down.
        let prolog = tokio::select! {
            biased;
            () = membership.closed() => {
                tracing::debug!(?client_addr, "shutdown requested, closing idle connection");
                break;
            }
            outcome = timed(&config.read_timeouts, Request::read_prolog_line(&mut transport, &mut buffer)) => outcome,
        };

        let prolog = match prolog {
            Ok(Some(line)) => line,
            Ok(None) => break, // peer closed before sending another request
            Err(error) => {
                tracing::warn!(?client_addr, ?error, "closing connection after protocol/IO error");
                if let Some(bytes) = error.as_http(Version::Http11) {
                    let _ = write_bytes(&mut transport, &config.write_timeouts, bytes).await;
                }
                break;
            }
        };

        let outcome = timed(&config.read_timeouts, finish_request(
            &mut transport, &mut buffer, &prolog, &config, &local_host, local_port, is_tls, &handler, &mut data, client_addr,
        )).await;

        let (request, mut response) = match outcome {
            Ok(pair) => pair,
            Err(error) => {
                tracing::warn!(?client_addr, ?error, "closing connection after protocol/IO error");
                // `spec.md` §7: a best-effort response is only attempted if at
                // least the request line was parsed; `as_http` returns `None`
                // for `MalformedRequestLine`, where it wasn't.
                if let Some(bytes) = error.as_http(Version::Http11) {
                    let _ = write_bytes(&mut transport, &config.write_timeouts, bytes).await;
                }
                break;
            }
        };

        let keep_alive = response.keep_alive
            && wants_keep_alive(&request)
            && !config.stopping.load(Ordering::Acquire);
        response.keep_alive = keep_alive;
        response.version = request.version();

        let mut out = Vec::with_capacity(config.resp_limits.default_capacity);
        response.write_to(&mut out, &config.server_limits.banner);

        if let Err(error) = timed(&config.write_timeouts, write_all(&mut transport, &out)).await {
            tracing::warn!(?client_addr, ?error, "write failed, closing connection");
            break;
        }

        if !keep_alive {
            break;
        }

        request_count += 1;
        buffer.reset();
    }

    let _ = transport.shutdown().await;
}

/// Finishes a request whose prolog line has already been read (handling
/// `Expect: 100-continue` and the body), and dispatches it to `handler`.
/// Not raced against shutdown: once a prolog line has arrived, the
/// connection has left `ReadingProlog` and the request is allowed to finish
/// (`spec.md` §4.7).
#[allow(clippy::too_many_arguments)]
async fn finish_request<H, S>(
    transport: &mut Transport,
    buffer: &mut ReadBuffer,
    prolog: &str,
    config: &ConnectionConfig,
    local_host: &str,
    local_port: u16,
    is_tls: bool,
    handler: &Arc<H>,
    data: &mut S,
    client_addr: SocketAddr,
) -> Result<(Request, Response), ErrorKind>
where
    H: Handler<S>,
    S: ConnectionData,
{
    let mut request =
        Request::parse_from_prolog(prolog, transport, buffer, &config.req_limits, local_host, local_port, is_tls)
            .await?;

    if let Some(expect) = request.header("expect") {
        if !expect.eq_ignore_ascii_case("100-continue") {
            return Err(ErrorKind::UnsupportedExpect);
        }
        let preamble = format!(
            "{} 100 Continue\r\nServer: {}\r\nDate: {}\r\n\r\n",
            request.version().as_str(),
            config.server_limits.banner,
            httpdate::fmt_http_date(SystemTime::now()),
        );
        write_all(transport, preamble.as_bytes()).await?;
    }

    if let Some(len) = request.content_length() {
        let content_type = request.header("content-type").map(str::to_string);
        match body::parse_body(transport, buffer, len, content_type.as_deref(), &config.req_limits).await? {
            ParsedBody::Opaque(stream) => request.set_opaque_body(stream),
            ParsedBody::UrlEncoded(params) => request.set_url_encoded(params),
            ParsedBody::Multipart(items) => request.set_multipart(items),
        }
    }

    Ok(dispatch(handler, data, request, &config.observer, client_addr).await)
}

/// Runs the handler on a spawned task so a panicking handler is isolated to
/// a 500 response instead of taking the whole connection task down with it
/// (`spec.md` §7c/§4.5 transition 4: "Handler exceptions ... if unhandled,
/// produce a 500 response"). A panic is also offered to the
/// [`ServerObserver`]'s `unhandled_exception` slot (`spec.md` §6).
async fn dispatch<H, S>(
    handler: &Arc<H>,
    data: &mut S,
    request: Request,
    observer: &Arc<dyn ServerObserver>,
    client_addr: SocketAddr,
) -> (Request, Response)
where
    H: Handler<S>,
    S: ConnectionData,
{
    let handler = handler.clone();
    let mut owned_data = std::mem::replace(data, S::new());
    let resp_limits = RespLimits::default();
    let mut response = Response::new(&resp_limits);
    let mut request = request;

    let task = tokio::spawn(async move {
        let _handled = handler.handle(&mut owned_data, &mut request, &mut response).await;
        (owned_data, request, response)
    });

    match task.await {
        Ok((returned_data, request, response)) => {
            *data = returned_data;
            (request, response)
        }
        Err(join_error) => {
            let panicked = join_error.is_panic();
            let message = panic_message(join_error);
            let handled = observer.unhandled_exception(client_addr, &message);
            tracing::error!(panicked, handled, "request handler task failed");
            // The request is gone with the panicked task; synthesize a
            // minimal stand-in purely to report the 500 over the wire.
            let request = Request::new(&ReqLimits::default());
            let mut response = Response::new(&RespLimits::default());
            response.status(StatusCode::InternalServerError).body(BUILTIN_500_BODY);
            (request, response)
        }
    }
}

/// Best-effort description of a handler task's failure, for the
/// `unhandled_exception` observer and logging. `JoinError::into_panic`
/// consumes the error and panics itself if the task was cancelled rather
/// than panicking, so cancellation gets a fixed message instead.
fn panic_message(join_error: tokio::task::JoinError) -> String {
    if !join_error.is_panic() {
        return "handler task cancelled".to_string();
    }
    let payload = join_error.into_panic();
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked with a non-string payload".to_string()
    }
}

/// `spec.md` §4.5 transition 6: persistence is decided purely by a
/// case-insensitive equality check against the request's `Connection`
/// header — no header present means the connection closes, even on
/// HTTP/1.1, rather than falling back to the version's usual default.
fn wants_keep_alive(request: &Request) -> bool {
    request.header("connection").is_some_and(|value| value.eq_ignore_ascii_case("keep-alive"))
}

async fn write_all(transport: &mut Transport, bytes: &[u8]) -> Result<(), ErrorKind> {
    transport.write_all(bytes).await?;
    Ok(())
}

async fn write_bytes(transport: &mut Transport, queue: &TimeoutQueue, bytes: &[u8]) -> Result<(), ErrorKind> {
    timed(queue, write_all(transport, bytes)).await
}

/// Races `fut` against the queue's timeout, registering an [`IoHandle`] so
/// the sweeper can dispose this connection if `fut` never completes
/// (`spec.md` §4.6).
async fn timed<F, T>(queue: &TimeoutQueue, fut: F) -> Result<T, ErrorKind>
where
    F: Future<Output = Result<T, ErrorKind>>,
{
    let handle = queue.register();
    tokio::select! {
        biased;
        result = fut => {
            handle.complete();
            result
        }
        () = wait_disposed(&handle) => {
            Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "I/O timed out").into())
        }
    }
}

async fn wait_disposed(handle: &IoHandle) {
    handle.disposed().await;
}

//

/// Managing user session data stored between requests within a single HTTP connection.
///
/// This trait allows you to store arbitrary state (e.g., authentication data,
/// multistep form status, cache, etc.). The state is available across all requests
/// within a single HTTP keep-alive connection.
///
/// # Examples
/// ```no_run
/// use embedway::ConnectionData;
/// use std::collections::HashMap;
///
/// struct MyConnectionData {
///     user_id: Option<i32>,
///     request_count: usize,
///     cache: HashMap<usize, [u8; 4]>,
/// }
///
/// impl ConnectionData for MyConnectionData {
///     fn new() -> Self {
///         Self {
///             user_id: None,
///             request_count: 0,
///             cache: HashMap::new(),
///         }
///     }
///
///     fn reset(&mut self) {
///         self.user_id = None;
///         self.request_count = 0;
///         self.cache.clear();
///     }
/// }
/// ```
pub trait ConnectionData: Sync + Send + 'static {
    /// Creates a new instance of user data.
    fn new() -> Self;

    /// Resets the internal state of the instance to its initial values.
    fn reset(&mut self);
}

impl ConnectionData for () {
    #[inline(always)]
    fn new() -> Self {}

    #[inline(always)]
    fn reset(&mut self) {}
}

/// A trait for filtering TCP connections before HTTP processing.
///
/// # Examples
///
/// Simple IP Blacklist:
/// ```
/// use std::{collections::HashSet, net::{SocketAddr, IpAddr}};
/// use embedway::{ConnectionFilter, Response, Handled, StatusCode};
///
/// struct MyConnFilter {
///     blacklist: HashSet<IpAddr>
/// }
///
/// impl ConnectionFilter for MyConnFilter {
///     fn filter(
///         &self, client_addr: SocketAddr, _: SocketAddr, err_resp: &mut Response
///     ) -> Result<(), Handled> {
///         if self.blacklist.contains(&client_addr.ip()) {
///             Err(err_resp
///                 .status(StatusCode::Forbidden)
///                 .body("Your IP is permanently banned"))
///         } else {
///             Ok(())
///         }
///     }
/// }
/// ```
pub trait ConnectionFilter: Sync + Send + 'static {
    /// Synchronous connection validation.
    ///
    /// Perform fast, in-memory checks here. Expensive operations should be
    /// deferred to [`filter_async`](Self::filter_async).
    fn filter(
        &self,
        client_addr: SocketAddr,
        server_addr: SocketAddr,
        error_response: &mut Response,
    ) -> Result<(), crate::Handled>;

    /// Asynchronous connection inspection, called after [`filter`](Self::filter) succeeds.
    fn filter_async(
        &self,
        #[allow(unused_variables)] client_addr: SocketAddr,
        #[allow(unused_variables)] server_addr: SocketAddr,
        #[allow(unused_variables)] error_response: &mut Response,
    ) -> impl Future<Output = Result<(), crate::Handled>> + Send {
        async { Ok(()) }
    }
}

impl ConnectionFilter for () {
    fn filter(&self, _: SocketAddr, _: SocketAddr, _: &mut Response) -> Result<(), crate::Handled> {
        Ok(())
    }
}
