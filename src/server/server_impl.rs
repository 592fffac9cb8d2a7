use crate::{
    errors::ServerError,
    http::{
        request::Request,
        response::{Handled, Response},
    },
    limits::{ConnLimits, ReqLimits, RespLimits, ServerLimits},
    server::{
        connection::{self, ConnectionConfig, ConnectionData},
        registry::Registry,
        transport::Transport,
    },
    ConnectionFilter,
};
#[cfg(feature = "tls")]
use crate::tls::TlsProvider;
use std::{
    future::Future,
    marker::PhantomData,
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};
use tokio::{io::AsyncWriteExt, net::TcpListener, task::JoinHandle};

/// How long `stop()` waits for aborted connection tasks to finish
/// deregistering themselves after `force_close_all`, on top of
/// `server_limits.shutdown_timeout` (`spec.md` §4.7: "wait for drain").
const FORCE_CLOSE_DRAIN_GRACE: std::time::Duration = std::time::Duration::from_secs(5);

/// A trait for handling HTTP requests and generating responses.
///
/// You can use:
/// - `&self` for shared immutable data (e.g. database connection pool, router configuration)
/// - `&mut S` for connection-specific mutable state (e.g. authentication tokens, session data)
///
/// # Examples
///
/// Basic request handler:
/// ```
/// use embedway::{Handler, Request, Response, Handled, StatusCode};
///
/// struct MyHandler;
///
/// impl Handler for MyHandler {
///     async fn handle(&self, _: &mut (), req: &mut Request, resp: &mut Response) -> Handled {
///         if req.url().target() == "/echo" {
///             resp.status(StatusCode::Ok).body("Echo response")
///         } else {
///             resp.status(StatusCode::NotFound).body("Not found :(")
///         }
///     }
/// }
/// ```
/// Handler with [`ConnectionData`]:
/// ```
/// use embedway::{Handler, ConnectionData, Request, Response, Handled, StatusCode};
///
/// struct CountingHandler;
///
/// impl Handler<State> for CountingHandler {
///     async fn handle(&self, data: &mut State, _req: &mut Request, resp: &mut Response) -> Handled {
///         data.request_count += 1;
///         resp.status(StatusCode::Ok)
///             .body(format!("Request #{}", data.request_count))
///     }
/// }
///
/// struct State {
///     request_count: usize,
/// }
///
/// impl ConnectionData for State {
///     fn new() -> Self {
///         Self { request_count: 0 }
///     }
///
///     fn reset(&mut self) {
///         self.request_count = 0;
///     }
/// }
/// ```
pub trait Handler<S = ()>
where
    Self: Sync + Send + 'static,
    S: ConnectionData,
{
    /// Processes an HTTP request and generates a response.
    ///
    /// # Parameters
    ///
    /// - `connection_data`: mutable reference to connection-specific state
    /// - `request`: the parsed HTTP request; mutable because reading the
    ///   opaque body or a multipart file part advances its internal stream
    /// - `response`: response builder for constructing the reply
    ///
    /// # Errors
    ///
    /// Implementations should handle errors internally and set appropriate
    /// HTTP status codes on the response. A panic here is caught and turned
    /// into a 500 for this one request; it does not take the connection down.
    fn handle(
        &self,
        connection_data: &mut S,
        request: &mut Request,
        response: &mut Response,
    ) -> impl Future<Output = Handled> + Send;
}

/// Lifecycle state of a [`Server`] (`spec.md` §4.7/§5: `Stopped` → `Starting`
/// → `Started` → `Stopping` → `Stopped`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Stopped,
    Starting,
    Started,
    Stopping,
}

/// Secondary observer slot alongside [`Handler`] (`spec.md` §6: "Subscribe:
/// `request_received(context)`, `unhandled_exception(context, error) →
/// handled`, `state_changed()`") — `request_received` is [`Handler::handle`]
/// itself (the host's required slot); this trait covers the two optional
/// ones.
///
/// Both methods default to no-ops so a host that only cares about one of
/// them doesn't have to implement the other.
pub trait ServerObserver: Sync + Send + 'static {
    /// Called when a request handler panics, with a best-effort description
    /// of the panic payload. Returning `true` marks the exception as
    /// handled for the observer's own purposes (e.g. it already reported
    /// the error elsewhere); the connection still gets the built-in 500
    /// response either way, since the handler's task is gone and there is
    /// no `Response` left to customize.
    fn unhandled_exception(&self, client_addr: SocketAddr, error: &str) -> bool {
        let _ = (client_addr, error);
        false
    }

    /// Called on every lifecycle transition (`spec.md` §4.7/§5).
    fn state_changed(&self, state: ServerState) {
        let _ = state;
    }
}

impl ServerObserver for () {}

/// An embeddable HTTP server that accepts connections and dispatches
/// requests to a [`Handler`].
///
/// Unlike the base implementation this crate was adapted from, the listener
/// is not supplied pre-bound: [`ServerBuilder::bind`] only records the
/// address, and the bind itself happens inside [`Server::start`] as part of
/// the `Starting` → `Started` transition (`spec.md` §4.7).
///
/// # Examples
///
/// ```no_run
/// use embedway::{Server, Handler, Request, Response, Handled, StatusCode};
///
/// struct MyHandler;
///
/// impl Handler for MyHandler {
///     async fn handle(&self, _: &mut (), _: &mut Request, resp: &mut Response) -> Handled {
///         resp.status(StatusCode::Ok).body("Hello world!")
///     }
/// }
///
/// #[tokio::main]
/// async fn main() {
///     let server = Server::builder()
///         .bind("127.0.0.1:8080".parse().unwrap())
///         .handler(MyHandler)
///         .build();
///     server.start().await.unwrap();
/// }
/// ```
pub struct Server<H, S = (), F = ()>
where
    H: Handler<S>,
    S: ConnectionData,
    F: ConnectionFilter,
{
    bind_addr: SocketAddr,
    handler: Arc<H>,
    filter: Arc<F>,
    observer: Arc<dyn ServerObserver>,
    server_limits: ServerLimits,
    conn_limits: ConnLimits,
    req_limits: ReqLimits,
    resp_limits: RespLimits,
    #[cfg(feature = "tls")]
    tls: Option<TlsProvider>,
    state: Arc<Mutex<ServerState>>,
    endpoint: Arc<Mutex<Option<SocketAddr>>>,
    registry: Arc<Registry>,
    accept_task: Arc<Mutex<Option<JoinHandle<()>>>>,
    timeouts: Arc<Mutex<Option<Arc<crate::io::timeout::TimeoutManager>>>>,
    stopping: Arc<AtomicBool>,
    _marker: PhantomData<S>,
}

impl<H, S> Server<H, S, ()>
where
    H: Handler<S>,
    S: ConnectionData,
{
    /// Creates a new builder for configuring the server instance.
    #[inline]
    pub fn builder() -> ServerBuilder<H, S, ()> {
        ServerBuilder {
            bind_addr: None,
            handler: None,
            connection_filter: Arc::new(()),
            observer: None,
            _marker: PhantomData,

            server_limits: None,
            request_limits: None,
            response_limits: None,
            connection_limits: None,
            #[cfg(feature = "tls")]
            tls: None,
        }
    }
}

impl<H, S, F> Server<H, S, F>
where
    H: Handler<S>,
    S: ConnectionData,
    F: ConnectionFilter,
{
    /// Current lifecycle state.
    pub fn state(&self) -> ServerState {
        *self.state.lock().unwrap()
    }

    /// The address the listener is bound to, once `start()` has completed.
    pub fn endpoint(&self) -> Option<SocketAddr> {
        *self.endpoint.lock().unwrap()
    }

    /// Whether this server was configured with a TLS provider.
    #[cfg(feature = "tls")]
    pub fn use_ssl(&self) -> bool {
        self.tls.is_some()
    }

    /// Whether this server was configured with a TLS provider. Always
    /// `false` when built without the `tls` feature.
    #[cfg(not(feature = "tls"))]
    pub fn use_ssl(&self) -> bool {
        false
    }

    /// Binds the listener and starts accepting connections.
    ///
    /// Transitions `Stopped` → `Starting` → `Started` (`spec.md` §4.7).
    /// Returns [`ServerError::AlreadyStarted`] if the server is not
    /// currently `Stopped`, or [`ServerError::BindFailed`] if the bind
    /// itself fails (the state reverts to `Stopped` in that case).
    pub async fn start(&self) -> Result<(), ServerError> {
        {
            let mut state = self.state.lock().unwrap();
            if *state != ServerState::Stopped {
                return Err(ServerError::AlreadyStarted);
            }
            *state = ServerState::Starting;
        }
        self.observer.state_changed(ServerState::Starting);

        let listener = match self.bind().await {
            Ok(listener) => listener,
            Err(error) => {
                *self.state.lock().unwrap() = ServerState::Stopped;
                self.observer.state_changed(ServerState::Stopped);
                return Err(error);
            }
        };

        let local_addr = listener.local_addr().map_err(ServerError::BindFailed)?;
        *self.endpoint.lock().unwrap() = Some(local_addr);
        self.stopping.store(false, Ordering::Release);

        let timeouts = crate::io::timeout::TimeoutManager::start(
            self.conn_limits.socket_read_timeout,
            self.conn_limits.socket_write_timeout,
        );
        *self.timeouts.lock().unwrap() = Some(timeouts.clone());
        let config = Arc::new(ConnectionConfig {
            server_limits: self.server_limits.clone(),
            conn_limits: self.conn_limits.clone(),
            req_limits: self.req_limits.clone(),
            resp_limits: self.resp_limits.clone(),
            stopping: self.stopping.clone(),
            read_timeouts: timeouts.read.clone(),
            write_timeouts: timeouts.write.clone(),
            observer: self.observer.clone(),
        });

        let handler = self.handler.clone();
        let filter = self.filter.clone();
        let registry = self.registry.clone();
        #[cfg(feature = "tls")]
        let tls_acceptor = self.tls.as_ref().map(|provider| provider.acceptor.clone());

        let accept_task = tokio::spawn(async move {
            loop {
                let (mut stream, client_addr) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(error) => {
                        tracing::warn!(?error, "accept failed");
                        continue;
                    }
                };

                let Ok(server_addr) = stream.local_addr() else {
                    continue;
                };

                let mut error_response = Response::new(&RespLimits::default());
                if filter.filter(client_addr, server_addr, &mut error_response).is_err()
                    || filter
                        .filter_async(client_addr, server_addr, &mut error_response)
                        .await
                        .is_err()
                {
                    let mut out = Vec::new();
                    error_response.write_to(&mut out, &config.server_limits.banner);
                    let _ = stream.write_all(&out).await;
                    continue;
                }

                #[cfg(feature = "tls")]
                let transport = if let Some(acceptor) = tls_acceptor.clone() {
                    match acceptor.accept(stream).await {
                        Ok(tls_stream) => Transport::Tls(Box::new(tls_stream)),
                        Err(error) => {
                            tracing::warn!(?error, "TLS handshake failed");
                            continue;
                        }
                    }
                } else {
                    Transport::Plain(stream)
                };
                #[cfg(not(feature = "tls"))]
                let transport = Transport::Plain(stream);

                let membership = registry.insert();
                let conn_id = membership.id();
                let handler = handler.clone();
                let config = config.clone();

                let task = tokio::spawn(async move {
                    connection::run(transport, client_addr, server_addr, handler, config, membership).await;
                });
                registry.attach_abort_handle(conn_id, task.abort_handle());
            }
        });

        *self.accept_task.lock().unwrap() = Some(accept_task);
        *self.state.lock().unwrap() = ServerState::Started;
        self.observer.state_changed(ServerState::Started);
        Ok(())
    }

    async fn bind(&self) -> Result<TcpListener, ServerError> {
        let socket = if self.bind_addr.is_ipv4() {
            tokio::net::TcpSocket::new_v4()
        } else {
            tokio::net::TcpSocket::new_v6()
        }
        .map_err(ServerError::BindFailed)?;

        if self.server_limits.address_reuse {
            let _ = socket.set_reuseaddr(true);
        }
        socket.bind(self.bind_addr).map_err(ServerError::BindFailed)?;
        socket.listen(1024).map_err(ServerError::BindFailed)
    }

    /// Stops accepting new connections, requests every live connection close,
    /// and waits up to `server_limits.shutdown_timeout` for them to drain.
    ///
    /// Transitions `Started` → `Stopping` → `Stopped`. A no-op if the server
    /// is already `Stopped`.
    pub async fn stop(&self) {
        {
            let mut state = self.state.lock().unwrap();
            if *state == ServerState::Stopped {
                return;
            }
            *state = ServerState::Stopping;
        }
        self.observer.state_changed(ServerState::Stopping);

        if let Some(task) = self.accept_task.lock().unwrap().take() {
            task.abort();
        }

        self.stopping.store(true, Ordering::Release);
        self.registry.request_close_all();

        if !self.registry.wait_until_empty(self.server_limits.shutdown_timeout).await {
            tracing::warn!(
                remaining = self.registry.len(),
                "shutdown timed out, force-closing remaining connections"
            );
            self.registry.force_close_all();
            if !self.registry.wait_until_empty(FORCE_CLOSE_DRAIN_GRACE).await {
                tracing::warn!(
                    remaining = self.registry.len(),
                    "connections still registered after force-close"
                );
            }
        }

        if let Some(timeouts) = self.timeouts.lock().unwrap().take() {
            timeouts.stop();
        }

        *self.endpoint.lock().unwrap() = None;
        *self.state.lock().unwrap() = ServerState::Stopped;
        self.observer.state_changed(ServerState::Stopped);
    }

    /// Stops the server if it is not already `Stopped`. Convenience for
    /// hosts that want an infallible teardown call regardless of state.
    pub async fn dispose(&self) {
        if self.state() != ServerState::Stopped {
            self.stop().await;
        }
    }
}

//

/// Builder for configuring and creating [`Server`] instances.
pub struct ServerBuilder<H, S = (), F = ()>
where
    H: Handler<S>,
    S: ConnectionData,
    F: ConnectionFilter,
{
    bind_addr: Option<SocketAddr>,
    handler: Option<Arc<H>>,
    connection_filter: Arc<F>,
    observer: Option<Arc<dyn ServerObserver>>,
    _marker: PhantomData<S>,

    server_limits: Option<ServerLimits>,
    request_limits: Option<ReqLimits>,
    response_limits: Option<RespLimits>,
    connection_limits: Option<ConnLimits>,
    #[cfg(feature = "tls")]
    tls: Option<TlsProvider>,
}

impl<H, S, F> ServerBuilder<H, S, F>
where
    H: Handler<S>,
    S: ConnectionData,
    F: ConnectionFilter,
{
    /// Sets the address the server will bind to in `start()`.
    ///
    /// **This is a required component.**
    #[inline(always)]
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = Some(addr);
        self
    }

    /// Sets the request handler that will process incoming requests.
    ///
    /// **This is a required component.**
    #[inline(always)]
    pub fn handler(mut self, handler: H) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Installs a connection filter to check incoming TCP connections
    /// before they reach the HTTP layer.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use std::{collections::HashSet, net::{SocketAddr, IpAddr}};
    /// use embedway::{ConnectionFilter, Response, Handled, StatusCode, Server, impt_default_handler};
    /// impt_default_handler!{MyHandler}
    ///
    /// struct MyConnFilter {
    ///     blacklist: HashSet<IpAddr>,
    /// }
    ///
    /// impl ConnectionFilter for MyConnFilter {
    ///     fn filter(
    ///         &self, client_addr: SocketAddr, _: SocketAddr, err_resp: &mut Response
    ///     ) -> Result<(), Handled> {
    ///         if self.blacklist.contains(&client_addr.ip()) {
    ///             Err(err_resp.status(StatusCode::Forbidden).body("banned"))
    ///         } else {
    ///             Ok(())
    ///         }
    ///     }
    /// }
    ///
    /// # #[tokio::main]
    /// # async fn main() {
    /// let server = Server::builder()
    ///     .bind("127.0.0.1:8080".parse().unwrap())
    ///     .handler(MyHandler)
    ///     .conn_filter(MyConnFilter { blacklist: HashSet::new() })
    ///     .build();
    /// # }
    /// ```
    #[inline(always)]
    pub fn conn_filter<NewF>(self, filter: NewF) -> ServerBuilder<H, S, NewF>
    where
        NewF: ConnectionFilter,
    {
        ServerBuilder {
            bind_addr: self.bind_addr,
            handler: self.handler,
            connection_filter: Arc::new(filter),
            observer: self.observer,
            _marker: self._marker,
            server_limits: self.server_limits,
            request_limits: self.request_limits,
            response_limits: self.response_limits,
            connection_limits: self.connection_limits,
            #[cfg(feature = "tls")]
            tls: self.tls,
        }
    }

    /// Installs a [`ServerObserver`] for handler-panic and lifecycle-state
    /// notifications (`spec.md` §6's `unhandled_exception`/`state_changed`
    /// subscriptions).
    #[inline(always)]
    pub fn observer<O: ServerObserver>(mut self, observer: O) -> Self {
        self.observer = Some(Arc::new(observer));
        self
    }

    /// Configures server-wide settings (banner, address reuse, shutdown grace period).
    #[inline(always)]
    pub fn server_limits(mut self, limits: ServerLimits) -> Self {
        self.server_limits = Some(limits);
        self
    }

    /// Configures per-connection timeouts and request/lifetime caps.
    #[inline(always)]
    pub fn connection_limits(mut self, limits: ConnLimits) -> Self {
        self.connection_limits = Some(limits);
        self
    }

    /// Configures request parsing limits.
    #[inline(always)]
    pub fn request_limits(mut self, limits: ReqLimits) -> Self {
        self.request_limits = Some(limits);
        self
    }

    /// Configures response buffer allocation limits.
    #[inline(always)]
    pub fn response_limits(mut self, limits: RespLimits) -> Self {
        self.response_limits = Some(limits);
        self
    }

    /// Enables TLS using a provider built from [`crate::tls::TlsProvider::from_pem`].
    #[cfg(feature = "tls")]
    #[inline(always)]
    pub fn tls(mut self, provider: TlsProvider) -> Self {
        self.tls = Some(provider);
        self
    }

    /// Finalizes the builder and constructs a [`Server`] instance.
    ///
    /// # Panics
    ///
    /// Panics if [`bind`](Self::bind) or [`handler`](Self::handler) was never called.
    #[inline]
    #[track_caller]
    pub fn build(self) -> Server<H, S, F> {
        Server {
            bind_addr: self.bind_addr.expect("The `bind` method must be called to create"),
            handler: self.handler.expect("The `handler` method must be called to create"),
            filter: self.connection_filter,
            observer: self.observer.unwrap_or_else(|| Arc::new(())),
            server_limits: self.server_limits.unwrap_or_default(),
            conn_limits: self.connection_limits.unwrap_or_default(),
            req_limits: self.request_limits.unwrap_or_default(),
            resp_limits: self.response_limits.unwrap_or_default(),
            #[cfg(feature = "tls")]
            tls: self.tls,
            state: Arc::new(Mutex::new(ServerState::Stopped)),
            endpoint: Arc::new(Mutex::new(None)),
            registry: Registry::new(),
            accept_task: Arc::new(Mutex::new(None)),
            timeouts: Arc::new(Mutex::new(None)),
            stopping: Arc::new(AtomicBool::new(false)),
            _marker: PhantomData,
        }
    }
}
