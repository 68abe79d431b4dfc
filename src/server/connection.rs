use crate::{
    errors::ErrorKind,
    http::{
        request::{Parser, Request},
        response::Response,
        types::Version,
    },
    limits::{ConnLimits, ReqLimits, RespLimits, ServerLimits},
    server::server_impl::{AllLimits, Handler},
    Handled,
};
use std::{
    io::{self, Write},
    net::{SocketAddr, TcpStream},
    sync::Arc,
    time::Instant,
};

pub(crate) struct HttpConnection<H: Handler<S>, S: ConnectionData> {
    handler: Arc<H>,
    connection_data: S,

    connection: Connection,
    pub(crate) parser: Parser,
    pub(crate) request: Request,
    pub(crate) response: Response,
    /// Set once `Transfer-Encoding: chunked` is seen on the request in
    /// progress; consulted by the body-framing decision in
    /// [`crate::http::request`].
    pub(crate) chunked: bool,
    /// Set once a `Host` header is seen on the request in progress; an
    /// HTTP/1.1 request that reaches the end of its header block with this
    /// still `false` is rejected (see `body_start_state`).
    pub(crate) host_seen: bool,

    pub(crate) server_limits: ServerLimits,
    pub(crate) conn_limits: ConnLimits,
    pub(crate) req_limits: ReqLimits,
    pub(crate) resp_limits: RespLimits,
}

impl<H: Handler<S>, S: ConnectionData> HttpConnection<H, S> {
    #[inline]
    pub(crate) fn new(handler: Arc<H>, limits: AllLimits) -> Self {
        Self {
            handler,
            connection_data: S::new(),

            connection: Connection::new(),
            parser: Parser::new(&limits.2),
            request: Request::new(&limits.2),
            response: Response::new(&limits.3),
            chunked: false,
            host_seen: false,

            server_limits: limits.0,
            conn_limits: limits.1,
            req_limits: limits.2,
            resp_limits: limits.3,
        }
    }

    /// Resets per-request parsing/response state ahead of the next request
    /// on this connection. Threaded mode calls this from `impl_run`'s loop;
    /// the event-loop engine calls it directly between pipelined requests.
    #[inline]
    pub(crate) fn reset_request_response(&mut self) {
        self.parser.reset();
        self.request.reset();
        self.response.reset(&self.resp_limits);
        self.chunked = false;
        self.host_seen = false;
    }

    /// Runs the handler chain against the currently parsed request, writing
    /// into `self.response`. Split out of `impl_run` so the event-loop
    /// engine can dispatch without going through blocking I/O.
    #[inline]
    pub(crate) fn dispatch(&mut self) {
        self.handler.handle(&mut self.connection_data, &mut self.request, &mut self.response);
    }
}

impl<H: Handler<S>, S: ConnectionData> HttpConnection<H, S> {
    /// Drives the full request/response/keep-alive cycle for one accepted
    /// socket, blocking on reads and writes. Used by threaded-mode workers;
    /// event-loop mode drives the same parser/dispatch/serialize pipeline
    /// itself, one readiness event at a time, instead of calling this.
    #[inline]
    pub(crate) fn run(
        &mut self,
        stream: &mut TcpStream,
        client_addr: SocketAddr,
        server_addr: SocketAddr,
    ) -> Result<(), io::Error> {
        self.request.client_addr = client_addr;
        self.request.server_addr = server_addr;

        match self.impl_run(stream) {
            Ok(()) => Ok(()),
            Err(ErrorKind::Io(e)) => Err(e.0),
            Err(error) => {
                log::debug!("connection from {client_addr}: {error}");
                self.conn_limits.send_error(stream, error, self.request.version())
            }
        }
    }

    #[inline]
    fn impl_run(&mut self, stream: &mut TcpStream) -> Result<(), ErrorKind> {
        self.connection.reset();
        self.connection_data.reset();

        while !self.is_expired() {
            self.reset_request_response();

            // Try parsing before reading: a pipelined request may already sit
            // fully buffered past the previous one's end, in which case this
            // completes with no blocking read at all.
            loop {
                match self.execute()? {
                    crate::http::request::Outcome::Complete => break,
                    crate::http::request::Outcome::Incomplete => {
                        if self.parser.fill_buffer(stream, self.conn_limits.socket_read_timeout)? == 0 {
                            return Ok(());
                        }
                    }
                }
            }

            self.handler.handle(&mut self.connection_data, &mut self.request, &mut self.response);

            self.conn_limits.write_bytes(stream, self.response.buffer())?;

            if !self.response.keep_alive {
                break;
            }

            self.connection.request_count += 1;
        }

        Ok(())
    }

    /// Whether this connection has used up its keep-alive allowance —
    /// checked by threaded mode between requests, and by the event-loop
    /// engine after each dispatched response.
    #[inline]
    pub(crate) fn is_expired(&self) -> bool {
        !self.response.keep_alive
            || self.connection.request_count >= self.conn_limits.max_requests_per_connection
            || self.connection.created.elapsed() > self.conn_limits.connection_lifetime
    }

    /// Advances the keep-alive request counter. Called once per completed
    /// request/response cycle by both engines.
    #[inline]
    pub(crate) fn record_request(&mut self) {
        self.connection.request_count += 1;
    }
}

impl ConnLimits {
    #[inline]
    pub(crate) fn send_error(
        &self,
        stream: &mut TcpStream,
        error: ErrorKind,
        version: Version,
    ) -> Result<(), io::Error> {
        self.write_bytes(stream, error.as_http(version))
    }

    #[inline]
    pub(crate) fn write_bytes(&self, stream: &mut TcpStream, response: &[u8]) -> Result<(), io::Error> {
        stream.set_write_timeout(Some(self.socket_write_timeout))?;
        stream.write_all(response)
    }
}

#[derive(Debug)]
pub(crate) struct Connection {
    created: Instant,
    request_count: usize,
}

impl Connection {
    #[inline]
    pub(crate) fn new() -> Self {
        Self {
            created: Instant::now(),
            request_count: 0,
        }
    }

    #[inline]
    pub(crate) fn reset(&mut self) {
        self.created = Instant::now();
        self.request_count = 0;
    }
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
/// use ember_http::ConnectionData;
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
///         self.cache.clear(); // Saving the allocated memory
///     }
/// }
/// ```
pub trait ConnectionData: Sync + Send + 'static {
    /// Creates a new instance of user data.
    ///
    /// It is called once at server startup, which avoids runtime allocations.
    fn new() -> Self;

    /// Resets the internal state of the instance to its initial values.
    ///
    /// It is called after the connection is closed. Allows repeated
    /// use of the instance for the following connections. If implemented
    /// correctly, avoids any allocations.
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
/// use ember_http::{ConnectionFilter, Response, Handled, StatusCode};
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
/// # Connection Filter Architecture
/// ```text
///                     [ QUEUE TCP_STREAM ]
///                              ||
/// /----------------------------||----------------------------------\
/// |                            || TCP_STREAM             OS Thread |
/// |       /=====================/                                  |
/// |       \/                                                       |
/// |   [--------]   Err(Handled)   [----------------------]         |
/// |   [ filter ] ===============> [ Send `error_response`]         |
/// |   [--------]                  [----------------------]         |
/// |       ||                                                       |
/// |       || Ok(())                          [-----------]        |
/// |       \=============================>    [  Handler  ]         |
/// |                                           [-----------]        |
/// \----------------------------------------------------------------/
/// ```
pub trait ConnectionFilter: Sync + Send + 'static {
    /// Validates an accepted connection before the first read.
    ///
    /// Perform fast, in-memory checks here — this runs on the connection's
    /// worker before any bytes are read from the socket, blocking that
    /// worker until it returns. Use for IP blacklist/whitelist, geographic
    /// restrictions, or rate-limiting counters.
    fn filter(
        &self,
        client_addr: SocketAddr,
        server_addr: SocketAddr,
        error_response: &mut Response,
    ) -> Result<(), Handled>;
}

impl ConnectionFilter for () {
    fn filter(&self, _: SocketAddr, _: SocketAddr, _: &mut Response) -> Result<(), Handled> {
        Ok(())
    }
}

//

#[cfg(test)]
pub(crate) mod def_handler {
    use super::*;
    use crate::{Handled, StatusCode};

    pub(crate) struct DefHandler;

    impl Handler<()> for DefHandler {
        fn handle(&self, _: &mut (), _: &mut Request, r: &mut Response) -> Handled {
            r.status(StatusCode::Ok).body("test")
        }
    }

    impl HttpConnection<DefHandler, ()> {
        #[inline]
        pub(crate) fn from_req<V: AsRef<[u8]>>(value: V) -> Self {
            let req_limits = ReqLimits::default().precalculate();
            let resp_limits = RespLimits::default();

            Self {
                handler: Arc::new(DefHandler),
                connection_data: (),

                connection: Connection::new(),
                parser: Parser::from(&req_limits, value),
                request: Request::new(&req_limits),
                response: Response::new(&resp_limits),
                chunked: false,
                host_seen: false,

                server_limits: ServerLimits::default(),
                conn_limits: ConnLimits::default(),
                req_limits,
                resp_limits,
            }
        }
    }
}
