use crate::{
    errors::ErrorKind,
    http::{
        request::Request,
        response::{Handled, Response},
    },
    limits::{ConnLimits, ReqLimits, RespLimits, ServerLimits, WaitStrategy},
    reactor::{Interest, Reactor, SysReactor},
    server::connection::{ConnectionData, HttpConnection},
    ConnectionFilter, Version,
};
use crossbeam::queue::SegQueue;
use std::{
    io::{self, Write},
    marker::{PhantomData, Send, Sync},
    net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream},
    os::fd::AsRawFd,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

/// A handle to request shutdown of a running [`Server`] or [`EventLoopServer`].
///
/// Obtained via [`Server::shutdown_handle`]/[`EventLoopServer::shutdown_handle`]
/// *before* calling `launch_threaded`/`launch` (both consume the server by
/// value), then typically handed to another thread, a signal handler, or — in
/// async mode — a timer callback.
#[derive(Clone)]
pub struct ShutdownHandle(Arc<AtomicBool>);

impl ShutdownHandle {
    /// Requests shutdown. In threaded mode the acceptor loop exits (closing
    /// the listening socket) after its current `accept` poll; in-flight
    /// workers finish their current request and stop on the next read
    /// returning zero/error. In async mode the event loop exits after its
    /// current iteration.
    #[inline]
    pub fn stop(&self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

/// A trait for handling HTTP requests and generating responses.
///
/// You can use:
/// - `&self` for shared immutable data (e.g. database connection pool, router configuration)
/// - `&mut S` for connection-specific mutable state (e.g. authentication tokens, session data)
///
/// # Examples
///
/// Basic Request Handler
/// ```
/// use ember_http::{Handler, Request, Response, Handled, StatusCode};
///
/// struct MyHandler;
///
/// impl Handler for MyHandler {
///     fn handle(&self, _: &mut (), req: &mut Request, resp: &mut Response) -> Handled {
///         // Simple echo handler
///         if req.url().target() == b"/echo" {
///             resp.status(StatusCode::Ok).body("Echo response")
///         } else {
///             resp.status(StatusCode::NotFound).body("Not found :(")
///         }
///     }
/// }
/// ```
/// Handler with [`ConnectionData`]
/// ```
/// use ember_http::{Handler, ConnectionData, Request, Response, Handled, StatusCode};
///
/// struct CountingHandler;
///
/// impl Handler<State> for CountingHandler {
///     fn handle(&self, data: &mut State, req: &mut Request, resp: &mut Response) -> Handled {
///         data.request_count += 1;
///
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
    /// - `connection_data`: Mutable reference to connection-specific state
    /// - `request`: The parsed HTTP request. Mutable so that a router sitting
    ///   in front of the final handler can populate [`Request::param`] matches
    ///   while dispatching — the request is still logically immutable from the
    ///   wire's point of view, only its route-params side table is writable.
    /// - `response`: Mutable response builder for constructing the response
    ///
    /// # Returns
    ///
    /// `Handled` indicating whether the request was fully processed or
    /// requires further handling by other middleware.
    ///
    /// # Errors
    ///
    /// Implementations should handle errors internally and set appropriate
    /// HTTP status codes on the response. Panics will terminate the connection.
    fn handle(&self, connection_data: &mut S, request: &mut Request, response: &mut Response) -> Handled;
}

/// A threaded-mode HTTP server: a fixed pool of OS threads pulls accepted
/// connections off a shared queue and runs each to completion with blocking
/// I/O. See [`ServerBuilder::build_event_loop`] for the single-threaded,
/// non-blocking alternative.
///
/// # Examples
///
/// ```no_run
/// use ember_http::{Server, Handler, Request, Response, Handled, StatusCode};
/// use std::net::TcpListener;
///
/// struct MyHandler;
///
/// impl Handler for MyHandler {
///     fn handle(&self, _: &mut (), _: &mut Request, resp: &mut Response) -> Handled {
///         resp.status(StatusCode::Ok).body("Hello world!")
///     }
/// }
///
/// fn main() {
///     Server::builder()
///         .listener(TcpListener::bind("0.0.0.0:8080").unwrap())
///         .handler(MyHandler)
///         .build()
///         .launch_threaded()
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    stream_queue: TcpQueue,
    error_queue: TcpQueue,
    server_limits: ServerLimits,
    running: Arc<AtomicBool>,
}

impl Server {
    /// Builds a listening socket bound to every interface on `port`, with
    /// `SO_REUSEADDR` set and a listen backlog of 128 — the environment this
    /// crate's engines are written against. Hand the result to
    /// [`ServerBuilder::listener`].
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use ember_http::Server;
    ///
    /// let listener = Server::bind(8080).unwrap();
    /// ```
    pub fn bind(port: u16) -> io::Result<TcpListener> {
        use socket2::{Domain, Socket, Type};

        let socket = Socket::new(Domain::IPV4, Type::STREAM, None)?;
        socket.set_reuse_address(true)?;
        let addr: SocketAddr = (Ipv4Addr::UNSPECIFIED, port).into();
        socket.bind(&addr.into())?;
        socket.listen(128)?;
        Ok(socket.into())
    }

    /// Creates a new builder for configuring the server instance.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # ember_http::impt_default_handler!{ MyStruct }
    /// use std::net::TcpListener;
    /// use ember_http::Server;
    ///
    /// let server = Server::builder()
    ///     .listener(TcpListener::bind("0.0.0.0:8080").unwrap())
    ///     .handler(MyStruct) // structure with Handler implementation
    ///     .build();
    /// ```
    #[inline]
    pub fn builder<H, S>() -> ServerBuilder<H, S, ()>
    where
        H: Handler<S>,
        S: ConnectionData,
    {
        ServerBuilder {
            listener: None,
            handler: None,
            connection_filter: Arc::new(()),
            _marker: PhantomData,

            server_limits: None,
            request_limits: None,
            response_limits: None,
            connection_limits: None,
        }
    }

    /// Returns a handle that can stop this server from another thread. Must
    /// be obtained before [`Self::launch_threaded`], which consumes `self`.
    #[inline]
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle(self.running.clone())
    }

    /// Starts the server and begins accepting incoming connections, blocking
    /// the calling thread until [`ShutdownHandle::stop`] is called (or
    /// forever, if none was ever obtained). The worker pool that processes
    /// accepted connections was already spawned by [`ServerBuilder::build`].
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # ember_http::impt_default_handler!{ MyStruct }
    /// use ember_http::Server;
    /// use std::net::TcpListener;
    ///
    /// Server::builder()
    ///     .listener(TcpListener::bind("0.0.0.0:8080").unwrap())
    ///     .handler(MyStruct) // structure with Handler implementation
    ///     .build()
    ///     .launch_threaded()
    /// ```
    #[inline]
    pub fn launch_threaded(self) {
        const POLL_INTERVAL: Duration = Duration::from_millis(100);

        let _ = self.listener.set_nonblocking(true);
        while self.running.load(Ordering::Relaxed) {
            let (stream, addr) = match self.listener.accept() {
                Ok(pair) => pair,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(POLL_INTERVAL);
                    continue;
                }
                Err(_) => continue,
            };
            match self.stream_queue.len() < self.server_limits.max_pending_connections {
                true => self.stream_queue.push((stream, addr)),
                false => self.error_queue.push((stream, addr)),
            }
        }
        // `self` (and its listener) drops here, closing the listening socket.
    }

    #[inline]
    fn get_stream(queue: &TcpQueue, wait: &WaitStrategy) -> (TcpStream, SocketAddr) {
        loop {
            if let Some(value) = queue.pop() {
                return value;
            }

            match wait {
                WaitStrategy::Yield => thread::yield_now(),
                WaitStrategy::Sleep(time) => thread::sleep(*time),
            }
        }
    }
}

//

/// Builder for configuring and creating [`Server`] or [`EventLoopServer`] instances.
pub struct ServerBuilder<H, S = (), F = ()>
where
    H: Handler<S>,
    S: ConnectionData,
    F: ConnectionFilter,
{
    listener: Option<TcpListener>,
    handler: Option<Arc<H>>,
    connection_filter: Arc<F>,
    _marker: PhantomData<S>,

    server_limits: Option<ServerLimits>,
    request_limits: Option<ReqLimits>,
    response_limits: Option<RespLimits>,
    connection_limits: Option<ConnLimits>,
}

impl<H, S, F> ServerBuilder<H, S, F>
where
    H: Handler<S>,
    S: ConnectionData,
    F: ConnectionFilter,
{
    /// Sets the TCP listener that the server will use to accept connections.
    ///
    /// **This is a required component.** Use [`Server::bind`] for a listener
    /// configured the way this crate's engines expect, or bring your own.
    #[inline(always)]
    pub fn listener(mut self, listener: TcpListener) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Sets the request handler that will process incoming requests.
    ///
    /// **This is a required component.**
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use ember_http::{Server, Handler, Request, Response, Handled, StatusCode};
    /// use std::net::TcpListener;
    ///
    /// struct MyStruct;
    ///
    /// impl Handler for MyStruct {
    ///     fn handle(&self, _: &mut (), _: &mut Request, resp: &mut Response) -> Handled {
    ///         resp.status(StatusCode::Ok).body("Hello World!")
    ///     }
    /// }
    ///
    /// let server = Server::builder()
    ///     .listener(TcpListener::bind("0.0.0.0:8080").unwrap())
    ///     .handler(MyStruct)
    ///     .build();
    /// ```
    #[inline(always)]
    pub fn handler(mut self, handler: H) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Installs a connection filter to check incoming TCP connections
    /// before using it.
    ///
    /// Allows early rejection of unwanted IP addresses (before the
    /// first read). Can be used for DDoS protection, geobanning, etc.
    ///
    /// For more information, see [ConnectionFilter](crate::ConnectionFilter)
    #[inline(always)]
    pub fn conn_filter<NewF>(self, filter: NewF) -> ServerBuilder<H, S, NewF>
    where
        NewF: ConnectionFilter,
    {
        ServerBuilder {
            listener: self.listener,
            handler: self.handler,
            connection_filter: Arc::new(filter),
            _marker: self._marker,
            server_limits: self.server_limits,
            request_limits: self.request_limits,
            response_limits: self.response_limits,
            connection_limits: self.connection_limits,
        }
    }

    /// Configures server-level concurrency, queueing, and overload behavior.
    #[inline(always)]
    pub fn server_limits(mut self, limits: ServerLimits) -> Self {
        self.server_limits = Some(limits);
        self
    }

    /// Configures connection-level timeouts and lifetime.
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

    /// Configures response buffer limits.
    #[inline(always)]
    pub fn response_limits(mut self, limits: RespLimits) -> Self {
        self.response_limits = Some(limits);
        self
    }

    /// Finalizes the builder and constructs a threaded-mode [`Server`],
    /// eagerly spawning its worker pool.
    ///
    /// # Panics
    ///
    /// Panics when the `listener` or `handler` method was not called.
    #[inline]
    #[track_caller]
    pub fn build(self) -> Server {
        let (listener, handler, filter, limits) = self.get_all_parts();

        let stream_queue: TcpQueue = Arc::new(SegQueue::new());
        let error_queue: TcpQueue = Arc::new(SegQueue::new());

        for _ in 0..limits.0.max_connections {
            Self::spawn_worker(&stream_queue, &limits, &filter, &handler);
        }
        if limits.0.count_503_handlers != 0 {
            for _ in 0..limits.0.count_503_handlers {
                Self::spawn_alarmist(&error_queue, &limits);
            }
        } else {
            Self::spawn_quiet_alarmist(&error_queue, &limits);
        }

        Server {
            listener,
            stream_queue,
            error_queue,
            server_limits: limits.0,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Finalizes the builder and constructs a single-threaded
    /// [`EventLoopServer`], driven by the platform's readiness
    /// multiplexer (`epoll`/`kqueue`/`poll`) instead of a thread pool.
    ///
    /// # Panics
    ///
    /// Panics when the `listener` or `handler` method was not called.
    #[inline]
    #[track_caller]
    pub fn build_event_loop(self) -> EventLoopServer<H, S, F> {
        let (listener, handler, filter, limits) = self.get_all_parts();

        EventLoopServer {
            listener,
            handler,
            filter,
            limits,
            running: Arc::new(AtomicBool::new(true)),
            _marker: PhantomData,
        }
    }

    #[inline]
    fn spawn_worker(queue: &TcpQueue, limits: &AllLimits, filter: &Arc<F>, handler: &Arc<H>) {
        let queue = queue.clone();
        let filter = filter.clone();
        let mut conn = HttpConnection::new(handler.clone(), limits.clone());

        thread::spawn(move || loop {
            let (mut stream, addr) = Server::get_stream(&queue, &conn.server_limits.wait_strategy);

            let Ok(local_addr) = stream.local_addr() else {
                continue;
            };

            if filter.filter(addr, local_addr, &mut conn.response).is_err() {
                let _ = conn.conn_limits.write_bytes(&mut stream, conn.response.buffer());
                conn.response.reset(&conn.resp_limits);
                continue;
            }

            let _ = conn.run(&mut stream, addr, local_addr);
        });
    }

    #[inline]
    fn spawn_alarmist(queue: &TcpQueue, limits: &AllLimits) {
        let queue = queue.clone();
        let (server_limits, conn_limits, ..) = limits.clone();

        thread::spawn(move || loop {
            let (mut stream, _) = Server::get_stream(&queue, &server_limits.wait_strategy);
            let _ = conn_limits.send_error(&mut stream, ErrorKind::ServiceUnavailable, Version::Http11);
        });
    }

    #[inline]
    fn spawn_quiet_alarmist(queue: &TcpQueue, limits: &AllLimits) {
        let queue = queue.clone();
        let (server_limits, ..) = limits.clone();

        thread::spawn(move || loop {
            let (stream, _) = Server::get_stream(&queue, &server_limits.wait_strategy);
            drop(stream);
        });
    }

    #[inline]
    #[track_caller]
    fn get_all_parts(self) -> (TcpListener, Arc<H>, Arc<F>, AllLimits) {
        (
            self.listener.expect("The `listener` method must be called to create"),
            self.handler.expect("The `handler` method must be called to create"),
            self.connection_filter,
            (
                self.server_limits.clone().unwrap_or_default(),
                self.connection_limits.clone().unwrap_or_default(),
                self.request_limits.clone().unwrap_or_default().precalculate(),
                self.response_limits.clone().unwrap_or_default(),
            ),
        )
    }
}

type TcpQueue = Arc<SegQueue<(TcpStream, SocketAddr)>>;
pub(crate) type AllLimits = (ServerLimits, ConnLimits, ReqLimits, RespLimits);

//

/// A single-threaded, non-blocking HTTP server built on this platform's
/// readiness multiplexer (`epoll` on Linux/Android, `kqueue` on the BSD
/// family and macOS, `poll` elsewhere). Every accepted connection is a
/// state machine driven purely by readiness events — there is no thread
/// pool and no blocking I/O anywhere in [`Self::launch`].
///
/// Built via [`ServerBuilder::build_event_loop`]. `server_limits.max_connections`
/// bounds the number of sockets registered with the reactor at once; beyond
/// that, new accepts receive an immediate `503` and are closed.
pub struct EventLoopServer<H, S = (), F = ()>
where
    H: Handler<S>,
    S: ConnectionData,
    F: ConnectionFilter,
{
    listener: TcpListener,
    handler: Arc<H>,
    filter: Arc<F>,
    limits: AllLimits,
    running: Arc<AtomicBool>,
    _marker: PhantomData<S>,
}

/// Listener fds are never assigned this token; connection slots are indexed
/// by `token - 1`.
const LISTENER_TOKEN: usize = 0;
/// Reserved token for the internal periodic timer that wakes [`EventLoopServer::launch`]
/// up to observe [`ShutdownHandle::stop`] even while otherwise idle. Chosen far outside
/// the `1..=max_connections` range connection slot tokens occupy.
const STOP_CHECK_TOKEN: usize = usize::MAX;
const STOP_CHECK_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Clone, Copy)]
enum SlotState {
    Reading,
    Writing { pos: usize },
}

struct Slot<H: Handler<S>, S: ConnectionData> {
    stream: TcpStream,
    conn: HttpConnection<H, S>,
    state: SlotState,
}

impl<H, S, F> EventLoopServer<H, S, F>
where
    H: Handler<S>,
    S: ConnectionData,
    F: ConnectionFilter,
{
    /// Runs the event loop, blocking the calling thread forever (or until a
    /// reactor backend call fails unrecoverably).
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use ember_http::{Server, Handler, Request, Response, Handled, StatusCode};
    /// use std::net::TcpListener;
    ///
    /// struct MyHandler;
    ///
    /// impl Handler for MyHandler {
    ///     fn handle(&self, _: &mut (), _: &mut Request, resp: &mut Response) -> Handled {
    ///         resp.status(StatusCode::Ok).body("Hello world!")
    ///     }
    /// }
    ///
    /// fn main() {
    ///     Server::builder()
    ///         .listener(TcpListener::bind("0.0.0.0:8080").unwrap())
    ///         .handler(MyHandler)
    ///         .build_event_loop()
    ///         .launch()
    ///         .unwrap();
    /// }
    /// ```
    pub fn launch(self) -> Result<(), ErrorKind> {
        self.listener.set_nonblocking(true)?;

        let mut reactor = SysReactor::new()?;
        reactor.add_fd(self.listener.as_raw_fd(), Interest::READABLE, LISTENER_TOKEN)?;
        reactor.add_timeout(STOP_CHECK_INTERVAL, STOP_CHECK_TOKEN)?;

        let mut slots: Vec<Option<Slot<H, S>>> = Vec::new();
        let mut free: Vec<usize> = Vec::new();
        let mut events = Vec::new();

        while self.running.load(Ordering::Relaxed) {
            events.clear();
            reactor.poll(&mut events)?;

            for event in &events {
                if event.token == STOP_CHECK_TOKEN {
                    if self.running.load(Ordering::Relaxed) {
                        let _ = reactor.add_timeout(STOP_CHECK_INTERVAL, STOP_CHECK_TOKEN);
                    }
                    continue;
                }

                if event.token == LISTENER_TOKEN {
                    self.accept_all(&mut reactor, &mut slots, &mut free);
                    continue;
                }

                let idx = event.token - 1;
                if idx >= slots.len() || slots[idx].is_none() {
                    continue;
                }

                if event.error || event.timeout {
                    Self::close_slot(&mut reactor, &mut slots, &mut free, idx);
                    continue;
                }

                if event.readable {
                    self.handle_readable(&mut reactor, &mut slots, &mut free, idx);
                }
                if event.writable {
                    self.handle_writable(&mut reactor, &mut slots, &mut free, idx);
                }
            }
        }

        Ok(())
    }

    /// Returns a handle that can stop this event loop from another thread,
    /// a signal handler, or (on the loop thread itself) a timer callback
    /// wired up by the caller. Must be obtained before [`Self::launch`],
    /// which consumes `self`.
    #[inline]
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle(self.running.clone())
    }

    fn accept_all(&self, reactor: &mut SysReactor, slots: &mut Vec<Option<Slot<H, S>>>, free: &mut Vec<usize>) {
        loop {
            let (mut stream, client_addr) = match self.listener.accept() {
                Ok(pair) => pair,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(_) => continue,
            };

            let Ok(server_addr) = stream.local_addr() else {
                continue;
            };

            let live = slots.len() - free.len();
            if live >= self.limits.0.max_connections {
                let _ = stream.set_nonblocking(false);
                let _ = self.limits.1.send_error(&mut stream, ErrorKind::ServiceUnavailable, Version::Http11);
                continue;
            }

            let mut conn = HttpConnection::new(self.handler.clone(), self.limits.clone());
            conn.request.client_addr = client_addr;
            conn.request.server_addr = server_addr;

            if let Err(handled) = self.filter.filter(client_addr, server_addr, &mut conn.response) {
                let _ = handled;
                let _ = stream.set_nonblocking(false);
                let _ = self.limits.1.write_bytes(&mut stream, conn.response.buffer());
                continue;
            }

            if stream.set_nonblocking(true).is_err() {
                continue;
            }

            let idx = free.pop().unwrap_or(slots.len());
            let token = idx + 1;
            if reactor.add_fd(stream.as_raw_fd(), Interest::READABLE, token).is_err() {
                continue;
            }

            let slot = Slot { stream, conn, state: SlotState::Reading };
            if idx == slots.len() {
                slots.push(Some(slot));
            } else {
                slots[idx] = Some(slot);
            }
        }
    }

    fn handle_readable(
        &self,
        reactor: &mut SysReactor,
        slots: &mut Vec<Option<Slot<H, S>>>,
        free: &mut Vec<usize>,
        idx: usize,
    ) {
        let slot = slots[idx].as_mut().expect("slot checked present by caller");
        if !matches!(slot.state, SlotState::Reading) {
            return;
        }

        match slot.conn.parser.poll_read(&mut slot.stream) {
            Ok(None) => {}
            Ok(Some(0)) => Self::close_slot(reactor, slots, free, idx),
            Ok(Some(_)) => self.drive(reactor, slots, free, idx),
            Err(_) => Self::close_slot(reactor, slots, free, idx),
        }
    }

    /// Advances parsing as far as currently buffered bytes allow; on a
    /// complete request, dispatches the handler and attempts to flush the
    /// response immediately.
    fn drive(&self, reactor: &mut SysReactor, slots: &mut Vec<Option<Slot<H, S>>>, free: &mut Vec<usize>, idx: usize) {
        let slot = slots[idx].as_mut().expect("slot checked present by caller");

        loop {
            match slot.conn.execute() {
                Ok(crate::http::request::Outcome::Incomplete) => return,
                Ok(crate::http::request::Outcome::Complete) => break,
                Err(error) => {
                    let version = slot.conn.request.version();
                    let _ = slot.conn.conn_limits.send_error(&mut slot.stream, error, version);
                    Self::close_slot(reactor, slots, free, idx);
                    return;
                }
            }
        }

        slot.conn.dispatch();
        self.begin_write(reactor, slots, free, idx);
    }

    fn begin_write(&self, reactor: &mut SysReactor, slots: &mut Vec<Option<Slot<H, S>>>, free: &mut Vec<usize>, idx: usize) {
        let slot = slots[idx].as_mut().expect("slot checked present by caller");
        let mut pos = 0;

        match flush(&mut slot.stream, slot.conn.response.buffer(), &mut pos) {
            Ok(true) => self.finish_response(reactor, slots, free, idx),
            Ok(false) => {
                slot.state = SlotState::Writing { pos };
                if reactor.modify_fd(slot.stream.as_raw_fd(), Interest::WRITABLE).is_err() {
                    Self::close_slot(reactor, slots, free, idx);
                }
            }
            Err(_) => Self::close_slot(reactor, slots, free, idx),
        }
    }

    fn handle_writable(&self, reactor: &mut SysReactor, slots: &mut Vec<Option<Slot<H, S>>>, free: &mut Vec<usize>, idx: usize) {
        let slot = slots[idx].as_mut().expect("slot checked present by caller");
        let SlotState::Writing { mut pos } = slot.state else {
            return;
        };

        match flush(&mut slot.stream, slot.conn.response.buffer(), &mut pos) {
            Ok(true) => self.finish_response(reactor, slots, free, idx),
            Ok(false) => slot.state = SlotState::Writing { pos },
            Err(_) => Self::close_slot(reactor, slots, free, idx),
        }
    }

    /// Called once a response has been fully written. Resets parser/request/
    /// response state for the next request on this connection and, since the
    /// read buffer may already hold a pipelined request past the one just
    /// answered, tries to parse and dispatch it immediately — only falling
    /// back to waiting on another readable event if it doesn't.
    fn finish_response(&self, reactor: &mut SysReactor, slots: &mut Vec<Option<Slot<H, S>>>, free: &mut Vec<usize>, idx: usize) {
        let is_expired = slots[idx].as_ref().expect("slot checked present by caller").conn.is_expired();
        if is_expired {
            Self::close_slot(reactor, slots, free, idx);
            return;
        }

        let fd = {
            let slot = slots[idx].as_mut().expect("slot checked present by caller");
            slot.conn.record_request();
            slot.conn.reset_request_response();
            slot.state = SlotState::Reading;
            slot.stream.as_raw_fd()
        };

        if reactor.modify_fd(fd, Interest::READABLE).is_err() {
            Self::close_slot(reactor, slots, free, idx);
            return;
        }

        self.drive(reactor, slots, free, idx);
    }

    fn close_slot(reactor: &mut SysReactor, slots: &mut Vec<Option<Slot<H, S>>>, free: &mut Vec<usize>, idx: usize) {
        if let Some(slot) = slots[idx].take() {
            let _ = reactor.remove_fd(slot.stream.as_raw_fd());
            drop(slot.stream);
        }
        free.push(idx);
    }
}

/// Writes as much of `buf[*pos..]` as the socket will currently accept
/// without blocking. `Ok(true)` means the whole buffer is now written;
/// `Ok(false)` means the caller must wait for the next writable event.
fn flush(stream: &mut TcpStream, buf: &[u8], pos: &mut usize) -> io::Result<bool> {
    while *pos < buf.len() {
        match stream.write(&buf[*pos..]) {
            Ok(0) => return Err(io::Error::new(io::ErrorKind::WriteZero, "write returned zero")),
            Ok(n) => *pos += n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
            Err(e) => return Err(e),
        }
    }
    Ok(true)
}
