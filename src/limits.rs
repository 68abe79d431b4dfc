//! Server configuration limits and timeouts.
//!
//! # Security-First Defaults
//!
//! Default limits are intentionally conservative to prevent:
//! - Resource exhaustion attacks
//! - Memory overflows
//! - Slowloris attacks
//! - Header flooding
//!
//! The numeric defaults in [`ReqLimits`] are: request line 4096 B, header
//! line 8192 B, header count 100, header region 16384 B, body 1 MiB.
//!
//! # Memory Consumption
//!
//! Each active connection consumes memory according to:
//!
//! `Total` = [`Request Buffer`](crate::limits::ReqLimits#memory-allocation-strategy) +
//!           [`Response Buffer`](crate::limits::RespLimits#buffer-management) +
//!           `Runtime Overhead`
//!
//! See each component's documentation for details and configuration options.
//!
//! # Examples
//!
//! ```no_run
//! # ember_http::impt_default_handler!{MyHandler}
//! use ember_http::{Server, limits::{ConnLimits, ReqLimits, ServerLimits}};
//! use std::{net::TcpListener, time::Duration};
//!
//! fn main() {
//!     Server::builder()
//!         .listener(TcpListener::bind("0.0.0.0:8080").unwrap())
//!         .handler(MyHandler)
//!         .server_limits(ServerLimits {
//!             max_connections: 5000, // Higher concurrency
//!             ..ServerLimits::default()
//!         })
//!         .connection_limits(ConnLimits {
//!             socket_read_timeout: Duration::from_secs(5),
//!             max_requests_per_connection: 10_000,
//!             ..ConnLimits::default()
//!         })
//!         .request_limits(ReqLimits {
//!             header_count: 64,        // More headers for complex APIs
//!             body_size: 16 * 1024 * 1024, // 16 MiB for larger payloads
//!             ..ReqLimits::default()
//!         })
//!         .build()
//!         .launch_threaded();
//! }
//! ```

use std::time::Duration;

/// Controls server-level concurrency, queueing, and overload behavior.
///
/// Configures how the server admits connections, sizes its worker pool, and
/// degrades gracefully under load. Applies to both concurrency modes; in
/// async mode `max_connections` instead bounds the number of live sockets the
/// reactor is willing to register before new accepts receive `503`.
///
/// # Connection management
/// ```text
///                            [------------]
///                            [ Tcp accept ]
///                            [------------]
///                                  ||
///                                  || TCP_STREAM
///                                  \/
/// [--------------]   Yes   /----------------\   No   [-------------]
/// [ Add to queue ] <====== | Queue if full? | =====> [ Sending 503 ]
/// [--------------]         \----------------/        [-------------]
///        ||
///        \==================\\          //====================\
///                            V          V                    ||
/// [---------]   Yes   /--------------------------\   No   [------]
/// [ Worker  ] <====== | Is there a free worker?  | =====> [ Wait ]
/// [---------]         \--------------------------/        [------]
/// ```
///
/// The queue acts as a buffer between connection acceptance and processing.
/// Workers continuously poll the queue using the configured `wait_strategy`.
///
/// # Worker
/// In threaded mode a worker is a dedicated OS thread, started once during
/// [`Server::builder().build()`](crate::Server), that loops forever pulling
/// accepted sockets from a shared queue replenished by the acceptor thread.
/// This design bounds the number of live threads to `max_connections`
/// regardless of how many clients connect.
#[derive(Debug, Clone)]
pub struct ServerLimits {
    /// Maximum number of concurrent active connections being processed (default: `100`).
    ///
    /// In threaded mode, exactly `max_connections` [workers](#worker) are
    /// spawned at startup. In async mode this bounds the number of live
    /// sockets the reactor will register.
    pub max_connections: usize,

    /// Maximum number of TCP connections waiting in the admission queue (default: `250`).
    ///
    /// All accepted connections first go into this queue. Worker threads select
    /// connections from here. If the queue becomes full, new connections receive immediate
    /// HTTP `503` responses.
    ///
    /// For more information, see [Connection management](#connection-management).
    pub max_pending_connections: usize,

    /// Strategy for worker thread waiting behavior (default: `Sleep(50μs)`).
    ///
    /// Controls how worker threads wait when the connection queue is empty.
    /// Affects latency, CPU usage, and throughput characteristics.
    pub wait_strategy: WaitStrategy,

    /// Dedicated threads for queue-overflow responses (default: `1`).
    ///
    /// When the connection queue becomes full, these threads immediately send
    /// responses with the [503](crate::StatusCode::ServiceUnavailable) code. Using
    /// multiple threads prevents bottlenecks in scenarios with a large volume of
    /// rejected requests. Set to 0 to silently close the connection (not recommended
    /// for production HTTP servers).
    pub count_503_handlers: usize,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ServerLimits {
    fn default() -> Self {
        Self {
            max_connections: 100,
            max_pending_connections: 250,
            wait_strategy: WaitStrategy::Sleep(Duration::from_micros(50)),
            count_503_handlers: 1,

            _priv: (),
        }
    }
}

/// Strategy for worker thread waiting when no connections are available.
///
/// Different strategies optimize for different workload patterns.
/// Choose based on your latency requirements and resource constraints.
#[derive(Debug, Clone)]
pub enum WaitStrategy {
    /// While waiting, uses [`std::thread::yield_now()`].
    ///
    /// # Note
    /// According to personal measurements, when using this option, the CPU load
    /// is 97-99%, so I do not recommend using it outside of latency-critical workloads.
    Yield,

    /// While waiting, uses [`std::thread::sleep()`].
    Sleep(Duration),
}

/// Connection-level limits and timeouts.
///
/// Controls individual TCP connection behavior including timeouts,
/// lifetime, and request limits. Applies to threaded-mode workers; in
/// async mode only `max_requests_per_connection` and `connection_lifetime`
/// are consulted (socket timeouts are superseded by the reactor's own
/// readiness-driven I/O).
///
/// Default values balance performance, resource usage, and security.
/// Only change if you understand the consequences.
#[derive(Debug, Clone)]
pub struct ConnLimits {
    /// Maximum duration to wait for reading data from socket (default: `2 seconds`).
    ///
    /// If no data is received within this time, connection is closed.
    /// This is the primary mechanism for cleaning up stalled connections.
    /// Prevents `slowloris attacks` and frees resources from inactive clients.
    pub socket_read_timeout: Duration,

    /// Maximum duration to wait for writing data to socket (default: `3 seconds`).
    ///
    /// If data can't be written in time, connection is terminated.
    /// Applies to individual write operations.
    pub socket_write_timeout: Duration,

    /// Maximum number of requests allowed per connection (default: `100`).
    ///
    /// Connection closes after processing this many requests.
    /// Helps prevent potential memory accumulation and maintains connection health.
    /// Combined with `connection_lifetime`, ensures connections don't live indefinitely.
    pub max_requests_per_connection: usize,

    /// Maximum lifetime of connection from establishment to closure (default: `2 minutes`).
    ///
    /// Final safety net that guarantees no connection lives longer than this duration.
    /// In practice, connections are typically cleaned up by `socket_read_timeout`
    /// or `max_requests_per_connection` long before this limit is reached.
    pub connection_lifetime: Duration,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ConnLimits {
    #[inline(always)]
    fn default() -> Self {
        Self {
            socket_read_timeout: Duration::from_secs(2),
            socket_write_timeout: Duration::from_secs(3),
            connection_lifetime: Duration::from_secs(120),
            max_requests_per_connection: 100,

            _priv: (),
        }
    }
}

/// HTTP request parsing limits and buffer pre-allocation strategy.
///
/// ⚠️ **SECURITY-FIRST DEFAULTS**
///
/// These limits are intentionally conservative to prevent resource
/// exhaustion and various parsing attacks.
///
/// 🔧 **You MAY need to increase these if you see:**
/// - `413 Payload Too Large` for legitimate requests
/// - `414 URI Too Long` for normal API calls
/// - `431 Request Header Fields Too Large`
///
/// # Memory Allocation Strategy
///
/// Each TCP connection pre-allocates a single fixed-size buffer sized to the
/// *worst case* permitted by these limits — request line + header region +
/// body. The parser never grows this buffer past that size; every
/// zero-copy slice the crate hands back to callers borrows from it for the
/// lifetime of one request, which is only sound because the buffer's
/// address never moves after the connection is created (see
/// [`crate::http::request::Parser`]).
///
/// ```text
/// Total Buffer = First Line + Header Region + Body + CRLF overhead
/// ```
///
/// ## Buffer Size Calculation (Default Values)
///
/// | Component | Formula | Size | Purpose |
/// |-----------|---------|------|---------|
/// | First Line | `19 + url_size` | 4,115 B | `METHOD URL HTTP/1.1\r\n` |
/// | Header region | `header_region_size` | 16,384 B | All header lines combined |
/// | Body | `body_size` | 1,048,576 B | Request payload |
/// | **Total** | **Sum + 2 bytes CRLF** | **~1.07 MiB** | Per-connection buffer |
///
/// # Example
/// ```
/// use ember_http::limits::ReqLimits;
///
/// let limits = ReqLimits::default();
/// let buffer_size = limits.estimated_buffer_size();
/// println!("Each connection needs {} bytes for its data buffer", buffer_size);
/// ```
#[derive(Debug, Clone)]
pub struct ReqLimits {
    /// Maximum request-target length in bytes, path and query combined (default: `4096 B`).
    ///
    /// Exceeding it is a `414 URI Too Long`.
    pub url_size: usize,
    /// Maximum number of path segments in the URL (default: `32 segments`).
    pub url_parts: usize,
    /// Maximum query string length, including the leading `?` (default: `2048 B`).
    pub url_query_size: usize,
    /// Maximum number of query parameters (default: `64`).
    ///
    /// Prevents query-parameter-explosion attacks.
    pub url_query_parts: usize,

    /// Maximum number of headers per request (default: `100`).
    ///
    /// The 101st header is `431`.
    pub header_count: usize,
    /// Maximum length of a single header line, name and value combined (default: `8192 B`).
    ///
    /// An 8193-byte line is `431`.
    pub header_line_size: usize,
    /// Maximum combined length of all header lines for one request (default: `16384 B`).
    ///
    /// This is a *separate*, tighter cap than `header_count * header_line_size` —
    /// a running byte counter is checked as headers are parsed, independent of
    /// the per-line cap.
    pub header_region_size: usize,

    /// Maximum request body size in bytes, decoded (default: `1 MiB`).
    ///
    /// Applies identically to a declared `Content-Length` body and to the
    /// decoded total of a chunked body.
    pub body_size: usize,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub precalc: ReqLimitsPrecalc,
}

impl Default for ReqLimits {
    fn default() -> Self {
        Self {
            url_size: 4096,
            url_parts: 32,
            url_query_size: 2048,
            url_query_parts: 64,

            header_count: 100,
            header_line_size: 8192,
            header_region_size: 16 * 1024,

            body_size: 1024 * 1024,

            precalc: ReqLimitsPrecalc::default(),
        }
    }
}

impl ReqLimits {
    /// Returns the estimated memory buffer size required per connection.
    ///
    /// This calculates the total buffer size needed to parse HTTP requests
    /// based on the current limits. The buffer includes space for the
    /// request line, the header region, and the body.
    ///
    /// # Example
    /// ```
    /// use ember_http::limits::ReqLimits;
    ///
    /// let limits = ReqLimits::default();
    /// let buffer_size = limits.estimated_buffer_size();
    /// println!("Each connection needs {} bytes for its data buffer", buffer_size);
    /// ```
    #[inline(always)]
    pub fn estimated_buffer_size(self) -> usize {
        self.precalculate().precalc.buffer
    }

    #[inline(always)]
    pub(crate) fn precalculate(mut self) -> Self {
        self.precalc.first_line = self.first_line();
        self.precalc.buffer = self.buffer();
        self.precalc.req_without_body = self.precalc.buffer - self.body_size;

        self
    }

    #[inline(always)]
    // First line + header region + "\r\n" + Body
    fn buffer(&self) -> usize {
        self.precalc.first_line + self.header_region_size + 2 + self.body_size
    }

    #[inline(always)]
    // First line of an HTTP request:
    // CONNECT /url/test HTTP/1.1\r\n
    // |-----| |-------| |------|
    //  Method    URl    Version
    //
    // Formula: Method(7) + " " + URl + " " + Version(8) + "\r\n"
    // In Code: 19 + url_size
    fn first_line(&self) -> usize {
        19 + self.url_size
    }
}

#[doc(hidden)]
#[derive(Debug, Clone, Default)]
pub struct ReqLimitsPrecalc {
    pub(crate) buffer: usize,
    pub(crate) first_line: usize,
    pub(crate) req_without_body: usize,
}

/// Configuration for response processing and memory allocation limits.
///
/// Controls how response buffers are allocated and managed to balance
/// memory usage and performance.
///
/// # Buffer Management
///
/// Based on the configured limits, response buffers are managed as follows:
/// ```rust
/// # use ember_http::limits::RespLimits;
/// # let limits = RespLimits::default();
/// # let mut buffer: Vec<()> = Vec::with_capacity(limits.default_capacity);
/// #
/// // `buffer` is Vec
/// if buffer.capacity() > limits.max_capacity {
///     buffer = Vec::with_capacity(limits.default_capacity);
/// } else {
///     buffer.clear();
/// }
/// ```
///
/// When the server starts, buffers are created with a capacity equal to `default_capacity`.
#[derive(Debug, Clone)]
pub struct RespLimits {
    /// Initial buffer capacity allocated for responses (default: `1024 B`).
    pub default_capacity: usize,
    /// Maximum allowed buffer capacity for responses (default: `8192 B`).
    //
    // Note: If the response exceeds `max_capacity * 2`, it may be sent in 1 or more `syscall`
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
