//! ember_http - an embeddable HTTP/1.1 server core with zero runtime
//! dependencies beyond the host operating system's socket, threading, and
//! readiness-notification primitives.
//!
//! The crate accepts TCP connections, parses HTTP requests incrementally off
//! a streaming byte feed, dispatches them through a [`Handler`] (optionally
//! the in-crate [`router::Router`], an ordered middleware chain in front of a
//! path-matched handler), and serializes responses back onto the wire. Two
//! mutually exclusive concurrency modes are supported, chosen per server
//! instance before `listen`:
//!
//! - **Threaded** ([`Server::launch_threaded`]): a fixed pool of OS threads,
//!   each running the full read → parse → dispatch → write cycle with
//!   blocking I/O.
//! - **Event loop** ([`EventLoopServer::launch`]): a single thread driven by
//!   this platform's readiness multiplexer (`epoll` on Linux/Android,
//!   `kqueue` on the BSD family and macOS, `poll` elsewhere), with every
//!   connection a small state machine advanced by readiness events.
//!
//! # Protocol Support
//!
//! - **HTTP/1.1**: persistent connections (keep-alive), pipelining, chunked
//!   *request* bodies.
//! - **HTTP/1.0**: accepted on the read side with an implicit
//!   `Connection: close` (see [design note](https://github.com/AmakeSashaDev/ember_http/blob/main/DESIGN.md)
//!   on why HTTP/1.0 keep-alive is not honored).
//!
//! # Features
//!
//! ## Security & Protection
//! - Strict per-request size limits (request line, header line/count/region,
//!   body) enforced by the parser itself — see [`limits::ReqLimits`].
//! - Custom connection filtering — implement [`ConnectionFilter`] to reject
//!   unwanted peers before the first byte is read.
//! - Graceful overload handling: connections beyond `max_connections` receive
//!   an immediate `503` instead of being silently dropped or queued forever.
//!
//! ## Performance & Memory
//! - Each connection's parser buffer and response buffer are sized once from
//!   [`limits::ReqLimits`]/[`limits::RespLimits`] and reused across
//!   keep-alive requests — no per-request allocation on the hot path.
//! - Threaded mode bounds live OS threads to `max_connections`, regardless of
//!   how many clients connect, via a shared work queue.
//!
//! ## Protocol & Management
//! - Automatic keep-alive negotiation from the request's declared version and
//!   `Connection` header.
//! - Per-connection state storage across keep-alive requests via the
//!   [`ConnectionData`] trait.
//!
//! # Quick Start
//!
//! ```toml
//! [dependencies]
//! ember_http = "0.1"
//! ```
//!
//! ```no_run
//! use ember_http::{Server, Handler, Request, Response, Handled, StatusCode};
//!
//! struct MyHandler;
//!
//! impl Handler for MyHandler {
//!     fn handle(&self, _: &mut (), _: &mut Request, resp: &mut Response) -> Handled {
//!         resp.status(StatusCode::Ok).body("Hello World!")
//!     }
//! }
//!
//! fn main() {
//!     Server::builder()
//!         .listener(Server::bind(8080).unwrap())
//!         .handler(MyHandler)
//!         .build()
//!         .launch_threaded();
//! }
//! ```
//!
//! For routing with `:name` path parameters and ordered middleware, see
//! [`router::Router`]. For the single-threaded, non-blocking alternative, see
//! [`ServerBuilder::build_event_loop`].
//!
//! # Use Cases
//!
//! - High-throughput microservices with predictable, bounded memory use.
//! - Internal APIs that want security-conscious defaults out of the box.
//! - Embedding an HTTP surface inside a larger Rust program without pulling
//!   in an async runtime.
pub(crate) mod http {
    pub mod query;
    pub(crate) mod request;
    pub(crate) mod response;
    pub(crate) mod types;
}
pub(crate) mod server {
    pub(crate) mod connection;
    pub(crate) mod server_impl;
}
pub(crate) mod errors;
pub mod limits;
pub(crate) mod reactor;
pub mod router;

pub use crate::{
    http::{
        query,
        request::Request,
        response::{
            write::{BodyWriter, WriteBuffer},
            Handled, Response,
        },
        types::{Method, StatusCode, Url, Version},
    },
    server::{
        connection::{ConnectionData, ConnectionFilter},
        server_impl::{EventLoopServer, Handler, Server, ServerBuilder, ShutdownHandle},
    },
};

#[doc(hidden)]
pub fn run_test<F: FnOnce(&mut Request, &mut Response) -> Handled>(f: F) {
    f(
        &mut Request::new(&crate::limits::ReqLimits::default()),
        &mut Response::new(&crate::limits::RespLimits::default()),
    );
}

#[doc(hidden)]
#[macro_export]
macro_rules! impt_default_handler {
    ($name:ident) => {
        use ember_http::{Handled, Handler, Request, Response, StatusCode};
        struct $name;

        // `<()>` to check functionality
        impl Handler<()> for $name {
            fn handle(&self, _: &mut (), _: &mut Request, resp: &mut Response) -> Handled {
                resp.status(StatusCode::Ok).body("Hello world!")
            }
        }
    };
}

#[doc(hidden)]
#[cfg(test)]
pub(crate) mod tools {
    use std::str::from_utf8;

    #[inline]
    pub(crate) fn str(value: Option<&[u8]>) -> Option<&str> {
        Some(from_utf8(value?).unwrap())
    }

    #[inline]
    pub(crate) fn str_op(value: &[u8]) -> &str {
        from_utf8(value).unwrap()
    }

    #[inline]
    pub(crate) fn str_2<'a>(value: (&'a [u8], &'a [u8])) -> (&'a str, &'a str) {
        (from_utf8(value.0).unwrap(), from_utf8(value.1).unwrap())
    }
}
