//! A minimal reference implementation of the router/middleware contract this
//! crate's connection engine is agnostic to: an ordered middleware chain that
//! may short-circuit dispatch, followed by a path-matched handler with
//! `:name` segment wildcards.
//!
//! [`Router`] is just one [`Handler`] implementation among many — nothing in
//! [`crate::Server`] or [`crate::EventLoopServer`] knows it exists. Callers
//! who need a more sophisticated router (regex routes, trie-based matching,
//! content negotiation) implement [`Handler`] directly; this is the seam.
//!
//! ```
//! use ember_http::{router::{Router, Next}, Handled, Method, Request, Response, StatusCode};
//!
//! let router: Router = Router::new()
//!     .middleware(|_, req, resp| {
//!         if req.header(b"x-api-key").is_some() {
//!             Next::Continue
//!         } else {
//!             Next::Stop(resp.status(StatusCode::Unauthorized).body("missing api key"))
//!         }
//!     })
//!     .route(Method::Get, "/users/:id", |_, req, resp| {
//!         let id = req.param("id").unwrap_or("");
//!         resp.status(StatusCode::Ok).body(format!("user {id}"))
//!     });
//! ```

use crate::{
    http::types::Method,
    server::connection::ConnectionData,
    server::server_impl::Handler,
    Handled, Request, Response, StatusCode,
};

/// The outcome of one middleware function: either let dispatch continue to
/// the next middleware/route, or take the response as final.
pub enum Next {
    /// Dispatch continues to the next registered middleware, or to route
    /// matching if this was the last one.
    Continue,
    /// Dispatch stops here; `response` was already finalized by the
    /// middleware (via [`Response::body`]/[`Response::body_with`]) and is
    /// sent as-is.
    Stop(Handled),
}

type MiddlewareFn<S> = dyn Fn(&mut S, &mut Request, &mut Response) -> Next + Sync + Send;
type RouteFn<S> = dyn Fn(&mut S, &Request, &mut Response) -> Handled + Sync + Send;

enum Segment {
    Literal(String),
    Param(String),
}

struct Route<S> {
    method: Method,
    segments: Vec<Segment>,
    handler: Box<RouteFn<S>>,
}

/// An ordered middleware chain in front of a path-matched handler table.
///
/// `S` is the per-connection [`ConnectionData`] threaded through to every
/// middleware and route handler, exactly as with any other [`Handler`].
///
/// Route matching is segment-based on `/`: `:name` matches exactly one
/// non-empty path segment and contributes `(name, segment-value)` to the
/// request's [`Request::param`] table. Segment values are not URL-decoded —
/// that is left to the handler, since decoding is only meaningful once the
/// handler knows what encoding its own parameter is supposed to carry.
pub struct Router<S = ()> {
    middleware: Vec<Box<MiddlewareFn<S>>>,
    routes: Vec<Route<S>>,
}

impl<S: ConnectionData> Default for Router<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: ConnectionData> Router<S> {
    /// An empty router: no middleware, no routes. Every request falls
    /// through to a `404 Not Found`.
    pub fn new() -> Self {
        Self { middleware: Vec::new(), routes: Vec::new() }
    }

    /// Appends a middleware to the chain. Middleware run in registration
    /// order, before route matching; the first one to return
    /// [`Next::Stop`] ends dispatch right there.
    #[must_use]
    pub fn middleware<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut S, &mut Request, &mut Response) -> Next + Sync + Send + 'static,
    {
        self.middleware.push(Box::new(f));
        self
    }

    /// Registers a route. `pattern` is a `/`-separated path (leading slash
    /// optional); a segment beginning with `:` is a wildcard capturing
    /// exactly one non-empty path segment under that name.
    ///
    /// Routes are tried in registration order; the first structural match
    /// (method + segment count + literal segments) wins.
    #[must_use]
    pub fn route<F>(mut self, method: Method, pattern: &str, handler: F) -> Self
    where
        F: Fn(&mut S, &Request, &mut Response) -> Handled + Sync + Send + 'static,
    {
        let segments = pattern
            .split('/')
            .filter(|segment| !segment.is_empty())
            .map(|segment| match segment.strip_prefix(':') {
                Some(name) => Segment::Param(name.to_string()),
                None => Segment::Literal(segment.to_string()),
            })
            .collect();

        self.routes.push(Route { method, segments, handler: Box::new(handler) });
        self
    }

    /// Structurally matches `route` against the request's method and path
    /// segments, populating `request`'s param table on success without
    /// mutating anything on a failed match.
    fn matches(route: &Route<S>, request: &mut Request) -> bool {
        if route.method != request.method() {
            return false;
        }

        let actual = request.url().path_segments();
        if actual.len() != route.segments.len() {
            return false;
        }

        for (segment, value) in route.segments.iter().zip(actual.iter()) {
            if let Segment::Literal(literal) = segment {
                if literal.as_bytes() != *value {
                    return false;
                }
            }
        }

        for (segment, value) in route.segments.iter().zip(actual.iter()) {
            if let Segment::Param(name) = segment {
                request.push_param(name.clone(), String::from_utf8_lossy(value).into_owned());
            }
        }

        true
    }
}

impl<S: ConnectionData> Handler<S> for Router<S> {
    fn handle(&self, data: &mut S, request: &mut Request, response: &mut Response) -> Handled {
        for middleware in &self.middleware {
            match middleware(data, request, response) {
                Next::Continue => {}
                Next::Stop(handled) => return handled,
            }
        }

        for route in &self.routes {
            if Self::matches(route, request) {
                return (route.handler)(data, request, response);
            }
        }

        response.status(StatusCode::NotFound).body("Not Found")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::connection::HttpConnection;

    fn router() -> Router {
        Router::new().route(Method::Get, "/users/:id", |_, req, resp| {
            let id = req.param("id").unwrap_or("missing").to_string();
            resp.status(StatusCode::Ok).body(id)
        })
    }

    fn dispatch(router: &Router, raw: &[u8]) -> (u16, String) {
        let mut conn = HttpConnection::from_req(raw);
        conn.execute().unwrap();
        router.handle(&mut (), &mut conn.request, &mut conn.response);
        let buf = conn.response.buffer();
        let text = std::str::from_utf8(buf).unwrap();
        let status: u16 = text[9..12].parse().unwrap();
        let body = text.rsplit("\r\n\r\n").next().unwrap().to_string();
        (status, body)
    }

    #[test]
    fn matches_and_populates_param() {
        let r = router();
        let (status, body) = dispatch(&r, b"GET /users/42 HTTP/1.1\r\nHost: x\r\n\r\n");
        assert_eq!(status, 200);
        assert_eq!(body, "42");
    }

    #[test]
    fn no_match_is_404() {
        let r = router();
        let (status, _) = dispatch(&r, b"GET /nope HTTP/1.1\r\nHost: x\r\n\r\n");
        assert_eq!(status, 404);
    }

    #[test]
    fn wrong_method_is_404() {
        let r = router();
        let (status, _) = dispatch(&r, b"POST /users/42 HTTP/1.1\r\nHost: x\r\n\r\n");
        assert_eq!(status, 404);
    }

    #[test]
    fn middleware_short_circuits() {
        let r: Router = Router::new()
            .middleware(|_, _, resp| Next::Stop(resp.status(StatusCode::Forbidden).body("nope")))
            .route(Method::Get, "/", |_, _, resp| resp.status(StatusCode::Ok).body("unreachable"));
        let (status, body) = dispatch(&r, b"GET / HTTP/1.1\r\nHost: x\r\n\r\n");
        assert_eq!(status, 403);
        assert_eq!(body, "nope");
    }
}
