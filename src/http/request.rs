//! Incremental HTTP/1.1 request parsing.
//!
//! [`Parser`] is a resumable state machine: [`HttpConnection::execute`] may be
//! called any number of times as more bytes arrive on the wire, in whatever
//! fragmentation the kernel happens to deliver them, and always reaches the
//! same [`Request`] as if the whole message had arrived in one read. Parsing
//! never blocks on its own — it only ever reports [`Outcome::Incomplete`]
//! (need more bytes), [`Outcome::Complete`] (request ready), or an
//! [`ErrorKind`] (malformed input or a limit exceeded).

use crate::{
    errors::ErrorKind,
    http::types::{self, HeaderMap},
    limits::ReqLimits,
    query::Query,
    server::connection::HttpConnection,
    ConnectionData, Handler, Method, Url, Version,
};
use memchr::memchr;
use std::{io, io::Read, mem, net::SocketAddr, net::TcpStream, time::Duration};

/// Longest a chunk-size line (`<hex>[;ext]\r\n`) is allowed to be before
/// it's treated as malformed framing rather than an unusually large chunk.
const MAX_CHUNK_SIZE_LINE: usize = 64;

// REQUEST

/// A fully or partially parsed HTTP request.
///
/// Headers and the URL are zero-copy: they borrow from the connection's
/// single reused read buffer for the lifetime of the request (see
/// [`Parser::into_static`]). The body is always an owned buffer — chunked
/// decoding produces bytes that do not exist contiguously on the wire, so
/// there is nothing to borrow from.
#[repr(align(128))]
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    method: Method,
    url: Url,
    version: Version,
    headers: HeaderMap,
    body: Vec<u8>,
    params: Vec<(String, String)>,
    pub(crate) client_addr: SocketAddr,
    pub(crate) server_addr: SocketAddr,
}

const UNSPECIFIED_ADDR: SocketAddr = SocketAddr::new(std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED), 0);

impl Request {
    #[inline(always)]
    pub(crate) fn new(limits: &ReqLimits) -> Self {
        Self {
            method: Method::Get,
            url: Url::new(limits),
            version: Version::Http11,
            headers: HeaderMap::new(limits.header_count),
            body: Vec::new(),
            params: Vec::new(),
            client_addr: UNSPECIFIED_ADDR,
            server_addr: UNSPECIFIED_ADDR,
        }
    }

    #[inline(always)]
    pub(crate) fn reset(&mut self) {
        self.method = Method::Get;
        self.url.clear();
        self.version = Version::Http11;
        self.headers.reset();
        self.body.clear();
        self.params.clear();
    }

    /// Appends a route parameter matched by the router. Called during
    /// dispatch, before the matched handler runs.
    #[inline(always)]
    pub(crate) fn push_param(&mut self, name: String, value: String) {
        self.params.push((name, value));
    }
}

// Public API
impl Request {
    /// Returns the request method.
    #[inline(always)]
    pub const fn method(&self) -> Method {
        self.method
    }

    /// Returns the parsed URL (path, segments, and query string).
    #[inline(always)]
    pub const fn url(&self) -> &Url {
        &self.url
    }

    /// Returns the HTTP protocol version of this request.
    #[inline(always)]
    pub const fn version(&self) -> Version {
        self.version
    }

    /// Looks up a header by name (case-insensitive).
    #[inline(always)]
    pub fn header(&self, name: &[u8]) -> Option<&[u8]> {
        self.headers.get(name)
    }

    /// Returns the declared or decoded body length, if any was present.
    #[inline(always)]
    pub fn content_length(&self) -> Option<usize> {
        self.headers.content_length
    }

    /// Returns the request body. Empty (not absent) when the request had no
    /// `Content-Length`/`Transfer-Encoding` framing.
    #[inline(always)]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Returns a route parameter matched by the in-crate router, if any
    /// handler populated one under this name. `None` for requests dispatched
    /// outside the router, or when no segment matched `name`.
    #[inline(always)]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }

    /// Returns every route parameter matched by the router, in match order.
    #[inline(always)]
    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    /// The address the underlying TCP connection was accepted from.
    #[inline(always)]
    pub const fn client_addr(&self) -> SocketAddr {
        self.client_addr
    }

    /// The local address the underlying TCP connection was accepted on.
    #[inline(always)]
    pub const fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }
}

// PARSER STATE

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ParserState {
    Method,
    Url,
    Version,
    Headers,
    FixedBody { needed: usize },
    ChunkSize,
    ChunkData { remaining: usize },
    ChunkCrlf,
    ChunkTrailers,
    Complete,
}

/// Result of one [`HttpConnection::execute`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    /// More bytes are required before parsing can continue.
    Incomplete,
    /// The request is fully parsed; `request`/`response` are ready.
    Complete,
}

// PARSER

/// The per-connection read buffer and cursor.
///
/// The buffer is allocated once, sized to the worst case permitted by
/// [`ReqLimits`] (request line + header region + body), and never
/// reallocated or moved for the life of the connection — this is what makes
/// [`Parser::into_static`] sound. `position` is the cursor up to which bytes
/// have been consumed by the state machine; `len` is how much of the buffer
/// holds real data read from the socket so far.
#[repr(align(64))]
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Parser {
    position: usize,
    len: usize,
    has_crlf: bool,
    header_bytes: usize,
    state: ParserState,
    buffer: Box<[u8]>,
}

impl Parser {
    #[inline(always)]
    pub(crate) fn new(limits: &ReqLimits) -> Self {
        Self {
            position: 0,
            len: 0,
            has_crlf: true,
            header_bytes: 0,
            state: ParserState::Method,
            buffer: vec![0; limits.precalc.buffer].into_boxed_slice(),
        }
    }

    #[cfg(test)]
    pub(crate) fn from(limits: &ReqLimits, value: impl AsRef<[u8]>) -> Self {
        let value = value.as_ref();
        let mut buffer = vec![0; limits.precalc.buffer].into_boxed_slice();
        buffer[..value.len()].copy_from_slice(value);

        Self {
            position: 0,
            len: value.len(),
            has_crlf: true,
            header_bytes: 0,
            state: ParserState::Method,
            buffer,
        }
    }

    /// Resets parsing state for the next request on this connection.
    /// Any bytes already buffered past the just-completed request — a
    /// pipelined request arriving in the same read — are shifted down to
    /// the front of the buffer rather than discarded, so the caller can
    /// try parsing again before issuing another socket read.
    #[inline(always)]
    pub(crate) fn reset(&mut self) {
        let leftover = self.len - self.position;
        if leftover > 0 {
            self.buffer.copy_within(self.position..self.len, 0);
        }
        self.len = leftover;
        self.position = 0;
        self.has_crlf = true;
        self.header_bytes = 0;
        self.state = ParserState::Method;
    }

    #[inline(always)]
    pub(crate) fn is_complete(&self) -> bool {
        self.state == ParserState::Complete
    }

    /// Blocking read into the remaining buffer capacity, for thread-per-connection mode.
    pub(crate) fn fill_buffer(&mut self, stream: &mut TcpStream, timeout: Duration) -> Result<usize, io::Error> {
        if self.len >= self.buffer.len() {
            return Ok(0);
        }
        stream.set_read_timeout(Some(timeout))?;
        let n = stream.read(&mut self.buffer[self.len..])?;
        self.len += n;
        Ok(n)
    }

    /// Non-blocking read into the remaining buffer capacity, for event-loop mode.
    /// `WouldBlock` is folded into `Ok(0)`: the reactor will wake the caller again
    /// once the fd is readable.
    pub(crate) fn fill_buffer_nonblocking(&mut self, stream: &mut TcpStream) -> Result<usize, io::Error> {
        if self.len >= self.buffer.len() {
            return Ok(0);
        }
        match stream.read(&mut self.buffer[self.len..]) {
            Ok(n) => {
                self.len += n;
                Ok(n)
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(e),
        }
    }

    /// Non-blocking read that, unlike [`Self::fill_buffer_nonblocking`],
    /// disambiguates "no data yet" from "peer closed its write half" — the
    /// event-loop engine needs that distinction to know when to drop a
    /// connection instead of leaving it registered for readiness. `None`
    /// means the read would block; `Some(0)` means EOF.
    pub(crate) fn poll_read(&mut self, stream: &mut TcpStream) -> Result<Option<usize>, io::Error> {
        if self.len >= self.buffer.len() {
            return Ok(Some(0));
        }
        match stream.read(&mut self.buffer[self.len..]) {
            Ok(n) => {
                self.len += n;
                Ok(Some(n))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    #[inline(always)]
    fn available(&self) -> usize {
        self.len - self.position
    }

    /// Bytes `[start, start + step)`, only if that range has actually been
    /// filled with data (`start + step <= self.len`) — never reads past live
    /// data into the still-zeroed tail of the buffer.
    #[inline(always)]
    pub(crate) fn get_slice(&self, start: usize, step: usize) -> Option<&[u8]> {
        if start + step <= self.len {
            Some(&self.buffer[start..start + step])
        } else {
            None
        }
    }

    #[inline(always)]
    pub(crate) fn get_slice_mut(&mut self, start: usize, step: usize) -> Option<&mut [u8]> {
        if start + step <= self.len {
            Some(&mut self.buffer[start..start + step])
        } else {
            None
        }
    }

    /// Locates `delimiter` within `[position, position + limit)`, returning
    /// its index relative to `position`. `None` if the currently buffered
    /// data doesn't contain it yet — the caller decides, by comparing
    /// `available()` to `limit`, whether that's "need more bytes" or
    /// "bytes exhausted without finding it" (a limit violation).
    #[inline(always)]
    pub(crate) fn find_char(&self, limit: usize, delimiter: u8) -> Option<usize> {
        let bound = self.available().min(limit);
        memchr(delimiter, &self.buffer[self.position..self.position + bound])
    }

    #[inline(always)]
    pub(crate) fn update_position(&mut self, step: usize) {
        self.position += step;
    }

    /// # Safety
    ///
    /// The returned reference outlives `self` in the type system, but not in
    /// reality: it is only valid while the connection's buffer remains
    /// allocated at its current address, which holds for the lifetime of the
    /// `HttpConnection` that owns this `Parser`. The buffer's address never
    /// changes after construction (no `Vec` push/resize touches it — it is a
    /// fixed `Box<[u8]>`), so any `'static` slice handed to a `Request`
    /// remains memory-safe to read until the next `reset()` overwrites the
    /// bytes it points at. Only ever call this for data that belongs to
    /// headers or the URL, which are dropped (via `Request::reset`) before the
    /// buffer is reused for the next request on this connection.
    #[inline(always)]
    const unsafe fn into_static(src: &[u8]) -> &'static [u8] {
        mem::transmute(src)
    }

    #[inline(always)]
    pub(crate) fn get_slice_static(&self, start: usize, step: usize) -> Option<&'static [u8]> {
        self.get_slice(start, step).map(|s| unsafe { Self::into_static(s) })
    }
}

// PARSING — implemented on HttpConnection since it needs `request`/`response`
// alongside the buffer cursor.

impl<H: Handler<S>, S: ConnectionData> HttpConnection<H, S> {
    /// Advances parsing as far as the currently buffered bytes allow.
    ///
    /// May be called repeatedly as more bytes are appended to the parser's
    /// buffer (via [`Parser::fill_buffer`]/[`Parser::fill_buffer_nonblocking`]);
    /// resuming from wherever the previous call left off.
    pub(crate) fn execute(&mut self) -> Result<Outcome, ErrorKind> {
        loop {
            let state = mem::replace(&mut self.parser.state, ParserState::Complete);
            match state {
                ParserState::Method => match self.try_parse_method()? {
                    true => self.parser.state = ParserState::Url,
                    false => {
                        self.parser.state = ParserState::Method;
                        return Ok(Outcome::Incomplete);
                    }
                },
                ParserState::Url => match self.try_parse_url()? {
                    true => self.parser.state = ParserState::Version,
                    false => {
                        self.parser.state = ParserState::Url;
                        return Ok(Outcome::Incomplete);
                    }
                },
                ParserState::Version => match self.try_check_version()? {
                    true => self.parser.state = ParserState::Headers,
                    false => {
                        self.parser.state = ParserState::Version;
                        return Ok(Outcome::Incomplete);
                    }
                },
                ParserState::Headers => match self.try_parse_headers()? {
                    true => self.parser.state = self.body_start_state()?,
                    false => {
                        self.parser.state = ParserState::Headers;
                        return Ok(Outcome::Incomplete);
                    }
                },
                ParserState::FixedBody { needed } => match self.try_fixed_body(needed)? {
                    true => self.parser.state = ParserState::Complete,
                    false => {
                        self.parser.state = ParserState::FixedBody { needed };
                        return Ok(Outcome::Incomplete);
                    }
                },
                ParserState::ChunkSize => match self.try_chunk_size()? {
                    Some(next) => self.parser.state = next,
                    None => {
                        self.parser.state = ParserState::ChunkSize;
                        return Ok(Outcome::Incomplete);
                    }
                },
                ParserState::ChunkData { remaining } => match self.try_chunk_data(remaining)? {
                    Some(next) => self.parser.state = next,
                    None => {
                        self.parser.state = ParserState::ChunkData { remaining };
                        return Ok(Outcome::Incomplete);
                    }
                },
                ParserState::ChunkCrlf => match self.try_chunk_crlf()? {
                    true => self.parser.state = ParserState::ChunkSize,
                    false => {
                        self.parser.state = ParserState::ChunkCrlf;
                        return Ok(Outcome::Incomplete);
                    }
                },
                ParserState::ChunkTrailers => match self.try_chunk_trailers()? {
                    true => self.parser.state = ParserState::Complete,
                    false => {
                        self.parser.state = ParserState::ChunkTrailers;
                        return Ok(Outcome::Incomplete);
                    }
                },
                ParserState::Complete => {
                    self.parser.state = ParserState::Complete;
                    return Ok(Outcome::Complete);
                }
            }
        }
    }

    fn try_parse_method(&mut self) -> Result<bool, ErrorKind> {
        const MAX: usize = 8; // "OPTIONS "
        let probe = self.parser.available().min(MAX);
        let slice = self.parser.get_slice(self.parser.position, probe).unwrap_or(b"");

        match memchr(b' ', slice) {
            Some(_) => {
                let (method, consumed) = Method::from_bytes(slice)?;
                self.request.method = method;
                self.parser.update_position(consumed);
                Ok(true)
            }
            None if probe < MAX => Ok(false),
            // A full probe window with no space at all means the line never had
            // a METHOD-SP structure to begin with, not merely an unrecognized
            // method name — that's a malformed request line, not a 501.
            None => Err(ErrorKind::InvalidVersion),
        }
    }

    fn try_parse_url(&mut self) -> Result<bool, ErrorKind> {
        let limit = self.req_limits.url_size + 1;
        let idx = match self.parser.find_char(limit, b' ') {
            Some(idx) => idx,
            None if self.parser.available() < limit => return Ok(false),
            None => return Err(ErrorKind::InvalidUrl),
        };

        let target = self.parser.get_slice_static(self.parser.position, idx).ok_or(ErrorKind::InvalidUrl)?;

        let query_idx = memchr(b'?', target);
        let path = match query_idx {
            Some(q) => &target[..q],
            None => target,
        };

        self.request.url.target = target;
        self.request.url.path = path;
        self.request.url.parts.clear();
        for segment in path.split(|&b| b == b'/') {
            if segment.is_empty() {
                continue;
            }
            if self.request.url.parts.len() >= self.req_limits.url_parts {
                return Err(ErrorKind::InvalidUrl);
            }
            self.request.url.parts.push(segment);
        }

        self.request.url.query_parts.clear();
        match query_idx {
            Some(q) if target.len() - q > self.req_limits.url_query_size => {
                return Err(ErrorKind::InvalidUrl);
            }
            Some(q) => {
                self.request.url.query = Some(&target[q..]);
                Query::parse_into(
                    &mut self.request.url.query_parts,
                    &target[q + 1..],
                    self.req_limits.url_query_parts,
                )?;
            }
            None => self.request.url.query = None,
        }

        self.parser.update_position(idx + 1);
        Ok(true)
    }

    fn try_check_version(&mut self) -> Result<bool, ErrorKind> {
        const MAX: usize = 10; // "HTTP/1.1\r\n"
        let idx = match self.parser.find_char(MAX, b'\n') {
            Some(idx) => idx,
            None if self.parser.available() < MAX => return Ok(false),
            None => return Err(ErrorKind::InvalidVersion),
        };

        let has_crlf = idx > 0 && self.parser.get_slice(self.parser.position + idx - 1, 1) == Some(b"\r");
        let version_len = if has_crlf { idx - 1 } else { idx };
        if version_len != 8 {
            return Err(ErrorKind::InvalidVersion);
        }

        let slice = self.parser.get_slice(self.parser.position, 8).ok_or(ErrorKind::InvalidVersion)?;
        let (version, default_keep_alive) = Version::from_bytes(slice)?;

        self.request.version = version;
        self.response.version = version;
        self.response.keep_alive = default_keep_alive;
        self.parser.has_crlf = has_crlf;

        self.parser.update_position(idx + 1);
        Ok(true)
    }

    fn try_parse_headers(&mut self) -> Result<bool, ErrorKind> {
        loop {
            if self.request.headers.headers.len() > self.req_limits.header_count {
                return Err(ErrorKind::TooManyHeaders);
            }

            let terminator_len = if self.parser.has_crlf { 2 } else { 1 };
            let remaining_budget = self.req_limits.header_line_size + terminator_len;

            let idx = match self.parser.find_char(remaining_budget, b'\n') {
                Some(idx) => idx,
                None if self.parser.available() < remaining_budget => return Ok(false),
                None => return Err(ErrorKind::HeaderRegionTooLarge),
            };

            // Blank line: end of header block.
            let blank = (self.parser.has_crlf && idx == 1) || (!self.parser.has_crlf && idx == 0);
            if blank {
                self.parser.update_position(idx + 1);
                return Ok(true);
            }

            self.header_bytes_check(idx + 1)?;
            self.parse_header_line(idx)?;
            self.parser.update_position(idx + 1);
        }
    }

    fn header_bytes_check(&mut self, line_len: usize) -> Result<(), ErrorKind> {
        self.parser.header_bytes += line_len;
        if self.parser.header_bytes > self.req_limits.header_region_size {
            return Err(ErrorKind::HeaderRegionTooLarge);
        }
        Ok(())
    }

    fn parse_header_line(&mut self, idx: usize) -> Result<(), ErrorKind> {
        let has_crlf = self.parser.has_crlf;
        let line_len = if has_crlf && idx >= 1 { idx - 1 } else { idx };
        let line = self.parser.get_slice_mut(self.parser.position, line_len).ok_or(ErrorKind::InvalidHeader)?;

        let colon = memchr(b':', line).ok_or(ErrorKind::InvalidHeader)?;
        if colon == 0 {
            return Err(ErrorKind::InvalidHeader);
        }

        types::to_lower_case(&mut line[..colon]);

        let mut value_start = colon + 1;
        while value_start < line.len() && line[value_start] == b' ' {
            value_start += 1;
        }

        let name = self.parser.get_slice_static(self.parser.position, colon).ok_or(ErrorKind::InvalidHeader)?;
        let value = self
            .parser
            .get_slice_static(self.parser.position + value_start, line_len - value_start)
            .ok_or(ErrorKind::InvalidHeader)?;

        self.parse_special_header(name, value)?;
        self.request.headers.push(name, value);
        Ok(())
    }

    fn parse_special_header(&mut self, name: &[u8], value: &[u8]) -> Result<(), ErrorKind> {
        match name {
            b"content-length" => self.parse_content_length(value),
            b"connection" => self.parse_connection(value),
            b"transfer-encoding" => self.parse_transfer_encoding(value),
            b"host" => {
                self.host_seen = true;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn parse_content_length(&mut self, value: &[u8]) -> Result<(), ErrorKind> {
        if self.chunked {
            return Err(ErrorKind::InvalidContentLength);
        }
        let len = types::slice_to_usize(value).ok_or(ErrorKind::InvalidContentLength)?;
        if len > self.req_limits.body_size {
            return Err(ErrorKind::BodyTooLarge);
        }
        self.request.headers.content_length = Some(len);
        Ok(())
    }

    fn parse_connection(&mut self, value: &[u8]) -> Result<(), ErrorKind> {
        let mut lower = [0u8; 10];
        let len = types::into_lower_case(value, &mut lower);
        match &lower[..len] {
            // HTTP/1.0 keep-alive via this header is not honored (see DESIGN.md):
            // only an HTTP/1.1 request can have its keep-alive hint turned on here.
            b"keep-alive" if self.request.version == Version::Http11 => self.response.keep_alive = true,
            b"keep-alive" => {}
            b"close" => self.response.keep_alive = false,
            _ => return Err(ErrorKind::InvalidConnection),
        }
        Ok(())
    }

    fn parse_transfer_encoding(&mut self, value: &[u8]) -> Result<(), ErrorKind> {
        if self.request.headers.content_length.is_some() {
            return Err(ErrorKind::InvalidContentLength);
        }
        let mut lower = [0u8; 16];
        let len = types::into_lower_case(value, &mut lower);
        if &lower[..len] == b"chunked" {
            self.chunked = true;
        }
        Ok(())
    }

    fn body_start_state(&mut self) -> Result<ParserState, ErrorKind> {
        if self.request.version == Version::Http11 && !self.host_seen {
            return Err(ErrorKind::MissingHost);
        }
        if self.chunked {
            return Ok(ParserState::ChunkSize);
        }
        match self.request.headers.content_length {
            Some(0) | None => Ok(ParserState::Complete),
            Some(needed) => Ok(ParserState::FixedBody { needed }),
        }
    }

    fn try_fixed_body(&mut self, needed: usize) -> Result<bool, ErrorKind> {
        if self.parser.available() < needed {
            return Ok(false);
        }
        let slice = self.parser.get_slice(self.parser.position, needed).ok_or(ErrorKind::UnexpectedBody(needed))?;
        self.request.body = slice.to_vec();
        self.parser.update_position(needed);
        Ok(true)
    }

    fn try_chunk_size(&mut self) -> Result<Option<ParserState>, ErrorKind> {
        let idx = match self.parser.find_char(MAX_CHUNK_SIZE_LINE, b'\n') {
            Some(idx) => idx,
            None if self.parser.available() < MAX_CHUNK_SIZE_LINE => return Ok(None),
            None => return Err(ErrorKind::InvalidChunkSize),
        };

        let has_crlf = self.parser.has_crlf;
        let line_len = if has_crlf && idx >= 1 { idx - 1 } else { idx };
        let line = self.parser.get_slice(self.parser.position, line_len).ok_or(ErrorKind::InvalidChunkSize)?;

        let hex_len = memchr(b';', line).unwrap_or(line.len());
        let size = parse_hex_usize(&line[..hex_len]).ok_or(ErrorKind::InvalidChunkSize)?;

        if self.request.body.len() + size > self.req_limits.body_size {
            return Err(ErrorKind::ChunkTooLarge);
        }

        self.parser.update_position(idx + 1);

        if size == 0 {
            Ok(Some(ParserState::ChunkTrailers))
        } else {
            Ok(Some(ParserState::ChunkData { remaining: size }))
        }
    }

    fn try_chunk_data(&mut self, remaining: usize) -> Result<Option<ParserState>, ErrorKind> {
        let take = self.parser.available().min(remaining);
        if take > 0 {
            let slice = self.parser.get_slice(self.parser.position, take).ok_or(ErrorKind::InvalidChunkData)?;
            self.request.body.extend_from_slice(slice);
            self.parser.update_position(take);
        }

        let left = remaining - take;
        if left > 0 {
            return Ok(None);
        }
        Ok(Some(ParserState::ChunkCrlf))
    }

    fn try_chunk_crlf(&mut self) -> Result<bool, ErrorKind> {
        let terminator_len = if self.parser.has_crlf { 2 } else { 1 };
        if self.parser.available() < terminator_len {
            return Ok(false);
        }

        let slice = self.parser.get_slice(self.parser.position, terminator_len).ok_or(ErrorKind::InvalidChunkData)?;
        let ends_correctly = if self.parser.has_crlf { slice == b"\r\n" } else { slice == b"\n" };
        if !ends_correctly {
            return Err(ErrorKind::InvalidChunkData);
        }

        self.parser.update_position(terminator_len);
        Ok(true)
    }

    fn try_chunk_trailers(&mut self) -> Result<bool, ErrorKind> {
        // Trailer lines are consumed and discarded, never exposed on `Request`.
        loop {
            let terminator_len = if self.parser.has_crlf { 2 } else { 1 };
            let budget = self.req_limits.header_line_size + terminator_len;

            let idx = match self.parser.find_char(budget, b'\n') {
                Some(idx) => idx,
                None if self.parser.available() < budget => return Ok(false),
                None => return Err(ErrorKind::InvalidChunkData),
            };

            let blank = (self.parser.has_crlf && idx == 1) || (!self.parser.has_crlf && idx == 0);
            self.parser.update_position(idx + 1);
            if blank {
                return Ok(true);
            }
        }
    }
}

/// Parses a bare hexadecimal byte slice (no `0x` prefix) into a `usize`,
/// overflow-checked the same way [`types::slice_to_usize`] is for decimal.
fn parse_hex_usize(bytes: &[u8]) -> Option<usize> {
    if bytes.is_empty() {
        return None;
    }
    let mut result: usize = 0;
    for &byte in bytes {
        let digit = (byte as char).to_digit(16)? as usize;
        result = result.checked_mul(16)?.checked_add(digit)?;
    }
    Some(result)
}

#[cfg(test)]
mod parser {
    use super::*;
    use crate::limits::ReqLimits;

    fn limits() -> ReqLimits {
        ReqLimits::default().precalculate()
    }

    #[test]
    fn reset() {
        let limits = limits();
        let mut parser = Parser::from(&limits, b"abc");
        parser.position = 3;
        parser.header_bytes = 4;
        parser.reset();

        assert_eq!(parser.position, 0);
        assert_eq!(parser.len, 0);
        assert_eq!(parser.header_bytes, 0);
        assert_eq!(parser.state, ParserState::Method);
    }

    #[test]
    fn reset_preserves_pipelined_leftover() {
        let limits = limits();
        let mut parser = Parser::from(&limits, b"abcdef");
        parser.position = 3;
        parser.reset();

        assert_eq!(parser.position, 0);
        assert_eq!(parser.len, 3);
        assert_eq!(parser.get_slice(0, 3), Some(b"def".as_slice()));
    }

    #[test]
    fn find_char() {
        let limits = limits();
        let parser = Parser::from(&limits, b"abc\ndef");
        assert_eq!(parser.find_char(10, b'\n'), Some(3));
        assert_eq!(parser.find_char(2, b'\n'), None);
    }

    #[test]
    fn get_slice() {
        let limits = limits();
        let parser = Parser::from(&limits, b"abcdef");
        assert_eq!(parser.get_slice(1, 3), Some(b"bcd".as_slice()));
        assert_eq!(parser.get_slice(4, 10), None);
    }

    #[test]
    fn get_slice_static() {
        let limits = limits();
        let parser = Parser::from(&limits, b"abcdef");
        assert_eq!(parser.get_slice_static(0, 3), Some(b"abc".as_slice()));
    }

    #[test]
    fn update_position() {
        let limits = limits();
        let mut parser = Parser::from(&limits, b"abcdef");
        parser.update_position(3);
        assert_eq!(parser.position, 3);
    }

    #[test]
    fn parse_hex() {
        assert_eq!(parse_hex_usize(b"1a"), Some(26));
        assert_eq!(parse_hex_usize(b"0"), Some(0));
        assert_eq!(parse_hex_usize(b""), None);
        assert_eq!(parse_hex_usize(b"zz"), None);
    }
}

#[cfg(test)]
mod request_self {
    use super::*;
    use crate::{http::request::Outcome, server::connection::HttpConnection};

    macro_rules! parse_request {
        ($bytes:expr) => {{
            let mut conn = HttpConnection::from_req($bytes);
            conn.execute()
        }};
    }

    #[test]
    fn parse_valid_get() {
        let result = parse_request!(b"GET /hello HTTP/1.1\r\nHost: x\r\n\r\n");
        assert_eq!(result, Ok(Outcome::Complete));
    }

    #[test]
    fn parse_incomplete_request_line() {
        let result = parse_request!(b"GET /hello HTTP/1.1\r\n");
        assert_eq!(result, Ok(Outcome::Incomplete));
    }

    #[test]
    fn parse_method_invalid() {
        let result = parse_request!(b"FOO /hello HTTP/1.1\r\n\r\n");
        assert_eq!(result, Err(ErrorKind::InvalidMethod));
    }

    #[test]
    fn parse_request_line_without_any_space_is_malformed_not_unknown_method() {
        // No space anywhere in the first 8 bytes: not a recognizable
        // METHOD-SP structure at all, so this is a malformed request line
        // (400), not an unknown-method request (501).
        let result = parse_request!(b"GARBAGE\r\n\r\n");
        assert_eq!(result, Err(ErrorKind::InvalidVersion));
    }

    #[test]
    fn parse_with_body() {
        let mut conn = HttpConnection::from_req(b"POST /x HTTP/1.1\r\nHost: x\r\nContent-Length: 5\r\n\r\nhello");
        let result = conn.execute();
        assert_eq!(result, Ok(Outcome::Complete));
        assert_eq!(conn.request.body(), b"hello");
    }

    #[test]
    fn parse_chunked_body() {
        let mut conn = HttpConnection::from_req(
            b"POST /x HTTP/1.1\r\nHost: x\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n0\r\n\r\n",
        );
        let result = conn.execute();
        assert_eq!(result, Ok(Outcome::Complete));
        assert_eq!(conn.request.body(), b"hello");
    }

    #[test]
    fn parse_chunked_multiple() {
        let mut conn = HttpConnection::from_req(
            b"POST /x HTTP/1.1\r\nHost: x\r\nTransfer-Encoding: chunked\r\n\r\n3\r\nfoo\r\n3\r\nbar\r\n0\r\n\r\n",
        );
        let result = conn.execute();
        assert_eq!(result, Ok(Outcome::Complete));
        assert_eq!(conn.request.body(), b"foobar");
    }

    #[test]
    fn http10_keep_alive_header_not_honored() {
        let mut conn = HttpConnection::from_req(b"GET / HTTP/1.0\r\nConnection: keep-alive\r\n\r\n");
        conn.execute().unwrap();
        assert_eq!(conn.response.keep_alive, false);
    }

    #[test]
    fn http11_close_header_honored() {
        let mut conn = HttpConnection::from_req(b"GET / HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n");
        conn.execute().unwrap();
        assert_eq!(conn.response.keep_alive, false);
    }

    #[test]
    fn parse_url_with_query_and_segments() {
        let mut conn = HttpConnection::from_req(b"GET /api/users/123?sort=name HTTP/1.1\r\nHost: x\r\n\r\n");
        conn.execute().unwrap();
        assert_eq!(conn.request.url().path(), b"/api/users/123");
        assert_eq!(conn.request.url().path_segment(1), Some(b"users".as_slice()));
        assert_eq!(conn.request.url().query(b"sort"), Some(b"name".as_slice()));
    }

    #[test]
    fn too_many_headers() {
        let mut req = String::from("GET / HTTP/1.1\r\n");
        for i in 0..200 {
            req.push_str(&format!("x-{i}: v\r\n"));
        }
        req.push_str("\r\n");

        let mut conn = HttpConnection::from_req(req.as_bytes());
        assert_eq!(conn.execute(), Err(ErrorKind::TooManyHeaders));
    }

    #[test]
    fn params_default_empty() {
        let mut conn = HttpConnection::from_req(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n");
        conn.execute().unwrap();
        assert_eq!(conn.request.params(), &[]);
        assert_eq!(conn.request.param("id"), None);
    }
}
