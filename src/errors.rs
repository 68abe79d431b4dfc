use crate::{query, Version};
use std::{error, fmt, io};

#[derive(Debug, PartialEq)]
pub(crate) enum ErrorKind {
    InvalidMethod,

    InvalidUrl,
    #[allow(dead_code)]
    Query(query::Error),

    InvalidVersion,
    MissingHost,

    InvalidHeader,
    TooManyHeaders,
    HeaderRegionTooLarge,
    InvalidContentLength,
    InvalidConnection,

    BodyTooLarge,
    #[allow(dead_code)]
    BodyMismatch {
        expected: usize,
        available: usize,
    },
    #[allow(dead_code)]
    UnexpectedBody(usize),

    InvalidChunkSize,
    InvalidChunkData,
    ChunkTooLarge,

    ServiceUnavailable,
    Io(IoError),

    /// The event loop's fd table already holds a registration for this fd.
    DuplicateFd,
    /// `add_timeout` was called with 64 timers already live.
    TooManyTimers,
    /// The reactor backend's own syscall (`epoll_wait`/`kevent`/`poll`) failed.
    ReactorBackend(IoError),
}

macro_rules! http_errors {
    ($($name:ident: $status_code:expr, $len:literal => $msg:literal; )*) => {
        /// The plain-text message the connection engine echoes back as the
        /// body of an error response. Kept short and user-facing, never a
        /// `Debug` dump — never leaks internal filenames or memory addresses.
        pub(crate) const fn message(&self) -> &'static str {
            match self { $(
                Self::$name { .. } => $msg,
            )* }
        }

        /// Renders this error as a complete, unconditionally `Connection: close`
        /// response: the status line, plus a `text/plain` body carrying
        /// [`Self::message`].
        pub(crate) const fn as_http(&self, version: Version) -> &'static [u8] {
            match (self, version) { $(
                (Self::$name { .. }, Version::Http11) => concat!(
                    "HTTP/1.1 ", $status_code, "\r\n",
                    "connection: close\r\n",
                    "content-length: ", $len, "\r\n",
                    "content-type: text/plain\r\n",
                    "\r\n",
                    $msg
                ),
                (Self::$name { .. }, Version::Http10) => concat!(
                    "HTTP/1.0 ", $status_code, "\r\n",
                    "connection: close\r\n",
                    "content-length: ", $len, "\r\n",
                    "content-type: text/plain\r\n",
                    "\r\n",
                    $msg
                ),
            )* }.as_bytes()
        }
    };
}

impl ErrorKind {
    http_errors! {
        InvalidMethod: "501 Not Implemented", "16" => "Not Implemented";

        InvalidUrl: "414 URI Too Long", "12" => "URI Too Long";
        Query: "400 Bad Request", "21" => "Invalid query string";

        InvalidVersion: "400 Bad Request", "23" => "Malformed request line";
        MissingHost: "400 Bad Request", "20" => "Missing Host header";

        InvalidHeader: "400 Bad Request", "22" => "Invalid header format";
        TooManyHeaders: "431 Request Header Fields Too Large", "17" => "Too many headers";
        HeaderRegionTooLarge: "431 Request Header Fields Too Large", "23" => "Header block too large";
        InvalidContentLength: "400 Bad Request", "23" => "Invalid Content-Length";
        InvalidConnection: "400 Bad Request", "26" => "Invalid Connection header";

        BodyTooLarge: "413 Payload Too Large", "18" => "Payload Too Large";
        BodyMismatch: "400 Bad Request", "21" => "Body length mismatch";
        UnexpectedBody: "400 Bad Request", "24" => "Unexpected request body";

        InvalidChunkSize: "400 Bad Request", "24" => "Invalid chunk size line";
        InvalidChunkData: "400 Bad Request", "22" => "Invalid chunk framing";
        ChunkTooLarge: "413 Payload Too Large", "18" => "Payload Too Large";

        ServiceUnavailable: "503 Service Unavailable", "32" => "Service temporarily unavailable";
        Io: "500 Internal Server Error", "22" => "Internal Server Error";

        DuplicateFd: "500 Internal Server Error", "26" => "Duplicate fd registration";
        TooManyTimers: "500 Internal Server Error", "24" => "Timer capacity exceeded";
        ReactorBackend: "500 Internal Server Error", "25" => "Event loop backend error";
    }

    /// The numeric status this error resolves to, independent of the
    /// canned text above (used by the connection engine to pick
    /// a [`crate::StatusCode`] for the synthesized error response).
    pub(crate) const fn status_code(&self) -> u16 {
        match self {
            Self::InvalidMethod => 501,
            Self::InvalidUrl => 414,
            Self::TooManyHeaders | Self::HeaderRegionTooLarge => 431,
            Self::BodyTooLarge | Self::ChunkTooLarge => 413,
            Self::ServiceUnavailable => 503,
            Self::Io(_) | Self::DuplicateFd | Self::TooManyTimers | Self::ReactorBackend(_) => 500,
            _ => 400,
        }
    }
}

impl error::Error for ErrorKind {}
impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl From<query::Error> for ErrorKind {
    fn from(err: query::Error) -> Self {
        ErrorKind::Query(err)
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
