//! Cross-platform readiness event loop.
//!
//! One of three backends is compiled in, selected entirely by `cfg(target_os)`:
//! `epoll` on Linux/Android, `kqueue` on the BSD family and macOS, `poll`
//! everywhere else as the portable fallback. All three implement [`Reactor`],
//! so the connection engine's async mode is written once against the trait
//! and never against a specific backend.
//!
//! This module has no dependency beyond `libc` and the standard library —
//! there is no async runtime underneath it, no executor, no thread pool.

#[cfg(any(target_os = "linux", target_os = "android"))]
mod epoll;
#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
))]
mod kqueue;
#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
)))]
mod poll;

#[cfg(any(target_os = "linux", target_os = "android"))]
pub(crate) use epoll::Epoll as SysReactor;
#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
))]
pub(crate) use kqueue::Kqueue as SysReactor;
#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
)))]
pub(crate) use poll::Poll as SysReactor;

use crate::errors::ErrorKind;
use std::os::fd::RawFd;
use std::time::Duration;

/// Readiness interest registered for one file descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Interest {
    pub(crate) readable: bool,
    pub(crate) writable: bool,
}

impl Interest {
    pub(crate) const READABLE: Self = Self {
        readable: true,
        writable: false,
    };
    pub(crate) const WRITABLE: Self = Self {
        readable: false,
        writable: true,
    };
}

/// A fd's readiness as reported by one `poll` call, or a fired timer
/// (`fd == -1`, `timeout == true`).
#[derive(Debug, Clone, Copy)]
pub(crate) struct ReadyEvent {
    pub(crate) token: usize,
    pub(crate) readable: bool,
    pub(crate) writable: bool,
    pub(crate) error: bool,
    pub(crate) timeout: bool,
}

/// Unique id for a scheduled one-shot timer. Cancellation by id is allowed
/// to be O(N) over active timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TimerId(pub(crate) u64);

/// Up to this many live timers may be scheduled at once; exceeding it fails
/// `add_timeout` with [`ErrorKind::TooManyTimers`].
pub(crate) const MAX_TIMERS: usize = 64;

/// Up to this many readiness events are drained per `poll` call.
pub(crate) const MAX_EVENTS: usize = 1024;

/// A cross-platform readiness multiplexer over non-blocking file descriptors
/// and one-shot timers.
///
/// Implementations are level-triggered as observed by callers: a registered
/// fd with unread bytes fires again on the next `poll` call as long as it
/// remains registered `Readable` and still has data available.
pub(crate) trait Reactor: Sized {
    fn new() -> Result<Self, ErrorKind>;

    /// Registers `fd` with the given interest and an opaque `token` returned
    /// alongside readiness events for that fd. Re-registering an fd that is
    /// already known is an error ([`ErrorKind::DuplicateFd`]).
    fn add_fd(&mut self, fd: RawFd, interest: Interest, token: usize) -> Result<(), ErrorKind>;

    /// Alters the interest set for an already-registered fd without
    /// disturbing its token.
    fn modify_fd(&mut self, fd: RawFd, interest: Interest) -> Result<(), ErrorKind>;

    /// Deregisters `fd` and releases any internal per-fd state.
    fn remove_fd(&mut self, fd: RawFd) -> Result<(), ErrorKind>;

    /// Schedules a one-shot timer `after` the call, returning its id.
    fn add_timeout(&mut self, after: Duration, token: usize) -> Result<TimerId, ErrorKind>;

    /// Cancels a not-yet-fired timer; a no-op if it has already fired.
    fn cancel_timeout(&mut self, id: TimerId);

    /// Blocks until at least one fd or timer is ready (or the backend's own
    /// wait call fails), appending ready events to `out`. The wait timeout
    /// passed to the backend is the time until the nearest pending timer,
    /// or indefinite if none are scheduled.
    fn poll(&mut self, out: &mut Vec<ReadyEvent>) -> Result<(), ErrorKind>;
}
