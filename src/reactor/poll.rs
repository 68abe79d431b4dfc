//! Portable `poll(2)`-backed [`Reactor`], used on any target that is
//! neither Linux/Android (`epoll`) nor a BSD/macOS family member (`kqueue`).

use super::{Interest, ReadyEvent, Reactor, TimerId, MAX_EVENTS, MAX_TIMERS};
use crate::errors::ErrorKind;
use std::{
    io,
    os::fd::RawFd,
    time::{Duration, Instant},
};

pub(crate) struct Poll {
    fds: Vec<libc::pollfd>,
    tokens: Vec<usize>,
    timers: Vec<Timer>,
    next_timer_id: u64,
}

struct Timer {
    id: TimerId,
    expires: Instant,
    token: usize,
}

impl Reactor for Poll {
    fn new() -> Result<Self, ErrorKind> {
        Ok(Self {
            fds: Vec::new(),
            tokens: Vec::new(),
            timers: Vec::new(),
            next_timer_id: 0,
        })
    }

    fn add_fd(&mut self, fd: RawFd, interest: Interest, token: usize) -> Result<(), ErrorKind> {
        if self.fds.iter().any(|entry| entry.fd == fd) {
            return Err(ErrorKind::DuplicateFd);
        }

        self.fds.push(libc::pollfd {
            fd,
            events: to_poll_events(interest),
            revents: 0,
        });
        self.tokens.push(token);

        Ok(())
    }

    fn modify_fd(&mut self, fd: RawFd, interest: Interest) -> Result<(), ErrorKind> {
        match self.fds.iter_mut().find(|entry| entry.fd == fd) {
            Some(entry) => {
                entry.events = to_poll_events(interest);
                Ok(())
            }
            None => Err(ErrorKind::Io(crate::errors::IoError(io::Error::new(
                io::ErrorKind::NotFound,
                "fd not registered",
            )))),
        }
    }

    fn remove_fd(&mut self, fd: RawFd) -> Result<(), ErrorKind> {
        if let Some(index) = self.fds.iter().position(|entry| entry.fd == fd) {
            self.fds.remove(index);
            self.tokens.remove(index);
        }
        Ok(())
    }

    fn add_timeout(&mut self, after: Duration, token: usize) -> Result<TimerId, ErrorKind> {
        if self.timers.len() >= MAX_TIMERS {
            return Err(ErrorKind::TooManyTimers);
        }

        let id = TimerId(self.next_timer_id);
        self.next_timer_id += 1;

        self.timers.push(Timer {
            id,
            expires: Instant::now() + after,
            token,
        });

        Ok(id)
    }

    fn cancel_timeout(&mut self, id: TimerId) {
        self.timers.retain(|timer| timer.id != id);
    }

    fn poll(&mut self, out: &mut Vec<ReadyEvent>) -> Result<(), ErrorKind> {
        let wait_ms = next_wait_ms(&self.timers);

        let n = unsafe {
            libc::poll(
                self.fds.as_mut_ptr(),
                self.fds.len() as libc::nfds_t,
                wait_ms,
            )
        };

        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(ErrorKind::ReactorBackend(crate::errors::IoError(err)));
        }

        for (entry, &token) in self.fds.iter_mut().zip(self.tokens.iter()).take(MAX_EVENTS) {
            if entry.revents == 0 {
                continue;
            }

            out.push(ReadyEvent {
                token,
                readable: entry.revents & libc::POLLIN != 0,
                writable: entry.revents & libc::POLLOUT != 0,
                error: entry.revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0,
                timeout: false,
            });

            entry.revents = 0;
        }

        drain_expired_timers(&mut self.timers, out);
        Ok(())
    }
}

fn to_poll_events(interest: Interest) -> i16 {
    let mut bits = 0;
    if interest.readable {
        bits |= libc::POLLIN;
    }
    if interest.writable {
        bits |= libc::POLLOUT;
    }
    bits
}

fn next_wait_ms(timers: &[Timer]) -> i32 {
    match timers.iter().map(|timer| timer.expires).min() {
        Some(expiry) => {
            let now = Instant::now();
            if expiry <= now {
                0
            } else {
                (expiry - now).as_millis().min(i32::MAX as u128) as i32
            }
        }
        None => -1,
    }
}

fn drain_expired_timers(timers: &mut Vec<Timer>, out: &mut Vec<ReadyEvent>) {
    let now = Instant::now();
    let mut i = 0;
    while i < timers.len() {
        if timers[i].expires <= now {
            let timer = timers.remove(i);
            out.push(ReadyEvent {
                token: timer.token,
                readable: false,
                writable: false,
                error: false,
                timeout: true,
            });
        } else {
            i += 1;
        }
    }
}
