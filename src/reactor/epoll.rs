//! `epoll`-backed [`Reactor`] for Linux/Android.

use super::{Interest, ReadyEvent, Reactor, TimerId, MAX_EVENTS, MAX_TIMERS};
use crate::errors::ErrorKind;
use std::{
    collections::HashMap,
    io,
    os::fd::RawFd,
    time::{Duration, Instant},
};

pub(crate) struct Epoll {
    epfd: RawFd,
    tokens: HashMap<RawFd, usize>,
    timers: Vec<Timer>,
    next_timer_id: u64,
}

struct Timer {
    id: TimerId,
    expires: Instant,
    token: usize,
}

impl Reactor for Epoll {
    fn new() -> Result<Self, ErrorKind> {
        let epfd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epfd < 0 {
            return Err(io::Error::last_os_error().into());
        }

        Ok(Self {
            epfd,
            tokens: HashMap::new(),
            timers: Vec::new(),
            next_timer_id: 0,
        })
    }

    fn add_fd(&mut self, fd: RawFd, interest: Interest, token: usize) -> Result<(), ErrorKind> {
        if self.tokens.contains_key(&fd) {
            return Err(ErrorKind::DuplicateFd);
        }

        let mut event = libc::epoll_event {
            events: to_epoll_events(interest),
            u64: token as u64,
        };

        let ret = unsafe { libc::epoll_ctl(self.epfd, libc::EPOLL_CTL_ADD, fd, &mut event) };
        if ret < 0 {
            return Err(io::Error::last_os_error().into());
        }

        self.tokens.insert(fd, token);
        Ok(())
    }

    fn modify_fd(&mut self, fd: RawFd, interest: Interest) -> Result<(), ErrorKind> {
        let Some(&token) = self.tokens.get(&fd) else {
            return Err(ErrorKind::Io(crate::errors::IoError(io::Error::new(
                io::ErrorKind::NotFound,
                "fd not registered",
            ))));
        };

        let mut event = libc::epoll_event {
            events: to_epoll_events(interest),
            u64: token as u64,
        };

        let ret = unsafe { libc::epoll_ctl(self.epfd, libc::EPOLL_CTL_MOD, fd, &mut event) };
        if ret < 0 {
            return Err(io::Error::last_os_error().into());
        }

        Ok(())
    }

    fn remove_fd(&mut self, fd: RawFd) -> Result<(), ErrorKind> {
        self.tokens.remove(&fd);

        let ret = unsafe {
            libc::epoll_ctl(self.epfd, libc::EPOLL_CTL_DEL, fd, std::ptr::null_mut())
        };
        if ret < 0 {
            return Err(io::Error::last_os_error().into());
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

        let mut raw_events: [libc::epoll_event; MAX_EVENTS] = unsafe { std::mem::zeroed() };
        let n = unsafe {
            libc::epoll_wait(
                self.epfd,
                raw_events.as_mut_ptr(),
                MAX_EVENTS as i32,
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

        for raw in raw_events.iter().take(n as usize) {
            let mask = raw.events;
            out.push(ReadyEvent {
                token: raw.u64 as usize,
                readable: mask & (libc::EPOLLIN as u32) != 0,
                writable: mask & (libc::EPOLLOUT as u32) != 0,
                error: mask & (libc::EPOLLERR as u32 | libc::EPOLLHUP as u32) != 0,
                timeout: false,
            });
        }

        drain_expired_timers(&mut self.timers, out);
        Ok(())
    }
}

impl Drop for Epoll {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.epfd);
        }
    }
}

fn to_epoll_events(interest: Interest) -> u32 {
    let mut bits = 0u32;
    if interest.readable {
        bits |= libc::EPOLLIN as u32;
    }
    if interest.writable {
        bits |= libc::EPOLLOUT as u32;
    }
    bits
}

pub(super) fn next_wait_ms(timers: &[Timer]) -> i32 {
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

pub(super) fn drain_expired_timers(timers: &mut Vec<Timer>, out: &mut Vec<ReadyEvent>) {
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
