//! `kqueue`-backed [`Reactor`] for the BSD family and macOS.

use super::{Interest, ReadyEvent, Reactor, TimerId, MAX_EVENTS, MAX_TIMERS};
use crate::errors::ErrorKind;
use std::{
    collections::HashMap,
    io,
    os::fd::RawFd,
    time::{Duration, Instant},
};

pub(crate) struct Kqueue {
    kq: RawFd,
    registered: HashMap<RawFd, Interest>,
    timers: Vec<Timer>,
    next_timer_id: u64,
}

struct Timer {
    id: TimerId,
    expires: Instant,
    token: usize,
}

impl Reactor for Kqueue {
    fn new() -> Result<Self, ErrorKind> {
        let kq = unsafe { libc::kqueue() };
        if kq < 0 {
            return Err(io::Error::last_os_error().into());
        }

        Ok(Self {
            kq,
            registered: HashMap::new(),
            timers: Vec::new(),
            next_timer_id: 0,
        })
    }

    fn add_fd(&mut self, fd: RawFd, interest: Interest, token: usize) -> Result<(), ErrorKind> {
        if self.registered.contains_key(&fd) {
            return Err(ErrorKind::DuplicateFd);
        }

        apply_changes(self.kq, fd, Interest { readable: false, writable: false }, interest, token)?;
        self.registered.insert(fd, interest);
        Ok(())
    }

    fn modify_fd(&mut self, fd: RawFd, interest: Interest) -> Result<(), ErrorKind> {
        let Some(&old) = self.registered.get(&fd) else {
            return Err(ErrorKind::Io(crate::errors::IoError(io::Error::new(
                io::ErrorKind::NotFound,
                "fd not registered",
            ))));
        };

        apply_changes(self.kq, fd, old, interest, 0)?;
        self.registered.insert(fd, interest);
        Ok(())
    }

    fn remove_fd(&mut self, fd: RawFd) -> Result<(), ErrorKind> {
        if let Some(old) = self.registered.remove(&fd) {
            let _ = apply_changes(self.kq, fd, old, Interest { readable: false, writable: false }, 0);
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
        let timeout_spec = next_timeout_spec(&self.timers);
        let timeout_ptr = match &timeout_spec {
            Some(ts) => ts as *const libc::timespec,
            None => std::ptr::null(),
        };

        let mut raw_events: [libc::kevent; MAX_EVENTS] = unsafe { std::mem::zeroed() };
        let n = unsafe {
            libc::kevent(
                self.kq,
                std::ptr::null(),
                0,
                raw_events.as_mut_ptr(),
                MAX_EVENTS as i32,
                timeout_ptr,
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
            let token = raw.udata as usize;
            out.push(ReadyEvent {
                token,
                readable: raw.filter == libc::EVFILT_READ,
                writable: raw.filter == libc::EVFILT_WRITE,
                error: raw.flags & libc::EV_ERROR != 0,
                timeout: false,
            });
        }

        drain_expired_timers(&mut self.timers, out);
        Ok(())
    }
}

impl Drop for Kqueue {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.kq);
        }
    }
}

fn apply_changes(
    kq: RawFd,
    fd: RawFd,
    old: Interest,
    new: Interest,
    token: usize,
) -> Result<(), ErrorKind> {
    let mut changes: Vec<libc::kevent> = Vec::with_capacity(2);

    if old.readable != new.readable {
        changes.push(make_event(
            fd,
            libc::EVFILT_READ,
            if new.readable { libc::EV_ADD } else { libc::EV_DELETE },
            token,
        ));
    }
    if old.writable != new.writable {
        changes.push(make_event(
            fd,
            libc::EVFILT_WRITE,
            if new.writable { libc::EV_ADD } else { libc::EV_DELETE },
            token,
        ));
    }

    if changes.is_empty() {
        return Ok(());
    }

    let ret = unsafe {
        libc::kevent(
            kq,
            changes.as_ptr(),
            changes.len() as i32,
            std::ptr::null_mut(),
            0,
            std::ptr::null(),
        )
    };

    if ret < 0 {
        return Err(io::Error::last_os_error().into());
    }

    Ok(())
}

fn make_event(fd: RawFd, filter: i16, flags: u16, token: usize) -> libc::kevent {
    libc::kevent {
        ident: fd as usize,
        filter,
        flags,
        fflags: 0,
        data: 0,
        udata: token as *mut libc::c_void,
    }
}

fn next_timeout_spec(timers: &[Timer]) -> Option<libc::timespec> {
    let expiry = timers.iter().map(|timer| timer.expires).min()?;

    let now = Instant::now();
    let remaining = if expiry <= now {
        Duration::ZERO
    } else {
        expiry - now
    };

    Some(libc::timespec {
        tv_sec: remaining.as_secs() as libc::time_t,
        tv_nsec: remaining.subsec_nanos() as libc::c_long,
    })
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
