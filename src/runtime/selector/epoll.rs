//! Linux epoll backend.
//!
//! Talks to epoll directly so each registration can choose between
//! level-triggered and edge-triggered (`EPOLLET`) delivery.

use super::{InterestKind, Notify, ReadyEvent, Selector, Wakeup};
use crate::error::{DeregisterError, RegisterError};
use crate::runtime::token::{Token, WAKER_TOKEN};
use libc::{
    epoll_event, EPOLLERR, EPOLLET, EPOLLHUP, EPOLLIN, EPOLLOUT, EPOLLRDHUP, EPOLL_CLOEXEC,
    EPOLL_CTL_ADD, EPOLL_CTL_DEL, EPOLL_CTL_MOD,
};
use std::io;
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::sync::Arc;
use std::time::Duration;

/// Selector backed by one epoll instance.
pub struct EpollSelector {
    epoll: OwnedFd,
    /// Reusable buffer handed to `epoll_wait`.
    events: Vec<epoll_event>,
    waker: Option<Arc<EventFd>>,
}

impl EpollSelector {
    /// Create an epoll instance returning at most `max_events` per wait.
    pub fn new(max_events: usize) -> io::Result<Self> {
        let fd = unsafe { libc::epoll_create1(EPOLL_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(Self {
            epoll: unsafe { OwnedFd::from_raw_fd(fd) },
            events: Vec::with_capacity(max_events.max(1)),
            waker: None,
        })
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, event: Option<&mut epoll_event>) -> io::Result<()> {
        let ptr = event.map_or(std::ptr::null_mut(), |ev| ev as *mut epoll_event);
        let rc = unsafe { libc::epoll_ctl(self.epoll.as_raw_fd(), op, fd, ptr) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

fn interest_flags(interest: InterestKind) -> u32 {
    let mut flags = EPOLLIN;
    if interest.is_writable() {
        flags |= EPOLLOUT;
    }
    if interest.is_edge() {
        flags |= EPOLLRDHUP | EPOLLET;
    }
    flags as u32
}

fn timeout_ms(timeout: Option<Duration>) -> libc::c_int {
    match timeout {
        None => -1,
        Some(d) => {
            let ms = d.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;
            // Round sub-millisecond waits up instead of busy-polling.
            if ms == 0 && !d.is_zero() {
                1
            } else {
                ms
            }
        }
    }
}

impl Selector for EpollSelector {
    fn register(
        &mut self,
        fd: RawFd,
        token: Token,
        interest: InterestKind,
    ) -> Result<(), RegisterError> {
        let mut event = epoll_event {
            events: interest_flags(interest),
            u64: token.0 as u64,
        };
        self.ctl(EPOLL_CTL_ADD, fd, Some(&mut event))
            .map_err(|e| RegisterError::from_io(fd, e))
    }

    fn reregister(
        &mut self,
        fd: RawFd,
        token: Token,
        interest: InterestKind,
    ) -> Result<(), RegisterError> {
        let mut event = epoll_event {
            events: interest_flags(interest),
            u64: token.0 as u64,
        };
        self.ctl(EPOLL_CTL_MOD, fd, Some(&mut event))
            .map_err(|e| RegisterError::from_io(fd, e))
    }

    fn deregister(&mut self, fd: RawFd) -> Result<(), DeregisterError> {
        self.ctl(EPOLL_CTL_DEL, fd, None)
            .map_err(|e| DeregisterError::from_io(fd, e))
    }

    fn select(
        &mut self,
        events: &mut Vec<ReadyEvent>,
        timeout: Option<Duration>,
    ) -> io::Result<Wakeup> {
        events.clear();
        self.events.clear();

        let n = unsafe {
            libc::epoll_wait(
                self.epoll.as_raw_fd(),
                self.events.as_mut_ptr(),
                self.events.capacity() as libc::c_int,
                timeout_ms(timeout),
            )
        };

        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(Wakeup::Woken);
            }
            return Err(err);
        }
        if n == 0 {
            return Ok(Wakeup::TimedOut);
        }

        // epoll_wait initialised the first `n` entries.
        unsafe { self.events.set_len(n as usize) };

        for ev in &self.events {
            let data = ev.u64;
            let flags = ev.events;
            let token = Token(data as usize);

            if token == WAKER_TOKEN {
                if let Some(waker) = &self.waker {
                    waker.reset();
                }
                continue;
            }

            events.push(ReadyEvent {
                token,
                readable: flags & (EPOLLIN as u32) != 0,
                writable: flags & (EPOLLOUT as u32) != 0,
                error: flags & (EPOLLERR as u32) != 0,
                hangup: flags & ((EPOLLHUP | EPOLLRDHUP) as u32) != 0,
            });
        }

        // Only the waker fired.
        if events.is_empty() {
            return Ok(Wakeup::Woken);
        }
        Ok(Wakeup::Ready)
    }

    fn waker(&mut self) -> io::Result<Arc<dyn Notify>> {
        if let Some(waker) = &self.waker {
            return Ok(waker.clone());
        }

        let waker = Arc::new(EventFd::new()?);
        self.register(waker.fd.as_raw_fd(), WAKER_TOKEN, InterestKind::LevelReadable)
            .map_err(io::Error::other)?;
        self.waker = Some(waker.clone());
        Ok(waker)
    }
}

/// Non-blocking eventfd used to interrupt `epoll_wait`.
pub struct EventFd {
    fd: OwnedFd,
}

impl EventFd {
    fn new() -> io::Result<Self> {
        let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        })
    }

    /// Drain the counter so the level-triggered registration goes quiet.
    fn reset(&self) {
        let mut buf = 0u64;
        unsafe {
            libc::read(
                self.fd.as_raw_fd(),
                &mut buf as *mut u64 as *mut libc::c_void,
                std::mem::size_of::<u64>(),
            );
        }
    }
}

impl Notify for EventFd {
    fn notify(&self) -> io::Result<()> {
        let buf: u64 = 1;
        let rc = unsafe {
            libc::write(
                self.fd.as_raw_fd(),
                &buf as *const u64 as *const libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        if rc < 0 {
            let err = io::Error::last_os_error();
            // Counter saturated: a wake-up is already pending.
            if err.kind() == io::ErrorKind::WouldBlock {
                return Ok(());
            }
            return Err(err);
        }
        Ok(())
    }
}
