//! mio backend.
//!
//! Portable readiness via mio (epoll on Linux, kqueue on macOS). mio
//! registers everything edge-triggered, so `LevelReadable` is delivered with
//! edge semantics here. A registration that stopped short of would-block has
//! to be re-armed with `reregister`, which reports it again if it is still
//! ready.

use super::{InterestKind, Notify, ReadyEvent, Selector, Wakeup};
use crate::error::{DeregisterError, RegisterError};
use crate::runtime::token::{Token, WAKER_TOKEN};
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Waker};
use std::io;
use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::time::Duration;

/// Selector backed by a `mio::Poll`.
pub struct MioSelector {
    poll: Poll,
    events: Events,
    waker: Option<Arc<Waker>>,
}

impl MioSelector {
    pub fn new(max_events: usize) -> io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(max_events.max(1)),
            waker: None,
        })
    }
}

fn mio_interest(interest: InterestKind) -> Interest {
    if interest.is_writable() {
        Interest::READABLE | Interest::WRITABLE
    } else {
        Interest::READABLE
    }
}

impl Selector for MioSelector {
    fn register(
        &mut self,
        fd: RawFd,
        token: Token,
        interest: InterestKind,
    ) -> Result<(), RegisterError> {
        self.poll
            .registry()
            .register(&mut SourceFd(&fd), mio::Token(token.0), mio_interest(interest))
            .map_err(|e| RegisterError::from_io(fd, e))
    }

    fn reregister(
        &mut self,
        fd: RawFd,
        token: Token,
        interest: InterestKind,
    ) -> Result<(), RegisterError> {
        self.poll
            .registry()
            .reregister(&mut SourceFd(&fd), mio::Token(token.0), mio_interest(interest))
            .map_err(|e| RegisterError::from_io(fd, e))
    }

    fn deregister(&mut self, fd: RawFd) -> Result<(), DeregisterError> {
        self.poll
            .registry()
            .deregister(&mut SourceFd(&fd))
            .map_err(|e| DeregisterError::from_io(fd, e))
    }

    fn select(
        &mut self,
        events: &mut Vec<ReadyEvent>,
        timeout: Option<Duration>,
    ) -> io::Result<Wakeup> {
        events.clear();

        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => return Ok(Wakeup::Woken),
            Err(e) => return Err(e),
        }
        if self.events.is_empty() {
            return Ok(Wakeup::TimedOut);
        }

        for event in self.events.iter() {
            let token = Token(event.token().0);
            if token == WAKER_TOKEN {
                continue;
            }

            events.push(ReadyEvent {
                token,
                readable: event.is_readable(),
                writable: event.is_writable(),
                error: event.is_error(),
                hangup: event.is_read_closed(),
            });
        }

        if events.is_empty() {
            return Ok(Wakeup::Woken);
        }
        Ok(Wakeup::Ready)
    }

    fn waker(&mut self) -> io::Result<Arc<dyn Notify>> {
        if let Some(waker) = &self.waker {
            return Ok(waker.clone());
        }

        let waker = Arc::new(Waker::new(self.poll.registry(), mio::Token(WAKER_TOKEN.0))?);
        self.waker = Some(waker.clone());
        Ok(waker)
    }
}

impl Notify for Waker {
    fn notify(&self) -> io::Result<()> {
        self.wake()
    }
}
