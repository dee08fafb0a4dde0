//! Readiness-notification backends.
//!
//! A `Selector` owns one OS notification facility. The event loop only
//! talks to this trait, so the same dispatch code runs on:
//! - `EpollSelector`: Linux epoll via `libc`, with exact level/edge control
//! - `MioSelector`: mio (epoll on Linux, kqueue on macOS)

#[cfg(target_os = "linux")]
mod epoll;
mod mio_impl;

#[cfg(target_os = "linux")]
pub use epoll::EpollSelector;
pub use mio_impl::MioSelector;

use crate::error::{DeregisterError, RegisterError};
use crate::runtime::token::Token;
use std::io;
use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::time::Duration;

/// Readiness conditions a registration asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterestKind {
    /// Readable, reported every wait while the condition holds.
    LevelReadable,
    /// Readable, reported once per transition into "data available".
    EdgeReadable,
    /// Edge-triggered readable and writable, used while output is queued.
    EdgeReadWrite,
}

impl InterestKind {
    pub fn is_edge(self) -> bool {
        !matches!(self, InterestKind::LevelReadable)
    }

    pub fn is_writable(self) -> bool {
        matches!(self, InterestKind::EdgeReadWrite)
    }
}

/// Why a `select` call returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wakeup {
    /// At least one readiness event is in the batch.
    Ready,
    /// The timeout elapsed with nothing ready.
    TimedOut,
    /// Woken through `Notify` or interrupted by a signal. The batch is empty.
    Woken,
}

/// One entry of a ready-event batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadyEvent {
    pub token: Token,
    pub readable: bool,
    pub writable: bool,
    pub error: bool,
    pub hangup: bool,
}

impl ReadyEvent {
    /// Whether a read should be attempted. Errors and hangups are surfaced
    /// by the read itself.
    pub fn wants_read(&self) -> bool {
        self.readable || self.error || self.hangup
    }
}

/// Cross-thread wake-up for a selector blocked in `select`.
pub trait Notify: Send + Sync {
    fn notify(&self) -> io::Result<()>;
}

/// An OS readiness-notification facility.
pub trait Selector {
    /// Add interest for `fd`. Fails with `AlreadyRegistered` if `fd` already
    /// has a registration.
    fn register(&mut self, fd: RawFd, token: Token, interest: InterestKind)
        -> Result<(), RegisterError>;

    /// Replace the interest of an existing registration.
    fn reregister(
        &mut self,
        fd: RawFd,
        token: Token,
        interest: InterestKind,
    ) -> Result<(), RegisterError>;

    /// Remove interest for `fd`. Must be called while `fd` is still open.
    fn deregister(&mut self, fd: RawFd) -> Result<(), DeregisterError>;

    /// Wait for readiness and replace the contents of `events` with the
    /// batch. `None` waits indefinitely. Returns early with an empty batch
    /// and `Wakeup::Woken` when interrupted or woken.
    fn select(&mut self, events: &mut Vec<ReadyEvent>, timeout: Option<Duration>)
        -> io::Result<Wakeup>;

    /// Create the waker for this selector. Called once per selector.
    fn waker(&mut self) -> io::Result<Arc<dyn Notify>>;
}
