//! Readiness reactor.
//!
//! One thread, one selector, one listener. Each cycle waits for a batch of
//! ready events and dispatches them in the order the selector returned them:
//! the listener is drained with `accept_one` until would-block, connections
//! are drained with `Connection::drain` until would-block. A failure on one
//! connection closes that connection only.

use crate::error::{RegisterError, SetupError};
use crate::handler::{CloseReason, Handler};
use crate::runtime::connection::{ConnState, ConnectionRegistry};
use crate::runtime::selector::{InterestKind, Notify, ReadyEvent, Selector, Wakeup};
use crate::runtime::socket::{Accepted, NonBlockingSocket, Role};
use crate::runtime::token::{Token, LISTENER_TOKEN};
use std::io;
use std::net::SocketAddr;
use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Tuning knobs for a reactor.
#[derive(Debug, Clone)]
pub struct ReactorOptions {
    /// Size of the shared read buffer.
    pub buffer_size: usize,
    pub max_connections: usize,
    /// Queued output per connection before reads pause.
    pub max_outbound: usize,
    /// Bound on each wait; `None` waits indefinitely.
    pub tick: Option<Duration>,
}

impl Default for ReactorOptions {
    fn default() -> Self {
        Self {
            buffer_size: 1024,
            max_connections: 1024,
            max_outbound: 1024 * 1024,
            tick: None,
        }
    }
}

/// Counters kept by the reactor.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReactorStats {
    pub accepted: u64,
    /// Accepted but closed straight away (limit reached or registration failed).
    pub rejected: u64,
    pub accept_errors: u64,
    pub closed: u64,
    /// Connections currently registered.
    pub active: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
    /// Times a connection had to wait for write-readiness.
    pub write_stalls: u64,
}

/// Requests a running reactor to stop. Cloneable and usable from any thread.
#[derive(Clone)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
    notify: Arc<dyn Notify>,
}

impl ShutdownHandle {
    /// Set the flag and wake the selector. The loop notices on its next cycle.
    pub fn shutdown(&self) {
        self.flag.store(true, Ordering::SeqCst);
        if let Err(e) = self.notify.notify() {
            warn!(error = %e, "Failed to wake reactor");
        }
    }
}

/// Single-threaded readiness-driven server loop.
pub struct Reactor<S: Selector, H: Handler> {
    selector: S,
    /// `None` once shut down.
    listener: Option<NonBlockingSocket>,
    local_addr: SocketAddr,
    connections: ConnectionRegistry,
    handler: H,
    events: Vec<ReadyEvent>,
    read_buf: Vec<u8>,
    options: ReactorOptions,
    shutdown: Arc<AtomicBool>,
    notify: Arc<dyn Notify>,
    stats: ReactorStats,
}

impl<S: Selector, H: Handler> Reactor<S, H> {
    /// Build a reactor around `listener` and register it level-triggered.
    pub fn new(
        mut selector: S,
        listener: NonBlockingSocket,
        handler: H,
        options: ReactorOptions,
    ) -> Result<Self, SetupError> {
        if listener.role() != Role::Listener {
            return Err(SetupError::Socket(io::Error::new(
                io::ErrorKind::InvalidInput,
                "not a listening socket",
            )));
        }
        let local_addr = listener.local_addr().map_err(SetupError::Socket)?;
        let notify = selector.waker().map_err(SetupError::Selector)?;
        selector.register(
            listener.as_raw_fd(),
            LISTENER_TOKEN,
            InterestKind::LevelReadable,
        )?;

        Ok(Self {
            selector,
            listener: Some(listener),
            local_addr,
            connections: ConnectionRegistry::new(options.max_connections),
            handler,
            events: Vec::new(),
            read_buf: vec![0u8; options.buffer_size.max(1)],
            options,
            shutdown: Arc::new(AtomicBool::new(false)),
            notify,
            stats: ReactorStats::default(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            flag: Arc::clone(&self.shutdown),
            notify: Arc::clone(&self.notify),
        }
    }

    pub fn stats(&self) -> ReactorStats {
        self.stats
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Run until shutdown is requested, then close everything.
    ///
    /// Only a failure of the wait call itself ends the loop with an error.
    pub fn run(&mut self) -> io::Result<()> {
        info!(addr = %self.local_addr, "Reactor running");

        let result = loop {
            if self.shutdown.load(Ordering::SeqCst) {
                break Ok(());
            }
            if let Err(e) = self.turn(self.options.tick) {
                error!(error = %e, "Wait for readiness failed");
                break Err(e);
            }
        };

        self.close_all();
        info!(
            accepted = self.stats.accepted,
            rejected = self.stats.rejected,
            accept_errors = self.stats.accept_errors,
            closed = self.stats.closed,
            active = self.stats.active,
            bytes_read = self.stats.bytes_read,
            bytes_written = self.stats.bytes_written,
            write_stalls = self.stats.write_stalls,
            "Reactor stopped"
        );
        result
    }

    /// One wait-and-dispatch cycle. Returns the number of events handled.
    ///
    /// `Handler::on_tick` runs only when the wait timed out, not when the
    /// selector was woken.
    pub fn turn(&mut self, timeout: Option<Duration>) -> io::Result<usize> {
        let mut events = std::mem::take(&mut self.events);
        let result = self.selector.select(&mut events, timeout);

        match result {
            Ok(Wakeup::Ready) => {
                for event in &events {
                    self.dispatch(event);
                }
            }
            Ok(Wakeup::TimedOut) => {
                trace!("Tick");
                self.handler.on_tick();
            }
            Ok(Wakeup::Woken) | Err(_) => {}
        }

        let count = events.len();
        self.events = events;
        result.map(|_| count)
    }

    fn dispatch(&mut self, event: &ReadyEvent) {
        if event.token == LISTENER_TOKEN {
            self.accept_pending();
            return;
        }

        let max_outbound = self.options.max_outbound;
        let conn = match self.connections.get_mut(event.token) {
            Some(conn) => conn,
            None => {
                trace!(token = event.token.0, "Event for closed connection");
                return;
            }
        };

        let read_before = conn.bytes_read();
        let written_before = conn.bytes_written();

        let mut state = ConnState::Open;
        if event.writable {
            state = conn.on_writable(&mut self.read_buf, &mut self.handler, max_outbound);
        }
        if matches!(state, ConnState::Open) && event.wants_read() {
            state = conn.drain(&mut self.read_buf, &mut self.handler, max_outbound);
        }

        self.stats.bytes_read += conn.bytes_read() - read_before;
        self.stats.bytes_written += conn.bytes_written() - written_before;

        match state {
            ConnState::Open => {
                match self
                    .connections
                    .update_interest(&mut self.selector, event.token)
                {
                    Ok(Some(InterestKind::EdgeReadWrite)) => {
                        self.stats.write_stalls += 1;
                        trace!(token = event.token.0, "Waiting for write-readiness");
                    }
                    Ok(_) => {}
                    Err(e) => self.close(event.token, CloseReason::RegisterError(e.to_string())),
                }
            }
            ConnState::Closed(reason) => self.close(event.token, reason),
        }
    }

    /// Accept until the backlog is empty.
    ///
    /// An accept error ends the pass with connections possibly still queued.
    /// The listener is re-armed so the selector reports it again even when it
    /// only delivers edges.
    fn accept_pending(&mut self) {
        let listener = match &self.listener {
            Some(listener) => listener,
            None => return,
        };

        loop {
            let socket = match listener.accept_one() {
                Ok(Accepted::Connection(socket)) => socket,
                Ok(Accepted::WouldBlock) => break,
                Err(e) => {
                    warn!(error = %e, "Accept failed");
                    self.stats.accept_errors += 1;
                    self.handler.on_accept_error(&e);
                    if let Err(e) = self.selector.reregister(
                        listener.as_raw_fd(),
                        LISTENER_TOKEN,
                        InterestKind::LevelReadable,
                    ) {
                        warn!(error = %e, "Failed to re-arm listener");
                    }
                    break;
                }
            };

            self.stats.accepted += 1;
            let peer = socket.peer_addr();

            match self.connections.register(&mut self.selector, socket) {
                Ok(token) => {
                    self.stats.active += 1;
                    debug!(token = token.0, peer = ?peer, "Accepted connection");
                    if let Some(conn) = self.connections.get(token) {
                        self.handler.on_connect(&conn.info());
                    }
                }
                Err(RegisterError::TableFull) => {
                    warn!(
                        peer = ?peer,
                        limit = self.connections.capacity(),
                        "Connection limit reached"
                    );
                    self.stats.rejected += 1;
                }
                Err(e) => {
                    warn!(peer = ?peer, error = %e, "Failed to register connection");
                    self.stats.rejected += 1;
                }
            }
        }
    }

    /// Deregister, then close. Nothing is dispatched for `token` afterwards.
    fn close(&mut self, token: Token, reason: CloseReason) {
        match self.connections.deregister(&mut self.selector, token) {
            Ok(conn) => {
                let info = conn.info();
                drop(conn);
                self.stats.closed += 1;
                self.stats.active -= 1;
                self.handler.on_close(&info, &reason);
            }
            Err(e) => debug!(token = token.0, error = %e, "Close of unknown connection"),
        }
    }

    /// Deregister and close every connection and the listener.
    pub fn close_all(&mut self) {
        if !self.connections.is_empty() {
            debug!(count = self.connections.len(), "Closing open connections");
        }
        for token in self.connections.tokens() {
            self.close(token, CloseReason::Shutdown);
        }

        if let Some(listener) = self.listener.take() {
            if let Err(e) = self.selector.deregister(listener.as_raw_fd()) {
                warn!(error = %e, "Failed to deregister listener");
            }
        }
    }
}

impl<S: Selector, H: Handler> Drop for Reactor<S, H> {
    fn drop(&mut self) {
        self.close_all();
    }
}
