//! Connection state machine and registration table.
//!
//! A connection is drained on every readable edge until the socket reports
//! would-block: that is the only way back to `Open`. Output produced by the
//! handler goes to a per-connection queue; whatever the socket does not take
//! right away stays queued and the registration is upgraded to
//! write-readiness until it is flushed.
//!
//! The registry owns every registered socket. A socket only comes back out
//! through `ConnectionRegistry::deregister`, so a descriptor cannot be
//! closed while the selector still references it.

use crate::error::{DeregisterError, RegisterError};
use crate::handler::{CloseReason, ConnectionInfo, Handler};
use crate::runtime::selector::{InterestKind, Selector};
use crate::runtime::socket::NonBlockingSocket;
use crate::runtime::token::{Token, MAX_INDEX};
use bytes::{Buf, BytesMut};
use slab::Slab;
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use tracing::warn;

/// Result of one read attempt.
#[derive(Debug)]
pub enum ReadStep {
    /// `n > 0` bytes landed in the buffer.
    Data(usize),
    /// Nothing more available until the next edge.
    WouldBlock,
    /// The peer shut down its side (read returned 0).
    EndOfStream,
    Failed(io::Error),
}

/// Where a connection stands after handling an event.
#[derive(Debug)]
pub enum ConnState {
    /// Still registered, waiting for the next notification.
    Open,
    /// Must be deregistered and closed.
    Closed(CloseReason),
}

/// A registered client connection.
#[derive(Debug)]
pub struct Connection {
    socket: NonBlockingSocket,
    token: Token,
    /// Interest currently held by the selector.
    interest: InterestKind,
    /// Handler output not yet accepted by the socket.
    outbound: BytesMut,
    /// Reading stopped before would-block because `outbound` was full.
    reads_paused: bool,
    bytes_read: u64,
    bytes_written: u64,
}

impl Connection {
    fn new(socket: NonBlockingSocket, token: Token) -> Self {
        Self {
            socket,
            token,
            interest: InterestKind::EdgeReadable,
            outbound: BytesMut::new(),
            reads_paused: false,
            bytes_read: 0,
            bytes_written: 0,
        }
    }

    pub fn token(&self) -> Token {
        self.token
    }

    /// Number of queued bytes waiting for write-readiness.
    pub fn pending(&self) -> usize {
        self.outbound.len()
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            token: self.token,
            peer: self.socket.peer_addr(),
            bytes_read: self.bytes_read,
            bytes_written: self.bytes_written,
        }
    }

    /// Interest the selector should hold given the queue state.
    pub fn desired_interest(&self) -> InterestKind {
        if self.outbound.is_empty() {
            InterestKind::EdgeReadable
        } else {
            InterestKind::EdgeReadWrite
        }
    }

    /// Attempt a single read into `buf`.
    pub fn read_step(&mut self, buf: &mut [u8]) -> ReadStep {
        match self.socket.read(buf) {
            Ok(0) => ReadStep::EndOfStream,
            Ok(n) => {
                self.bytes_read += n as u64;
                ReadStep::Data(n)
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => ReadStep::WouldBlock,
            Err(e) => ReadStep::Failed(e),
        }
    }

    /// Handle a readable edge: read until would-block, passing each chunk to
    /// `handler` and flushing its output as we go.
    ///
    /// Stops early only when the queue reaches `max_outbound`; `on_writable`
    /// resumes the drain once the queue shrinks.
    pub fn drain<H: Handler>(
        &mut self,
        buf: &mut [u8],
        handler: &mut H,
        max_outbound: usize,
    ) -> ConnState {
        self.reads_paused = false;

        loop {
            if self.outbound.len() >= max_outbound {
                self.reads_paused = true;
                return ConnState::Open;
            }

            match self.read_step(buf) {
                ReadStep::Data(n) => {
                    let info = self.info();
                    handler.on_data(&info, &buf[..n], &mut self.outbound);
                    if let Err(e) = self.flush() {
                        return ConnState::Closed(CloseReason::WriteError(e));
                    }
                }
                ReadStep::WouldBlock => return ConnState::Open,
                ReadStep::EndOfStream => return ConnState::Closed(CloseReason::EndOfStream),
                ReadStep::Failed(e) => return ConnState::Closed(CloseReason::ReadError(e)),
            }
        }
    }

    /// Handle a writable edge: flush the queue and resume a paused drain.
    pub fn on_writable<H: Handler>(
        &mut self,
        buf: &mut [u8],
        handler: &mut H,
        max_outbound: usize,
    ) -> ConnState {
        if let Err(e) = self.flush() {
            return ConnState::Closed(CloseReason::WriteError(e));
        }

        if self.reads_paused && self.outbound.len() < max_outbound {
            return self.drain(buf, handler, max_outbound);
        }

        ConnState::Open
    }

    /// Write queued output until it is gone or the socket would block.
    pub fn flush(&mut self) -> io::Result<()> {
        while !self.outbound.is_empty() {
            match self.socket.write(&self.outbound) {
                Ok(0) => {
                    return Err(io::Error::new(io::ErrorKind::WriteZero, "write returned 0"));
                }
                Ok(n) => {
                    self.outbound.advance(n);
                    self.bytes_written += n as u64;
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

impl AsRawFd for Connection {
    fn as_raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }
}

/// Table of registered connections keyed by token.
///
/// Slots are reused by the slab; each reuse bumps the slot's generation so
/// tokens of closed connections never match a live one.
pub struct ConnectionRegistry {
    connections: Slab<Connection>,
    generations: Vec<u32>,
    max_connections: usize,
}

impl ConnectionRegistry {
    pub fn new(max_connections: usize) -> Self {
        let max_connections = max_connections.min(MAX_INDEX + 1);
        Self {
            connections: Slab::with_capacity(max_connections),
            generations: Vec::with_capacity(max_connections),
            max_connections,
        }
    }

    /// Register `socket` for edge-triggered reads and take ownership of it.
    ///
    /// On failure the socket is dropped, which is safe because it never
    /// became registered.
    pub fn register<S: Selector>(
        &mut self,
        selector: &mut S,
        socket: NonBlockingSocket,
    ) -> Result<Token, RegisterError> {
        if self.connections.len() >= self.max_connections {
            return Err(RegisterError::TableFull);
        }

        let entry = self.connections.vacant_entry();
        let index = entry.key();
        if index >= self.generations.len() {
            self.generations.resize(index + 1, 0);
        }
        let token = Token::connection(index, self.generations[index]);

        selector.register(socket.as_raw_fd(), token, InterestKind::EdgeReadable)?;
        entry.insert(Connection::new(socket, token));
        Ok(token)
    }

    /// Sync the selector with the connection's queue state.
    ///
    /// Returns the new interest when it changed.
    pub fn update_interest<S: Selector>(
        &mut self,
        selector: &mut S,
        token: Token,
    ) -> Result<Option<InterestKind>, RegisterError> {
        let conn = match self.get_mut(token) {
            Some(conn) => conn,
            None => return Ok(None),
        };

        let desired = conn.desired_interest();
        if desired == conn.interest {
            return Ok(None);
        }

        selector.reregister(conn.as_raw_fd(), token, desired)?;
        conn.interest = desired;
        Ok(Some(desired))
    }

    /// Remove interest for `token` and hand the connection back.
    ///
    /// Dropping the returned value closes the socket. A selector failure is
    /// logged and the connection is still released.
    pub fn deregister<S: Selector>(
        &mut self,
        selector: &mut S,
        token: Token,
    ) -> Result<Connection, DeregisterError> {
        if !self.contains(token) {
            return Err(DeregisterError::NotRegistered);
        }

        let index = token.index();
        let conn = self.connections.remove(index);
        self.generations[index] = self.generations[index].wrapping_add(1);

        if let Err(e) = selector.deregister(conn.as_raw_fd()) {
            warn!(token = token.0, error = %e, "Deregister failed");
        }
        Ok(conn)
    }

    /// Look up a live connection. Stale tokens return `None`.
    pub fn get_mut(&mut self, token: Token) -> Option<&mut Connection> {
        self.connections
            .get_mut(token.index())
            .filter(|conn| conn.token == token)
    }

    pub fn get(&self, token: Token) -> Option<&Connection> {
        self.connections
            .get(token.index())
            .filter(|conn| conn.token == token)
    }

    pub fn contains(&self, token: Token) -> bool {
        self.get(token).is_some()
    }

    /// Tokens of every live connection.
    pub fn tokens(&self) -> Vec<Token> {
        self.connections.iter().map(|(_, conn)| conn.token).collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.max_connections
    }
}
