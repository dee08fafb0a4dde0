//! Per-connection payload handlers.
//!
//! The event loop owns sockets and readiness; a `Handler` only sees bytes.
//! Whatever it appends to `out` is queued and written back on the same
//! connection.

use crate::runtime::token::Token;
use bytes::BytesMut;
use std::io;
use std::net::SocketAddr;
use tracing::{debug, trace};

/// Read-only view of a connection handed to handler callbacks.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionInfo {
    pub token: Token,
    pub peer: Option<SocketAddr>,
    /// Bytes read so far, including the chunk being delivered.
    pub bytes_read: u64,
    pub bytes_written: u64,
}

/// Why a connection left the reactor.
#[derive(Debug)]
pub enum CloseReason {
    /// Peer performed an orderly shutdown (read returned 0).
    EndOfStream,
    ReadError(io::Error),
    WriteError(io::Error),
    /// Interest could not be updated for this connection.
    RegisterError(String),
    /// The reactor is shutting down.
    Shutdown,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseReason::EndOfStream => write!(f, "end of stream"),
            CloseReason::ReadError(e) => write!(f, "read error: {}", e),
            CloseReason::WriteError(e) => write!(f, "write error: {}", e),
            CloseReason::RegisterError(e) => write!(f, "registration error: {}", e),
            CloseReason::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// Capability invoked by the reactor for every connection event.
pub trait Handler {
    /// A connection was accepted and registered.
    fn on_connect(&mut self, _conn: &ConnectionInfo) {}

    /// `data` was read from the connection. Bytes appended to `out` are
    /// written back on the same connection.
    fn on_data(&mut self, conn: &ConnectionInfo, data: &[u8], out: &mut BytesMut);

    /// The connection was deregistered and closed.
    fn on_close(&mut self, _conn: &ConnectionInfo, _reason: &CloseReason) {}

    /// Accepting a pending connection failed.
    fn on_accept_error(&mut self, _error: &io::Error) {}

    /// The bounded wait elapsed without any event.
    fn on_tick(&mut self) {}
}

/// Writes every received byte back unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct Echo;

impl Handler for Echo {
    fn on_connect(&mut self, conn: &ConnectionInfo) {
        debug!(token = conn.token.0, peer = ?conn.peer, "New connection");
    }

    fn on_data(&mut self, conn: &ConnectionInfo, data: &[u8], out: &mut BytesMut) {
        trace!(
            token = conn.token.0,
            len = data.len(),
            data = %String::from_utf8_lossy(data),
            "Received"
        );
        out.extend_from_slice(data);
    }

    fn on_close(&mut self, conn: &ConnectionInfo, reason: &CloseReason) {
        debug!(
            token = conn.token.0,
            bytes_read = conn.bytes_read,
            bytes_written = conn.bytes_written,
            %reason,
            "Connection closed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info() -> ConnectionInfo {
        ConnectionInfo {
            token: Token::connection(0, 0),
            peer: None,
            bytes_read: 5,
            bytes_written: 0,
        }
    }

    #[test]
    fn test_echo_copies_input() {
        let mut out = BytesMut::new();
        Echo.on_data(&info(), b"hello", &mut out);
        assert_eq!(&out[..], b"hello");

        Echo.on_data(&info(), b" world", &mut out);
        assert_eq!(&out[..], b"hello world");
    }

    #[test]
    fn test_close_reason_display() {
        assert_eq!(CloseReason::EndOfStream.to_string(), "end of stream");
        let reason = CloseReason::ReadError(io::Error::from(io::ErrorKind::ConnectionReset));
        assert!(reason.to_string().starts_with("read error"));
    }
}
