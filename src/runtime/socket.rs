//! Non-blocking socket handles.
//!
//! Every descriptor this module hands out is already in non-blocking mode,
//! so the wait call in the event loop stays the only place the thread can
//! block. Dropping a handle closes its descriptor exactly once.

use crate::error::SetupError;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::os::unix::io::{AsRawFd, RawFd};

/// What a socket is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Bound, listening endpoint.
    Listener,
    /// One accepted client connection.
    Connection,
}

/// Outcome of a single accept attempt.
#[derive(Debug)]
pub enum Accepted {
    /// A new connection, already non-blocking.
    Connection(NonBlockingSocket),
    /// No pending connection right now.
    WouldBlock,
}

/// Owning handle for a socket descriptor in non-blocking mode.
#[derive(Debug)]
pub struct NonBlockingSocket {
    socket: Socket,
    role: Role,
    peer: Option<SocketAddr>,
}

impl NonBlockingSocket {
    /// Create a listening socket bound to `addr`.
    ///
    /// Non-blocking mode is set before the socket is bound, so the returned
    /// listener never blocks in accept.
    pub fn create_listener(addr: SocketAddr, backlog: i32) -> Result<Self, SetupError> {
        if backlog < 1 {
            return Err(SetupError::InvalidBacklog(backlog));
        }

        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
            .map_err(SetupError::Socket)?;
        socket.set_nonblocking(true).map_err(SetupError::Socket)?;
        socket.set_reuse_address(true).map_err(SetupError::Socket)?;
        socket
            .bind(&SockAddr::from(addr))
            .map_err(|e| SetupError::Bind(addr, e))?;
        socket
            .listen(backlog)
            .map_err(|e| SetupError::Listen(backlog, e))?;

        Ok(Self {
            socket,
            role: Role::Listener,
            peer: None,
        })
    }

    /// Accept one pending connection.
    ///
    /// Interrupted and aborted handshakes are retried. Any other error is
    /// returned to the caller, which is expected to log it and move on.
    pub fn accept_one(&self) -> io::Result<Accepted> {
        debug_assert_eq!(self.role, Role::Listener);

        loop {
            match self.socket.accept() {
                Ok((socket, addr)) => {
                    socket.set_nonblocking(true)?;
                    return Ok(Accepted::Connection(Self {
                        socket,
                        role: Role::Connection,
                        peer: addr.as_socket(),
                    }));
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(Accepted::WouldBlock);
                }
                Err(ref e)
                    if e.kind() == io::ErrorKind::Interrupted
                        || e.kind() == io::ErrorKind::ConnectionAborted =>
                {
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Read available bytes. `Ok(0)` is end-of-stream, never "no data yet".
    pub fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match (&self.socket).read(buf) {
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                result => return result,
            }
        }
    }

    /// Write as much of `buf` as the socket accepts right now.
    pub fn write(&self, buf: &[u8]) -> io::Result<usize> {
        loop {
            match (&self.socket).write(buf) {
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                result => return result,
            }
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Remote address of an accepted connection.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()?.as_socket().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidData, "socket has no inet address")
        })
    }

    /// Check the descriptor's `O_NONBLOCK` flag.
    pub fn is_nonblocking(&self) -> io::Result<bool> {
        self.socket.nonblocking()
    }
}

impl AsRawFd for NonBlockingSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpStream;

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[test]
    fn test_listener_is_nonblocking() {
        let listener = NonBlockingSocket::create_listener(loopback(), 10).unwrap();
        assert_eq!(listener.role(), Role::Listener);
        assert!(listener.is_nonblocking().unwrap());
        assert_ne!(listener.local_addr().unwrap().port(), 0);
    }

    #[test]
    fn test_accept_empty_backlog_would_block() {
        let listener = NonBlockingSocket::create_listener(loopback(), 10).unwrap();
        assert!(matches!(listener.accept_one().unwrap(), Accepted::WouldBlock));
    }

    #[test]
    fn test_accepted_connection_is_nonblocking() {
        let listener = NonBlockingSocket::create_listener(loopback(), 10).unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();

        let conn = match listener.accept_one().unwrap() {
            Accepted::Connection(conn) => conn,
            Accepted::WouldBlock => panic!("connection should be pending"),
        };
        assert_eq!(conn.role(), Role::Connection);
        assert!(conn.is_nonblocking().unwrap());
        assert_eq!(conn.peer_addr(), Some(client.local_addr().unwrap()));

        // Nothing sent yet: would-block, not end-of-stream.
        let mut buf = [0u8; 16];
        let err = conn.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);

        drop(client);
        let mut eof = false;
        for _ in 0..100 {
            match conn.read(&mut buf) {
                Ok(0) => {
                    eof = true;
                    break;
                }
                Ok(n) => panic!("unexpected {} bytes", n),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    std::thread::sleep(std::time::Duration::from_millis(5));
                }
                Err(e) => panic!("read failed: {}", e),
            }
        }
        assert!(eof, "peer close should read as end-of-stream");
    }

    #[test]
    fn test_invalid_backlog() {
        assert!(matches!(
            NonBlockingSocket::create_listener(loopback(), 0),
            Err(SetupError::InvalidBacklog(0))
        ));
    }

    #[test]
    fn test_bind_conflict() {
        let first = NonBlockingSocket::create_listener(loopback(), 10).unwrap();
        let taken = first.local_addr().unwrap();
        assert!(matches!(
            NonBlockingSocket::create_listener(taken, 10),
            Err(SetupError::Bind(addr, _)) if addr == taken
        ));
    }
}
