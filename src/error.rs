//! Error types for reactor setup and interest registration.
//!
//! Per-connection I/O failures stay plain `std::io::Error`: they never
//! leave the dispatch loop, which turns them into a close.

use std::io;
use std::net::SocketAddr;
use std::os::unix::io::RawFd;

/// Fatal errors raised while bringing the server up.
#[derive(Debug)]
pub enum SetupError {
    /// Creating the socket or switching it to non-blocking mode failed.
    Socket(io::Error),
    /// The bind address is unavailable.
    Bind(SocketAddr, io::Error),
    /// The listen backlog could not be established.
    Listen(i32, io::Error),
    /// A backlog below 1 was requested.
    InvalidBacklog(i32),
    /// The readiness-notification facility could not be created.
    Selector(io::Error),
    /// The listener could not be registered with the selector.
    Register(RegisterError),
    /// The requested backend is not available on this platform.
    Unsupported(&'static str),
}

impl std::fmt::Display for SetupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SetupError::Socket(e) => write!(f, "Failed to create socket: {}", e),
            SetupError::Bind(addr, e) => write!(f, "Failed to bind {}: {}", addr, e),
            SetupError::Listen(backlog, e) => {
                write!(f, "Failed to listen with backlog {}: {}", backlog, e)
            }
            SetupError::InvalidBacklog(backlog) => {
                write!(f, "Invalid backlog {}: must be at least 1", backlog)
            }
            SetupError::Selector(e) => write!(f, "Failed to create selector: {}", e),
            SetupError::Register(e) => write!(f, "Failed to register listener: {}", e),
            SetupError::Unsupported(backend) => {
                write!(f, "Backend '{}' is not supported on this platform", backend)
            }
        }
    }
}

impl std::error::Error for SetupError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SetupError::Socket(e)
            | SetupError::Bind(_, e)
            | SetupError::Listen(_, e)
            | SetupError::Selector(e) => Some(e),
            SetupError::Register(e) => Some(e),
            SetupError::InvalidBacklog(_) | SetupError::Unsupported(_) => None,
        }
    }
}

impl From<RegisterError> for SetupError {
    fn from(e: RegisterError) -> Self {
        SetupError::Register(e)
    }
}

/// Failure to add interest for a descriptor.
#[derive(Debug)]
pub enum RegisterError {
    /// The descriptor already has an active registration.
    AlreadyRegistered(RawFd),
    /// The registration table is full.
    TableFull,
    /// Any other OS-level failure (closed descriptor, out of memory, ...).
    Os(RawFd, io::Error),
}

impl RegisterError {
    pub(crate) fn from_io(fd: RawFd, e: io::Error) -> Self {
        if e.raw_os_error() == Some(libc::EEXIST) || e.kind() == io::ErrorKind::AlreadyExists {
            RegisterError::AlreadyRegistered(fd)
        } else {
            RegisterError::Os(fd, e)
        }
    }
}

impl std::fmt::Display for RegisterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegisterError::AlreadyRegistered(fd) => write!(f, "fd {} is already registered", fd),
            RegisterError::TableFull => write!(f, "registration table is full"),
            RegisterError::Os(fd, e) => write!(f, "failed to register fd {}: {}", fd, e),
        }
    }
}

impl std::error::Error for RegisterError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RegisterError::Os(_, e) => Some(e),
            _ => None,
        }
    }
}

/// Failure to remove interest for a descriptor. Reported, never fatal.
#[derive(Debug)]
pub enum DeregisterError {
    /// No active registration exists for this descriptor or token.
    NotRegistered,
    /// The OS refused the removal.
    Os(RawFd, io::Error),
}

impl DeregisterError {
    pub(crate) fn from_io(fd: RawFd, e: io::Error) -> Self {
        if e.raw_os_error() == Some(libc::ENOENT) || e.kind() == io::ErrorKind::NotFound {
            DeregisterError::NotRegistered
        } else {
            DeregisterError::Os(fd, e)
        }
    }
}

impl std::fmt::Display for DeregisterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeregisterError::NotRegistered => write!(f, "descriptor is not registered"),
            DeregisterError::Os(fd, e) => write!(f, "failed to deregister fd {}: {}", fd, e),
        }
    }
}

impl std::error::Error for DeregisterError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DeregisterError::Os(_, e) => Some(e),
            DeregisterError::NotRegistered => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_error_classification() {
        let exists = io::Error::from_raw_os_error(libc::EEXIST);
        assert!(matches!(
            RegisterError::from_io(7, exists),
            RegisterError::AlreadyRegistered(7)
        ));

        let bad = io::Error::from_raw_os_error(libc::EBADF);
        assert!(matches!(RegisterError::from_io(7, bad), RegisterError::Os(7, _)));
    }

    #[test]
    fn test_deregister_error_classification() {
        let missing = io::Error::from_raw_os_error(libc::ENOENT);
        assert!(matches!(
            DeregisterError::from_io(3, missing),
            DeregisterError::NotRegistered
        ));
    }

    #[test]
    fn test_setup_error_display() {
        let addr: SocketAddr = "127.0.0.1:8080".parse().unwrap();
        let err = SetupError::Bind(addr, io::Error::from(io::ErrorKind::AddrInUse));
        assert!(err.to_string().starts_with("Failed to bind 127.0.0.1:8080"));
    }
}
