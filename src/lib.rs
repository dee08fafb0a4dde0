//! edge-echo: a single-threaded readiness-driven TCP echo server.
//!
//! One thread accepts and serves every connection:
//! - Non-blocking sockets only, set before any registration
//! - Listener registered level-triggered, connections edge-triggered
//! - Connections drained until would-block on every notification
//! - Short writes queued and retried on write-readiness
//!
//! Payload handling is pluggable through [`handler::Handler`]; the default
//! [`handler::Echo`] writes every byte back.

pub mod config;
pub mod error;
pub mod handler;
pub mod runtime;

pub use handler::{CloseReason, ConnectionInfo, Echo, Handler};
pub use runtime::{NonBlockingSocket, Reactor, ReactorOptions, ReactorStats, ShutdownHandle};
