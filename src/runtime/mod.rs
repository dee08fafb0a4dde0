//! Single-threaded readiness runtime.
//!
//! Backends (selected by `Config::backend`):
//! - Linux: epoll directly, listener level-triggered, connections edge-triggered
//! - Any unix: mio (epoll/kqueue), edge-triggered throughout
//!
//! Both share the same pieces:
//! - `NonBlockingSocket`: socket creation and accept
//! - `ConnectionRegistry` / `Connection`: registration table and drain state machine
//! - `Reactor`: the wait-and-dispatch loop

mod connection;
mod event_loop;
pub mod selector;
mod signal;
mod socket;
pub mod token;

pub use connection::{ConnState, Connection, ConnectionRegistry, ReadStep};
pub use event_loop::{Reactor, ReactorOptions, ReactorStats, ShutdownHandle};
pub use signal::spawn_signal_listener;
pub use socket::{Accepted, NonBlockingSocket, Role};

use crate::config::{Backend, Config};
use crate::error::SetupError;
use crate::handler::Echo;
use selector::{MioSelector, Selector};
use tracing::info;

/// Run the echo server until SIGINT/SIGTERM.
pub fn run(config: &Config) -> Result<ReactorStats, Box<dyn std::error::Error>> {
    let listener = NonBlockingSocket::create_listener(config.listen, config.backlog)?;
    let options = config.reactor_options();

    info!(
        addr = %listener.local_addr()?,
        backend = ?config.backend,
        "Server listening"
    );

    match config.backend {
        Backend::Epoll => run_epoll(config, listener, options),
        Backend::Mio => {
            let selector = MioSelector::new(config.max_events).map_err(SetupError::Selector)?;
            serve(selector, listener, options)
        }
    }
}

#[cfg(target_os = "linux")]
fn run_epoll(
    config: &Config,
    listener: NonBlockingSocket,
    options: ReactorOptions,
) -> Result<ReactorStats, Box<dyn std::error::Error>> {
    let selector =
        selector::EpollSelector::new(config.max_events).map_err(SetupError::Selector)?;
    serve(selector, listener, options)
}

#[cfg(not(target_os = "linux"))]
fn run_epoll(
    _config: &Config,
    _listener: NonBlockingSocket,
    _options: ReactorOptions,
) -> Result<ReactorStats, Box<dyn std::error::Error>> {
    Err(SetupError::Unsupported("epoll").into())
}

fn serve<S: Selector>(
    selector: S,
    listener: NonBlockingSocket,
    options: ReactorOptions,
) -> Result<ReactorStats, Box<dyn std::error::Error>> {
    let mut reactor = Reactor::new(selector, listener, Echo, options)?;
    // Detached: it only ever sets the shutdown flag.
    let _signals = spawn_signal_listener(reactor.shutdown_handle())?;
    reactor.run()?;
    Ok(reactor.stats())
}
