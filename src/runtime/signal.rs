//! Shutdown on SIGINT/SIGTERM.
//!
//! The reactor thread never touches signals. A small tokio current-thread
//! runtime on its own thread waits for one and flips the reactor's
//! shutdown handle.

use crate::runtime::ShutdownHandle;
use std::io;
use std::thread;
use tokio::signal::unix::{signal, SignalKind};
use tracing::info;

/// Install SIGINT/SIGTERM handlers and wait for them on a background thread.
///
/// Handlers are installed before this returns, so a signal arriving while
/// the reactor starts up is not lost.
pub fn spawn_signal_listener(handle: ShutdownHandle) -> io::Result<thread::JoinHandle<()>> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let (mut interrupt, mut terminate) = {
        let _guard = runtime.enter();
        (
            signal(SignalKind::interrupt())?,
            signal(SignalKind::terminate())?,
        )
    };

    thread::Builder::new()
        .name("signals".to_string())
        .spawn(move || {
            let name = runtime.block_on(async {
                tokio::select! {
                    _ = interrupt.recv() => "SIGINT",
                    _ = terminate.recv() => "SIGTERM",
                }
            });
            info!(signal = name, "Shutdown requested");
            handle.shutdown();
        })
}
