//! edge-echo: a single-threaded TCP echo server
//!
//! Features:
//! - One reactor thread, epoll (Linux) or mio (epoll/kqueue) readiness
//! - Edge-triggered connections drained to would-block
//! - Queued writes with backpressure
//! - Graceful shutdown on SIGINT/SIGTERM
//! - Configuration via CLI arguments or TOML file

use edge_echo::config::Config;
use edge_echo::runtime;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        listen = %config.listen,
        backlog = config.backlog,
        backend = ?config.backend,
        buffer_size = config.buffer_size,
        max_connections = config.max_connections,
        "Starting edge-echo server"
    );

    let stats = runtime::run(&config)?;

    info!(
        accepted = stats.accepted,
        rejected = stats.rejected,
        accept_errors = stats.accept_errors,
        closed = stats.closed,
        active = stats.active,
        bytes_read = stats.bytes_read,
        bytes_written = stats.bytes_written,
        write_stalls = stats.write_stalls,
        "Shutdown complete"
    );
    Ok(())
}
