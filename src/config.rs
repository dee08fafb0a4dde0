//! Configuration module for edge-echo.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use crate::runtime::ReactorOptions;
use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Readiness backend driving the reactor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// epoll via libc, Linux only
    Epoll,
    /// mio (epoll on Linux, kqueue on macOS)
    Mio,
}

impl Default for Backend {
    fn default() -> Self {
        if cfg!(target_os = "linux") {
            Backend::Epoll
        } else {
            Backend::Mio
        }
    }
}

/// Command-line arguments for the echo server
#[derive(Parser, Debug)]
#[command(name = "edge-echo")]
#[command(version = "0.1.0")]
#[command(about = "A single-threaded readiness-driven TCP echo server", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 0.0.0.0:8080)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Listen backlog
    #[arg(short = 'b', long)]
    pub backlog: Option<i32>,

    /// Readiness backend
    #[arg(long, value_enum)]
    pub backend: Option<Backend>,

    /// Read buffer size in bytes
    #[arg(long)]
    pub buffer_size: Option<usize>,

    /// Maximum events returned per wait
    #[arg(long)]
    pub max_events: Option<usize>,

    /// Maximum concurrent connections
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Queued output per connection before reads pause
    #[arg(long)]
    pub max_outbound: Option<usize>,

    /// Bound each wait to this many milliseconds (default: wait indefinitely)
    #[arg(long)]
    pub tick_ms: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub reactor: ReactorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_backlog")]
    pub backlog: i32,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            backlog: default_backlog(),
            max_connections: default_max_connections(),
        }
    }
}

/// Reactor tuning
#[derive(Debug, Deserialize)]
pub struct ReactorConfig {
    #[serde(default)]
    pub backend: Backend,
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    #[serde(default = "default_max_events")]
    pub max_events: usize,
    #[serde(default = "default_max_outbound")]
    pub max_outbound: usize,
    /// Wait bound in milliseconds; absent means wait indefinitely
    pub tick_ms: Option<u64>,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            buffer_size: default_buffer_size(),
            max_events: default_max_events(),
            max_outbound: default_max_outbound(),
            tick_ms: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_backlog() -> i32 {
    10
}

fn default_max_connections() -> usize {
    1024
}

fn default_buffer_size() -> usize {
    1024
}

fn default_max_events() -> usize {
    10
}

fn default_max_outbound() -> usize {
    1024 * 1024 // 1 MB
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: SocketAddr,
    pub backlog: i32,
    pub backend: Backend,
    pub buffer_size: usize,
    pub max_events: usize,
    pub max_connections: usize,
    pub max_outbound: usize,
    pub tick: Option<Duration>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        Self::resolve(CliArgs::parse())
    }

    /// Merge parsed CLI args with the TOML file they point to.
    pub fn resolve(cli: CliArgs) -> Result<Self, ConfigError> {
        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Self::merge(cli, toml_config)
    }

    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let listen = cli.listen.unwrap_or(toml_config.server.listen);
        let listen: SocketAddr = listen
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("invalid listen address '{}'", listen)))?;

        let config = Config {
            listen,
            backlog: cli.backlog.unwrap_or(toml_config.server.backlog),
            backend: cli.backend.unwrap_or(toml_config.reactor.backend),
            buffer_size: cli.buffer_size.unwrap_or(toml_config.reactor.buffer_size),
            max_events: cli.max_events.unwrap_or(toml_config.reactor.max_events),
            max_connections: cli
                .max_connections
                .unwrap_or(toml_config.server.max_connections),
            max_outbound: cli.max_outbound.unwrap_or(toml_config.reactor.max_outbound),
            tick: cli
                .tick_ms
                .or(toml_config.reactor.tick_ms)
                .map(Duration::from_millis),
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.backlog < 1 {
            return Err(ConfigError::Invalid(format!(
                "backlog must be at least 1, got {}",
                self.backlog
            )));
        }
        for (name, value) in [
            ("buffer_size", self.buffer_size),
            ("max_events", self.max_events),
            ("max_connections", self.max_connections),
            ("max_outbound", self.max_outbound),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{} must be non-zero", name)));
            }
        }
        Ok(())
    }

    pub fn reactor_options(&self) -> ReactorOptions {
        ReactorOptions {
            buffer_size: self.buffer_size,
            max_connections: self.max_connections,
            max_outbound: self.max_outbound,
            tick: self.tick,
        }
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> CliArgs {
        let mut argv = vec!["edge-echo"];
        argv.extend_from_slice(args);
        CliArgs::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert_eq!(config.server.listen, "0.0.0.0:8080");
        assert_eq!(config.server.backlog, 10);
        assert_eq!(config.reactor.buffer_size, 1024);
        assert_eq!(config.reactor.max_events, 10);
        assert_eq!(config.reactor.tick_ms, None);
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            listen = "127.0.0.1:9000"
            backlog = 128

            [reactor]
            backend = "mio"
            buffer_size = 4096
            tick_ms = 500

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.listen, "127.0.0.1:9000");
        assert_eq!(config.server.backlog, 128);
        assert_eq!(config.reactor.backend, Backend::Mio);
        assert_eq!(config.reactor.buffer_size, 4096);
        assert_eq!(config.reactor.tick_ms, Some(500));
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_cli_overrides_file() {
        let file: TomlConfig = toml::from_str(
            r#"
            [server]
            listen = "127.0.0.1:9000"
            [reactor]
            buffer_size = 4096
        "#,
        )
        .unwrap();

        let config =
            Config::merge(cli(&["-l", "127.0.0.1:7000", "--tick-ms", "50"]), file).unwrap();
        assert_eq!(config.listen, "127.0.0.1:7000".parse().unwrap());
        assert_eq!(config.buffer_size, 4096);
        assert_eq!(config.tick, Some(Duration::from_millis(50)));
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            Config::merge(cli(&["--backlog", "0"]), TomlConfig::default()),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            Config::merge(cli(&["-l", "not-an-address"]), TomlConfig::default()),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            Config::merge(cli(&["--buffer-size", "0"]), TomlConfig::default()),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_backend_from_cli() {
        let config = Config::merge(cli(&["--backend", "mio"]), TomlConfig::default()).unwrap();
        assert_eq!(config.backend, Backend::Mio);
        assert_eq!(config.reactor_options().max_connections, 1024);
    }
}
