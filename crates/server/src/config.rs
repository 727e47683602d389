//! Server configuration.
//!
//! [`Cli`] is the command line surface, with environment fallbacks:
//!
//! ```bash
//! reactor-server --port 1316 --trigger-mode 3 --timeout-ms 60000 --workers 6
//! REACTOR_PORT=8080 REACTOR_WORKERS=2 reactor-server
//! ```
//!
//! It is validated and turned into a [`ServerConfig`], which is what the library
//! consumes.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing::Level;

use crate::error::ServerError;
use crate::poller::Trigger;

pub const DEFAULT_PORT: u16 = 1316;
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_WORKERS: usize = 6;
pub const DEFAULT_MAX_CONNECTIONS: usize = 65536;

/// Where read and write tasks run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Dispatch {
    /// on the reactor thread
    Inline,
    /// on the worker pool
    Pool,
}

/// Trigger modes of the listening socket and of accepted sockets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerModes {
    pub listener: Trigger,
    pub client: Trigger,
}

impl TriggerModes {
    /// Decodes the command line bitmask: bit 0 makes client sockets
    /// edge-triggered, bit 1 the listening socket.
    pub fn from_mask(mask: u8) -> Option<Self> {
        if mask > 3 {
            return None;
        }
        let pick = |bit: u8| if mask & bit != 0 { Trigger::Edge } else { Trigger::Level };
        Some(Self { listener: pick(0b10), client: pick(0b01) })
    }
}

impl Default for TriggerModes {
    fn default() -> Self {
        Self { listener: Trigger::Edge, client: Trigger::Edge }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub triggers: TriggerModes,
    /// `None` disables idle eviction
    pub idle_timeout: Option<Duration>,
    /// how long connections may finish in-flight work after shutdown starts
    pub linger: Option<Duration>,
    pub workers: usize,
    pub max_connections: usize,
    /// defaults to the pool for edge-triggered clients, inline otherwise
    pub dispatch: Option<Dispatch>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            triggers: TriggerModes::default(),
            idle_timeout: Some(DEFAULT_IDLE_TIMEOUT),
            linger: None,
            workers: DEFAULT_WORKERS,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            dispatch: None,
        }
    }
}

impl ServerConfig {
    pub fn dispatch(&self) -> Dispatch {
        self.dispatch.unwrap_or(match self.triggers.client {
            Trigger::Edge => Dispatch::Pool,
            Trigger::Level => Dispatch::Inline,
        })
    }

    pub fn validate(&self) -> Result<(), ServerError> {
        if self.workers == 0 && self.dispatch() == Dispatch::Pool {
            return Err(ServerError::invalid_config("workers must be >= 1"));
        }
        if self.max_connections == 0 {
            return Err(ServerError::invalid_config("max connections must be >= 1"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Parser)]
#[command(name = "reactor-server")]
#[command(about = "An epoll reactor http server serving static files")]
#[command(version)]
pub struct Cli {
    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0", env = "REACTOR_HOST")]
    pub host: IpAddr,

    /// Port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "REACTOR_PORT")]
    pub port: u16,

    /// Trigger mode bitmask: bit 0 = edge-triggered clients, bit 1 = edge-triggered listener
    #[arg(short = 'm', long = "trigger-mode", default_value_t = 3, env = "REACTOR_TRIGGER_MODE")]
    pub trigger_mode: u8,

    /// Idle connection timeout in milliseconds, 0 disables eviction
    #[arg(long = "timeout-ms", default_value_t = 60_000, env = "REACTOR_TIMEOUT_MS")]
    pub timeout_ms: u64,

    /// Let open connections finish their work on shutdown
    #[arg(long, env = "REACTOR_LINGER")]
    pub linger: bool,

    /// Upper bound of the shutdown linger in milliseconds
    #[arg(long = "linger-ms", default_value_t = 1_000, env = "REACTOR_LINGER_MS")]
    pub linger_ms: u64,

    /// Number of worker threads
    #[arg(short, long, default_value_t = DEFAULT_WORKERS, env = "REACTOR_WORKERS")]
    pub workers: usize,

    /// Maximum number of open connections
    #[arg(long = "max-connections", default_value_t = DEFAULT_MAX_CONNECTIONS, env = "REACTOR_MAX_CONNECTIONS")]
    pub max_connections: usize,

    /// Override where tasks run
    #[arg(long, value_enum, env = "REACTOR_DISPATCH")]
    pub dispatch: Option<Dispatch>,

    /// Directory served as static files
    #[arg(long, default_value = "./resources", env = "REACTOR_ROOT")]
    pub root: PathBuf,

    /// Maximum log level
    #[arg(long = "log-level", default_value_t = Level::INFO, env = "REACTOR_LOG_LEVEL")]
    pub log_level: Level,
}

impl Cli {
    pub fn validate(&self) -> Result<(), ServerError> {
        if self.workers == 0 {
            return Err(ServerError::invalid_config("workers must be >= 1"));
        }
        if self.max_connections == 0 {
            return Err(ServerError::invalid_config("max connections must be >= 1"));
        }
        if self.trigger_mode > 3 {
            return Err(ServerError::invalid_config(format!("trigger mode must be 0-3, got {}", self.trigger_mode)));
        }
        Ok(())
    }

    pub fn server_config(&self) -> Result<ServerConfig, ServerError> {
        self.validate()?;

        let triggers = TriggerModes::from_mask(self.trigger_mode)
            .ok_or_else(|| ServerError::invalid_config(format!("trigger mode must be 0-3, got {}", self.trigger_mode)))?;

        Ok(ServerConfig {
            addr: SocketAddr::new(self.host, self.port),
            triggers,
            idle_timeout: (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms)),
            linger: self.linger.then(|| Duration::from_millis(self.linger_ms)),
            workers: self.workers,
            max_connections: self.max_connections,
            dispatch: self.dispatch,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("reactor-server").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn defaults() {
        let config = parse(&[]).server_config().unwrap();
        assert_eq!(config.addr.port(), DEFAULT_PORT);
        assert_eq!(config.triggers, TriggerModes { listener: Trigger::Edge, client: Trigger::Edge });
        assert_eq!(config.idle_timeout, Some(DEFAULT_IDLE_TIMEOUT));
        assert_eq!(config.linger, None);
        assert_eq!(config.workers, 6);
        assert_eq!(config.dispatch(), Dispatch::Pool);
    }

    #[test]
    fn trigger_mask_bits() {
        use Trigger::{Edge, Level};
        assert_eq!(TriggerModes::from_mask(0), Some(TriggerModes { listener: Level, client: Level }));
        assert_eq!(TriggerModes::from_mask(1), Some(TriggerModes { listener: Level, client: Edge }));
        assert_eq!(TriggerModes::from_mask(2), Some(TriggerModes { listener: Edge, client: Level }));
        assert_eq!(TriggerModes::from_mask(3), Some(TriggerModes { listener: Edge, client: Edge }));
        assert_eq!(TriggerModes::from_mask(4), None);
    }

    #[test]
    fn level_clients_default_to_inline() {
        let config = parse(&["--trigger-mode", "2"]).server_config().unwrap();
        assert_eq!(config.dispatch(), Dispatch::Inline);

        let config = parse(&["--trigger-mode", "2", "--dispatch", "pool"]).server_config().unwrap();
        assert_eq!(config.dispatch(), Dispatch::Pool);
    }

    #[test]
    fn zero_timeout_disables_eviction() {
        let config = parse(&["--timeout-ms", "0", "--linger", "--linger-ms", "250"]).server_config().unwrap();
        assert_eq!(config.idle_timeout, None);
        assert_eq!(config.linger, Some(Duration::from_millis(250)));
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(matches!(parse(&["--workers", "0"]).validate(), Err(ServerError::InvalidConfig { .. })));
        assert!(matches!(parse(&["--max-connections", "0"]).validate(), Err(ServerError::InvalidConfig { .. })));
        assert!(matches!(parse(&["--trigger-mode", "7"]).server_config(), Err(ServerError::InvalidConfig { .. })));
    }
}
