use std::net::SocketAddr;
use std::time::Duration;

use chat_relay_core::EngineConfig;
use clap::Args;
use thiserror::Error;

/// Server flags; each one can also come from the environment.
#[derive(Debug, Clone, Args)]
pub struct ServerArgs {
    /// Address the HTTP/WebSocket listener binds to.
    #[arg(long, env = "CHAT_RELAY_LISTEN_ADDR", default_value = "0.0.0.0:8080")]
    pub listen_addr: String,

    /// Seconds of silence before a named user is reported offline.
    #[arg(long, env = "CHAT_RELAY_LIVENESS_TIMEOUT_SECS", default_value_t = 30)]
    pub liveness_timeout_secs: u64,

    /// Seconds between liveness sweeps.
    #[arg(long, env = "CHAT_RELAY_SWEEP_INTERVAL_SECS", default_value_t = 10)]
    pub sweep_interval_secs: u64,

    /// Outbound events buffered per connection before new ones are dropped.
    #[arg(long, env = "CHAT_RELAY_OUTBOUND_BUFFER", default_value_t = 64)]
    pub outbound_buffer: usize,

    /// Skip presence broadcasts on heartbeats that change nothing.
    #[arg(long, env = "CHAT_RELAY_DEBOUNCE_PRESENCE", default_value_t = false)]
    pub debounce_presence: bool,

    /// Grace period applied during shutdown.
    #[arg(long, env = "CHAT_RELAY_SHUTDOWN_GRACE_SECS", default_value_t = 5)]
    pub shutdown_grace_secs: u64,

    /// Export tracing spans to stdout through OpenTelemetry.
    #[arg(long, env = "CHAT_RELAY_OTEL_STDOUT", default_value_t = false)]
    pub otel_stdout: bool,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub liveness_timeout: Duration,
    pub sweep_interval: Duration,
    pub outbound_buffer: usize,
    pub debounce_presence: bool,
    pub shutdown_grace: Duration,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid listen address {addr}: {source}")]
    ListenAddr {
        addr: String,
        source: std::net::AddrParseError,
    },
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

impl ServerConfig {
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            liveness_timeout: self.liveness_timeout,
            debounce_presence: self.debounce_presence,
        }
    }
}

impl TryFrom<ServerArgs> for ServerConfig {
    type Error = ConfigError;

    fn try_from(args: ServerArgs) -> Result<Self, Self::Error> {
        let listen_addr = args
            .listen_addr
            .parse()
            .map_err(|source| ConfigError::ListenAddr {
                addr: args.listen_addr.clone(),
                source,
            })?;
        if args.liveness_timeout_secs == 0 {
            return Err(ConfigError::Zero("liveness timeout"));
        }
        if args.sweep_interval_secs == 0 {
            return Err(ConfigError::Zero("sweep interval"));
        }
        if args.outbound_buffer == 0 {
            return Err(ConfigError::Zero("outbound buffer"));
        }

        Ok(ServerConfig {
            listen_addr,
            liveness_timeout: Duration::from_secs(args.liveness_timeout_secs),
            sweep_interval: Duration::from_secs(args.sweep_interval_secs),
            outbound_buffer: args.outbound_buffer,
            debounce_presence: args.debounce_presence,
            shutdown_grace: Duration::from_secs(args.shutdown_grace_secs),
        })
    }
}
