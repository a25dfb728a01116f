//! Configuration (C10): layered CLI-arguments-over-environment-over-defaults,
//! following the same `clap` derive pattern this codebase's binaries use.

use clap::Parser;

/// Server configuration, resolved from CLI flags with environment
/// variable fallbacks of the same name.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Dependency-ordered task dispatch server", long_about = None)]
pub struct ServerConfig {
    /// Bind address for the socket server.
    #[arg(long, env = "BOLT_SERVER_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// TCP port for the socket server.
    #[arg(long, env = "BOLT_SERVER_PORT", default_value_t = 5200)]
    pub port: u16,

    /// Listen backlog for incoming connections.
    #[arg(long, env = "BOLT_SERVER_CONNECTION_WAIT_QUEUE", default_value_t = 100)]
    pub connection_wait_queue: u32,

    /// Period, in milliseconds, between automatic `cycle_tasks()` ticks.
    #[arg(long, env = "BOLT_CYCLE_INTERVAL_MS", default_value_t = 250)]
    pub cycle_interval_ms: u64,

    /// Path for the detailed log sink, or "stderr". Defaults to a
    /// daily-rolling file in the working directory when unset.
    #[arg(long, env = "BOLT_LOG_FILE")]
    pub log_file: Option<String>,

    /// Log level for both the file and stdout sinks.
    #[arg(long, env = "BOLT_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// When set, also logs full wire-frame payloads at `trace` level.
    #[arg(long, env = "BOLT_LOG_MESSAGES", default_value_t = false)]
    pub log_messages: bool,
}
